//! Filter Rule Synchronizer
//!
//! Drives a device's dedup rules to their target state:
//!
//! ```text
//! filter OUTPUT:   ... -j <DEV>-DEDUP            (appended)
//! <DEV>-DEDUP:     -p IPv4 -s <mac> -o veth+ --ip-src <addr> -j ACCEPT
//!                  -p IPv4 -s <mac> -o veth+ --ip-src <net>/<len> -j DROP
//! ```
//!
//! Steps run strictly in order, each with ensure-semantics, so repeated runs
//! converge on the same rule set. Failures are advisory: each step's outcome is
//! logged and recorded in a [`SyncReport`], never propagated. A failed version
//! probe skips every remaining step; any other failure only affects its own step.
//!
//! The flush runs before the probe, so a host that lost its filter capability
//! is left with an empty dedup chain.

use crate::core::backend::FilterBackend;
use crate::core::chain::{DedupChain, FilterRule, Table};
use crate::core::error::FilterError;
use crate::core::link::HardwareAddress;
use ipnetwork::Ipv4Network;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Synchronization steps, in execution order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter, strum::AsRefStr,
)]
pub enum SyncStep {
    #[strum(serialize = "flush-chain")]
    FlushChain,
    #[strum(serialize = "probe-version")]
    ProbeVersion,
    #[strum(serialize = "ensure-chain")]
    EnsureChain,
    #[strum(serialize = "ensure-jump")]
    EnsureJump,
    #[strum(serialize = "ensure-accept")]
    EnsureAccept,
    #[strum(serialize = "ensure-drop")]
    EnsureDrop,
}

/// What happened to a single step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step succeeded; `changed` is false when the state was already in place.
    Applied { changed: bool },
    /// The step was not attempted.
    Skipped(String),
    /// The step was attempted and failed.
    Failed(String),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Applied { changed: true } => f.write_str("changed"),
            StepOutcome::Applied { changed: false } => f.write_str("unchanged"),
            StepOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
            StepOutcome::Failed(cause) => write!(f, "failed ({cause})"),
        }
    }
}

/// Outcome of one synchronization run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub chain: DedupChain,
    /// Filter subsystem version, when the probe succeeded.
    pub version: Option<String>,
    pub steps: Vec<(SyncStep, StepOutcome)>,
}

impl SyncReport {
    fn new(chain: DedupChain) -> Self {
        Self {
            chain,
            version: None,
            steps: Vec::with_capacity(6),
        }
    }

    fn record(&mut self, step: SyncStep, outcome: StepOutcome) {
        self.steps.push((step, outcome));
    }

    /// Outcome recorded for `step`.
    pub fn outcome(&self, step: SyncStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find_map(|(s, outcome)| (*s == step).then_some(outcome))
    }

    /// True when the chain, jump, accept and drop rules are all in place.
    ///
    /// The flush step is excluded: on first run the chain does not exist yet.
    pub fn is_converged(&self) -> bool {
        [
            SyncStep::ProbeVersion,
            SyncStep::EnsureChain,
            SyncStep::EnsureJump,
            SyncStep::EnsureAccept,
            SyncStep::EnsureDrop,
        ]
        .into_iter()
        .all(|step| matches!(self.outcome(step), Some(StepOutcome::Applied { .. })))
    }

    /// Steps that failed, in order.
    pub fn failures(&self) -> impl Iterator<Item = (SyncStep, &str)> {
        self.steps.iter().filter_map(|(step, outcome)| match outcome {
            StepOutcome::Failed(cause) => Some((*step, cause.as_str())),
            _ => None,
        })
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.chain)?;
        for (step, outcome) in &self.steps {
            write!(f, " {step}={outcome}")?;
        }
        Ok(())
    }
}

/// Everything the synchronizer needs to know about one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupTarget {
    pub device: String,
    pub chain: DedupChain,
    pub mac: HardwareAddress,
    pub network: Ipv4Network,
}

impl DedupTarget {
    /// Target with the chain derived from the device name.
    pub fn new(device: &str, mac: HardwareAddress, network: Ipv4Network) -> Self {
        Self {
            device: device.to_string(),
            chain: DedupChain::for_device(device),
            mac,
            network,
        }
    }

    /// Overrides the dedup chain.
    pub fn with_chain(mut self, chain: DedupChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn jump_rule(&self) -> FilterRule {
        FilterRule::output_jump(&self.chain)
    }

    pub fn accept_rule(&self) -> FilterRule {
        FilterRule::dedup_accept(&self.chain, self.mac, self.network)
    }

    pub fn drop_rule(&self) -> FilterRule {
        FilterRule::dedup_drop(&self.chain, self.mac, self.network)
    }
}

/// Reconciles dedup rules against a [`FilterBackend`]
#[derive(Debug, Clone)]
pub struct Synchronizer<B> {
    backend: B,
}

impl<B: FilterBackend> Synchronizer<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Runs every step once and reports what happened.
    pub async fn sync(&self, target: &DedupTarget) -> SyncReport {
        let table = Table::Filter;
        let chain = target.chain.as_str();
        let mut report = SyncReport::new(target.chain.clone());

        // Missing chain on first run is expected.
        let outcome = match self.backend.flush_chain(table, chain).await {
            Ok(()) => StepOutcome::Applied { changed: true },
            Err(e) => {
                debug!("Failed to flush dedup chain {chain}: {e}");
                StepOutcome::Failed(e.to_string())
            }
        };
        report.record(SyncStep::FlushChain, outcome);

        match self.backend.version().await {
            Ok(version) => {
                debug!("ebtables version {version}");
                report.version = Some(version);
                report.record(SyncStep::ProbeVersion, StepOutcome::Applied { changed: false });
            }
            Err(e) => {
                let translation = e.translate();
                warn!(
                    "Failed to get ebtables version. Skip syncing ebtables dedup rules: {e} ({})",
                    translation.user_message
                );
                report.record(SyncStep::ProbeVersion, StepOutcome::Failed(e.to_string()));
                for step in [
                    SyncStep::EnsureChain,
                    SyncStep::EnsureJump,
                    SyncStep::EnsureAccept,
                    SyncStep::EnsureDrop,
                ] {
                    report.record(
                        step,
                        StepOutcome::Skipped("filter subsystem unavailable".to_string()),
                    );
                }
                return report;
            }
        }

        info!(
            "Filtering packets with ebtables on mac address: {}, device: {}, network: {}",
            target.mac, target.device, target.network
        );

        let result = self.backend.ensure_chain(table, chain).await;
        report.record(
            SyncStep::EnsureChain,
            outcome_of(result, || format!("Failed to ensure {table} chain {chain}")),
        );

        let result = self.backend.ensure_rule(&target.jump_rule()).await;
        report.record(
            SyncStep::EnsureJump,
            outcome_of(result, || {
                format!("Failed to ensure {table} chain OUTPUT jump to {chain} chain")
            }),
        );

        let result = self.backend.ensure_rule(&target.accept_rule()).await;
        report.record(
            SyncStep::EnsureAccept,
            outcome_of(result, || {
                format!("Failed to ensure packets from {} to be accepted", target.device)
            }),
        );

        let result = self.backend.ensure_rule(&target.drop_rule()).await;
        report.record(
            SyncStep::EnsureDrop,
            outcome_of(result, || {
                format!(
                    "Failed to ensure packets from {} with the mac address of {} to get dropped",
                    target.network, target.device
                )
            }),
        );

        if report.is_converged() {
            info!("Dedup rules in place: {report}");
        } else {
            warn!("Dedup rules incomplete: {report}");
        }

        report
    }
}

/// Converts an ensure result (`Ok(existed)`) into a step outcome, logging failures.
fn outcome_of(
    result: Result<bool, FilterError>,
    context: impl FnOnce() -> String,
) -> StepOutcome {
    match result {
        Ok(existed) => StepOutcome::Applied { changed: !existed },
        Err(e) => {
            error!("{}: {e}", context());
            StepOutcome::Failed(e.to_string())
        }
    }
}

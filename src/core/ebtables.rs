//! `ebtables` command-line backend
//!
//! Implements [`FilterBackend`] by spawning the `ebtables` binary. Arguments are
//! passed directly without shell interpretation. Existence checks list the chain
//! with `--Lmac2` (zero-padded MACs) and compare trimmed lines against the rule
//! specification.
//!
//! # Environment Variables
//!
//! - `CNI_DEDUP_EBTABLES`: path of the ebtables binary (read by the CLI, default `ebtables`)

use crate::core::backend::FilterBackend;
use crate::core::chain::{FilterRule, Position, Table};
use crate::core::error::FilterError;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// ebtables runner
#[derive(Debug, Clone)]
pub struct Ebtables {
    program: PathBuf,
}

impl Default for Ebtables {
    fn default() -> Self {
        Self::new()
    }
}

impl Ebtables {
    pub fn new() -> Self {
        Self::with_program("ebtables")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Runs ebtables and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the binary cannot be spawned or exits non-zero.
    async fn run(&self, args: &[&str]) -> Result<String, FilterError> {
        debug!("ebtables {}", args.join(" "));

        let output = Command::new(&self.program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|source| FilterError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(FilterError::Command {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                exit_code: output.status.code(),
            })
        }
    }
}

impl FilterBackend for Ebtables {
    async fn version(&self) -> Result<String, FilterError> {
        let output = self.run(&["--version"]).await?;
        parse_version(&output).ok_or_else(|| FilterError::UnknownVersion(output.trim().to_string()))
    }

    async fn flush_chain(&self, table: Table, chain: &str) -> Result<(), FilterError> {
        self.run(&["-t", table.as_ref(), "-F", chain]).await?;
        Ok(())
    }

    async fn ensure_chain(&self, table: Table, chain: &str) -> Result<bool, FilterError> {
        match self.run(&["-t", table.as_ref(), "-L", chain]).await {
            Ok(_) => Ok(true),
            Err(FilterError::Command { .. }) => {
                info!("Creating {table} chain {chain}");
                self.run(&["-t", table.as_ref(), "-N", chain]).await?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_rule(&self, rule: &FilterRule) -> Result<bool, FilterError> {
        let table = rule.table.as_ref();
        let listing = self
            .run(&["-t", table, "-L", &rule.chain, "--Lmac2"])
            .await?;

        if rule_listed(&listing, &rule.spec()) {
            return Ok(true);
        }

        let rule_args = rule.args();
        let mut args = vec!["-t", table];
        match rule.position {
            Position::Append => args.extend(["-A", rule.chain.as_str()]),
            Position::Prepend => args.extend(["-I", rule.chain.as_str(), "1"]),
        }
        args.extend(rule_args.iter().map(String::as_str));

        info!("Adding rule ({}): {rule}", rule.position);
        self.run(&args).await?;
        Ok(false)
    }
}

/// Extracts `X.Y.Z` from `ebtables --version` output.
///
/// Accepts both the legacy form (`ebtables v2.0.10-4 (December 2011)`) and the
/// nf_tables form (`ebtables 1.8.7 (nf_tables)`).
fn parse_version(output: &str) -> Option<String> {
    output.split_whitespace().find_map(|token| {
        let token = token.strip_prefix('v').unwrap_or(token);
        let end = token
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(token.len());
        let candidate = token[..end].trim_end_matches('.');
        let parts: Vec<&str> = candidate.split('.').collect();

        (parts.len() >= 3 && parts.iter().all(|p| !p.is_empty())).then(|| candidate.to_string())
    })
}

/// Whether a chain listing contains a rule with exactly this specification.
fn rule_listed(listing: &str, spec: &str) -> bool {
    listing.lines().any(|line| line.trim() == spec)
}

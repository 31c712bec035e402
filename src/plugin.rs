//! Attach and detach orchestration
//!
//! Attach enables promiscuous mode, resolves the device's IPv4 network and
//! synchronizes its dedup rules. Device and address failures abort the attach;
//! filter failures never do. Detach is a no-op: filter state is left in place.

use crate::config::NetConf;
use crate::core::backend::FilterBackend;
use crate::core::error::{Error, Result};
use crate::core::link::LinkControl;
use crate::core::resolver::{self, AddressSource};
use crate::core::sync::{DedupTarget, SyncReport, Synchronizer};
use serde_json::{Value, json};
use tracing::{debug, info};

/// Successful attach
#[derive(Debug, Clone)]
pub struct Attached {
    /// Result object printed back to the runtime
    pub result: Value,
    pub report: SyncReport,
}

/// The plugin wired to its external capabilities
#[derive(Debug)]
pub struct Plugin<L, A, B> {
    links: L,
    addresses: A,
    synchronizer: Synchronizer<B>,
}

impl<L: LinkControl, A: AddressSource, B: FilterBackend> Plugin<L, A, B> {
    pub fn new(links: L, addresses: A, backend: B) -> Self {
        Self {
            links,
            addresses,
            synchronizer: Synchronizer::new(backend),
        }
    }

    /// Handles ADD.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the configuration is invalid, the device is missing,
    /// promiscuous mode cannot be enabled, or the device has no IPv4 network.
    pub async fn on_attach(&self, stdin: &[u8]) -> Result<Attached> {
        let conf = NetConf::from_bytes(stdin)?;
        let device = conf.device_config()?;
        let device = device.device();

        let link = self
            .links
            .link_by_name(device)
            .await
            .map_err(|source| Error::DeviceLookup {
                device: device.to_string(),
                source,
            })?;

        if link.promiscuous {
            debug!("{device} already in promiscuous mode");
        } else {
            self.links
                .set_promisc_on(device)
                .await
                .map_err(|source| Error::PromiscuousMode {
                    device: device.to_string(),
                    source,
                })?;
        }

        let network =
            resolver::resolve(&self.addresses, device).map_err(|source| Error::Resolve {
                device: device.to_string(),
                source,
            })?;

        let target = DedupTarget::new(device, link.hardware_addr, network);
        let report = self.synchronizer.sync(&target).await;

        info!("Attached {device} ({network}): {report}");

        Ok(Attached {
            result: attach_result(&conf),
            report,
        })
    }

    /// Handles DEL. Always succeeds and leaves devices and rules untouched.
    pub fn on_detach(&self, stdin: &[u8]) {
        let device = NetConf::from_bytes(stdin).map(|conf| conf.device).ok();
        debug!("Detach for {device:?}: nothing to clean up");
    }
}

/// ADD result: the previous plugin's result when chained, otherwise empty.
fn attach_result(conf: &NetConf) -> Value {
    match &conf.prev_result {
        Some(Value::Object(prev)) => {
            let mut result = prev.clone();
            result.insert("cniVersion".to_string(), json!(conf.cni_version));
            Value::Object(result)
        }
        _ => json!({ "cniVersion": conf.cni_version, "dns": {} }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{ConfigError, LinkError, ResolveError};
    use crate::core::sync::{StepOutcome, SyncStep};
    use crate::core::test_helpers::{FakeAddresses, FakeBackend, FakeLinks, FakeOp, test_mac};

    const CONF: &[u8] = br#"{"cniVersion":"0.4.0","name":"kubenet","type":"cni-dedup","device":"cbr0"}"#;

    fn addresses() -> FakeAddresses {
        FakeAddresses::with("cbr0", &["127.0.0.1/8", "fe80::1/64", "10.244.1.1/24"])
    }

    #[tokio::test]
    async fn test_attach_enables_promisc_and_syncs() {
        let links = FakeLinks::with_link("cbr0", test_mac(), false);
        let backend = FakeBackend::new();
        let plugin = Plugin::new(&links, addresses(), &backend);

        let attached = plugin.on_attach(CONF).await.unwrap();

        assert_eq!(links.promisc_calls(), 1);
        assert!(links.is_promiscuous("cbr0"));
        assert!(attached.report.is_converged());
        assert_eq!(
            backend.rules("CBR0-DEDUP").unwrap(),
            vec![
                "-p IPv4 -s aa:bb:cc:dd:ee:ff -o veth+ --ip-src 10.244.1.1 -j ACCEPT",
                "-p IPv4 -s aa:bb:cc:dd:ee:ff -o veth+ --ip-src 10.244.1.0/24 -j DROP",
            ]
        );
        assert_eq!(
            attached.result,
            serde_json::json!({ "cniVersion": "0.4.0", "dns": {} })
        );
    }

    #[tokio::test]
    async fn test_already_promiscuous_not_reissued() {
        let links = FakeLinks::with_link("cbr0", test_mac(), true);
        let backend = FakeBackend::new();
        let plugin = Plugin::new(&links, addresses(), &backend);

        plugin.on_attach(CONF).await.unwrap();

        assert_eq!(links.promisc_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_device_fails_before_filtering() {
        let links = FakeLinks::with_link("eth0", test_mac(), false);
        let backend = FakeBackend::new();
        let plugin = Plugin::new(&links, addresses(), &backend);

        let err = plugin.on_attach(CONF).await.unwrap_err();

        assert!(matches!(
            err,
            Error::DeviceLookup {
                source: LinkError::NotFound,
                ..
            }
        ));
        assert!(backend.calls().is_empty());
        assert_eq!(links.promisc_calls(), 0);
    }

    #[tokio::test]
    async fn test_promisc_failure_is_fatal() {
        let links = FakeLinks::with_link("cbr0", test_mac(), false);
        links.fail_promisc();
        let backend = FakeBackend::new();
        let plugin = Plugin::new(&links, addresses(), &backend);

        let err = plugin.on_attach(CONF).await.unwrap_err();

        assert!(matches!(err, Error::PromiscuousMode { .. }));
        assert!(err.to_string().contains("cbr0"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_failure_is_fatal() {
        let links = FakeLinks::with_link("cbr0", test_mac(), true);
        let backend = FakeBackend::new();
        let plugin = Plugin::new(
            &links,
            FakeAddresses::with("cbr0", &["127.0.0.1/8", "fe80::1/64"]),
            &backend,
        );

        let err = plugin.on_attach(CONF).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Resolve {
                source: ResolveError::NoAddressFound(_),
                ..
            }
        ));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_filter_unavailable_still_attaches() {
        let links = FakeLinks::with_link("cbr0", test_mac(), true);
        let backend = FakeBackend::new();
        backend.fail(FakeOp::Version);
        let plugin = Plugin::new(&links, addresses(), &backend);

        let attached = plugin.on_attach(CONF).await.unwrap();

        assert!(!attached.report.is_converged());
        assert!(matches!(
            attached.report.outcome(SyncStep::EnsureChain),
            Some(StepOutcome::Skipped(_))
        ));
        assert!(backend.rules("CBR0-DEDUP").is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let links = FakeLinks::with_link("cbr0", test_mac(), true);
        let backend = FakeBackend::new();
        let plugin = Plugin::new(&links, addresses(), &backend);

        let err = plugin.on_attach(b"{\"name\":\"x\"}").await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingDevice)));

        let err = plugin.on_attach(b"{").await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Malformed(_))));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_attach_passes_prev_result_through() {
        let links = FakeLinks::with_link("cbr0", test_mac(), true);
        let backend = FakeBackend::new();
        let plugin = Plugin::new(&links, addresses(), &backend);

        let conf = br#"{"cniVersion":"1.0.0","device":"cbr0","prevResult":{"cniVersion":"1.0.0","ips":[{"address":"10.244.1.5/24"}]}}"#;
        let attached = plugin.on_attach(conf).await.unwrap();

        assert_eq!(attached.result["ips"][0]["address"], "10.244.1.5/24");
        assert_eq!(attached.result["cniVersion"], "1.0.0");
    }

    #[tokio::test]
    async fn test_repeated_attach_converges() {
        let links = FakeLinks::with_link("cbr0", test_mac(), false);
        let backend = FakeBackend::new();
        let plugin = Plugin::new(&links, addresses(), &backend);

        plugin.on_attach(CONF).await.unwrap();
        let first = backend.snapshot();
        plugin.on_attach(CONF).await.unwrap();

        assert_eq!(backend.snapshot(), first);
        assert_eq!(links.promisc_calls(), 1);
    }

    #[test]
    fn test_detach_always_succeeds() {
        let links = FakeLinks::default();
        let backend = FakeBackend::new();
        let plugin = Plugin::new(&links, FakeAddresses::default(), &backend);

        plugin.on_detach(CONF);
        plugin.on_detach(b"garbage");

        assert!(backend.calls().is_empty());
    }
}

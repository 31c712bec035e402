//! Shared test utilities for core module tests
//!
//! In-memory stand-ins for the external capabilities so ordering and
//! failure handling can be tested without ebtables or real links.
//! This module is only compiled in test mode.

use crate::core::backend::FilterBackend;
use crate::core::chain::{BuiltinChain, FilterRule, Position, Table};
use crate::core::error::{FilterError, LinkError, ResolveError};
use crate::core::link::{HardwareAddress, Link, LinkControl};
use crate::core::resolver::AddressSource;
use ipnetwork::IpNetwork;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;

/// Operations a [`FakeBackend`] can be told to fail
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Version,
    Flush,
    EnsureChain,
    /// `ensure_rule` for rules with this target (e.g. `"ACCEPT"`)
    EnsureRule(String),
}

/// In-memory ebtables with first-match ordered chains
///
/// Built-in chains exist from the start; user chains must be created.
#[derive(Debug, Default)]
pub struct FakeBackend {
    chains: RefCell<BTreeMap<(Table, String), Vec<String>>>,
    failing: RefCell<HashSet<FakeOp>>,
    calls: RefCell<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        for chain in [BuiltinChain::Input, BuiltinChain::Forward, BuiltinChain::Output] {
            backend
                .chains
                .borrow_mut()
                .insert((Table::Filter, chain.to_string()), Vec::new());
        }
        backend
    }

    pub fn fail(&self, op: FakeOp) {
        self.failing.borrow_mut().insert(op);
    }

    pub fn recover(&self, op: &FakeOp) {
        self.failing.borrow_mut().remove(op);
    }

    /// Adds a rule directly, bypassing ensure-semantics.
    pub fn seed_rule(&self, chain: &str, spec: &str) {
        self.chains
            .borrow_mut()
            .entry((Table::Filter, chain.to_string()))
            .or_default()
            .push(spec.to_string());
    }

    /// Rules of a filter-table chain, or `None` if it does not exist.
    pub fn rules(&self, chain: &str) -> Option<Vec<String>> {
        self.chains
            .borrow()
            .get(&(Table::Filter, chain.to_string()))
            .cloned()
    }

    /// Full filter state, for comparing runs.
    pub fn snapshot(&self) -> BTreeMap<(Table, String), Vec<String>> {
        self.chains.borrow().clone()
    }

    /// Operations issued so far, e.g. `"ensure-rule OUTPUT -j ETH0-DEDUP"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn check(&self, op: &FakeOp) -> Result<(), FilterError> {
        if self.failing.borrow().contains(op) {
            return Err(FilterError::Command {
                args: format!("{op:?}"),
                stderr: "injected failure".to_string(),
                exit_code: Some(1),
            });
        }
        Ok(())
    }

    fn missing_chain(chain: &str) -> FilterError {
        FilterError::Command {
            args: format!("-L {chain}"),
            stderr: format!("Chain '{chain}' doesn't exist."),
            exit_code: Some(255),
        }
    }
}

impl FilterBackend for FakeBackend {
    async fn version(&self) -> Result<String, FilterError> {
        self.log("version".to_string());
        self.check(&FakeOp::Version)?;
        Ok("2.0.10".to_string())
    }

    async fn flush_chain(&self, table: Table, chain: &str) -> Result<(), FilterError> {
        self.log(format!("flush {chain}"));
        self.check(&FakeOp::Flush)?;
        let mut chains = self.chains.borrow_mut();
        let rules = chains
            .get_mut(&(table, chain.to_string()))
            .ok_or_else(|| Self::missing_chain(chain))?;
        rules.clear();
        Ok(())
    }

    async fn ensure_chain(&self, table: Table, chain: &str) -> Result<bool, FilterError> {
        self.log(format!("ensure-chain {chain}"));
        self.check(&FakeOp::EnsureChain)?;
        let mut chains = self.chains.borrow_mut();
        let key = (table, chain.to_string());
        if chains.contains_key(&key) {
            return Ok(true);
        }
        chains.insert(key, Vec::new());
        Ok(false)
    }

    async fn ensure_rule(&self, rule: &FilterRule) -> Result<bool, FilterError> {
        self.log(format!("ensure-rule {} {}", rule.chain, rule.spec()));
        self.check(&FakeOp::EnsureRule(rule.target.to_string()))?;
        let mut chains = self.chains.borrow_mut();
        let rules = chains
            .get_mut(&(rule.table, rule.chain.clone()))
            .ok_or_else(|| Self::missing_chain(&rule.chain))?;

        let spec = rule.spec();
        if rules.contains(&spec) {
            return Ok(true);
        }
        match rule.position {
            Position::Append => rules.push(spec),
            Position::Prepend => rules.insert(0, spec),
        }
        Ok(false)
    }
}

/// In-memory links
#[derive(Debug, Default)]
pub struct FakeLinks {
    links: RefCell<HashMap<String, Link>>,
    promisc_calls: Cell<usize>,
    fail_promisc: Cell<bool>,
}

impl FakeLinks {
    pub fn with_link(name: &str, mac: HardwareAddress, promiscuous: bool) -> Self {
        let links = Self::default();
        links.links.borrow_mut().insert(
            name.to_string(),
            Link {
                name: name.to_string(),
                hardware_addr: mac,
                promiscuous,
            },
        );
        links
    }

    pub fn fail_promisc(&self) {
        self.fail_promisc.set(true);
    }

    pub fn promisc_calls(&self) -> usize {
        self.promisc_calls.get()
    }

    pub fn is_promiscuous(&self, name: &str) -> bool {
        self.links
            .borrow()
            .get(name)
            .is_some_and(|link| link.promiscuous)
    }
}

impl LinkControl for FakeLinks {
    async fn link_by_name(&self, name: &str) -> Result<Link, LinkError> {
        self.links
            .borrow()
            .get(name)
            .cloned()
            .ok_or(LinkError::NotFound)
    }

    async fn set_promisc_on(&self, name: &str) -> Result<(), LinkError> {
        self.promisc_calls.set(self.promisc_calls.get() + 1);
        if self.fail_promisc.get() {
            return Err(LinkError::Command {
                program: "ip".to_string(),
                stderr: "RTNETLINK answers: Operation not permitted".to_string(),
                exit_code: Some(2),
            });
        }
        let mut links = self.links.borrow_mut();
        let link = links.get_mut(name).ok_or(LinkError::NotFound)?;
        link.promiscuous = true;
        Ok(())
    }
}

/// Fixed per-device address lists
#[derive(Debug, Default)]
pub struct FakeAddresses(pub HashMap<String, Vec<IpNetwork>>);

impl FakeAddresses {
    pub fn with(device: &str, addresses: &[&str]) -> Self {
        let list = addresses
            .iter()
            .map(|a| a.parse().expect("valid test address"))
            .collect();
        Self(HashMap::from([(device.to_string(), list)]))
    }
}

impl AddressSource for FakeAddresses {
    fn addresses(&self, device: &str) -> Result<Vec<IpNetwork>, ResolveError> {
        self.0
            .get(device)
            .cloned()
            .ok_or_else(|| ResolveError::InterfaceNotFound(device.to_string()))
    }
}

pub fn test_mac() -> HardwareAddress {
    HardwareAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
}

/// Runs a future on a fresh current-thread runtime (for proptest bodies).
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
        .block_on(future)
}

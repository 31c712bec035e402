//! Bridge filter tables, chains and rules
//!
//! A [`FilterRule`] is an ordered entry in an ebtables chain. Rules render to the
//! exact argument list passed to `ebtables` and, joined with spaces, to the line
//! `ebtables -L --Lmac2` prints for them; the latter is what makes "ensure"
//! checks a simple line comparison.

use crate::core::link::HardwareAddress;
use crate::validators::validate_chain_name;
use ipnetwork::Ipv4Network;
use std::fmt;

/// Suffix appended to the uppercased device name to form its dedup chain.
pub const DEDUP_CHAIN_SUFFIX: &str = "-DEDUP";

/// Output-interface wildcard matching every per-container veth link.
pub const VETH_WILDCARD: &str = "veth+";

/// ebtables table
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum Table {
    #[default]
    #[strum(serialize = "filter")]
    Filter,
    #[strum(serialize = "nat")]
    Nat,
    #[strum(serialize = "broute")]
    Broute,
}

/// Built-in chains of the filter table
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
pub enum BuiltinChain {
    #[strum(serialize = "INPUT")]
    Input,
    #[strum(serialize = "FORWARD")]
    Forward,
    #[strum(serialize = "OUTPUT")]
    Output,
}

/// Per-device dedup chain name
///
/// Each device owns exactly one chain in the shared filter table, so the name is
/// the key that keeps concurrent attaches for different devices apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupChain(String);

impl DedupChain {
    /// Derives `UPPER(device)-DEDUP`.
    ///
    /// ```
    /// use cni_dedup::core::chain::DedupChain;
    ///
    /// assert_eq!(DedupChain::for_device("eth0").as_str(), "ETH0-DEDUP");
    /// ```
    pub fn for_device(device: &str) -> Self {
        Self(format!("{}{DEDUP_CHAIN_SUFFIX}", device.to_uppercase()))
    }

    /// Uses an explicit chain name instead of the derived one.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the name is not a valid user-defined chain name.
    pub fn new(name: &str) -> Result<Self, String> {
        validate_chain_name(name).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DedupChain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a missing rule is inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Position {
    #[strum(serialize = "append")]
    Append,
    #[strum(serialize = "prepend")]
    Prepend,
}

/// Rule verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Accept,
    Drop,
    Jump(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Accept => f.write_str("ACCEPT"),
            Target::Drop => f.write_str("DROP"),
            Target::Jump(chain) => f.write_str(chain),
        }
    }
}

/// A single ordered rule inside a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub table: Table,
    pub chain: String,
    pub position: Position,
    pub matches: Vec<String>,
    pub target: Target,
}

impl FilterRule {
    /// Rule-specification arguments, target included.
    pub fn args(&self) -> Vec<String> {
        let mut args = self.matches.clone();
        args.push("-j".to_string());
        args.push(self.target.to_string());
        args
    }

    /// The line `ebtables -L --Lmac2` prints for this rule.
    pub fn spec(&self) -> String {
        self.args().join(" ")
    }

    /// Unconditional jump from the filter table's OUTPUT chain to `chain`.
    pub fn output_jump(chain: &DedupChain) -> Self {
        Self {
            table: Table::Filter,
            chain: BuiltinChain::Output.to_string(),
            position: Position::Append,
            matches: Vec::new(),
            target: Target::Jump(chain.to_string()),
        }
    }

    /// Accepts IPv4 frames from the bridge's own MAC and exact IP leaving on a veth.
    ///
    /// Prepended so it is evaluated before [`FilterRule::dedup_drop`].
    pub fn dedup_accept(chain: &DedupChain, mac: HardwareAddress, network: Ipv4Network) -> Self {
        Self {
            table: Table::Filter,
            chain: chain.to_string(),
            position: Position::Prepend,
            matches: dedup_matches(mac, network.ip().to_string()),
            target: Target::Accept,
        }
    }

    /// Drops IPv4 frames from the bridge's MAC with any source IP in its network.
    pub fn dedup_drop(chain: &DedupChain, mac: HardwareAddress, network: Ipv4Network) -> Self {
        Self {
            table: Table::Filter,
            chain: chain.to_string(),
            position: Position::Append,
            matches: dedup_matches(mac, canonical_ip_src(network)),
            target: Target::Drop,
        }
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-t {} {} {}", self.table, self.chain, self.spec())
    }
}

fn dedup_matches(mac: HardwareAddress, ip_src: String) -> Vec<String> {
    vec![
        "-p".to_string(),
        "IPv4".to_string(),
        "-s".to_string(),
        mac.to_string(),
        "-o".to_string(),
        VETH_WILDCARD.to_string(),
        "--ip-src".to_string(),
        ip_src,
    ]
}

/// `--ip-src` range as ebtables lists it: masked base address, no `/32`.
fn canonical_ip_src(network: Ipv4Network) -> String {
    if network.prefix() == 32 {
        network.ip().to_string()
    } else {
        format!("{}/{}", network.network(), network.prefix())
    }
}

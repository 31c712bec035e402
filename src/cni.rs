//! CNI invocation envelope
//!
//! The runtime selects the verb through `CNI_COMMAND`, passes container details
//! in `CNI_*` variables and the network configuration on stdin. Results and
//! errors are JSON on stdout; a non-zero exit status marks failure.

use crate::config::DEFAULT_CNI_VERSION;
use crate::core::backend::FilterBackend;
use crate::core::error::{Error, Result};
use crate::core::link::LinkControl;
use crate::core::resolver::AddressSource;
use crate::plugin::Plugin;
use serde_json::{Value, json};
use std::error::Error as _;
use std::str::FromStr;
use tracing::debug;

/// CNI protocol versions this plugin can speak
pub const SUPPORTED_VERSIONS: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// CNI verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CniCommand {
    Add,
    Del,
    Check,
    Version,
}

impl CniCommand {
    /// Environment variables the runtime must set for this verb.
    pub fn required_env(self) -> &'static [&'static str] {
        match self {
            CniCommand::Add | CniCommand::Check => {
                &["CNI_CONTAINERID", "CNI_NETNS", "CNI_IFNAME", "CNI_PATH"]
            }
            CniCommand::Del => &["CNI_CONTAINERID", "CNI_IFNAME", "CNI_PATH"],
            CniCommand::Version => &[],
        }
    }
}

/// `CNI_*` invocation environment
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Invocation {
    /// Operation to perform: ADD, DEL, CHECK or VERSION
    #[arg(long, env = "CNI_COMMAND")]
    pub command: Option<String>,

    /// Container ID
    #[arg(long, env = "CNI_CONTAINERID")]
    pub container_id: Option<String>,

    /// Path to the container's network namespace
    #[arg(long, env = "CNI_NETNS")]
    pub netns: Option<String>,

    /// Interface name inside the container
    #[arg(long, env = "CNI_IFNAME")]
    pub ifname: Option<String>,

    /// Extra `KEY=VALUE;...` arguments
    #[arg(long, env = "CNI_ARGS")]
    pub cni_args: Option<String>,

    /// Plugin search path
    #[arg(long, env = "CNI_PATH")]
    pub cni_path: Option<String>,
}

impl Invocation {
    /// Parses the verb and checks its required variables are present.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `CNI_COMMAND` is missing or unknown, or a required
    /// variable is unset or empty.
    pub fn command(&self) -> Result<CniCommand> {
        let raw = self
            .command
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::MissingEnvironment(vec!["CNI_COMMAND"]))?;
        let command =
            CniCommand::from_str(raw).map_err(|_| Error::UnsupportedCommand(raw.to_string()))?;

        let missing: Vec<&'static str> = command
            .required_env()
            .iter()
            .copied()
            .filter(|name| self.get(name).is_none_or(str::is_empty))
            .collect();

        if missing.is_empty() {
            Ok(command)
        } else {
            Err(Error::MissingEnvironment(missing))
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        match name {
            "CNI_CONTAINERID" => self.container_id.as_deref(),
            "CNI_NETNS" => self.netns.as_deref(),
            "CNI_IFNAME" => self.ifname.as_deref(),
            "CNI_ARGS" => self.cni_args.as_deref(),
            "CNI_PATH" => self.cni_path.as_deref(),
            _ => None,
        }
    }
}

/// Dispatches one invocation. `Ok(Some(_))` is printed on stdout.
///
/// # Errors
///
/// Returns the attach-fatal error for ADD, or an envelope error.
pub async fn run<L, A, B>(
    plugin: &Plugin<L, A, B>,
    invocation: &Invocation,
    stdin: &[u8],
) -> Result<Option<Value>>
where
    L: LinkControl,
    A: AddressSource,
    B: FilterBackend,
{
    let command = invocation.command()?;
    debug!(
        "CNI {command} container={:?} ifname={:?}",
        invocation.container_id, invocation.ifname
    );

    match command {
        CniCommand::Add => plugin.on_attach(stdin).await.map(|a| Some(a.result)),
        CniCommand::Del => {
            plugin.on_detach(stdin);
            Ok(None)
        }
        CniCommand::Check => Ok(None),
        CniCommand::Version => Ok(Some(version_info(stdin))),
    }
}

/// `cniVersion` named by the payload, or the default.
pub fn cni_version_of(stdin: &[u8]) -> String {
    serde_json::from_slice::<Value>(stdin)
        .ok()
        .and_then(|v| v.get("cniVersion")?.as_str().map(String::from))
        .unwrap_or_else(|| DEFAULT_CNI_VERSION.to_string())
}

/// VERSION result.
pub fn version_info(stdin: &[u8]) -> Value {
    json!({
        "cniVersion": cni_version_of(stdin),
        "supportedVersions": SUPPORTED_VERSIONS,
    })
}

/// Error object printed on stdout when an invocation fails.
pub fn error_object(err: &Error, cni_version: &str) -> Value {
    let mut object = json!({
        "cniVersion": cni_version,
        "code": err.cni_code(),
        "msg": err.to_string(),
    });
    if let Some(source) = err.source() {
        object["details"] = json!(source.to_string());
    }
    object
}

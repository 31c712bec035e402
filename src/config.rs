use crate::core::error::ConfigError;
use crate::validators::validate_interface;
use serde::{Deserialize, Serialize};

/// CNI version assumed when the configuration does not name one
pub const DEFAULT_CNI_VERSION: &str = "0.4.0";

/// Network configuration delivered on stdin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    #[serde(default = "default_cni_version")]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub plugin_type: String,
    /// Device name, something like cbr0 or eth0
    #[serde(default)]
    pub device: String,
    /// Result of the previous plugin in a chained configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_result: Option<serde_json::Value>,
}

fn default_cni_version() -> String {
    DEFAULT_CNI_VERSION.to_string()
}

impl NetConf {
    /// Decodes and validates a network configuration.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the payload is not valid JSON for this schema or the
    /// device is missing or invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let conf: NetConf = serde_json::from_slice(bytes).map_err(ConfigError::Malformed)?;
        conf.device_config()?;
        Ok(conf)
    }

    /// The validated device this configuration targets.
    pub fn device_config(&self) -> Result<DeviceConfig, ConfigError> {
        DeviceConfig::new(&self.device)
    }
}

/// The one setting the core acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    device: String,
}

impl DeviceConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDevice`] for an empty name and
    /// [`ConfigError::InvalidDevice`] if it is not a valid interface name.
    pub fn new(device: &str) -> Result<Self, ConfigError> {
        if device.is_empty() {
            return Err(ConfigError::MissingDevice);
        }
        let device = validate_interface(device).map_err(|reason| ConfigError::InvalidDevice {
            name: device.to_string(),
            reason,
        })?;
        Ok(Self { device })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

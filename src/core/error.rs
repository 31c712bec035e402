use thiserror::Error;

/// Attach-fatal errors surfaced to the CNI runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Network configuration could not be decoded or validated
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured device does not exist or cannot be queried
    #[error("Failed to get device {device}: {source}")]
    DeviceLookup {
        device: String,
        #[source]
        source: LinkError,
    },

    /// Enabling promiscuous mode failed
    #[error("Error setting promiscuous mode on {device}: {source}")]
    PromiscuousMode {
        device: String,
        #[source]
        source: LinkError,
    },

    /// The device's IPv4 network could not be resolved
    #[error("Failed to get CIDR from interface {device}: {source}")]
    Resolve {
        device: String,
        #[source]
        source: ResolveError,
    },

    /// `CNI_COMMAND` names a verb this plugin does not implement
    #[error("Unsupported CNI command: {0}")]
    UnsupportedCommand(String),

    /// Environment variables the verb requires are not set
    #[error("required env variables [{}] missing", .0.join(","))]
    MissingEnvironment(Vec<&'static str>),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Maps the error onto the CNI well-known error codes.
    pub fn cni_code(&self) -> u32 {
        match self {
            Error::Config(ConfigError::Malformed(_)) | Error::Serialization(_) => 6,
            Error::Config(_) => 7,
            Error::UnsupportedCommand(_) | Error::MissingEnvironment(_) => 4,
            Error::Io(_) => 5,
            Error::DeviceLookup { .. } | Error::Resolve { .. } => 11,
            Error::PromiscuousMode { .. } => 999,
        }
    }
}

/// Network configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load netconf: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("specify \"device\"")]
    MissingDevice,

    #[error("invalid device {name:?}: {reason}")]
    InvalidDevice { name: String, reason: String },
}

/// Address resolution errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Failed to get interface {0}: no such device")]
    InterfaceNotFound(String),

    #[error("Failed to get addresses from {device}: {reason}")]
    AddressEnumerationFailed { device: String, reason: String },

    #[error("No ipv4 addresses found on {0}")]
    NoAddressFound(String),
}

/// Device-control errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no such device")]
    NotFound,

    #[error("device has no hardware address")]
    NoHardwareAddress,

    #[error("interface query failed: {0}")]
    Query(#[from] nix::Error),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed (exit code {exit_code:?}): {stderr}")]
    Command {
        program: String,
        stderr: String,
        exit_code: Option<i32>,
    },
}

/// Errors reported by the packet-filter backend
///
/// These never abort an attach; the synchronizer records them in its report.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ebtables {args} failed: {stderr}")]
    Command {
        args: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("unrecognised ebtables version output: {0:?}")]
    UnknownVersion(String),
}

impl FilterError {
    /// Operator-facing explanation of the failure.
    pub fn translate(&self) -> ErrorTranslation {
        match self {
            FilterError::Spawn { source, .. } => {
                EbtablesErrorPattern::match_error(&source.to_string())
            }
            FilterError::Command { stderr, .. } => EbtablesErrorPattern::match_error(stderr),
            FilterError::UnknownVersion(output) => EbtablesErrorPattern::match_error(output),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Known ebtables failure messages and their translations
pub struct EbtablesErrorPattern;

impl EbtablesErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("ebtables is not installed or not found in PATH")
                .with_suggestion("Install ebtables: sudo apt install ebtables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install ebtables-legacy  (Fedora/RHEL)")
                .with_suggestion("Or point CNI_DEDUP_EBTABLES at the binary");
        }

        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to modify bridge filter rules")
                .with_suggestion("The CNI runtime must invoke the plugin as root")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available");
        }

        if lower.contains("table") && (lower.contains("does not exist") || lower.contains("kernel module"))
        {
            return ErrorTranslation::new("Bridge filter table is not available in the kernel")
                .with_suggestion("Load the module: sudo modprobe ebtable_filter")
                .with_suggestion("Check kernel modules: lsmod | grep ebt");
        }

        if lower.contains("chain") && (lower.contains("doesn't exist") || lower.contains("not found"))
        {
            return ErrorTranslation::new("Bridge filter chain not found")
                .with_suggestion("The dedup chain is created on the next attach");
        }

        if lower.contains("resource busy") || lower.contains("try again") {
            return ErrorTranslation::new("Bridge filter table is busy")
                .with_suggestion("Another process may be modifying ebtables")
                .with_suggestion("The rules converge on the next attach");
        }

        ErrorTranslation::new(format!("Bridge filter error: {msg}"))
            .with_suggestion("Verify ebtables is working: sudo ebtables -t filter -L")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! cni-dedup - bridge dedup hook for container networking
//!
//! Invoked once per container attach/detach. On attach it puts the configured
//! bridge device into promiscuous mode, discovers its IPv4 network and installs
//! ebtables rules that drop the duplicate copy of traffic seen both via the
//! bridge's own address and via the veth links riding on it.
//!
//! # Architecture
//!
//! - [`core`] - Rule model, ebtables backend, synchronizer, address and link discovery
//! - [`plugin`] - Attach/detach orchestration
//! - [`cni`] - Invocation envelope (verbs, result and error objects)
//! - [`config`] - Network configuration decoding
//! - [`validators`] - Interface and chain name validation
//!
//! # Failure Model
//!
//! - Configuration, device and address failures abort the attach
//! - ebtables failures are logged and reported, never fatal
//! - Detach never fails and leaves rules in place

#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]

pub mod cni;
pub mod config;
pub mod core;
pub mod plugin;
pub mod validators;

// Re-export commonly used types
pub use crate::core::error::{Error, Result};
pub use crate::core::sync::{DedupTarget, SyncReport, Synchronizer};
pub use plugin::Plugin;

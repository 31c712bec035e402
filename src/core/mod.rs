//! Core dedup functionality
//!
//! This module contains the types and logic for keeping a bridge's ebtables
//! dedup rules in place. It provides:
//!
//! - [`chain`]: Tables, chains and rule definitions
//! - [`backend`]: The packet-filter capability trait
//! - [`ebtables`]: `ebtables` command-line backend
//! - [`sync`]: Filter Rule Synchronizer and its report
//! - [`resolver`]: IPv4 network discovery for a device
//! - [`link`]: Device lookup and promiscuous mode
//! - [`error`]: Error types

pub mod backend;
pub mod chain;
pub mod ebtables;
pub mod error;
pub mod link;
pub mod resolver;
pub mod sync;

#[cfg(test)]
pub mod test_helpers;

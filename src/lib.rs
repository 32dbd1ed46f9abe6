//! Connectivity and telemetry uplink for a battery powered sensor node.
//!
//! The node wakes, joins its configured network (or falls back to a
//! provisioning access point), uploads one [`model::Measurement`], stores the
//! threshold limits returned by the collector, optionally installs new
//! firmware, raises the alert output and goes back to deep sleep.
//!
//! Everything outside the `firmware` module is hardware independent and tested on the
//! host with `cargo test`.

#![cfg_attr(not(test), no_std)]

pub mod alert;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod model;
pub mod provisioning;
pub mod store;
pub mod traits;
pub mod update;
pub mod uplink;

#[cfg(feature = "firmware")]
pub mod firmware;

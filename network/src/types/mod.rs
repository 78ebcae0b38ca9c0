//! Shared data types module.
//!
//! Contains the Ethernet-level types used on both sides of the VPN bridge.

pub mod ethernet;

// Re-exports
pub use ethernet::{MacAddress, MediaType, ETH_ALEN, ETH_HLEN, ETH_MTU, FCS_LEN};

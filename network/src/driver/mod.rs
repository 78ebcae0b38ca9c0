//! Driver module.
//!
//! # Architecture
//!
//! Drivers here do not own their device. The guest's driver does; we sit in
//! its register path:
//! - Register accesses arrive as traps from the hypervisor
//! - Most are passed straight to hardware through a host mapping
//! - A handful are emulated so the hardware walks rings we own
//!
//! All hardware access goes through [`crate::hv`] contracts.

pub mod realtek;

pub use realtek::{is_supported_device, Rtl8169Vpn};

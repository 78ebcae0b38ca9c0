//! RTL8169 VPN interception layer.
//!
//! Sits between a guest's RTL8169/8168 driver and the physical NIC inside
//! the hypervisor. Guest register accesses are trapped; descriptor-base
//! registers are shadowed and the hardware is pointed at rings owned by this
//! crate instead, so every frame the guest sends goes to a VPN client and
//! every frame the VPN client produces lands in the guest's receive ring.
//!
//! # Layers
//! - [`hv`]: what the hypervisor must provide (traps, mappings, memory, pages)
//! - [`device::registers`]: RTL8169 register map
//! - [`driver::realtek`]: the interception engine
//! - [`config`], [`error`]: ambient plumbing
//! - [`log`]: records go through the `log` facade; [`init_logging`] installs
//!   the in-memory ring backend for hosts without a console
//!
//! # Usage
//! ```ignore
//! let nic = Rtl8169Vpn::new(DeviceId(0), ShimConfig::new(), platform, &pool, bars)?;
//! // from the PCI layer
//! nic.config_write(offset, &data);
//! // from the MMIO trap registered for `target`
//! nic.handle_mmio(target.slot, gphys, is_write, &mut buf);
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod heap;
pub mod hv;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ShimConfig;
pub use driver::realtek::{
    is_supported_device, BarConfig, NicFunctions, NicInfo, Platform, RecvCallback, Rtl8169Vpn,
    VpnClient, VpnHandle,
};
pub use error::{AttachError, ShimError};
pub use types::MacAddress;
pub use vpnshim_core::{get_last_n_logs, init as init_logging, LogEntry};

//! PCI identity and configuration-space intercept.

use log::debug;

use super::bar::bar_write_value;
use super::Rtl8169Vpn;
use crate::device::registers::realtek::{
    DEVICE_ID_8168, DEVICE_ID_8169, PCI_BAR0, PCI_BAR_END, VENDOR_ID,
};
use crate::hv::{value_from_le, IoOutcome};

/// RTL8168 or RTL8169.
pub fn is_supported_device(vendor: u16, device: u16) -> bool {
    vendor == VENDOR_ID && (device == DEVICE_ID_8168 || device == DEVICE_ID_8169)
}

impl Rtl8169Vpn {
    /// Config-space read hook.
    ///
    /// With the VPN disabled the device is hidden: every read returns zero.
    pub fn config_read(&self, _offset: usize, buf: &mut [u8]) -> IoOutcome {
        if !self.shared.config.vpn_enabled {
            buf.fill(0);
            return IoOutcome::Handled;
        }
        IoOutcome::Default
    }

    /// Config-space write hook.
    ///
    /// BAR writes re-route the slot's trap before the host applies the
    /// write. With the VPN disabled writes are dropped.
    ///
    /// # Panics
    /// A write touching the BAR range that is not a 4-byte aligned dword,
    /// or a trap that cannot be installed for the new BAR value.
    pub fn config_write(&self, offset: usize, data: &[u8]) -> IoOutcome {
        if !self.shared.config.vpn_enabled {
            return IoOutcome::Handled;
        }
        if data.is_empty() || offset + data.len() <= PCI_BAR0 || offset >= PCI_BAR_END {
            return IoOutcome::Default;
        }
        if offset & 3 != 0 || data.len() != 4 {
            panic!(
                "config write to BAR range at {:#04x} ({} bytes) is not an aligned dword",
                offset,
                data.len()
            );
        }

        let slot = (offset - PCI_BAR0) / 4;
        let value = bar_write_value(self.shared.bar_masks[slot], value_from_le(data));
        debug!("BAR{} <- {:#010x}", slot, value);

        let mut state = self.shared.state.lock();
        if let Err(e) = self.shared.reconfigure_slot(&mut state, slot, value) {
            panic!("BAR{}: cannot re-route {:#010x}: {}", slot, value, e);
        }
        IoOutcome::Default
    }
}

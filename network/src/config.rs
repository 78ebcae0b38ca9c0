//! Interception layer configuration.

use crate::types::ETH_MTU;

/// Receive-configuration values a guest driver writes once it has reset
/// the chip and is about to start receiving. Seeing one of these (after a
/// reset) is what attaches the VPN client.
pub const DEFAULT_ATTACH_RCR_VALUES: [u32; 2] = [0x0000_E70E, 0x0000_E70F];

/// Link speed reported to the VPN client (1 Gb/s).
pub const DEFAULT_MEDIA_SPEED: u64 = 1_000_000_000;

/// Configuration for one intercepted RTL8169.
#[derive(Debug, Clone)]
pub struct ShimConfig {
    /// Master switch. When off the device is hidden from the guest:
    /// config-space reads return zero and writes are dropped.
    pub vpn_enabled: bool,
    /// RCR writes that trigger VPN attachment.
    pub attach_rcr_values: [u32; 2],
    /// MTU reported by both NIC info queries.
    pub mtu: u32,
    /// Media speed (bits/s) reported by both NIC info queries.
    pub media_speed: u64,
}

impl ShimConfig {
    /// Create configuration with default values.
    pub const fn new() -> Self {
        Self {
            vpn_enabled: true,
            attach_rcr_values: DEFAULT_ATTACH_RCR_VALUES,
            mtu: ETH_MTU,
            media_speed: DEFAULT_MEDIA_SPEED,
        }
    }

    pub const fn with_vpn_enabled(mut self, enabled: bool) -> Self {
        self.vpn_enabled = enabled;
        self
    }

    pub const fn with_attach_rcr_values(mut self, values: [u32; 2]) -> Self {
        self.attach_rcr_values = values;
        self
    }

    /// Whether an RCR write value is one of the attach triggers.
    #[inline]
    pub fn is_attach_trigger(&self, rcr: u32) -> bool {
        self.attach_rcr_values.contains(&rcr)
    }
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self::new()
    }
}

//! Ethernet constants and the MAC address type.

use core::fmt;

/// Length of a MAC address in bytes.
pub const ETH_ALEN: usize = 6;
/// Ethernet header length (dst + src + ethertype).
pub const ETH_HLEN: usize = 14;
/// Standard Ethernet MTU.
pub const ETH_MTU: u32 = 1500;
/// Frame check sequence appended by the MAC.
pub const FCS_LEN: usize = 4;

/// 48-bit Ethernet MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct MacAddress(pub [u8; ETH_ALEN]);

impl MacAddress {
    /// All-zero address, used before the hardware has been read.
    pub const ZERO: MacAddress = MacAddress([0; ETH_ALEN]);

    pub const fn new(bytes: [u8; ETH_ALEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Link media reported to the VPN client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Ethernet,
}

//! RTL8169 descriptor model.
//!
//! A descriptor is 16 bytes, little-endian:
//! ```text
//! 0x00  opts1  u32   OWN | EOR | FS | LS | LGSND | ... | len[13:0]
//! 0x04  opts2  u32   VLAN tag (unused here)
//! 0x08  addr   u64   buffer physical address
//! ```
//! The same layout is used for guest rings (read through guest-physical
//! memory) and for the shadow rings the hardware actually walks.

use crate::device::registers::descriptor::{
    CSUM_MASK, EOR, FS, IPCS, LEN_MASK, LGSND, LS, OWN, SIZE, TCPCS, UDPCS,
};

/// One RTL8169 descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Descriptor {
    pub opts1: u32,
    pub opts2: u32,
    pub addr: u64,
}

impl Descriptor {
    pub const fn new(opts1: u32, addr: u64) -> Self {
        Self {
            opts1,
            opts2: 0,
            addr,
        }
    }

    /// Decode from the 16-byte wire layout.
    pub fn from_bytes(bytes: &[u8; SIZE]) -> Self {
        let mut opts1 = [0u8; 4];
        let mut opts2 = [0u8; 4];
        let mut addr = [0u8; 8];
        opts1.copy_from_slice(&bytes[0..4]);
        opts2.copy_from_slice(&bytes[4..8]);
        addr.copy_from_slice(&bytes[8..16]);
        Self {
            opts1: u32::from_le_bytes(opts1),
            opts2: u32::from_le_bytes(opts2),
            addr: u64::from_le_bytes(addr),
        }
    }

    /// Encode to the 16-byte wire layout.
    pub fn to_bytes(&self) -> [u8; SIZE] {
        let mut out = [0u8; SIZE];
        out[0..4].copy_from_slice(&self.opts1.to_le_bytes());
        out[4..8].copy_from_slice(&self.opts2.to_le_bytes());
        out[8..16].copy_from_slice(&self.addr.to_le_bytes());
        out
    }

    /// Owned by the NIC side.
    #[inline]
    pub fn is_own(&self) -> bool {
        self.opts1 & OWN != 0
    }

    #[inline]
    pub fn is_eor(&self) -> bool {
        self.opts1 & EOR != 0
    }

    #[inline]
    pub fn is_first(&self) -> bool {
        self.opts1 & FS != 0
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.opts1 & LS != 0
    }

    #[inline]
    pub fn is_large_send(&self) -> bool {
        self.opts1 & LGSND != 0
    }

    /// Buffer length field.
    #[inline]
    pub fn len(&self) -> usize {
        (self.opts1 & LEN_MASK) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Any checksum offload requested.
    #[inline]
    pub fn wants_checksum(&self) -> bool {
        self.opts1 & CSUM_MASK != 0
    }

    #[inline]
    pub fn wants_ip_checksum(&self) -> bool {
        self.opts1 & IPCS != 0
    }

    #[inline]
    pub fn wants_udp_checksum(&self) -> bool {
        self.opts1 & UDPCS != 0
    }

    #[inline]
    pub fn wants_tcp_checksum(&self) -> bool {
        self.opts1 & TCPCS != 0
    }

    /// Hand the descriptor back to the driver side.
    #[inline]
    pub fn clear_own(&mut self) {
        self.opts1 &= !OWN;
    }
}

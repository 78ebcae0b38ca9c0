//! Hardware register definitions.
//!
//! Register offsets, bit masks, and descriptor constants for the NICs the
//! interception layer understands. Organized by vendor/device family.

/// Realtek RTL8169/8168 register definitions.
///
/// Offsets are relative to the register BAR (I/O or memory).
pub mod realtek {
    // PCI identity
    pub const VENDOR_ID: u16 = 0x10EC;
    pub const DEVICE_ID_8168: u16 = 0x8168;
    pub const DEVICE_ID_8169: u16 = 0x8169;

    // MAC address registers (6 bytes from IDR0)
    pub const IDR0: u64 = 0x00;

    // Descriptor start addresses (64-bit, low dword first)
    pub const TNPDS: u64 = 0x20; // TX Normal Priority Descriptor Start
    pub const THPDS: u64 = 0x28; // TX High Priority Descriptor Start
    pub const RDSAR: u64 = 0xE4; // RX Descriptor Start Address

    // Command register
    pub const CR: u64 = 0x37;
    pub const CR_RE: u8 = 1 << 3; // Receive Enable
    pub const CR_TE: u8 = 1 << 2; // Transmit Enable

    // Transmit priority polling
    pub const TPPOLL: u64 = 0x38;
    pub const TPPOLL_HPQ: u8 = 1 << 7; // High priority queue
    pub const TPPOLL_NPQ: u8 = 1 << 6; // Normal priority queue
    pub const TPPOLL_FSWINT: u8 = 1 << 0; // Forced software interrupt

    // Interrupt registers
    pub const IMR: u64 = 0x3C; // Interrupt Mask Register
    pub const ISR: u64 = 0x3E; // Interrupt Status Register
    pub const ISR_ROK: u16 = 1 << 0; // Receive OK
    pub const ISR_SWINT: u16 = 1 << 8; // Software interrupt

    // Transmit/Receive configuration
    pub const TCR: u64 = 0x40;
    pub const RCR: u64 = 0x44;

    // PCI configuration space: BAR0..BAR5
    pub const PCI_BAR0: usize = 0x10;
    pub const PCI_BAR_END: usize = 0x28;
    pub const PCI_BAR_COUNT: usize = 6;
}

/// RTL8169 descriptor layout.
pub mod descriptor {
    /// Descriptor size in bytes.
    pub const SIZE: usize = 16;
    /// Descriptors per ring.
    pub const RING_SIZE: usize = 256;
    /// Data buffer per descriptor.
    pub const BUFFER_SIZE: usize = 4096;

    // opts1 bits
    pub const OWN: u32 = 1 << 31; // Owned by the NIC side
    pub const EOR: u32 = 1 << 30; // End of ring
    pub const FS: u32 = 1 << 29; // First segment
    pub const LS: u32 = 1 << 28; // Last segment
    pub const LGSND: u32 = 1 << 27; // Large send (TSO)
    pub const IPCS: u32 = 1 << 18; // IP checksum offload
    pub const UDPCS: u32 = 1 << 17; // UDP checksum offload
    pub const TCPCS: u32 = 1 << 16; // TCP checksum offload
    pub const LEN_MASK: u32 = 0x3FFF;

    /// Checksum offload request bits.
    pub const CSUM_MASK: u32 = IPCS | UDPCS | TCPCS;

    /// Length field of an idle shadow descriptor.
    pub const IDLE_LEN: u32 = 0xFFF;
}

//! Hypervisor services consumed by the interception layer.
//!
//! The hypervisor owns trap registration, host mappings of device registers,
//! guest-physical memory access and page allocation. This module only
//! describes the contracts; the device code calls through them and never
//! touches addresses directly.
//!
//! # Routing
//! Every trap is registered with a [`TrapTarget`] (device id + BAR slot).
//! The host keeps it and hands the slot back to
//! [`Rtl8169Vpn::handle_mmio`](crate::Rtl8169Vpn::handle_mmio) on each access.

use alloc::boxed::Box;
use core::fmt;

use dma_pool::{DmaPage, DmaPool};

// ═══════════════════════════════════════════════════════════════════════════
// ACCESS WIDTH
// ═══════════════════════════════════════════════════════════════════════════

/// Width of a trapped register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte = 1,
    Word = 2,
    Dword = 4,
}

impl AccessWidth {
    /// Width for an access of `len` bytes, if the NIC supports it.
    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            1 => Some(AccessWidth::Byte),
            2 => Some(AccessWidth::Word),
            4 => Some(AccessWidth::Dword),
            _ => None,
        }
    }

    #[inline]
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Value mask for this width.
    #[inline]
    pub const fn mask(self) -> u32 {
        match self {
            AccessWidth::Byte => 0xFF,
            AccessWidth::Word => 0xFFFF,
            AccessWidth::Dword => 0xFFFF_FFFF,
        }
    }
}

/// Decode a little-endian trap buffer of 1, 2 or 4 bytes.
pub fn value_from_le(buf: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    let n = buf.len().min(4);
    bytes[..n].copy_from_slice(&buf[..n]);
    u32::from_le_bytes(bytes)
}

/// Encode `value` into a little-endian trap buffer of 1, 2 or 4 bytes.
pub fn value_to_le(value: u32, buf: &mut [u8]) {
    let n = buf.len().min(4);
    buf[..n].copy_from_slice(&value.to_le_bytes()[..n]);
}

// ═══════════════════════════════════════════════════════════════════════════
// TRAP RESULTS AND HANDLES
// ═══════════════════════════════════════════════════════════════════════════

/// What the trap machinery should do after calling us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// The access was fully handled here.
    Handled,
    /// Not ours; the host applies its default behaviour.
    Default,
}

/// Identifies one device context to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

/// Where the host must route accesses to a registered range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrapTarget {
    pub device: DeviceId,
    /// BAR slot (0..6).
    pub slot: usize,
}

/// Host-issued handle for an installed trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrapHandle(pub u64);

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════

/// A physical range could not be mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapError {
    pub addr: u64,
    pub len: u64,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot map {:#x}+{:#x}", self.addr, self.len)
    }
}

/// A trap could not be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapError {
    pub base: u64,
    pub len: u64,
}

impl fmt::Display for TrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trap rejected for {:#x}+{:#x}", self.base, self.len)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONTRACTS
// ═══════════════════════════════════════════════════════════════════════════

/// Uncached host mapping of a device register window.
///
/// Dropping the mapping releases it.
pub trait RegisterMapping: Send {
    /// Mapped length in bytes.
    fn len(&self) -> u64;
    /// Read a register of `width` at `offset`.
    fn read(&self, offset: u64, width: AccessWidth) -> u32;
    /// Write a register of `width` at `offset`.
    fn write(&self, offset: u64, width: AccessWidth, value: u32);
}

/// Trap installation and register mapping.
pub trait TrapHost: Send + Sync {
    /// Map `len` bytes of device registers at host-physical `base`.
    fn map_registers(&self, base: u64, len: u64) -> Result<Box<dyn RegisterMapping>, MapError>;
    /// Route MMIO accesses to `[base, base + len)` to `target`.
    fn register_mmio(&self, base: u64, len: u64, target: TrapTarget)
        -> Result<TrapHandle, TrapError>;
    /// Route port accesses to `[base, base + len)` to `target`.
    fn register_pio(&self, base: u16, len: u16, target: TrapTarget)
        -> Result<TrapHandle, TrapError>;
    fn unregister_mmio(&self, handle: TrapHandle);
    fn unregister_pio(&self, handle: TrapHandle);
}

/// Access to guest-physical memory (descriptor rings and buffers the guest
/// driver owns).
///
/// Each call maps, copies and unmaps; a failure leaves memory untouched.
pub trait PhysMemory: Send + Sync {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MapError>;
    fn write(&self, addr: u64, data: &[u8]) -> Result<(), MapError>;
}

/// Source of zeroed, DMA-capable 4 KiB pages for the shadow rings.
pub trait PageAllocator {
    fn alloc_page(&self) -> Option<DmaPage>;
}

impl PageAllocator for DmaPool {
    fn alloc_page(&self) -> Option<DmaPage> {
        DmaPool::alloc_page(self)
    }
}

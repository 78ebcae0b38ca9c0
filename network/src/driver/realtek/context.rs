//! Per-device state.
//!
//! Everything the interception engine mutates lives in [`DeviceState`],
//! behind the device lock. The VPN client's side of the binding (callbacks,
//! MAC, handle) lives in [`VpnBinding`] behind its own lock so the client can
//! register callbacks while we hold the device lock during attachment.
//!
//! # Lock order
//! device lock → binding lock. Never the reverse.

use alloc::vec::Vec;

use log::warn;
use spin::Mutex;

use super::bar::{RegisterWindow, WindowKind};
use super::ring::{RingKind, ShadowRing};
use super::vpn::{RecvCallback, VpnHandle};
use crate::device::registers::realtek::{PCI_BAR_COUNT, RDSAR, THPDS, TNPDS, TPPOLL, TPPOLL_FSWINT};
use crate::error::ShimError;
use crate::hv::{AccessWidth, DeviceId, PageAllocator, TrapTarget};
use crate::types::MacAddress;

// ═══════════════════════════════════════════════════════════════════════════
// ENABLED PATHS
// ═══════════════════════════════════════════════════════════════════════════

/// Guest programmed a transmit descriptor base.
pub const PATH_TX: u8 = 1 << 0;
/// Guest programmed the receive descriptor base.
pub const PATH_RX: u8 = 1 << 1;

/// Which guest transmit queue a TPPOLL write kicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxQueue {
    Normal,
    High,
}

// ═══════════════════════════════════════════════════════════════════════════
// DESCRIPTOR BASE SHADOWS
// ═══════════════════════════════════════════════════════════════════════════

/// The three 64-bit descriptor base registers we virtualize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseReg {
    Tnpds,
    Thpds,
    Rdsar,
}

impl BaseReg {
    pub const ALL: [BaseReg; 3] = [BaseReg::Tnpds, BaseReg::Thpds, BaseReg::Rdsar];

    #[inline]
    pub const fn offset(self) -> u64 {
        match self {
            BaseReg::Tnpds => TNPDS,
            BaseReg::Thpds => THPDS,
            BaseReg::Rdsar => RDSAR,
        }
    }

    /// Register fully covering `[offset, offset + width)`, with the byte
    /// index inside it. Accesses that straddle a boundary match nothing.
    pub fn locate(offset: u64, width: AccessWidth) -> Option<(BaseReg, usize)> {
        let end = offset + width.bytes() as u64;
        BaseReg::ALL.iter().find_map(|&reg| {
            let start = reg.offset();
            (offset >= start && end <= start + 8).then(|| (reg, (offset - start) as usize))
        })
    }
}

/// Values the guest believes it wrote to the descriptor base registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShadowBases {
    pub tnpds: u64,
    pub thpds: u64,
    pub rdsar: u64,
}

impl ShadowBases {
    pub fn get(&self, reg: BaseReg) -> u64 {
        match reg {
            BaseReg::Tnpds => self.tnpds,
            BaseReg::Thpds => self.thpds,
            BaseReg::Rdsar => self.rdsar,
        }
    }

    fn get_mut(&mut self, reg: BaseReg) -> &mut u64 {
        match reg {
            BaseReg::Tnpds => &mut self.tnpds,
            BaseReg::Thpds => &mut self.thpds,
            BaseReg::Rdsar => &mut self.rdsar,
        }
    }

    /// Merge a `width` write of `value` at byte `byte` of `reg`.
    pub fn store(&mut self, reg: BaseReg, byte: usize, width: AccessWidth, value: u32) {
        let shift = byte * 8;
        let mask = (width.mask() as u64) << shift;
        let slot = self.get_mut(reg);
        *slot = (*slot & !mask) | (((value & width.mask()) as u64) << shift);
    }

    /// Extract a `width` read at byte `byte` of `reg`.
    pub fn load(&self, reg: BaseReg, byte: usize, width: AccessWidth) -> u32 {
        ((self.get(reg) >> (byte * 8)) as u32) & width.mask()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DEVICE STATE
// ═══════════════════════════════════════════════════════════════════════════

/// Lock-protected state of one intercepted NIC.
pub struct DeviceState {
    pub(super) windows: [RegisterWindow; PCI_BAR_COUNT],
    /// Slot of the memory window used for our own register accesses.
    pub(super) active: Option<usize>,
    pub(super) tx_normal: ShadowRing,
    pub(super) tx_high: ShadowRing,
    pub(super) rx: ShadowRing,
    pub(super) shadow: ShadowBases,
    /// Next shadow TX slot for VPN → hardware sends.
    pub(super) send_index: usize,
    /// Next guest RX slot for VPN → guest deliveries.
    pub(super) guest_rx_index: usize,
    /// `PATH_TX` / `PATH_RX`.
    pub(super) enabled: u8,
    pub(super) attached: bool,
    /// Multi-descriptor frame under assembly.
    pub(super) assembly: Vec<u8>,
    pub(super) assembling: bool,
}

impl DeviceState {
    /// Allocate the shadow rings and empty windows for `device`.
    pub fn new(device: DeviceId, pages: &dyn PageAllocator) -> Result<Self, ShimError> {
        Ok(Self {
            windows: core::array::from_fn(|slot| {
                RegisterWindow::new(TrapTarget { device, slot })
            }),
            active: None,
            tx_normal: ShadowRing::allocate(pages, RingKind::Transmit)?,
            tx_high: ShadowRing::allocate(pages, RingKind::Transmit)?,
            rx: ShadowRing::allocate(pages, RingKind::Receive)?,
            shadow: ShadowBases::default(),
            send_index: 0,
            guest_rx_index: 0,
            enabled: 0,
            attached: false,
            assembly: Vec::new(),
            assembling: false,
        })
    }

    #[inline]
    pub fn tx_enabled(&self) -> bool {
        self.enabled & PATH_TX != 0
    }

    #[inline]
    pub fn rx_enabled(&self) -> bool {
        self.enabled & PATH_RX != 0
    }

    /// Record a (re)configured window. Memory windows in slots 1 and 2
    /// become the active register window.
    pub(super) fn note_window(&mut self, slot: usize, kind: WindowKind) {
        if kind == WindowKind::Mmio && (slot == 1 || slot == 2) {
            self.active = Some(slot);
        }
    }

    /// Active register window, if it is still a mapped memory window.
    pub(super) fn active_window(&self) -> Option<&RegisterWindow> {
        let w = &self.windows[self.active?];
        (w.kind() == WindowKind::Mmio).then_some(w)
    }

    pub(super) fn ring_base(&self, reg: BaseReg) -> u64 {
        match reg {
            BaseReg::Tnpds => self.tx_normal.bus_addr(),
            BaseReg::Thpds => self.tx_high.bus_addr(),
            BaseReg::Rdsar => self.rx.bus_addr(),
        }
    }

    /// Raise a software interrupt towards the guest (TPPOLL.FSWINT).
    pub(super) fn signal_guest(&self, window: &RegisterWindow) {
        let tppoll = window.read(TPPOLL, AccessWidth::Byte) as u8;
        window.write(TPPOLL, AccessWidth::Byte, (tppoll | TPPOLL_FSWINT) as u32);
    }

    /// [`signal_guest`](Self::signal_guest) through the window in `slot`.
    pub(super) fn signal_guest_via(&self, slot: usize) {
        self.signal_guest(&self.windows[slot]);
    }

    /// [`signal_guest`](Self::signal_guest) through the active window.
    pub(super) fn signal_guest_active(&self) {
        match self.active_window() {
            Some(w) => self.signal_guest(w),
            None => warn!("no active register window, interrupt not raised"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// VPN BINDING
// ═══════════════════════════════════════════════════════════════════════════

/// VPN client's side of the device.
#[derive(Default)]
pub struct VpnBinding {
    pub mac: MacAddress,
    /// Receives frames the guest transmits.
    pub virtual_recv: Option<RecvCallback>,
    /// Receives frames the hardware received.
    pub physical_recv: Option<RecvCallback>,
    pub handle: Option<VpnHandle>,
}

/// Frames copied out under the device lock, delivered after it is dropped.
#[derive(Default)]
pub struct Outbound {
    pub to_virtual: Vec<Vec<u8>>,
    pub to_physical: Vec<Vec<u8>>,
}

impl Outbound {
    pub fn is_empty(&self) -> bool {
        self.to_virtual.is_empty() && self.to_physical.is_empty()
    }

    /// Hand every frame to its callback, one single-frame batch per call.
    ///
    /// Must be called without the device lock held.
    pub fn deliver(self, binding: &Mutex<VpnBinding>) {
        if self.is_empty() {
            return;
        }
        let (virt, phys) = {
            let b = binding.lock();
            (b.virtual_recv.clone(), b.physical_recv.clone())
        };
        if let Some(cb) = virt {
            for frame in &self.to_virtual {
                cb(&[frame.as_slice()]);
            }
        }
        if let Some(cb) = phys {
            for frame in &self.to_physical {
                cb(&[frame.as_slice()]);
            }
        }
    }
}

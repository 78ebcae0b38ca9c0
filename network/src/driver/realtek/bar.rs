//! BAR trap router.
//!
//! Each of the six BAR slots has a [`RegisterWindow`]. When the guest
//! (re)programs a BAR the window tears down its trap and installs a new one
//! over the decoded range. Memory windows also keep a host mapping of the
//! real registers for pass-through.
//!
//! # Decoding
//! ```text
//! bit 0 set    port I/O   base = bar & !0x3   len = lowest set bit of (mask & !0x3)
//! bit 0 clear  memory     base = bar & !0xF   len = lowest set bit of (mask & !0xF)
//! ```

use alloc::boxed::Box;

use log::{debug, trace};

use crate::device::registers::realtek::IDR0;
use crate::error::ShimError;
use crate::hv::{AccessWidth, RegisterMapping, TrapHandle, TrapHost, TrapTarget};
use crate::types::{MacAddress, ETH_ALEN};

const BAR_SPACE_IO: u32 = 0x1;
const BAR_IO_MASK: u32 = !0x3;
const BAR_MEM_MASK: u32 = !0xF;

/// Result of decoding a BAR value against its size mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarDecode {
    Disabled,
    Port { base: u16, len: u16 },
    Mmio { base: u64, len: u64 },
}

/// Decode `bar` using the size `mask` probed for the slot.
///
/// A zero base or an unimplemented BAR (no size bits) decodes as disabled.
pub fn decode_bar(bar: u32, mask: u32) -> BarDecode {
    if bar & BAR_SPACE_IO != 0 {
        let base = bar & BAR_IO_MASK;
        let size = mask & BAR_IO_MASK;
        if base == 0 || size == 0 {
            return BarDecode::Disabled;
        }
        let len = 1u32 << size.trailing_zeros();
        match (u16::try_from(base), u16::try_from(len)) {
            (Ok(base), Ok(len)) => BarDecode::Port { base, len },
            _ => BarDecode::Disabled,
        }
    } else {
        let base = bar & BAR_MEM_MASK;
        let size = mask & BAR_MEM_MASK;
        if base == 0 || size == 0 {
            return BarDecode::Disabled;
        }
        BarDecode::Mmio {
            base: base as u64,
            len: 1u64 << size.trailing_zeros(),
        }
    }
}

/// Value a config-space BAR write leaves in the slot: the written bits
/// within the size mask, with the type bits forced from the mask.
pub fn bar_write_value(mask: u32, data: u32) -> u32 {
    if mask & BAR_SPACE_IO != 0 {
        mask & (data | 0x3)
    } else {
        mask & (data | 0xF)
    }
}

/// How a window is currently exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Disabled,
    Port,
    Mmio,
}

/// One BAR slot's trapped register range.
pub struct RegisterWindow {
    target: TrapTarget,
    kind: WindowKind,
    base: u64,
    len: u64,
    trap: Option<TrapHandle>,
    mapping: Option<Box<dyn RegisterMapping>>,
    /// Guest wrote RE|TE to CR through this window.
    pub(super) hw_reset_seen: bool,
}

impl RegisterWindow {
    pub fn new(target: TrapTarget) -> Self {
        Self {
            target,
            kind: WindowKind::Disabled,
            base: 0,
            len: 0,
            trap: None,
            mapping: None,
            hw_reset_seen: false,
        }
    }

    #[inline]
    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    /// Tear down the current trap and install one for `bar` / `mask`.
    ///
    /// On error the window is left disabled.
    pub fn reconfigure(
        &mut self,
        traps: &dyn TrapHost,
        bar: u32,
        mask: u32,
    ) -> Result<WindowKind, ShimError> {
        self.disable(traps);
        self.hw_reset_seen = false;

        match decode_bar(bar, mask) {
            BarDecode::Disabled => {
                trace!("BAR{}: disabled ({:#010x})", self.target.slot, bar);
            }
            BarDecode::Port { base, len } => {
                let handle = traps.register_pio(base, len, self.target)?;
                self.kind = WindowKind::Port;
                self.base = base as u64;
                self.len = len as u64;
                self.trap = Some(handle);
                debug!("BAR{}: port {:#06x}+{:#x}", self.target.slot, base, len);
            }
            BarDecode::Mmio { base, len } => {
                let mapping = traps.map_registers(base, len)?;
                let handle = traps.register_mmio(base, len, self.target)?;
                self.kind = WindowKind::Mmio;
                self.base = base;
                self.len = len;
                self.trap = Some(handle);
                self.mapping = Some(mapping);
                debug!("BAR{}: mmio {:#x}+{:#x}", self.target.slot, base, len);
            }
        }
        Ok(self.kind)
    }

    /// Remove the trap and release the mapping. Idempotent.
    pub fn disable(&mut self, traps: &dyn TrapHost) {
        if let Some(handle) = self.trap.take() {
            match self.kind {
                WindowKind::Port => traps.unregister_pio(handle),
                WindowKind::Mmio => traps.unregister_mmio(handle),
                WindowKind::Disabled => {}
            }
        }
        self.mapping = None;
        self.kind = WindowKind::Disabled;
        self.base = 0;
        self.len = 0;
    }

    /// Offset of `addr` in this window if it is a trapped memory window
    /// and `addr` falls inside it.
    pub fn offset_of(&self, addr: u64) -> Option<u64> {
        if self.kind != WindowKind::Mmio {
            return None;
        }
        let offset = addr.checked_sub(self.base)?;
        (offset < self.len).then_some(offset)
    }

    fn mapping(&self) -> &dyn RegisterMapping {
        match self.mapping.as_deref() {
            Some(m) => m,
            None => panic!("BAR{}: register access without a mapping", self.target.slot),
        }
    }

    /// Read a real register.
    ///
    /// # Panics
    /// No mapping, or `offset` beyond the mapped length.
    pub fn read(&self, offset: u64, width: AccessWidth) -> u32 {
        let map = self.mapping();
        if offset >= map.len() {
            panic!("register read at {:#x} beyond mapping ({:#x})", offset, map.len());
        }
        map.read(offset, width)
    }

    /// Write a real register.
    ///
    /// # Panics
    /// No mapping, or `offset` beyond the mapped length.
    pub fn write(&self, offset: u64, width: AccessWidth, value: u32) {
        let map = self.mapping();
        if offset >= map.len() {
            panic!("register write at {:#x} beyond mapping ({:#x})", offset, map.len());
        }
        map.write(offset, width, value);
    }

    /// MAC address from the IDR registers, if this window is mapped.
    pub fn read_mac(&self) -> Option<MacAddress> {
        let map = self.mapping.as_deref()?;
        let mut mac = [0u8; ETH_ALEN];
        for (i, byte) in mac.iter_mut().enumerate() {
            *byte = map.read(IDR0 + i as u64, AccessWidth::Byte) as u8;
        }
        Some(MacAddress::new(mac))
    }
}

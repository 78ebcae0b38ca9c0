//! Register intercept dispatcher.
//!
//! Every trapped MMIO access lands in [`Rtl8169Vpn::handle_mmio`]. Under the
//! device lock it is offered to the emulation hooks first; anything they do
//! not claim goes to the real register through the window's mapping.
//!
//! # Emulated registers
//! | Register         | Read                     | Write                               |
//! |------------------|--------------------------|-------------------------------------|
//! | TNPDS/THPDS      | shadow value             | shadow; HW gets our TX ring         |
//! | RDSAR            | shadow value             | shadow; HW gets our RX ring         |
//! | ISR              | drains HW RX to the VPN  | -                                   |
//! | TPPOLL (byte)    | -                        | drains guest TX ring to the VPN     |
//! | CR               | -                        | tracks reset / stop, passes through |
//! | RCR              | -                        | attaches the VPN client             |

use alloc::sync::Arc;

use log::{info, warn};

use super::context::{BaseReg, DeviceState, Outbound, TxQueue, PATH_RX, PATH_TX};
use super::{Rtl8169Vpn, Shared};
use crate::device::registers::realtek::{
    CR, CR_RE, CR_TE, ISR, ISR_ROK, ISR_SWINT, RCR, TPPOLL, TPPOLL_HPQ, TPPOLL_NPQ,
};
use crate::hv::{value_from_le, value_to_le, AccessWidth, IoOutcome};

impl Rtl8169Vpn {
    /// MMIO trap entry point for the window in BAR `slot`.
    ///
    /// `buf` holds the value for writes and receives it for reads; its
    /// length is the access width.
    ///
    /// Frames collected here reach the VPN callbacks after the device lock
    /// is dropped, so callbacks may call back into the device. Ring order
    /// holds within one access; frames from two VCPUs draining back to back
    /// may interleave at the VPN client.
    ///
    /// # Panics
    /// Access width other than 1, 2 or 4 bytes.
    pub fn handle_mmio(&self, slot: usize, gphys: u64, write: bool, buf: &mut [u8]) -> IoOutcome {
        let width = match AccessWidth::from_len(buf.len()) {
            Some(w) => w,
            None => panic!("{}-byte register access at {:#x}", buf.len(), gphys),
        };

        let mut out = Outbound::default();
        {
            let mut state = self.shared.state.lock();
            let offset = match state.windows.get(slot).and_then(|w| w.offset_of(gphys)) {
                Some(offset) => offset,
                None => return IoOutcome::Default,
            };

            if write {
                let value = value_from_le(buf);
                if !self.shared.hook_write(&mut state, slot, offset, width, value, &mut out) {
                    state.windows[slot].write(offset, width, value);
                }
            } else {
                let value = match self.shared.hook_read(&mut state, slot, offset, width, &mut out) {
                    Some(v) => v,
                    None => state.windows[slot].read(offset, width),
                };
                value_to_le(value & width.mask(), buf);
            }
        }
        out.deliver(&self.shared.binding);
        IoOutcome::Handled
    }

    /// Port I/O trap entry point. Port accesses always go to hardware.
    pub fn handle_pio(&self, _slot: usize, _port: u16, _write: bool, _buf: &mut [u8]) -> IoOutcome {
        IoOutcome::Default
    }
}

impl Shared {
    /// Emulated read. `None` means read the real register.
    fn hook_read(
        &self,
        state: &mut DeviceState,
        slot: usize,
        offset: u64,
        width: AccessWidth,
        out: &mut Outbound,
    ) -> Option<u32> {
        if let Some((reg, byte)) = BaseReg::locate(offset, width) {
            return Some(state.shadow.load(reg, byte, width));
        }
        if offset != ISR || !state.attached {
            return None;
        }

        let isr = state.windows[slot].read(ISR, AccessWidth::Word) as u16;
        if isr & ISR_SWINT != 0 {
            // Our own FSWINT: make the guest look at its RX ring.
            return Some((isr | ISR_ROK) as u32);
        }
        if isr & ISR_ROK != 0 && state.rx_enabled() && self.binding.lock().physical_recv.is_some()
        {
            state.drain_hw_rx(out);
        }
        Some(isr as u32)
    }

    /// Emulated write. `false` means write the real register.
    fn hook_write(
        self: &Arc<Self>,
        state: &mut DeviceState,
        slot: usize,
        offset: u64,
        width: AccessWidth,
        value: u32,
        out: &mut Outbound,
    ) -> bool {
        match offset {
            TPPOLL if width == AccessWidth::Byte => {
                let poll = value as u8;
                let queue = if poll & TPPOLL_HPQ != 0 {
                    TxQueue::High
                } else if poll & TPPOLL_NPQ != 0 {
                    TxQueue::Normal
                } else {
                    return false;
                };
                if !state.attached
                    || !state.tx_enabled()
                    || self.binding.lock().virtual_recv.is_none()
                {
                    return false;
                }
                state.drain_guest_tx(&*self.platform.memory, queue, slot, out);
                true
            }
            CR => {
                let cmd = value as u8;
                if cmd == CR_RE | CR_TE {
                    state.windows[slot].hw_reset_seen = true;
                } else if cmd == 0 {
                    if state.enabled != 0 {
                        info!("guest stopped the NIC, bridging paused");
                    }
                    state.enabled = 0;
                }
                false
            }
            RCR => {
                if state.attached
                    || !self.config.is_attach_trigger(value)
                    || !state.windows[slot].hw_reset_seen
                {
                    return false;
                }
                state.windows[slot].write(RCR, width, value);
                if let Err(e) = self.attach(state, slot) {
                    warn!("VPN attach failed: {}", e);
                }
                true
            }
            _ => match BaseReg::locate(offset, width) {
                Some((reg, byte)) => {
                    self.program_base(state, slot, reg, byte, width, value);
                    true
                }
                None => false,
            },
        }
    }

    /// Shadow a descriptor base write and point the hardware at our ring.
    fn program_base(
        &self,
        state: &mut DeviceState,
        slot: usize,
        reg: BaseReg,
        byte: usize,
        width: AccessWidth,
        value: u32,
    ) {
        state.shadow.store(reg, byte, width, value);

        let ring = state.ring_base(reg);
        let window = &state.windows[slot];
        window.write(reg.offset(), AccessWidth::Dword, ring as u32);
        window.write(reg.offset() + 4, AccessWidth::Dword, (ring >> 32) as u32);

        match reg {
            BaseReg::Tnpds => {
                state.send_index = 0;
                state.enabled |= PATH_TX;
            }
            BaseReg::Thpds => state.enabled |= PATH_TX,
            BaseReg::Rdsar => {
                state.guest_rx_index = 0;
                state.enabled |= PATH_RX;
            }
        }
        info!(
            "{:?}: guest ring {:#x}, hardware ring {:#x}",
            reg,
            state.shadow.get(reg),
            ring
        );
    }
}

//! Transmit paths.
//!
//! - Guest → VPN: on a TPPOLL kick, walk the guest's own TX ring through
//!   guest-physical memory and hand each frame to the VPN client instead of
//!   letting the hardware see it.
//! - VPN → wire: place frames in the shadow normal-priority ring the
//!   hardware really walks, then kick the hardware.

use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use log::{trace, warn};

use super::checksum;
use super::context::{DeviceState, Outbound, TxQueue};
use super::desc::Descriptor;
use crate::device::registers::descriptor::{BUFFER_SIZE, EOR, FS, LS, OWN, RING_SIZE, SIZE};
use crate::device::registers::realtek::{TPPOLL, TPPOLL_NPQ};
use crate::hv::{AccessWidth, PhysMemory};

impl DeviceState {
    // ═══════════════════════════════════════════════════════════════════════
    // GUEST RING → VPN
    // ═══════════════════════════════════════════════════════════════════════

    /// Drain the guest ring selected by `queue` into `out.to_virtual`.
    ///
    /// `slot` is the window the kick came through; completion is signalled
    /// on it.
    ///
    /// # Panics
    /// The guest asked for large send offload.
    pub(super) fn drain_guest_tx(
        &mut self,
        memory: &dyn PhysMemory,
        queue: TxQueue,
        slot: usize,
        out: &mut Outbound,
    ) {
        let base = match queue {
            TxQueue::Normal => self.shadow.tnpds,
            TxQueue::High => self.shadow.thpds,
        };

        let mut processed = 0usize;
        for i in 0..RING_SIZE {
            let desc_addr = base.wrapping_add((i * SIZE) as u64);
            let mut raw = [0u8; SIZE];
            if let Err(e) = memory.read(desc_addr, &mut raw) {
                warn!("{:?} TX ring: descriptor {} unreadable: {}", queue, i, e);
                break;
            }
            let mut desc = Descriptor::from_bytes(&raw);

            if desc.is_own() && !desc.is_empty() {
                if desc.is_large_send() {
                    panic!(
                        "{:?} TX ring: large send requested (opts1={:#010x}, slot {})",
                        queue, desc.opts1, i
                    );
                }
                let mut data = vec![0u8; desc.len()];
                if let Err(e) = memory.read(desc.addr, &mut data) {
                    warn!("{:?} TX ring: buffer {} unreadable: {}", queue, i, e);
                    break;
                }
                self.collect_segment(&desc, data, out);

                desc.clear_own();
                if let Err(e) = memory.write(desc_addr, &desc.opts1.to_le_bytes()) {
                    warn!("{:?} TX ring: descriptor {} not written back: {}", queue, i, e);
                    break;
                }
                processed += 1;
            }

            if desc.is_eor() {
                break;
            }
        }

        if processed > 0 {
            trace!("{:?} TX ring: {} descriptors consumed", queue, processed);
            self.signal_guest_via(slot);
        }
    }

    /// Feed one guest TX segment into frame assembly.
    fn collect_segment(&mut self, desc: &Descriptor, data: Vec<u8>, out: &mut Outbound) {
        if !desc.wants_checksum() && desc.is_first() && desc.is_last() {
            self.assembly.clear();
            self.assembling = false;
            out.to_virtual.push(data);
            return;
        }

        if desc.is_first() {
            self.assembly.clear();
            self.assembly.extend_from_slice(&data);
            self.assembling = true;
        } else if self.assembling {
            self.assembly.extend_from_slice(&data);
        } else {
            trace!("TX: continuation segment without a first segment dropped");
            return;
        }

        if desc.is_last() {
            let mut frame = mem::take(&mut self.assembly);
            self.assembling = false;
            checksum::apply_offloads(&mut frame, desc);
            out.to_virtual.push(frame);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // VPN → SHADOW RING
    // ═══════════════════════════════════════════════════════════════════════

    /// Place `packets` in the shadow normal-priority ring.
    ///
    /// Frames of [`BUFFER_SIZE`] bytes or more are skipped. If a whole lap of
    /// the ring is busy the remaining frames are dropped. Returns the number
    /// of frames queued.
    pub(super) fn send_physical(&mut self, packets: &[&[u8]]) -> usize {
        let mut i = self.send_index;
        let mut queued = 0;
        let mut busy = 0;
        let mut pending = packets.iter().peekable();

        while let Some(packet) = pending.peek() {
            let desc = self.tx_normal.read(i);
            if !desc.is_own() {
                busy = 0;
                let packet: &[u8] = **packet;
                pending.next();
                if packet.len() >= BUFFER_SIZE {
                    warn!("physical send: {}-byte frame dropped", packet.len());
                    continue;
                }
                self.tx_normal.copy_in(i, packet);
                self.tx_normal
                    .set_opts1(i, (desc.opts1 & EOR) | packet.len() as u32 | FS | LS | OWN);
                queued += 1;
            } else {
                busy += 1;
            }
            i = if desc.is_eor() { 0 } else { (i + 1) % RING_SIZE };
            if busy >= RING_SIZE {
                warn!("physical send: ring full, {} frames dropped", pending.len());
                break;
            }
        }

        self.send_index = i;
        queued
    }

    /// Tell the hardware to walk the normal-priority ring.
    pub(super) fn kick_normal_queue(&self) {
        match self.active_window() {
            Some(w) => w.write(TPPOLL, AccessWidth::Byte, TPPOLL_NPQ as u32),
            None => warn!("no active register window, TX kick skipped"),
        }
    }
}

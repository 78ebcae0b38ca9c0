//! Receive paths.
//!
//! - VPN → guest: frames the VPN client produces are written straight into
//!   the guest's RX ring, as if the NIC had received them.
//! - Wire → VPN: frames the hardware placed in the shadow RX ring are handed
//!   to the VPN client, then the descriptors are returned to the hardware.

use log::{trace, warn};

use super::context::{DeviceState, Outbound};
use super::desc::Descriptor;
use crate::device::registers::descriptor::{EOR, FS, IDLE_LEN, LEN_MASK, LS, OWN, RING_SIZE, SIZE};
use crate::hv::PhysMemory;
use crate::types::FCS_LEN;

impl DeviceState {
    // ═══════════════════════════════════════════════════════════════════════
    // VPN → GUEST RING
    // ═══════════════════════════════════════════════════════════════════════

    /// Write `packets` into the guest RX ring. Returns how many landed.
    pub(super) fn deliver_to_guest(&mut self, memory: &dyn PhysMemory, packets: &[&[u8]]) -> usize {
        packets
            .iter()
            .filter(|p| self.deliver_one(memory, p))
            .count()
    }

    /// Place one frame in the next NIC-owned slot of the guest ring.
    fn deliver_one(&mut self, memory: &dyn PhysMemory, packet: &[u8]) -> bool {
        let len = packet.len() + FCS_LEN;
        if len > LEN_MASK as usize {
            warn!("guest RX: {}-byte frame dropped", packet.len());
            return false;
        }

        let base = self.shadow.rdsar;
        let mut cursor = self.guest_rx_index;
        let mut placed = false;

        for _ in 0..RING_SIZE {
            let desc_addr = base.wrapping_add((cursor * SIZE) as u64);
            let mut raw = [0u8; SIZE];
            if memory.read(desc_addr, &mut raw).is_err() {
                if cursor != 0 {
                    cursor = 0;
                    continue;
                }
                warn!("guest RX: ring at {:#x} unreadable", base);
                break;
            }
            let desc = Descriptor::from_bytes(&raw);
            let next = if desc.is_eor() { 0 } else { cursor + 1 };

            if !desc.is_own() {
                cursor = next;
                continue;
            }
            // The length field of a free descriptor is the guest's buffer size.
            if packet.len() > desc.len() {
                warn!(
                    "guest RX: {}-byte frame exceeds {}-byte buffer in slot {}, dropped",
                    packet.len(),
                    desc.len(),
                    cursor
                );
                self.guest_rx_index = cursor;
                return false;
            }
            cursor = next;
            if memory.write(desc.addr, packet).is_err() {
                continue;
            }
            let opts1 = (desc.opts1 & EOR) | len as u32 | FS | LS;
            if memory.write(desc_addr, &opts1.to_le_bytes()).is_ok() {
                placed = true;
                break;
            }
        }

        self.guest_rx_index = cursor;
        if !placed {
            trace!("guest RX: no free descriptor, frame dropped");
        }
        placed
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SHADOW RING → VPN
    // ═══════════════════════════════════════════════════════════════════════

    /// Collect hardware-filled RX descriptors into `out.to_physical` and
    /// re-arm them.
    pub(super) fn drain_hw_rx(&mut self, out: &mut Outbound) {
        let mut in_frame = false;
        for i in 0..self.rx.len() {
            let desc = self.rx.read(i);
            if !desc.is_own() {
                let take = match (desc.is_first(), desc.is_last()) {
                    (true, true) => true,
                    (true, false) => {
                        in_frame = true;
                        true
                    }
                    (false, true) => {
                        in_frame = false;
                        true
                    }
                    (false, false) => in_frame,
                };
                if take {
                    if let Some(len) = desc.len().checked_sub(FCS_LEN) {
                        out.to_physical.push(self.rx.copy_out(i, len));
                        self.rx.set_opts1(i, (desc.opts1 & EOR) | OWN | IDLE_LEN);
                    }
                }
            }
            if desc.is_eor() {
                break;
            }
        }
        if !out.to_physical.is_empty() {
            trace!("hardware RX: {} frames to VPN", out.to_physical.len());
        }
    }
}

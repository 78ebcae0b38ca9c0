//! Realtek RTL8169/8168 interception engine.
//!
//! One [`Rtl8169Vpn`] per physical NIC. The guest keeps driving the chip;
//! we trap its register accesses and swap the descriptor rings underneath
//! it so frames flow through a VPN client.
//!
//! # Data paths
//! ```text
//!   guest TX ring ──TPPOLL──▶ VPN (virtual recv)      [tx.rs]
//!   VPN send_physical_nic ──▶ shadow TX ring ──▶ wire  [tx.rs]
//!   wire ──▶ shadow RX ring ──ISR read──▶ VPN (physical recv)  [rx.rs]
//!   VPN send_virtual_nic ──▶ guest RX ring            [rx.rs]
//! ```
//!
//! # Reference
//! RTL8169S/RTL8110S datasheet, sections 6 (registers) and 7 (descriptors).

pub mod bar;
pub mod checksum;
pub mod context;
pub mod desc;
pub mod dispatch;
pub mod pci;
pub mod ring;
pub mod rx;
pub mod tx;
pub mod vpn;

use alloc::sync::Arc;

use log::{info, warn};
use spin::Mutex;

use crate::config::ShimConfig;
use crate::device::registers::realtek::PCI_BAR_COUNT;
use crate::error::ShimError;
use crate::hv::{DeviceId, PageAllocator, PhysMemory, TrapHost};
use context::{DeviceState, VpnBinding};

pub use pci::is_supported_device;
pub use vpn::{NicFunctions, NicInfo, RecvCallback, VpnClient, VpnHandle};

/// Services the host provides to a device.
#[derive(Clone)]
pub struct Platform {
    pub traps: Arc<dyn TrapHost>,
    pub memory: Arc<dyn PhysMemory>,
    pub vpn: Arc<dyn VpnClient>,
}

/// Current value and probed size mask of one BAR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarConfig {
    pub value: u32,
    pub mask: u32,
}

impl BarConfig {
    pub const fn new(value: u32, mask: u32) -> Self {
        Self { value, mask }
    }
}

/// State shared with the VPN client through [`NicFunctions`].
pub(crate) struct Shared {
    config: ShimConfig,
    platform: Platform,
    bar_masks: [u32; PCI_BAR_COUNT],
    state: Mutex<DeviceState>,
    binding: Mutex<VpnBinding>,
}

impl Shared {
    /// Re-route window `slot` for BAR value `value`.
    fn reconfigure_slot(
        &self,
        state: &mut DeviceState,
        slot: usize,
        value: u32,
    ) -> Result<(), ShimError> {
        let kind =
            state.windows[slot].reconfigure(&*self.platform.traps, value, self.bar_masks[slot])?;
        state.note_window(slot, kind);
        Ok(())
    }
}

/// An intercepted RTL8169/8168.
pub struct Rtl8169Vpn {
    shared: Arc<Shared>,
}

impl Rtl8169Vpn {
    /// Build the device: shadow rings from `pages`, one trap per BAR.
    pub fn new(
        device: DeviceId,
        config: ShimConfig,
        platform: Platform,
        pages: &dyn PageAllocator,
        bars: [BarConfig; PCI_BAR_COUNT],
    ) -> Result<Self, ShimError> {
        let state = DeviceState::new(device, pages)?;
        let shared = Arc::new(Shared {
            config,
            platform,
            bar_masks: bars.map(|b| b.mask),
            state: Mutex::new(state),
            binding: Mutex::new(VpnBinding::default()),
        });

        {
            let mut state = shared.state.lock();
            for (slot, bar) in bars.iter().enumerate() {
                if let Err(e) = shared.reconfigure_slot(&mut state, slot, bar.value) {
                    warn!("BAR{}: {}", slot, e);
                    for window in state.windows.iter_mut() {
                        window.disable(&*shared.platform.traps);
                    }
                    return Err(e);
                }
            }
            info!(
                "RTL8169 {:?}: shadow rings TX {:#x} / {:#x}, RX {:#x}",
                device,
                state.tx_normal.bus_addr(),
                state.tx_high.bus_addr(),
                state.rx.bus_addr()
            );
        }

        Ok(Self { shared })
    }

    /// Whether the VPN client has accepted this NIC.
    pub fn is_attached(&self) -> bool {
        self.shared.state.lock().attached
    }

    /// Release every trap and mapping.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        for window in state.windows.iter_mut() {
            window.disable(&*self.shared.platform.traps);
        }
        state.enabled = 0;
    }
}

#[cfg(test)]
impl Rtl8169Vpn {
    /// Bus address of the shadow ring behind descriptor base register `reg`.
    pub(crate) fn shadow_ring_base(&self, reg: u64) -> u64 {
        let state = self.shared.state.lock();
        let reg = context::BaseReg::ALL
            .into_iter()
            .find(|r| r.offset() == reg)
            .unwrap();
        state.ring_base(reg)
    }

    pub(crate) fn shadow_tx(&self, i: usize) -> desc::Descriptor {
        self.shared.state.lock().tx_normal.read(i)
    }

    pub(crate) fn shadow_rx(&self, i: usize) -> desc::Descriptor {
        self.shared.state.lock().rx.read(i)
    }

    /// Act as the hardware: receive `frame` (plus CRC) into shadow RX slot `i`.
    pub(crate) fn hw_receive(&self, i: usize, frame: &[u8]) {
        use crate::device::registers::descriptor::{EOR, FS, LS};
        let mut state = self.shared.state.lock();
        let mut data = frame.to_vec();
        data.extend_from_slice(&[0xC5; 4]);
        state.rx.copy_in(i, &data);
        let eor = state.rx.read(i).opts1 & EOR;
        state.rx.set_opts1(i, eor | FS | LS | data.len() as u32);
    }

    /// Act as the hardware: finish transmitting shadow TX slot `i`.
    pub(crate) fn hw_complete_tx(&self, i: usize) {
        let mut state = self.shared.state.lock();
        let mut d = state.tx_normal.read(i);
        d.clear_own();
        state.tx_normal.set_opts1(i, d.opts1);
    }
}

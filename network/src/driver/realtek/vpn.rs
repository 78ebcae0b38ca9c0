//! VPN client attachment and the NIC capability handed to it.
//!
//! Once the guest driver has reset the chip and written a recognised RCR
//! value, the device registers itself with the VPN client. From then on the
//! client sees two NICs on the same hardware:
//!
//! | Side     | Client sends with       | Client receives via              |
//! |----------|-------------------------|----------------------------------|
//! | virtual  | `send_virtual_nic`      | virtual recv callback (guest TX) |
//! | physical | `send_physical_nic`     | physical recv callback (wire RX) |
//!
//! Nothing is bridged until `new_nic` has returned a handle; a refused
//! registration leaves the device in pass-through.
//!
//! Callbacks never run under the device lock. Registration and info calls
//! only take the binding lock, so the client may make them from inside
//! [`VpnClient::new_nic`].

use alloc::sync::Arc;

use log::{debug, info};

use super::context::DeviceState;
use super::Shared;
use crate::error::AttachError;
use crate::types::{MacAddress, MediaType};

/// Callback receiving a batch of frames.
pub type RecvCallback = Arc<dyn Fn(&[&[u8]]) + Send + Sync>;

/// Opaque handle the VPN client returns for a registered NIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpnHandle(pub u64);

/// Link properties reported to the VPN client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NicInfo {
    pub media_type: MediaType,
    pub mtu: u32,
    /// Bits per second.
    pub media_speed: u64,
    pub mac: MacAddress,
}

/// Operations the VPN client can invoke on an attached NIC.
pub trait NicFunctions: Send + Sync {
    fn physical_nic_info(&self) -> NicInfo;
    /// Queue frames for the wire.
    fn send_physical_nic(&self, packets: &[&[u8]]);
    fn set_physical_nic_recv_callback(&self, callback: RecvCallback);
    fn virtual_nic_info(&self) -> NicInfo;
    /// Deliver frames into the guest's receive ring.
    fn send_virtual_nic(&self, packets: &[&[u8]]);
    fn set_virtual_nic_recv_callback(&self, callback: RecvCallback);
}

/// The VPN client, as seen by the device.
pub trait VpnClient: Send + Sync {
    /// Register a NIC. `None` means the client refused it.
    fn new_nic(&self, nic: Arc<dyn NicFunctions>) -> Option<VpnHandle>;
}

impl Shared {
    /// Attach to the VPN client using the MAC behind window `slot`.
    ///
    /// Idempotent; failure leaves the device in pass-through and is retried
    /// on the next trigger.
    pub(super) fn attach(
        self: &Arc<Self>,
        state: &mut DeviceState,
        slot: usize,
    ) -> Result<(), AttachError> {
        if state.attached {
            return Ok(());
        }
        let mac = state.windows[slot]
            .read_mac()
            .ok_or(AttachError::MacUnavailable)?;
        self.binding.lock().mac = mac;

        let nic: Arc<dyn NicFunctions> = self.clone();
        let handle = match self.platform.vpn.new_nic(nic) {
            Some(handle) => handle,
            None => {
                // Callbacks registered during a refused new_nic are not ours.
                let mut binding = self.binding.lock();
                binding.virtual_recv = None;
                binding.physical_recv = None;
                return Err(AttachError::RegistrationFailed);
            }
        };

        self.binding.lock().handle = Some(handle);
        state.attached = true;
        info!("VPN client attached (MAC {}, handle {:?})", mac, handle);
        Ok(())
    }

    fn nic_info(&self) -> NicInfo {
        NicInfo {
            media_type: MediaType::Ethernet,
            mtu: self.config.mtu,
            media_speed: self.config.media_speed,
            mac: self.binding.lock().mac,
        }
    }
}

impl NicFunctions for Shared {
    fn physical_nic_info(&self) -> NicInfo {
        self.nic_info()
    }

    fn send_physical_nic(&self, packets: &[&[u8]]) {
        let mut state = self.state.lock();
        if !state.attached || !state.tx_enabled() {
            return;
        }
        let sent = state.send_physical(packets);
        debug!("physical send: {}/{} frames queued", sent, packets.len());
        state.kick_normal_queue();
    }

    fn set_physical_nic_recv_callback(&self, callback: RecvCallback) {
        self.binding.lock().physical_recv = Some(callback);
    }

    fn virtual_nic_info(&self) -> NicInfo {
        self.nic_info()
    }

    fn send_virtual_nic(&self, packets: &[&[u8]]) {
        let mut state = self.state.lock();
        if !state.attached || !state.rx_enabled() {
            return;
        }
        let delivered = state.deliver_to_guest(&*self.platform.memory, packets);
        if delivered >= 1 {
            state.signal_guest_active();
        }
    }

    fn set_virtual_nic_recv_callback(&self, callback: RecvCallback) {
        self.binding.lock().virtual_recv = Some(callback);
    }
}

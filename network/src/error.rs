//! Error types for the interception layer.
//!
//! Only recoverable conditions show up here. Conditions that mean the guest
//! broke the hardware contract, or the host could not give us address
//! visibility, panic at the point of detection.

use core::fmt;

use crate::hv::{MapError, TrapError};

/// Errors while building a device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimError {
    /// Page allocator ran dry while building the shadow rings.
    OutOfDmaPages,
    /// A host mapping could not be established.
    Map(MapError),
    /// A trap could not be installed.
    Trap(TrapError),
}

impl From<MapError> for ShimError {
    fn from(e: MapError) -> Self {
        ShimError::Map(e)
    }
}

impl From<TrapError> for ShimError {
    fn from(e: TrapError) -> Self {
        ShimError::Trap(e)
    }
}

impl fmt::Display for ShimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShimError::OutOfDmaPages => write!(f, "out of DMA pages for shadow rings"),
            ShimError::Map(e) => write!(f, "mapping failed: {}", e),
            ShimError::Trap(e) => write!(f, "trap installation failed: {}", e),
        }
    }
}

/// Reasons VPN attachment did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// No mapped register window to read the MAC address from.
    MacUnavailable,
    /// The VPN client refused the NIC.
    RegistrationFailed,
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::MacUnavailable => write!(f, "MAC address registers not mapped"),
            AttachError::RegistrationFailed => write!(f, "VPN client rejected the NIC"),
        }
    }
}

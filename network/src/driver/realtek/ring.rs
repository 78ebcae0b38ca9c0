//! Shadow descriptor rings.
//!
//! Host-owned rings the physical NIC is pointed at in place of the guest's
//! rings. One page holds the 256 descriptors; each descriptor gets its own
//! 4 KiB buffer page.
//!
//! # Initial state
//! ```text
//! TX ring:  opts1 = 0xFFF               (software owned, idle)
//! RX ring:  opts1 = OWN | 0xFFF         (handed to hardware)
//! last:     | EOR
//! addr:     bus address of the slot's buffer page
//! ```

use alloc::vec::Vec;
use core::ptr;

use dma_pool::DmaPage;

use super::desc::Descriptor;
use crate::device::registers::descriptor::{BUFFER_SIZE, EOR, IDLE_LEN, OWN, RING_SIZE, SIZE};
use crate::error::ShimError;
use crate::hv::PageAllocator;

/// Which direction a shadow ring serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingKind {
    Transmit,
    Receive,
}

/// Host-allocated descriptor ring plus buffers.
pub struct ShadowRing {
    desc: DmaPage,
    buffers: Vec<DmaPage>,
}

impl ShadowRing {
    /// Allocate and initialise a ring of [`RING_SIZE`] descriptors.
    pub fn allocate(pages: &dyn PageAllocator, kind: RingKind) -> Result<Self, ShimError> {
        let desc = pages.alloc_page().ok_or(ShimError::OutOfDmaPages)?;
        let mut buffers = Vec::with_capacity(RING_SIZE);
        for _ in 0..RING_SIZE {
            buffers.push(pages.alloc_page().ok_or(ShimError::OutOfDmaPages)?);
        }

        let mut ring = Self { desc, buffers };
        let idle = match kind {
            RingKind::Transmit => IDLE_LEN,
            RingKind::Receive => OWN | IDLE_LEN,
        };
        for i in 0..RING_SIZE {
            let mut opts1 = idle;
            if i == RING_SIZE - 1 {
                opts1 |= EOR;
            }
            let addr = ring.buffers[i].bus_addr();
            ring.write(i, &Descriptor::new(opts1, addr));
        }
        Ok(ring)
    }

    /// Bus address of descriptor 0 (what goes into the hardware register).
    #[inline]
    pub fn bus_addr(&self) -> u64 {
        self.desc.bus_addr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        RING_SIZE
    }

    #[inline]
    fn desc_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < RING_SIZE);
        // SAFETY: the descriptor page holds exactly RING_SIZE * SIZE bytes.
        unsafe { self.desc.cpu_ptr().add(index * SIZE) }
    }

    /// Read descriptor `index`. The hardware may update it at any time.
    pub fn read(&self, index: usize) -> Descriptor {
        // SAFETY: in-bounds, page-backed, 16-byte aligned.
        let bytes = unsafe { ptr::read_volatile(self.desc_ptr(index) as *const [u8; SIZE]) };
        Descriptor::from_bytes(&bytes)
    }

    /// Write all of descriptor `index`, opts1 last.
    pub fn write(&mut self, index: usize, desc: &Descriptor) {
        let p = self.desc_ptr(index);
        // SAFETY: in-bounds, page-backed, naturally aligned fields.
        unsafe {
            ptr::write_volatile(p.add(8) as *mut u64, desc.addr.to_le());
            ptr::write_volatile(p.add(4) as *mut u32, desc.opts2.to_le());
            ptr::write_volatile(p as *mut u32, desc.opts1.to_le());
        }
    }

    /// Rewrite only opts1 of descriptor `index`.
    pub fn set_opts1(&mut self, index: usize, opts1: u32) {
        // SAFETY: as in `write`.
        unsafe { ptr::write_volatile(self.desc_ptr(index) as *mut u32, opts1.to_le()) };
    }

    /// Copy the first `len` bytes of slot `index`'s buffer.
    pub fn copy_out(&self, index: usize, len: usize) -> Vec<u8> {
        let len = len.min(BUFFER_SIZE);
        let mut out = Vec::with_capacity(len);
        // SAFETY: buffer pages are BUFFER_SIZE bytes and owned by this ring.
        unsafe {
            ptr::copy_nonoverlapping(self.buffers[index].cpu_ptr(), out.as_mut_ptr(), len);
            out.set_len(len);
        }
        out
    }

    /// Copy `data` into slot `index`'s buffer. Returns false if it does not fit.
    pub fn copy_in(&mut self, index: usize, data: &[u8]) -> bool {
        if data.len() > BUFFER_SIZE {
            return false;
        }
        // SAFETY: bounds checked above.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.buffers[index].cpu_ptr(), data.len());
        }
        true
    }
}

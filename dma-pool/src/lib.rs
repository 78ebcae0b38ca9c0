//! Static DMA page pool.
//!
//! Carves 4 KiB pages out of a caller-provided, physically contiguous
//! region. Pages are never returned: shadow descriptor rings live as long as
//! the device they belong to.
//!
//! # Layout
//! ```text
//! cpu_base / bus_base
//! ├── page 0
//! ├── page 1
//! │   ...
//! └── page N-1   (N = size / PAGE_SIZE)
//! ```

#![cfg_attr(not(test), no_std)]

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Size of one pool page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// One page handed out by the pool.
///
/// Holds both the CPU-accessible pointer and the device-visible bus address.
#[derive(Debug)]
pub struct DmaPage {
    cpu: NonNull<u8>,
    bus: u64,
}

impl DmaPage {
    /// CPU pointer to the start of the page.
    #[inline]
    pub fn cpu_ptr(&self) -> *mut u8 {
        self.cpu.as_ptr()
    }

    /// Device-visible bus address of the page.
    #[inline]
    pub fn bus_addr(&self) -> u64 {
        self.bus
    }
}

// Safety: a page is handed out exactly once, so the holder has exclusive
// CPU-side access to it.
unsafe impl Send for DmaPage {}

/// Bump allocator over a DMA region.
pub struct DmaPool {
    cpu_base: *mut u8,
    bus_base: u64,
    pages: usize,
    next: AtomicUsize,
}

impl DmaPool {
    /// Create a pool over `size` bytes at `cpu_base` / `bus_base`.
    ///
    /// Any tail smaller than a page is ignored.
    ///
    /// # Safety
    /// - `cpu_base` must point to `size` bytes of DMA-capable memory that
    ///   stays valid for the life of every page handed out
    /// - `bus_base` must be the device-visible address of `cpu_base`
    /// - both must be page-aligned
    pub const unsafe fn new(cpu_base: *mut u8, bus_base: u64, size: usize) -> Self {
        Self {
            cpu_base,
            bus_base,
            pages: size / PAGE_SIZE,
            next: AtomicUsize::new(0),
        }
    }

    /// Total pages in the pool.
    pub fn capacity(&self) -> usize {
        self.pages
    }

    /// Pages not yet handed out.
    pub fn remaining(&self) -> usize {
        self.pages - self.next.load(Ordering::Acquire).min(self.pages)
    }

    /// Allocate one zeroed page.
    pub fn alloc_page(&self) -> Option<DmaPage> {
        self.alloc_pages(1)
    }

    /// Allocate `count` physically contiguous zeroed pages.
    ///
    /// Returns the first page; the rest follow it directly.
    pub fn alloc_pages(&self, count: usize) -> Option<DmaPage> {
        if count == 0 {
            return None;
        }

        let mut start = self.next.load(Ordering::Acquire);
        loop {
            let end = start.checked_add(count)?;
            if end > self.pages {
                return None;
            }
            match self
                .next
                .compare_exchange_weak(start, end, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(observed) => start = observed,
            }
        }

        let offset = start * PAGE_SIZE;
        // Safety: [offset, offset + count * PAGE_SIZE) lies inside the region
        // and was claimed by the CAS above.
        let cpu = unsafe {
            let ptr = self.cpu_base.add(offset);
            core::ptr::write_bytes(ptr, 0, count * PAGE_SIZE);
            NonNull::new(ptr)?
        };

        Some(DmaPage {
            cpu,
            bus: self.bus_base + offset as u64,
        })
    }
}

// Safety: allocation is a lock-free CAS on `next`, and distinct callers never
// receive overlapping pages.
unsafe impl Send for DmaPool {}
unsafe impl Sync for DmaPool {}

//! Heap for hosts without one.
//!
//! The shim allocates (shadow ring bookkeeping, assembly buffer, frame
//! copies handed to the VPN client). Hypervisors that have no allocator of
//! their own enable the `hypervisor_heap` feature and hand over a memory
//! region once at boot via [`init_heap`].

use core::sync::atomic::{AtomicBool, Ordering};

use linked_list_allocator::LockedHeap;

#[cfg_attr(all(feature = "hypervisor_heap", not(test)), global_allocator)]
static HEAP: LockedHeap = LockedHeap::empty();

static HEAP_INITIALISED: AtomicBool = AtomicBool::new(false);

/// Hand `region` to the heap. Only the first call has an effect.
///
/// Returns false if the heap was already initialised.
pub fn init_heap(region: &'static mut [u8]) -> bool {
    if HEAP_INITIALISED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return false;
    }
    // SAFETY: `region` is 'static and exclusively ours from here on.
    unsafe { HEAP.lock().init(region.as_mut_ptr(), region.len()) };
    log::debug!("heap: {} bytes at {:p}", region.len(), region.as_ptr());
    true
}

/// Bytes in use and bytes free.
pub fn heap_usage() -> (usize, usize) {
    let heap = HEAP.lock();
    (heap.used(), heap.free())
}

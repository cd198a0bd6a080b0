//! Global Allocator for zloader
//!
//! Backs the `alloc` crate with EFI pool memory so decompressed images and
//! file chunks can be released individually.
//!
//! # Memory Management
//!
//! - Allocations are `LoaderData` pool memory
//! - Pool memory is 8-byte aligned; stricter alignment over-allocates and
//!   stores the pool pointer just below the aligned block
//! - Allocation fails (returns null) before [`init`]

use core::alloc::{GlobalAlloc, Layout};
use core::ffi::c_void;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicPtr, Ordering};

use r_efi::efi::{self, BootServices};

/// Alignment guaranteed by AllocatePool
const POOL_ALIGN: usize = 8;

struct PoolAllocator {
    boot_services: AtomicPtr<BootServices>,
}

impl PoolAllocator {
    unsafe fn allocate_pool(&self, size: usize) -> *mut u8 {
        let bs = self.boot_services.load(Ordering::Acquire);
        if bs.is_null() {
            return null_mut();
        }

        let mut buffer: *mut c_void = null_mut();
        let status = ((*bs).allocate_pool)(efi::LOADER_DATA, size, &mut buffer);
        if status.is_error() {
            return null_mut();
        }
        buffer as *mut u8
    }

    unsafe fn free_pool(&self, ptr: *mut u8) {
        let bs = self.boot_services.load(Ordering::Acquire);
        if !bs.is_null() {
            ((*bs).free_pool)(ptr as *mut c_void);
        }
    }
}

unsafe impl GlobalAlloc for PoolAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = layout.align();
        if align <= POOL_ALIGN {
            return self.allocate_pool(layout.size());
        }

        let Some(size) = layout.size().checked_add(align) else {
            return null_mut();
        };
        let base = self.allocate_pool(size);
        if base.is_null() {
            return null_mut();
        }

        // At least POOL_ALIGN bytes lie between base and the aligned block
        let offset = align - (base as usize & (align - 1));
        let aligned = base.add(offset);
        (aligned as *mut *mut u8).sub(1).write(base);
        aligned
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.align() <= POOL_ALIGN {
            self.free_pool(ptr);
        } else {
            let base = (ptr as *mut *mut u8).sub(1).read();
            self.free_pool(base);
        }
    }
}

/// Global allocator instance
#[global_allocator]
static ALLOCATOR: PoolAllocator = PoolAllocator {
    boot_services: AtomicPtr::new(null_mut()),
};

/// Initialize the global allocator
///
/// # Safety
/// `boot_services` must stay valid for the lifetime of the loader.
pub unsafe fn init(boot_services: *mut BootServices) {
    ALLOCATOR
        .boot_services
        .store(boot_services, Ordering::Release);
}

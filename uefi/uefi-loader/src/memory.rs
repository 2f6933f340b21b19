//! # Pool-Backed Global Allocator
//!
//! Rust's `alloc` machinery on top of `AllocatePool`. Valid only while boot
//! services are active; afterwards every request reports out-of-memory,
//! which is why nothing on the post-exit path allocates.

#![allow(unsafe_code)]

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, null_mut, NonNull};
use uefi::boot::{self, MemoryType};

/// Boot-services pool allocation behind `alloc`.
///
/// `AllocatePool` returns 8-byte aligned blocks; anything stricter is
/// satisfied by over-allocating and stashing the original pool pointer in
/// a header word right below the aligned block, where `dealloc` can find
/// it again.
pub struct BootPoolAllocator;

#[global_allocator]
static GLOBAL_ALLOCATOR: BootPoolAllocator = BootPoolAllocator;

unsafe impl GlobalAlloc for BootPoolAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = layout.align().max(size_of::<usize>());
        let size = layout.size().max(1);
        let Some(total) = size
            .checked_add(align)
            .and_then(|v| v.checked_add(size_of::<usize>()))
        else {
            return null_mut();
        };

        let Ok(raw) = boot::allocate_pool(MemoryType::LOADER_DATA, total) else {
            return null_mut();
        };
        let raw = raw.as_ptr();

        let aligned = (raw as usize + size_of::<usize>() + align - 1) & !(align - 1);
        let header = (aligned - size_of::<usize>()) as *mut usize;
        unsafe {
            ptr::write(header, raw as usize);
        }
        aligned as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() {
            return;
        }

        let header = (ptr as usize - size_of::<usize>()) as *mut usize;
        let raw = unsafe { ptr::read(header) } as *mut u8;

        // SAFETY: `raw` is the pool pointer stored by `alloc`.
        let _ = unsafe { boot::free_pool(NonNull::new_unchecked(raw)) };
    }
}

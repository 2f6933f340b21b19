//! # ELF64 Kernel Image Loading
//!
//! Validates a 64-bit executable and places its loadable segments at the
//! exact physical addresses the image declares. There is no relocation
//! support: an address conflict is a fatal load failure, not a reason to
//! move a segment.
//!
//! Firmware specifics stay behind the [`ImageSource`] and [`PageAllocator`]
//! seams, so the whole load path runs under a plain test harness as well as
//! under UEFI boot services.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod image;
mod loader;

pub use image::{FormatError, ImageHeader, Segment, SegmentFlags, HEADER_LEN};
pub use loader::{
    load_executable, AllocError, ImageSource, LoadError, LoadedImage, PageAllocator, SourceError,
};

/// Physical page granularity of the placement allocator.
pub const PAGE_SIZE: u64 = 4096;

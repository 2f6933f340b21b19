//! # Segment Placement

use crate::image::{collect_loadable, ImageHeader, Segment, HEADER_LEN};
use crate::{FormatError, SegmentFlags, PAGE_SIZE};
use alloc::vec;
use core::ptr::NonNull;
use core::{ptr, slice};

/// Byte-addressed reads over the kernel image.
///
/// Implementations seek wherever `offset` says and fill the whole buffer;
/// a short read is a failure, not an end-of-file condition.
pub trait ImageSource {
    /// # Errors
    /// [`SourceError`] when the buffer cannot be filled completely.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SourceError>;
}

/// Physical page placement at caller-chosen addresses.
///
/// `allocate_at` reserves `pages` pages of [`PAGE_SIZE`] bytes starting
/// exactly at `address` and returns the region, writable through the
/// returned pointer. No zero-fill is guaranteed.
pub trait PageAllocator {
    /// # Errors
    /// [`AllocError`] when the range cannot be reserved at that address.
    fn allocate_at(
        &mut self,
        address: u64,
        pages: usize,
        flags: SegmentFlags,
    ) -> Result<NonNull<u8>, AllocError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("image read of {len} bytes at offset {offset} failed")]
pub struct SourceError {
    pub offset: u64,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("allocation of {pages} pages at {address:#x} failed")]
pub struct AllocError {
    pub address: u64,
    pub pages: usize,
}

/// Why a load attempt failed.
///
/// `InvalidFormat` means "not an executable we accept". Every other variant
/// means "was an executable but could not be placed"; callers report the
/// two classes differently.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("invalid kernel image")]
    InvalidFormat(#[from] FormatError),
    #[error("kernel image read failed")]
    Read(#[from] SourceError),
    #[error("segment placement at {address:#x} failed")]
    Placement {
        address: u64,
        #[source]
        source: AllocError,
    },
    #[error("segment size exceeds the platform address width")]
    AddressRange,
}

/// A successfully placed kernel image.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    /// Entry address taken verbatim from the header.
    pub entry: u64,
    /// Number of segments materialized in memory.
    pub segments: usize,
}

/// Validates the image and places every loadable segment.
///
/// Identity validation and descriptor vetting complete before the first
/// page is requested, so a rejected image leaves nothing behind. Segments
/// land at their exact declared physical addresses; the bytes past each
/// segment's file image are zeroed explicitly because the allocator hands
/// out whatever was in the pages.
///
/// An image without loadable segments is a well-formed (if useless) result:
/// the entry address is still returned.
///
/// # Errors
/// [`LoadError::InvalidFormat`] when the image fails validation, before
/// anything is allocated; [`LoadError::Read`], [`LoadError::Placement`] or
/// [`LoadError::AddressRange`] when a valid image cannot be materialized.
pub fn load_executable<S, A>(source: &mut S, allocator: &mut A) -> Result<LoadedImage, LoadError>
where
    S: ImageSource,
    A: PageAllocator,
{
    let mut header_bytes = [0_u8; HEADER_LEN];
    source.read_at(0, &mut header_bytes)?;
    let header = ImageHeader::parse(&header_bytes)?;

    let table_len = header.table_len()?;
    let mut table = vec![0_u8; table_len];
    if table_len > 0 {
        source.read_at(header.table_offset, &mut table)?;
    }

    let segments = collect_loadable(&table, &header)?;

    let mut placed = 0_usize;
    for segment in &segments {
        if segment.memsz == 0 {
            continue;
        }
        place_segment(source, allocator, segment)?;
        placed += 1;
    }

    Ok(LoadedImage {
        entry: header.entry,
        segments: placed,
    })
}

fn place_segment<S, A>(source: &mut S, allocator: &mut A, segment: &Segment) -> Result<(), LoadError>
where
    S: ImageSource,
    A: PageAllocator,
{
    let pages =
        usize::try_from(segment.memsz.div_ceil(PAGE_SIZE)).map_err(|_| LoadError::AddressRange)?;
    let filesz = usize::try_from(segment.filesz).map_err(|_| LoadError::AddressRange)?;
    let memsz = usize::try_from(segment.memsz).map_err(|_| LoadError::AddressRange)?;

    let region = allocator
        .allocate_at(segment.paddr, pages, segment.flags)
        .map_err(|e| LoadError::Placement {
            address: segment.paddr,
            source: e,
        })?;

    if filesz > 0 {
        // SAFETY: the allocator reserved `pages * PAGE_SIZE >= memsz >=
        // filesz` writable bytes at `region`.
        let file_image = unsafe { slice::from_raw_parts_mut(region.as_ptr(), filesz) };
        source.read_at(segment.offset, file_image)?;
    }

    // The `filesz..memsz` tail is the zero-initialized region; the pages
    // arrive with undefined contents.
    unsafe {
        ptr::write_bytes(region.as_ptr().add(filesz), 0, memsz - filesz);
    }

    Ok(())
}

//! # Firmware Service Implementations
//!
//! The UEFI side of the seams the library crates are written against: page
//! placement for the segment loader, and map/clock/exit services for the
//! handoff sequencer.

use boot_elf::{AllocError, PageAllocator, SegmentFlags};
use boot_handoff::{BootFirmware, CapturedMap, HandoffError, MapProbe};
use boot_info::BootTime;
use core::ptr::NonNull;
use uefi::boot::{self, AllocateType, MemoryType};
use uefi::mem::memory_map::{MemoryMap, MemoryMapKey};
use uefi::runtime;

/// `EFI_TIME` marker for "no timezone recorded".
const UNSPECIFIED_TIMEZONE: i16 = 0x07FF;

/// Places kernel segments at the exact physical addresses they declare.
pub struct UefiPageAllocator;

impl PageAllocator for UefiPageAllocator {
    fn allocate_at(
        &mut self,
        address: u64,
        pages: usize,
        flags: SegmentFlags,
    ) -> Result<NonNull<u8>, AllocError> {
        let memory_type = if flags.execute() {
            MemoryType::LOADER_CODE
        } else {
            MemoryType::LOADER_DATA
        };
        boot::allocate_pages(AllocateType::Address(address), memory_type, pages)
            .map_err(|_| AllocError { address, pages })
    }
}

/// [`BootFirmware`] over the live UEFI boot and runtime services.
pub struct UefiFirmware;

impl BootFirmware for UefiFirmware {
    type MapKey = MemoryMapKey;

    fn probe_memory_map(&mut self) -> Result<MapProbe, HandoffError> {
        let probe =
            boot::memory_map(MemoryType::LOADER_DATA).map_err(|_| HandoffError::MapProbeFailed)?;
        let map_size = probe.meta().map_size;
        let desc_size = probe.meta().desc_size;
        // The probe's own buffer is churn we do not want to keep around.
        drop(probe);
        Ok(MapProbe {
            map_size,
            desc_size,
        })
    }

    fn allocate_handoff_buffer(&mut self, len: usize) -> Result<NonNull<u8>, HandoffError> {
        boot::allocate_pool(MemoryType::LOADER_DATA, len)
            .map_err(|_| HandoffError::MapBufferAllocFailed(len))
    }

    fn capture_memory_map(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<(CapturedMap, MemoryMapKey), HandoffError> {
        let map =
            boot::memory_map(MemoryType::LOADER_DATA).map_err(|_| HandoffError::MapCaptureFailed)?;
        let len = map.buffer().len();
        if len > buffer.len() {
            return Err(HandoffError::MapBufferTooSmall {
                have: buffer.len(),
                need: len,
            });
        }
        buffer[..len].copy_from_slice(map.buffer());

        Ok((
            CapturedMap {
                ptr: buffer.as_ptr() as u64,
                len,
                desc_size: map.meta().desc_size,
                desc_version: map.meta().desc_version,
            },
            map.meta().map_key,
        ))
    }

    fn current_time(&mut self) -> Result<BootTime, HandoffError> {
        let time = runtime::get_time().map_err(|_| HandoffError::ClockUnavailable)?;
        Ok(BootTime {
            year: time.year(),
            month: time.month(),
            day: time.day(),
            hour: time.hour(),
            minute: time.minute(),
            second: time.second(),
            nanosecond: time.nanosecond(),
            time_zone: time.time_zone().unwrap_or(UNSPECIFIED_TIMEZONE),
            daylight: time.daylight().bits(),
        })
    }

    fn exit_boot_services(
        &mut self,
        _key: MemoryMapKey,
        buffer: &mut [u8],
    ) -> Result<CapturedMap, HandoffError> {
        // The uefi wrapper pairs a final capture with the key-matched exit
        // in one call, which keeps the capture-to-exit window as short as
        // it gets. The fresh map replaces the earlier snapshot in `buffer`.
        let map = unsafe { boot::exit_boot_services(None) };

        let len = map.buffer().len();
        if len > buffer.len() {
            return Err(HandoffError::MapBufferTooSmall {
                have: buffer.len(),
                need: len,
            });
        }
        buffer[..len].copy_from_slice(map.buffer());

        let desc_size = map.meta().desc_size;
        let desc_version = map.meta().desc_version;
        // There is no allocator left to return the wrapper's map to.
        core::mem::forget(map);

        Ok(CapturedMap {
            ptr: buffer.as_ptr() as u64,
            len,
            desc_size,
            desc_version,
        })
    }
}

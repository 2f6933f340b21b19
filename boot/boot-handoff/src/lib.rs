//! # Boot-Services Handoff Sequencing
//!
//! The last stretch of the loader's life: capture the firmware memory map,
//! leave the firmware's managed-memory regime, and hand the machine to the
//! kernel. The exit is irrevocable by firmware design; once it happens,
//! allocation and most device services are gone, so any mistake before it
//! must abort and any mistake after it cannot be recovered.
//!
//! The sequence is a typestate machine:
//!
//! ```text
//! HandoffSequencer --capture()--> MapCaptured --exit_boot_services()--> ServicesExited
//! ```
//!
//! Each transition consumes the previous state, so going backwards or
//! exiting twice does not compile. [`ServicesExited`] no longer owns the
//! firmware handle at all; after the exit, no firmware call is expressible.
//! The final jump into the kernel belongs to the caller, since it is pure
//! architecture and never returns.
//!
//! Firmware access goes through [`BootFirmware`], which keeps the
//! sequencing rules testable against an instrumented stub.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

use boot_info::{BootTime, MemoryMapInfo};
use core::ptr::NonNull;
use core::slice;
use log::warn;

/// Slack descriptors added on top of the probed map size.
///
/// The buffer allocation itself can split a free region and grow the map,
/// so capturing into a buffer of exactly the probed size fails. Two
/// descriptors of headroom are the contractual floor; the rest covers
/// firmware that keeps churning its map between the probe and the capture.
pub const MAP_SLACK_DESCRIPTORS: usize = 8;

/// Probed geometry of the firmware memory map.
#[derive(Debug, Clone, Copy)]
pub struct MapProbe {
    /// Total map size in bytes at probe time.
    pub map_size: usize,
    /// Stride of a single descriptor in bytes.
    pub desc_size: usize,
}

/// A memory map materialized into a caller-owned buffer.
#[derive(Debug, Clone, Copy)]
pub struct CapturedMap {
    /// Base of the raw descriptor bytes.
    pub ptr: u64,
    /// Occupied length in bytes.
    pub len: usize,
    /// Stride of a single descriptor in bytes.
    pub desc_size: usize,
    /// Descriptor layout version reported by the firmware.
    pub desc_version: u32,
}

/// Failures on the handoff path. All of these are fatal: retrying requires
/// firmware calls that would invalidate the very state being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    #[error("memory map size probe failed")]
    MapProbeFailed,
    #[error("memory map buffer allocation of {0} bytes failed")]
    MapBufferAllocFailed(usize),
    #[error("memory map capture failed")]
    MapCaptureFailed,
    #[error("memory map buffer too small: have {have} bytes, need {need}")]
    MapBufferTooSmall { have: usize, need: usize },
    #[error("wall clock could not be read")]
    ClockUnavailable,
    #[error("exit from boot services was refused")]
    ExitRefused,
}

/// The firmware services the sequencer drives.
///
/// One implementation wraps live UEFI boot services; tests use an
/// instrumented stub that checks the sequencing rules.
pub trait BootFirmware {
    /// Opaque token proving a captured map is still current. The exit call
    /// requires it; a stale token means the map changed underneath us.
    type MapKey;

    /// Zero-sized probe for the current map geometry.
    ///
    /// # Errors
    /// [`HandoffError::MapProbeFailed`] when the firmware refuses even the
    /// size query.
    fn probe_memory_map(&mut self) -> Result<MapProbe, HandoffError>;

    /// Allocate `len` bytes of firmware-owned memory that stays valid and
    /// unreclaimed past the boot-services exit. The sequencer never frees
    /// it; the kernel reads it after the handoff.
    ///
    /// # Errors
    /// [`HandoffError::MapBufferAllocFailed`] on an exhausted pool.
    fn allocate_handoff_buffer(&mut self, len: usize) -> Result<NonNull<u8>, HandoffError>;

    /// Capture the current map into `buffer` and return its geometry plus
    /// the matching key.
    ///
    /// # Errors
    /// [`HandoffError::MapCaptureFailed`] or
    /// [`HandoffError::MapBufferTooSmall`].
    fn capture_memory_map(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<(CapturedMap, Self::MapKey), HandoffError>;

    /// Current wall-clock time, verbatim firmware representation.
    ///
    /// # Errors
    /// [`HandoffError::ClockUnavailable`]; the sequencer absorbs it.
    fn current_time(&mut self) -> Result<BootTime, HandoffError>;

    /// The irrevocable exit. Implementations may refresh `buffer` with a
    /// final map snapshot; whatever the buffer holds after this call is
    /// what the kernel gets.
    ///
    /// # Errors
    /// [`HandoffError::ExitRefused`] when the firmware rejects the key.
    fn exit_boot_services(
        &mut self,
        key: Self::MapKey,
        buffer: &mut [u8],
    ) -> Result<CapturedMap, HandoffError>;
}

/// Entry state: firmware services are fully available.
pub struct HandoffSequencer<F: BootFirmware> {
    firmware: F,
}

impl<F: BootFirmware> HandoffSequencer<F> {
    pub const fn new(firmware: F) -> Self {
        Self { firmware }
    }

    /// Probe, allocate the slack-padded buffer, capture the map, and read
    /// the clock.
    ///
    /// The clock is read here rather than earlier in the boot: closeness to
    /// the handoff instant matters more than total capture latency. A dead
    /// clock is absorbed as [`BootTime::UNSET`]; every map failure is fatal.
    ///
    /// # Errors
    /// Any probe, allocation, or capture failure. The sequencer is consumed
    /// either way; there is no retry.
    pub fn capture(mut self) -> Result<MapCaptured<F>, HandoffError> {
        let probe = self.firmware.probe_memory_map()?;
        let buffer_len = probe.map_size + MAP_SLACK_DESCRIPTORS * probe.desc_size;
        let buffer = self.firmware.allocate_handoff_buffer(buffer_len)?;

        // SAFETY: the firmware handed out `buffer_len` writable bytes that
        // stay valid past the boot-services exit.
        let bytes = unsafe { slice::from_raw_parts_mut(buffer.as_ptr(), buffer_len) };
        let (map, key) = self.firmware.capture_memory_map(bytes)?;

        let time = match self.firmware.current_time() {
            Ok(time) => time,
            Err(e) => {
                warn!("handing off an unset wall clock: {e}");
                BootTime::UNSET
            }
        };

        Ok(MapCaptured {
            firmware: self.firmware,
            buffer,
            buffer_len,
            key,
            map,
            time,
        })
    }
}

/// The map and clock are captured; the key is in hand.
///
/// The only way forward is [`MapCaptured::exit_boot_services`]. No other
/// firmware call may happen in this state; anything that allocates would
/// stale the key.
pub struct MapCaptured<F: BootFirmware> {
    firmware: F,
    buffer: NonNull<u8>,
    buffer_len: usize,
    key: F::MapKey,
    map: CapturedMap,
    time: BootTime,
}

impl<F: BootFirmware> core::fmt::Debug for MapCaptured<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MapCaptured")
            .field("buffer_len", &self.buffer_len)
            .field("map", &self.map)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

impl<F: BootFirmware> MapCaptured<F> {
    /// The captured map geometry.
    pub const fn map(&self) -> CapturedMap {
        self.map
    }

    /// The wall clock read at capture time.
    pub const fn time(&self) -> BootTime {
        self.time
    }

    /// The one-way door. Attempted exactly once; there is no retry path,
    /// because re-capturing the map to freshen the key is itself a firmware
    /// call sequence that can invalidate the map again.
    ///
    /// # Errors
    /// [`HandoffError::ExitRefused`] (typically a stale key) or a final-map
    /// overflow of the captured buffer. Both are unrecoverable: the
    /// firmware may already be partially torn down.
    pub fn exit_boot_services(self) -> Result<ServicesExited, HandoffError> {
        let Self {
            mut firmware,
            buffer,
            buffer_len,
            key,
            map: _,
            time,
        } = self;

        // SAFETY: same buffer the capture step wrote; still firmware-owned
        // and valid.
        let bytes = unsafe { slice::from_raw_parts_mut(buffer.as_ptr(), buffer_len) };
        let map = firmware.exit_boot_services(key, bytes)?;

        // `firmware` drops here. From this point on, no state in the
        // program can reach a firmware service.
        Ok(ServicesExited {
            map: MemoryMapInfo {
                ptr: map.ptr,
                len: map.len as u64,
                desc_size: map.desc_size as u64,
                desc_version: map.desc_version,
            },
            time,
        })
    }
}

/// Terminal library state: firmware is gone, the handoff data is final.
/// The caller finishes the job with the jump into the kernel.
#[derive(Debug)]
pub struct ServicesExited {
    /// The final memory map, ready for the kernel.
    pub map: MemoryMapInfo,
    /// Wall clock captured next to the map.
    pub time: BootTime,
}

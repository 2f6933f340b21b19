//! # Kernel Handoff Interface
//!
//! The data contract between the loader and the kernel: one [`SystemInfo`]
//! built before the jump and read by the kernel long after the loader is
//! gone. Everything here crosses an ABI boundary, so keep `#[repr(C)]`,
//! fixed-size integers, and stable field order.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

/// Kernel entry point.
///
/// # ABI
/// The kernel is built against the System V AMD64 convention while the
/// loader runs as a PE/COFF (`win64`) application; the loader crosses that
/// gap with an explicit trampoline. The single argument arrives in `rdi`.
pub type KernelEntryFn = extern "sysv64" fn(*const SystemInfo) -> !;

/// Everything the kernel needs right after `ExitBootServices`.
///
/// The loader is the sole writer: constructed once, leaked, handed over as
/// a single pointer, and never touched again. All referenced memory
/// (framebuffer, memory map blob) stays valid past the boot-services exit.
#[repr(C)]
#[derive(Clone)]
pub struct SystemInfo {
    /// Framebuffer geometry; all zero when the machine boots headless.
    pub screen: ScreenInfo,

    /// The firmware memory map captured at the boot-services exit.
    pub memory_map: MemoryMapInfo,

    /// RSDP physical address, or 0 if the firmware exposes none.
    pub rsdp_addr: u64,

    /// Firmware wall clock read at map capture.
    pub time: BootTime,
}

/// Linear framebuffer description taken from the firmware graphics output.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ScreenInfo {
    /// Pixel memory base (physical). Writable after `ExitBootServices`.
    pub base: u64,

    /// Total framebuffer size in bytes.
    pub size: u64,

    /// Visible width in pixels.
    pub width: u64,

    /// Visible height in pixels.
    pub height: u64,

    /// Pixels per scanline. May exceed `width`; pixel addressing must use
    /// the stride, never the width.
    pub stride: u64,
}

impl ScreenInfo {
    /// The headless placeholder: no display service, no geometry.
    pub const EMPTY: Self = Self {
        base: 0,
        size: 0,
        width: 0,
        height: 0,
        stride: 0,
    };
}

/// The raw UEFI memory map blob. Opaque to the loader; the kernel walks it
/// using the recorded per-descriptor stride (descriptors are not densely
/// packed at their struct size).
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct MemoryMapInfo {
    /// Buffer base, an array of `EFI_MEMORY_DESCRIPTOR` bytes.
    pub ptr: u64,

    /// Buffer length in bytes.
    pub len: u64,

    /// Stride of a single descriptor in bytes.
    pub desc_size: u64,

    /// Descriptor layout version reported by the firmware.
    pub desc_version: u32,
}

impl MemoryMapInfo {
    /// Placeholder until the map is captured.
    pub const EMPTY: Self = Self {
        ptr: 0,
        len: 0,
        desc_size: 0,
        desc_version: 0,
    };
}

/// Firmware wall-clock time, `EFI_TIME` fields verbatim. No timezone or
/// calendar normalization happens on either side of the handoff.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Nanoseconds within the current second.
    pub nanosecond: u32,
    /// Offset from UTC in minutes, or `0x07FF` when unspecified.
    pub time_zone: i16,
    /// Daylight-saving flags as reported by the firmware.
    pub daylight: u8,
}

impl BootTime {
    /// The all-zero "clock unavailable" value.
    pub const UNSET: Self = Self {
        year: 0,
        month: 0,
        day: 0,
        hour: 0,
        minute: 0,
        second: 0,
        nanosecond: 0,
        time_zone: 0,
        daylight: 0,
    };
}

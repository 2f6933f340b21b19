//! # UEFI Kernel Loader
//!
//! Loads the kernel from the boot volume, gathers the platform facts the
//! kernel cannot obtain for itself, leaves UEFI boot services behind, and
//! jumps into the kernel. One pass, no retries:
//!
//! ```text
//! UEFI firmware
//!       |
//!       v
//! 1. init logging and the pool allocator
//! 2. collect platform facts           (framebuffer, ACPI root pointer)
//! 3. load \kernel.elf                 (validate, place PT_LOAD segments)
//! 4. capture the memory map + clock   (slack-padded firmware buffer)
//! 5. ExitBootServices                 (irrevocable)
//! 6. jump to the kernel entry         (SysV trampoline, one SystemInfo*)
//! ```
//!
//! Failures before step 5 are reported on the console and hand control
//! back to the firmware. From step 5 on there is no firmware to return to;
//! failures are traced to the QEMU debug port and the CPU halts.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![no_main]
#![allow(unsafe_code)]

extern crate alloc;

mod file_system;
mod firmware;
mod framebuffer;
mod logger;
mod memory;
mod rsdp;
mod trampoline;

use crate::file_system::open_image;
use crate::firmware::{UefiFirmware, UefiPageAllocator};
use crate::logger::UefiLogger;
use alloc::boxed::Box;
use boot_elf::{load_executable, LoadError};
use boot_handoff::HandoffSequencer;
use boot_info::{BootTime, MemoryMapInfo, SystemInfo};
use boot_qemu::qemu_trace;
use log::{info, LevelFilter};
use uefi::prelude::*;
use uefi::{cstr16, CStr16};

/// Fixed, well-known location of the kernel image on the boot volume.
const KERNEL_PATH: &CStr16 = cstr16!("\\kernel.elf");

#[entry]
fn efi_main() -> Status {
    if uefi::helpers::init().is_err() {
        return Status::UNSUPPORTED;
    }

    let logger = UefiLogger::new(LevelFilter::Debug);
    let logger = logger.init().expect("logger init");

    info!("UEFI loader starting");

    // Platform facts first, while boot services are fully available.
    let screen = framebuffer::screen_info();
    let rsdp_addr = rsdp::find_rsdp_addr();
    if rsdp_addr == 0 {
        info!("no ACPI root pointer in the configuration table");
    }

    info!("loading {KERNEL_PATH} ...");
    let mut image = match open_image(KERNEL_PATH) {
        Ok(file) => file,
        Err(status) => {
            info!("failed to open the kernel image");
            return status;
        }
    };

    let mut allocator = UefiPageAllocator;
    let loaded = match load_executable(&mut image, &mut allocator) {
        Ok(loaded) => loaded,
        Err(e) => {
            info!("kernel image rejected: {e}");
            return load_status(&e);
        }
    };
    info!(
        "kernel loaded: entry={:#x}, segments={}",
        loaded.entry, loaded.segments
    );

    // The kernel reads this long after this application is gone.
    let system_info = Box::leak(Box::new(SystemInfo {
        screen,
        memory_map: MemoryMapInfo::EMPTY,
        rsdp_addr,
        time: BootTime::UNSET,
    }));

    let captured = match HandoffSequencer::new(UefiFirmware).capture() {
        Ok(captured) => captured,
        Err(e) => {
            info!("memory map capture failed: {e}");
            return Status::ABORTED;
        }
    };

    // Console output ends here; only the debug port remains.
    logger.console_detached();
    let exited = match captured.exit_boot_services() {
        Ok(exited) => exited,
        Err(e) => {
            qemu_trace!("exit from boot services failed: {e}\n");
            halt();
        }
    };

    system_info.memory_map = exited.map;
    system_info.time = exited.time;

    qemu_trace!(
        "handing off: entry={:#x}, system info at {:p}\n",
        loaded.entry,
        core::ptr::from_ref(system_info)
    );

    // Never returns; SystemInfo is complete and will not be touched again.
    unsafe { trampoline::enter_kernel(loaded.entry, system_info) }
}

/// The firmware gets a distinct status for "not an executable" vs "was an
/// executable but could not be placed".
fn load_status(error: &LoadError) -> Status {
    match error {
        LoadError::InvalidFormat(_) => Status::UNSUPPORTED,
        LoadError::Read(_) => Status::DEVICE_ERROR,
        LoadError::Placement { .. } => Status::OUT_OF_RESOURCES,
        LoadError::AddressRange => Status::BAD_BUFFER_SIZE,
    }
}

/// Terminal parking spot for failures past the point of no return.
fn halt() -> ! {
    loop {
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack, preserves_flags));
        }
    }
}

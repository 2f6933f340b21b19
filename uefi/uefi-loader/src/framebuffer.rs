//! # GOP Framebuffer Discovery

use boot_info::ScreenInfo;
use log::info;
use uefi::proto::console::gop::GraphicsOutput;
use uefi::{boot, Status};

/// Best-effort framebuffer lookup.
///
/// A machine without a usable display is still bootable; any failure here
/// degrades to an all-zero descriptor and the kernel runs headless.
pub fn screen_info() -> ScreenInfo {
    match query_gop() {
        Ok(screen) => {
            info!(
                "framebuffer: {}x{} px, stride {} px, {} bytes at {:#x}",
                screen.width, screen.height, screen.stride, screen.size, screen.base
            );
            screen
        }
        Err(e) => {
            info!("no usable framebuffer, continuing headless: {e:?}");
            ScreenInfo::EMPTY
        }
    }
}

fn query_gop() -> Result<ScreenInfo, uefi::Error> {
    let handle = boot::get_handle_for_protocol::<GraphicsOutput>()?;
    let mut gop = boot::open_protocol_exclusive::<GraphicsOutput>(handle)?;

    let mut mode = gop.current_mode_info();
    let (width, height) = mode.resolution();
    if width == 0 || height == 0 {
        // Some firmware never starts the GOP until a mode is set
        // explicitly; geometry reads as zero until then. Pick the first
        // mode on offer and re-read.
        let Some(default_mode) = gop.modes().next() else {
            return Err(uefi::Error::new(Status::NOT_FOUND, ()));
        };
        gop.set_mode(&default_mode)?;
        mode = gop.current_mode_info();
    }

    let (width, height) = mode.resolution();
    let stride = mode.stride();
    let mut fb = gop.frame_buffer();

    Ok(ScreenInfo {
        base: fb.as_mut_ptr() as u64,
        size: fb.size() as u64,
        width: width as u64,
        height: height as u64,
        stride: stride as u64,
    })
}

//! # Boot Volume Access
//!
//! Opens the kernel image on the volume this application was loaded from
//! and adapts it to the loader's byte-addressed reads.

use boot_elf::{ImageSource, SourceError};
use uefi::proto::media::file::{File, FileAttribute, FileMode, RegularFile};
use uefi::{boot, CStr16, Status};

/// An open kernel image on the boot volume.
pub struct ImageFile {
    file: RegularFile,
}

/// Opens `path` on the volume the loader itself was started from.
///
/// # Errors
/// Returns a [`Status`] describing the failing step; the detail has already
/// been reported on the console.
pub fn open_image(path: &CStr16) -> Result<ImageFile, Status> {
    let image_handle = boot::image_handle();
    let mut fs = match boot::get_image_file_system(image_handle) {
        Ok(fs) => fs,
        Err(e) => {
            uefi::println!("Failed to open the boot file system: {e:?}");
            return Err(Status::UNSUPPORTED);
        }
    };

    let mut volume = match fs.open_volume() {
        Ok(dir) => dir,
        Err(e) => {
            uefi::println!("Failed to open the volume root: {e:?}");
            return Err(Status::UNSUPPORTED);
        }
    };

    let handle = match volume.open(path, FileMode::Read, FileAttribute::empty()) {
        Ok(handle) => handle,
        Err(e) => {
            uefi::println!("Failed to open {path}: {e:?}");
            return Err(Status::NOT_FOUND);
        }
    };

    let Some(file) = handle.into_regular_file() else {
        uefi::println!("{path} is not a regular file");
        return Err(Status::UNSUPPORTED);
    };

    Ok(ImageFile { file })
}

impl ImageSource for ImageFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), SourceError> {
        let error = SourceError {
            offset,
            len: buf.len(),
        };

        self.file.set_position(offset).map_err(|_| error)?;

        let mut filled = 0;
        while filled < buf.len() {
            let read = self.file.read(&mut buf[filled..]).map_err(|_| error)?;
            if read == 0 {
                // Short file: the image promised more bytes than it holds.
                return Err(error);
            }
            filled += read;
        }

        Ok(())
    }
}

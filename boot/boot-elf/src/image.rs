//! # ELF64 Structures and Validation

use alloc::vec::Vec;
use core::mem::size_of;
use core::ptr::read_unaligned;

const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const CLASS_64: u8 = 2;
const DATA_LITTLE_ENDIAN: u8 = 1;
const IDENT_VERSION_CURRENT: u8 = 1;
const TYPE_EXECUTABLE: u16 = 2;
const MACHINE_X86_64: u16 = 62;
const VERSION_CURRENT: u32 = 1;

pub(crate) const PT_LOAD: u32 = 1;

// Minimal ELF64 definitions
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct Elf64Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct Elf64Phdr {
    p_type: u32,
    p_flags: SegmentFlags,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

/// Size of the fixed header read from offset 0.
pub const HEADER_LEN: usize = size_of::<Elf64Ehdr>();

/// Size of one program-header descriptor as this loader understands it.
/// The file may declare a larger stride; a smaller one is malformed.
pub(crate) const DESCRIPTOR_LEN: usize = size_of::<Elf64Phdr>();

/// Why an image failed validation. Any of these means "not a kernel we can
/// run" and rejects the binary in its entirety; nothing is partially loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("image is shorter than an ELF64 header")]
    Truncated,
    #[error("bad magic bytes")]
    BadMagic,
    #[error("not a 64-bit image")]
    NotClass64,
    #[error("not a little-endian image")]
    NotLittleEndian,
    #[error("not an executable image")]
    NotExecutable,
    #[error("not an x86-64 image")]
    WrongMachine,
    #[error("unsupported image version")]
    WrongVersion,
    #[error("program-header stride smaller than a descriptor")]
    StrideTooSmall,
    #[error("program-header table size overflows")]
    TableTooLarge,
    #[error("segment file size exceeds its memory size")]
    OversizedFileImage,
}

/// The fields of a validated executable header that drive loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Entry address, returned to the caller verbatim.
    pub entry: u64,
    /// File offset of the program-header table.
    pub table_offset: u64,
    /// Declared stride between descriptors. Authoritative: iteration steps
    /// by this value, not by the descriptor struct size.
    pub descriptor_stride: usize,
    /// Number of descriptors in the table.
    pub descriptor_count: usize,
}

impl ImageHeader {
    /// Validates the identity fields and extracts the table geometry.
    ///
    /// All identity checks run before anything else looks at the image.
    ///
    /// # Errors
    /// Returns the first [`FormatError`] the header trips over; the image
    /// is rejected whole.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_LEN {
            return Err(FormatError::Truncated);
        }

        // SAFETY: bounds checked above; read_unaligned avoids alignment
        // assumptions about the caller's buffer.
        let ehdr = unsafe { read_unaligned(bytes.as_ptr().cast::<Elf64Ehdr>()) };

        if ehdr.e_ident[0..4] != MAGIC {
            return Err(FormatError::BadMagic);
        }
        if ehdr.e_ident[4] != CLASS_64 {
            return Err(FormatError::NotClass64);
        }
        if ehdr.e_ident[5] != DATA_LITTLE_ENDIAN {
            return Err(FormatError::NotLittleEndian);
        }
        if ehdr.e_ident[6] != IDENT_VERSION_CURRENT || ehdr.e_version != VERSION_CURRENT {
            return Err(FormatError::WrongVersion);
        }
        if ehdr.e_type != TYPE_EXECUTABLE {
            return Err(FormatError::NotExecutable);
        }
        if ehdr.e_machine != MACHINE_X86_64 {
            return Err(FormatError::WrongMachine);
        }

        let stride = usize::from(ehdr.e_phentsize);
        if ehdr.e_phnum != 0 && stride < DESCRIPTOR_LEN {
            return Err(FormatError::StrideTooSmall);
        }

        Ok(Self {
            entry: ehdr.e_entry,
            table_offset: ehdr.e_phoff,
            descriptor_stride: stride,
            descriptor_count: usize::from(ehdr.e_phnum),
        })
    }

    /// Byte size of the program-header table (`count x stride`).
    ///
    /// # Errors
    /// [`FormatError::TableTooLarge`] when the product overflows.
    pub fn table_len(&self) -> Result<usize, FormatError> {
        self.descriptor_count
            .checked_mul(self.descriptor_stride)
            .ok_or(FormatError::TableTooLarge)
    }
}

/// A loadable region of the image.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// File offset of the segment's bytes.
    pub offset: u64,
    /// Exact physical load address.
    pub paddr: u64,
    /// Bytes present in the file.
    pub filesz: u64,
    /// Bytes occupied in memory; at least `filesz`. The tail holds the
    /// zero-initialized region and is cleared by the loader.
    pub memsz: u64,
    pub flags: SegmentFlags,
}

/// Walks a program-header table at the declared stride and collects the
/// loadable descriptors. Non-loadable entries are inspected and skipped.
pub(crate) fn collect_loadable(
    table: &[u8],
    header: &ImageHeader,
) -> Result<Vec<Segment>, FormatError> {
    let mut segments = Vec::new();

    for index in 0..header.descriptor_count {
        let offset = index * header.descriptor_stride;
        // SAFETY: the caller sized `table` to `count x stride` and the
        // stride is at least one descriptor long.
        let phdr = unsafe { read_unaligned(table.as_ptr().add(offset).cast::<Elf64Phdr>()) };

        if phdr.p_type != PT_LOAD {
            continue;
        }
        if phdr.p_filesz > phdr.p_memsz {
            return Err(FormatError::OversizedFileImage);
        }

        segments.push(Segment {
            offset: phdr.p_offset,
            paddr: phdr.p_paddr,
            filesz: phdr.p_filesz,
            memsz: phdr.p_memsz,
            flags: phdr.p_flags,
        });
    }

    Ok(segments)
}

/// `p_flags` word of a program header.
///
/// Layout (LSB first): execute, write, read; the rest is reserved.
#[bitfield_struct::bitfield(u32)]
pub struct SegmentFlags {
    #[bits(1)]
    pub execute: bool,
    #[bits(1)]
    pub write: bool,
    #[bits(1)]
    pub read: bool,
    #[bits(29)]
    __: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_header() -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4] = CLASS_64;
        bytes[5] = DATA_LITTLE_ENDIAN;
        bytes[6] = IDENT_VERSION_CURRENT;
        bytes[16..18].copy_from_slice(&TYPE_EXECUTABLE.to_le_bytes());
        bytes[18..20].copy_from_slice(&MACHINE_X86_64.to_le_bytes());
        bytes[20..24].copy_from_slice(&VERSION_CURRENT.to_le_bytes());
        bytes[24..32].copy_from_slice(&0x0010_0000_u64.to_le_bytes()); // entry
        bytes[32..40].copy_from_slice(&(HEADER_LEN as u64).to_le_bytes()); // phoff
        bytes[54..56].copy_from_slice(&(DESCRIPTOR_LEN as u16).to_le_bytes());
        bytes[56..58].copy_from_slice(&1_u16.to_le_bytes()); // phnum
        bytes
    }

    #[test]
    fn accepts_a_well_formed_header() {
        let header = ImageHeader::parse(&valid_header()).unwrap();
        assert_eq!(header.entry, 0x0010_0000);
        assert_eq!(header.table_offset, HEADER_LEN as u64);
        assert_eq!(header.descriptor_stride, DESCRIPTOR_LEN);
        assert_eq!(header.descriptor_count, 1);
        assert_eq!(header.table_len().unwrap(), DESCRIPTOR_LEN);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = valid_header();
        bytes[1] = b'F';
        assert_eq!(ImageHeader::parse(&bytes), Err(FormatError::BadMagic));
    }

    #[test]
    fn rejects_a_32_bit_image() {
        let mut bytes = valid_header();
        bytes[4] = 1;
        assert_eq!(ImageHeader::parse(&bytes), Err(FormatError::NotClass64));
    }

    #[test]
    fn rejects_a_big_endian_image() {
        let mut bytes = valid_header();
        bytes[5] = 2;
        assert_eq!(ImageHeader::parse(&bytes), Err(FormatError::NotLittleEndian));
    }

    #[test]
    fn rejects_a_shared_object() {
        let mut bytes = valid_header();
        bytes[16..18].copy_from_slice(&3_u16.to_le_bytes()); // ET_DYN
        assert_eq!(ImageHeader::parse(&bytes), Err(FormatError::NotExecutable));
    }

    #[test]
    fn rejects_a_foreign_architecture() {
        let mut bytes = valid_header();
        bytes[18..20].copy_from_slice(&183_u16.to_le_bytes()); // aarch64
        assert_eq!(ImageHeader::parse(&bytes), Err(FormatError::WrongMachine));
    }

    #[test]
    fn rejects_an_unknown_version() {
        let mut bytes = valid_header();
        bytes[20..24].copy_from_slice(&2_u32.to_le_bytes());
        assert_eq!(ImageHeader::parse(&bytes), Err(FormatError::WrongVersion));

        let mut bytes = valid_header();
        bytes[6] = 0;
        assert_eq!(ImageHeader::parse(&bytes), Err(FormatError::WrongVersion));
    }

    #[test]
    fn rejects_an_undersized_descriptor_stride() {
        let mut bytes = valid_header();
        bytes[54..56].copy_from_slice(&40_u16.to_le_bytes());
        assert_eq!(ImageHeader::parse(&bytes), Err(FormatError::StrideTooSmall));
    }

    #[test]
    fn keeps_a_larger_declared_stride() {
        let mut bytes = valid_header();
        bytes[54..56].copy_from_slice(&64_u16.to_le_bytes());
        let header = ImageHeader::parse(&bytes).unwrap();
        assert_eq!(header.descriptor_stride, 64);
        assert_eq!(header.table_len().unwrap(), 64);
    }

    #[test]
    fn accepts_an_empty_table_with_zero_stride() {
        let mut bytes = valid_header();
        bytes[54..56].copy_from_slice(&0_u16.to_le_bytes());
        bytes[56..58].copy_from_slice(&0_u16.to_le_bytes());
        let header = ImageHeader::parse(&bytes).unwrap();
        assert_eq!(header.table_len().unwrap(), 0);
    }

    #[test]
    fn rejects_a_truncated_header() {
        let bytes = [0_u8; HEADER_LEN - 1];
        assert_eq!(ImageHeader::parse(&bytes), Err(FormatError::Truncated));
    }
}

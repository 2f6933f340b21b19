//! # ACPI Root Pointer Discovery
//!
//! Finds the RSDP in the firmware configuration table. Only the lookup
//! lives here; walking the description tables behind the pointer is kernel
//! territory and happens long after the handoff.
//!
//! A machine without ACPI entries is a valid terminal state, not an error:
//! the lookup reports absence and the kernel decides what a platform
//! without hardware description tables means for it.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

use uefi::table::cfg::{ACPI2_GUID, ACPI_GUID};
use uefi::Guid;

/// Scans configuration-table entries in their firmware-given order and
/// returns the vendor table address of the first entry tagged with either
/// ACPI root-pointer GUID.
///
/// The scan is order-dependent on purpose: when the firmware lists both an
/// ACPI 1.0 and an ACPI 2.0 entry, whichever comes first wins, with no
/// preference for the newer revision.
#[must_use = "an absent root pointer must be handed to the kernel as null"]
pub fn find_root_pointer<I>(entries: I) -> Option<u64>
where
    I: IntoIterator<Item = (Guid, u64)>,
{
    entries
        .into_iter()
        .find(|(guid, _)| *guid == ACPI2_GUID || *guid == ACPI_GUID)
        .map(|(_, address)| address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uefi::guid;

    const VENDOR: Guid = guid!("d9a0f3a0-3a4f-4f6e-91aa-6e04e1c0f00d");

    #[test]
    fn legacy_entry_listed_first_wins() {
        let entries = [(ACPI_GUID, 0x1000_u64), (ACPI2_GUID, 0x2000_u64)];
        assert_eq!(find_root_pointer(entries), Some(0x1000));
    }

    #[test]
    fn modern_entry_listed_first_wins() {
        let entries = [(ACPI2_GUID, 0x2000_u64), (ACPI_GUID, 0x1000_u64)];
        assert_eq!(find_root_pointer(entries), Some(0x2000));
    }

    #[test]
    fn unrelated_entries_are_skipped() {
        let entries = [(VENDOR, 0x3000_u64), (ACPI_GUID, 0x1000_u64)];
        assert_eq!(find_root_pointer(entries), Some(0x1000));
    }

    #[test]
    fn absence_is_reported_as_none() {
        let entries = [(VENDOR, 0x3000_u64)];
        assert_eq!(find_root_pointer(entries), None);

        let empty: [(Guid, u64); 0] = [];
        assert_eq!(find_root_pointer(empty), None);
    }
}

//! # ACPI Root Pointer

use boot_acpi::find_root_pointer;
use uefi::system;

/// Physical address of the RSDP, or 0 when the configuration table carries
/// no ACPI entry. Absence is a valid outcome, not a boot failure.
pub fn find_rsdp_addr() -> u64 {
    system::with_config_table(|table| {
        find_root_pointer(
            table
                .iter()
                .map(|entry| (entry.guid, entry.address as u64)),
        )
        .unwrap_or(0)
    })
}

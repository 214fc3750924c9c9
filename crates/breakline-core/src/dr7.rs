//! Dr7 debug-control-register math
//!
//! The engine programs execute breakpoints of length 1 only, so the RW/LEN
//! nibbles of Dr7 (bits 16 and up) stay zero and only the local-enable bits
//! matter.

use breakline_common::{Error, Result, HW_SLOT_COUNT};

/// Local-enable bit for a Dr slot. Bits 0, 2, 4 and 6 enable Dr0-Dr3.
pub fn local_enable_bit(slot: usize) -> u64 {
    1u64 << (slot * 2)
}

/// Compute the Dr7 value for the given slot occupancy.
///
/// A slot is enabled only when it holds an address; an enabled Dr7 bit over
/// a zeroed Dr register would trap the first access to address 0.
pub fn dr7_value(slots: &[Option<u64>; HW_SLOT_COUNT]) -> u64 {
    slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_some())
        .fold(0u64, |dr7, (i, _)| dr7 | local_enable_bit(i))
}

/// Validate a slot index against Dr0-Dr3.
pub fn check_slot(slot: usize) -> Result<()> {
    if slot >= HW_SLOT_COUNT {
        return Err(Error::Slot(slot));
    }
    Ok(())
}

//! Page directory / page table entry for 32-bit x86.

use crate::PhysicalAddress;

use super::flags::PageFlags;

/// A single paging-structure entry.
///
/// Directory entries and table entries share this encoding: bits 12-31 hold the frame
/// address (of a page table or of a data page) and bits 0-11 hold [`PageFlags`]. This type
/// is the only place that knows the bit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Frame address mask (bits 12-31).
    const ADDRESS_MASK: u32 = 0xFFFF_F000;

    /// Flag bits mask (bits 0-11).
    const FLAGS_MASK: u32 = !Self::ADDRESS_MASK;

    /// The empty (not present) entry.
    pub const EMPTY: Self = Self(0);

    /// Creates a new entry.
    ///
    /// The physical address must be frame-aligned. Flags are stored exactly as given, so a
    /// caller that wants a valid mapping must include [`PageFlags::PRESENT`].
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.as_u32() & Self::FLAGS_MASK == 0,
            "physical address must be frame-aligned"
        );

        let addr_bits = address.as_u32() & Self::ADDRESS_MASK;
        let flag_bits = flags.bits() & Self::FLAGS_MASK;
        Self(addr_bits | flag_bits)
    }

    /// Returns the frame address stored in this entry.
    ///
    /// Returns None if the entry is not present; the address bits of an absent entry carry
    /// no meaning.
    pub fn address(self) -> Option<PhysicalAddress> {
        if self.is_present() {
            Some(PhysicalAddress::new(self.0 & Self::ADDRESS_MASK))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_retain(self.0 & Self::FLAGS_MASK)
    }

    /// Sets the flags for this entry, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        let addr_bits = self.0 & Self::ADDRESS_MASK;
        let flag_bits = flags.bits() & Self::FLAGS_MASK;
        self.0 = addr_bits | flag_bits;
    }

    /// Returns whether this entry is present (valid).
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw value of this entry, as the hardware sees it.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Creates an entry from a raw value.
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }
}

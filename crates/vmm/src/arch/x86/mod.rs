//! 32-bit x86 (non-PAE) paging layout.
//!
//! The layout of paging structures on this architecture is fixed by the hardware and is
//! independent of the host the crate is compiled for: two levels of 1024-entry tables,
//! 4 KiB pages and 32-bit entries. Only [`activate`] actually touches the CPU.

mod entry;
mod flags;

pub use entry::PageEntry;
pub use flags::PageFlags;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of bits in the in-page offset.
pub const PAGE_SHIFT: u32 = 12;

/// Number of index bits consumed by each paging level.
pub const INDEX_BITS: u32 = 10;

/// Number of entries in a page directory or a page table.
pub const ENTRY_COUNT: usize = 1 << INDEX_BITS;

/// Bytes of virtual address space covered by one page directory entry (4 MiB).
pub const DIRECTORY_ENTRY_SPAN: usize = ENTRY_COUNT * PAGE_SIZE;

/// Returns the paging-structure index for a given virtual address at the specified level.
///
/// Level 0 is the page table (bits 12-21), level 1 is the page directory (bits 22-31).
#[inline]
pub const fn page_index(address: u32, level: usize) -> usize {
    let shift = match level {
        0 | 1 => PAGE_SHIFT + (level as u32 * INDEX_BITS),
        _ => panic!("level out of range for 32-bit x86 paging"),
    };
    ((address >> shift) & ((1 << INDEX_BITS) - 1)) as usize
}

/// Returns the page directory index (bits 22-31) of a virtual address.
#[inline]
pub const fn directory_index(address: u32) -> usize {
    page_index(address, 1)
}

/// Returns the page table index (bits 12-21) of a virtual address.
#[inline]
pub const fn table_index(address: u32) -> usize {
    page_index(address, 0)
}

/// Loads the given page directory frame into CR3.
///
/// # Safety
///
/// The frame must hold a valid page directory that maps all memory the kernel is about to
/// touch, including the code performing the switch.
#[cfg(all(target_arch = "x86", not(test), not(feature = "software-emulation")))]
pub unsafe fn activate(directory: crate::PhysicalAddress) {
    // SAFETY: Caller guarantees the directory is valid.
    unsafe {
        core::arch::asm!(
            "mov cr3, {}",
            in(reg) directory.as_u32(),
            options(nostack, preserves_flags),
        );
    }
}

#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Virtual Memory Manager (VMM)
//!
//! The virtual memory manager owns the two-level paging structures of a 32-bit paged
//! kernel. It provides:
//!
//! - Hardware-exact page directory and page table layouts.
//! - Owned frame handles that make the transfer of page tables between address spaces
//!   an explicit move.
//! - A mapping protocol that allocates page tables lazily and reports how many extra
//!   frames it consumed.
//! - Software emulation for testing in non-kernel environments.
//!
//! Physical frames come from a [`FrameAllocator`] supplied by the caller; this crate never
//! allocates behind the caller's back.

extern crate alloc;

mod address;
mod arch;
mod frame;
mod page_directory;
mod page_table;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use frame::{AllocError, FrameAllocator, FrameBox, FrameLayout};
pub use page_directory::PageDirectory;
pub use page_table::PageTable;

pub use arch::{
    DIRECTORY_ENTRY_SPAN, ENTRY_COUNT, PAGE_SIZE, PageEntry, PageFlags, directory_index,
    page_index, table_index,
};

#[cfg(any(test, feature = "software-emulation"))]
pub use arch::{EmulatedMemory, active_directory};
#[cfg(any(test, feature = "software-emulation"))]
pub use frame::EmulatedFrameAllocator;

//! Page directories: the top level of the paging hierarchy.
//!
//! This module provides the `PageDirectory` type, which represents one address space's
//! complete translation state, and the mapping protocol that walks it, allocating page
//! tables as needed.

use crate::{
    FrameBox, PageTable, PhysicalAddress, VirtualAddress,
    address::AddressTranslator,
    arch::{self, PageEntry, PageFlags},
    frame::{AllocError, FrameAllocator, FrameLayout},
};

/// A page directory in its hardware layout.
///
/// Each present entry links one [`PageTable`], which covers 4 MiB of virtual address space.
/// The directory exclusively owns the tables it links: linking a table moves its handle in,
/// unlinking moves it back out.
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PageEntry; arch::ENTRY_COUNT],
}

const _: () = assert!(core::mem::size_of::<PageDirectory>() == arch::PAGE_SIZE);

// SAFETY: One frame in size and alignment (checked above), and all-zero entries are valid
// (not present).
unsafe impl FrameLayout for PageDirectory {}

impl PageDirectory {
    /// Allocates a zeroed page directory, the root of a new address space.
    pub fn create<A: FrameAllocator + ?Sized>(
        allocator: &mut A,
    ) -> Result<FrameBox<PageDirectory>, AllocError> {
        let directory = FrameBox::<PageDirectory>::new_zeroed(allocator)?;
        log::debug!("allocated page directory at {}", directory.frame());
        Ok(directory)
    }

    /// Returns the directory's own frame to the allocator.
    ///
    /// Page tables still linked by the directory are not freed; unlink them first, or use
    /// [`destroy_with_tables`](Self::destroy_with_tables).
    pub fn destroy<A: FrameAllocator + ?Sized>(
        directory: FrameBox<PageDirectory>,
        allocator: &mut A,
    ) {
        log::debug!("freeing page directory at {}", directory.frame());
        directory.free(allocator);
    }

    /// Frees every linked page table and then the directory itself.
    ///
    /// Frames mapped by the page tables are left alone. Returns the number of frames given
    /// back to the allocator, directory included.
    pub fn destroy_with_tables<A: FrameAllocator + ?Sized>(
        mut directory: FrameBox<PageDirectory>,
        allocator: &mut A,
    ) -> usize {
        let mut released = 0;
        for index in 0..arch::ENTRY_COUNT {
            if let Some(table) = directory.unmap_page_table_index(index, PageFlags::empty()) {
                PageTable::destroy(table, allocator);
                released += 1;
            }
        }

        Self::destroy(directory, allocator);
        released + 1
    }

    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < arch::ENTRY_COUNT, "page directory index out of bounds");
        self.entries[index]
    }

    fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < arch::ENTRY_COUNT, "page directory index out of bounds");
        &mut self.entries[index]
    }

    /// Links `table` at directory slot `index`.
    ///
    /// The present bit is always set. The directory takes ownership of the table. If the
    /// slot already linked a table, that table is unlinked and handed back to the caller.
    pub fn map_page_table_index(
        &mut self,
        index: usize,
        table: FrameBox<PageTable>,
        flags: PageFlags,
    ) -> Option<FrameBox<PageTable>> {
        let entry = self.entry_mut(index);
        let previous = entry.address();
        *entry = PageEntry::new(table.into_frame(), flags | PageFlags::PRESENT);

        previous.map(|frame| {
            log::trace!("page directory slot {index}: displaced page table at {frame}");
            // SAFETY: The slot was the table's only owner and has just been overwritten.
            unsafe { FrameBox::from_frame(frame) }
        })
    }

    /// Unlinks the page table at directory slot `index` and returns ownership of it.
    ///
    /// Returns None if the slot was not present. `flags` is recorded for the caller's
    /// bookkeeping only; it is not compared against the entry.
    pub fn unmap_page_table_index(
        &mut self,
        index: usize,
        flags: PageFlags,
    ) -> Option<FrameBox<PageTable>> {
        let entry = self.entry_mut(index);
        let frame = entry.address()?;
        entry.clear();
        log::trace!("page directory slot {index}: unlinked page table at {frame} ({flags:?})");

        // SAFETY: The slot was the table's only owner and has just been cleared.
        Some(unsafe { FrameBox::from_frame(frame) })
    }

    /// Returns the page table linked at `index` and the directory entry's flags.
    pub fn get_page_table_index(&self, index: usize) -> Option<(&PageTable, PageFlags)> {
        let entry = self.entry(index);
        let frame = entry.address()?;
        // SAFETY: A present entry links a page table owned by this directory, and the
        // borrow of self keeps it linked for the lifetime of the reference.
        let table = unsafe { &*Self::table_ptr(frame) };
        Some((table, entry.flags()))
    }

    /// Returns the page table linked at `index` mutably, with the directory entry's flags.
    pub fn get_page_table_index_mut(
        &mut self,
        index: usize,
    ) -> Option<(&mut PageTable, PageFlags)> {
        let entry = self.entry(index);
        let frame = entry.address()?;
        // SAFETY: As in get_page_table_index; &mut self makes the access exclusive because
        // the table is linked in no other slot.
        let table = unsafe { &mut *Self::table_ptr(frame) };
        Some((table, entry.flags()))
    }

    /// Links `table` at the slot covering `vaddr`; see
    /// [`map_page_table_index`](Self::map_page_table_index).
    pub fn map_page_table(
        &mut self,
        vaddr: VirtualAddress,
        table: FrameBox<PageTable>,
        flags: PageFlags,
    ) -> Option<FrameBox<PageTable>> {
        self.map_page_table_index(vaddr.directory_index(), table, flags)
    }

    /// Unlinks the table covering `vaddr`; see
    /// [`unmap_page_table_index`](Self::unmap_page_table_index).
    pub fn unmap_page_table(
        &mut self,
        vaddr: VirtualAddress,
        flags: PageFlags,
    ) -> Option<FrameBox<PageTable>> {
        self.unmap_page_table_index(vaddr.directory_index(), flags)
    }

    /// Returns the table covering `vaddr`; see
    /// [`get_page_table_index`](Self::get_page_table_index).
    pub fn get_page_table(&self, vaddr: VirtualAddress) -> Option<(&PageTable, PageFlags)> {
        self.get_page_table_index(vaddr.directory_index())
    }

    /// Returns the table covering `vaddr` mutably; see
    /// [`get_page_table_index_mut`](Self::get_page_table_index_mut).
    pub fn get_page_table_mut(
        &mut self,
        vaddr: VirtualAddress,
    ) -> Option<(&mut PageTable, PageFlags)> {
        self.get_page_table_index_mut(vaddr.directory_index())
    }

    /// Maps the page containing `vaddr` to `paddr`.
    ///
    /// If no page table covers `vaddr` yet, one is allocated and linked with the access
    /// bits the mapping needs. When the table already exists, missing writable or user bits
    /// are added to its directory entry, since the hardware checks both levels.
    ///
    /// Returns the number of extra frames consumed: 1 when a page table was allocated,
    /// 0 otherwise. On allocation failure the directory is left unchanged. A present leaf
    /// mapping is silently replaced.
    pub fn map<A: FrameAllocator + ?Sized>(
        &mut self,
        vaddr: VirtualAddress,
        paddr: PhysicalAddress,
        flags: PageFlags,
        allocator: &mut A,
    ) -> Result<usize, AllocError> {
        let required = flags.directory_requirements();
        let entry = self.entry_mut(vaddr.directory_index());

        let (table_frame, extra_pages) = match entry.address() {
            Some(frame) => {
                let granted = entry.flags();
                if !granted.contains(required) {
                    entry.set_flags(granted | required);
                }
                (frame, 0)
            }
            None => {
                let table = PageTable::create(allocator).inspect_err(|_| {
                    log::warn!("cannot map {vaddr}: no frame left for a page table");
                })?;
                let frame = table.into_frame();
                *entry = PageEntry::new(frame, required);
                (frame, 1)
            }
        };

        // SAFETY: The entry now links this table, which the directory owns exclusively,
        // and &mut self keeps the access exclusive.
        let table = unsafe { &mut *Self::table_ptr(table_frame) };
        table.map_page_index(vaddr.table_index(), paddr, flags);
        log::trace!("mapped {vaddr} -> {paddr} ({flags:?}), {extra_pages} extra page(s)");

        Ok(extra_pages)
    }

    /// Removes the leaf mapping of the page containing `vaddr`.
    ///
    /// Returns the frame that was mapped, or None if nothing was. The page table stays
    /// linked even if it becomes empty.
    pub fn unmap(&mut self, vaddr: VirtualAddress, flags: PageFlags) -> Option<PhysicalAddress> {
        let (table, _) = self.get_page_table_mut(vaddr)?;
        table.unmap_page(vaddr, flags)
    }

    /// Translates `vaddr` to the physical address it maps to.
    ///
    /// Returns the physical address (frame plus in-page offset) and the leaf entry's flags,
    /// or None if either level is not present.
    pub fn translate(&self, vaddr: VirtualAddress) -> Option<(PhysicalAddress, PageFlags)> {
        let (table, _) = self.get_page_table(vaddr)?;
        let (frame, flags) = table.get_page(vaddr)?;
        Some((frame + vaddr.page_offset() as u32, flags))
    }

    /// Installs `directory` as the active address space.
    ///
    /// # Safety
    ///
    /// The directory must map everything the kernel touches after the switch, including the
    /// currently executing code and stack.
    #[cfg(any(target_arch = "x86", test, feature = "software-emulation"))]
    pub unsafe fn activate(directory: &FrameBox<PageDirectory>) {
        log::debug!("activating page directory at {}", directory.frame());
        // SAFETY: Forwarded to the caller.
        unsafe { arch::activate(directory.frame()) };
    }

    fn table_ptr(frame: PhysicalAddress) -> *mut PageTable {
        AddressTranslator::current().phys_to_ptr(frame)
    }
}

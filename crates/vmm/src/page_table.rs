//! Page tables: the leaf level of the paging hierarchy.
//!
//! A page table holds 1024 entries, each mapping one 4 KiB virtual page to a physical
//! frame. The table itself lives in exactly one frame, so it can be installed in a page
//! directory entry by physical address.

use crate::{
    FrameBox, PhysicalAddress, VirtualAddress,
    arch::{self, PageEntry, PageFlags},
    frame::{AllocError, FrameAllocator, FrameLayout},
};

/// A page table in its hardware layout.
///
/// Instances only ever exist inside a frame; they are created with [`PageTable::create`] and
/// reached through a [`FrameBox`] or through the page directory that links them.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; arch::ENTRY_COUNT],
}

const _: () = assert!(core::mem::size_of::<PageTable>() == arch::PAGE_SIZE);

// SAFETY: One frame in size and alignment (checked above), and all-zero entries are valid
// (not present).
unsafe impl FrameLayout for PageTable {}

impl PageTable {
    /// Allocates a zeroed page table from the given allocator.
    ///
    /// All entries are initially not present.
    pub fn create<A: FrameAllocator + ?Sized>(
        allocator: &mut A,
    ) -> Result<FrameBox<PageTable>, AllocError> {
        let table = FrameBox::<PageTable>::new_zeroed(allocator)?;
        log::debug!("allocated page table at {}", table.frame());
        Ok(table)
    }

    /// Returns the table's frame to the allocator.
    ///
    /// The table must already be detached from any page directory, which owning the handle
    /// guarantees. Frames mapped by the table's entries are not freed.
    pub fn destroy<A: FrameAllocator + ?Sized>(table: FrameBox<PageTable>, allocator: &mut A) {
        log::debug!("freeing page table at {}", table.frame());
        table.free(allocator);
    }

    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < arch::ENTRY_COUNT, "page table index out of bounds");
        self.entries[index]
    }

    /// Returns a mutable reference to the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < arch::ENTRY_COUNT, "page table index out of bounds");
        &mut self.entries[index]
    }

    /// Maps the page at `index` to `paddr`.
    ///
    /// The present bit is always set. An entry that is already present is replaced; callers
    /// that must not clobber a mapping check with [`get_page_index`](Self::get_page_index)
    /// first.
    pub fn map_page_index(&mut self, index: usize, paddr: PhysicalAddress, flags: PageFlags) {
        let entry = self.entry_mut(index);
        if let Some(old) = entry.address() {
            log::trace!("page table slot {index}: replacing {old} with {paddr}");
        }
        *entry = PageEntry::new(paddr, flags | PageFlags::PRESENT);
    }

    /// Unmaps the page at `index`, returning the frame it mapped.
    ///
    /// Returns None if the entry was not present. `flags` is recorded for the caller's
    /// bookkeeping only; it is not compared against the entry.
    pub fn unmap_page_index(&mut self, index: usize, flags: PageFlags) -> Option<PhysicalAddress> {
        let entry = self.entry_mut(index);
        let paddr = entry.address()?;
        entry.clear();
        log::trace!("page table slot {index}: unmapped {paddr} ({flags:?})");
        Some(paddr)
    }

    /// Returns the frame and flags mapped at `index`, or None if the entry is not present.
    pub fn get_page_index(&self, index: usize) -> Option<(PhysicalAddress, PageFlags)> {
        let entry = self.entry(index);
        entry.address().map(|paddr| (paddr, entry.flags()))
    }

    /// Maps the page containing `vaddr`; see [`map_page_index`](Self::map_page_index).
    pub fn map_page(&mut self, vaddr: VirtualAddress, paddr: PhysicalAddress, flags: PageFlags) {
        self.map_page_index(vaddr.table_index(), paddr, flags);
    }

    /// Unmaps the page containing `vaddr`; see [`unmap_page_index`](Self::unmap_page_index).
    pub fn unmap_page(
        &mut self,
        vaddr: VirtualAddress,
        flags: PageFlags,
    ) -> Option<PhysicalAddress> {
        self.unmap_page_index(vaddr.table_index(), flags)
    }

    /// Looks up the page containing `vaddr`; see [`get_page_index`](Self::get_page_index).
    pub fn get_page(&self, vaddr: VirtualAddress) -> Option<(PhysicalAddress, PageFlags)> {
        self.get_page_index(vaddr.table_index())
    }

    /// Iterates over present entries as `(index, frame, flags)`.
    pub fn mappings(&self) -> impl Iterator<Item = (usize, PhysicalAddress, PageFlags)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.address().map(|paddr| (index, paddr, entry.flags())))
    }

    /// Returns true if no entry is present.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|entry| !entry.is_present())
    }

    /// Returns the number of entries in a page table.
    pub const fn len(&self) -> usize {
        arch::ENTRY_COUNT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressTranslator, EmulatedFrameAllocator};

    fn setup() -> EmulatedFrameAllocator {
        AddressTranslator::set_current(AddressTranslator::emulated(
            PhysicalAddress::new(0x0010_0000),
            16,
        ));
        EmulatedFrameAllocator::new()
    }

    #[test]
    fn create_yields_empty_table() {
        let mut allocator = setup();
        let table = PageTable::create(&mut allocator).unwrap();

        assert!(table.is_empty());
        assert_eq!(table.len(), 1024);
        assert_eq!(table.frame(), PhysicalAddress::new(0x0010_0000));
        assert_eq!(allocator.allocated_frames(), 1);
    }

    #[test]
    fn create_fails_without_frames() {
        let _ = setup();
        let mut allocator = EmulatedFrameAllocator::with_limit(0);

        assert_eq!(
            PageTable::create(&mut allocator).err(),
            Some(AllocError::OutOfMemory)
        );
    }

    #[test]
    fn destroy_returns_frame() {
        let mut allocator = setup();
        let table = PageTable::create(&mut allocator).unwrap();
        PageTable::destroy(table, &mut allocator);

        assert_eq!(allocator.allocated_frames(), 0);
    }

    #[test]
    fn map_then_get_round_trip() {
        let mut allocator = setup();
        let mut table = PageTable::create(&mut allocator).unwrap();

        let flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
        table.map_page_index(5, PhysicalAddress::new(0x5000), flags);

        assert_eq!(
            table.get_page_index(5),
            Some((PhysicalAddress::new(0x5000), flags))
        );
        assert_eq!(table.get_page_index(4), None);
    }

    #[test]
    fn map_forces_present() {
        let mut allocator = setup();
        let mut table = PageTable::create(&mut allocator).unwrap();

        table.map_page_index(0, PhysicalAddress::new(0x7000), PageFlags::WRITABLE);

        assert_eq!(
            table.get_page_index(0),
            Some((
                PhysicalAddress::new(0x7000),
                PageFlags::PRESENT | PageFlags::WRITABLE
            ))
        );
    }

    #[test]
    fn map_overwrites_present_entry() {
        let mut allocator = setup();
        let mut table = PageTable::create(&mut allocator).unwrap();

        table.map_page_index(9, PhysicalAddress::new(0x5000), PageFlags::WRITABLE);
        table.map_page_index(9, PhysicalAddress::new(0x9000), PageFlags::USER);

        assert_eq!(
            table.get_page_index(9),
            Some((
                PhysicalAddress::new(0x9000),
                PageFlags::PRESENT | PageFlags::USER
            ))
        );
    }

    #[test]
    fn unmap_returns_mapped_frame() {
        let mut allocator = setup();
        let mut table = PageTable::create(&mut allocator).unwrap();

        table.map_page_index(1023, PhysicalAddress::new(0xFFFF_F000), PageFlags::PRESENT);

        assert_eq!(
            table.unmap_page_index(1023, PageFlags::PRESENT),
            Some(PhysicalAddress::new(0xFFFF_F000))
        );
        assert_eq!(table.get_page_index(1023), None);
        assert!(table.is_empty());
    }

    #[test]
    fn unmap_absent_entry_reports_none() {
        let mut allocator = setup();
        let mut table = PageTable::create(&mut allocator).unwrap();

        assert_eq!(table.unmap_page_index(3, PageFlags::empty()), None);
    }

    #[test]
    fn unmap_ignores_flag_argument() {
        let mut allocator = setup();
        let mut table = PageTable::create(&mut allocator).unwrap();

        table.map_page_index(2, PhysicalAddress::new(0x3000), PageFlags::WRITABLE);

        // Flags that do not match the entry still unmap it.
        assert_eq!(
            table.unmap_page_index(2, PageFlags::USER),
            Some(PhysicalAddress::new(0x3000))
        );
    }

    #[test]
    fn virtual_address_variants_use_table_index() {
        let mut allocator = setup();
        let mut table = PageTable::create(&mut allocator).unwrap();

        let vaddr = VirtualAddress::new(0xC000_2ABC);
        table.map_page(vaddr, PhysicalAddress::new(0x8000), PageFlags::PRESENT);

        assert_eq!(
            table.get_page_index(2),
            Some((PhysicalAddress::new(0x8000), PageFlags::PRESENT))
        );
        assert_eq!(
            table.get_page(VirtualAddress::new(0x0000_2000)),
            Some((PhysicalAddress::new(0x8000), PageFlags::PRESENT))
        );
        assert_eq!(
            table.unmap_page(vaddr, PageFlags::PRESENT),
            Some(PhysicalAddress::new(0x8000))
        );
    }

    #[test]
    fn mappings_lists_present_entries() {
        let mut allocator = setup();
        let mut table = PageTable::create(&mut allocator).unwrap();

        table.map_page_index(1, PhysicalAddress::new(0x1000), PageFlags::PRESENT);
        table.map_page_index(7, PhysicalAddress::new(0x7000), PageFlags::WRITABLE);

        let found: Vec<_> = table.mappings().collect();
        assert_eq!(
            found,
            vec![
                (1, PhysicalAddress::new(0x1000), PageFlags::PRESENT),
                (
                    7,
                    PhysicalAddress::new(0x7000),
                    PageFlags::PRESENT | PageFlags::WRITABLE
                ),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "page table index out of bounds")]
    fn index_out_of_bounds_panics() {
        let mut allocator = setup();
        let table = PageTable::create(&mut allocator).unwrap();
        table.get_page_index(1024);
    }
}

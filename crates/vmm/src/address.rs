//! Address types for physical and virtual memory management.
//!
//! This module provides wrappers around 32-bit physical and virtual addresses, the
//! decomposition of virtual addresses into paging-structure indices, and the translator
//! that turns a physical frame into something the kernel can dereference.

use core::fmt;
use core::ops::{Add, Sub};

use crate::arch;

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// Address translator for converting physical addresses into dereferenceable pointers.
///
/// Paging structures are referenced by physical frame, but the kernel can only write them
/// through a virtual address. This enum supports two modes:
/// - Hardware: Uses a direct-map offset for translation (kernel mode)
/// - Emulated: Uses an emulated memory buffer for translation (testing mode)
pub enum AddressTranslator {
    /// Hardware translation using a direct-map offset.
    Hardware { direct_map_offset: usize },
    /// Emulated translation using a simulated memory region.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a new hardware translator with the given direct-map offset.
    ///
    /// An identity-mapped kernel uses an offset of zero.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// Creates a new emulated translator covering `frames` frames starting at `base`.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(base: PhysicalAddress, frames: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(base, frames))
    }

    /// Sets the global address translator.
    ///
    /// This function must be called exactly once during initialization.
    ///
    /// # Panics
    ///
    /// Panics if the translator has already been set.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            if ADDRESS_TRANSLATOR.get().is_some() {
                panic!("address translator already set");
            }
            ADDRESS_TRANSLATOR.call_once(|| translator);
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                if t.get().is_some() {
                    panic!("address translator already set");
                }
                t.call_once(|| translator);
            });
        }
    }

    /// Returns a reference to the current global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has not been set yet.
    pub fn current() -> &'static AddressTranslator {
        Self::try_current().expect(
            "address translator not set; call AddressTranslator::set_current during initialization",
        )
    }

    /// Returns a reference to the current global address translator if it has been set.
    pub fn try_current() -> Option<&'static AddressTranslator> {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            ADDRESS_TRANSLATOR.get()
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                t.get().map(|translator| {
                    // SAFETY: We leak the reference to make it 'static. Each thread has its
                    // own ADDRESS_TRANSLATOR, it is never modified once set, and the
                    // thread-local lives for the entire duration of the thread.
                    unsafe { &*(translator as *const AddressTranslator) }
                })
            })
        }
    }

    /// Translates a physical address to a virtual address.
    pub fn phys_to_virt(&self, phys: PhysicalAddress) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => {
                phys.as_usize().wrapping_add(*direct_map_offset)
            }
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.translate(phys.as_u32()) as usize,
        }
    }

    /// Translates a virtual address to a physical address.
    pub fn virt_to_phys(&self, virt: usize) -> PhysicalAddress {
        match self {
            Self::Hardware { direct_map_offset } => {
                PhysicalAddress::new(virt.wrapping_sub(*direct_map_offset) as u32)
            }
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => PhysicalAddress::new(mem.ptr_to_phys(virt as *const u8)),
        }
    }

    /// Translates a physical address to a typed pointer.
    pub fn phys_to_ptr<T>(&self, phys: PhysicalAddress) -> *mut T {
        self.phys_to_virt(phys) as *mut T
    }

    /// Translates a pointer to a physical address.
    pub fn ptr_to_phys<T>(&self, ptr: *const T) -> PhysicalAddress {
        self.virt_to_phys(ptr as usize)
    }

    /// Returns the emulated memory behind this translator, if it is an emulated one.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated_memory(&self) -> Option<&EmulatedMemory> {
        match self {
            Self::Hardware { .. } => None,
            Self::Emulated(mem) => Some(mem),
        }
    }
}

/// Global address translator.
///
/// This is initialized once during kernel initialization (with Hardware variant).
/// In test/software-emulation mode, this is thread-local to allow each test to have its own
/// emulated memory space.
#[cfg(not(any(test, feature = "software-emulation")))]
static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();
}

/// Macro to define common address type functionality.
///
/// Physical and virtual addresses are both plain 32-bit values on this architecture; every
/// value is valid, so construction never fails.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: u32) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            /// Returns the raw address value widened to `usize`.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 as usize & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self((self.0 as usize & !(align - 1)) as u32)
            }

            /// Aligns the address up to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two, or if the result does not fit in
            /// 32 bits.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                let aligned = (self.0 as u64 + align as u64 - 1) & !(align as u64 - 1);
                assert!(aligned <= u32::MAX as u64, "address overflow");
                Self(aligned as u32)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#010x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(addr: u32) -> Self {
                Self::new(addr)
            }
        }

        impl From<$name> for u32 {
            #[inline]
            fn from(addr: $name) -> Self {
                addr.0
            }
        }

        impl Add<u32> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: u32) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<u32> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: u32) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = u32;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Frame addresses stored in paging structures are physical addresses aligned to\n\
     [`PAGE_SIZE`](crate::PAGE_SIZE)."
);

impl PhysicalAddress {
    /// Returns the address of the frame containing this address.
    #[inline]
    pub const fn frame_base(self) -> Self {
        self.align_down(arch::PAGE_SIZE)
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     A virtual address decomposes into a page directory index (bits 22-31), a page table\n\
     index (bits 12-21) and an in-page offset (bits 0-11). The decomposition is a pure\n\
     function of the value."
);

impl VirtualAddress {
    /// Builds a virtual address from its directory index, table index and in-page offset.
    ///
    /// # Panics
    ///
    /// Panics if either index is not below [`ENTRY_COUNT`](crate::ENTRY_COUNT) or the
    /// offset is not below [`PAGE_SIZE`](crate::PAGE_SIZE).
    #[inline]
    pub const fn from_indices(directory: usize, table: usize, offset: usize) -> Self {
        assert!(directory < arch::ENTRY_COUNT, "directory index out of bounds");
        assert!(table < arch::ENTRY_COUNT, "table index out of bounds");
        assert!(offset < arch::PAGE_SIZE, "page offset out of bounds");

        let shift = arch::PAGE_SHIFT;
        Self(
            ((directory as u32) << (shift + arch::INDEX_BITS))
                | ((table as u32) << shift)
                | offset as u32,
        )
    }

    /// Returns the offset within the 4 KiB page (bits 0-11).
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 as usize & (arch::PAGE_SIZE - 1)
    }

    /// Returns the paging-structure index at the specified level.
    ///
    /// Level 0 is the page table, level 1 the page directory.
    ///
    /// # Panics
    ///
    /// Panics if `level` is not 0 or 1.
    #[inline]
    pub const fn page_index(self, level: usize) -> usize {
        arch::page_index(self.0, level)
    }

    /// Returns the page directory index (bits 22-31).
    #[inline]
    pub const fn directory_index(self) -> usize {
        arch::directory_index(self.0)
    }

    /// Returns the page table index (bits 12-21).
    #[inline]
    pub const fn table_index(self) -> usize {
        arch::table_index(self.0)
    }

    /// Returns the address of the page containing this address.
    #[inline]
    pub const fn page_base(self) -> Self {
        self.align_down(arch::PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // PhysicalAddress tests
    mod physical_address {
        use super::*;

        #[test]
        fn new_and_as_u32() {
            let addr = PhysicalAddress::new(0x1234_5000);
            assert_eq!(addr.as_u32(), 0x1234_5000);
            assert_eq!(addr.as_usize(), 0x1234_5000);
        }

        #[test]
        fn max_address_is_valid() {
            let addr = PhysicalAddress::new(u32::MAX);
            assert_eq!(addr.as_u32(), u32::MAX);
        }

        #[test]
        fn alignment_check() {
            let addr = PhysicalAddress::new(0x5000);
            assert!(addr.is_aligned(arch::PAGE_SIZE));
            assert!(addr.is_aligned(1));
            assert!(!addr.is_aligned(arch::PAGE_SIZE * 2));
        }

        #[test]
        fn align_down_and_up() {
            let addr = PhysicalAddress::new(0x5123);
            assert_eq!(addr.align_down(arch::PAGE_SIZE), PhysicalAddress::new(0x5000));
            assert_eq!(addr.align_up(arch::PAGE_SIZE), PhysicalAddress::new(0x6000));
            assert_eq!(addr.frame_base(), PhysicalAddress::new(0x5000));
        }

        #[test]
        fn align_already_aligned() {
            let addr = PhysicalAddress::new(0x6000);
            assert_eq!(addr.align_down(arch::PAGE_SIZE), addr);
            assert_eq!(addr.align_up(arch::PAGE_SIZE), addr);
        }

        #[test]
        #[should_panic(expected = "address overflow")]
        fn align_up_overflow() {
            PhysicalAddress::new(0xFFFF_F001).align_up(arch::PAGE_SIZE);
        }

        #[test]
        fn arithmetic_operators() {
            let addr = PhysicalAddress::new(0x1000);
            assert_eq!((addr + 0x50).as_u32(), 0x1050);
            assert_eq!((addr - 0x50).as_u32(), 0x0FB0);
            assert_eq!(PhysicalAddress::new(0x2000) - addr, 0x1000);
        }

        #[test]
        fn debug_format() {
            let addr = PhysicalAddress::new(0x5000);
            assert_eq!(format!("{:?}", addr), "PhysicalAddress(0x00005000)");
            assert_eq!(format!("{}", addr), "0x00005000");
        }
    }

    // VirtualAddress tests
    mod virtual_address {
        use super::*;

        #[test]
        fn decomposes_into_indices() {
            let addr = VirtualAddress::new(0xC040_3123);
            assert_eq!(addr.directory_index(), 0x301);
            assert_eq!(addr.table_index(), 0x003);
            assert_eq!(addr.page_offset(), 0x123);
            assert_eq!(addr.page_index(1), addr.directory_index());
            assert_eq!(addr.page_index(0), addr.table_index());
        }

        #[test]
        fn decomposes_extremes() {
            let low = VirtualAddress::new(0);
            assert_eq!((low.directory_index(), low.table_index()), (0, 0));

            let high = VirtualAddress::new(u32::MAX);
            assert_eq!(high.directory_index(), 1023);
            assert_eq!(high.table_index(), 1023);
            assert_eq!(high.page_offset(), 0xFFF);
        }

        #[test]
        fn small_addresses_share_a_directory_slot() {
            assert_eq!(VirtualAddress::new(0x0000_1000).directory_index(), 0);
            assert_eq!(VirtualAddress::new(0x0000_1000).table_index(), 1);
            assert_eq!(VirtualAddress::new(0x0000_2000).table_index(), 2);
            assert_eq!(VirtualAddress::new(0x0040_0000).directory_index(), 1);
        }

        #[test]
        fn recombining_indices_restores_the_page() {
            for raw in [0u32, 0x1000, 0x0040_1FFF, 0x8000_0000, 0xC123_4567, 0xFFFF_FFFF] {
                let addr = VirtualAddress::new(raw);
                let page =
                    VirtualAddress::from_indices(addr.directory_index(), addr.table_index(), 0);
                assert_eq!(page, addr.page_base());

                let full = VirtualAddress::from_indices(
                    addr.directory_index(),
                    addr.table_index(),
                    addr.page_offset(),
                );
                assert_eq!(full, addr);
            }
        }

        #[test]
        #[should_panic(expected = "directory index out of bounds")]
        fn from_indices_rejects_large_directory() {
            VirtualAddress::from_indices(1024, 0, 0);
        }

        #[test]
        #[should_panic(expected = "level out of range")]
        fn page_index_rejects_third_level() {
            VirtualAddress::new(0).page_index(2);
        }
    }

    // Translator tests
    mod translator {
        use super::*;

        #[test]
        fn hardware_translation_round_trip() {
            let translator = AddressTranslator::hardware(0xC000_0000);
            let phys = PhysicalAddress::new(0x0012_3000);
            let virt = translator.phys_to_virt(phys);
            assert_eq!(virt, 0xC012_3000);
            assert_eq!(translator.virt_to_phys(virt), phys);
        }

        #[test]
        fn emulated_translation_round_trip() {
            let translator = AddressTranslator::emulated(PhysicalAddress::new(0x0010_0000), 4);
            let phys = PhysicalAddress::new(0x0010_3000);
            let ptr = translator.phys_to_ptr::<u32>(phys);
            assert_eq!(translator.ptr_to_phys(ptr), phys);
            assert!(translator.emulated_memory().is_some());
        }

        #[test]
        fn current_is_per_thread() {
            assert!(AddressTranslator::try_current().is_none());
            AddressTranslator::set_current(AddressTranslator::hardware(0));
            assert!(AddressTranslator::try_current().is_some());
        }

        #[test]
        #[should_panic(expected = "address translator already set")]
        fn panics_on_double_set() {
            AddressTranslator::set_current(AddressTranslator::hardware(0));
            AddressTranslator::set_current(AddressTranslator::hardware(0x1000));
        }
    }
}

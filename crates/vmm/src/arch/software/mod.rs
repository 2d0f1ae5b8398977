//! Software emulation backend for testing and development.
//!
//! Paging structures keep the exact 32-bit x86 layout; what is emulated is the physical
//! memory they live in and the page-table base register. This lets the whole crate run on
//! any host without touching real hardware.

use core::cell::{Cell, UnsafeCell};

use alloc::vec::Vec;

use crate::PhysicalAddress;

use super::x86::PAGE_SIZE;

/// One frame of emulated physical memory, aligned like a real frame.
#[repr(C, align(4096))]
struct EmulatedFrame([u8; PAGE_SIZE]);

/// Emulated physical memory.
///
/// Covers the physical range `base..base + frames * PAGE_SIZE`. Physical addresses inside
/// that range translate to pointers into a host buffer.
pub struct EmulatedMemory {
    /// Physical address of the first emulated frame.
    base: u32,
    /// Backing storage. Never resized, so pointers handed out stay valid.
    frames: Vec<UnsafeCell<EmulatedFrame>>,
}

impl EmulatedMemory {
    /// Creates emulated memory of `frames` frames starting at physical address `base`.
    ///
    /// # Panics
    ///
    /// Panics if `base` is not frame-aligned or the range does not fit in 32 bits.
    pub fn new(base: PhysicalAddress, frames: usize) -> Self {
        assert!(
            base.is_aligned(PAGE_SIZE),
            "emulated memory base must be frame-aligned"
        );
        assert!(
            base.as_u32() as u64 + (frames * PAGE_SIZE) as u64 <= 1 << 32,
            "emulated memory exceeds the 32-bit physical address space"
        );

        Self {
            base: base.as_u32(),
            frames: (0..frames)
                .map(|_| UnsafeCell::new(EmulatedFrame([0; PAGE_SIZE])))
                .collect(),
        }
    }

    /// Returns the physical address of the first emulated frame.
    pub fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// Returns the number of emulated frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns the size of the emulated memory region in bytes.
    pub fn size(&self) -> usize {
        self.frames.len() * PAGE_SIZE
    }

    /// Returns whether the physical address lies inside emulated memory.
    pub fn contains(&self, phys: u32) -> bool {
        phys >= self.base && ((phys - self.base) as usize) < self.size()
    }

    /// Translates a physical address to a pointer into the buffer.
    pub fn translate(&self, phys: u32) -> *mut u8 {
        assert!(self.contains(phys), "physical address out of bounds");
        let offset = (phys - self.base) as usize;
        let start = UnsafeCell::raw_get(self.frames.as_ptr()) as *mut u8;
        // SAFETY: offset is within the buffer, checked above.
        unsafe { start.add(offset) }
    }

    /// Translates a pointer into the buffer back to a physical address.
    pub fn ptr_to_phys(&self, ptr: *const u8) -> u32 {
        let start = self.frames.as_ptr() as usize;
        let addr = ptr as usize;
        assert!(
            addr >= start && addr - start < self.size(),
            "pointer not within emulated memory"
        );
        self.base + (addr - start) as u32
    }
}

std::thread_local! {
    static ACTIVE_DIRECTORY: Cell<Option<PhysicalAddress>> = const { Cell::new(None) };
}

/// Records the given page directory frame as the emulated page-table base.
///
/// # Safety
///
/// Nothing can go wrong in emulation; the function is unsafe to keep the signature
/// identical to the hardware version.
pub unsafe fn activate(directory: PhysicalAddress) {
    ACTIVE_DIRECTORY.with(|active| active.set(Some(directory)));
}

/// Returns the frame of the page directory most recently activated on this thread.
pub fn active_directory() -> Option<PhysicalAddress> {
    ACTIVE_DIRECTORY.with(|active| active.get())
}

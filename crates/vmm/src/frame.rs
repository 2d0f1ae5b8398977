//! Physical frames backing paging structures.
//!
//! This module defines the seam to the physical frame allocator ([`FrameAllocator`]) and the
//! owned handle ([`FrameBox`]) through which a paging structure living in one frame is
//! created, borrowed, moved between owners and finally released.

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::{PhysicalAddress, address::AddressTranslator, arch};

/// Errors that can occur while obtaining frames for paging structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The frame allocator has no frame left to give.
    OutOfMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of physical frames"),
        }
    }
}

impl core::error::Error for AllocError {}

/// Source of physical frames.
///
/// The virtual memory manager never decides where frames come from; it asks for exactly one
/// frame per paging structure it creates, and hands frames back only when told to destroy a
/// structure.
pub trait FrameAllocator {
    /// Allocates one [`PAGE_SIZE`](crate::PAGE_SIZE)-aligned frame, or returns None if none
    /// is available.
    fn allocate_frame(&mut self) -> Option<PhysicalAddress>;

    /// Returns a frame previously obtained from [`allocate_frame`](Self::allocate_frame).
    fn free_frame(&mut self, frame: PhysicalAddress);
}

/// A type whose in-memory layout occupies exactly one frame.
///
/// # Safety
///
/// Implementors must be exactly [`PAGE_SIZE`](crate::PAGE_SIZE) bytes, have an alignment no
/// greater than a frame, and be valid when every byte is zero.
pub unsafe trait FrameLayout {}

/// An owned paging structure stored in one physical frame.
///
/// The handle couples the frame's physical address with a typed pointer to its contents.
/// It is deliberately neither `Clone` nor freeing on drop: the frame goes back to the
/// allocator only through [`FrameBox::free`], and handing the structure to another owner is
/// a move. Dropping a handle without freeing it leaks the frame, which is also what happens
/// when a page table is linked into a directory.
pub struct FrameBox<T: FrameLayout> {
    frame: PhysicalAddress,
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

// SAFETY: A FrameBox is the unique owner of its frame's contents.
unsafe impl<T: FrameLayout + Send> Send for FrameBox<T> {}
// SAFETY: Shared access only hands out &T.
unsafe impl<T: FrameLayout + Sync> Sync for FrameBox<T> {}

impl<T: FrameLayout> FrameBox<T> {
    /// Allocates one frame and zeroes it.
    ///
    /// On failure no frame is held and the allocator is left as it was.
    pub fn new_zeroed<A: FrameAllocator + ?Sized>(allocator: &mut A) -> Result<Self, AllocError> {
        let frame = allocator.allocate_frame().ok_or(AllocError::OutOfMemory)?;
        debug_assert!(
            frame.is_aligned(arch::PAGE_SIZE),
            "frame allocator returned an unaligned frame"
        );

        // SAFETY: The frame was just handed to us by the allocator, so nothing else owns it.
        let this = unsafe { Self::from_frame(frame) };
        // SAFETY: The pointer covers one whole frame and T is valid when zeroed.
        unsafe { this.ptr.as_ptr().write_bytes(0, 1) };
        Ok(this)
    }

    /// Reconstructs a handle from a frame address.
    ///
    /// # Safety
    ///
    /// The frame must contain a valid `T` and the caller must be its only owner; no other
    /// `FrameBox` or present paging entry may still refer to it as owned.
    ///
    /// # Panics
    ///
    /// Panics if the frame translates to a null pointer, as frame 0 does under an
    /// identity-mapped translator.
    pub unsafe fn from_frame(frame: PhysicalAddress) -> Self {
        let raw = AddressTranslator::current().phys_to_ptr::<T>(frame);
        let ptr = NonNull::new(raw).expect("frame translates to a null pointer");
        Self {
            frame,
            ptr,
            _marker: PhantomData,
        }
    }

    /// Gives up ownership, returning the frame address without freeing it.
    pub fn into_frame(self) -> PhysicalAddress {
        self.frame
    }

    /// Returns the physical address of the frame.
    pub fn frame(&self) -> PhysicalAddress {
        self.frame
    }

    /// Returns the frame to the allocator.
    pub fn free<A: FrameAllocator + ?Sized>(self, allocator: &mut A) {
        allocator.free_frame(self.into_frame());
    }
}

impl<T: FrameLayout> Deref for FrameBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The handle owns the frame, which holds a valid T.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: FrameLayout> DerefMut for FrameBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: As above, and &mut self makes the access exclusive.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: FrameLayout> fmt::Debug for FrameBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBox")
            .field("type", &core::any::type_name::<T>())
            .field("frame", &self.frame)
            .finish()
    }
}

/// Frame allocator over emulated physical memory.
///
/// Hands out frames of the current thread's emulated memory in ascending order, reusing
/// freed frames first. An optional limit caps the number of frames outstanding at once,
/// which is how tests provoke exhaustion.
#[cfg(any(test, feature = "software-emulation"))]
pub struct EmulatedFrameAllocator {
    next: u64,
    end: u64,
    free: alloc::vec::Vec<PhysicalAddress>,
    limit: usize,
    outstanding: usize,
}

#[cfg(any(test, feature = "software-emulation"))]
impl EmulatedFrameAllocator {
    /// Creates an allocator covering all of the current thread's emulated memory.
    ///
    /// # Panics
    ///
    /// Panics if the current translator is not an emulated one.
    pub fn new() -> Self {
        let memory = AddressTranslator::current()
            .emulated_memory()
            .expect("emulated frame allocator requires an emulated address translator");
        let base = memory.base().as_u32() as u64;
        Self {
            next: base,
            end: base + memory.size() as u64,
            free: alloc::vec::Vec::new(),
            limit: usize::MAX,
            outstanding: 0,
        }
    }

    /// Creates an allocator that hands out at most `limit` frames at a time.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::new()
        }
    }

    /// Returns the number of frames currently allocated and not yet freed.
    pub fn allocated_frames(&self) -> usize {
        self.outstanding
    }
}

#[cfg(any(test, feature = "software-emulation"))]
impl Default for EmulatedFrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "software-emulation"))]
impl FrameAllocator for EmulatedFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysicalAddress> {
        if self.outstanding >= self.limit {
            return None;
        }

        let frame = match self.free.pop() {
            Some(frame) => frame,
            None if self.next < self.end => {
                let frame = PhysicalAddress::new(self.next as u32);
                self.next += arch::PAGE_SIZE as u64;
                frame
            }
            None => return None,
        };

        self.outstanding += 1;
        Some(frame)
    }

    fn free_frame(&mut self, frame: PhysicalAddress) {
        debug_assert!(
            (frame.as_u32() as u64) < self.next && !self.free.contains(&frame),
            "freeing a frame that is not allocated"
        );
        self.outstanding -= 1;
        self.free.push(frame);
    }
}

//! Page table entry flags for 32-bit x86.

bitflags::bitflags! {
    /// Access flags stored in the low 12 bits of a page directory or page table entry.
    ///
    /// The bit positions are the hardware's. Bits without a named constant (accessed,
    /// dirty, caching controls) are retained when decoding an entry so that a read followed
    /// by a write never loses state set by the CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PageFlags: u32 {
        /// The entry designates a valid frame.
        const PRESENT = 1 << 0;
        /// Writes are allowed through this entry.
        const WRITABLE = 1 << 1;
        /// Ring 3 may access memory through this entry.
        const USER = 1 << 2;
    }
}

impl PageFlags {
    /// Returns whether the present bit is set.
    pub const fn is_present(self) -> bool {
        self.contains(Self::PRESENT)
    }

    /// Returns whether the writable bit is set.
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Returns whether the user-accessible bit is set.
    pub const fn is_user(self) -> bool {
        self.contains(Self::USER)
    }

    /// Returns the subset of these flags that must also be granted by a page directory
    /// entry for the access to be allowed through the page table below it.
    pub const fn directory_requirements(self) -> Self {
        self.intersection(Self::WRITABLE.union(Self::USER))
            .union(Self::PRESENT)
    }
}

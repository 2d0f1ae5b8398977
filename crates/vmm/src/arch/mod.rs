//! Architecture-specific implementations for memory management.
//!
//! The paging layout is always the 32-bit x86 one. Activation of a page directory either
//! writes the real CR3 register or, when testing or emulating, an emulated one.

mod x86;
pub use x86::*;

// Use software emulation ONLY when:
// - Running tests, OR
// - software-emulation feature is explicitly enabled
#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::*;

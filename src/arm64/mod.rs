//! AArch64 architecture-specific components: AAPCS64 register classes and text emission.
//!
//! There is no binary encoder for this target; translation requests for bytes fail with an
//! unsupported-operation error.

pub mod printer;
pub mod registers;

//! x86-64 architecture-specific components.
//!
//! This module contains all x86-64 specific code:
//! - System V register numbering and classes
//! - Intel-syntax text emission
//! - Instruction encoding using iced-x86

pub mod encoder;
pub mod printer;
pub mod registers;

pub use encoder::{EncodingError, X64Encoder as Encoder};

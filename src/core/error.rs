// This module defines error types for the backend using the thiserror crate for idiomatic
// Rust error handling. CompileError is the main error enum covering the failure classes of
// lowering: internal consistency failures (malformed tree shapes, missing labels or loop
// registrations, operators in positions where they cannot appear), duplicate declarations
// in the symbol table, unresolved source constructs that survived resolution, register
// allocation failures, operations an architecture cannot express, calls exceeding the
// register argument limit, and binary encoding failures. Each variant carries the context
// needed to diagnose the failure. CompileResult<T> is the convenience alias used across the
// crate so errors propagate with the question mark operator.

//! Error types for the backend.
//!
//! Using thiserror for more idiomatic error handling.

use crate::core::config::Architecture;
use crate::core::register_file::RegAllocError;
use crate::x64::encoder::EncodingError;
use thiserror::Error;

/// Main error type for lowering and translation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Internal consistency failure: {reason}")]
    InternalConsistency {
        reason: String,
    },

    #[error("{kind} '{name}' is already declared in this context")]
    Declaration {
        kind: &'static str,
        name: String,
    },

    #[error("{count} unresolved construct(s) remain")]
    Unresolved {
        count: usize,
    },

    #[error("Register allocation failed: {reason}")]
    RegisterAllocation {
        reason: String,
    },

    #[error("Operation '{operation}' is not supported on {architecture}")]
    Unsupported {
        operation: String,
        architecture: Architecture,
    },

    #[error("Call to '{function}' passes {count} arguments, at most {limit} are supported")]
    TooManyArguments {
        function: String,
        count: usize,
        limit: usize,
    },

    #[error("Encoding failed: {0}")]
    Encoding(#[from] EncodingError),
}

impl CompileError {
    /// Shorthand for the internal consistency variant.
    pub fn internal(reason: impl Into<String>) -> Self {
        CompileError::InternalConsistency {
            reason: reason.into(),
        }
    }
}

impl From<RegAllocError> for CompileError {
    fn from(error: RegAllocError) -> Self {
        CompileError::RegisterAllocation {
            reason: error.to_string(),
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

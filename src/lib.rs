//! Vivid backend - lowering of resolved syntax trees to machine code.
//!
//! The backend takes a resolved, typed syntax tree together with its context tree and
//! produces x86-64 or AArch64 assembly text, plus x86-64 machine code on request.
//!
//! # Primary Usage
//!
//! ```ignore
//! use vivid_backend::backend::{compile_functions, prepare, FunctionSource};
//! use vivid_backend::core::{Architecture, BackendConfig};
//! use std::sync::Arc;
//!
//! prepare(&mut tree, &mut contexts, function, body)?;
//! let sources = vec![FunctionSource { function, tree, body }];
//! let config = BackendConfig::new(Architecture::X64);
//! let output = compile_functions(sources, Arc::new(contexts), config, false);
//! println!("{}", output.functions[0].text);
//! ```
//!
//! # Architecture
//!
//! - [`ast`] - Syntax tree arena and node kinds
//! - [`context`] - Symbol table and name mangling
//! - [`resolve`] - Resolution, constant folding and dead-branch elimination
//! - [`assembler`] - Per-function Unit, instructions, builders and translation
//! - [`core`] - Shared infrastructure (configuration, errors, registers, sessions, phases)
//! - [`x64`], [`arm64`] - Architecture registers, printers and the x86-64 encoder
//! - [`backend`] - Driver over whole functions

pub mod arm64;
pub mod assembler;
pub mod ast;
pub mod backend;
pub mod context;
pub mod core;
pub mod resolve;
pub mod x64;

pub use assembler::{TranslationOutput, Translator, Unit};
pub use ast::{NodeId, NodeKind, SyntaxTree};
pub use backend::{compile_function, compile_functions, prepare, BackendOutput, FunctionSource};
pub use context::{ContextTree, FunctionId};
pub use core::{
    Architecture, BackendConfig, CompilationSession, CompileError, CompileResult, Format, Phase,
    SessionStats, Size, Status,
};

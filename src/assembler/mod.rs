// This module hosts the lowering pipeline for one function. A Unit is created per function
// with the immutable backend configuration; the builders append abstract instructions to it
// while walking the syntax tree (the append pass), the Unit then builds every instruction in
// order against a simulated register file (the build pass), and the Translator lays out the
// frame and emits text or bytes. Results and handles describe where values live and are
// shared between instructions through the result arena, so a later decision (a spill, a
// redirected destination, a merged scope) is seen by every user of the value.

//! Per-function lowering: Unit, instructions, builders and translation.
//!
//! # Key Components
//!
//! ## Values (`handle`, `result`)
//! - Tagged value locations and the joinable result arena
//!
//! ## Instructions (`instruction`, `instructions`, `operand`, `memory`)
//! - Abstract instructions and their build into machine operations
//! - Operand materialization, spilling and parallel moves
//!
//! ## Builders (`builders`, `scope`, `analysis`)
//! - Expressions, conditionals and loops appended to a Unit
//!
//! ## Translation (`translator`, `target`)
//! - Frame layout, prologue/epilogue and emission

pub mod analysis;
pub mod builders;
pub mod handle;
pub mod instruction;
pub mod instructions;
pub mod memory;
pub mod operand;
pub mod result;
pub mod scope;
pub mod target;
pub mod translator;
pub mod unit;

pub use handle::Handle;
pub use instruction::{Instruction, InstructionKind, Label};
pub use operand::{Condition, MachineOp, Opcode, Operand};
pub use result::{ResultArena, ResultId};
pub use translator::{TranslationOutput, Translator};
pub use unit::Unit;

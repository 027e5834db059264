// This module serves as the central hub for the backend's shared infrastructure, providing
// the building blocks every lowering component uses regardless of target architecture. It
// exports and organizes: the run-wide configuration (architecture, debug and multithread
// flags, and the Size/Format value model), the error taxonomy with the CompileResult alias,
// the register file (volatile-first allocation with clock-based eviction over bitsets),
// arena-based compilation sessions with statistics, and the phase task model that runs
// independent lowering work inline or on worker threads.

//! Core backend infrastructure
//!
//! # Key Components
//!
//! ## Configuration (`config`)
//! - Target architecture selection, fixed for one compilation run
//! - Operand sizes and value formats
//!
//! ## Register Allocation (`register_file`)
//! - Volatile-first allocation with clock-based eviction
//! - Ownership snapshots for save/restore of unit state
//!
//! ## Session Management (`session`)
//! - Arena-based output allocation using `bumpalo`
//! - Compilation statistics
//!
//! ## Phases (`phase`)
//! - Inline or threaded execution of independent tasks
//! - Per-task error capture

pub mod config;
pub mod error;
pub mod phase;
pub mod register_file;
pub mod session;

pub use config::{Architecture, BackendConfig, Format, Size};

pub use error::{CompileError, CompileResult};

pub use phase::{Phase, Status};

pub use register_file::{AsmReg, Occupancy, RegAllocError, RegBitSet, RegisterFile};

pub use session::{CompilationSession, SessionStats};

// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession owns a reference to the arena that backs all output of one lowering
// task: interned symbol names (mangled function names, label prefixes) and the emitted
// assembly text are allocated in the arena and share the session lifetime. The session also
// gathers compilation statistics in SessionStats: functions compiled, instructions built,
// machine operations emitted, spills, evacuations and constant data entries. A session is
// never shared between threads; every concurrently lowered function creates its own arena
// and session, which matches the rule that one Unit is owned by exactly one task.

//! Arena-based compilation session management.
//!
//! All strings handed out by a session live as long as its arena, so compiled
//! output can be collected without copying.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for compilation output.
    arena: &'arena Bump,

    /// Session statistics for debugging.
    stats: RefCell<SessionStats>,

    /// String interning for symbol names.
    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Current function being compiled.
    current_function: RefCell<Option<&'arena str>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            current_function: RefCell::new(None),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Allocate a slice in the session arena.
    pub fn alloc_slice<T>(&self, slice: &[T]) -> &'arena [T]
    where
        T: Clone,
    {
        self.arena.alloc_slice_clone(slice)
    }

    /// Copy a string into the arena without interning it.
    pub fn alloc_str(&self, s: &str) -> &'arena str {
        self.arena.alloc_str(s)
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Set the function currently being lowered.
    pub fn set_current_function(&self, name: &str) {
        let name = self.intern_str(name);
        *self.current_function.borrow_mut() = Some(name);
    }

    pub fn current_function(&self) -> Option<&'arena str> {
        *self.current_function.borrow()
    }

    /// Record that a function was compiled.
    pub fn record_function_compiled(&self, name: &str, operations: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_compiled += 1;
        stats.operations_emitted += operations;

        if stats.largest_function_operations < operations {
            stats.largest_function_operations = operations;
            stats.largest_function_name = name.to_string();
        }
    }

    /// Record instructions built for a function.
    pub fn record_instructions_built(&self, count: usize) {
        self.stats.borrow_mut().instructions_built += count;
    }

    /// Record spill generation.
    pub fn record_spills(&self, count: usize) {
        self.stats.borrow_mut().spills_generated += count;
    }

    /// Record constant data entries.
    pub fn record_constants(&self, count: usize) {
        self.stats.borrow_mut().constants_emitted += count;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Number of functions compiled.
    pub functions_compiled: usize,

    /// Number of abstract instructions built.
    pub instructions_built: usize,

    /// Number of machine operations emitted.
    pub operations_emitted: usize,

    /// Largest function compiled, in machine operations.
    pub largest_function_operations: usize,

    /// Name of largest function.
    pub largest_function_name: String,

    /// Spills generated.
    pub spills_generated: usize,

    /// Constant data section entries.
    pub constants_emitted: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Functions compiled: {}", self.functions_compiled)?;
        writeln!(f, "  Instructions built: {}", self.instructions_built)?;
        writeln!(f, "  Operations emitted: {}", self.operations_emitted)?;
        writeln!(f, "  Spills generated: {}", self.spills_generated)?;
        writeln!(f, "  Constants emitted: {}", self.constants_emitted)?;

        if !self.largest_function_name.is_empty() {
            writeln!(
                f,
                "  Largest function: {} ({} operations)",
                self.largest_function_name, self.largest_function_operations
            )?;
        }

        Ok(())
    }
}

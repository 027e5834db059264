// This module is the entry point that ties the passes together for whole functions. prepare()
// runs the resolver and the evaluator over one function body against the mutable context
// tree and turns leftover diagnostics into a CompileError::Unresolved. compile_function()
// lowers one prepared body: a Unit is created with the run configuration, the builders append
// the instruction stream, the Unit builds it and the Translator lays out the frame and emits
// text (and x86-64 bytes on request), while the CompilationSession records statistics.
// compile_functions() fans the prepared functions of a run out over a Phase, one task per
// function, each with its own arena, session and tree; the context tree is shared read-only.

//! Driver for preparing and lowering functions.

use crate::assembler::builders;
use crate::assembler::{TranslationOutput, Translator, Unit};
use crate::ast::{NodeId, SyntaxTree};
use crate::context::{ContextTree, FunctionId};
use crate::core::config::BackendConfig;
use crate::core::error::{CompileError, CompileResult};
use crate::core::phase::{Phase, Status};
use crate::core::session::{CompilationSession, SessionStats};
use crate::resolve::{self, Diagnostic};
use bumpalo::Bump;
use log::{debug, warn};
use std::sync::{Arc, Mutex};

/// One function body ready for lowering.
#[derive(Debug, Clone)]
pub struct FunctionSource {
    pub function: FunctionId,
    pub tree: SyntaxTree,
    pub body: NodeId,
}

/// Everything produced by one run of compile_functions.
#[derive(Debug, Default)]
pub struct BackendOutput {
    /// Outputs in the order the functions were supplied; failed functions are missing.
    pub functions: Vec<TranslationOutput>,
    pub errors: Vec<String>,
    pub stats: SessionStats,
}

impl BackendOutput {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Resolve and evaluate one function body.
///
/// Diagnostics left afterwards are returned inside the error's count and logged one by one.
pub fn prepare(
    tree: &mut SyntaxTree,
    contexts: &mut ContextTree,
    function: FunctionId,
    body: NodeId,
) -> CompileResult<()> {
    let context = contexts.function(function).context;

    // Types inferred from assignments can unlock further calls, so alternate until stable
    loop {
        let resolved = resolve::resolve_tree(tree, contexts, body, context);
        let inferred = resolve::resolve_variables(tree, contexts, body, context);
        if resolved == 0 && inferred == 0 {
            break;
        }
    }
    resolve::evaluate(tree, contexts, body);

    let diagnostics: Vec<Diagnostic> = resolve::get_unresolved(tree, contexts, body, context);
    if diagnostics.is_empty() {
        return Ok(());
    }
    for diagnostic in &diagnostics {
        warn!("{}: {}", contexts.function_fullname(function), diagnostic);
    }
    Err(CompileError::Unresolved {
        count: diagnostics.len(),
    })
}

/// Lower one prepared function body.
pub fn compile_function(
    tree: &mut SyntaxTree,
    contexts: &ContextTree,
    function: FunctionId,
    body: NodeId,
    config: BackendConfig,
    binary: bool,
    session: &CompilationSession<'_>,
) -> CompileResult<TranslationOutput> {
    let mut unit = Unit::new(tree, contexts, function, config);
    session.set_current_function(unit.symbol());

    builders::build_function(&mut unit, body)?;
    session.record_instructions_built(unit.instructions().len());
    unit.build()?;

    let output = Translator::new(config)
        .with_binary(binary)
        .translate(&unit)?;
    session.record_function_compiled(&output.symbol, output.operations.len());
    session.record_spills(unit.spills());
    session.record_constants(output.constants.len());

    // The text shares the session lifetime so callers holding the session avoid a copy
    let text = session.alloc_str(&output.text);
    debug!(
        "{}: {} operation(s), {} byte(s) of text",
        output.symbol,
        output.operations.len(),
        text.len()
    );
    Ok(output)
}

fn merge(total: &mut SessionStats, stats: &SessionStats) {
    total.functions_compiled += stats.functions_compiled;
    total.instructions_built += stats.instructions_built;
    total.operations_emitted += stats.operations_emitted;
    total.spills_generated += stats.spills_generated;
    total.constants_emitted += stats.constants_emitted;
    if stats.largest_function_operations > total.largest_function_operations {
        total.largest_function_operations = stats.largest_function_operations;
        total.largest_function_name = stats.largest_function_name.clone();
    }
}

/// Lower every function in its own Phase task.
///
/// A failing function is reported in `errors` and does not stop the others.
pub fn compile_functions(
    sources: Vec<FunctionSource>,
    contexts: Arc<ContextTree>,
    config: BackendConfig,
    binary: bool,
) -> BackendOutput {
    let results: Arc<Mutex<Vec<(usize, TranslationOutput, SessionStats)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let mut phase = Phase::new("lowering", config.multithreaded);

    for (index, source) in sources.into_iter().enumerate() {
        let contexts = Arc::clone(&contexts);
        let results = Arc::clone(&results);
        phase.run(move || {
            let FunctionSource {
                function,
                mut tree,
                body,
            } = source;
            let arena = Bump::new();
            let session = CompilationSession::new(&arena);

            match compile_function(&mut tree, &contexts, function, body, config, binary, &session) {
                Ok(output) => match results.lock() {
                    Ok(mut results) => {
                        results.push((index, output, session.stats()));
                        Status::Ok
                    }
                    Err(_) => Status::error("output collection is poisoned"),
                },
                Err(error) => {
                    let symbol = contexts.function_fullname(function);
                    Status::error(format!("{symbol}: {error}"))
                }
            }
        });
    }

    phase.sync();
    let errors = phase.errors();
    debug!(
        "phase '{}' finished {} task(s), {} failed",
        phase.name(),
        phase.completed(),
        errors.len()
    );

    let mut collected = match Arc::try_unwrap(results) {
        Ok(results) => results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
        Err(shared) => match shared.lock() {
            Ok(mut results) => std::mem::take(&mut *results),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        },
    };
    collected.sort_by_key(|(index, _, _)| *index);

    let mut output = BackendOutput {
        errors,
        ..BackendOutput::default()
    };
    for (_, function, stats) in collected {
        merge(&mut output.stats, &stats);
        output.functions.push(function);
    }
    output
}

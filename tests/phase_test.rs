//! Phase task model and the per-function lowering phase.

mod common;

use common::init_logging;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vivid_backend::ast::SyntaxTree;
use vivid_backend::backend::{compile_functions, FunctionSource};
use vivid_backend::context::{ContextTree, GLOBAL};
use vivid_backend::core::{Architecture, BackendConfig, CompileError, CompileResult, Phase, Status};

fn failing() -> CompileResult<()> {
    Err(CompileError::internal("label was never created"))
}

#[test]
fn test_errors_and_panics_are_captured() {
    init_logging();
    for multithread in [false, true] {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut phase = Phase::new("capture", multithread);

        for index in 0..6 {
            let finished = Arc::clone(&finished);
            phase.run(move || {
                finished.fetch_add(1, Ordering::SeqCst);
                match index {
                    2 => Status::from(failing()),
                    4 => panic!("task {index} gave up"),
                    _ => Status::Ok,
                }
            });
        }
        phase.sync();

        assert_eq!(finished.load(Ordering::SeqCst), 6);
        assert_eq!(phase.completed(), 6);
        assert!(phase.failed());

        let errors = phase.errors();
        assert_eq!(errors.len(), 2, "multithread: {multithread}");
        assert!(errors.iter().any(|e| e.contains("label was never created")));
        assert!(errors.iter().any(|e| e.contains("task 4 gave up")));
    }
}

#[test]
fn test_too_many_arguments_fails_only_its_function() {
    init_logging();
    let mut contexts = ContextTree::new();
    let i64 = contexts.primitives().i64;
    let names = ["a", "b", "c", "d", "e", "f", "g"];
    let parameters: Vec<(&str, Option<_>)> = names.iter().map(|&n| (n, Some(i64))).collect();
    let wide = contexts.declare_function(GLOBAL, "wide", &parameters, Some(i64)).unwrap();
    let caller = contexts.declare_function(GLOBAL, "caller", &[], Some(i64)).unwrap();
    let fine = contexts.declare_function(GLOBAL, "fine", &[], Some(i64)).unwrap();

    let mut tree = SyntaxTree::new();
    let arguments: Vec<_> = (0..7).map(|value| tree.number(value)).collect();
    let call = tree.call(wide, &arguments);
    let ret = tree.return_statement(Some(call));
    let body = tree.scope(contexts.function(caller).context, &[ret]);
    let calling = FunctionSource {
        function: caller,
        tree,
        body,
    };

    let mut tree = SyntaxTree::new();
    let zero = tree.number(0);
    let ret = tree.return_statement(Some(zero));
    let body = tree.scope(contexts.function(fine).context, &[ret]);
    let plain = FunctionSource {
        function: fine,
        tree,
        body,
    };

    let config = BackendConfig::new(Architecture::X64).with_multithreading(true);
    let output = compile_functions(vec![calling, plain], Arc::new(contexts), config, false);

    assert_eq!(output.functions.len(), 1);
    assert_eq!(output.errors.len(), 1);
    assert!(output.errors[0].contains("wide"), "{}", output.errors[0]);
    assert!(output.errors[0].contains("at most 6"));
    assert_eq!(output.stats.functions_compiled, 1);
}

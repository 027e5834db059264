//! Translator output for both architectures.

mod common;

use bumpalo::Bump;
use common::{compile, init_logging};
use vivid_backend::assembler::Opcode;
use vivid_backend::ast::{NodeId, Operator, SyntaxTree};
use vivid_backend::backend::compile_function;
use vivid_backend::context::{ContextTree, FunctionId, GLOBAL};
use vivid_backend::core::{Architecture, BackendConfig, CompilationSession, CompileError};

/// `return a * 1.5 + 1.5` over decimals.
fn decimal() -> (ContextTree, SyntaxTree, FunctionId, NodeId) {
    let mut contexts = ContextTree::new();
    let decimal = contexts.primitives().decimal;
    let function = contexts
        .declare_function(GLOBAL, "affine", &[("a", Some(decimal))], Some(decimal))
        .unwrap();
    let context = contexts.function(function).context;
    let a = contexts.function(function).parameters[0];

    let mut tree = SyntaxTree::new();
    let value = tree.variable(a);
    let factor = tree.decimal(1.5);
    let product = tree.operator(Operator::Multiply, value, factor);
    let offset = tree.decimal(1.5);
    let sum = tree.operator(Operator::Add, product, offset);
    let ret = tree.return_statement(Some(sum));
    let body = tree.scope(context, &[ret]);
    (contexts, tree, function, body)
}

/// `return a * 5 + b`
fn integer() -> (ContextTree, SyntaxTree, FunctionId, NodeId) {
    let mut contexts = ContextTree::new();
    let i64 = contexts.primitives().i64;
    let function = contexts
        .declare_function(GLOBAL, "mix", &[("a", Some(i64)), ("b", Some(i64))], Some(i64))
        .unwrap();
    let context = contexts.function(function).context;
    let parameters = contexts.function(function).parameters.clone();

    let mut tree = SyntaxTree::new();
    let a = tree.variable(parameters[0]);
    let five = tree.number(5);
    let product = tree.operator(Operator::Multiply, a, five);
    let b = tree.variable(parameters[1]);
    let sum = tree.operator(Operator::Add, product, b);
    let ret = tree.return_statement(Some(sum));
    let body = tree.scope(context, &[ret]);
    (contexts, tree, function, body)
}

#[test]
fn test_identical_constants_share_one_entry() {
    init_logging();
    for architecture in [Architecture::X64, Architecture::Arm64] {
        let (contexts, mut tree, function, body) = decimal();
        let output = compile(&mut tree, &contexts, function, body, architecture);

        assert_eq!(output.constants.len(), 1, "{architecture}");
        assert_eq!(output.text.matches(".quad 0x3ff8000000000000").count(), 1);
        assert!(output.constants[0].identifier.starts_with(&output.symbol));
    }
}

#[test]
fn test_x64_text() {
    let (contexts, mut tree, function, body) = decimal();
    let output = compile(&mut tree, &contexts, function, body, Architecture::X64);

    assert!(output.text.starts_with(".section .text\n"));
    assert!(output.text.contains(&format!(".global {}\n{}:\n", output.symbol, output.symbol)));
    assert!(output.text.contains("mulsd xmm"));
    assert!(output.text.contains("addsd xmm"));
    assert!(output.text.contains(".section .data"));
    assert!(output.text.contains(&format!("[rip + {}]", output.constants[0].identifier)));
}

#[test]
fn test_arm64_text() {
    let (contexts, mut tree, function, body) = decimal();
    let output = compile(&mut tree, &contexts, function, body, Architecture::Arm64);

    assert!(output.text.starts_with(".text\n"));
    assert!(output.text.contains("fmul d"));
    assert!(output.text.contains("fadd d"));
    assert!(output.text.contains("stp x29, x30, [sp, #-16]!"));
    assert!(output.text.contains("ldp x29, x30, [sp], #16"));
    // Literal pool follows the code in the same section
    assert!(!output.text.contains(".data"));
}

#[test]
fn test_multiplication_strength_reduction() {
    let (contexts, mut tree, function, body) = integer();
    let x64 = compile(&mut tree, &contexts, function, body, Architecture::X64);
    // a * 5 is a + a * 4
    assert!(x64.text.contains("*4]"), "{}", x64.text);
    assert!(!x64.text.contains("imul"));

    let (contexts, mut tree, function, body) = integer();
    let arm64 = compile(&mut tree, &contexts, function, body, Architecture::Arm64);
    assert!(arm64.text.contains("lsl #2"), "{}", arm64.text);
    assert!(!arm64.text.contains("mul x"));
}

#[test]
fn test_prologue_and_epilogue_pair_up() {
    let (contexts, mut tree, function, body) = integer();
    let output = compile(&mut tree, &contexts, function, body, Architecture::X64);

    let pushes = output.operations.iter().filter(|op| op.opcode == Opcode::Push).count();
    let pops = output.operations.iter().filter(|op| op.opcode == Opcode::Pop).count();
    assert_eq!(pushes, pops);
    assert_eq!(output.operations.last().map(|op| op.opcode), Some(Opcode::Return));
}

#[test]
fn test_binary_output() {
    let (contexts, mut tree, function, body) = integer();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let output = compile_function(
        &mut tree,
        &contexts,
        function,
        body,
        BackendConfig::new(Architecture::X64),
        true,
        &session,
    )
    .unwrap();
    let bytes = output.bytes.expect("x86-64 bytes were requested");
    assert_eq!(bytes.last(), Some(&0xc3));

    let (contexts, mut tree, function, body) = integer();
    let error = compile_function(
        &mut tree,
        &contexts,
        function,
        body,
        BackendConfig::new(Architecture::Arm64),
        true,
        &session,
    )
    .unwrap_err();
    assert!(matches!(
        error,
        CompileError::Unsupported {
            architecture: Architecture::Arm64,
            ..
        }
    ));
}

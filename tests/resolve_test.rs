//! Resolution and evaluation ahead of lowering, checked through the lowered code.

mod common;

use common::{compile, execute, init_logging};
use vivid_backend::assembler::Opcode;
use vivid_backend::ast::{NodeKind, Operator, SyntaxTree};
use vivid_backend::backend::prepare;
use vivid_backend::context::{ContextTree, GLOBAL};
use vivid_backend::core::{Architecture, CompileError};

#[test]
fn test_dead_branch_is_removed_before_lowering() {
    init_logging();
    let mut contexts = ContextTree::new();
    let i64 = contexts.primitives().i64;
    let function = contexts
        .declare_function(GLOBAL, "pick", &[("a", Some(i64))], Some(i64))
        .unwrap();
    let context = contexts.function(function).context;
    // Typeless; inferred from the assignment below
    let x = contexts.declare_local(context, "x", None).unwrap();

    // x = a; if 2 < 1 { x = 5 } else { x = x + 3 }; return x
    let mut tree = SyntaxTree::new();
    let destination = tree.variable(x);
    let a = tree.unresolved_identifier("a");
    let initial = tree.assign(destination, a);

    let two = tree.number(2);
    let one = tree.number(1);
    let never = tree.operator(Operator::Less, two, one);
    let destination = tree.variable(x);
    let five = tree.number(5);
    let taken = tree.assign(destination, five);
    let branch = tree.if_statement(contexts.create_scope(context), never, &[taken]);

    let destination = tree.variable(x);
    let current = tree.variable(x);
    let three = tree.number(3);
    let sum = tree.operator(Operator::Add, current, three);
    let otherwise = tree.assign(destination, sum);
    let fallback = tree.else_statement(contexts.create_scope(context), &[otherwise]);

    let result = tree.variable(x);
    let ret = tree.return_statement(Some(result));
    let body = tree.scope(context, &[initial, branch, fallback, ret]);

    prepare(&mut tree, &mut contexts, function, body).unwrap();
    assert_eq!(contexts.variable(x).type_id, Some(i64));
    assert!(tree
        .find(body, |kind| matches!(kind, NodeKind::If(_) | NodeKind::Else(_)))
        .is_none());

    let output = compile(&mut tree, &contexts, function, body, Architecture::X64);
    assert!(output
        .operations
        .iter()
        .all(|operation| !matches!(operation.opcode, Opcode::ConditionalJump { .. })));
    assert_eq!(execute(&output.operations, &[4]).value, 7);
    assert_eq!(execute(&output.operations, &[-3]).value, 0);
}

#[test]
fn test_stack_address_comparison_folds() {
    init_logging();
    let mut contexts = ContextTree::new();
    let i64 = contexts.primitives().i64;
    let link = contexts.primitives().link;
    let function = contexts.declare_function(GLOBAL, "buffer", &[], Some(i64)).unwrap();
    let context = contexts.function(function).context;
    let p = contexts.declare_local(context, "p", Some(link)).unwrap();

    // p = stack(64); if p == 0 { return 1 }; p[0] = 9; return p[0]
    let mut tree = SyntaxTree::new();
    let destination = tree.variable(p);
    let allocation = tree.stack_address("buffer", 64, link);
    let initial = tree.assign(destination, allocation);

    let read = tree.variable(p);
    let zero = tree.number(0);
    let null = tree.operator(Operator::Equals, read, zero);
    let one = tree.number(1);
    let early = tree.return_statement(Some(one));
    let check = tree.if_statement(contexts.create_scope(context), null, &[early]);

    let object = tree.variable(p);
    let index = tree.number(0);
    let element = tree.offset(object, index);
    let nine = tree.number(9);
    let store = tree.assign(element, nine);

    let object = tree.variable(p);
    let index = tree.number(0);
    let element = tree.offset(object, index);
    let ret = tree.return_statement(Some(element));
    let body = tree.scope(context, &[initial, check, store, ret]);

    prepare(&mut tree, &mut contexts, function, body).unwrap();
    assert!(tree.find(body, |kind| matches!(kind, NodeKind::If(_))).is_none());

    let output = compile(&mut tree, &contexts, function, body, Architecture::X64);
    assert!(output.frame_size >= 64);
    assert_eq!(execute(&output.operations, &[]).value, 9);
}

#[test]
fn test_call_resolves_to_overload() {
    let mut contexts = ContextTree::new();
    let i64 = contexts.primitives().i64;
    let decimal = contexts.primitives().decimal;
    let integer = contexts
        .declare_function(GLOBAL, "scale", &[("v", Some(i64))], Some(i64))
        .unwrap();
    contexts
        .declare_function(GLOBAL, "scale", &[("v", Some(decimal)), ("w", Some(decimal))], Some(decimal))
        .unwrap();
    let caller = contexts.declare_function(GLOBAL, "caller", &[], Some(i64)).unwrap();
    let context = contexts.function(caller).context;

    let mut tree = SyntaxTree::new();
    let argument = tree.number(3);
    let call = tree.unresolved_function("scale", &[argument]);
    let ret = tree.return_statement(Some(call));
    let body = tree.scope(context, &[ret]);

    prepare(&mut tree, &mut contexts, caller, body).unwrap();
    assert!(tree.find(body, |kind| *kind == NodeKind::Call(integer)).is_some());

    let output = compile(&mut tree, &contexts, caller, body, Architecture::X64);
    let symbol = contexts.function_fullname(integer);
    assert!(output.text.contains(&format!("call {symbol}")));
}

#[test]
fn test_unresolved_names_stop_the_function() {
    let mut contexts = ContextTree::new();
    let function = contexts.declare_function(GLOBAL, "broken", &[], None).unwrap();
    let context = contexts.function(function).context;

    let mut tree = SyntaxTree::new();
    let argument = tree.unresolved_identifier("nowhere");
    let call = tree.unresolved_function("missing", &[argument]);
    let body = tree.scope(context, &[call]);

    match prepare(&mut tree, &mut contexts, function, body) {
        Err(CompileError::Unresolved { count }) => assert_eq!(count, 2),
        other => panic!("expected unresolved diagnostics, got {other:?}"),
    }
}

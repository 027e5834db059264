//! Conditional chains lowered for x86-64 and walked with the test register machine.
//!
//! For an input that selects branch k, the chain must produce k and pass the end label once.

mod common;

use common::{compile, execute, init_logging, labels};
use vivid_backend::assembler::Opcode;
use vivid_backend::ast::{NodeId, Operator, SyntaxTree};
use vivid_backend::context::{ContextTree, FunctionId, GLOBAL};
use vivid_backend::core::Architecture;

struct Program {
    contexts: ContextTree,
    tree: SyntaxTree,
    function: FunctionId,
    body: NodeId,
}

/// `x = 100; if a == 0 { x = 0 } else if a == 1 { x = 1 } else if a < 10 { x = 2 } else { x = 3 }; return x`
fn chain() -> Program {
    let mut contexts = ContextTree::new();
    let i64 = contexts.primitives().i64;
    let function = contexts
        .declare_function(GLOBAL, "choose", &[("a", Some(i64))], Some(i64))
        .unwrap();
    let context = contexts.function(function).context;
    let a = contexts.function(function).parameters[0];
    let x = contexts.declare_local(context, "x", Some(i64)).unwrap();

    let mut tree = SyntaxTree::new();
    let assign_x = |tree: &mut SyntaxTree, value: i64| {
        let destination = tree.variable(x);
        let value = tree.number(value);
        tree.assign(destination, value)
    };

    let initial = assign_x(&mut tree, 100);

    let test = |tree: &mut SyntaxTree, operator: Operator, value: i64| {
        let left = tree.variable(a);
        let right = tree.number(value);
        tree.operator(operator, left, right)
    };
    let mut branches = Vec::new();
    for (k, (operator, value)) in [(Operator::Equals, 0), (Operator::Equals, 1), (Operator::Less, 10)]
        .into_iter()
        .enumerate()
    {
        let scope = contexts.create_scope(context);
        let condition = test(&mut tree, operator, value);
        let statement = assign_x(&mut tree, k as i64);
        let branch = if k == 0 {
            tree.if_statement(scope, condition, &[statement])
        } else {
            tree.else_if(scope, condition, &[statement])
        };
        branches.push(branch);
    }
    let scope = contexts.create_scope(context);
    let statement = assign_x(&mut tree, 3);
    branches.push(tree.else_statement(scope, &[statement]));

    let result = tree.variable(x);
    let ret = tree.return_statement(Some(result));

    let mut statements = vec![initial];
    statements.extend(branches);
    statements.push(ret);
    let body = tree.scope(context, &statements);

    Program {
        contexts,
        tree,
        function,
        body,
    }
}

#[test]
fn test_each_input_reaches_its_branch() {
    init_logging();
    let mut program = chain();
    let output = compile(
        &mut program.tree,
        &program.contexts,
        program.function,
        program.body,
        Architecture::X64,
    );
    log::trace!("{}", output.text);

    let end = labels(&output.operations)
        .pop()
        .expect("the chain ends with a label");

    for (input, expected) in [(0, 0), (1, 1), (5, 2), (-3, 2), (10, 3), (500, 3)] {
        let execution = execute(&output.operations, &[input]);
        assert_eq!(execution.value, expected, "input {input}");
        assert_eq!(execution.visits(&end), 1, "input {input}");
    }
}

#[test]
fn test_chain_lowers_on_arm64() {
    init_logging();
    let mut program = chain();
    let output = compile(
        &mut program.tree,
        &program.contexts,
        program.function,
        program.body,
        Architecture::Arm64,
    );

    assert!(output.text.contains("cmp x"));
    assert!(output.text.contains("b.ne") || output.text.contains("b.eq"));
    assert!(output.text.trim_end().ends_with("ret"));
}

/// `if a > 2 && a < 5 { return 1 }; if a == 7 || a == 9 { return 2 }; return 0`
fn logical() -> Program {
    let mut contexts = ContextTree::new();
    let i64 = contexts.primitives().i64;
    let function = contexts
        .declare_function(GLOBAL, "classify", &[("a", Some(i64))], Some(i64))
        .unwrap();
    let context = contexts.function(function).context;
    let a = contexts.function(function).parameters[0];

    let mut tree = SyntaxTree::new();
    let compare = |tree: &mut SyntaxTree, operator: Operator, value: i64| {
        let left = tree.variable(a);
        let right = tree.number(value);
        tree.operator(operator, left, right)
    };

    let above = compare(&mut tree, Operator::Greater, 2);
    let below = compare(&mut tree, Operator::Less, 5);
    let both = tree.operator(Operator::And, above, below);
    let one = tree.number(1);
    let first_return = tree.return_statement(Some(one));
    let first = tree.if_statement(contexts.create_scope(context), both, &[first_return]);

    let seven = compare(&mut tree, Operator::Equals, 7);
    let nine = compare(&mut tree, Operator::Equals, 9);
    let either = tree.operator(Operator::Or, seven, nine);
    let two = tree.number(2);
    let second_return = tree.return_statement(Some(two));
    let second = tree.if_statement(contexts.create_scope(context), either, &[second_return]);

    let zero = tree.number(0);
    let last = tree.return_statement(Some(zero));
    let body = tree.scope(context, &[first, second, last]);

    Program {
        contexts,
        tree,
        function,
        body,
    }
}

#[test]
fn test_short_circuit_conditions() {
    init_logging();
    let mut program = logical();
    let output = compile(
        &mut program.tree,
        &program.contexts,
        program.function,
        program.body,
        Architecture::X64,
    );

    for (input, expected) in [(2, 0), (3, 1), (4, 1), (5, 0), (7, 2), (8, 0), (9, 2)] {
        assert_eq!(execute(&output.operations, &[input]).value, expected, "input {input}");
    }
}

#[test]
fn test_every_jump_targets_a_defined_label() {
    let mut program = logical();
    let output = compile(
        &mut program.tree,
        &program.contexts,
        program.function,
        program.body,
        Architecture::X64,
    );

    let defined = labels(&output.operations);
    for operation in &output.operations {
        if matches!(operation.opcode, Opcode::Jump | Opcode::ConditionalJump { .. }) {
            let target = operation.target().expect("jump without a target");
            assert!(defined.iter().any(|label| label == target), "{target} is not defined");
        }
    }
}

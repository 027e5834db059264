//! Loop lowering: walked counting loops and break/continue targets.

mod common;

use common::{compile, execute, init_logging};
use vivid_backend::assembler::builders;
use vivid_backend::assembler::{InstructionKind, Label, Unit};
use vivid_backend::ast::{LoopControl, NodeId, NodeKind, Operator, SyntaxTree};
use vivid_backend::context::{ContextTree, FunctionId, VariableId, GLOBAL};
use vivid_backend::core::{Architecture, BackendConfig};

struct Program {
    contexts: ContextTree,
    tree: SyntaxTree,
    function: FunctionId,
    body: NodeId,
}

fn function(name: &str) -> (ContextTree, FunctionId, VariableId) {
    let mut contexts = ContextTree::new();
    let i64 = contexts.primitives().i64;
    let function = contexts
        .declare_function(GLOBAL, name, &[("n", Some(i64))], Some(i64))
        .unwrap();
    let parameter = contexts.function(function).parameters[0];
    (contexts, function, parameter)
}

/// `variable = variable + amount`
fn increment(tree: &mut SyntaxTree, variable: VariableId, amount: i64) -> NodeId {
    let destination = tree.variable(variable);
    let current = tree.variable(variable);
    let amount = tree.number(amount);
    let sum = tree.operator(Operator::Add, current, amount);
    tree.assign(destination, sum)
}

fn assign(tree: &mut SyntaxTree, variable: VariableId, value: i64) -> NodeId {
    let destination = tree.variable(variable);
    let value = tree.number(value);
    tree.assign(destination, value)
}

/// `s = 0; loop (i = 0, i < n, i = i + 1) { s = s + 2 }; return s`
fn counting() -> Program {
    let (mut contexts, function, n) = function("count");
    let i64 = contexts.primitives().i64;
    let context = contexts.function(function).context;
    let s = contexts.declare_local(context, "s", Some(i64)).unwrap();
    let scope = contexts.create_scope(context);
    let i = contexts.declare_local(scope, "i", Some(i64)).unwrap();

    let mut tree = SyntaxTree::new();
    let start = assign(&mut tree, s, 0);
    let initialization = assign(&mut tree, i, 0);
    let left = tree.variable(i);
    let right = tree.variable(n);
    let condition = tree.operator(Operator::Less, left, right);
    let action = increment(&mut tree, i, 1);
    let statement = increment(&mut tree, s, 2);
    let lp = tree.loop_statement(scope, &[initialization], condition, &[action], &[statement]);
    let result = tree.variable(s);
    let ret = tree.return_statement(Some(result));
    let body = tree.scope(context, &[start, lp, ret]);

    Program {
        contexts,
        tree,
        function,
        body,
    }
}

/// `loop { if n == 7 { stop }; n = n + 1 }; return n`
fn breaking() -> Program {
    let (mut contexts, function, n) = function("seven");
    let context = contexts.function(function).context;
    let scope = contexts.create_scope(context);
    let branch = contexts.create_scope(scope);

    let mut tree = SyntaxTree::new();
    let left = tree.variable(n);
    let right = tree.number(7);
    let condition = tree.operator(Operator::Equals, left, right);
    let stop = tree.loop_control(LoopControl::Stop);
    let test = tree.if_statement(branch, condition, &[stop]);
    let step = increment(&mut tree, n, 1);
    let lp = tree.forever_loop(scope, &[test, step]);
    let result = tree.variable(n);
    let ret = tree.return_statement(Some(result));
    let body = tree.scope(context, &[lp, ret]);

    Program {
        contexts,
        tree,
        function,
        body,
    }
}

/// `loop { n = n + 1; if n < 5 { continue }; stop }; return n`
fn continuing() -> Program {
    let (mut contexts, function, n) = function("five");
    let context = contexts.function(function).context;
    let scope = contexts.create_scope(context);
    let branch = contexts.create_scope(scope);

    let mut tree = SyntaxTree::new();
    let step = increment(&mut tree, n, 1);
    let left = tree.variable(n);
    let right = tree.number(5);
    let condition = tree.operator(Operator::Less, left, right);
    let next = tree.loop_control(LoopControl::Continue);
    let test = tree.if_statement(branch, condition, &[next]);
    let stop = tree.loop_control(LoopControl::Stop);
    let lp = tree.forever_loop(scope, &[step, test, stop]);
    let result = tree.variable(n);
    let ret = tree.return_statement(Some(result));
    let body = tree.scope(context, &[lp, ret]);

    Program {
        contexts,
        tree,
        function,
        body,
    }
}

fn run(mut program: Program, inputs: &[(i64, i64)]) {
    init_logging();
    let output = compile(
        &mut program.tree,
        &program.contexts,
        program.function,
        program.body,
        Architecture::X64,
    );
    log::trace!("{}", output.text);
    for &(input, expected) in inputs {
        assert_eq!(execute(&output.operations, &[input]).value, expected, "input {input}");
    }
}

#[test]
fn test_counting_loop() {
    run(counting(), &[(0, 0), (1, 2), (5, 10), (-4, 0)]);
}

#[test]
fn test_break_leaves_the_loop() {
    run(breaking(), &[(0, 7), (7, 7), (3, 7)]);
}

#[test]
fn test_continue_restarts_the_body() {
    run(continuing(), &[(0, 5), (4, 5), (9, 10)]);
}

#[test]
fn test_debug_mode_still_computes() {
    init_logging();
    let mut program = counting();
    let config = BackendConfig::new(Architecture::X64).with_debug(true);
    let arena = bumpalo::Bump::new();
    let session = vivid_backend::core::CompilationSession::new(&arena);
    let output = vivid_backend::backend::compile_function(
        &mut program.tree,
        &program.contexts,
        program.function,
        program.body,
        config,
        false,
        &session,
    )
    .unwrap();
    assert_eq!(execute(&output.operations, &[6]).value, 12);
}

/// Append the program to a Unit and return the appended instruction kinds.
fn appended(program: &mut Program) -> Vec<InstructionKind> {
    let mut unit = Unit::new(
        &mut program.tree,
        &program.contexts,
        program.function,
        BackendConfig::new(Architecture::X64),
    );
    builders::build_function(&mut unit, program.body).unwrap();
    unit.instructions().iter().map(|i| i.kind.clone()).collect()
}

/// Labels targeted by the unconditional jumps right after a SymmetryEnd.
fn reconciled_jumps(kinds: &[InstructionKind]) -> Vec<Label> {
    kinds
        .windows(2)
        .filter_map(|pair| match pair {
            [InstructionKind::SymmetryEnd { .. }, InstructionKind::Jump {
                label,
                condition: None,
            }] => Some(*label),
            _ => None,
        })
        .collect()
}

#[test]
fn test_break_targets_exit() {
    let mut program = breaking();
    let kinds = appended(&mut program);

    // The loop is the last statement before the return, so its exit is the last such label
    let exit = kinds
        .windows(2)
        .filter_map(|pair| match pair {
            [InstructionKind::RestoreState { .. }, InstructionKind::Label(label)] => Some(*label),
            _ => None,
        })
        .last()
        .expect("loop without an exit label");
    assert!(reconciled_jumps(&kinds).contains(&exit));
}

#[test]
fn test_continue_targets_start() {
    let mut program = continuing();
    let kinds = appended(&mut program);

    // The iteration starts at the label preceding SymmetryStart
    let start = kinds
        .windows(2)
        .find_map(|pair| match pair {
            [InstructionKind::Label(label), InstructionKind::SymmetryStart { .. }] => Some(*label),
            _ => None,
        })
        .expect("loop without a start label");
    let targets = reconciled_jumps(&kinds);
    assert!(targets.iter().filter(|&&label| label == start).count() >= 2);
}

#[test]
fn test_symmetry_end_pairs_carried_variables() {
    let mut program = counting();
    let kinds = appended(&mut program);

    let starts: Vec<usize> = kinds
        .iter()
        .enumerate()
        .filter(|(_, kind)| matches!(kind, InstructionKind::SymmetryStart { .. }))
        .map(|(index, _)| index)
        .collect();
    assert_eq!(starts.len(), 1);

    let InstructionKind::SymmetryStart { actives, .. } = &kinds[starts[0]] else {
        unreachable!()
    };
    let ends: Vec<&InstructionKind> = kinds
        .iter()
        .filter(|kind| matches!(kind, InstructionKind::SymmetryEnd { .. }))
        .collect();
    assert_eq!(ends.len(), 1);
    let InstructionKind::SymmetryEnd { start, pairs } = ends[0] else {
        unreachable!()
    };
    assert_eq!(*start, starts[0]);
    for &(variable, outer) in actives {
        let pair = pairs
            .iter()
            .find(|pair| pair.variable == variable)
            .expect("active variable without a pair");
        assert_eq!(pair.outer, outer);
    }
}

/// `loop { n = n + 1; if n > 4 { stop } }; return n`
fn stop_after_step() -> Program {
    let (mut contexts, function, n) = function("past_four");
    let context = contexts.function(function).context;
    let scope = contexts.create_scope(context);
    let branch = contexts.create_scope(scope);

    let mut tree = SyntaxTree::new();
    let step = increment(&mut tree, n, 1);
    let left = tree.variable(n);
    let right = tree.number(4);
    let condition = tree.operator(Operator::Greater, left, right);
    let stop = tree.loop_control(LoopControl::Stop);
    let test = tree.if_statement(branch, condition, &[stop]);
    let lp = tree.forever_loop(scope, &[step, test]);
    let result = tree.variable(n);
    let ret = tree.return_statement(Some(result));
    let body = tree.scope(context, &[lp, ret]);

    Program {
        contexts,
        tree,
        function,
        body,
    }
}

/// `s = 0; loop (i = 0, i < n, i = i + 1) { s = s + 1; if s <operator> limit { control }; after }; return s`
fn counted_with_control(
    name: &str,
    operator: Operator,
    limit: i64,
    control: LoopControl,
    after: Option<LoopControl>,
) -> Program {
    let (mut contexts, function, n) = function(name);
    let i64 = contexts.primitives().i64;
    let context = contexts.function(function).context;
    let s = contexts.declare_local(context, "s", Some(i64)).unwrap();
    let scope = contexts.create_scope(context);
    let i = contexts.declare_local(scope, "i", Some(i64)).unwrap();
    let branch = contexts.create_scope(scope);

    let mut tree = SyntaxTree::new();
    let start = assign(&mut tree, s, 0);
    let initialization = assign(&mut tree, i, 0);
    let left = tree.variable(i);
    let right = tree.variable(n);
    let condition = tree.operator(Operator::Less, left, right);
    let action = increment(&mut tree, i, 1);

    let step = increment(&mut tree, s, 1);
    let left = tree.variable(s);
    let right = tree.number(limit);
    let test = tree.operator(operator, left, right);
    let jump = tree.loop_control(control);
    let check = tree.if_statement(branch, test, &[jump]);
    let mut statements = vec![step, check];
    if let Some(after) = after {
        statements.push(tree.loop_control(after));
    }

    let lp = tree.loop_statement(scope, &[initialization], condition, &[action], &statements);
    let result = tree.variable(s);
    let ret = tree.return_statement(Some(result));
    let body = tree.scope(context, &[start, lp, ret]);

    Program {
        contexts,
        tree,
        function,
        body,
    }
}

#[test]
fn test_stop_after_a_carried_update() {
    run(stop_after_step(), &[(0, 5), (3, 5), (4, 5), (9, 10)]);
}

#[test]
fn test_pretested_stop_after_a_carried_update() {
    let program = counted_with_control("two", Operator::Equals, 2, LoopControl::Stop, None);
    run(program, &[(0, 0), (1, 1), (2, 2), (6, 2)]);
}

#[test]
fn test_pretested_continue_after_a_carried_update() {
    // Continue skips the action and the test, so once entered the body runs until s reaches 3
    let program = counted_with_control(
        "three",
        Operator::Less,
        3,
        LoopControl::Continue,
        Some(LoopControl::Stop),
    );
    run(program, &[(0, 0), (1, 3), (5, 3)]);
}

#[test]
fn test_control_keeps_the_body_state_for_the_code_after_it() {
    let mut program = stop_after_step();
    let kinds = appended(&mut program);

    // The break is SaveState, SymmetryEnd, Jump and a RestoreState of that same save
    let wrapped = kinds.windows(4).enumerate().any(|(index, window)| match window {
        [InstructionKind::SaveState, InstructionKind::SymmetryEnd { .. }, InstructionKind::Jump {
            condition: None,
            ..
        }, InstructionKind::RestoreState { save }] => *save == index,
        _ => false,
    });
    assert!(wrapped);
}

#[test]
fn test_pretested_condition_is_rewritten_once() {
    init_logging();
    let (mut contexts, function, n) = function("countdown");
    let i64 = contexts.primitives().i64;
    let context = contexts.function(function).context;
    let s = contexts.declare_local(context, "s", Some(i64)).unwrap();
    let scope = contexts.create_scope(context);
    let i = contexts.declare_local(scope, "i", Some(i64)).unwrap();

    // s = 0; loop (i = n, i, i = i - 1) { s = s + 1 }; return s
    let mut tree = SyntaxTree::new();
    let start = assign(&mut tree, s, 0);
    let destination = tree.variable(i);
    let source = tree.variable(n);
    let initialization = tree.assign(destination, source);
    let condition = tree.variable(i);
    let destination = tree.variable(i);
    let current = tree.variable(i);
    let one = tree.number(1);
    let difference = tree.operator(Operator::Subtract, current, one);
    let action = tree.assign(destination, difference);
    let statement = increment(&mut tree, s, 1);
    let lp = tree.loop_statement(scope, &[initialization], condition, &[action], &[statement]);
    let result = tree.variable(s);
    let ret = tree.return_statement(Some(result));
    let body = tree.scope(context, &[start, lp, ret]);

    let output = compile(&mut tree, &contexts, function, body, Architecture::X64);
    let test = tree.condition(lp).expect("loop without a condition");
    assert_eq!(*tree.kind(test), NodeKind::Operator(Operator::NotEquals));
    let tested = tree.first(test).expect("comparison without operands");
    assert_eq!(*tree.kind(tested), NodeKind::Variable(i));

    for (input, expected) in [(0, 0), (1, 1), (4, 4)] {
        assert_eq!(execute(&output.operations, &[input]).value, expected, "input {input}");
    }
}

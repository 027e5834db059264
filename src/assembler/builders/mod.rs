// This module drives the append pass. `build` dispatches on the node kind and appends the
// instructions of expressions and statements to the Unit; conditionals and loops have their
// own modules, and condition lowering with its peephole is shared by both. Expression
// building folds integer and decimal constants, moves the constant of a commutative
// operation to the second operand where the instruction builds can use it as an immediate,
// and removes additions of zero and multiplications by zero or one. Assigning to a variable
// rebinds it: a fresh computed value is bound directly, anything that may be shared with
// another variable or still sits in memory is duplicated first, so every variable has a
// result of its own when scopes are merged.

//! Expression and statement builders.

pub mod condition;
pub mod conditionals;
pub mod loops;

use crate::assembler::handle::Handle;
use crate::assembler::instruction::InstructionKind;
use crate::assembler::result::ResultId;
use crate::assembler::unit::Unit;
use crate::ast::{NodeId, NodeKind, Number, Operator, OperatorType};
use crate::context::{FunctionId, VariableCategory};
use crate::core::config::Format;
use crate::core::error::{CompileError, CompileResult};
use crate::resolve::types::get_format;
use log::debug;

/// Stride of indexed accesses; every element is one machine word.
const ELEMENT_SIZE: i64 = 8;

/// Append the whole function: parameter binding, the body and the implicit return.
pub fn build_function(unit: &mut Unit<'_>, body: NodeId) -> CompileResult<()> {
    debug!("building function {}", unit.symbol());
    unit.initialize()?;
    build(unit, body)?;
    unit.finish();
    Ok(())
}

/// Build a node whose value is required.
pub fn value(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<ResultId> {
    build(unit, node)?.ok_or_else(|| {
        CompileError::internal(format!("{:?} does not produce a value", unit.tree().kind(node)))
    })
}

pub fn build(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<Option<ResultId>> {
    let kind = unit.tree().kind(node).clone();
    match kind {
        NodeKind::Scope(_) | NodeKind::Parenthesis => {
            let mut last = None;
            for child in unit.tree().children(node) {
                // Else-if and else branches are built by the if that starts their chain
                if matches!(unit.tree().kind(child), NodeKind::ElseIf(_) | NodeKind::Else(_)) {
                    continue;
                }
                last = build(unit, child)?;
            }
            Ok(last)
        }
        NodeKind::Number { value, format } => Ok(Some(unit.create_constant(value, format))),
        NodeKind::Variable(variable) => unit.get_variable(variable).map(Some),
        NodeKind::Operator(operator) => match operator.kind() {
            OperatorType::Classic => build_arithmetic(unit, node, operator).map(Some),
            OperatorType::Assign => build_assignment(unit, node).map(Some),
            OperatorType::Comparison | OperatorType::Logic => Err(CompileError::Unsupported {
                operation: format!("'{}' as a value", operator.symbol()),
                architecture: unit.config().architecture,
            }),
        },
        NodeKind::Link => build_link(unit, node).map(Some),
        NodeKind::Offset => build_offset(unit, node).map(Some),
        NodeKind::Call(function) => build_call(unit, node, function).map(Some),
        NodeKind::If(_) => conditionals::start(unit, node),
        NodeKind::ElseIf(_) | NodeKind::Else(_) => Err(CompileError::internal(
            "branch without a preceding if",
        )),
        NodeKind::Loop { .. } => loops::build(unit, node).map(|_| None),
        NodeKind::LoopControl(_) => loops::build_control_instruction(unit, node).map(|_| None),
        NodeKind::Return => build_return(unit, node).map(|_| None),
        NodeKind::StackAddress { bytes, .. } => {
            let identity = unit.create_identity();
            Ok(Some(unit.append(
                InstructionKind::AllocateStack { identity, bytes },
                Format::U64,
            )))
        }
        NodeKind::TypeReference(_)
        | NodeKind::Compiles
        | NodeKind::UnresolvedIdentifier(_)
        | NodeKind::UnresolvedFunction(_) => Err(CompileError::internal(format!(
            "{kind:?} reached lowering"
        ))),
    }
}

fn binary_operands(unit: &Unit<'_>, node: NodeId) -> CompileResult<(NodeId, NodeId)> {
    let tree = unit.tree();
    match (tree.first(node), tree.last(node)) {
        (Some(left), Some(right)) if left != right => Ok((left, right)),
        _ => Err(CompileError::internal("operator without two operands")),
    }
}

fn fold(operator: Operator, left: Number, right: Number) -> Option<Number> {
    let folded = match (left, right) {
        (Number::Integer(a), Number::Integer(b)) => Number::Integer(match operator {
            Operator::Add => a.wrapping_add(b),
            Operator::Subtract => a.wrapping_sub(b),
            Operator::Multiply => a.wrapping_mul(b),
            _ => return None,
        }),
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            Number::Decimal(match operator {
                Operator::Add => a + b,
                Operator::Subtract => a - b,
                Operator::Multiply => a * b,
                _ => return None,
            })
        }
    };
    Some(folded)
}

fn build_arithmetic(unit: &mut Unit<'_>, node: NodeId, operator: Operator) -> CompileResult<ResultId> {
    let (left, right) = binary_operands(unit, node)?;
    let format = get_format(unit.tree(), unit.contexts(), node);
    let mut first = value(unit, left)?;
    let mut second = value(unit, right)?;

    let constant = |unit: &Unit<'_>, result: ResultId| unit.results().handle(result).constant();
    if let (Some(a), Some(b)) = (constant(unit, first), constant(unit, second)) {
        if let Some(folded) = fold(operator, a, b) {
            let folded = match folded {
                Number::Integer(value) if format.is_decimal() => Number::Decimal(value as f64),
                other => other,
            };
            return Ok(unit.create_constant(folded, format));
        }
    }

    let commutative = matches!(operator, Operator::Add | Operator::Multiply);
    if commutative && constant(unit, first).is_some() && constant(unit, second).is_none() {
        std::mem::swap(&mut first, &mut second);
    }

    if !format.is_decimal() {
        match (operator, constant(unit, second)) {
            (Operator::Add | Operator::Subtract, Some(Number::Integer(0)))
            | (Operator::Multiply, Some(Number::Integer(1))) => return Ok(first),
            (Operator::Multiply, Some(Number::Integer(0))) => {
                return Ok(unit.create_constant(Number::Integer(0), format))
            }
            _ => {}
        }
    }

    let kind = match operator {
        Operator::Add => InstructionKind::Addition { first, second },
        Operator::Subtract => InstructionKind::Subtraction { first, second },
        Operator::Multiply => InstructionKind::Multiplication { first, second },
        other => {
            return Err(CompileError::internal(format!(
                "'{}' is not arithmetic",
                other.symbol()
            )))
        }
    };
    Ok(unit.append(kind, format))
}

/// Whether a value can become a variable's binding without a copy.
fn is_bindable(unit: &Unit<'_>, result: ResultId, format: Format) -> bool {
    if unit.results().format(result).is_decimal() != format.is_decimal() {
        return false;
    }
    match unit.results().handle(result) {
        Handle::Constant(_) | Handle::Inline { .. } => true,
        Handle::None => unit.results().metadata(result).variables.is_empty(),
        _ => false,
    }
}

fn build_assignment(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<ResultId> {
    let (destination, source) = binary_operands(unit, node)?;
    let kind = unit.tree().kind(destination).clone();
    match kind {
        NodeKind::Variable(variable) => {
            let value = value(unit, source)?;
            let format = unit.variable_format(variable);
            let bound = if is_bindable(unit, value, format) {
                value
            } else {
                unit.append(InstructionKind::Duplicate { value }, format)
            };
            unit.bind(variable, bound);
            Ok(bound)
        }
        NodeKind::Link | NodeKind::Offset => {
            let destination = value(unit, destination)?;
            let value = value(unit, source)?;
            let format = unit.results().format(destination);
            unit.append(
                InstructionKind::Move {
                    destination,
                    source: value,
                },
                format,
            );
            Ok(value)
        }
        other => Err(CompileError::internal(format!("cannot assign to {other:?}"))),
    }
}

fn build_link(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<ResultId> {
    let (object, member) = binary_operands(unit, node)?;
    let NodeKind::Variable(member) = *unit.tree().kind(member) else {
        return Err(CompileError::internal("link without a member"));
    };
    let VariableCategory::Member { offset } = unit.contexts().variable(member).category else {
        return Err(CompileError::internal(format!(
            "'{}' is not a member",
            unit.contexts().variable(member).name
        )));
    };

    let start = value(unit, object)?;
    let format = unit.variable_format(member);
    Ok(unit.append(InstructionKind::GetObjectPointer { start, offset }, format))
}

fn build_offset(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<ResultId> {
    let (object, index) = binary_operands(unit, node)?;
    let start = value(unit, object)?;
    let offset = value(unit, index)?;
    Ok(unit.append(
        InstructionKind::GetMemoryAddress {
            start,
            offset,
            stride: ELEMENT_SIZE,
        },
        Format::I64,
    ))
}

fn build_call(
    unit: &mut Unit<'_>,
    node: NodeId,
    function: FunctionId,
) -> CompileResult<ResultId> {
    let mut arguments = Vec::new();
    for argument in unit.tree().children(node) {
        arguments.push(value(unit, argument)?);
    }

    let formats: Vec<Format> = arguments.iter().map(|&a| unit.results().format(a)).collect();
    let contexts = unit.contexts;
    let declaration = contexts.function(function);
    if let Err(limit) = unit.target().argument_registers(&formats) {
        return Err(CompileError::TooManyArguments {
            function: declaration.name.clone(),
            count: arguments.len(),
            limit,
        });
    }

    let format = declaration
        .return_type
        .map(|t| contexts.ty(t).format())
        .unwrap_or(Format::I64);
    unit.append(InstructionKind::Evacuate, Format::I64);
    Ok(unit.append(
        InstructionKind::Call {
            symbol: contexts.function_fullname(function),
            arguments,
        },
        format,
    ))
}

fn build_return(unit: &mut Unit<'_>, node: NodeId) -> CompileResult<()> {
    let value = match unit.tree().first(node) {
        Some(child) => {
            let value = value(unit, child)?;
            let contexts = unit.contexts;
            let decimal = contexts
                .function(unit.function)
                .return_type
                .is_some_and(|t| contexts.ty(t).format().is_decimal());
            if decimal && !unit.results().format(value).is_decimal() {
                Some(unit.append(InstructionKind::Duplicate { value }, Format::Decimal))
            } else {
                Some(value)
            }
        }
        None => None,
    };
    unit.append(InstructionKind::Return { value }, Format::I64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold() {
        assert_eq!(
            fold(Operator::Multiply, Number::Integer(6), Number::Integer(7)),
            Some(Number::Integer(42))
        );
        assert_eq!(
            fold(Operator::Add, Number::Integer(1), Number::Decimal(0.5)),
            Some(Number::Decimal(1.5))
        );
        assert_eq!(fold(Operator::Less, Number::Integer(1), Number::Integer(2)), None);
    }
}

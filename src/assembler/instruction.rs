//! Abstract instructions of a Unit.
//!
//! An instruction is appended once (its result is created and its parameters are
//! marked used), built once (machine operations are chosen against the current
//! register state) and finally translated with the rest of the function.

use crate::assembler::operand::{Condition, MachineOp};
use crate::assembler::result::ResultId;
use crate::ast::NodeId;
use crate::context::VariableId;
use std::fmt;
use std::ops::BitOr;

/// Jump target inside one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Role flags of an instruction parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterFlags(u8);

impl ParameterFlags {
    pub const NONE: ParameterFlags = ParameterFlags(0);
    pub const DESTINATION: ParameterFlags = ParameterFlags(1);
    pub const READS: ParameterFlags = ParameterFlags(1 << 1);
    pub const WRITE_ACCESS: ParameterFlags = ParameterFlags(1 << 2);
    /// The parameter must not be joined with the instruction result.
    pub const NO_ATTACH: ParameterFlags = ParameterFlags(1 << 3);

    pub fn contains(self, other: ParameterFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParameterFlags {
    type Output = ParameterFlags;

    fn bitor(self, rhs: ParameterFlags) -> ParameterFlags {
        ParameterFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub result: ResultId,
    pub flags: ParameterFlags,
}

/// A variable whose value inside a region must end up where the outer value lived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePair {
    pub variable: VariableId,
    pub outer: ResultId,
    pub inner: ResultId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// Binds the incoming parameters to their argument registers.
    Initialize { parameters: Vec<ResultId> },
    Label(Label),
    /// Unconditional when `condition` is absent; the flag selects signed tests.
    Jump {
        label: Label,
        condition: Option<(Condition, bool)>,
    },
    Compare { left: ResultId, right: ResultId },
    /// Store into a memory destination.
    Move { destination: ResultId, source: ResultId },
    /// Copy a value into a fresh register.
    Duplicate { value: ResultId },
    Addition { first: ResultId, second: ResultId },
    Subtraction { first: ResultId, second: ResultId },
    Multiplication { first: ResultId, second: ResultId },
    GetMemoryAddress {
        start: ResultId,
        offset: ResultId,
        stride: i64,
    },
    GetObjectPointer { start: ResultId, offset: i64 },
    AllocateStack { identity: String, bytes: u32 },
    Call {
        symbol: String,
        arguments: Vec<ResultId>,
    },
    Return { value: Option<ResultId> },
    /// Moves values that survive the next call out of volatile registers.
    Evacuate,
    SaveState,
    /// Restores the snapshot taken by the SaveState at index `save`.
    RestoreState { save: usize },
    EnterScope { actives: Vec<(VariableId, ResultId)> },
    /// Reconciles with the EnterScope at index `enter`.
    MergeScope { enter: usize, pairs: Vec<MergePair> },
    Branch { branches: Vec<NodeId> },
    SymmetryStart {
        loop_node: NodeId,
        actives: Vec<(VariableId, ResultId)>,
    },
    /// Reconciles with the SymmetryStart at index `start`.
    SymmetryEnd { start: usize, pairs: Vec<MergePair> },
    GetVariable { variable: VariableId, value: ResultId },
    CacheVariables {
        variables: Vec<(VariableId, ResultId)>,
        non_volatile: bool,
    },
}

impl InstructionKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstructionKind::Initialize { .. } => "initialize",
            InstructionKind::Label(_) => "label",
            InstructionKind::Jump { .. } => "jump",
            InstructionKind::Compare { .. } => "compare",
            InstructionKind::Move { .. } => "move",
            InstructionKind::Duplicate { .. } => "duplicate",
            InstructionKind::Addition { .. } => "addition",
            InstructionKind::Subtraction { .. } => "subtraction",
            InstructionKind::Multiplication { .. } => "multiplication",
            InstructionKind::GetMemoryAddress { .. } => "get-memory-address",
            InstructionKind::GetObjectPointer { .. } => "get-object-pointer",
            InstructionKind::AllocateStack { .. } => "allocate-stack",
            InstructionKind::Call { .. } => "call",
            InstructionKind::Return { .. } => "return",
            InstructionKind::Evacuate => "evacuate",
            InstructionKind::SaveState => "save-state",
            InstructionKind::RestoreState { .. } => "restore-state",
            InstructionKind::EnterScope { .. } => "enter-scope",
            InstructionKind::MergeScope { .. } => "merge-scope",
            InstructionKind::Branch { .. } => "branch",
            InstructionKind::SymmetryStart { .. } => "symmetry-start",
            InstructionKind::SymmetryEnd { .. } => "symmetry-end",
            InstructionKind::GetVariable { .. } => "get-variable",
            InstructionKind::CacheVariables { .. } => "cache-variables",
        }
    }

    /// Instructions that never emit machine operations by themselves.
    pub fn is_abstract(&self) -> bool {
        matches!(
            self,
            InstructionKind::SaveState
                | InstructionKind::RestoreState { .. }
                | InstructionKind::EnterScope { .. }
                | InstructionKind::Branch { .. }
                | InstructionKind::SymmetryStart { .. }
                | InstructionKind::GetVariable { .. }
                | InstructionKind::AllocateStack { .. }
                | InstructionKind::GetMemoryAddress { .. }
                | InstructionKind::GetObjectPointer { .. }
        )
    }

    pub fn parameters(&self) -> Vec<Parameter> {
        let reads = |result: ResultId| Parameter {
            result,
            flags: ParameterFlags::READS,
        };
        let address = |result: ResultId| Parameter {
            result,
            flags: ParameterFlags::READS | ParameterFlags::NO_ATTACH,
        };
        let pairs = |pairs: &[MergePair]| {
            pairs
                .iter()
                .flat_map(|pair| {
                    [
                        Parameter {
                            result: pair.outer,
                            flags: ParameterFlags::DESTINATION | ParameterFlags::NO_ATTACH,
                        },
                        reads(pair.inner),
                    ]
                })
                .collect::<Vec<_>>()
        };

        match self {
            InstructionKind::Initialize { parameters } => parameters
                .iter()
                .map(|&result| Parameter {
                    result,
                    flags: ParameterFlags::DESTINATION,
                })
                .collect(),
            InstructionKind::Compare { left, right } => vec![reads(*left), reads(*right)],
            InstructionKind::Move {
                destination,
                source,
            } => vec![
                Parameter {
                    result: *destination,
                    flags: ParameterFlags::DESTINATION | ParameterFlags::WRITE_ACCESS,
                },
                reads(*source),
            ],
            InstructionKind::Duplicate { value } => vec![reads(*value)],
            InstructionKind::Addition { first, second }
            | InstructionKind::Subtraction { first, second }
            | InstructionKind::Multiplication { first, second } => vec![
                Parameter {
                    result: *first,
                    flags: ParameterFlags::READS | ParameterFlags::WRITE_ACCESS,
                },
                reads(*second),
            ],
            InstructionKind::GetMemoryAddress { start, offset, .. } => {
                vec![address(*start), address(*offset)]
            }
            InstructionKind::GetObjectPointer { start, .. } => vec![address(*start)],
            InstructionKind::Call { arguments, .. } => {
                arguments.iter().map(|&result| reads(result)).collect()
            }
            InstructionKind::Return { value } => value.iter().map(|&result| reads(result)).collect(),
            InstructionKind::EnterScope { actives }
            | InstructionKind::SymmetryStart { actives, .. }
            | InstructionKind::CacheVariables {
                variables: actives,
                ..
            } => actives.iter().map(|&(_, result)| address(result)).collect(),
            InstructionKind::MergeScope { pairs: merged, .. }
            | InstructionKind::SymmetryEnd { pairs: merged, .. } => pairs(merged),
            InstructionKind::GetVariable { value, .. } => vec![reads(*value)],
            InstructionKind::Label(_)
            | InstructionKind::Jump { .. }
            | InstructionKind::AllocateStack { .. }
            | InstructionKind::Evacuate
            | InstructionKind::SaveState
            | InstructionKind::RestoreState { .. }
            | InstructionKind::Branch { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub result: ResultId,
    pub parameters: Vec<Parameter>,
    pub position: usize,
    pub description: Option<String>,
    /// Filled by the build phase.
    pub operations: Vec<MachineOp>,
}

impl Instruction {
    pub fn new(kind: InstructionKind, result: ResultId, position: usize) -> Self {
        let parameters = kind.parameters();
        Self {
            kind,
            result,
            parameters,
            position,
            description: None,
            operations: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_roles() {
        let kind = InstructionKind::Move {
            destination: ResultId(1),
            source: ResultId(2),
        };
        let parameters = kind.parameters();
        assert!(parameters[0].flags.contains(ParameterFlags::DESTINATION));
        assert!(parameters[0].flags.contains(ParameterFlags::WRITE_ACCESS));
        assert!(parameters[1].flags.contains(ParameterFlags::READS));
        assert!(!parameters[1].flags.contains(ParameterFlags::DESTINATION));
    }

    #[test]
    fn test_merge_uses_both_sides() {
        let pair = MergePair {
            variable: VariableId(0),
            outer: ResultId(4),
            inner: ResultId(9),
        };
        let kind = InstructionKind::MergeScope {
            enter: 3,
            pairs: vec![pair],
        };
        let results: Vec<ResultId> = kind.parameters().iter().map(|p| p.result).collect();
        assert_eq!(results, vec![ResultId(4), ResultId(9)]);
        assert!(!kind.is_abstract());
        assert!(InstructionKind::SaveState.is_abstract());
    }
}

//! Shared helpers for the integration tests.
//!
//! `execute` walks a translated x86-64 operation stream with a tiny register machine, so tests
//! can check what lowered code computes without assembling or running it.

#![allow(dead_code)]

use bumpalo::Bump;
use hashbrown::HashMap;
use vivid_backend::assembler::operand::{Base, Condition, MachineOp, MemoryOperand, Opcode, Operand};
use vivid_backend::assembler::TranslationOutput;
use vivid_backend::ast::{NodeId, SyntaxTree};
use vivid_backend::context::{ContextTree, FunctionId};
use vivid_backend::core::register_file::AsmReg;
use vivid_backend::core::{Architecture, BackendConfig, CompilationSession};
use vivid_backend::x64::registers::{PARAMETERS, RAX, RSP};

const STACK_TOP: i64 = 0x7fff_0000;
const STEP_LIMIT: usize = 100_000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Lower one function body for `architecture`.
pub fn compile(
    tree: &mut SyntaxTree,
    contexts: &ContextTree,
    function: FunctionId,
    body: NodeId,
    architecture: Architecture,
) -> TranslationOutput {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    vivid_backend::backend::compile_function(
        tree,
        contexts,
        function,
        body,
        BackendConfig::new(architecture),
        false,
        &session,
    )
    .expect("function should lower")
}

/// Outcome of walking an operation stream.
#[derive(Debug, Default)]
pub struct Execution {
    pub value: i64,
    /// How often each label was passed, by fallthrough or by jump.
    pub visits: HashMap<String, usize>,
}

impl Execution {
    pub fn visits(&self, label: &str) -> usize {
        self.visits.get(label).copied().unwrap_or(0)
    }
}

struct Machine {
    registers: HashMap<AsmReg, i64>,
    memory: HashMap<i64, i64>,
    flags: (i64, i64),
}

impl Machine {
    fn register(&self, register: AsmReg) -> i64 {
        self.registers.get(&register).copied().unwrap_or(0)
    }

    fn address(&self, memory: &MemoryOperand) -> i64 {
        let base = match &memory.base {
            Some(Base::Register(register)) => self.register(*register),
            Some(other) => panic!("walker cannot address {other:?}"),
            None => 0,
        };
        let index = memory.index.map(|i| self.register(i) * memory.scale).unwrap_or(0);
        base + index + memory.displacement
    }

    fn read(&self, operand: &Operand) -> i64 {
        match operand {
            Operand::Register(register) => self.register(*register),
            Operand::Immediate(value) => *value,
            Operand::Memory(memory) => {
                let address = self.address(memory);
                self.memory.get(&address).copied().unwrap_or(0)
            }
            other => panic!("walker cannot read {other:?}"),
        }
    }

    fn write(&mut self, operand: &Operand, value: i64) {
        match operand {
            Operand::Register(register) => {
                self.registers.insert(*register, value);
            }
            Operand::Memory(memory) => {
                let address = self.address(memory);
                self.memory.insert(address, value);
            }
            other => panic!("walker cannot write {other:?}"),
        }
    }

    /// Three-address forms compute from the last two operands, two-address forms in place.
    fn arithmetic(&mut self, operation: &MachineOp, f: impl Fn(i64, i64) -> i64) {
        let operands = &operation.operands;
        let value = match operands.len() {
            3 => f(self.read(&operands[1]), self.read(&operands[2])),
            2 => f(self.read(&operands[0]), self.read(&operands[1])),
            _ => panic!("malformed arithmetic {operation:?}"),
        };
        self.write(&operands[0], value);
    }

    fn holds(&self, condition: Condition, signed: bool) -> bool {
        let (a, b) = self.flags;
        let ordering = if signed { a.cmp(&b) } else { (a as u64).cmp(&(b as u64)) };
        match condition {
            Condition::Equal => ordering.is_eq(),
            Condition::NotEqual => ordering.is_ne(),
            Condition::Less => ordering.is_lt(),
            Condition::LessOrEqual => ordering.is_le(),
            Condition::Greater => ordering.is_gt(),
            Condition::GreaterOrEqual => ordering.is_ge(),
        }
    }
}

/// Run `operations` with integer `arguments` in the parameter registers and return `rax`.
pub fn execute(operations: &[MachineOp], arguments: &[i64]) -> Execution {
    let labels: HashMap<String, usize> = operations
        .iter()
        .enumerate()
        .filter(|(_, operation)| operation.opcode == Opcode::Label)
        .filter_map(|(index, operation)| operation.target().map(|name| (name.to_string(), index)))
        .collect();

    let mut machine = Machine {
        registers: HashMap::new(),
        memory: HashMap::new(),
        flags: (0, 0),
    };
    machine.registers.insert(RSP, STACK_TOP);
    for (register, value) in PARAMETERS.iter().zip(arguments) {
        machine.registers.insert(*register, *value);
    }

    let mut execution = Execution::default();
    let mut position = 0;
    for _ in 0..STEP_LIMIT {
        let operation = operations
            .get(position)
            .unwrap_or_else(|| panic!("fell off the end of the stream"));
        position += 1;

        let jump = |name: Option<&str>| {
            let name = name.expect("jump without a label");
            *labels.get(name).unwrap_or_else(|| panic!("jump to unknown label {name}"))
        };

        match operation.opcode {
            Opcode::Label => {
                let name = operation.target().unwrap_or_default().to_string();
                *execution.visits.entry(name).or_default() += 1;
            }
            Opcode::Move => {
                let value = machine.read(&operation.operands[1]);
                machine.write(&operation.operands[0], value);
            }
            Opcode::LoadAddress => {
                let Operand::Memory(memory) = &operation.operands[1] else {
                    panic!("lea without an address");
                };
                let address = machine.address(memory);
                machine.write(&operation.operands[0], address);
            }
            Opcode::Add => machine.arithmetic(operation, i64::wrapping_add),
            Opcode::Subtract => machine.arithmetic(operation, i64::wrapping_sub),
            Opcode::Multiply => machine.arithmetic(operation, i64::wrapping_mul),
            Opcode::ShiftLeft => machine.arithmetic(operation, |a, b| a.wrapping_shl(b as u32)),
            Opcode::Compare => {
                machine.flags = (
                    machine.read(&operation.operands[0]),
                    machine.read(&operation.operands[1]),
                );
            }
            Opcode::Jump => position = jump(operation.target()),
            Opcode::ConditionalJump { condition, signed } => {
                if machine.holds(condition, signed) {
                    position = jump(operation.target());
                }
            }
            Opcode::Push => {
                let value = machine.read(&operation.operands[0]);
                let top = machine.register(RSP) - 8;
                machine.registers.insert(RSP, top);
                machine.memory.insert(top, value);
            }
            Opcode::Pop => {
                let top = machine.register(RSP);
                let value = machine.memory.get(&top).copied().unwrap_or(0);
                machine.registers.insert(RSP, top + 8);
                machine.write(&operation.operands[0], value);
            }
            Opcode::Exchange => {
                let a = machine.read(&operation.operands[0]);
                let b = machine.read(&operation.operands[1]);
                machine.write(&operation.operands[0], b);
                machine.write(&operation.operands[1], a);
            }
            Opcode::Return => {
                assert_eq!(machine.register(RSP), STACK_TOP, "unbalanced stack at return");
                execution.value = machine.register(RAX);
                return execution;
            }
            other => panic!("walker does not execute {other:?}"),
        }
    }
    panic!("step limit exceeded");
}

/// Names of all labels defined in the stream, in order.
pub fn labels(operations: &[MachineOp]) -> Vec<String> {
    operations
        .iter()
        .filter(|operation| operation.opcode == Opcode::Label)
        .filter_map(|operation| operation.target().map(str::to_string))
        .collect()
}

// This module contains the build step of every instruction kind. The build step runs once per
// instruction, in order, after the Unit has released the registers of expired results. Each
// kind chooses its machine operations against the current register state and records where
// its result lives. The arithmetic kinds (with multiplication strength reduction and result
// redirection) are in `arithmetic`, calls, evacuation and returns in `call`, and the abstract
// bookkeeping kinds that snapshot and reconcile locations around branches and loops in `state`.

//! Build step of the instruction set.

mod arithmetic;
mod call;
mod state;

use crate::assembler::handle::Handle;
use crate::assembler::instruction::InstructionKind;
use crate::assembler::memory::Access;
use crate::assembler::operand::{Opcode, Operand};
use crate::assembler::result::ResultId;
use crate::assembler::unit::Unit;
use crate::core::config::Format;
use crate::core::error::{CompileError, CompileResult};

impl Unit<'_> {
    pub(crate) fn build_instruction(
        &mut self,
        index: usize,
        kind: &InstructionKind,
        result: ResultId,
    ) -> CompileResult<()> {
        match kind {
            InstructionKind::Initialize { parameters } => self.build_initialize(parameters),
            InstructionKind::Label(label) => {
                let name = self.label_name(*label);
                self.emit(Opcode::Label, vec![Operand::Label(name)]);
                Ok(())
            }
            InstructionKind::Jump { label, condition } => {
                let opcode = match condition {
                    Some((condition, signed)) => Opcode::ConditionalJump {
                        condition: *condition,
                        signed: *signed,
                    },
                    None => Opcode::Jump,
                };
                let name = self.label_name(*label);
                self.emit(opcode, vec![Operand::Label(name)]);
                Ok(())
            }
            InstructionKind::Compare { left, right } => self.build_compare(*left, *right),
            InstructionKind::Move {
                destination,
                source,
            } => self.build_move(*destination, *source),
            InstructionKind::Duplicate { value } => self.build_duplicate(*value, result),
            InstructionKind::Addition { first, second } => {
                self.build_additive(Opcode::Add, *first, *second, result)
            }
            InstructionKind::Subtraction { first, second } => {
                self.build_additive(Opcode::Subtract, *first, *second, result)
            }
            InstructionKind::Multiplication { first, second } => {
                self.build_multiplication(*first, *second, result)
            }
            // Addresses were simulated when appended and are folded into their users
            InstructionKind::GetMemoryAddress { .. }
            | InstructionKind::GetObjectPointer { .. }
            | InstructionKind::AllocateStack { .. }
            | InstructionKind::Branch { .. } => Ok(()),
            InstructionKind::Call { symbol, arguments } => {
                self.build_call(symbol, arguments, result)
            }
            InstructionKind::Return { value } => self.build_return(*value),
            InstructionKind::Evacuate => self.build_evacuate(),
            InstructionKind::SaveState => {
                let state = self.build_state();
                self.states.insert(index, state);
                Ok(())
            }
            InstructionKind::RestoreState { save } => self.build_restore(*save),
            InstructionKind::EnterScope { actives } => {
                self.record_entry(index, actives);
                Ok(())
            }
            InstructionKind::MergeScope { enter, pairs } => self.build_merge(*enter, pairs),
            InstructionKind::SymmetryStart { actives, .. } => {
                self.record_entry(index, actives);
                let state = self.build_state();
                self.states.insert(index, state);
                Ok(())
            }
            InstructionKind::SymmetryEnd { start, pairs } => self.build_symmetry_end(*start, pairs),
            InstructionKind::GetVariable { value, .. } => self.build_get_variable(*value),
            InstructionKind::CacheVariables {
                variables,
                non_volatile,
            } => self.build_cache(variables, *non_volatile),
        }
    }

    fn build_initialize(&mut self, parameters: &[ResultId]) -> CompileResult<()> {
        let formats: Vec<Format> = parameters.iter().map(|&p| self.results.format(p)).collect();
        let registers = self.target.argument_registers(&formats).map_err(|limit| {
            CompileError::internal(format!("more than {limit} parameters reached the build pass"))
        })?;

        for (&parameter, register) in parameters.iter().zip(registers) {
            self.assign_result(parameter, register)?;
        }
        Ok(())
    }

    fn build_compare(&mut self, left: ResultId, right: ResultId) -> CompileResult<()> {
        let decimal = self.results.format(left).is_decimal() || self.results.format(right).is_decimal();

        let (left, right) = if decimal {
            let left = self.load_as(left, Format::Decimal)?;
            let right = if self.is_x64() && self.results.format(right).is_decimal() {
                self.operand(right, Access::Any)?
            } else {
                Operand::Register(self.load_as(right, Format::Decimal)?)
            };
            (left, right)
        } else {
            let left = self.load(left)?;
            let access = if self.is_x64() {
                Access::Any
            } else {
                Access::RegisterOrImmediate
            };
            (left, self.operand(right, access)?)
        };

        self.emit(Opcode::Compare, vec![Operand::Register(left), right]);
        Ok(())
    }

    fn build_move(&mut self, destination: ResultId, source: ResultId) -> CompileResult<()> {
        let handle = self.results.handle(destination).clone();
        if !handle.is_location() {
            return Err(CompileError::internal(format!(
                "cannot store into '{handle}'"
            )));
        }

        if let Handle::Register(register) = handle {
            if !self.registers.is_allocated(register) && self.try_redirect(source, register, destination)? {
                return Ok(());
            }
        }

        let format = self.results.format(destination);
        if format.is_decimal() && !self.results.format(source).is_decimal() {
            let converted = self.load_as(source, format)?;
            let memory = self.memory_operand(&handle)?;
            self.emit(
                Opcode::Move,
                vec![Operand::Memory(memory), Operand::Register(converted)],
            );
            return Ok(());
        }
        self.move_into(&handle, source)
    }

    fn build_duplicate(&mut self, value: ResultId, result: ResultId) -> CompileResult<()> {
        let format = self.results.format(result);
        let source = if format.is_decimal() == self.results.format(value).is_decimal() {
            self.results.handle(value).clone()
        } else {
            Handle::Register(self.load_as(value, format)?)
        };

        let register = self.allocate_result(result)?;
        self.transfer_to_register(register, &source, format)
    }

    /// Reclaim the register of a value whose ownership was dropped by a restored snapshot.
    fn build_get_variable(&mut self, value: ResultId) -> CompileResult<()> {
        if let Handle::Register(register) = self.results.handle(value).clone() {
            if !self.registers.is_allocated(register) {
                self.registers.assign_register(register, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::instruction::Instruction;
    use crate::ast::{Number, SyntaxTree};
    use crate::context::{ContextTree, FunctionId, GLOBAL};
    use crate::core::config::{Architecture, BackendConfig};
    use crate::x64::registers::{RAX, RBX, RDI};

    fn contexts() -> (ContextTree, FunctionId) {
        let mut contexts = ContextTree::new();
        let i64 = contexts.primitives().i64;
        let function = contexts
            .declare_function(GLOBAL, "f", &[("a", Some(i64))], Some(i64))
            .unwrap();
        (contexts, function)
    }

    /// Build `return a * multiplier` and hand back the instructions.
    fn multiply(architecture: Architecture, multiplier: i64) -> Vec<Instruction> {
        multiply_in_order(architecture, multiplier, false)
    }

    /// Same as `multiply`, with `multiplier * a` when `constant_first` is set.
    fn multiply_in_order(architecture: Architecture, multiplier: i64, constant_first: bool) -> Vec<Instruction> {
        let _ = env_logger::builder().is_test(true).try_init();
        let (contexts, function) = contexts();
        let mut tree = SyntaxTree::new();
        let mut unit = Unit::new(&mut tree, &contexts, function, BackendConfig::new(architecture));
        unit.initialize().unwrap();

        let a = unit.get_variable(contexts.function(function).parameters[0]).unwrap();
        let constant = unit.create_constant(Number::Integer(multiplier), Format::I64);
        let (first, second) = if constant_first { (constant, a) } else { (a, constant) };
        let product = unit.append(InstructionKind::Multiplication { first, second }, Format::I64);
        unit.append(InstructionKind::Return { value: Some(product) }, Format::I64);
        unit.build().unwrap();
        unit.instructions().to_vec()
    }

    #[test]
    fn test_power_of_two_becomes_address_into_return_register() {
        let instructions = multiply(Architecture::X64, 8);
        let multiplication = &instructions[1].operations;
        assert_eq!(multiplication.len(), 1);
        assert_eq!(multiplication[0].opcode, Opcode::LoadAddress);
        assert_eq!(multiplication[0].operands[0], Operand::Register(RAX));
        assert_eq!(
            instructions[2].operations.iter().map(|op| op.opcode).collect::<Vec<_>>(),
            vec![Opcode::Return]
        );
    }

    #[test]
    fn test_power_of_two_is_a_shift_on_arm64() {
        let instructions = multiply(Architecture::Arm64, 8);
        let shift = &instructions[1].operations[0];
        assert_eq!(shift.opcode, Opcode::ShiftLeft);
        assert_eq!(shift.operands[2], Operand::Immediate(3));
    }

    #[test]
    fn test_power_of_two_plus_one_uses_shifted_add_on_arm64() {
        let instructions = multiply(Architecture::Arm64, 5);
        let add = &instructions[1].operations[0];
        assert_eq!(add.opcode, Opcode::Add);
        assert_eq!(add.operands[3], Operand::Modifier("lsl #2".to_string()));
    }

    #[test]
    fn test_constant_on_the_left_is_reduced_too() {
        let instructions = multiply_in_order(Architecture::Arm64, 8, true);
        let shift = &instructions[1].operations[0];
        assert_eq!(shift.opcode, Opcode::ShiftLeft);
        assert_eq!(shift.operands[2], Operand::Immediate(3));

        let instructions = multiply_in_order(Architecture::X64, 8, true);
        assert_eq!(instructions[1].operations[0].opcode, Opcode::LoadAddress);

        let instructions = multiply_in_order(Architecture::X64, 7, true);
        let multiply = &instructions[1].operations[0];
        assert_eq!(multiply.opcode, Opcode::Multiply);
        assert_eq!(multiply.operands[2], Operand::Immediate(7));
    }

    #[test]
    fn test_general_constant_uses_three_operand_multiply() {
        let instructions = multiply(Architecture::X64, 7);
        let multiply = &instructions[1].operations[0];
        assert_eq!(multiply.opcode, Opcode::Multiply);
        assert_eq!(multiply.operands[2], Operand::Immediate(7));
    }

    #[test]
    fn test_value_surviving_a_call_is_evacuated() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (contexts, function) = contexts();
        let mut tree = SyntaxTree::new();
        let mut unit = Unit::new(&mut tree, &contexts, function, BackendConfig::new(Architecture::X64));
        unit.initialize().unwrap();

        let a = unit.get_variable(contexts.function(function).parameters[0]).unwrap();
        let one = unit.create_constant(Number::Integer(1), Format::I64);
        unit.append(InstructionKind::Evacuate, Format::I64);
        let call = unit.append(
            InstructionKind::Call {
                symbol: "g".to_string(),
                arguments: vec![one],
            },
            Format::I64,
        );
        let sum = unit.append(
            InstructionKind::Addition {
                first: a,
                second: call,
            },
            Format::I64,
        );
        unit.append(InstructionKind::Return { value: Some(sum) }, Format::I64);
        unit.build().unwrap();

        let evacuate = &unit.instructions()[1].operations;
        assert_eq!(
            evacuate[0].operands,
            vec![Operand::Register(RBX), Operand::Register(RDI)]
        );
        let call = &unit.instructions()[2].operations;
        assert_eq!(call.last().map(|op| op.opcode), Some(Opcode::Call));
        assert_eq!(unit.spills(), 0);
    }
}

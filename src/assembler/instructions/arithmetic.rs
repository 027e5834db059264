//! Addition, subtraction and multiplication.
//!
//! x86-64 arithmetic is two-address, so the destination is preloaded with the first operand
//! unless an address computation (`lea`) can produce the result without touching it. AArch64
//! arithmetic is three-address. Multiplication by a constant is strength reduced to shifts
//! and address computations where the constant allows it.

use crate::assembler::handle::Handle;
use crate::assembler::memory::Access;
use crate::assembler::operand::{Base, MemoryOperand, Opcode, Operand};
use crate::assembler::result::ResultId;
use crate::assembler::target::Target;
use crate::assembler::unit::Unit;
use crate::ast::Number;
use crate::core::config::Format;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::AsmReg;
use log::trace;

/// Largest shift an x86-64 address scale can express.
const MAX_ADDRESS_SHIFT: u32 = 3;

impl Unit<'_> {
    pub(super) fn build_additive(
        &mut self,
        opcode: Opcode,
        first: ResultId,
        second: ResultId,
        result: ResultId,
    ) -> CompileResult<()> {
        if self.results.format(result).is_decimal() {
            return self.build_decimal(opcode, first, second, result);
        }

        if !self.is_x64() {
            let left = self.load(first)?;
            let right = self.operand(second, Access::RegisterOrImmediate)?;
            let destination = self.reusable_destination(first, result)?;
            self.emit(
                opcode,
                vec![Operand::Register(destination), Operand::Register(left), right],
            );
            return Ok(());
        }

        if opcode == Opcode::Add && self.addable_as_address(first, second) {
            let base = self.load(first)?;
            let memory = match self.operand(second, Access::RegisterOrImmediate)? {
                Operand::Register(index) => MemoryOperand::indexed(Base::Register(base), index, 1, 0),
                Operand::Immediate(value) => MemoryOperand::new(Base::Register(base), value),
                other => {
                    return Err(CompileError::internal(format!(
                        "unexpected address operand {other:?}"
                    )))
                }
            };
            let destination = self.allocate_result(result)?;
            self.emit(
                Opcode::LoadAddress,
                vec![Operand::Register(destination), Operand::Memory(memory)],
            );
            return Ok(());
        }

        let source = self.operand(second, Access::Any)?;
        let destination = self.load_for_write(first, result)?;
        self.emit(opcode, vec![Operand::Register(destination), source]);
        Ok(())
    }

    /// A live register plus a register or a small constant is a single `lea`.
    fn addable_as_address(&self, first: ResultId, second: ResultId) -> bool {
        let Handle::Register(_) = self.results.handle(first) else {
            return false;
        };
        if self.results.is_expiring(first, self.position) {
            return false;
        }
        match self.results.handle(second) {
            Handle::Register(register) => !register.is_media(),
            Handle::Constant(Number::Integer(value)) => i32::try_from(*value).is_ok(),
            _ => false,
        }
    }

    fn build_decimal(
        &mut self,
        opcode: Opcode,
        first: ResultId,
        second: ResultId,
        result: ResultId,
    ) -> CompileResult<()> {
        if self.is_x64() {
            let source = if self.results.format(second).is_decimal() {
                self.operand(second, Access::Any)?
            } else {
                Operand::Register(self.load_as(second, Format::Decimal)?)
            };
            let destination = self.load_for_write(first, result)?;
            self.emit(opcode, vec![Operand::Register(destination), source]);
            return Ok(());
        }

        let left = self.load_as(first, Format::Decimal)?;
        let right = self.load_as(second, Format::Decimal)?;
        let destination = self.reusable_destination(first, result)?;
        self.emit(
            opcode,
            vec![
                Operand::Register(destination),
                Operand::Register(left),
                Operand::Register(right),
            ],
        );
        Ok(())
    }

    /// Destination of a three-address operation: the register of an expiring first
    /// operand when it is in the right bank, a fresh one otherwise.
    fn reusable_destination(&mut self, first: ResultId, result: ResultId) -> CompileResult<AsmReg> {
        let bank = Target::bank(self.results.format(result));
        if let Handle::Register(register) = self.results.handle(first).clone() {
            if register.bank == bank
                && self.registers.get_assignment(register) == Some(first)
                && self.results.is_expiring(first, self.position)
            {
                self.assign_result(result, register)?;
                self.registers.lock_register(register)?;
                return Ok(register);
            }
        }
        self.allocate_result(result)
    }

    pub(super) fn build_multiplication(
        &mut self,
        first: ResultId,
        second: ResultId,
        result: ResultId,
    ) -> CompileResult<()> {
        if self.results.format(result).is_decimal() {
            return self.build_decimal(Opcode::Multiply, first, second, result);
        }

        if let Handle::Constant(Number::Integer(constant)) = self.results.handle(second).clone() {
            return self.build_constant_multiplication(first, constant, second, result);
        }
        if let Handle::Constant(Number::Integer(constant)) = self.results.handle(first).clone() {
            return self.build_constant_multiplication(second, constant, first, result);
        }

        if self.is_x64() {
            let source = self.operand(second, Access::Any)?;
            let destination = self.load_for_write(first, result)?;
            self.emit(Opcode::Multiply, vec![Operand::Register(destination), source]);
        } else {
            let left = self.load(first)?;
            let right = self.load(second)?;
            let destination = self.reusable_destination(first, result)?;
            self.emit(
                Opcode::Multiply,
                vec![
                    Operand::Register(destination),
                    Operand::Register(left),
                    Operand::Register(right),
                ],
            );
        }
        Ok(())
    }

    fn build_constant_multiplication(
        &mut self,
        first: ResultId,
        constant: i64,
        second: ResultId,
        result: ResultId,
    ) -> CompileResult<()> {
        if constant > 0 && (constant as u64).is_power_of_two() {
            let shift = constant.trailing_zeros();
            trace!("multiplication by {constant} becomes a shift by {shift}");
            return self.build_shift(first, shift, result);
        }

        if constant > 2 && ((constant - 1) as u64).is_power_of_two() {
            let shift = (constant - 1).trailing_zeros();
            if self.is_x64() && shift <= MAX_ADDRESS_SHIFT {
                let index = self.load(first)?;
                let destination = self.reusable_destination(first, result)?;
                let memory = MemoryOperand::indexed(Base::Register(index), index, 1 << shift, 0);
                self.emit(
                    Opcode::LoadAddress,
                    vec![Operand::Register(destination), Operand::Memory(memory)],
                );
                return Ok(());
            }
            if !self.is_x64() {
                let value = self.load(first)?;
                let destination = self.reusable_destination(first, result)?;
                self.emit(
                    Opcode::Add,
                    vec![
                        Operand::Register(destination),
                        Operand::Register(value),
                        Operand::Register(value),
                        Operand::Modifier(format!("lsl #{shift}")),
                    ],
                );
                return Ok(());
            }
        }

        if self.is_x64() && i32::try_from(constant).is_ok() {
            let source = self.operand(first, Access::Any)?;
            let destination = self.reusable_destination(first, result)?;
            self.emit(
                Opcode::Multiply,
                vec![Operand::Register(destination), source, Operand::Immediate(constant)],
            );
            return Ok(());
        }

        if self.is_x64() {
            let source = self.operand(second, Access::Any)?;
            let destination = self.load_for_write(first, result)?;
            self.emit(Opcode::Multiply, vec![Operand::Register(destination), source]);
            return Ok(());
        }

        let left = self.load(first)?;
        let right = self.load(second)?;
        let destination = self.reusable_destination(first, result)?;
        self.emit(
            Opcode::Multiply,
            vec![
                Operand::Register(destination),
                Operand::Register(left),
                Operand::Register(right),
            ],
        );
        Ok(())
    }

    fn build_shift(&mut self, first: ResultId, shift: u32, result: ResultId) -> CompileResult<()> {
        if !self.is_x64() {
            let value = self.load(first)?;
            let destination = self.reusable_destination(first, result)?;
            self.emit(
                Opcode::ShiftLeft,
                vec![
                    Operand::Register(destination),
                    Operand::Register(value),
                    Operand::Immediate(i64::from(shift)),
                ],
            );
            return Ok(());
        }

        let register_resident = matches!(self.results.handle(first), Handle::Register(_));
        if shift <= MAX_ADDRESS_SHIFT
            && register_resident
            && !self.results.is_expiring(first, self.position)
        {
            let index = self.load(first)?;
            let destination = self.allocate_result(result)?;
            self.emit(
                Opcode::LoadAddress,
                vec![
                    Operand::Register(destination),
                    Operand::Memory(MemoryOperand::scaled(index, 1 << shift)),
                ],
            );
            return Ok(());
        }

        let destination = self.load_for_write(first, result)?;
        self.emit(
            Opcode::ShiftLeft,
            vec![Operand::Register(destination), Operand::Immediate(i64::from(shift))],
        );
        Ok(())
    }

    /// Retarget the last operation of the instruction that produced `value` so that it
    /// writes `target` directly. Possible only when the producer is the previous
    /// instruction and `value` dies here. On success `owner` owns `target` and `value`
    /// lives there.
    pub(super) fn try_redirect(
        &mut self,
        value: ResultId,
        target: AsmReg,
        owner: ResultId,
    ) -> CompileResult<bool> {
        let Some(producer) = self.results.instruction(value) else {
            return Ok(false);
        };
        if producer + 1 != self.position || !self.results.is_expiring(value, self.position) {
            return Ok(false);
        }
        let Handle::Register(register) = *self.results.handle(value) else {
            return Ok(false);
        };
        if register == target
            || register.bank != target.bank
            || self.registers.get_assignment(register) != Some(value)
            || self.instructions[producer].result != value
        {
            return Ok(false);
        }

        let x64 = self.is_x64();
        let Some(operation) = self.instructions[producer].operations.last_mut() else {
            return Ok(false);
        };
        if operation.operands.first() != Some(&Operand::Register(register)) {
            return Ok(false);
        }

        let redirected = match operation.opcode {
            Opcode::ShiftLeft if x64 => match operation.operands.get(1) {
                Some(&Operand::Immediate(shift)) if (0..=i64::from(MAX_ADDRESS_SHIFT)).contains(&shift) => {
                    operation.opcode = Opcode::LoadAddress;
                    operation.operands = vec![
                        Operand::Register(target),
                        Operand::Memory(MemoryOperand::scaled(register, 1 << shift)),
                    ];
                    true
                }
                _ => false,
            },
            Opcode::Multiply if x64 => {
                if operation.operands.len() == 3 {
                    operation.operands[0] = Operand::Register(target);
                    true
                } else {
                    false
                }
            }
            Opcode::LoadAddress | Opcode::Move => {
                operation.operands[0] = Operand::Register(target);
                true
            }
            Opcode::Add | Opcode::Subtract | Opcode::Multiply | Opcode::ShiftLeft if !x64 => {
                operation.operands[0] = Operand::Register(target);
                true
            }
            _ => false,
        };
        if !redirected {
            return Ok(false);
        }

        trace!(
            "redirected {} from {} to {}",
            value,
            self.target.register_name(register),
            self.target.register_name(target)
        );
        self.registers.free_register(register)?;
        self.registers.assign_register(target, owner)?;
        self.results.set(value, Handle::Register(target), false);
        if owner != value {
            self.results.set(owner, Handle::Register(target), false);
        }
        Ok(true)
    }
}

// This module holds the register and memory plumbing of the build pass. Instruction builds
// ask for operands in a given access class and these helpers make the value fit: constants
// become immediates when the encoding has room for them, memory stays memory where the
// architecture can address it (x86-64) and anything else is loaded into a register. Registers
// are handed out volatile-first; when a bank is exhausted a clock sweep picks a victim whose
// value is spilled to a fresh temporary slot. Registers obtained while building one
// instruction stay locked until that instruction is finished. The parallel move turns a set
// of simultaneous location assignments (scope merges, loop symmetry, call arguments) into a
// sequence of transfers, breaking cycles with an exchange on x86-64 or through the reserved
// scratch register.

//! Operand materialization, spilling and parallel moves.

use crate::assembler::handle::Handle;
use crate::assembler::operand::{Base, MachineOp, MemoryOperand, Opcode, Operand, SlotKey};
use crate::assembler::result::ResultId;
use crate::assembler::target::Target;
use crate::assembler::unit::Unit;
use crate::ast::Number;
use crate::core::config::{Architecture, Format, Size};
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{AsmReg, RegAllocError, RegBank, RegBitSet};
use log::trace;

/// What an instruction accepts for an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Register,
    RegisterOrImmediate,
    /// Register, immediate or memory.
    Any,
}

impl Unit<'_> {
    pub(crate) fn emit(&mut self, opcode: Opcode, operands: Vec<Operand>) {
        self.operations
            .push(MachineOp::new(opcode, operands, Size::Qword));
    }

    pub(crate) fn is_x64(&self) -> bool {
        self.config.architecture == Architecture::X64
    }

    /// Whether an arithmetic or compare encoding can carry the value inline.
    pub(crate) fn immediate_fits(&self, value: i64) -> bool {
        match self.config.architecture {
            Architecture::X64 => i32::try_from(value).is_ok(),
            Architecture::Arm64 => (0..4096).contains(&value),
        }
    }

    /// Give `owner` a register of `bank`, spilling a victim when the bank is full.
    /// The register is locked until the current instruction is finished.
    pub(crate) fn allocate_register(&mut self, bank: RegBank, owner: ResultId) -> CompileResult<AsmReg> {
        let none = RegBitSet::new();
        let register = match self.registers.find_free(bank, &none) {
            Some(register) => register,
            None => {
                let victim = self
                    .registers
                    .find_clocked_evictable(bank, &none)
                    .ok_or(RegAllocError::NoRegistersAvailable)?;
                self.spill(victim)?;
                victim
            }
        };

        self.registers.assign_register(register, owner)?;
        self.registers.lock_register(register)?;
        trace!("assigned {} to {}", self.target.register_name(register), owner);
        Ok(register)
    }

    /// Like [`Unit::allocate_register`], but the register also becomes the owner's handle.
    pub(crate) fn allocate_result(&mut self, owner: ResultId) -> CompileResult<AsmReg> {
        let bank = Target::bank(self.results.format(owner));
        let register = self.allocate_register(bank, owner)?;
        self.results.set(owner, Handle::Register(register), false);
        Ok(register)
    }

    /// Make `register` the home of `owner` after a transfer into it.
    pub(crate) fn assign_result(&mut self, owner: ResultId, register: AsmReg) -> CompileResult<()> {
        self.registers.assign_register(register, owner)?;
        self.results.set(owner, Handle::Register(register), false);
        Ok(())
    }

    /// Store the value living in `register` to a fresh temporary slot when it is still needed,
    /// then free the register.
    pub(crate) fn spill(&mut self, register: AsmReg) -> CompileResult<()> {
        let Some(owner) = self.registers.get_assignment(register) else {
            return Ok(());
        };

        let resident = self.results.handle(owner).register() == Some(register);
        if resident && self.results.is_valid(owner, self.position) {
            let slot = Handle::TemporaryMemory {
                identity: self.create_temporary(),
                size: Size::Qword,
            };
            let memory = self.memory_operand(&slot)?;
            self.emit(
                Opcode::Move,
                vec![Operand::Memory(memory), Operand::Register(register)],
            );
            trace!("spilled {} from {} to {}", owner, self.target.register_name(register), slot);
            self.results.set(owner, slot, false);
            self.spills += 1;
        }

        self.registers.free_register(register)?;
        Ok(())
    }

    fn lock_if_allocated(&mut self, register: AsmReg) -> CompileResult<()> {
        if self.registers.is_allocated(register) {
            self.registers.lock_register(register)?;
        }
        Ok(())
    }

    /// Value of `result` in a register, loading it into a temporary one when needed.
    pub(crate) fn load(&mut self, result: ResultId) -> CompileResult<AsmReg> {
        let handle = self.results.handle(result).clone();
        if let Handle::Register(register) = handle {
            self.lock_if_allocated(register)?;
            return Ok(register);
        }

        let format = self.results.format(result);
        let register = self.allocate_register(Target::bank(format), result)?;
        self.transfer_to_register(register, &handle, format)?;
        Ok(register)
    }

    /// Value of `result` in a register of `format`'s bank, converting integers to decimals.
    pub(crate) fn load_as(&mut self, result: ResultId, format: Format) -> CompileResult<AsmReg> {
        let source = self.results.format(result);
        if source.is_decimal() == format.is_decimal() {
            return self.load(result);
        }
        if source.is_decimal() {
            return Err(CompileError::Unsupported {
                operation: "implicit decimal to integer conversion".to_string(),
                architecture: self.config.architecture,
            });
        }

        if let Handle::Constant(value) = self.results.handle(result).clone() {
            let converted = self.create_result(
                Handle::Constant(Number::Decimal(value.as_f64())),
                Format::Decimal,
            );
            self.results.use_at(converted, self.position);
            return self.load(converted);
        }

        let integer = self.load(result)?;
        let converted = self.create_result(Handle::None, Format::Decimal);
        self.results.use_at(converted, self.position);
        let register = self.allocate_register(Target::bank(Format::Decimal), converted)?;
        self.emit(
            Opcode::ConvertToDecimal,
            vec![Operand::Register(register), Operand::Register(integer)],
        );
        Ok(register)
    }

    /// A register the instruction result may overwrite, preloaded with `first`.
    /// An expiring register value is reused in place.
    pub(crate) fn load_for_write(&mut self, first: ResultId, result: ResultId) -> CompileResult<AsmReg> {
        let format = self.results.format(result);
        let first_format = self.results.format(first);
        if let Handle::Register(register) = self.results.handle(first).clone() {
            let owned = self.registers.get_assignment(register) == Some(first);
            if owned
                && first_format.is_decimal() == format.is_decimal()
                && self.results.is_expiring(first, self.position)
            {
                self.assign_result(result, register)?;
                self.registers.lock_register(register)?;
                return Ok(register);
            }
        }

        let source = if first_format.is_decimal() == format.is_decimal() {
            self.results.handle(first).clone()
        } else {
            Handle::Register(self.load_as(first, format)?)
        };
        let register = self.allocate_result(result)?;
        self.transfer_to_register(register, &source, format)?;
        Ok(register)
    }

    /// Operand for `result` under the given access class.
    pub(crate) fn operand(&mut self, result: ResultId, access: Access) -> CompileResult<Operand> {
        let handle = self.results.handle(result).clone();
        let format = self.results.format(result);
        let memory_allowed = access == Access::Any && self.is_x64();

        match handle {
            Handle::Register(register) => {
                self.lock_if_allocated(register)?;
                Ok(Operand::Register(register))
            }
            Handle::Constant(Number::Integer(value))
                if access != Access::Register
                    && !format.is_decimal()
                    && self.immediate_fits(value) =>
            {
                Ok(Operand::Immediate(value))
            }
            Handle::Constant(Number::Decimal(value)) if memory_allowed && format.is_decimal() => {
                let identifier = self.constant_data(Number::Decimal(value));
                Ok(Operand::Memory(MemoryOperand::new(
                    Base::ConstantData(identifier),
                    0,
                )))
            }
            ref h if memory_allowed && (h.is_slot() || h.is_indirect()) => {
                Ok(Operand::Memory(self.memory_operand(h)?))
            }
            Handle::ConstantData { identifier, .. } if memory_allowed => Ok(Operand::Memory(
                MemoryOperand::new(Base::ConstantData(identifier), 0),
            )),
            _ => Ok(Operand::Register(self.load(result)?)),
        }
    }

    /// Base of an address computed from `start`.
    fn address_base(&mut self, start: ResultId) -> CompileResult<Base> {
        match self.results.handle(start).clone() {
            Handle::Inline { identity, .. } => Ok(Base::Slot(SlotKey::Inline(identity))),
            _ => Ok(Base::Register(self.load(start)?)),
        }
    }

    /// Force a frame-slot base into a register (AArch64 cannot index off a slot).
    fn base_register(&mut self, base: Base) -> CompileResult<Base> {
        match base {
            Base::Slot(_) | Base::ConstantData(_) => {
                let register = self.scratch_register(Format::I64)?;
                self.emit(
                    Opcode::LoadAddress,
                    vec![
                        Operand::Register(register),
                        Operand::Memory(MemoryOperand::new(base, 0)),
                    ],
                );
                Ok(Base::Register(register))
            }
            base => Ok(base),
        }
    }

    /// A short-lived register owned by a fresh result that expires with this instruction.
    pub(crate) fn scratch_register(&mut self, format: Format) -> CompileResult<AsmReg> {
        let owner = self.create_result(Handle::None, format);
        self.results.use_at(owner, self.position);
        self.allocate_register(Target::bank(format), owner)
    }

    /// Addressing form of a memory-resident handle.
    pub(crate) fn memory_operand(&mut self, handle: &Handle) -> CompileResult<MemoryOperand> {
        match handle {
            Handle::StackVariable(variable) => {
                Ok(MemoryOperand::new(Base::Slot(SlotKey::Variable(*variable)), 0))
            }
            Handle::TemporaryMemory { identity, .. } => {
                Ok(MemoryOperand::new(Base::Slot(SlotKey::Temporary(*identity)), 0))
            }
            Handle::ConstantData { identifier, .. } => Ok(MemoryOperand::new(
                Base::ConstantData(identifier.clone()),
                0,
            )),
            Handle::Memory { start, offset } => {
                let base = self.address_base(*start)?;
                Ok(MemoryOperand::new(base, *offset))
            }
            Handle::ComplexMemory {
                start,
                offset,
                stride,
            } => {
                if let Handle::Constant(index) = self.results.handle(*offset).clone() {
                    let base = self.address_base(*start)?;
                    return Ok(MemoryOperand::new(base, index.as_i64() * stride));
                }

                let mut index = self.load(*offset)?;
                let mut scale = *stride;
                let supported = match self.config.architecture {
                    Architecture::X64 => matches!(scale, 1 | 2 | 4 | 8),
                    Architecture::Arm64 => matches!(scale, 1 | 8),
                };
                if !supported {
                    let scaled = self.scratch_register(Format::I64)?;
                    self.emit_scaled_index(scaled, index, scale)?;
                    index = scaled;
                    scale = 1;
                }

                let mut base = self.address_base(*start)?;
                if !self.is_x64() {
                    base = self.base_register(base)?;
                }
                Ok(MemoryOperand::indexed(base, index, scale, 0))
            }
            other => Err(CompileError::internal(format!(
                "handle '{other}' does not describe memory"
            ))),
        }
    }

    fn emit_scaled_index(&mut self, destination: AsmReg, index: AsmReg, scale: i64) -> CompileResult<()> {
        if self.is_x64() {
            self.emit(
                Opcode::Multiply,
                vec![
                    Operand::Register(destination),
                    Operand::Register(index),
                    Operand::Immediate(scale),
                ],
            );
        } else {
            self.emit(
                Opcode::Move,
                vec![Operand::Register(destination), Operand::Immediate(scale)],
            );
            self.emit(
                Opcode::Multiply,
                vec![
                    Operand::Register(destination),
                    Operand::Register(index),
                    Operand::Register(destination),
                ],
            );
        }
        Ok(())
    }

    /// Write the value described by `source` into `register`.
    pub(crate) fn transfer_to_register(
        &mut self,
        register: AsmReg,
        source: &Handle,
        format: Format,
    ) -> CompileResult<()> {
        let destination = Operand::Register(register);
        match source {
            Handle::Register(other) if *other == register => {}
            Handle::Register(other) => {
                self.emit(Opcode::Move, vec![destination, Operand::Register(*other)])
            }
            Handle::Constant(value) => {
                if register.is_media() {
                    let value = Number::Decimal(value.as_f64());
                    let identifier = self.constant_data(value);
                    let memory = MemoryOperand::new(Base::ConstantData(identifier), 0);
                    self.emit(Opcode::Move, vec![destination, Operand::Memory(memory)]);
                } else {
                    self.emit(Opcode::Move, vec![destination, Operand::Immediate(value.as_i64())]);
                }
            }
            Handle::Inline { identity, .. } => {
                let memory = MemoryOperand::new(Base::Slot(SlotKey::Inline(identity.clone())), 0);
                self.emit(Opcode::LoadAddress, vec![destination, Operand::Memory(memory)]);
            }
            Handle::Expression {
                multiplicand,
                multiplier,
                addition,
                constant,
            } => self.transfer_expression(register, *multiplicand, *multiplier, *addition, *constant)?,
            Handle::None | Handle::Modifier(_) => {
                return Err(CompileError::internal(format!(
                    "cannot load a value from '{source}' ({format})"
                )))
            }
            memory => {
                let memory = self.memory_operand(memory)?;
                self.emit(Opcode::Move, vec![destination, Operand::Memory(memory)]);
            }
        }
        Ok(())
    }

    fn transfer_expression(
        &mut self,
        register: AsmReg,
        multiplicand: ResultId,
        multiplier: i64,
        addition: Option<ResultId>,
        constant: i64,
    ) -> CompileResult<()> {
        let index = self.load(multiplicand)?;
        let base = match addition {
            Some(addition) => Some(self.load(addition)?),
            None => None,
        };

        if self.is_x64() && matches!(multiplier, 1 | 2 | 4 | 8) {
            let memory = match base {
                Some(base) => MemoryOperand::indexed(Base::Register(base), index, multiplier, constant),
                None => MemoryOperand {
                    displacement: constant,
                    ..MemoryOperand::scaled(index, multiplier)
                },
            };
            self.emit(
                Opcode::LoadAddress,
                vec![Operand::Register(register), Operand::Memory(memory)],
            );
            return Ok(());
        }

        self.emit_scaled_index(register, index, multiplier)?;
        if let Some(base) = base {
            self.emit(
                Opcode::Add,
                vec![Operand::Register(register), Operand::Register(register), Operand::Register(base)],
            );
        }
        if constant != 0 {
            self.emit(
                Opcode::Add,
                vec![Operand::Register(register), Operand::Register(register), Operand::Immediate(constant)],
            );
        }
        Ok(())
    }

    /// Register reserved for transfers that cannot go through an allocated one.
    fn reserved_scratch(&self, format: Format) -> Option<AsmReg> {
        if format.is_decimal() {
            Some(self.target.media_scratch)
        } else {
            self.target.scratch
        }
    }

    /// Write `source` into `destination` where both are plain locations or constants.
    pub(crate) fn transfer(&mut self, destination: &Handle, source: &Handle, format: Format) -> CompileResult<()> {
        if let Handle::Register(register) = destination {
            return self.transfer_to_register(*register, source, format);
        }

        let memory = self.memory_operand(destination)?;
        match source {
            Handle::Register(register) => {
                self.emit(
                    Opcode::Move,
                    vec![Operand::Memory(memory), Operand::Register(*register)],
                );
            }
            Handle::Constant(Number::Integer(value))
                if self.is_x64() && !format.is_decimal() && i32::try_from(*value).is_ok() =>
            {
                self.emit(
                    Opcode::Move,
                    vec![Operand::Memory(memory), Operand::Immediate(*value)],
                );
            }
            _ if self.is_x64() && !format.is_decimal() => {
                // Memory to memory through the stack keeps every register intact
                let source = match source {
                    Handle::Constant(value) => {
                        let identifier = self.constant_data(*value);
                        MemoryOperand::new(Base::ConstantData(identifier), 0)
                    }
                    other => self.memory_operand(other)?,
                };
                self.emit(Opcode::Push, vec![Operand::Memory(source)]);
                self.emit(Opcode::Pop, vec![Operand::Memory(memory)]);
            }
            _ => {
                let scratch = self.reserved_scratch(format).ok_or_else(|| {
                    CompileError::internal("no scratch register for a memory transfer")
                })?;
                self.transfer_to_register(scratch, source, format)?;
                self.emit(
                    Opcode::Move,
                    vec![Operand::Memory(memory), Operand::Register(scratch)],
                );
            }
        }
        Ok(())
    }

    /// Perform every `destination <- source` assignment as if simultaneously.
    ///
    /// Owners of destination registers that are still needed are spilled first, unless they
    /// are sources themselves or listed in `replaced`.
    pub(crate) fn parallel_move(
        &mut self,
        moves: Vec<(Handle, ResultId)>,
        replaced: &[ResultId],
    ) -> CompileResult<()> {
        let mut pending: Vec<(Handle, Handle, Format)> = Vec::new();
        for (destination, source) in &moves {
            let format = self.results.format(*source);
            let location = match self.results.handle(*source).clone() {
                handle @ (Handle::Register(_)
                | Handle::Constant(_)
                | Handle::ConstantData { .. }
                | Handle::StackVariable(_)
                | Handle::TemporaryMemory { .. }) => handle,
                _ => Handle::Register(self.load(*source)?),
            };
            if location != *destination {
                pending.push((destination.clone(), location, format));
            }
        }

        for (_, source, _) in &pending {
            if let Handle::Register(register) = source {
                self.lock_if_allocated(*register)?;
            }
        }

        let sources: Vec<ResultId> = moves.iter().map(|(_, source)| *source).collect();
        for index in 0..pending.len() {
            let Handle::Register(register) = pending[index].0 else {
                continue;
            };
            let Some(owner) = self.registers.get_assignment(register) else {
                continue;
            };
            let read = pending.iter().any(|(_, source, _)| *source == Handle::Register(register));
            let needed = self.results.is_valid(owner, self.position + 1)
                && self.results.handle(owner).register() == Some(register);
            if needed && !read && !sources.contains(&owner) && !replaced.contains(&owner) {
                self.spill(register)?;
            }
        }

        while !pending.is_empty() {
            let free = (0..pending.len()).find(|&i| {
                pending
                    .iter()
                    .enumerate()
                    .all(|(j, other)| j == i || other.1 != pending[i].0)
            });

            if let Some(index) = free {
                let (destination, source, format) = pending.remove(index);
                self.transfer(&destination, &source, format)?;
                continue;
            }

            let (destination, source, format) = pending[0].clone();
            let exchange = self.is_x64()
                && !format.is_decimal()
                && (matches!(destination, Handle::Register(_)) || matches!(source, Handle::Register(_)));

            if exchange {
                let left = self.location_operand(&destination)?;
                let right = self.location_operand(&source)?;
                self.emit(Opcode::Exchange, vec![left, right]);
                trace!("exchanged {} and {}", destination, source);
                pending.remove(0);
                for other in pending.iter_mut() {
                    if other.1 == destination {
                        other.1 = source.clone();
                    } else if other.1 == source {
                        other.1 = destination.clone();
                    }
                }
                pending.retain(|(destination, source, _)| destination != source);
            } else {
                let scratch = self.reserved_scratch(format).ok_or_else(|| {
                    CompileError::internal("cannot break a cycle between memory locations")
                })?;
                self.transfer(&Handle::Register(scratch), &destination, format)?;
                for other in pending.iter_mut() {
                    if other.1 == destination {
                        other.1 = Handle::Register(scratch);
                    }
                }
            }
        }
        Ok(())
    }

    fn location_operand(&mut self, handle: &Handle) -> CompileResult<Operand> {
        match handle {
            Handle::Register(register) => Ok(Operand::Register(*register)),
            other => Ok(Operand::Memory(self.memory_operand(other)?)),
        }
    }

    /// Write the value of `source` into the location `destination`.
    pub(crate) fn move_into(&mut self, destination: &Handle, source: ResultId) -> CompileResult<()> {
        let format = self.results.format(source);
        match destination {
            Handle::Register(register) => {
                let handle = self.results.handle(source).clone();
                self.transfer_to_register(*register, &handle, format)
            }
            _ => {
                let value = if self.is_x64() && !format.is_decimal() {
                    self.operand(source, Access::RegisterOrImmediate)?
                } else {
                    Operand::Register(self.load(source)?)
                };
                let memory = self.memory_operand(destination)?;
                self.emit(Opcode::Move, vec![Operand::Memory(memory), value]);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SyntaxTree;
    use crate::context::{ContextTree, GLOBAL};
    use crate::core::config::BackendConfig;

    fn with_unit<F>(architecture: Architecture, f: F)
    where
        F: FnOnce(&mut Unit<'_>),
    {
        let mut contexts = ContextTree::new();
        let function = contexts.declare_function(GLOBAL, "f", &[], None).unwrap();
        let mut tree = SyntaxTree::new();
        let mut unit = Unit::new(&mut tree, &contexts, function, BackendConfig::new(architecture));
        f(&mut unit);
    }

    fn live(unit: &mut Unit<'_>, register: AsmReg) -> ResultId {
        let result = unit.create_result(Handle::Register(register), Format::I64);
        unit.results.use_at(result, 0);
        unit.results.use_at(result, 4);
        unit.registers.assign_register(register, result).unwrap();
        result
    }

    #[test]
    fn test_swap_uses_exchange_on_x64() {
        with_unit(Architecture::X64, |unit| {
            let a = live(unit, AsmReg::gp(0));
            let b = live(unit, AsmReg::gp(1));
            unit.parallel_move(
                vec![
                    (Handle::Register(AsmReg::gp(1)), a),
                    (Handle::Register(AsmReg::gp(0)), b),
                ],
                &[a, b],
            )
            .unwrap();
            assert_eq!(unit.operations.len(), 1);
            assert_eq!(unit.operations[0].opcode, Opcode::Exchange);
        });
    }

    #[test]
    fn test_swap_uses_scratch_on_arm64() {
        with_unit(Architecture::Arm64, |unit| {
            let a = live(unit, AsmReg::gp(0));
            let b = live(unit, AsmReg::gp(1));
            unit.parallel_move(
                vec![
                    (Handle::Register(AsmReg::gp(1)), a),
                    (Handle::Register(AsmReg::gp(0)), b),
                ],
                &[a, b],
            )
            .unwrap();
            let opcodes: Vec<Opcode> = unit.operations.iter().map(|op| op.opcode).collect();
            assert_eq!(opcodes, vec![Opcode::Move; 3]);
            assert_eq!(unit.operations[0].operands[0], Operand::Register(AsmReg::gp(16)));
        });
    }

    #[test]
    fn test_chain_is_ordered() {
        with_unit(Architecture::X64, |unit| {
            let a = live(unit, AsmReg::gp(0));
            let b = live(unit, AsmReg::gp(1));
            // rdx <- rcx must happen before rcx <- rax
            unit.parallel_move(
                vec![
                    (Handle::Register(AsmReg::gp(1)), a),
                    (Handle::Register(AsmReg::gp(2)), b),
                ],
                &[],
            )
            .unwrap();
            assert_eq!(
                unit.operations[0].operands,
                vec![Operand::Register(AsmReg::gp(2)), Operand::Register(AsmReg::gp(1))]
            );
            assert_eq!(
                unit.operations[1].operands,
                vec![Operand::Register(AsmReg::gp(1)), Operand::Register(AsmReg::gp(0))]
            );
        });
    }

    #[test]
    fn test_live_owner_of_destination_is_spilled() {
        with_unit(Architecture::X64, |unit| {
            let bystander = live(unit, AsmReg::gp(3));
            let value = unit.create_constant(Number::Integer(5), Format::I64);
            unit.parallel_move(vec![(Handle::Register(AsmReg::gp(3)), value)], &[])
                .unwrap();
            assert!(matches!(
                unit.results.handle(bystander),
                Handle::TemporaryMemory { .. }
            ));
            assert_eq!(unit.spills, 1);
            assert_eq!(unit.operations.len(), 2);
        });
    }
}

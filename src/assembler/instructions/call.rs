//! Calls, evacuation of caller-saved registers and returns.

use crate::assembler::handle::Handle;
use crate::assembler::operand::{Opcode, Operand};
use crate::assembler::result::ResultId;
use crate::assembler::target::Target;
use crate::assembler::unit::Unit;
use crate::core::config::Format;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::RegBitSet;
use log::trace;

impl Unit<'_> {
    pub(super) fn build_call(
        &mut self,
        symbol: &str,
        arguments: &[ResultId],
        result: ResultId,
    ) -> CompileResult<()> {
        let formats: Vec<Format> = arguments.iter().map(|&a| self.results.format(a)).collect();
        let registers = self.target.argument_registers(&formats).map_err(|limit| {
            CompileError::internal(format!("call to {symbol} passes more than {limit} arguments"))
        })?;

        let moves = registers
            .into_iter()
            .map(Handle::Register)
            .zip(arguments.iter().copied())
            .collect();
        self.parallel_move(moves, &[])?;
        self.emit(Opcode::Call, vec![Operand::Label(symbol.to_string())]);

        for (register, _) in self.registers.occupants() {
            if self.registers.is_volatile(register) {
                self.registers.free_register(register)?;
            }
        }

        let register = self.target.return_register_for(self.results.format(result));
        self.assign_result(result, register)
    }

    /// Move every value that outlives the following call out of the registers it clobbers.
    /// Values go to free callee-saved registers while there are any and to the stack after.
    pub(super) fn build_evacuate(&mut self) -> CompileResult<()> {
        // Evacuate is always directly followed by its Call
        let after = self.position + 2;
        for (register, owner) in self.registers.occupants() {
            if !self.registers.is_volatile(register)
                || self.results.handle(owner).register() != Some(register)
                || !self.results.is_valid(owner, after)
            {
                continue;
            }

            let bank = Target::bank(self.results.format(owner));
            match self
                .registers
                .find_free_in_class(bank, false, &RegBitSet::new())
            {
                Some(destination) => {
                    self.emit(
                        Opcode::Move,
                        vec![Operand::Register(destination), Operand::Register(register)],
                    );
                    self.registers.free_register(register)?;
                    self.assign_result(owner, destination)?;
                    trace!(
                        "evacuated {} from {} to {}",
                        owner,
                        self.target.register_name(register),
                        self.target.register_name(destination)
                    );
                }
                None => self.spill(register)?,
            }
        }
        Ok(())
    }

    pub(super) fn build_return(&mut self, value: Option<ResultId>) -> CompileResult<()> {
        if let Some(value) = value {
            let format = self.results.format(value);
            let register = self.target.return_register_for(format);
            let redirected = !self.registers.is_allocated(register)
                && self.try_redirect(value, register, value)?;

            if !redirected {
                let handle = self.results.handle(value).clone();
                self.transfer_to_register(register, &handle, format)?;
            }
        }

        self.emit(Opcode::Return, Vec::new());
        Ok(())
    }
}

// This module turns a built Unit into the final output of one function. It collects the
// machine operations of every instruction in order, lays out the frame (variable slots, spill
// slots and inline stack allocations, each rounded to the word size) and rewrites symbolic
// slot bases to stack-pointer relative addresses. Non-volatile registers the body writes or
// reads are saved by the prologue and restored by every return, which the translator expands
// into the epilogue. On x86-64 the frame is sized so the stack stays 16-byte aligned at call
// sites; on AArch64 the frame record (frame pointer and link register) is always pushed and
// registers are saved in pairs. The result is printed as text for either architecture and,
// on request, encoded into bytes for x86-64.

//! Frame layout, prologue/epilogue and emission.

use crate::arm64;
use crate::assembler::instruction::InstructionKind;
use crate::assembler::operand::{Base, MachineOp, MemoryOperand, Opcode, Operand, SlotKey};
use crate::assembler::unit::{ConstantEntry, Unit};
use crate::core::config::{Architecture, BackendConfig, Size};
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::AsmReg;
use crate::x64;
use hashbrown::HashMap;
use log::debug;

/// Everything produced for one function.
#[derive(Debug, Clone)]
pub struct TranslationOutput {
    pub symbol: String,
    /// Final operation stream, prologue and epilogues included.
    pub operations: Vec<MachineOp>,
    pub text: String,
    /// x86-64 machine code, when requested.
    pub bytes: Option<Vec<u8>>,
    pub constants: Vec<ConstantEntry>,
    pub frame_size: u32,
}

/// Frame of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameLayout {
    /// Stack-pointer offset of every slot.
    pub offsets: HashMap<SlotKey, i64>,
    /// Bytes reserved below the saved registers.
    pub size: u32,
    /// Non-volatile registers the prologue saves, in save order.
    pub saved: Vec<AsmReg>,
}

fn align(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

pub struct Translator {
    config: BackendConfig,
    binary: bool,
}

impl Translator {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            binary: false,
        }
    }

    /// Also encode x86-64 bytes.
    pub fn with_binary(mut self, binary: bool) -> Self {
        self.binary = binary;
        self
    }

    pub fn translate(&self, unit: &Unit<'_>) -> CompileResult<TranslationOutput> {
        let body: Vec<MachineOp> = unit
            .instructions()
            .iter()
            .flat_map(|instruction| instruction.operations.iter().cloned())
            .collect();

        let layout = self.layout(unit, &body);
        debug!(
            "{}: frame of {} byte(s), {} saved register(s)",
            unit.symbol(),
            layout.size,
            layout.saved.len()
        );

        let mut operations = self.prologue(&layout);
        for mut operation in body {
            if operation.opcode == Opcode::Return {
                operations.extend(self.epilogue(&layout));
                continue;
            }
            for operand in &mut operation.operands {
                if let Operand::Memory(memory) = operand {
                    self.place(memory, &layout)?;
                }
            }
            operations.push(operation);
        }

        let constants = unit.constants().to_vec();
        let text = match self.config.architecture {
            Architecture::X64 => x64::printer::print(unit.symbol(), &operations, &constants),
            Architecture::Arm64 => arm64::printer::print(unit.symbol(), &operations, &constants),
        };
        let bytes = match (self.binary, self.config.architecture) {
            (false, _) => None,
            (true, Architecture::X64) => {
                Some(x64::encoder::X64Encoder::new()?.encode(&operations, &constants)?)
            }
            (true, architecture) => {
                return Err(CompileError::Unsupported {
                    operation: "binary output".to_string(),
                    architecture,
                })
            }
        };

        Ok(TranslationOutput {
            symbol: unit.symbol().to_string(),
            operations,
            text,
            bytes,
            constants,
            frame_size: layout.size,
        })
    }

    /// Assign every referenced slot an offset and find the registers to save.
    pub fn layout(&self, unit: &Unit<'_>, body: &[MachineOp]) -> FrameLayout {
        let inline: HashMap<&str, u32> = unit
            .instructions()
            .iter()
            .filter_map(|instruction| match &instruction.kind {
                InstructionKind::AllocateStack { identity, bytes } => Some((identity.as_str(), *bytes)),
                _ => None,
            })
            .collect();

        let mut offsets = HashMap::new();
        let mut size = 0u32;
        let mut saved: Vec<AsmReg> = Vec::new();
        for operation in body {
            for operand in &operation.operands {
                if let Operand::Memory(MemoryOperand {
                    base: Some(Base::Slot(key)),
                    ..
                }) = operand
                {
                    if !offsets.contains_key(key) {
                        let bytes = match key {
                            SlotKey::Inline(identity) => {
                                inline.get(identity.as_str()).copied().unwrap_or(8)
                            }
                            _ => Size::Qword.bytes(),
                        };
                        offsets.insert(key.clone(), i64::from(size));
                        size += align(bytes.max(1), 8);
                    }
                }
            }
            for register in operation.registers() {
                let preserved = unit.registers.is_allocatable(register)
                    && !unit.registers.is_volatile(register);
                if preserved && !saved.contains(&register) {
                    saved.push(register);
                }
            }
        }
        saved.sort();

        let size = match self.config.architecture {
            Architecture::X64 => {
                // Return address and pushes come before the frame
                let pushed = 8 * (1 + saved.len() as u32 + u32::from(self.config.debug));
                align(pushed + size, 16) - pushed
            }
            Architecture::Arm64 => align(size, 16),
        };
        FrameLayout {
            offsets,
            size,
            saved,
        }
    }

    fn place(&self, memory: &mut MemoryOperand, layout: &FrameLayout) -> CompileResult<()> {
        if let Some(Base::Slot(key)) = &memory.base {
            let offset = layout
                .offsets
                .get(key)
                .copied()
                .ok_or_else(|| CompileError::internal(format!("slot {key:?} has no frame offset")))?;
            memory.displacement += offset;
            memory.base = Some(Base::Register(self.stack_pointer()));
        }
        Ok(())
    }

    fn stack_pointer(&self) -> AsmReg {
        match self.config.architecture {
            Architecture::X64 => x64::registers::RSP,
            Architecture::Arm64 => arm64::registers::SP,
        }
    }

    fn op(opcode: Opcode, operands: Vec<Operand>) -> MachineOp {
        MachineOp::new(opcode, operands, Size::Qword)
    }

    /// Adjust the stack pointer by `bytes` downwards (`grow`) or upwards.
    fn adjust_stack(&self, bytes: u32, grow: bool) -> Vec<MachineOp> {
        if bytes == 0 {
            return Vec::new();
        }
        let opcode = if grow { Opcode::Subtract } else { Opcode::Add };
        let sp = Operand::Register(self.stack_pointer());
        match self.config.architecture {
            Architecture::X64 => vec![Self::op(opcode, vec![sp, Operand::Immediate(i64::from(bytes))])],
            Architecture::Arm64 if bytes < 4096 => vec![Self::op(
                opcode,
                vec![sp.clone(), sp, Operand::Immediate(i64::from(bytes))],
            )],
            Architecture::Arm64 => {
                let scratch = Operand::Register(arm64::registers::X16);
                vec![
                    Self::op(Opcode::Move, vec![scratch.clone(), Operand::Immediate(i64::from(bytes))]),
                    Self::op(opcode, vec![sp.clone(), sp, scratch]),
                ]
            }
        }
    }

    /// Save pairs of one bank.
    fn pairs(registers: &[AsmReg]) -> Vec<Vec<Operand>> {
        registers
            .chunks(2)
            .map(|chunk| chunk.iter().map(|&r| Operand::Register(r)).collect())
            .collect()
    }

    fn arm64_pairs(layout: &FrameLayout) -> Vec<Vec<Operand>> {
        let (media, general): (Vec<AsmReg>, Vec<AsmReg>) =
            layout.saved.iter().partition(|register| register.is_media());
        let mut pairs = Self::pairs(&general);
        pairs.extend(Self::pairs(&media));
        pairs
    }

    pub fn prologue(&self, layout: &FrameLayout) -> Vec<MachineOp> {
        let mut operations = Vec::new();
        match self.config.architecture {
            Architecture::X64 => {
                if self.config.debug {
                    let rbp = Operand::Register(x64::registers::RBP);
                    operations.push(Self::op(Opcode::Push, vec![rbp.clone()]));
                    operations.push(Self::op(
                        Opcode::Move,
                        vec![rbp, Operand::Register(x64::registers::RSP)],
                    ));
                }
                for &register in &layout.saved {
                    operations.push(Self::op(Opcode::Push, vec![Operand::Register(register)]));
                }
            }
            Architecture::Arm64 => {
                let fp = Operand::Register(arm64::registers::FRAME_POINTER);
                operations.push(Self::op(
                    Opcode::SavePair,
                    vec![fp.clone(), Operand::Register(arm64::registers::LINK_REGISTER)],
                ));
                operations.push(Self::op(
                    Opcode::Move,
                    vec![fp, Operand::Register(arm64::registers::SP)],
                ));
                for pair in Self::arm64_pairs(layout) {
                    operations.push(Self::op(Opcode::SavePair, pair));
                }
            }
        }
        operations.extend(self.adjust_stack(layout.size, true));
        operations
    }

    pub fn epilogue(&self, layout: &FrameLayout) -> Vec<MachineOp> {
        let mut operations = self.adjust_stack(layout.size, false);
        match self.config.architecture {
            Architecture::X64 => {
                for &register in layout.saved.iter().rev() {
                    operations.push(Self::op(Opcode::Pop, vec![Operand::Register(register)]));
                }
                if self.config.debug {
                    operations.push(Self::op(
                        Opcode::Pop,
                        vec![Operand::Register(x64::registers::RBP)],
                    ));
                }
            }
            Architecture::Arm64 => {
                for pair in Self::arm64_pairs(layout).into_iter().rev() {
                    operations.push(Self::op(Opcode::RestorePair, pair));
                }
                operations.push(Self::op(
                    Opcode::RestorePair,
                    vec![
                        Operand::Register(arm64::registers::FRAME_POINTER),
                        Operand::Register(arm64::registers::LINK_REGISTER),
                    ],
                ));
            }
        }
        operations.push(Self::op(Opcode::Return, Vec::new()));
        operations
    }
}

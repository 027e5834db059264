// This module encodes final x86-64 operation streams into machine code with the iced-x86
// code assembler. X64Encoder maps AsmReg values onto iced registers (64-bit general-purpose
// and XMM), turns memory operands into iced memory operands (base, scaled index and 32-bit
// displacement or a RIP-relative reference to a constant data label) and selects the
// instruction form from the opcode and the operand kinds: integer or SSE scalar-double
// moves and arithmetic, lea, shifts, compares, jumps, calls to labels defined in the same
// stream, push/pop and exchanges. Constant data entries are appended after the code under
// their identifiers so RIP-relative loads resolve when the stream is assembled. Calls to
// symbols outside the stream would need relocations and are rejected.

//! x86-64 instruction encoding using iced-x86.

use crate::assembler::operand::{Base, Condition, MachineOp, MemoryOperand, Opcode, Operand};
use crate::assembler::unit::ConstantEntry;
use crate::ast::Number;
use crate::core::register_file::{AsmReg, GP_BANK, MEDIA_BANK};
use hashbrown::{HashMap, HashSet};
use iced_x86::code_asm::*;
use log::trace;

/// Error types for instruction encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Invalid register for the requested operation.
    InvalidRegister,
    /// Unsupported instruction or operand combination.
    UnsupportedInstruction(String),
    /// Assembly error from iced-x86.
    AssemblyError(String),
    /// Memory operand construction failed.
    InvalidMemoryOperand,
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::InvalidRegister => write!(f, "Invalid register for operation"),
            EncodingError::UnsupportedInstruction(form) => {
                write!(f, "Unsupported instruction or operand combination: {form}")
            }
            EncodingError::AssemblyError(msg) => write!(f, "Assembly error: {msg}"),
            EncodingError::InvalidMemoryOperand => write!(f, "Invalid memory operand"),
        }
    }
}

impl std::error::Error for EncodingError {}

impl From<IcedError> for EncodingError {
    fn from(error: IcedError) -> Self {
        EncodingError::AssemblyError(error.to_string())
    }
}

const GP64_REGS: [AsmRegister64; 16] = [
    rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15,
];

const XMM_REGS: [AsmRegisterXmm; 16] = [
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13,
    xmm14, xmm15,
];

fn gp(register: AsmReg) -> Result<AsmRegister64, EncodingError> {
    if register.bank != GP_BANK {
        return Err(EncodingError::InvalidRegister);
    }
    GP64_REGS
        .get(register.id as usize)
        .copied()
        .ok_or(EncodingError::InvalidRegister)
}

fn xmm(register: AsmReg) -> Result<AsmRegisterXmm, EncodingError> {
    if register.bank != MEDIA_BANK {
        return Err(EncodingError::InvalidRegister);
    }
    XMM_REGS
        .get(register.id as usize)
        .copied()
        .ok_or(EncodingError::InvalidRegister)
}

fn unsupported(operation: &MachineOp) -> EncodingError {
    EncodingError::UnsupportedInstruction(format!("{:?} {:?}", operation.opcode, operation.operands))
}

/// Encoder of one function.
pub struct X64Encoder {
    assembler: CodeAssembler,
    labels: HashMap<String, CodeLabel>,
    /// Labels defined by the stream itself.
    defined: HashSet<String>,
}

impl X64Encoder {
    pub fn new() -> Result<Self, EncodingError> {
        Ok(Self {
            assembler: CodeAssembler::new(64)?,
            labels: HashMap::new(),
            defined: HashSet::new(),
        })
    }

    fn label(&mut self, name: &str) -> CodeLabel {
        if let Some(&label) = self.labels.get(name) {
            return label;
        }
        let label = self.assembler.create_label();
        self.labels.insert(name.to_string(), label);
        label
    }

    fn place_label(&mut self, name: &str) -> Result<(), EncodingError> {
        let mut label = self.label(name);
        self.assembler.set_label(&mut label)?;
        self.labels.insert(name.to_string(), label);
        Ok(())
    }

    fn scaled(index: AsmRegister64, scale: i64) -> Result<AsmMemoryOperand, EncodingError> {
        match scale {
            1 => Ok(index * 1),
            2 => Ok(index * 2),
            4 => Ok(index * 4),
            8 => Ok(index * 8),
            _ => Err(EncodingError::InvalidMemoryOperand),
        }
    }

    fn memory(&mut self, memory: &MemoryOperand) -> Result<AsmMemoryOperand, EncodingError> {
        let displacement =
            i32::try_from(memory.displacement).map_err(|_| EncodingError::InvalidMemoryOperand)?;
        match (&memory.base, memory.index) {
            (Some(Base::ConstantData(identifier)), None) if displacement == 0 => {
                Ok(qword_ptr(self.label(identifier)))
            }
            (Some(Base::Register(base)), None) => Ok(qword_ptr(gp(*base)? + displacement)),
            (Some(Base::Register(base)), Some(index)) => {
                let index = Self::scaled(gp(index)?, memory.scale)?;
                Ok(qword_ptr(gp(*base)? + index + displacement))
            }
            (None, Some(index)) => Ok(qword_ptr(Self::scaled(gp(index)?, memory.scale)? + displacement)),
            _ => Err(EncodingError::InvalidMemoryOperand),
        }
    }

    fn immediate32(value: i64) -> Result<i32, EncodingError> {
        i32::try_from(value).map_err(|_| {
            EncodingError::UnsupportedInstruction(format!("immediate {value} needs 64 bits"))
        })
    }

    fn encode_move(&mut self, operation: &MachineOp) -> Result<(), EncodingError> {
        let a = &mut self.assembler;
        match operation.operands.as_slice() {
            [Operand::Register(d), Operand::Register(s)] => match (d.is_media(), s.is_media()) {
                (false, false) => a.mov(gp(*d)?, gp(*s)?)?,
                (true, true) => a.movsd_2(xmm(*d)?, xmm(*s)?)?,
                (true, false) => a.movq(xmm(*d)?, gp(*s)?)?,
                (false, true) => a.movq(gp(*d)?, xmm(*s)?)?,
            },
            [Operand::Register(d), Operand::Immediate(value)] if !d.is_media() => {
                a.mov(gp(*d)?, *value)?
            }
            [Operand::Register(d), Operand::Memory(m)] => {
                let m = self.memory(m)?;
                let a = &mut self.assembler;
                if d.is_media() {
                    a.movsd_2(xmm(*d)?, m)?
                } else {
                    a.mov(gp(*d)?, m)?
                }
            }
            [Operand::Memory(m), Operand::Register(s)] => {
                let m = self.memory(m)?;
                let a = &mut self.assembler;
                if s.is_media() {
                    a.movsd_2(m, xmm(*s)?)?
                } else {
                    a.mov(m, gp(*s)?)?
                }
            }
            [Operand::Memory(m), Operand::Immediate(value)] => {
                let value = Self::immediate32(*value)?;
                let m = self.memory(m)?;
                self.assembler.mov(m, value)?
            }
            _ => return Err(unsupported(operation)),
        }
        Ok(())
    }

    /// Two-address integer and SSE arithmetic; `[d, d, s]` is treated as `[d, s]`.
    fn encode_arithmetic(&mut self, operation: &MachineOp) -> Result<(), EncodingError> {
        let operands: Vec<&Operand> = match operation.operands.as_slice() {
            [d, first, s] if d == first => vec![d, s],
            operands => operands.iter().collect(),
        };

        match operands.as_slice() {
            [Operand::Register(d), Operand::Register(s)] if d.is_media() => {
                let (d, s) = (xmm(*d)?, xmm(*s)?);
                let a = &mut self.assembler;
                match operation.opcode {
                    Opcode::Add => a.addsd(d, s)?,
                    Opcode::Subtract => a.subsd(d, s)?,
                    Opcode::Multiply => a.mulsd(d, s)?,
                    _ => return Err(unsupported(operation)),
                }
            }
            [Operand::Register(d), Operand::Memory(m)] if d.is_media() => {
                let (d, m) = (xmm(*d)?, self.memory(m)?);
                let a = &mut self.assembler;
                match operation.opcode {
                    Opcode::Add => a.addsd(d, m)?,
                    Opcode::Subtract => a.subsd(d, m)?,
                    Opcode::Multiply => a.mulsd(d, m)?,
                    _ => return Err(unsupported(operation)),
                }
            }
            [Operand::Register(d), Operand::Register(s)] => {
                let (d, s) = (gp(*d)?, gp(*s)?);
                let a = &mut self.assembler;
                match operation.opcode {
                    Opcode::Add => a.add(d, s)?,
                    Opcode::Subtract => a.sub(d, s)?,
                    Opcode::Multiply => a.imul_2(d, s)?,
                    _ => return Err(unsupported(operation)),
                }
            }
            [Operand::Register(d), Operand::Immediate(value)] => {
                let (d, value) = (gp(*d)?, Self::immediate32(*value)?);
                let a = &mut self.assembler;
                match operation.opcode {
                    Opcode::Add => a.add(d, value)?,
                    Opcode::Subtract => a.sub(d, value)?,
                    Opcode::Multiply => a.imul_3(d, d, value)?,
                    _ => return Err(unsupported(operation)),
                }
            }
            [Operand::Register(d), Operand::Memory(m)] => {
                let (d, m) = (gp(*d)?, self.memory(m)?);
                let a = &mut self.assembler;
                match operation.opcode {
                    Opcode::Add => a.add(d, m)?,
                    Opcode::Subtract => a.sub(d, m)?,
                    Opcode::Multiply => a.imul_2(d, m)?,
                    _ => return Err(unsupported(operation)),
                }
            }
            [Operand::Register(d), Operand::Register(s), Operand::Immediate(value)]
                if operation.opcode == Opcode::Multiply =>
            {
                let value = Self::immediate32(*value)?;
                self.assembler.imul_3(gp(*d)?, gp(*s)?, value)?
            }
            [Operand::Register(d), Operand::Memory(m), Operand::Immediate(value)]
                if operation.opcode == Opcode::Multiply =>
            {
                let value = Self::immediate32(*value)?;
                let m = self.memory(m)?;
                self.assembler.imul_3(gp(*d)?, m, value)?
            }
            _ => return Err(unsupported(operation)),
        }
        Ok(())
    }

    fn encode_jump(&mut self, condition: Condition, signed: bool, label: CodeLabel) -> Result<(), EncodingError> {
        let a = &mut self.assembler;
        match (condition, signed) {
            (Condition::Equal, _) => a.je(label)?,
            (Condition::NotEqual, _) => a.jne(label)?,
            (Condition::Less, true) => a.jl(label)?,
            (Condition::LessOrEqual, true) => a.jle(label)?,
            (Condition::Greater, true) => a.jg(label)?,
            (Condition::GreaterOrEqual, true) => a.jge(label)?,
            (Condition::Less, false) => a.jb(label)?,
            (Condition::LessOrEqual, false) => a.jbe(label)?,
            (Condition::Greater, false) => a.ja(label)?,
            (Condition::GreaterOrEqual, false) => a.jae(label)?,
        }
        Ok(())
    }

    fn encode_operation(&mut self, operation: &MachineOp) -> Result<(), EncodingError> {
        match (operation.opcode, operation.operands.as_slice()) {
            (Opcode::Label, [Operand::Label(name)]) => self.place_label(name)?,
            (Opcode::Move, _) => self.encode_move(operation)?,
            (Opcode::LoadAddress, [Operand::Register(d), Operand::Memory(m)]) => {
                let m = self.memory(m)?;
                self.assembler.lea(gp(*d)?, m)?
            }
            (Opcode::Add | Opcode::Subtract | Opcode::Multiply, _) => self.encode_arithmetic(operation)?,
            (Opcode::ShiftLeft, [Operand::Register(d), Operand::Immediate(k)]) => {
                let k = u32::try_from(*k).map_err(|_| unsupported(operation))?;
                self.assembler.shl(gp(*d)?, k)?
            }
            (Opcode::Compare, [Operand::Register(l), Operand::Register(r)]) if l.is_media() => {
                self.assembler.ucomisd(xmm(*l)?, xmm(*r)?)?
            }
            (Opcode::Compare, [Operand::Register(l), Operand::Memory(m)]) if l.is_media() => {
                let m = self.memory(m)?;
                self.assembler.ucomisd(xmm(*l)?, m)?
            }
            (Opcode::Compare, [Operand::Register(l), Operand::Register(r)]) => {
                self.assembler.cmp(gp(*l)?, gp(*r)?)?
            }
            (Opcode::Compare, [Operand::Register(l), Operand::Immediate(value)]) => {
                let value = Self::immediate32(*value)?;
                self.assembler.cmp(gp(*l)?, value)?
            }
            (Opcode::Compare, [Operand::Register(l), Operand::Memory(m)]) => {
                let m = self.memory(m)?;
                self.assembler.cmp(gp(*l)?, m)?
            }
            (Opcode::Jump, [Operand::Label(name)]) => {
                let label = self.label(name);
                self.assembler.jmp(label)?
            }
            (Opcode::ConditionalJump { condition, signed }, [Operand::Label(name)]) => {
                let label = self.label(name);
                self.encode_jump(condition, signed, label)?
            }
            (Opcode::Call, [Operand::Label(name)]) if self.defined.contains(name) => {
                let label = self.label(name);
                self.assembler.call(label)?
            }
            (Opcode::Return, []) => self.assembler.ret()?,
            (Opcode::Push, [Operand::Register(r)]) => self.assembler.push(gp(*r)?)?,
            (Opcode::Push, [Operand::Memory(m)]) => {
                let m = self.memory(m)?;
                self.assembler.push(m)?
            }
            (Opcode::Pop, [Operand::Register(r)]) => self.assembler.pop(gp(*r)?)?,
            (Opcode::Pop, [Operand::Memory(m)]) => {
                let m = self.memory(m)?;
                self.assembler.pop(m)?
            }
            (Opcode::Exchange, [Operand::Register(l), Operand::Register(r)]) => {
                self.assembler.xchg(gp(*l)?, gp(*r)?)?
            }
            (Opcode::ConvertToDecimal, [Operand::Register(d), Operand::Register(s)]) => {
                self.assembler.cvtsi2sd(xmm(*d)?, gp(*s)?)?
            }
            _ => return Err(unsupported(operation)),
        }
        Ok(())
    }

    /// Encode `operations` followed by the constant data.
    pub fn encode(
        mut self,
        operations: &[MachineOp],
        constants: &[ConstantEntry],
    ) -> Result<Vec<u8>, EncodingError> {
        self.defined = operations
            .iter()
            .filter(|operation| operation.opcode == Opcode::Label)
            .filter_map(|operation| operation.target().map(str::to_string))
            .collect();

        for operation in operations {
            self.encode_operation(operation)?;
        }

        for constant in constants {
            self.place_label(&constant.identifier)?;
            let bits = match constant.value {
                Number::Integer(value) => value as u64,
                Number::Decimal(value) => value.to_bits(),
            };
            self.assembler.db(&bits.to_le_bytes())?;
        }

        let bytes = self.assembler.assemble(0)?;
        trace!("encoded {} operation(s) into {} byte(s)", operations.len(), bytes.len());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Size;
    use crate::x64::registers::{RAX, RCX, RDI, RSP};

    fn op(opcode: Opcode, operands: Vec<Operand>) -> MachineOp {
        MachineOp::new(opcode, operands, Size::Qword)
    }

    #[test]
    fn test_encode_simple_function() {
        let operations = vec![
            op(Opcode::Move, vec![Operand::Register(RAX), Operand::Register(RDI)]),
            op(Opcode::Add, vec![Operand::Register(RAX), Operand::Immediate(1)]),
            op(Opcode::Return, Vec::new()),
        ];
        let bytes = X64Encoder::new().unwrap().encode(&operations, &[]).unwrap();
        // mov rax, rdi; add rax, 1 (imm32 form); ret
        assert_eq!(bytes, [0x48, 0x89, 0xf8, 0x48, 0x05, 0x01, 0x00, 0x00, 0x00, 0xc3]);
    }

    #[test]
    fn test_encode_decimal_moves() {
        let slot = || Operand::Memory(MemoryOperand::new(Base::Register(RSP), 8));
        let operations = vec![
            op(Opcode::Move, vec![Operand::Register(AsmReg::media(0)), Operand::Register(AsmReg::media(1))]),
            op(Opcode::Move, vec![slot(), Operand::Register(AsmReg::media(0))]),
            op(Opcode::Move, vec![Operand::Register(AsmReg::media(1)), slot()]),
            op(Opcode::Return, Vec::new()),
        ];
        let bytes = X64Encoder::new().unwrap().encode(&operations, &[]).unwrap();
        // movsd xmm0, xmm1; movsd [rsp+8], xmm0; movsd xmm1, [rsp+8]; ret
        let expected = [
            0xf2, 0x0f, 0x10, 0xc1, 0xf2, 0x0f, 0x11, 0x44, 0x24, 0x08, 0xf2, 0x0f, 0x10, 0x4c, 0x24,
            0x08, 0xc3,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_encode_multiply_from_memory() {
        let slot = MemoryOperand::new(Base::Register(RSP), 8);
        let operations = vec![
            op(
                Opcode::Multiply,
                vec![Operand::Register(RAX), Operand::Memory(slot), Operand::Immediate(3)],
            ),
            op(Opcode::Return, Vec::new()),
        ];
        let bytes = X64Encoder::new().unwrap().encode(&operations, &[]).unwrap();
        // imul rax, [rsp+8], 3; ret
        assert_eq!(bytes, [0x48, 0x6b, 0x44, 0x24, 0x08, 0x03, 0xc3]);
    }

    #[test]
    fn test_encode_loop_with_labels() {
        let label = || Operand::Label("f_L0".to_string());
        let operations = vec![
            op(Opcode::Label, vec![label()]),
            op(Opcode::Subtract, vec![Operand::Register(RCX), Operand::Immediate(1)]),
            op(Opcode::Compare, vec![Operand::Register(RCX), Operand::Immediate(0)]),
            op(
                Opcode::ConditionalJump {
                    condition: Condition::NotEqual,
                    signed: true,
                },
                vec![label()],
            ),
            op(Opcode::Return, Vec::new()),
        ];
        let bytes = X64Encoder::new().unwrap().encode(&operations, &[]).unwrap();
        assert_eq!(bytes.last(), Some(&0xc3));
    }

    #[test]
    fn test_constant_data_follows_code() {
        let constant = MemoryOperand::new(Base::ConstantData("f_C0".to_string()), 0);
        let operations = vec![
            op(Opcode::Move, vec![Operand::Register(AsmReg::media(0)), Operand::Memory(constant)]),
            op(Opcode::Return, Vec::new()),
        ];
        let constants = vec![ConstantEntry {
            identifier: "f_C0".to_string(),
            value: Number::Decimal(1.0),
            size: Size::Qword,
        }];
        let bytes = X64Encoder::new().unwrap().encode(&operations, &constants).unwrap();
        assert_eq!(&bytes[bytes.len() - 8..], &1.0f64.to_bits().to_le_bytes());
    }

    #[test]
    fn test_external_call_is_rejected() {
        let operations = vec![op(Opcode::Call, vec![Operand::Label("g".to_string())])];
        let error = X64Encoder::new().unwrap().encode(&operations, &[]).unwrap_err();
        assert!(matches!(error, EncodingError::UnsupportedInstruction(_)));

        let slot = MemoryOperand::new(Base::Register(RSP), 1 << 40);
        let operations = vec![op(Opcode::Push, vec![Operand::Memory(slot)])];
        let error = X64Encoder::new().unwrap().encode(&operations, &[]).unwrap_err();
        assert_eq!(error, EncodingError::InvalidMemoryOperand);
    }
}

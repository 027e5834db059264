//! x86-64 register numbering and System V register classes.
//!
//! General-purpose ids follow the hardware encoding (`rax` = 0 ... `r15` = 15).

use crate::core::register_file::{AsmReg, RegBitSet};

pub const RAX: AsmReg = AsmReg::gp(0);
pub const RCX: AsmReg = AsmReg::gp(1);
pub const RDX: AsmReg = AsmReg::gp(2);
pub const RBX: AsmReg = AsmReg::gp(3);
pub const RSP: AsmReg = AsmReg::gp(4);
pub const RBP: AsmReg = AsmReg::gp(5);
pub const RSI: AsmReg = AsmReg::gp(6);
pub const RDI: AsmReg = AsmReg::gp(7);
pub const R8: AsmReg = AsmReg::gp(8);
pub const R9: AsmReg = AsmReg::gp(9);
pub const R10: AsmReg = AsmReg::gp(10);
pub const R11: AsmReg = AsmReg::gp(11);
pub const R12: AsmReg = AsmReg::gp(12);
pub const R13: AsmReg = AsmReg::gp(13);
pub const R14: AsmReg = AsmReg::gp(14);
pub const R15: AsmReg = AsmReg::gp(15);

pub const XMM0: AsmReg = AsmReg::media(0);
/// Reserved for breaking move cycles.
pub const XMM15: AsmReg = AsmReg::media(15);

pub const PARAMETERS: [AsmReg; 6] = [RDI, RSI, RDX, RCX, R8, R9];

pub const MEDIA_PARAMETERS: [AsmReg; 8] = [
    AsmReg::media(0),
    AsmReg::media(1),
    AsmReg::media(2),
    AsmReg::media(3),
    AsmReg::media(4),
    AsmReg::media(5),
    AsmReg::media(6),
    AsmReg::media(7),
];

const GP_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

pub fn volatile() -> RegBitSet {
    let mut set = RegBitSet::from_registers(&[RAX, RCX, RDX, RSI, RDI, R8, R9, R10, R11]);
    for id in 0..16 {
        set.set(AsmReg::media(id));
    }
    set
}

pub fn allocatable() -> RegBitSet {
    let mut set =
        RegBitSet::from_registers(&[RAX, RCX, RDX, RBX, RSI, RDI, R8, R9, R10, R11, R12, R13, R14, R15]);
    for id in 0..15 {
        set.set(AsmReg::media(id));
    }
    set
}

pub fn name(register: AsmReg) -> String {
    if register.is_media() {
        return format!("xmm{}", register.id);
    }
    GP_NAMES
        .get(register.id as usize)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("r?{}", register.id))
}

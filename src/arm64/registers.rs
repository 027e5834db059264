//! AArch64 register numbering and AAPCS64 register classes.
//!
//! `x0`-`x30` are ids 0-30 and id 31 is the stack pointer.

use crate::core::register_file::{AsmReg, RegBitSet};

pub const X0: AsmReg = AsmReg::gp(0);
/// Intra-procedure scratch, reserved for the backend.
pub const X16: AsmReg = AsmReg::gp(16);
pub const FRAME_POINTER: AsmReg = AsmReg::gp(29);
pub const LINK_REGISTER: AsmReg = AsmReg::gp(30);
pub const SP: AsmReg = AsmReg::gp(31);

pub const D0: AsmReg = AsmReg::media(0);
/// Reserved for breaking move cycles.
pub const D31: AsmReg = AsmReg::media(31);

pub const PARAMETERS: [AsmReg; 8] = [
    AsmReg::gp(0),
    AsmReg::gp(1),
    AsmReg::gp(2),
    AsmReg::gp(3),
    AsmReg::gp(4),
    AsmReg::gp(5),
    AsmReg::gp(6),
    AsmReg::gp(7),
];

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

pub fn volatile() -> RegBitSet {
    let mut set = RegBitSet::new();
    for id in (0..16).chain([17]) {
        set.set(AsmReg::gp(id));
    }
    for id in (0..8).chain(16..31) {
        set.set(AsmReg::media(id));
    }
    set
}

pub fn allocatable() -> RegBitSet {
    let mut set = RegBitSet::new();
    for id in (0..16).chain([17]).chain(19..29) {
        set.set(AsmReg::gp(id));
    }
    for id in 0..31 {
        set.set(AsmReg::media(id));
    }
    set
}

/// Name of a register holding a 64-bit value.
pub fn name(register: AsmReg) -> String {
    match (register.is_media(), register.id) {
        (true, id) => format!("d{id}"),
        (false, 31) => "sp".to_string(),
        (false, id) => format!("x{id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_classes() {
        let volatile = volatile();
        let allocatable = allocatable();
        assert!(!allocatable.contains(X16));
        assert!(!allocatable.contains(AsmReg::gp(18)));
        assert!(!allocatable.contains(FRAME_POINTER));
        assert!(!allocatable.contains(SP));
        assert!(allocatable.contains(AsmReg::gp(19)) && !volatile.contains(AsmReg::gp(19)));
        assert!(volatile.contains(AsmReg::gp(17)));
        assert!(!volatile.contains(AsmReg::media(8)));
        assert_eq!(name(SP), "sp");
        assert_eq!(name(D0), "d0");
    }
}

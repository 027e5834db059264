//! Calling convention and register roles of the target architecture.

use crate::arm64::registers as arm64;
use crate::core::config::{Architecture, Format};
use crate::core::register_file::{AsmReg, RegisterFile, GP_BANK, MEDIA_BANK};
use crate::x64::registers as x64;

/// Register roles the Unit and the Translator need to know about.
#[derive(Debug, Clone)]
pub struct Target {
    pub architecture: Architecture,
    /// Integer argument registers in order.
    pub parameters: Vec<AsmReg>,
    /// Decimal argument registers in order.
    pub media_parameters: Vec<AsmReg>,
    pub return_register: AsmReg,
    pub media_return: AsmReg,
    pub stack_pointer: AsmReg,
    pub frame_pointer: AsmReg,
    /// Reserved general-purpose scratch, when the architecture keeps one.
    pub scratch: Option<AsmReg>,
    pub media_scratch: AsmReg,
}

impl Target {
    pub fn new(architecture: Architecture) -> Self {
        match architecture {
            Architecture::X64 => Self {
                architecture,
                parameters: x64::PARAMETERS.to_vec(),
                media_parameters: x64::MEDIA_PARAMETERS.to_vec(),
                return_register: x64::RAX,
                media_return: x64::XMM0,
                stack_pointer: x64::RSP,
                frame_pointer: x64::RBP,
                scratch: None,
                media_scratch: x64::XMM15,
            },
            Architecture::Arm64 => Self {
                architecture,
                parameters: arm64::PARAMETERS.to_vec(),
                media_parameters: arm64::MEDIA_PARAMETERS.to_vec(),
                return_register: arm64::X0,
                media_return: arm64::D0,
                stack_pointer: arm64::SP,
                frame_pointer: arm64::FRAME_POINTER,
                scratch: Some(arm64::X16),
                media_scratch: arm64::D31,
            },
        }
    }

    pub fn register_file(&self) -> RegisterFile {
        let (allocatable, volatile) = match self.architecture {
            Architecture::X64 => (x64::allocatable(), x64::volatile()),
            Architecture::Arm64 => (arm64::allocatable(), arm64::volatile()),
        };
        RegisterFile::new(32, 2, allocatable, volatile)
    }

    /// Register bank values of the format live in.
    pub fn bank(format: Format) -> u8 {
        if format.is_decimal() {
            MEDIA_BANK
        } else {
            GP_BANK
        }
    }

    pub fn return_register_for(&self, format: Format) -> AsmReg {
        if format.is_decimal() {
            self.media_return
        } else {
            self.return_register
        }
    }

    pub fn register_name(&self, register: AsmReg) -> String {
        match self.architecture {
            Architecture::X64 => x64::name(register),
            Architecture::Arm64 => arm64::name(register),
        }
    }

    /// Argument registers available for `formats`, or the failing limit.
    pub fn argument_registers(&self, formats: &[Format]) -> Result<Vec<AsmReg>, usize> {
        let mut integers = self.parameters.iter();
        let mut decimals = self.media_parameters.iter();
        formats
            .iter()
            .map(|format| {
                if format.is_decimal() {
                    decimals.next().copied().ok_or(self.media_parameters.len())
                } else {
                    integers.next().copied().ok_or(self.parameters.len())
                }
            })
            .collect()
    }
}

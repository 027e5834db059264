// This module holds the run-wide configuration threaded through every component of the
// backend: the target Architecture (x86-64 or AArch64), the debug flag that disables loop
// variable caching, and the multithread flag consumed by compilation phases. It also defines
// the value model shared by instruction selection: Format describes the numeric kind of a
// value (signed/unsigned integers of 8 to 64 bits, and decimals) while Size describes the
// width of an operand in bytes together with its assembler identifier and data allocation
// directive. The configuration is constructed once per compilation run and handed to each
// Unit and to the Translator by value, so no component reads ambient global state.

//! Backend configuration and the shared size/format model.

use std::fmt;

/// Target instruction-set architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// CISC target with memory operands and scaled addressing.
    X64,
    /// Load/store RISC target with shifted register operands.
    Arm64,
}

impl Architecture {
    pub fn is_x64(self) -> bool {
        matches!(self, Architecture::X64)
    }

    pub fn is_arm64(self) -> bool {
        matches!(self, Architecture::Arm64)
    }

    /// Native register width.
    pub fn size(self) -> Size {
        Size::Qword
    }

    /// Format of pointers and untyped integer literals.
    pub fn format(self) -> Format {
        Format::I64
    }

    /// Largest constant the RISC-style or CISC-style scaled multiply form accepts.
    pub fn max_extended_multiplier(self) -> i64 {
        match self {
            Architecture::X64 => 8,
            Architecture::Arm64 => 1i64 << 32,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X64 => write!(f, "x64"),
            Architecture::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Numeric kind of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Decimal,
}

impl Format {
    pub fn is_decimal(self) -> bool {
        matches!(self, Format::Decimal)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Format::U8 | Format::U16 | Format::U32 | Format::U64)
    }

    pub fn is_signed(self) -> bool {
        !self.is_unsigned() && !self.is_decimal()
    }

    /// Width of the value in bits.
    pub fn bits(self) -> u32 {
        self.size().bits()
    }

    pub fn size(self) -> Size {
        match self {
            Format::I8 | Format::U8 => Size::Byte,
            Format::I16 | Format::U16 => Size::Word,
            Format::I32 | Format::U32 => Size::Dword,
            Format::I64 | Format::U64 | Format::Decimal => Size::Qword,
        }
    }
}

/// Operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Size {
    Byte,
    Word,
    Dword,
    Qword,
    Xmmword,
    Ymmword,
}

impl Size {
    pub fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Dword => 4,
            Size::Qword => 8,
            Size::Xmmword => 16,
            Size::Ymmword => 32,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() * 8
    }

    /// Name used in memory operand prefixes (`qword ptr`).
    pub fn identifier(self) -> &'static str {
        match self {
            Size::Byte => "byte",
            Size::Word => "word",
            Size::Dword => "dword",
            Size::Qword => "qword",
            Size::Xmmword => "xmmword",
            Size::Ymmword => "ymmword",
        }
    }

    /// Data directive that allocates one value of this size.
    pub fn allocator(self) -> &'static str {
        match self {
            Size::Byte => ".byte",
            Size::Word => ".short",
            Size::Dword => ".long",
            Size::Qword => ".quad",
            Size::Xmmword => ".xword",
            Size::Ymmword => ".yword",
        }
    }

    pub fn from_bytes(bytes: u32) -> Option<Size> {
        match bytes {
            1 => Some(Size::Byte),
            2 => Some(Size::Word),
            4 => Some(Size::Dword),
            8 => Some(Size::Qword),
            16 => Some(Size::Xmmword),
            32 => Some(Size::Ymmword),
            _ => None,
        }
    }

    /// Integer format of this width. Widths above 64 bits have no integer format.
    pub fn to_format(self, unsigned: bool) -> Option<Format> {
        let format = match (self, unsigned) {
            (Size::Byte, true) => Format::U8,
            (Size::Byte, false) => Format::I8,
            (Size::Word, true) => Format::U16,
            (Size::Word, false) => Format::I16,
            (Size::Dword, true) => Format::U32,
            (Size::Dword, false) => Format::I32,
            (Size::Qword, true) => Format::U64,
            (Size::Qword, false) => Format::I64,
            _ => return None,
        };
        Some(format)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::I8 => "i8",
            Format::U8 => "u8",
            Format::I16 => "i16",
            Format::U16 => "u16",
            Format::I32 => "i32",
            Format::U32 => "u32",
            Format::I64 => "i64",
            Format::U64 => "u64",
            Format::Decimal => "decimal",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// Immutable per-run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    pub architecture: Architecture,
    /// Disables loop variable caching and keeps the frame pointer.
    pub debug: bool,
    /// Lower independent functions on worker threads.
    pub multithreaded: bool,
}

impl BackendConfig {
    pub fn new(architecture: Architecture) -> Self {
        Self {
            architecture,
            debug: false,
            multithreaded: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_multithreading(mut self, multithreaded: bool) -> Self {
        self.multithreaded = multithreaded;
        self
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(Architecture::X64)
    }
}

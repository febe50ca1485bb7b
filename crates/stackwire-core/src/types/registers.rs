//! Register identifiers
//!
//! Every register any supported architecture can record gets one sequential
//! 16-bit id. The id is what goes on the wire; the name is what the report
//! printer shows.
//!
//! ## Layout
//!
//! | range | architecture |
//! |---|---|
//! | `0..=16` | x86-64 (`rax`..`r15`, `rip`) |
//! | `17..=25` | x86 (`eax`..`eip`) |
//! | `26..=59` | AArch64 (`x0`..`x31`, `pc`, `pstate`) |
//! | `60..=76` | ARM (`r0`..`r15`, `cpsr`) |

use std::fmt;

use crate::types::Architecture;

macro_rules! registers {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// A register id as stored in a frame's register block
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum Register
        {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )+
        }

        impl Register
        {
            /// Every register, indexed by its id
            pub const ALL: &'static [Register] = &[$(Register::$variant),+];

            /// Number of known registers
            pub const COUNT: usize = Self::ALL.len();

            /// Human-readable register name
            #[must_use]
            pub const fn name(self) -> &'static str
            {
                match self {
                    $(Register::$variant => $name,)+
                }
            }
        }
    };
}

registers! {
    X86_64Rax => "rax",
    X86_64Rbx => "rbx",
    X86_64Rcx => "rcx",
    X86_64Rdx => "rdx",
    X86_64Rsi => "rsi",
    X86_64Rdi => "rdi",
    X86_64Rbp => "rbp",
    X86_64Rsp => "rsp",
    X86_64R8 => "r8",
    X86_64R9 => "r9",
    X86_64R10 => "r10",
    X86_64R11 => "r11",
    X86_64R12 => "r12",
    X86_64R13 => "r13",
    X86_64R14 => "r14",
    X86_64R15 => "r15",
    X86_64Rip => "rip",

    X86Eax => "eax",
    X86Ebx => "ebx",
    X86Ecx => "ecx",
    X86Edx => "edx",
    X86Esi => "esi",
    X86Edi => "edi",
    X86Ebp => "ebp",
    X86Esp => "esp",
    X86Eip => "eip",

    Aarch64X0 => "x0",
    Aarch64X1 => "x1",
    Aarch64X2 => "x2",
    Aarch64X3 => "x3",
    Aarch64X4 => "x4",
    Aarch64X5 => "x5",
    Aarch64X6 => "x6",
    Aarch64X7 => "x7",
    Aarch64X8 => "x8",
    Aarch64X9 => "x9",
    Aarch64X10 => "x10",
    Aarch64X11 => "x11",
    Aarch64X12 => "x12",
    Aarch64X13 => "x13",
    Aarch64X14 => "x14",
    Aarch64X15 => "x15",
    Aarch64X16 => "x16",
    Aarch64X17 => "x17",
    Aarch64X18 => "x18",
    Aarch64X19 => "x19",
    Aarch64X20 => "x20",
    Aarch64X21 => "x21",
    Aarch64X22 => "x22",
    Aarch64X23 => "x23",
    Aarch64X24 => "x24",
    Aarch64X25 => "x25",
    Aarch64X26 => "x26",
    Aarch64X27 => "x27",
    Aarch64X28 => "x28",
    Aarch64X29 => "x29",
    Aarch64X30 => "x30",
    Aarch64X31 => "x31",
    Aarch64Pc => "pc",
    Aarch64Pstate => "pstate",

    ArmR0 => "r0",
    ArmR1 => "r1",
    ArmR2 => "r2",
    ArmR3 => "r3",
    ArmR4 => "r4",
    ArmR5 => "r5",
    ArmR6 => "r6",
    ArmR7 => "r7",
    ArmR8 => "r8",
    ArmR9 => "r9",
    ArmR10 => "r10",
    ArmR11 => "r11",
    ArmR12 => "r12",
    ArmR13 => "r13",
    ArmR14 => "r14",
    ArmR15 => "r15",
    ArmCpsr => "cpsr",
}

// Register ids travel as u16
const _: () = assert!(Register::COUNT <= u16::MAX as usize + 1);

impl Register
{
    /// Look up a register by its wire id
    #[must_use]
    pub fn from_raw(raw: u16) -> Option<Self>
    {
        Self::ALL.get(usize::from(raw)).copied()
    }

    #[must_use]
    pub const fn as_raw(self) -> u16
    {
        self as u16
    }

    /// Architecture the register belongs to
    #[must_use]
    pub const fn architecture(self) -> Architecture
    {
        match self as u16 {
            0..=16 => Architecture::X86_64,
            17..=25 => Architecture::X86,
            26..=59 => Architecture::Arm64,
            _ => Architecture::Arm,
        }
    }

    /// Program counter of `arch`
    #[must_use]
    pub const fn instruction_pointer(arch: Architecture) -> Option<Self>
    {
        match arch {
            Architecture::X86_64 => Some(Register::X86_64Rip),
            Architecture::X86 => Some(Register::X86Eip),
            Architecture::Arm64 => Some(Register::Aarch64Pc),
            Architecture::Arm => Some(Register::ArmR15),
            Architecture::Unknown => None,
        }
    }

    /// Stack pointer of `arch`
    #[must_use]
    pub const fn stack_pointer(arch: Architecture) -> Option<Self>
    {
        match arch {
            Architecture::X86_64 => Some(Register::X86_64Rsp),
            Architecture::X86 => Some(Register::X86Esp),
            Architecture::Arm64 => Some(Register::Aarch64X31),
            Architecture::Arm => Some(Register::ArmR13),
            Architecture::Unknown => None,
        }
    }

    /// Frame pointer of `arch`
    #[must_use]
    pub const fn frame_pointer(arch: Architecture) -> Option<Self>
    {
        match arch {
            Architecture::X86_64 => Some(Register::X86_64Rbp),
            Architecture::X86 => Some(Register::X86Ebp),
            Architecture::Arm64 => Some(Register::Aarch64X29),
            Architecture::Arm => Some(Register::ArmR11),
            Architecture::Unknown => None,
        }
    }
}

impl fmt::Display for Register
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

impl From<Register> for u16
{
    fn from(reg: Register) -> Self
    {
        reg.as_raw()
    }
}

/// Name for a raw register id, or `"unknown"`
#[must_use]
pub fn register_name(raw: u16) -> &'static str
{
    Register::from_raw(raw).map_or("unknown", Register::name)
}

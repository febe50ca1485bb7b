//! CPU architecture tags stored in the payload header.

use std::fmt;

/// CPU architecture of the process that produced a capture
///
/// The discriminant is the 16-bit value written to the header, so a stream
/// captured on one machine can be decoded on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Architecture
{
    /// 32-bit x86
    X86 = 0,
    /// x86-64 / AMD64
    X86_64 = 1,
    /// 32-bit ARM
    Arm = 2,
    /// AArch64
    Arm64 = 3,
    /// Anything else, or a tag this build does not know
    Unknown = 4,
}

impl Architecture
{
    /// Architecture this binary was compiled for
    #[must_use]
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }
        #[cfg(target_arch = "x86")]
        {
            Architecture::X86
        }
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }
        #[cfg(target_arch = "arm")]
        {
            Architecture::Arm
        }
        #[cfg(not(any(
            target_arch = "x86_64",
            target_arch = "x86",
            target_arch = "aarch64",
            target_arch = "arm"
        )))]
        {
            Architecture::Unknown
        }
    }

    /// Decode a header tag; unknown values map to [`Architecture::Unknown`].
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self
    {
        match raw {
            0 => Architecture::X86,
            1 => Architecture::X86_64,
            2 => Architecture::Arm,
            3 => Architecture::Arm64,
            _ => Architecture::Unknown,
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> u16
    {
        self as u16
    }

    /// Pointer width in bytes, used by the frame-pointer walker
    #[must_use]
    pub const fn pointer_size(self) -> usize
    {
        match self {
            Architecture::X86 | Architecture::Arm => 4,
            Architecture::X86_64 | Architecture::Arm64 | Architecture::Unknown => 8,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Arm => "arm",
            Architecture::Arm64 => "arm64",
            Architecture::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

impl From<u16> for Architecture
{
    fn from(raw: u16) -> Self
    {
        Architecture::from_raw(raw)
    }
}

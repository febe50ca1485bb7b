//! Backend tags.

use std::fmt;
use std::str::FromStr;

/// Which stack-walking strategy produced a capture
///
/// Stored as a 16-bit value in the payload header. A freshly initialized
/// writer records [`BackendKind::None`] until the backend stamps itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BackendKind
{
    /// Frame addresses from the `backtrace` crate, ptrace for remote targets
    Native = 0,
    /// `Native` plus symbol, file and line resolution
    Symbolized = 1,
    /// Closure-driven backend used by tests and embedders
    Test = 0xFFFE,
    /// No backend has written to the stream
    None = 0xFFFF,
}

impl BackendKind
{
    /// Decode a header tag. Unknown values are reported as `None`.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Option<Self>
    {
        match raw {
            0 => Some(BackendKind::Native),
            1 => Some(BackendKind::Symbolized),
            0xFFFE => Some(BackendKind::Test),
            0xFFFF => Some(BackendKind::None),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> u16
    {
        self as u16
    }

    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            BackendKind::Native => "native",
            BackendKind::Symbolized => "symbolized",
            BackendKind::Test => "test",
            BackendKind::None => "none",
        }
    }
}

impl fmt::Display for BackendKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "native" | "fp" => Ok(BackendKind::Native),
            "symbolized" | "symbols" | "sym" => Ok(BackendKind::Symbolized),
            "test" => Ok(BackendKind::Test),
            "none" => Ok(BackendKind::None),
            _ => Err(format!("Unknown backend: {s}. Use 'native' or 'symbolized'")),
        }
    }
}

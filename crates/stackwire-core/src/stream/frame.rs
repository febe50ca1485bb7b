//! The transient per-level record written to and read from a stream.

use super::codec::{c_str_len, read_u16, read_u64, REGISTER_ENTRY_SIZE};
use crate::error::{Result, StackwireError};
use crate::types::Register;

/// Register storage attached to a frame
#[derive(Debug, Default)]
enum RegisterBlock<'a>
{
    /// No registers
    #[default]
    Empty,
    /// Caller-owned scratch area being filled by a backend
    Scratch
    {
        bytes: &'a mut [u8],
        count: usize,
    },
    /// Register block aliased from a decoded stream
    Decoded
    {
        bytes: &'a [u8],
        count: usize,
    },
}

/// One stack level
///
/// A frame is filled by a backend and handed to
/// [`Writer::write_frame`](super::Writer::write_frame), or produced by a
/// [`Reader`](super::Reader). Decoded frames borrow their strings and
/// registers from the reader's bytes, so they cannot outlive them.
///
/// ## Strings
///
/// `symbol` and `filename` are measured up to their first NUL byte (the
/// whole slice if there is none). `None` means "not provided" and is encoded
/// as an empty string.
///
/// ## Registers
///
/// Registers live in a caller-owned scratch slice set with
/// [`Frame::with_register_scratch`], ten bytes per register. Appending to a
/// full scratch fails instead of growing it, so filling a frame never
/// allocates.
///
/// ## Example
///
/// ```rust
/// use stackwire_core::stream::{Frame, REGISTER_ENTRY_SIZE};
/// use stackwire_core::types::Register;
///
/// let mut scratch = [0u8; 2 * REGISTER_ENTRY_SIZE];
/// let mut frame = Frame::new(0x1000)
///     .with_symbol(b"main")
///     .with_line(42)
///     .with_register_scratch(&mut scratch);
///
/// frame.register_append(Register::X86_64Rip, 0x1000)?;
/// frame.register_append(Register::X86_64Rsp, 0x7ffd_0000)?;
/// assert!(frame.register_append(Register::X86_64Rbp, 0).is_err());
/// assert_eq!(frame.register(1), Some((Register::X86_64Rsp.as_raw(), 0x7ffd_0000)));
/// # Ok::<(), stackwire_core::StackwireError>(())
/// ```
#[derive(Debug, Default)]
pub struct Frame<'a>
{
    /// Instruction pointer
    pub addr: u64,
    /// Source line, 0 when unknown
    pub line: u64,
    /// Byte offset of `addr` into its symbol (or module, for remote frames)
    pub offset: u64,
    /// Symbol name
    pub symbol: Option<&'a [u8]>,
    /// Source file or module path
    pub filename: Option<&'a [u8]>,
    registers: RegisterBlock<'a>,
}

impl<'a> Frame<'a>
{
    #[must_use]
    pub fn new(addr: u64) -> Self
    {
        Self {
            addr,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: &'a [u8]) -> Self
    {
        self.symbol = Some(symbol);
        self
    }

    #[must_use]
    pub fn with_filename(mut self, filename: &'a [u8]) -> Self
    {
        self.filename = Some(filename);
        self
    }

    #[must_use]
    pub fn with_line(mut self, line: u64) -> Self
    {
        self.line = line;
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self
    {
        self.offset = offset;
        self
    }

    /// Attach an empty register scratch area. Capacity is `scratch.len() / 10`.
    #[must_use]
    pub fn with_register_scratch(mut self, scratch: &'a mut [u8]) -> Self
    {
        self.registers = RegisterBlock::Scratch { bytes: scratch, count: 0 };
        self
    }

    pub(crate) fn decoded(
        addr: u64,
        line: u64,
        offset: u64,
        symbol: &'a [u8],
        filename: &'a [u8],
        registers: &'a [u8],
    ) -> Self
    {
        Self {
            addr,
            line,
            offset,
            symbol: Some(symbol),
            filename: Some(filename),
            registers: RegisterBlock::Decoded {
                bytes: registers,
                count: registers.len() / REGISTER_ENTRY_SIZE,
            },
        }
    }

    /// Append a register to the scratch area.
    ///
    /// ## Errors
    ///
    /// [`StackwireError::RegisterScratchFull`] when the scratch area is full,
    /// missing, or the frame was decoded from a stream.
    pub fn register_append(&mut self, reg: Register, value: u64) -> Result<()>
    {
        self.register_append_raw(reg.as_raw(), value)
    }

    /// Append a register by raw id (for ids from a newer register table).
    ///
    /// ## Errors
    ///
    /// See [`Frame::register_append`].
    pub fn register_append_raw(&mut self, reg: u16, value: u64) -> Result<()>
    {
        let capacity = self.register_capacity();
        let RegisterBlock::Scratch { bytes, count } = &mut self.registers else {
            return Err(StackwireError::RegisterScratchFull { capacity });
        };
        if *count >= capacity {
            return Err(StackwireError::RegisterScratchFull { capacity });
        }
        let at = *count * REGISTER_ENTRY_SIZE;
        bytes[at..at + 2].copy_from_slice(&reg.to_le_bytes());
        bytes[at + 2..at + REGISTER_ENTRY_SIZE].copy_from_slice(&value.to_le_bytes());
        *count += 1;
        Ok(())
    }

    /// Forget recorded registers, keeping the scratch area for reuse.
    pub fn clear_registers(&mut self)
    {
        if let RegisterBlock::Scratch { count, .. } = &mut self.registers {
            *count = 0;
        }
    }

    /// Number of registers the scratch area can hold
    #[must_use]
    pub fn register_capacity(&self) -> usize
    {
        match &self.registers {
            RegisterBlock::Empty => 0,
            RegisterBlock::Scratch { bytes, .. } => (bytes.len() / REGISTER_ENTRY_SIZE).min(usize::from(u16::MAX)),
            RegisterBlock::Decoded { count, .. } => *count,
        }
    }

    #[must_use]
    pub fn register_count(&self) -> usize
    {
        match &self.registers {
            RegisterBlock::Empty => 0,
            RegisterBlock::Scratch { count, .. } | RegisterBlock::Decoded { count, .. } => *count,
        }
    }

    /// `(register id, value)` at `index`, or `None` past the recorded count
    #[must_use]
    pub fn register(&self, index: usize) -> Option<(u16, u64)>
    {
        if index >= self.register_count() {
            return None;
        }
        let bytes = self.register_bytes();
        let at = index * REGISTER_ENTRY_SIZE;
        Some((read_u16(bytes, at)?, read_u64(bytes, at + 2)?))
    }

    /// Iterate over recorded `(register id, value)` pairs
    pub fn registers(&self) -> impl Iterator<Item = (u16, u64)> + '_
    {
        (0..self.register_count()).filter_map(move |index| self.register(index))
    }

    /// Encoded register block, `register_count() * 10` bytes
    #[must_use]
    pub fn register_bytes(&self) -> &[u8]
    {
        match &self.registers {
            RegisterBlock::Empty => &[],
            RegisterBlock::Scratch { bytes, count } => &bytes[..count * REGISTER_ENTRY_SIZE],
            RegisterBlock::Decoded { bytes, count } => &bytes[..count * REGISTER_ENTRY_SIZE],
        }
    }

    /// Symbol bytes as they will be encoded (up to the first NUL)
    #[must_use]
    pub fn symbol_bytes(&self) -> &[u8]
    {
        measured(self.symbol)
    }

    /// Filename bytes as they will be encoded (up to the first NUL)
    #[must_use]
    pub fn filename_bytes(&self) -> &[u8]
    {
        measured(self.filename)
    }

    /// Symbol as UTF-8, `None` when absent, empty or not valid UTF-8
    #[must_use]
    pub fn symbol_str(&self) -> Option<&str>
    {
        non_empty_str(self.symbol_bytes())
    }

    /// Filename as UTF-8, `None` when absent, empty or not valid UTF-8
    #[must_use]
    pub fn filename_str(&self) -> Option<&str>
    {
        non_empty_str(self.filename_bytes())
    }
}

fn measured(value: Option<&[u8]>) -> &[u8]
{
    value.map_or(&[], |bytes| &bytes[..c_str_len(bytes)])
}

fn non_empty_str(bytes: &[u8]) -> Option<&str>
{
    if bytes.is_empty() {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}

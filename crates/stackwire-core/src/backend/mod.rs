//! # Backends
//!
//! A backend walks a call stack and reports each level through
//! [`Writer::write_frame`]. The set of built-in backends is closed and
//! selected once when a [`Handle`] is created:
//!
//! | kind | local | remote | allocates |
//! |---|---|---|---|
//! | [`BackendKind::Native`] | `backtrace::trace_unsynchronized` | ptrace + frame pointers | no (local) |
//! | [`BackendKind::Symbolized`] | `backtrace` + symbol resolution | no | yes, unless write-once |
//! | [`BackendKind::Test`] | closure | closure | up to the closure |
//!
//! External engines plug in by implementing [`Unwinder`] and wrapping it
//! with [`Handle::from_unwinder`].
//!
//! ## Contract
//!
//! - bind a writer with [`begin`] (or [`Writer::new`] with `Some(handle)`);
//! - write frames until the stack ends or `write_frame` fails, and treat a
//!   failed write as the end of the capture, not as an error;
//! - return the writer's final size;
//! - release private resources in `Drop`.

pub mod native;
#[cfg(feature = "symbolize")]
pub mod symbolized;
pub mod test;

pub use native::{NativeBackend, NativeConfig};
#[cfg(feature = "symbolize")]
pub use symbolized::SymbolizedBackend;
pub use test::TestBackend;

use crate::error::{Result, StackwireError};
use crate::handle::Handle;
use crate::stream::{Buffer, Frame, Writer, REGISTER_ENTRY_SIZE};
use crate::types::{Architecture, BackendKind, ProcessId, Register};

/// A stack-walking strategy
pub trait Unwinder: Send + Sync
{
    /// Tag recorded in the header of every capture
    fn kind(&self) -> BackendKind;

    /// Capture the calling thread's stack. Returns the stream size.
    ///
    /// ## Errors
    ///
    /// Binding errors, or whatever the engine cannot recover from.
    fn unwind(&self, handle: &Handle, buffer: &mut Buffer<'_>) -> Result<usize>;

    /// Capture another process' stack. Returns the stream size.
    ///
    /// ## Errors
    ///
    /// [`StackwireError::UnsupportedOperation`] unless overridden.
    fn unwind_remote(&self, handle: &Handle, buffer: &mut Buffer<'_>, pid: ProcessId) -> Result<usize>
    {
        let _ = (handle, buffer, pid);
        Err(StackwireError::UnsupportedOperation("remote unwinding"))
    }
}

/// Bind a writer for `handle` on the host architecture and stamp its backend tag.
///
/// ## Errors
///
/// See [`Writer::new`].
pub fn begin<'b>(handle: &Handle, buffer: &'b mut Buffer<'_>) -> Result<Writer<'b>>
{
    let mut writer = Writer::new(buffer, Architecture::current(), Some(handle))?;
    writer.set_backend(handle.kind());
    Ok(writer)
}

/// Scratch space for the two registers recorded on local frames
pub(crate) const LOCAL_SCRATCH: usize = 2 * REGISTER_ENTRY_SIZE;

/// Record the host instruction and stack pointers on `frame`.
///
/// Stops quietly when the scratch area is full.
pub(crate) fn record_pc_sp(frame: &mut Frame<'_>, pc: u64, sp: u64)
{
    let arch = Architecture::current();
    if let Some(reg) = Register::instruction_pointer(arch) {
        let _ = frame.register_append(reg, pc);
    }
    if let Some(reg) = Register::stack_pointer(arch) {
        let _ = frame.register_append(reg, sp);
    }
}

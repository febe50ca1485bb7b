//! # Error Types
//!
//! Error handling for capture, encoding and remote attach.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages. Every variant that can be produced on the signal
//! path is plain data (no `String`, no `Box`), so constructing it never
//! allocates.

use thiserror::Error;

use crate::types::BackendKind;

/// Main error type for stackwire operations
///
/// ## Error Categories
///
/// 1. **Construction errors**: BackendUnavailable, BackendDisabled
/// 2. **Capacity errors**: BufferTooSmall, InsufficientCapacity, RegisterScratchFull
/// 3. **Format errors**: BadMagic
/// 4. **Identity/policy errors**: BufferOwnedByOtherHandle, WriteOnceViolation
/// 5. **Dispatch errors**: UnsupportedOperation
/// 6. **Remote errors**: AttachFailed, TargetExited, TargetVanished, WaitTimedOut, UnexpectedWaitStatus, Ptrace
/// 7. **Signal errors**: SignalOutOfRange, SignalInstall
/// 8. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum StackwireError
{
    /// The requested backend cannot be constructed through [`Handle::create`](crate::Handle::create)
    ///
    /// `BackendKind::None` never names a real backend, and `BackendKind::Test`
    /// needs closures, so it goes through [`TestBackend`](crate::backend::TestBackend).
    #[error("Backend {0} cannot be created from a tag")]
    BackendUnavailable(BackendKind),

    /// The backend exists but was compiled out (cargo feature disabled)
    #[error("Backend {0} is disabled in this build")]
    BackendDisabled(BackendKind),

    /// The buffer cannot even hold the ownership prologue and payload header
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall
    {
        /// Minimum number of bytes required
        needed: usize,
        /// Number of bytes actually available
        available: usize,
    },

    /// A frame does not fit in the space left in the buffer
    ///
    /// Nothing was written: the header size and the writer cursor are
    /// exactly as they were before the call.
    #[error("Insufficient capacity: frame needs {needed} bytes, {available} left")]
    InsufficientCapacity
    {
        /// Encoded length of the rejected frame
        needed: usize,
        /// Bytes remaining in the buffer
        available: usize,
    },

    /// The frame's register scratch area is full
    #[error("Register scratch full ({capacity} registers)")]
    RegisterScratchFull
    {
        /// Number of registers the scratch area can hold
        capacity: usize,
    },

    /// The payload does not start with the stream magic
    #[error("Bad stream magic 0x{0:016x}")]
    BadMagic(u64),

    /// The buffer is already bound to a different handle
    #[error("Buffer is owned by another handle")]
    BufferOwnedByOtherHandle,

    /// A write-once buffer already had its single writer
    #[error("Buffer was already written once")]
    WriteOnceViolation,

    /// The backend does not implement the requested operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// `PTRACE_ATTACH` was rejected
    ///
    /// Usually `EPERM`: check `/proc/sys/kernel/yama/ptrace_scope` or run with
    /// `CAP_SYS_PTRACE`.
    #[error("Failed to attach to process {pid} (errno {errno})")]
    AttachFailed
    {
        /// Target process
        pid: i32,
        /// Raw errno from the kernel
        errno: i32,
    },

    /// The target exited or was killed while we were waiting for it to stop
    #[error("Process {pid} exited before it could be inspected")]
    TargetExited
    {
        /// Target process
        pid: i32,
    },

    /// The target disappeared while being classified (`ESRCH` from the signal-info probe)
    #[error("Process {pid} vanished while stopping")]
    TargetVanished
    {
        /// Target process
        pid: i32,
    },

    /// No stop was observed within the budget and the register probe failed
    #[error("Timed out waiting for process {pid} to stop")]
    WaitTimedOut
    {
        /// Target process
        pid: i32,
    },

    /// `waitpid` reported a state that is neither running, stopped nor dead
    #[error("Unexpected wait status for process {pid}")]
    UnexpectedWaitStatus
    {
        /// Target process
        pid: i32,
    },

    /// A ptrace request other than attach failed
    #[error("ptrace request failed (errno {0})")]
    Ptrace(i32),

    /// Signal number outside the registry table
    #[error("Signal {0} is out of range")]
    SignalOutOfRange(i32),

    /// `sigaction` rejected the handler
    #[error("Failed to install handler for signal {signal} (errno {errno})")]
    SignalInstall
    {
        /// Signal number
        signal: i32,
        /// Raw errno from the kernel
        errno: i32,
    },

    /// I/O error (shared memory, `/proc` parsing, output files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for stackwire operations
pub type Result<T> = std::result::Result<T, StackwireError>;

#[cfg(unix)]
impl From<nix::errno::Errno> for StackwireError
{
    fn from(errno: nix::errno::Errno) -> Self
    {
        StackwireError::Ptrace(errno as i32)
    }
}

//! Closure-driven backend.
//!
//! Lets tests (and embedders with their own stack source) drive the full
//! handle → writer → buffer path without a real unwinder.

use super::{begin, Unwinder};
use crate::error::{Result, StackwireError};
use crate::handle::{Handle, HandleFlags};
use crate::stream::{Buffer, Writer};
use crate::types::{BackendKind, ProcessId};

type UnwindFn = Box<dyn Fn(&mut Writer<'_>) -> Result<()> + Send + Sync>;
type UnwindRemoteFn = Box<dyn Fn(&mut Writer<'_>, ProcessId) -> Result<()> + Send + Sync>;
type DestroyFn = Box<dyn FnOnce() + Send + Sync>;

/// Backend made of closures
///
/// The unwind closure receives a writer that is already bound to the
/// handle's buffer and stamped with [`BackendKind::Test`].
///
/// ## Example
///
/// ```rust
/// use stackwire_core::backend::TestBackend;
/// use stackwire_core::stream::{Buffer, Frame};
/// use stackwire_core::HandleFlags;
///
/// let handle = TestBackend::new(|writer| {
///     writer.write_frame(&Frame::new(0x1000).with_symbol(b"foo"))?;
///     Ok(())
/// })
/// .into_handle(HandleFlags::empty());
///
/// let mut bytes = [0u8; 256];
/// let mut buffer = Buffer::new(&mut bytes)?;
/// assert_eq!(handle.unwind(&mut buffer)?, 24 + 24 + 4 + 1 + 2);
/// # Ok::<(), stackwire_core::StackwireError>(())
/// ```
pub struct TestBackend
{
    unwind: UnwindFn,
    unwind_remote: Option<UnwindRemoteFn>,
    destroy: Option<DestroyFn>,
}

impl TestBackend
{
    pub fn new<F>(unwind: F) -> Self
    where
        F: Fn(&mut Writer<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            unwind: Box::new(unwind),
            unwind_remote: None,
            destroy: None,
        }
    }

    #[must_use]
    pub fn with_remote<F>(mut self, unwind_remote: F) -> Self
    where
        F: Fn(&mut Writer<'_>, ProcessId) -> Result<()> + Send + Sync + 'static,
    {
        self.unwind_remote = Some(Box::new(unwind_remote));
        self
    }

    /// Run `destroy` when the owning handle is dropped
    #[must_use]
    pub fn on_destroy<F>(mut self, destroy: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.destroy = Some(Box::new(destroy));
        self
    }

    #[must_use]
    pub fn into_handle(self, flags: HandleFlags) -> Handle
    {
        Handle::from_unwinder(Box::new(self), flags)
    }
}

impl Unwinder for TestBackend
{
    fn kind(&self) -> BackendKind
    {
        BackendKind::Test
    }

    fn unwind(&self, handle: &Handle, buffer: &mut Buffer<'_>) -> Result<usize>
    {
        let mut writer = begin(handle, buffer)?;
        (self.unwind)(&mut writer)?;
        Ok(writer.size())
    }

    fn unwind_remote(&self, handle: &Handle, buffer: &mut Buffer<'_>, pid: ProcessId) -> Result<usize>
    {
        let Some(unwind_remote) = &self.unwind_remote else {
            return Err(StackwireError::UnsupportedOperation("remote unwinding"));
        };
        let mut writer = begin(handle, buffer)?;
        unwind_remote(&mut writer, pid)?;
        Ok(writer.size())
    }
}

impl Drop for TestBackend
{
    fn drop(&mut self)
    {
        if let Some(destroy) = self.destroy.take() {
            destroy();
        }
    }
}

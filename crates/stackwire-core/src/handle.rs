//! # Handles
//!
//! A [`Handle`] is the capability object callers unwind through. It is bound
//! to exactly one backend for its whole life, carries the policy flags that
//! change how writers bind to buffers, and never owns buffer memory.
//!
//! ## Lifecycle
//!
//! ```text
//! Handle::create(kind) ──► unwind / unwind_remote (any number of times) ──► drop
//! ```
//!
//! Dropping the handle drops its backend exactly once; ownership makes a
//! double release impossible.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use tracing::debug;

use crate::backend::{NativeBackend, NativeConfig, Unwinder};
use crate::error::{Result, StackwireError};
use crate::stream::Buffer;
use crate::types::{BackendKind, ProcessId};

bitflags! {
    /// Policy flags carried by a handle
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HandleFlags: u32
    {
        /// Allow a single writer per buffer lifetime
        ///
        /// Used for captures from a signal handler that may re-enter itself:
        /// the first capture wins, later ones are rejected at bind time.
        /// Backends also take it as a hint to stay allocation-free.
        const WRITE_ONCE = 1 << 0;
    }
}

/// Process-unique handle identity, recorded as the owner of bound buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(NonZeroU64);

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

impl HandleId
{
    fn next() -> Self
    {
        loop {
            // Zero is the "unowned" marker in the buffer prologue
            if let Some(id) = NonZeroU64::new(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)) {
                return HandleId(id);
            }
        }
    }

    /// `None` for the unowned marker
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self>
    {
        NonZeroU64::new(raw).map(HandleId)
    }

    #[must_use]
    pub fn get(self) -> u64
    {
        self.0.get()
    }
}

impl fmt::Display for HandleId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

/// Capability object that unwinds into caller-supplied buffers
///
/// ## Example
///
/// ```rust,no_run
/// use stackwire_core::stream::Buffer;
/// use stackwire_core::types::BackendKind;
/// use stackwire_core::Handle;
///
/// let handle = Handle::create(BackendKind::Native)?;
/// let mut bytes = vec![0u8; 16 * 1024];
/// let mut buffer = Buffer::new(&mut bytes)?;
/// let size = handle.unwind(&mut buffer)?;
/// println!("captured {} frames in {size} bytes", buffer.reader()?.count());
/// # Ok::<(), stackwire_core::StackwireError>(())
/// ```
pub struct Handle
{
    id: HandleId,
    flags: HandleFlags,
    backend: Box<dyn Unwinder>,
}

impl Handle
{
    /// Create a handle for a built-in backend with default settings
    ///
    /// ## Errors
    ///
    /// See [`Handle::with_flags`].
    pub fn create(kind: BackendKind) -> Result<Self>
    {
        Self::with_flags(kind, HandleFlags::empty())
    }

    /// Create a handle for a built-in backend
    ///
    /// ## Errors
    ///
    /// - [`StackwireError::BackendUnavailable`] for `None` and `Test`
    ///   (test backends need closures, see [`TestBackend`](crate::backend::TestBackend))
    /// - [`StackwireError::BackendDisabled`] when the backend's cargo feature is off
    pub fn with_flags(kind: BackendKind, flags: HandleFlags) -> Result<Self>
    {
        Self::with_config(kind, NativeConfig::default(), flags)
    }

    /// Create a handle for a built-in backend with explicit settings
    ///
    /// ## Errors
    ///
    /// As for [`Handle::with_flags`].
    pub fn with_config(kind: BackendKind, config: NativeConfig, flags: HandleFlags) -> Result<Self>
    {
        let backend: Box<dyn Unwinder> = match kind {
            BackendKind::Native => Box::new(NativeBackend::new(config)),
            #[cfg(feature = "symbolize")]
            BackendKind::Symbolized => Box::new(crate::backend::SymbolizedBackend::new(config)),
            #[cfg(not(feature = "symbolize"))]
            BackendKind::Symbolized => return Err(StackwireError::BackendDisabled(kind)),
            BackendKind::Test | BackendKind::None => return Err(StackwireError::BackendUnavailable(kind)),
        };
        Ok(Self::from_unwinder(backend, flags))
    }

    /// Native backend with explicit settings
    #[must_use]
    pub fn native(config: NativeConfig, flags: HandleFlags) -> Self
    {
        Self::from_unwinder(Box::new(NativeBackend::new(config)), flags)
    }

    /// Wrap an external unwinding engine
    #[must_use]
    pub fn from_unwinder(backend: Box<dyn Unwinder>, flags: HandleFlags) -> Self
    {
        let handle = Self {
            id: HandleId::next(),
            flags,
            backend,
        };
        debug!(id = %handle.id, backend = %handle.kind(), ?flags, "Created handle");
        handle
    }

    #[must_use]
    pub fn id(&self) -> HandleId
    {
        self.id
    }

    #[must_use]
    pub fn flags(&self) -> HandleFlags
    {
        self.flags
    }

    /// Backend this handle dispatches to
    #[must_use]
    pub fn kind(&self) -> BackendKind
    {
        self.backend.kind()
    }

    /// Capture the calling thread's stack into `buffer`.
    ///
    /// Returns the stream size, header included: a capture that found no
    /// frames returns the header size, never an error.
    ///
    /// ## Errors
    ///
    /// Binding errors from [`Writer::new`](crate::stream::Writer::new) and
    /// whatever the backend reports. A full buffer is not an error: the
    /// capture stops at the last frame that fit.
    pub fn unwind(&self, buffer: &mut Buffer<'_>) -> Result<usize>
    {
        self.backend.unwind(self, buffer)
    }

    /// Capture the stack of another process (or thread) into `buffer`.
    ///
    /// ## Errors
    ///
    /// [`StackwireError::UnsupportedOperation`] when the backend has no
    /// remote support, otherwise binding and attach errors.
    pub fn unwind_remote(&self, buffer: &mut Buffer<'_>, pid: ProcessId) -> Result<usize>
    {
        self.backend.unwind_remote(self, buffer, pid)
    }
}

impl fmt::Debug for Handle
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("backend", &self.kind())
            .finish()
    }
}

impl Drop for Handle
{
    fn drop(&mut self)
    {
        debug!(id = %self.id, backend = %self.kind(), "Destroying handle");
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_ids_are_unique_and_nonzero()
    {
        let a = HandleId::next();
        let b = HandleId::next();
        assert_ne!(a, b);
        assert_ne!(a.get(), 0);
        assert_eq!(HandleId::from_raw(0), None);
        assert_eq!(HandleId::from_raw(a.get()), Some(a));
    }

    #[test]
    fn test_rejected_tags_yield_no_handle()
    {
        assert!(matches!(
            Handle::create(BackendKind::None),
            Err(StackwireError::BackendUnavailable(BackendKind::None))
        ));
        assert!(matches!(
            Handle::create(BackendKind::Test),
            Err(StackwireError::BackendUnavailable(BackendKind::Test))
        ));
    }

    #[test]
    fn test_native_handle()
    {
        let handle = Handle::with_flags(BackendKind::Native, HandleFlags::WRITE_ONCE).unwrap();
        assert_eq!(handle.kind(), BackendKind::Native);
        assert!(handle.flags().contains(HandleFlags::WRITE_ONCE));
    }
}

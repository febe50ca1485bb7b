//! Caller-owned capture buffer with its ownership prologue.
//!
//! ## Layout
//!
//! ```text
//! [ alignment padding (0..7 bytes) ]
//! [ prologue: write_count u32 | owner_flags u32 | owner u64 ]   16 bytes, 8-aligned
//! [ payload:  header (24 bytes) | frame | frame | ... ]
//! ```
//!
//! The prologue is host-endian shared state updated with atomics; only the
//! payload is part of the portable stream. A reader in another process finds
//! the payload again with [`Reader::from_region`](super::Reader::from_region).

use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::codec::HEADER_SIZE;
use crate::error::{Result, StackwireError};
use crate::handle::{HandleFlags, HandleId};

#[repr(C)]
pub(crate) struct Prologue
{
    write_count: AtomicU32,
    owner_flags: AtomicU32,
    owner: AtomicU64,
}

/// Size of the ownership prologue
pub const PROLOGUE_SIZE: usize = size_of::<Prologue>();

const _: () = assert!(PROLOGUE_SIZE == 16);

/// Offset of the prologue inside a region starting at `base`
pub(crate) fn prologue_offset(base: *const u8) -> usize
{
    base.align_offset(align_of::<Prologue>())
}

/// A caller-owned byte region that backends write captures into
///
/// The buffer never allocates and never frees: whoever supplied the bytes
/// keeps them. It is bound to at most one [`Handle`](crate::Handle) at a
/// time; see [`Writer::new`](super::Writer::new) for the binding rules.
///
/// ## Example
///
/// ```rust
/// use stackwire_core::stream::{Buffer, Frame, Writer};
/// use stackwire_core::types::Architecture;
///
/// let mut bytes = [0u8; 256];
/// let mut buffer = Buffer::new(&mut bytes)?;
/// let mut writer = Writer::new(&mut buffer, Architecture::current(), None)?;
/// writer.write_frame(&Frame::new(0x1000).with_symbol(b"foo"))?;
///
/// let frames: Vec<_> = buffer.reader()?.collect();
/// assert_eq!(frames.len(), 1);
/// # Ok::<(), stackwire_core::StackwireError>(())
/// ```
pub struct Buffer<'a>
{
    prologue: &'a Prologue,
    payload: &'a mut [u8],
}

impl<'a> Buffer<'a>
{
    /// Minimum region length that can hold a prologue and a header, whatever the alignment
    pub const MIN_LEN: usize = align_of::<Prologue>() - 1 + PROLOGUE_SIZE + HEADER_SIZE;

    /// Wrap `bytes`, resetting the prologue and header.
    ///
    /// The payload is capped at `u32::MAX` bytes, the largest size the header can record.
    ///
    /// ## Errors
    ///
    /// [`StackwireError::BufferTooSmall`] if `bytes` cannot hold the aligned
    /// prologue. A region that holds the prologue but not the header is
    /// accepted here and rejected when a writer or reader binds to it.
    pub fn new(bytes: &'a mut [u8]) -> Result<Self>
    {
        let available = bytes.len();
        let offset = prologue_offset(bytes.as_ptr());
        let needed = offset.saturating_add(PROLOGUE_SIZE);
        if available < needed {
            return Err(StackwireError::BufferTooSmall { needed, available });
        }

        let (_, rest) = bytes.split_at_mut(offset);
        let (prologue_bytes, payload) = rest.split_at_mut(PROLOGUE_SIZE);
        prologue_bytes.fill(0);
        // SAFETY: `prologue_bytes` is 16 bytes, aligned for `Prologue`, zeroed
        // (a valid bit pattern for atomics) and exclusively borrowed for 'a.
        // It is never touched through the byte slice again.
        let prologue = unsafe { &*prologue_bytes.as_mut_ptr().cast::<Prologue>() };

        let cap = payload.len().min(u32::MAX as usize);
        let payload = &mut payload[..cap];
        let header_len = payload.len().min(HEADER_SIZE);
        payload[..header_len].fill(0);

        Ok(Self { prologue, payload })
    }

    /// Wrap a raw region, typically shared memory mapped by the caller.
    ///
    /// ## Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for `'a`, and
    /// nothing else in this process may create references to that memory
    /// while the buffer is alive.
    ///
    /// ## Errors
    ///
    /// Same as [`Buffer::new`].
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Result<Self>
    {
        // SAFETY: upheld by the caller
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
        Self::new(bytes)
    }

    /// Start a new buffer lifetime: forget the owner, the write counter and any frames.
    pub fn reset(&mut self)
    {
        self.prologue.write_count.store(0, Ordering::SeqCst);
        self.prologue.owner_flags.store(0, Ordering::SeqCst);
        self.prologue.owner.store(0, Ordering::SeqCst);
        let header_len = self.payload.len().min(HEADER_SIZE);
        self.payload[..header_len].fill(0);
    }

    /// Payload bytes (header and frames)
    #[must_use]
    pub fn payload(&self) -> &[u8]
    {
        &*self.payload
    }

    pub(crate) fn payload_mut(&mut self) -> &mut [u8]
    {
        &mut *self.payload
    }

    /// Payload capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> usize
    {
        self.payload.len()
    }

    /// Id of the handle that owns this buffer, if any
    #[must_use]
    pub fn owner(&self) -> Option<HandleId>
    {
        HandleId::from_raw(self.prologue.owner.load(Ordering::SeqCst))
    }

    /// Number of write-once binds attempted during this buffer lifetime
    #[must_use]
    pub fn write_count(&self) -> u32
    {
        self.prologue.write_count.load(Ordering::SeqCst)
    }

    /// Apply the identity and write-once rules for a writer bound by `owner`.
    ///
    /// - a buffer owned by another handle is rejected;
    /// - an unowned buffer is claimed by `owner` with a compare-and-swap;
    /// - if the owner is write-once, the shared counter is incremented and
    ///   every bind after the first is rejected.
    ///
    /// A writer without a handle may only bind an unowned buffer and never
    /// claims it. Nothing here allocates or blocks.
    pub(crate) fn bind(&self, owner: Option<(HandleId, HandleFlags)>) -> Result<()>
    {
        let Some((id, flags)) = owner else {
            if self.prologue.owner.load(Ordering::SeqCst) != 0 {
                return Err(StackwireError::BufferOwnedByOtherHandle);
            }
            return Ok(());
        };

        match self
            .prologue
            .owner
            .compare_exchange(0, id.get(), Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => self.prologue.owner_flags.store(flags.bits(), Ordering::SeqCst),
            Err(current) if current == id.get() => {}
            Err(_) => return Err(StackwireError::BufferOwnedByOtherHandle),
        }

        let recorded = HandleFlags::from_bits_truncate(self.prologue.owner_flags.load(Ordering::SeqCst));
        if (flags | recorded).contains(HandleFlags::WRITE_ONCE)
            && self.prologue.write_count.fetch_add(1, Ordering::SeqCst) > 0
        {
            return Err(StackwireError::WriteOnceViolation);
        }
        Ok(())
    }

    /// Decode the payload
    ///
    /// ## Errors
    ///
    /// See [`Reader::from_payload`](super::Reader::from_payload).
    pub fn reader(&self) -> Result<super::Reader<'_>>
    {
        super::Reader::from_payload(&*self.payload)
    }
}

impl std::fmt::Debug for Buffer<'_>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Buffer")
            .field("capacity", &self.payload.len())
            .field("owner", &self.owner())
            .field("write_count", &self.write_count())
            .finish()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_too_small_for_prologue()
    {
        let mut bytes = [0u8; 4];
        let err = Buffer::new(&mut bytes).unwrap_err();
        assert!(matches!(err, StackwireError::BufferTooSmall { .. }));
    }

    #[test]
    fn test_new_resets_prologue_and_header()
    {
        let mut bytes = [0xFFu8; 128];
        let buffer = Buffer::new(&mut bytes).unwrap();
        assert_eq!(buffer.owner(), None);
        assert_eq!(buffer.write_count(), 0);
        assert!(buffer.payload()[..HEADER_SIZE].iter().all(|&b| b == 0));
        assert!(buffer.capacity() >= 128 - Buffer::MIN_LEN + HEADER_SIZE);
    }

    #[test]
    fn test_unowned_bind_is_repeatable()
    {
        let mut bytes = [0u8; 64];
        let buffer = Buffer::new(&mut bytes).unwrap();
        buffer.bind(None).unwrap();
        buffer.bind(None).unwrap();
        assert_eq!(buffer.owner(), None);
    }
}

//! Allocation-free frame writer.

use super::buffer::Buffer;
use super::codec::{
    encoded_len, read_u16, read_u32, write_u16, write_u32, write_u64, PayloadHeader, BACKEND_OFFSET, HEADER_SIZE,
    MAGIC, SIZE_OFFSET, TID_OFFSET, VERSION,
};
use super::frame::Frame;
use crate::error::{Result, StackwireError};
use crate::handle::Handle;
use crate::types::{Architecture, BackendKind};

/// Cursor that appends frames to a [`Buffer`]
///
/// Every method is safe to call from a signal handler: nothing allocates,
/// locks or logs.
#[derive(Debug)]
pub struct Writer<'b>
{
    payload: &'b mut [u8],
    cursor: usize,
}

impl<'b> Writer<'b>
{
    /// Bind a writer to `buffer` and stamp a fresh header.
    ///
    /// On success the header holds the magic, the format version,
    /// `architecture`, `size = 24`, the calling thread's id and
    /// `backend = None`. Any frames from an earlier writer are discarded.
    ///
    /// ## Binding rules
    ///
    /// - a buffer already bound to a different handle is rejected;
    /// - an unbound buffer becomes bound to `owner`;
    /// - when `owner` is [`WRITE_ONCE`](crate::HandleFlags::WRITE_ONCE),
    ///   only the first bind in the buffer's lifetime succeeds.
    ///
    /// ## Errors
    ///
    /// - [`StackwireError::BufferTooSmall`]: the payload cannot hold a header
    /// - [`StackwireError::BufferOwnedByOtherHandle`]
    /// - [`StackwireError::WriteOnceViolation`]
    pub fn new(buffer: &'b mut Buffer<'_>, architecture: Architecture, owner: Option<&Handle>) -> Result<Self>
    {
        let available = buffer.capacity();
        if available < HEADER_SIZE {
            return Err(StackwireError::BufferTooSmall {
                needed: HEADER_SIZE,
                available,
            });
        }

        buffer.bind(owner.map(|handle| (handle.id(), handle.flags())))?;

        let payload = buffer.payload_mut();
        let header = PayloadHeader {
            magic: MAGIC,
            version: VERSION,
            architecture: architecture.as_raw(),
            size: HEADER_SIZE as u32,
            tid: crate::current_tid(),
            backend: BackendKind::None.as_raw(),
        };
        header.encode(payload);

        Ok(Self {
            payload,
            cursor: HEADER_SIZE,
        })
    }

    /// Append one frame.
    ///
    /// The exact encoded length is computed first; if it does not fit,
    /// nothing is written and the header size and cursor are untouched.
    /// Returns the number of bytes written.
    ///
    /// ## Errors
    ///
    /// [`StackwireError::InsufficientCapacity`] when the frame does not fit.
    pub fn write_frame(&mut self, frame: &Frame<'_>) -> Result<usize>
    {
        let needed = encoded_len(frame);
        let available = self.remaining();
        if needed > available {
            return Err(StackwireError::InsufficientCapacity { needed, available });
        }

        let start = self.cursor;
        let out = &mut self.payload[start..start + needed];
        write_u64(out, 0, frame.addr);
        write_u64(out, 8, frame.line);
        write_u64(out, 16, frame.offset);
        let mut at = 24;
        for text in [frame.symbol_bytes(), frame.filename_bytes()] {
            out[at..at + text.len()].copy_from_slice(text);
            out[at + text.len()] = 0;
            at += text.len() + 1;
        }
        // register_count() never exceeds u16::MAX, see Frame::register_capacity
        write_u16(out, at, frame.register_count() as u16);
        at += 2;
        let registers = frame.register_bytes();
        out[at..at + registers.len()].copy_from_slice(registers);
        debug_assert_eq!(at + registers.len(), needed);

        self.cursor += needed;
        write_u32(self.payload, SIZE_OFFSET, self.cursor as u32);
        Ok(needed)
    }

    /// Bytes left for frames
    #[must_use]
    pub fn remaining(&self) -> usize
    {
        self.payload.len() - self.cursor
    }

    /// Stream size so far, header included
    #[must_use]
    pub fn size(&self) -> usize
    {
        self.cursor
    }

    pub fn set_tid(&mut self, tid: u32)
    {
        write_u32(self.payload, TID_OFFSET, tid);
    }

    #[must_use]
    pub fn tid(&self) -> u32
    {
        read_u32(&*self.payload, TID_OFFSET).unwrap_or_default()
    }

    pub fn set_backend(&mut self, backend: BackendKind)
    {
        write_u16(self.payload, BACKEND_OFFSET, backend.as_raw());
    }

    /// Backend recorded in the header, `None` for an unknown tag
    #[must_use]
    pub fn backend(&self) -> Option<BackendKind>
    {
        read_u16(&*self.payload, BACKEND_OFFSET).and_then(BackendKind::from_raw)
    }
}

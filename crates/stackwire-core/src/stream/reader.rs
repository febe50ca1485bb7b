//! Bounds-checked frame reader.

use super::buffer::{prologue_offset, Buffer, PROLOGUE_SIZE};
use super::codec::{read_c_str, read_u16, read_u64, PayloadHeader, HEADER_SIZE, MAGIC, REGISTER_ENTRY_SIZE};
use super::frame::Frame;
use crate::error::{Result, StackwireError};
use crate::types::{Architecture, BackendKind};

/// Cursor that decodes frames from a payload
///
/// The logical end of the stream is `min(header.size, payload length)`:
/// bytes past the recorded size are never interpreted, and a header that
/// claims more than the input holds is clamped to the input. A frame that
/// would cross the end (including an unterminated string or a register block
/// that is longer than what is left) ends iteration and leaves the cursor
/// where it was.
///
/// Decoded frames alias the payload; nothing is copied.
#[derive(Debug, Clone)]
pub struct Reader<'a>
{
    data: &'a [u8],
    header: PayloadHeader,
    cursor: usize,
}

impl<'a> Reader<'a>
{
    /// Reader over the payload of a live buffer
    ///
    /// ## Errors
    ///
    /// See [`Reader::from_payload`].
    pub fn new(buffer: &'a Buffer<'_>) -> Result<Self>
    {
        Self::from_payload(buffer.payload())
    }

    /// Reader over raw payload bytes (a stream dumped to a file, for example)
    ///
    /// ## Errors
    ///
    /// - [`StackwireError::BufferTooSmall`] when shorter than the header
    /// - [`StackwireError::BadMagic`] when the magic does not match
    pub fn from_payload(payload: &'a [u8]) -> Result<Self>
    {
        let Some(header) = PayloadHeader::decode(payload) else {
            return Err(StackwireError::BufferTooSmall {
                needed: HEADER_SIZE,
                available: payload.len(),
            });
        };
        if header.magic != MAGIC {
            return Err(StackwireError::BadMagic(header.magic));
        }

        let end = (header.size as usize).clamp(HEADER_SIZE, payload.len());
        Ok(Self {
            data: &payload[..end],
            header,
            cursor: HEADER_SIZE,
        })
    }

    /// Reader over a whole region previously wrapped by a [`Buffer`]
    ///
    /// Skips the alignment padding and the ownership prologue the same way
    /// [`Buffer::new`] lays them out, so it works on a shared-memory mapping
    /// read by another process.
    ///
    /// The padding is derived from `region`'s own address, so this only
    /// finds the payload when `region` has the same alignment modulo 8 as
    /// the memory the capture was made in. For bytes copied elsewhere (a
    /// region loaded from a file) use [`from_region_at`](Self::from_region_at).
    ///
    /// ## Errors
    ///
    /// See [`Reader::from_payload`].
    pub fn from_region(region: &'a [u8]) -> Result<Self>
    {
        Self::from_region_at(region, prologue_offset(region.as_ptr()))
    }

    /// Reader over a region whose prologue started `padding` bytes in when
    /// it was captured
    ///
    /// A region captured in a [`SharedRegion`](crate::shm::SharedRegion) is
    /// page-aligned, so its padding is 0 wherever the bytes end up.
    ///
    /// ## Errors
    ///
    /// See [`Reader::from_payload`].
    pub fn from_region_at(region: &'a [u8], padding: usize) -> Result<Self>
    {
        let skip = padding.saturating_add(PROLOGUE_SIZE);
        let Some(payload) = region.get(skip..) else {
            return Err(StackwireError::BufferTooSmall {
                needed: skip.saturating_add(HEADER_SIZE),
                available: region.len(),
            });
        };
        Self::from_payload(payload)
    }

    /// Decode the next frame, or `None` at the end of valid data
    pub fn next_frame(&mut self) -> Option<Frame<'a>>
    {
        let (frame, next) = decode_frame(self.data, self.cursor)?;
        self.cursor = next;
        Some(frame)
    }

    /// Start again from the first frame
    pub fn rewind(&mut self)
    {
        self.cursor = HEADER_SIZE;
    }

    #[must_use]
    pub fn header(&self) -> PayloadHeader
    {
        self.header
    }

    #[must_use]
    pub fn tid(&self) -> u32
    {
        self.header.tid
    }

    /// Backend recorded in the header, `None` for an unknown tag
    #[must_use]
    pub fn backend(&self) -> Option<BackendKind>
    {
        BackendKind::from_raw(self.header.backend)
    }

    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        Architecture::from_raw(self.header.architecture)
    }

    #[must_use]
    pub fn version(&self) -> u16
    {
        self.header.version
    }

    /// Logical stream size as clamped to the input, header included
    #[must_use]
    pub fn size(&self) -> usize
    {
        self.data.len()
    }

    /// Offset of the next frame
    #[must_use]
    pub fn position(&self) -> usize
    {
        self.cursor
    }
}

impl<'a> Iterator for Reader<'a>
{
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item>
    {
        self.next_frame()
    }
}

/// Decode one frame at `at`, returning it and the offset of the following one.
fn decode_frame(data: &[u8], at: usize) -> Option<(Frame<'_>, usize)>
{
    let addr = read_u64(data, at)?;
    let line = read_u64(data, at + 8)?;
    let offset = read_u64(data, at + 16)?;
    let mut pos = at + 24;

    let symbol = read_c_str(data, pos)?;
    pos += symbol.len() + 1;
    let filename = read_c_str(data, pos)?;
    pos += filename.len() + 1;

    let count = usize::from(read_u16(data, pos)?);
    pos += 2;
    let end = pos.checked_add(count * REGISTER_ENTRY_SIZE)?;
    let registers = data.get(pos..end)?;

    Some((Frame::decoded(addr, line, offset, symbol, filename, registers), end))
}

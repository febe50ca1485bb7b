//! Payload header and little-endian primitives.
//!
//! Every multi-byte integer in a stream is little-endian regardless of the
//! host, so a capture taken on one machine can be parsed on another. All
//! reads are bounds-checked and return `None` instead of panicking.

use super::frame::Frame;

/// Format identity constant stored at offset 0 of every payload
pub const MAGIC: u64 = 0xaee9_eb7a_786a_6145;

/// Current format revision
pub const VERSION: u16 = 1;

/// Encoded size of [`PayloadHeader`]
pub const HEADER_SIZE: usize = 24;

/// Encoded size of one `(register id, value)` pair
pub const REGISTER_ENTRY_SIZE: usize = 10;

pub(crate) const MAGIC_OFFSET: usize = 0;
pub(crate) const VERSION_OFFSET: usize = 8;
pub(crate) const ARCH_OFFSET: usize = 10;
pub(crate) const SIZE_OFFSET: usize = 12;
pub(crate) const TID_OFFSET: usize = 16;
pub(crate) const BACKEND_OFFSET: usize = 20;

/// Fixed-size record at the start of every payload
///
/// ```text
/// offset  0: magic        u64
/// offset  8: version      u16
/// offset 10: architecture u16
/// offset 12: size         u32  (header inclusive)
/// offset 16: tid          u32
/// offset 20: backend      u16
/// offset 22: reserved     2 bytes
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader
{
    pub magic: u64,
    pub version: u16,
    pub architecture: u16,
    pub size: u32,
    pub tid: u32,
    pub backend: u16,
}

impl PayloadHeader
{
    /// Decode a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    ///
    /// Does not validate the magic; callers decide what to do with it.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self>
    {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: read_u64(bytes, MAGIC_OFFSET)?,
            version: read_u16(bytes, VERSION_OFFSET)?,
            architecture: read_u16(bytes, ARCH_OFFSET)?,
            size: read_u32(bytes, SIZE_OFFSET)?,
            tid: read_u32(bytes, TID_OFFSET)?,
            backend: read_u16(bytes, BACKEND_OFFSET)?,
        })
    }

    /// Encode into the first [`HEADER_SIZE`] bytes of `out`, zeroing the reserved bytes.
    ///
    /// Returns `false` when `out` is too short.
    pub fn encode(&self, out: &mut [u8]) -> bool
    {
        let Some(dst) = out.get_mut(..HEADER_SIZE) else {
            return false;
        };
        dst[MAGIC_OFFSET..VERSION_OFFSET].copy_from_slice(&self.magic.to_le_bytes());
        dst[VERSION_OFFSET..ARCH_OFFSET].copy_from_slice(&self.version.to_le_bytes());
        dst[ARCH_OFFSET..SIZE_OFFSET].copy_from_slice(&self.architecture.to_le_bytes());
        dst[SIZE_OFFSET..TID_OFFSET].copy_from_slice(&self.size.to_le_bytes());
        dst[TID_OFFSET..BACKEND_OFFSET].copy_from_slice(&self.tid.to_le_bytes());
        dst[BACKEND_OFFSET..22].copy_from_slice(&self.backend.to_le_bytes());
        dst[22..HEADER_SIZE].fill(0);
        true
    }
}

/// Exact number of bytes `frame` occupies on the wire
///
/// `addr + line + offset + symbol\0 + filename\0 + reg_count + registers`
#[must_use]
pub fn encoded_len(frame: &Frame<'_>) -> usize
{
    8 + 8 + 8 + frame.symbol_bytes().len() + 1 + frame.filename_bytes().len() + 1 + 2
        + frame.register_count() * REGISTER_ENTRY_SIZE
}

/// Length of a C string: up to the first NUL, or the whole slice
#[must_use]
pub fn c_str_len(bytes: &[u8]) -> usize
{
    bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len())
}

#[must_use]
pub fn read_u16(bytes: &[u8], at: usize) -> Option<u16>
{
    let raw = bytes.get(at..at.checked_add(2)?)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

#[must_use]
pub fn read_u32(bytes: &[u8], at: usize) -> Option<u32>
{
    let raw = bytes.get(at..at.checked_add(4)?)?;
    let mut out = [0u8; 4];
    out.copy_from_slice(raw);
    Some(u32::from_le_bytes(out))
}

#[must_use]
pub fn read_u64(bytes: &[u8], at: usize) -> Option<u64>
{
    let raw = bytes.get(at..at.checked_add(8)?)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(raw);
    Some(u64::from_le_bytes(out))
}

/// Read a NUL-terminated string starting at `at`, never scanning past `bytes`.
///
/// Returns the string without its terminator.
#[must_use]
pub fn read_c_str(bytes: &[u8], at: usize) -> Option<&[u8]>
{
    let tail = bytes.get(at..)?;
    let len = tail.iter().position(|&b| b == 0)?;
    Some(&tail[..len])
}

pub(crate) fn write_u16(bytes: &mut [u8], at: usize, value: u16)
{
    bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(bytes: &mut [u8], at: usize, value: u32)
{
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(bytes: &mut [u8], at: usize, value: u64)
{
    bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

//! Backend that resolves symbol names, files and lines while it walks.
//!
//! Resolution allocates and takes the `backtrace` crate's lock, so a
//! write-once handle (the signal path) falls back to address-only frames.

use super::native::unwind_addresses;
use super::{begin, record_pc_sp, NativeConfig, Unwinder, LOCAL_SCRATCH};
use crate::demangle::demangle;
use crate::error::Result;
use crate::handle::{Handle, HandleFlags};
use crate::stream::{Buffer, Frame, Writer};
use crate::types::BackendKind;

/// Local backend with symbol, filename and line resolution
#[derive(Debug, Clone, Default)]
pub struct SymbolizedBackend
{
    config: NativeConfig,
}

impl SymbolizedBackend
{
    #[must_use]
    pub fn new(config: NativeConfig) -> Self
    {
        Self { config }
    }
}

/// One resolved symbol, owned so it can outlive the resolver callback
struct Resolved
{
    name: Option<String>,
    filename: Option<String>,
    line: u64,
    symbol_start: u64,
}

impl Resolved
{
    fn from_symbol(symbol: &backtrace::Symbol) -> Self
    {
        let name = symbol.name().map(|name| {
            name.as_str()
                .and_then(demangle)
                .unwrap_or_else(|| name.to_string())
        });
        Self {
            name,
            filename: symbol.filename().map(|path| path.to_string_lossy().into_owned()),
            line: symbol.lineno().map_or(0, u64::from),
            symbol_start: symbol.addr().map_or(0, |addr| addr as u64),
        }
    }
}

fn write_resolved(writer: &mut Writer<'_>, pc: u64, sp: u64, resolved: &Resolved) -> bool
{
    let offset = if resolved.symbol_start != 0 && resolved.symbol_start <= pc {
        pc - resolved.symbol_start
    } else {
        0
    };
    let mut scratch = [0u8; LOCAL_SCRATCH];
    let mut frame = Frame::new(pc)
        .with_line(resolved.line)
        .with_offset(offset)
        .with_register_scratch(&mut scratch);
    frame.symbol = resolved.name.as_deref().map(str::as_bytes);
    frame.filename = resolved.filename.as_deref().map(str::as_bytes);
    record_pc_sp(&mut frame, pc, sp);
    writer.write_frame(&frame).is_ok()
}

impl Unwinder for SymbolizedBackend
{
    fn kind(&self) -> BackendKind
    {
        BackendKind::Symbolized
    }

    fn unwind(&self, handle: &Handle, buffer: &mut Buffer<'_>) -> Result<usize>
    {
        let mut writer = begin(handle, buffer)?;
        if handle.flags().contains(HandleFlags::WRITE_ONCE) {
            unwind_addresses(&mut writer, self.config.max_frames);
            return Ok(writer.size());
        }

        let max_frames = self.config.max_frames;
        let mut written = 0usize;
        let mut full = false;
        backtrace::trace(|frame| {
            if written >= max_frames {
                return false;
            }
            let pc = frame.ip() as u64;
            let sp = frame.sp() as u64;

            // Inlined functions resolve to several symbols for one pc
            let mut symbols = Vec::new();
            backtrace::resolve_frame(frame, |symbol| symbols.push(Resolved::from_symbol(symbol)));
            if symbols.is_empty() {
                symbols.push(Resolved {
                    name: None,
                    filename: None,
                    line: 0,
                    symbol_start: frame.symbol_address() as u64,
                });
            }

            for resolved in &symbols {
                if written >= max_frames {
                    break;
                }
                if !write_resolved(&mut writer, pc, sp, resolved) {
                    full = true;
                    break;
                }
                written += 1;
            }
            !full && written < max_frames
        });
        Ok(writer.size())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[inline(never)]
    fn capture_here(handle: &Handle, bytes: &mut [u8]) -> usize
    {
        let mut buffer = Buffer::new(bytes).unwrap();
        handle.unwind(&mut buffer).unwrap()
    }

    #[test]
    fn test_symbolized_capture_has_names()
    {
        let handle = Handle::create(BackendKind::Symbolized).unwrap();
        let mut bytes = vec![0u8; 256 * 1024];
        let size = capture_here(&handle, &mut bytes);
        assert!(size > 24);

        let reader = crate::stream::Reader::from_region(&bytes).unwrap();
        assert_eq!(reader.backend(), Some(BackendKind::Symbolized));
        let names: Vec<String> = reader
            .filter_map(|frame| frame.symbol_str().map(str::to_owned))
            .collect();
        assert!(names.iter().any(|name| name.contains("capture_here")), "{names:?}");
    }

    #[test]
    fn test_write_once_skips_resolution()
    {
        let handle = Handle::with_flags(BackendKind::Symbolized, HandleFlags::WRITE_ONCE).unwrap();
        let mut bytes = vec![0u8; 64 * 1024];
        capture_here(&handle, &mut bytes);

        let reader = crate::stream::Reader::from_region(&bytes).unwrap();
        assert!(reader.count() > 0);
        let reader = crate::stream::Reader::from_region(&bytes).unwrap();
        assert!(reader.into_iter().all(|frame| frame.symbol_bytes().is_empty()));
    }
}

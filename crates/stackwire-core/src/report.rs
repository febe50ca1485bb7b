//! Plain-text rendering of a capture.
//!
//! ```text
//! Frame: stackwire::demo::crash
//!   PC: 0x55d0c0a03010
//!   File: src/demo.rs:42
//!   Registers: 2
//!     Register rip(0010): 55D0C0A03010
//!     Register rsp(0007): 7FFD8C20FF80
//! ```
//!
//! `File:` only appears for frames that carry a filename. Frames without a
//! symbol print as `<unknown>`.

use std::io::{self, Write};

use crate::demangle::display_name;
use crate::stream::{Frame, Reader};
use crate::types::register_name;

/// Print every frame left in `reader` to `out`
///
/// ## Errors
///
/// Whatever `out` returns.
pub fn write_report<W: Write>(reader: Reader<'_>, out: &mut W) -> io::Result<()>
{
    for frame in reader {
        write_frame(&frame, out)?;
    }
    Ok(())
}

/// Print a single frame
///
/// ## Errors
///
/// Whatever `out` returns.
pub fn write_frame<W: Write>(frame: &Frame<'_>, out: &mut W) -> io::Result<()>
{
    writeln!(out, "Frame: {}", display_name(frame.symbol_bytes()))?;
    writeln!(out, "  PC: {:#x}", frame.addr)?;
    if !frame.filename_bytes().is_empty() {
        let filename = String::from_utf8_lossy(frame.filename_bytes());
        if frame.line == 0 {
            writeln!(out, "  File: {filename}")?;
        } else {
            writeln!(out, "  File: {filename}:{}", frame.line)?;
        }
    }
    writeln!(out, "  Registers: {}", frame.register_count())?;
    for (reg, value) in frame.registers() {
        writeln!(out, "    Register {}({reg:04X}): {value:X}", register_name(reg))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::stream::Buffer;
    use crate::stream::Writer;
    use crate::types::{Architecture, Register};

    #[test]
    fn test_report_format()
    {
        let mut bytes = [0u8; 512];
        let mut buffer = Buffer::new(&mut bytes).unwrap();
        {
            let mut writer = Writer::new(&mut buffer, Architecture::X86_64, None).unwrap();
            let mut scratch = [0u8; 20];
            let mut frame = Frame::new(0x1000)
                .with_symbol(b"foo")
                .with_filename(b"foo.c")
                .with_line(7)
                .with_register_scratch(&mut scratch);
            frame.register_append(Register::X86_64Rip, 0x1000).unwrap();
            frame.register_append_raw(0x4242, 0xAB).unwrap();
            writer.write_frame(&frame).unwrap();
            writer.write_frame(&Frame::new(0x2000)).unwrap();
        }

        let mut out = Vec::new();
        write_report(buffer.reader().unwrap(), &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Frame: foo\n  PC: 0x1000\n  File: foo.c:7\n  Registers: 2\n    Register rip(0010): 1000\n    Register unknown(4242): AB\n\
             Frame: <unknown>\n  PC: 0x2000\n  Registers: 0\n"
        );
    }
}

//! Stream round trips and buffer binding rules, through the public API only.

use stackwire_core::backend::TestBackend;
use stackwire_core::stream::{Buffer, Frame, Reader, Writer, HEADER_SIZE, PROLOGUE_SIZE};
use stackwire_core::types::{Architecture, BackendKind, Register};
use stackwire_core::{HandleFlags, StackwireError};

/// 8-byte aligned region, so the payload starts right after the prologue
#[repr(C, align(8))]
struct Aligned<const N: usize>([u8; N]);

fn empty_handle(flags: HandleFlags) -> stackwire_core::Handle
{
    TestBackend::new(|_| Ok(())).into_handle(flags)
}

#[test]
fn test_example_frame_round_trip()
{
    let mut bytes = [0u8; 256];
    let mut buffer = Buffer::new(&mut bytes).unwrap();
    {
        let mut writer = Writer::new(&mut buffer, Architecture::X86_64, None).unwrap();
        let frame = Frame::new(0x1000).with_line(42).with_symbol(b"foo").with_filename(b"");
        assert_eq!(writer.write_frame(&frame).unwrap(), 24 + 4 + 1 + 2);
    }

    let mut reader = buffer.reader().unwrap();
    let frame = reader.next_frame().unwrap();
    assert_eq!(frame.addr, 0x1000);
    assert_eq!(frame.line, 42);
    assert_eq!(frame.offset, 0);
    assert_eq!(frame.symbol_bytes(), b"foo");
    assert_eq!(frame.filename_bytes(), b"");
    assert_eq!(frame.register_count(), 0);
    assert!(reader.next_frame().is_none());
}

#[test]
fn test_round_trip_many_frames()
{
    let mut bytes = vec![0u8; 4096];
    let mut buffer = Buffer::new(&mut bytes).unwrap();
    let symbols: [&[u8]; 4] = [b"main", b"", b"std::rt::lang_start", b"_start"];
    {
        let mut writer = Writer::new(&mut buffer, Architecture::Arm64, None).unwrap();
        for (i, symbol) in symbols.iter().enumerate() {
            let mut scratch = [0u8; 30];
            let mut frame = Frame::new(0x4000 + i as u64)
                .with_symbol(symbol)
                .with_filename(b"lib.rs")
                .with_line(i as u64)
                .with_offset(0x10 * i as u64)
                .with_register_scratch(&mut scratch);
            for r in 0..i {
                frame.register_append(Register::ALL[26 + r], r as u64 * 3).unwrap();
            }
            writer.write_frame(&frame).unwrap();
        }
    }

    let reader = buffer.reader().unwrap();
    assert_eq!(reader.architecture(), Architecture::Arm64);
    let frames: Vec<_> = reader.collect();
    assert_eq!(frames.len(), symbols.len());
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.addr, 0x4000 + i as u64);
        assert_eq!(frame.line, i as u64);
        assert_eq!(frame.offset, 0x10 * i as u64);
        assert_eq!(frame.symbol_bytes(), symbols[i]);
        assert_eq!(frame.filename_str(), Some("lib.rs"));
        let registers: Vec<_> = frame.registers().collect();
        let expected: Vec<_> = (0..i).map(|r| (26 + r as u16, r as u64 * 3)).collect();
        assert_eq!(registers, expected);
    }
}

#[test]
fn test_header_only_buffer_yields_no_frame()
{
    let mut region = Aligned([0u8; PROLOGUE_SIZE + HEADER_SIZE]);
    let mut buffer = Buffer::new(&mut region.0).unwrap();
    assert_eq!(buffer.capacity(), HEADER_SIZE);

    let mut writer = Writer::new(&mut buffer, Architecture::X86_64, None).unwrap();
    assert_eq!(writer.remaining(), 0);
    assert!(matches!(
        writer.write_frame(&Frame::new(1)),
        Err(StackwireError::InsufficientCapacity { needed: 28, available: 0 })
    ));
    drop(writer);

    let mut reader = buffer.reader().unwrap();
    assert!(reader.next_frame().is_none());
    assert!(reader.next_frame().is_none());
}

#[test]
fn test_failed_write_is_a_no_op()
{
    let mut bytes = [0u8; 128];
    let mut buffer = Buffer::new(&mut bytes).unwrap();
    let mut writer = Writer::new(&mut buffer, Architecture::X86_64, None).unwrap();
    writer.write_frame(&Frame::new(1).with_symbol(b"fits")).unwrap();
    let size = writer.size();
    let remaining = writer.remaining();

    let long = [b'x'; 200];
    assert!(writer.write_frame(&Frame::new(2).with_symbol(&long)).is_err());
    assert_eq!(writer.size(), size);
    assert_eq!(writer.remaining(), remaining);

    // The next frame that fits lands right after the first one
    writer.write_frame(&Frame::new(3)).unwrap();
    drop(writer);
    let addrs: Vec<u64> = buffer.reader().unwrap().map(|f| f.addr).collect();
    assert_eq!(addrs, vec![1, 3]);
}

#[test]
fn test_write_once_binds_exactly_once()
{
    let handle = empty_handle(HandleFlags::WRITE_ONCE);
    let mut bytes = [0u8; 256];
    let mut buffer = Buffer::new(&mut bytes).unwrap();

    assert!(Writer::new(&mut buffer, Architecture::current(), Some(&handle)).is_ok());
    assert!(matches!(
        Writer::new(&mut buffer, Architecture::current(), Some(&handle)),
        Err(StackwireError::WriteOnceViolation)
    ));
    assert!(matches!(handle.unwind(&mut buffer), Err(StackwireError::WriteOnceViolation)));

    // A new buffer lifetime accepts one more writer
    buffer.reset();
    assert_eq!(handle.unwind(&mut buffer).unwrap(), HEADER_SIZE);
}

#[test]
fn test_other_handle_is_rejected()
{
    let a = empty_handle(HandleFlags::empty());
    let b = empty_handle(HandleFlags::empty());
    let mut bytes = [0u8; 256];
    let mut buffer = Buffer::new(&mut bytes).unwrap();

    a.unwind(&mut buffer).unwrap();
    assert_eq!(buffer.owner(), Some(a.id()));
    assert!(matches!(b.unwind(&mut buffer), Err(StackwireError::BufferOwnedByOtherHandle)));
    assert!(matches!(
        Writer::new(&mut buffer, Architecture::current(), None),
        Err(StackwireError::BufferOwnedByOtherHandle)
    ));
    // The owner can keep writing
    a.unwind(&mut buffer).unwrap();
}

#[test]
fn test_header_accessors()
{
    let handle = TestBackend::new(|writer| {
        writer.set_tid(77);
        Ok(())
    })
    .into_handle(HandleFlags::empty());
    let mut bytes = [0u8; 256];
    let mut buffer = Buffer::new(&mut bytes).unwrap();
    handle.unwind(&mut buffer).unwrap();

    let reader = buffer.reader().unwrap();
    assert_eq!(reader.tid(), 77);
    assert_eq!(reader.backend(), Some(BackendKind::Test));
    assert_eq!(reader.architecture(), Architecture::current());
    assert_eq!(reader.size(), HEADER_SIZE);
}

#[test]
fn test_region_reader_sees_buffer_contents()
{
    let mut bytes = vec![0u8; 512];
    {
        let mut buffer = Buffer::new(&mut bytes).unwrap();
        let mut writer = Writer::new(&mut buffer, Architecture::X86, None).unwrap();
        writer.write_frame(&Frame::new(0xdead).with_filename(b"a.c").with_line(9)).unwrap();
    }
    let frames: Vec<_> = Reader::from_region(&bytes).unwrap().collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].addr, 0xdead);
    assert_eq!(frames[0].filename_str(), Some("a.c"));
    assert!(frames[0].symbol_str().is_none());
}

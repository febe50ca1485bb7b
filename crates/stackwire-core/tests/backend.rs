//! Handle construction and backend dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stackwire_core::backend::{NativeConfig, TestBackend, Unwinder};
use stackwire_core::stream::{Buffer, Frame};
use stackwire_core::types::BackendKind;
use stackwire_core::{Handle, HandleFlags, ProcessId, StackwireError};

#[test]
fn test_create_rejects_unbuildable_kinds()
{
    for kind in [BackendKind::None, BackendKind::Test] {
        assert!(matches!(Handle::create(kind), Err(StackwireError::BackendUnavailable(k)) if k == kind));
    }
    assert_eq!(Handle::create(BackendKind::Native).unwrap().kind(), BackendKind::Native);
}

#[cfg(feature = "symbolize")]
#[test]
fn test_create_symbolized()
{
    assert_eq!(Handle::create(BackendKind::Symbolized).unwrap().kind(), BackendKind::Symbolized);
}

#[cfg(not(feature = "symbolize"))]
#[test]
fn test_symbolized_disabled()
{
    assert!(matches!(
        Handle::create(BackendKind::Symbolized),
        Err(StackwireError::BackendDisabled(BackendKind::Symbolized))
    ));
}

#[test]
fn test_destroy_runs_once_on_drop()
{
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&destroyed);
    let handle = TestBackend::new(|_| Ok(()))
        .on_destroy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .into_handle(HandleFlags::empty());

    let mut bytes = [0u8; 128];
    let mut buffer = Buffer::new(&mut bytes).unwrap();
    handle.unwind(&mut buffer).unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);
    drop(handle);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unwind_reaches_the_backend()
{
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let handle = TestBackend::new(move |writer| {
        seen.fetch_add(1, Ordering::SeqCst);
        writer.write_frame(&Frame::new(1))?;
        writer.write_frame(&Frame::new(2))?;
        Ok(())
    })
    .into_handle(HandleFlags::empty());

    let mut bytes = [0u8; 256];
    let mut buffer = Buffer::new(&mut bytes).unwrap();
    assert_eq!(handle.unwind(&mut buffer).unwrap(), 24 + 2 * 28);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_remote_dispatch()
{
    let without_remote = TestBackend::new(|_| Ok(())).into_handle(HandleFlags::empty());
    let mut bytes = [0u8; 256];
    let mut buffer = Buffer::new(&mut bytes).unwrap();
    assert!(matches!(
        without_remote.unwind_remote(&mut buffer, ProcessId(1)),
        Err(StackwireError::UnsupportedOperation(_))
    ));
    // Rejected before binding, so another handle can still use the buffer
    assert_eq!(buffer.owner(), None);

    let with_remote = TestBackend::new(|_| Ok(()))
        .with_remote(|writer, pid| {
            writer.set_tid(pid.0.unsigned_abs());
            writer.write_frame(&Frame::new(0x77))?;
            Ok(())
        })
        .into_handle(HandleFlags::empty());
    with_remote.unwind_remote(&mut buffer, ProcessId(999)).unwrap();
    let reader = buffer.reader().unwrap();
    assert_eq!(reader.tid(), 999);
    assert_eq!(reader.map(|f| f.addr).collect::<Vec<_>>(), vec![0x77]);
}

/// External engine plugged in through the trait
struct FixedStack;

impl Unwinder for FixedStack
{
    fn kind(&self) -> BackendKind
    {
        BackendKind::Native
    }

    fn unwind(&self, handle: &Handle, buffer: &mut Buffer<'_>) -> stackwire_core::Result<usize>
    {
        let mut writer = stackwire_core::backend::begin(handle, buffer)?;
        for addr in [0x10, 0x20, 0x30] {
            if writer.write_frame(&Frame::new(addr)).is_err() {
                break;
            }
        }
        Ok(writer.size())
    }
}

#[test]
fn test_external_unwinder()
{
    let handle = Handle::from_unwinder(Box::new(FixedStack), HandleFlags::empty());
    let mut bytes = [0u8; 256];
    let mut buffer = Buffer::new(&mut bytes).unwrap();
    handle.unwind(&mut buffer).unwrap();
    let addrs: Vec<u64> = buffer.reader().unwrap().map(|f| f.addr).collect();
    assert_eq!(addrs, vec![0x10, 0x20, 0x30]);
    assert!(matches!(
        handle.unwind_remote(&mut buffer, ProcessId(1)),
        Err(StackwireError::UnsupportedOperation(_))
    ));
}

#[inline(never)]
fn capture_native(handle: &Handle, bytes: &mut [u8]) -> usize
{
    let mut buffer = Buffer::new(bytes).unwrap();
    handle.unwind(&mut buffer).unwrap()
}

#[test]
fn test_native_local_capture()
{
    let config = NativeConfig {
        max_frames: 8,
        ..NativeConfig::default()
    };
    let handle = Handle::native(config, HandleFlags::empty());
    let mut bytes = vec![0u8; 16 * 1024];
    let size = capture_native(&handle, &mut bytes);
    assert!(size > 24);

    let reader = stackwire_core::Reader::from_region(&bytes).unwrap();
    assert_eq!(reader.backend(), Some(BackendKind::Native));
    let frames: Vec<_> = reader.collect();
    assert!(!frames.is_empty() && frames.len() <= 8);
    // pc and sp on every frame
    assert!(frames.iter().all(|f| f.register_count() == 2));
}

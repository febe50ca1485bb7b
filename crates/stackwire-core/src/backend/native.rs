//! Address-only backend: `backtrace` for the local stack, ptrace and frame
//! pointers for remote ones.

use std::time::Duration;

use super::{begin, record_pc_sp, Unwinder, LOCAL_SCRATCH};
use crate::error::Result;
use crate::handle::Handle;
use crate::stream::{Buffer, Frame, Writer};
use crate::types::{BackendKind, ProcessId};

/// Settings shared by the native and symbolized backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeConfig
{
    /// Stop after this many frames
    pub max_frames: usize,
    /// How long the attach coordinator waits for a remote target to stop
    pub attach_timeout: Duration,
}

impl NativeConfig
{
    pub const DEFAULT_MAX_FRAMES: usize = 256;
    pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_millis(1000);
}

impl Default for NativeConfig
{
    fn default() -> Self
    {
        Self {
            max_frames: Self::DEFAULT_MAX_FRAMES,
            attach_timeout: Self::DEFAULT_ATTACH_TIMEOUT,
        }
    }
}

/// Signal-safe backend recording addresses, symbol offsets and pc/sp
///
/// The local walk uses `backtrace::trace_unsynchronized` and builds every
/// frame on the stack, so it can run inside a signal handler. Frames carry
/// no strings; symbolize them later, out of the signal path.
#[derive(Debug, Clone, Default)]
pub struct NativeBackend
{
    config: NativeConfig,
}

impl NativeBackend
{
    #[must_use]
    pub fn new(config: NativeConfig) -> Self
    {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &NativeConfig
    {
        &self.config
    }
}

/// Walk the calling thread and write address-only frames.
pub(crate) fn unwind_addresses(writer: &mut Writer<'_>, max_frames: usize)
{
    if max_frames == 0 {
        return;
    }
    let mut written = 0usize;
    // SAFETY: the walk does not touch the backtrace crate's global lock, which
    // is what makes it usable from a signal handler. Nothing else in this
    // closure calls into the unwinder.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            let pc = frame.ip() as u64;
            let symbol_start = frame.symbol_address() as u64;
            let offset = if symbol_start != 0 && symbol_start <= pc { pc - symbol_start } else { 0 };

            let mut scratch = [0u8; LOCAL_SCRATCH];
            let mut out = Frame::new(pc).with_offset(offset).with_register_scratch(&mut scratch);
            record_pc_sp(&mut out, pc, frame.sp() as u64);

            if writer.write_frame(&out).is_err() {
                return false;
            }
            written += 1;
            written < max_frames
        });
    }
}

impl Unwinder for NativeBackend
{
    fn kind(&self) -> BackendKind
    {
        BackendKind::Native
    }

    fn unwind(&self, handle: &Handle, buffer: &mut Buffer<'_>) -> Result<usize>
    {
        let mut writer = begin(handle, buffer)?;
        unwind_addresses(&mut writer, self.config.max_frames);
        Ok(writer.size())
    }

    #[cfg(target_os = "linux")]
    fn unwind_remote(&self, handle: &Handle, buffer: &mut Buffer<'_>, pid: ProcessId) -> Result<usize>
    {
        use crate::remote::{PtraceTracer, RemoteAttach};

        let mut writer = begin(handle, buffer)?;
        // Header tid names the captured task, not the capturing one
        writer.set_tid(pid.0.unsigned_abs());

        let attach = RemoteAttach::new(PtraceTracer, self.config.attach_timeout);
        attach.with_stopped(pid, |_, _| crate::remote::capture_stopped(pid, &mut writer, self.config.max_frames))?;
        Ok(writer.size())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::handle::HandleFlags;

    #[test]
    fn test_local_unwind_writes_frames()
    {
        let handle = Handle::native(NativeConfig::default(), HandleFlags::empty());
        let mut bytes = vec![0u8; 64 * 1024];
        let mut buffer = Buffer::new(&mut bytes).unwrap();
        let size = handle.unwind(&mut buffer).unwrap();

        let reader = buffer.reader().unwrap();
        assert_eq!(reader.size(), size);
        assert_eq!(reader.backend(), Some(BackendKind::Native));
        let frames: Vec<_> = reader.collect();
        assert!(!frames.is_empty());
        assert!(frames.iter().any(|f| f.addr != 0));
        assert!(frames.iter().all(|f| f.symbol_bytes().is_empty()));
    }

    #[test]
    fn test_max_frames()
    {
        let config = NativeConfig {
            max_frames: 2,
            ..NativeConfig::default()
        };
        let handle = Handle::native(config, HandleFlags::empty());
        let mut bytes = vec![0u8; 64 * 1024];
        let mut buffer = Buffer::new(&mut bytes).unwrap();
        handle.unwind(&mut buffer).unwrap();
        assert!(buffer.reader().unwrap().count() <= 2);
    }

    #[test]
    fn test_small_buffer_truncates_at_frame_boundary()
    {
        let handle = Handle::native(NativeConfig::default(), HandleFlags::empty());
        // Room for the header and one address-only frame with pc/sp, never two
        let one_frame = 24 + 1 + 1 + 2 + LOCAL_SCRATCH;
        let mut bytes = vec![0u8; 64 + one_frame + 10];
        let mut buffer = Buffer::new(&mut bytes).unwrap();
        let size = handle.unwind(&mut buffer).unwrap();
        assert!(size <= buffer.capacity());
        assert_eq!(buffer.reader().unwrap().count(), (size - 24) / one_frame);
    }
}

//! Remote attach coordinator against a scripted tracer, plus one real
//! capture of a child process where ptrace is permitted.

#![cfg(target_os = "linux")]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use stackwire_core::remote::{RemoteAttach, StopKind, Tracer};
use stackwire_core::{ProcessId, StackwireError};

/// Tracer that replays wait results and counts detaches
#[derive(Default)]
struct Script
{
    waits: RefCell<VecDeque<WaitStatus>>,
    detaches: Cell<usize>,
}

impl Script
{
    fn new(waits: impl IntoIterator<Item = WaitStatus>) -> Self
    {
        Self {
            waits: RefCell::new(waits.into_iter().collect()),
            detaches: Cell::new(0),
        }
    }
}

impl Tracer for Script
{
    fn attach(&self, _pid: Pid) -> nix::Result<()>
    {
        Ok(())
    }

    fn detach(&self, _pid: Pid, _signal: Option<Signal>) -> nix::Result<()>
    {
        self.detaches.set(self.detaches.get() + 1);
        Ok(())
    }

    fn wait(&self, _pid: Pid) -> nix::Result<WaitStatus>
    {
        Ok(self.waits.borrow_mut().pop_front().unwrap_or(WaitStatus::StillAlive))
    }

    fn signal_info(&self, _pid: Pid) -> nix::Result<()>
    {
        Err(Errno::EINVAL)
    }

    fn registers_readable(&self, _pid: Pid) -> bool
    {
        false
    }
}

const TARGET: ProcessId = ProcessId(31337);

fn no_event_then_stopped() -> Script
{
    let pid = Pid::from_raw(TARGET.0);
    Script::new([WaitStatus::StillAlive, WaitStatus::Stopped(pid, Signal::SIGSEGV)])
}

#[test]
fn test_no_event_then_stopped_succeeds()
{
    let attach = RemoteAttach::new(no_event_then_stopped(), Duration::from_secs(1));
    let started = Instant::now();
    let kind = attach.with_stopped(TARGET, |_, kind| Ok(kind)).unwrap();
    assert_eq!(kind, StopKind::SignalDelivery);
    assert_eq!(attach.tracer().detaches.get(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_detach_once_when_capture_fails()
{
    let attach = RemoteAttach::new(no_event_then_stopped(), Duration::from_secs(1));
    let result: stackwire_core::Result<()> =
        attach.with_stopped(TARGET, |_, _| Err(StackwireError::UnsupportedOperation("test")));
    assert!(result.is_err());
    assert_eq!(attach.tracer().detaches.get(), 1);
}

#[test]
fn test_detach_once_when_inspection_panics()
{
    let attach = RemoteAttach::new(no_event_then_stopped(), Duration::from_secs(1));
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _: stackwire_core::Result<()> = attach.with_stopped(TARGET, |_, _| panic!("inspection failed"));
    }));
    assert!(outcome.is_err());
    assert_eq!(attach.tracer().detaches.get(), 1);
}

#[test]
fn test_silent_target_times_out()
{
    let attach = RemoteAttach::new(Script::default(), Duration::from_millis(5))
        .with_poll_interval(Duration::from_micros(100));
    let result = attach.with_stopped(TARGET, |_, _| Ok(()));
    assert!(matches!(result, Err(StackwireError::WaitTimedOut { pid: 31337 })));
    assert_eq!(attach.tracer().detaches.get(), 1);
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_capture_child_process()
{
    use stackwire_core::stream::Buffer;
    use stackwire_core::types::BackendKind;
    use stackwire_core::Handle;

    let Ok(mut child) = std::process::Command::new("sleep").arg("30").spawn() else {
        eprintln!("skipping: cannot spawn sleep");
        return;
    };
    let pid = ProcessId(i32::try_from(child.id()).unwrap());
    // Let it reach its sleep
    std::thread::sleep(Duration::from_millis(50));

    let handle = Handle::create(BackendKind::Native).unwrap();
    let mut bytes = vec![0u8; 64 * 1024];
    let mut buffer = Buffer::new(&mut bytes).unwrap();
    let result = handle.unwind_remote(&mut buffer, pid);

    let _ = child.kill();
    let _ = child.wait();

    match result {
        Err(StackwireError::AttachFailed { errno, .. }) => {
            eprintln!("skipping: ptrace not permitted (errno {errno})");
        }
        Err(other) => panic!("remote capture failed: {other}"),
        Ok(size) => {
            let reader = buffer.reader().unwrap();
            assert_eq!(reader.size(), size);
            assert_eq!(reader.tid(), pid.0.unsigned_abs());
            let frames: Vec<_> = reader.collect();
            assert!(!frames.is_empty());
            assert_ne!(frames[0].addr, 0);
            // Full register set on the innermost frame
            assert_eq!(frames[0].register_count(), 17);
        }
    }
}

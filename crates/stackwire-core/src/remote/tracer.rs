//! The kernel calls the attach coordinator depends on.
//!
//! [`RemoteAttach`](super::RemoteAttach) only talks to a [`Tracer`], which
//! keeps the stop-state machine testable with a scripted tracer and keeps
//! the Linux-only details (`__WALL`, the `EINVAL` group-stop answer from
//! `PTRACE_GETSIGINFO`) in one place.

use std::time::Duration;

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// ptrace and wait primitives
pub trait Tracer
{
    /// `PTRACE_ATTACH`
    fn attach(&self, pid: Pid) -> nix::Result<()>;

    /// `PTRACE_DETACH`, delivering `signal` on the way out
    fn detach(&self, pid: Pid, signal: Option<Signal>) -> nix::Result<()>;

    /// Non-blocking wait for a stop or exit
    ///
    /// Returns [`WaitStatus::StillAlive`] when nothing changed.
    fn wait(&self, pid: Pid) -> nix::Result<WaitStatus>;

    /// `PTRACE_GETSIGINFO`; only success or the errno matters
    fn signal_info(&self, pid: Pid) -> nix::Result<()>;

    /// Whether the target's registers can be read right now, i.e. it is
    /// stopped under us
    fn registers_readable(&self, pid: Pid) -> bool;

    /// Sleep between polls
    fn pause(&self, interval: Duration)
    {
        std::thread::sleep(interval);
    }
}

/// [`Tracer`] backed by the real `ptrace(2)` and `waitpid(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct PtraceTracer;

impl Tracer for PtraceTracer
{
    fn attach(&self, pid: Pid) -> nix::Result<()>
    {
        ptrace::attach(pid)
    }

    fn detach(&self, pid: Pid, signal: Option<Signal>) -> nix::Result<()>
    {
        ptrace::detach(pid, signal)
    }

    fn wait(&self, pid: Pid) -> nix::Result<WaitStatus>
    {
        // __WALL so threads (clone children) can be waited on too
        waitpid(pid, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::__WALL))
    }

    fn signal_info(&self, pid: Pid) -> nix::Result<()>
    {
        ptrace::getsiginfo(pid).map(|_| ())
    }

    #[cfg(target_arch = "x86_64")]
    fn registers_readable(&self, pid: Pid) -> bool
    {
        ptrace::getregs(pid).is_ok()
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn registers_readable(&self, pid: Pid) -> bool
    {
        // Any ptrace request on a running tracee fails with ESRCH; a bad
        // address on a stopped one fails with something else.
        !matches!(ptrace::read(pid, std::ptr::null_mut()), Err(nix::errno::Errno::ESRCH))
    }
}

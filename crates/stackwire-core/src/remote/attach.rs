//! # Remote Attach
//!
//! Attach to a target, wait until it is observably stopped, run the
//! caller's inspection, detach. The detach happens exactly once on every
//! path out of [`RemoteAttach::with_stopped`], including early errors
//! and panics in the inspection closure.
//!
//! ## Stop classification
//!
//! ```text
//! waitpid (WNOHANG) ──► nothing yet ──► sleep, retry until the budget runs out
//!        │                                     └─► registers readable? ProbedRegisters : WaitTimedOut
//!        ├─► exited / killed ───────────────► TargetExited
//!        └─► stopped(sig)
//!               ├─ sig ∉ {STOP, TSTP, TTIN, TTOU} ► SignalDelivery
//!               └─ PTRACE_GETSIGINFO
//!                     ├─ ok ─────► SignalDelivery
//!                     ├─ EINVAL ─► GroupStop (SIGSTOP re-injected on detach)
//!                     ├─ ESRCH ──► TargetVanished
//!                     └─ other ──► SignalDelivery
//! ```

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

use super::tracer::Tracer;
use crate::error::{Result, StackwireError};
use crate::types::ProcessId;

/// How the target was found to be stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind
{
    /// Stopped for a signal delivered to it (our attach `SIGSTOP` included)
    SignalDelivery,
    /// Stopped as part of a job-control group stop started by someone else
    GroupStop,
    /// No stop was observed, but its registers were readable at the deadline
    ProbedRegisters,
}

impl StopKind
{
    /// Signal to hand back to the target when detaching
    #[must_use]
    pub fn reinject(self) -> Option<Signal>
    {
        match self {
            StopKind::GroupStop => Some(Signal::SIGSTOP),
            StopKind::SignalDelivery | StopKind::ProbedRegisters => None,
        }
    }
}

/// Attach coordinator
#[derive(Debug, Clone)]
pub struct RemoteAttach<T>
{
    tracer: T,
    timeout: Duration,
    poll_interval: Duration,
}

impl<T: Tracer> RemoteAttach<T>
{
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(500);

    pub fn new(tracer: T, timeout: Duration) -> Self
    {
        Self {
            tracer,
            timeout,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self
    {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn tracer(&self) -> &T
    {
        &self.tracer
    }

    #[must_use]
    pub fn timeout(&self) -> Duration
    {
        self.timeout
    }

    /// Attach to `pid`, wait for it to stop, run `inspect`, then detach.
    ///
    /// ## Errors
    ///
    /// - [`StackwireError::AttachFailed`] when `PTRACE_ATTACH` is refused
    ///   (nothing to detach in that case)
    /// - any error from [`wait_for_stop`](Self::wait_for_stop)
    /// - whatever `inspect` returns
    pub fn with_stopped<R, F>(&self, pid: ProcessId, inspect: F) -> Result<R>
    where
        F: FnOnce(&T, StopKind) -> Result<R>,
    {
        let target = Pid::from(pid);
        if let Err(errno) = self.tracer.attach(target) {
            debug!(pid = %pid, %errno, "Attach refused");
            return Err(StackwireError::AttachFailed {
                pid: pid.0,
                errno: errno as i32,
            });
        }
        debug!(pid = %pid, "Attached");

        let mut guard = DetachGuard {
            tracer: &self.tracer,
            pid: target,
            signal: None,
        };
        let kind = self.wait_for_stop(target)?;
        guard.signal = kind.reinject();
        inspect(&self.tracer, kind)
    }

    /// Poll until `pid` (already attached) is stopped.
    ///
    /// The budget counts poll intervals, not wall-clock time, so time spent
    /// descheduled does not eat into it.
    ///
    /// ## Errors
    ///
    /// - [`StackwireError::TargetExited`] if it exited or was killed
    /// - [`StackwireError::TargetVanished`] if it disappeared mid-classification
    /// - [`StackwireError::WaitTimedOut`] when the budget ran out and its
    ///   registers could not be read
    /// - [`StackwireError::UnexpectedWaitStatus`] for a report that is neither
    ///   a stop nor an exit
    /// - [`StackwireError::Ptrace`] for any other `waitpid` failure
    pub fn wait_for_stop(&self, pid: Pid) -> Result<StopKind>
    {
        let raw = pid.as_raw();
        let mut waited = Duration::ZERO;

        loop {
            let status = match self.tracer.wait(pid) {
                Ok(WaitStatus::StillAlive) => None,
                Ok(status) => Some(status),
                // Counted against the poll budget like an empty poll
                Err(Errno::EINTR | Errno::ECHILD) => {
                    trace!(pid = raw, "waitpid interrupted, retrying");
                    None
                }
                Err(errno) => return Err(errno.into()),
            };

            let Some(status) = status else {
                self.tracer.pause(self.poll_interval);
                waited += self.poll_interval;
                if waited < self.timeout {
                    continue;
                }
                return self.probe_after_timeout(pid);
            };

            match status {
                WaitStatus::StillAlive => continue,
                WaitStatus::Exited(_, code) => {
                    debug!(pid = raw, code, "Target exited");
                    return Err(StackwireError::TargetExited { pid: raw });
                }
                WaitStatus::Signaled(_, signal, _) => {
                    debug!(pid = raw, %signal, "Target was killed");
                    return Err(StackwireError::TargetExited { pid: raw });
                }
                WaitStatus::Stopped(_, signal) => return self.classify(pid, signal),
                WaitStatus::Continued(_) => {
                    warn!(pid = raw, "Target reported continued while attaching");
                    return Err(StackwireError::UnexpectedWaitStatus { pid: raw });
                }
                WaitStatus::PtraceEvent(..) | WaitStatus::PtraceSyscall(_) => {
                    return Ok(StopKind::SignalDelivery);
                }
            }
        }
    }

    /// Either it was already stopped when we attached and no transition was
    /// reported, or it is genuinely slow.
    fn probe_after_timeout(&self, pid: Pid) -> Result<StopKind>
    {
        let raw = pid.as_raw();
        if self.tracer.registers_readable(pid) {
            debug!(pid = raw, "No stop observed, registers readable");
            return Ok(StopKind::ProbedRegisters);
        }
        warn!(pid = raw, timeout = ?self.timeout, "Timed out waiting for stop");
        Err(StackwireError::WaitTimedOut { pid: raw })
    }

    fn classify(&self, pid: Pid, signal: Signal) -> Result<StopKind>
    {
        let raw = pid.as_raw();
        debug!(pid = raw, %signal, "Target stopped");

        if !matches!(signal, Signal::SIGSTOP | Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU) {
            return Ok(StopKind::SignalDelivery);
        }

        match self.tracer.signal_info(pid) {
            Ok(()) => Ok(StopKind::SignalDelivery),
            Err(Errno::EINVAL) => {
                debug!(pid = raw, "Target is in group-stop, SIGSTOP will be re-injected");
                Ok(StopKind::GroupStop)
            }
            Err(Errno::ESRCH) => {
                debug!(pid = raw, "Target vanished while stopping");
                Err(StackwireError::TargetVanished { pid: raw })
            }
            Err(errno) => {
                debug!(pid = raw, %errno, "No signal info, treating as stopped");
                Ok(StopKind::SignalDelivery)
            }
        }
    }
}

/// Detaches when dropped
struct DetachGuard<'t, T: Tracer>
{
    tracer: &'t T,
    pid: Pid,
    signal: Option<Signal>,
}

impl<T: Tracer> Drop for DetachGuard<'_, T>
{
    fn drop(&mut self)
    {
        match self.tracer.detach(self.pid, self.signal) {
            Ok(()) => debug!(pid = self.pid.as_raw(), signal = ?self.signal, "Detached"),
            Err(errno) => warn!(pid = self.pid.as_raw(), %errno, "Detach failed"),
        }
    }
}

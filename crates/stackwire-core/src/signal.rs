//! # Signal Registry
//!
//! Process-wide table of per-signal callbacks, installed through one
//! `SA_SIGINFO` trampoline that runs the callback and then chains to the
//! handler that was in place before the first registration.
//!
//! ## Chaining
//!
//! | previous handler | after the callback |
//! |---|---|
//! | `SA_SIGINFO` function | called with the original `siginfo`/context |
//! | plain function | called with the signal number |
//! | `SIG_IGN` | nothing |
//! | `SIG_DFL`, default terminates | default action restored and the signal re-raised |
//! | `SIG_DFL`, default stops | `SIGSTOP` raised, trampoline stays installed |
//! | `SIG_DFL`, default ignores | nothing |
//!
//! Re-arming a signal replaces the callback but keeps the handler saved
//! the first time, so the chain never points back at the trampoline. The
//! previous handler is saved before the trampoline is installed, and the
//! callback is stored only once `sigaction` succeeded.
//!
//! ## Crash capture
//!
//! [`sigaction_set`] installs a capture callback for the fatal signals. It
//! unwinds with a process-wide handle into a process-wide buffer. A nested
//! fatal signal raised while that capture runs skips the capture and only
//! chains.
//!
//! Nothing reachable from the trampoline allocates, locks or logs.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

use libc::{c_int, siginfo_t};
use nix::errno::Errno;
use nix::sys::signal::{raise, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::debug;

use crate::error::{Result, StackwireError};
use crate::handle::Handle;
use crate::stream::Buffer;

/// Size of the registry table; valid signal numbers are `1..MAX_SIGNALS`
pub const MAX_SIGNALS: usize = 32;

/// Signals covered by [`sigaction_set`]
pub const FATAL_SIGNALS: [Signal; 6] = [
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGSEGV,
    Signal::SIGILL,
    Signal::SIGSYS,
    Signal::SIGTRAP,
];

/// Callback run from the trampoline with the signal number
pub type SignalCallback = fn(i32);

struct Slot
{
    /// `SignalCallback` as an address, 0 when unset
    callback: AtomicUsize,
    has_previous: AtomicBool,
    /// Raw so it can be read before the trampoline replaces it
    previous: UnsafeCell<Option<libc::sigaction>>,
}

// SAFETY: `previous` is only written under INSTALL_LOCK while
// `has_previous` is false and the trampoline is not installed for the
// signal; readers check `has_previous` with Acquire first.
unsafe impl Sync for Slot {}

impl Slot
{
    const EMPTY: Slot = Slot {
        callback: AtomicUsize::new(0),
        has_previous: AtomicBool::new(false),
        previous: UnsafeCell::new(None),
    };
}

static SLOTS: [Slot; MAX_SIGNALS] = [Slot::EMPTY; MAX_SIGNALS];
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Where the crash capture writes
struct CaptureTarget
{
    handle: Handle,
    buffer: UnsafeCell<Buffer<'static>>,
}

static CAPTURE_TARGET: AtomicPtr<CaptureTarget> = AtomicPtr::new(ptr::null_mut());
static CAPTURE_IN_USE: AtomicBool = AtomicBool::new(false);

fn validate(signum: i32) -> Result<Signal>
{
    let in_table = usize::try_from(signum).is_ok_and(|index| index > 0 && index < MAX_SIGNALS);
    if !in_table {
        return Err(StackwireError::SignalOutOfRange(signum));
    }
    Signal::try_from(signum).map_err(|_| StackwireError::SignalOutOfRange(signum))
}

/// Register `callback` for `signum`, installing the chaining trampoline.
///
/// Calling it again for the same signal replaces the callback; the
/// previous handler recorded the first time is kept.
///
/// ## Errors
///
/// - [`StackwireError::SignalOutOfRange`] outside `1..MAX_SIGNALS`
/// - [`StackwireError::SignalInstall`] when `sigaction` fails (e.g. `SIGKILL`)
pub fn set_signal_handler(signum: i32, callback: SignalCallback) -> Result<()>
{
    let signal = validate(signum)?;
    let _guard = INSTALL_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    install_locked(signal, callback)
}

/// Caller holds `INSTALL_LOCK`.
fn install_locked(signal: Signal, callback: SignalCallback) -> Result<()>
{
    let slot = &SLOTS[signal as usize];
    let install_error = |errno: Errno| StackwireError::SignalInstall {
        signal: signal as i32,
        errno: errno as i32,
    };

    let first = !slot.has_previous.load(Ordering::Acquire);
    if first {
        let mut current = MaybeUninit::<libc::sigaction>::zeroed();
        // SAFETY: a null new action only queries the current one.
        if unsafe { libc::sigaction(signal as c_int, ptr::null(), current.as_mut_ptr()) } != 0 {
            return Err(install_error(Errno::last()));
        }
        // SAFETY: writers are serialized by INSTALL_LOCK and the trampoline
        // is not installed for this signal yet. `sigaction` filled `current`.
        unsafe { *slot.previous.get() = Some(current.assume_init()) };
        slot.has_previous.store(true, Ordering::Release);
    }

    let action = SigAction::new(SigHandler::SigAction(trampoline), SaFlags::SA_SIGINFO, SigSet::empty());
    // SAFETY: the trampoline only touches atomics and the saved actions.
    if let Err(errno) = unsafe { sigaction(signal, &action) } {
        if first {
            // Never installed, so nothing can be reading the slot
            slot.has_previous.store(false, Ordering::Release);
        }
        return Err(install_error(errno));
    }
    slot.callback.store(callback as usize, Ordering::SeqCst);

    debug!(signal = %signal, "Installed signal trampoline");
    Ok(())
}

/// Install the crash capture for [`FATAL_SIGNALS`].
///
/// On any of them, `handle` unwinds the faulting thread into `buffer`,
/// then the previous handler runs. The buffer usually lives in shared
/// memory (see [`SharedRegion::into_static_buffer`](crate::shm::SharedRegion::into_static_buffer))
/// so another process can read the capture after the crash.
///
/// A second call replaces the handle and buffer.
///
/// ## Errors
///
/// See [`set_signal_handler`]. Signals installed before a failure stay
/// installed.
pub fn sigaction_set(handle: Handle, buffer: Buffer<'static>) -> Result<()>
{
    let _guard = INSTALL_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

    let target = Box::into_raw(Box::new(CaptureTarget {
        handle,
        buffer: UnsafeCell::new(buffer),
    }));
    let replaced = CAPTURE_TARGET.swap(target, Ordering::SeqCst);
    if !replaced.is_null() {
        // A capture that started before the swap may still use the old target
        while CAPTURE_IN_USE.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        // SAFETY: came from Box::into_raw above and is no longer reachable.
        drop(unsafe { Box::from_raw(replaced) });
    }

    for signal in FATAL_SIGNALS {
        install_locked(signal, capture_on_signal)?;
    }
    Ok(())
}

/// Whether a crash capture currently owns the capture buffer
#[must_use]
pub fn capture_in_progress() -> bool
{
    CAPTURE_IN_USE.load(Ordering::SeqCst)
}

fn capture_on_signal(_signum: i32)
{
    if CAPTURE_IN_USE.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
        return;
    }
    // SAFETY: the target is only freed by `sigaction_set` after it observes
    // CAPTURE_IN_USE cleared, and CAPTURE_IN_USE gives us the only `&mut`
    // to the buffer.
    if let Some(target) = unsafe { CAPTURE_TARGET.load(Ordering::SeqCst).as_ref() } {
        let buffer = unsafe { &mut *target.buffer.get() };
        let _ = target.handle.unwind(buffer);
    }
    CAPTURE_IN_USE.store(false, Ordering::SeqCst);
}

extern "C" fn trampoline(signum: c_int, info: *mut siginfo_t, context: *mut c_void)
{
    let Some(slot) = usize::try_from(signum).ok().and_then(|index| SLOTS.get(index)) else {
        return;
    };

    let callback = slot.callback.load(Ordering::SeqCst);
    if callback != 0 {
        // SAFETY: only ever stored from a `SignalCallback`.
        let callback: SignalCallback = unsafe { std::mem::transmute::<usize, SignalCallback>(callback) };
        callback(signum);
    }

    if slot.has_previous.load(Ordering::Acquire) {
        // SAFETY: published with Release and never written again.
        if let Some(previous) = unsafe { &*slot.previous.get() } {
            chain(signum, previous, info, context);
        }
    }
}

type InfoHandler = extern "C" fn(c_int, *mut siginfo_t, *mut c_void);
type PlainHandler = extern "C" fn(c_int);

fn chain(signum: c_int, previous: &libc::sigaction, info: *mut siginfo_t, context: *mut c_void)
{
    match previous.sa_sigaction {
        libc::SIG_DFL => default_action(signum, previous),
        libc::SIG_IGN => {}
        address if previous.sa_flags & libc::SA_SIGINFO != 0 => {
            // SAFETY: the kernel handed this address out as an SA_SIGINFO handler.
            let handler = unsafe { std::mem::transmute::<libc::sighandler_t, InfoHandler>(address) };
            handler(signum, info, context);
        }
        address => {
            // SAFETY: without SA_SIGINFO the address is a plain handler.
            let handler = unsafe { std::mem::transmute::<libc::sighandler_t, PlainHandler>(address) };
            handler(signum);
        }
    }
}

/// Emulate the default disposition without giving up the trampoline,
/// except for signals whose default ends the process.
fn default_action(signum: c_int, previous: &libc::sigaction)
{
    let Ok(signal) = Signal::try_from(signum) else {
        return;
    };
    match signal {
        Signal::SIGCHLD | Signal::SIGCONT | Signal::SIGURG | Signal::SIGWINCH => {}
        Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU => {
            let _ = raise(Signal::SIGSTOP);
        }
        _ => {
            // The signal is blocked while we run, so the re-raise is
            // delivered to the default action once the trampoline returns.
            // SAFETY: restoring the saved default action.
            unsafe { libc::sigaction(signum, previous, ptr::null_mut()) };
            let _ = raise(signal);
        }
    }
}

//! # stackwire-core
//!
//! Backtrace capture into caller-owned memory, and the compact binary
//! stream the captures are written in.
//!
//! This crate provides:
//! - The stream format: [`Writer`], [`Reader`], [`Frame`] over a [`Buffer`]
//! - Backends that walk a stack and feed a writer ([`backend`])
//! - [`Handle`], the capability object callers unwind through
//! - A signal registry that chains to previously installed handlers ([`signal`])
//! - Remote capture: attach, wait for a stop, walk, detach ([`remote`])
//! - Shared memory for captures that outlive the crashing process ([`shm`])
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use stackwire_core::stream::Buffer;
//! use stackwire_core::types::BackendKind;
//! use stackwire_core::Handle;
//!
//! let handle = Handle::create(BackendKind::Native)?;
//! let mut bytes = vec![0u8; 64 * 1024];
//! let mut buffer = Buffer::new(&mut bytes)?;
//! handle.unwind(&mut buffer)?;
//! stackwire_core::report::write_report(buffer.reader()?, &mut std::io::stdout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: everything; remote register capture on x86-64
//! - **Other Unix**: local capture, stream format, signal registry, shared memory
//! - **Elsewhere**: local capture and the stream format
//!
//! ## Why unsafe code is needed
//!
//! Buffers are shared with signal handlers and other processes through raw
//! memory, the signal registry stores handlers in process-wide tables read
//! from signal context, and remote capture goes through `ptrace`. Each
//! unsafe block states the invariant it relies on.

#![allow(unsafe_code)] // Signal handlers, shared mappings and ptrace

pub mod backend;
pub mod demangle;
pub mod error;
pub mod handle;
pub mod remote;
pub mod report;
#[cfg(unix)]
pub mod shm;
#[cfg(unix)]
pub mod signal;
pub mod stream;
pub mod types;

// Re-export commonly used types
pub use error::{Result, StackwireError};
pub use handle::{Handle, HandleFlags, HandleId};
pub use stream::{Buffer, Frame, Reader, Writer};
pub use types::{Architecture, BackendKind, ProcessId, Register};

/// Kernel id of the calling thread, recorded in every capture header
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn current_tid() -> u32
{
    nix::unistd::gettid().as_raw().unsigned_abs()
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn current_tid() -> u32
{
    std::process::id()
}

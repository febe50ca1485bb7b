//! # Shared Capture Memory
//!
//! A crash capture is only useful if someone outside the crashing process
//! can read it. [`SharedRegion`] is a `MAP_SHARED` mapping of an anonymous
//! file: hand the file descriptor to a watchdog (fork, `SCM_RIGHTS`), let
//! the crashing side write into it through a [`Buffer`], and read it from
//! the other side with [`Reader::from_region`].
//!
//! ## Backing file
//!
//! `memfd_create` where the kernel has it. Otherwise, an unlinked temporary
//! file in the cache directory ([`set_cache_dir`]) or the system temporary
//! directory.

use std::fs::File;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Mutex;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tracing::{debug, warn};

use crate::error::{Result, StackwireError};
use crate::stream::{Buffer, Reader};

static CACHE_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Directory for the temporary-file fallback
pub fn set_cache_dir(path: impl Into<PathBuf>)
{
    let path = path.into();
    debug!(path = %path.display(), "Cache directory set");
    *CACHE_DIR.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(path);
}

/// Directory set by [`set_cache_dir`], if any
#[must_use]
pub fn cache_dir() -> Option<PathBuf>
{
    CACHE_DIR.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn memfd(name: &std::ffi::CStr) -> Option<File>
{
    use nix::sys::memfd::{memfd_create, MemFdCreateFlag};

    match memfd_create(name, MemFdCreateFlag::MFD_CLOEXEC) {
        Ok(fd) => Some(File::from(fd)),
        Err(errno) => {
            debug!(%errno, "memfd_create failed, using a temporary file");
            None
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn memfd(_name: &std::ffi::CStr) -> Option<File>
{
    None
}

fn temporary_file(dir: Option<&Path>) -> Result<File>
{
    let file = match dir {
        Some(dir) => tempfile::tempfile_in(dir),
        None => tempfile::tempfile(),
    };
    file.map_err(|err| {
        warn!(%err, "Could not create a backing file for shared memory");
        StackwireError::Io(err)
    })
}

/// Open an anonymous, close-on-exec file suitable for shared capture memory.
///
/// ## Errors
///
/// [`StackwireError::Io`] when neither `memfd_create` nor the temporary
/// file fallback works.
pub fn anonymous_file() -> Result<File>
{
    if let Some(file) = memfd(c"stackwire") {
        return Ok(file);
    }
    temporary_file(cache_dir().as_deref())
}

/// Read/write `MAP_SHARED` mapping of a whole file
pub struct SharedRegion
{
    ptr: NonNull<u8>,
    len: usize,
    file: File,
}

// SAFETY: the region owns its mapping; unmapping from another thread is fine.
unsafe impl Send for SharedRegion {}

impl SharedRegion
{
    /// Create a zero-filled region of `len` bytes on a fresh anonymous file.
    ///
    /// ## Errors
    ///
    /// - [`StackwireError::BufferTooSmall`] for a zero length
    /// - [`StackwireError::Io`] for file creation, sizing or mapping failures
    pub fn create(len: usize) -> Result<Self>
    {
        let file = anonymous_file()?;
        file.set_len(len as u64)?;
        Self::map(file, len)
    }

    /// Map an existing file (for example, one received from the capturing
    /// process) over its current length.
    ///
    /// ## Errors
    ///
    /// As for [`create`](Self::create).
    pub fn open(file: File) -> Result<Self>
    {
        let len = usize::try_from(file.metadata()?.len()).map_err(|_| StackwireError::BufferTooSmall {
            needed: Buffer::MIN_LEN,
            available: 0,
        })?;
        Self::map(file, len)
    }

    fn map(file: File, len: usize) -> Result<Self>
    {
        let size = NonZeroUsize::new(len).ok_or(StackwireError::BufferTooSmall {
            needed: Buffer::MIN_LEN,
            available: 0,
        })?;
        // SAFETY: fresh mapping at a kernel-chosen address.
        let ptr = unsafe {
            mmap(
                None,
                size,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .map_err(|errno| StackwireError::Io(errno.into()))?;
        debug!(len, "Mapped shared region");
        Ok(Self {
            ptr: ptr.cast(),
            len,
            file,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// Backing file, to pass to another process
    #[must_use]
    pub fn fd(&self) -> BorrowedFd<'_>
    {
        self.file.as_fd()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8]
    {
        // SAFETY: the mapping is `len` bytes and lives as long as `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Capture buffer over the whole region
    ///
    /// ## Errors
    ///
    /// [`StackwireError::BufferTooSmall`] when the region cannot hold a buffer.
    pub fn buffer(&mut self) -> Result<Buffer<'_>>
    {
        // SAFETY: `&mut self` makes this the only view into the mapping.
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) };
        Buffer::new(bytes)
    }

    /// Reader over whatever was captured into the region
    ///
    /// ## Errors
    ///
    /// See [`Reader::from_region`].
    pub fn reader(&self) -> Result<Reader<'_>>
    {
        Reader::from_region(self.as_bytes())
    }

    /// Leak the mapping and return a buffer that lives for the rest of the
    /// process, for [`sigaction_set`](crate::signal::sigaction_set).
    ///
    /// The backing file stays open; keep a [`try_clone`](File::try_clone)
    /// of it (see [`file`](Self::file)) to read the capture back.
    ///
    /// ## Errors
    ///
    /// [`StackwireError::BufferTooSmall`] when the region cannot hold a buffer.
    pub fn into_static_buffer(self) -> Result<Buffer<'static>>
    {
        let region = std::mem::ManuallyDrop::new(self);
        // SAFETY: the mapping is never unmapped, and `region` is gone, so
        // this is the only view into it.
        unsafe { Buffer::from_raw_parts(region.ptr.as_ptr(), region.len) }
    }

    /// Backing file
    #[must_use]
    pub fn file(&self) -> &File
    {
        &self.file
    }
}

impl std::fmt::Debug for SharedRegion
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("SharedRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl Drop for SharedRegion
{
    fn drop(&mut self)
    {
        // SAFETY: mapped in `map` with this length and not unmapped since.
        if let Err(errno) = unsafe { munmap(self.ptr.cast(), self.len) } {
            warn!(%errno, "munmap failed");
        }
    }
}

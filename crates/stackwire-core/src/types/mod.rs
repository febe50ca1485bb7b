//! Platform-agnostic types shared by the codec, the backends and the remote
//! attach coordinator.

pub mod arch;
pub mod backend;
pub mod registers;

pub use arch::Architecture;
pub use backend::BackendKind;
pub use registers::{register_name, Register};

/// Process (or thread) identifier of a capture target
///
/// On Linux this is a kernel task id, so it can name either a whole process
/// or a single thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub i32);

impl From<i32> for ProcessId
{
    fn from(pid: i32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for i32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl std::fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

#[cfg(unix)]
impl From<ProcessId> for nix::unistd::Pid
{
    fn from(pid: ProcessId) -> Self
    {
        nix::unistd::Pid::from_raw(pid.0)
    }
}

#[cfg(unix)]
impl From<nix::unistd::Pid> for ProcessId
{
    fn from(pid: nix::unistd::Pid) -> Self
    {
        ProcessId(pid.as_raw())
    }
}

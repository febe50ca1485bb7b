//! # Remote Capture
//!
//! Capturing another process (or another thread of this one) takes three
//! pieces:
//!
//! - [`RemoteAttach`] stops the target through a [`Tracer`] and always
//!   detaches again;
//! - [`FramePointerWalker`] walks its stack through [`MemoryAccess`];
//! - [`ProcessMaps`] names the module behind every address.
//!
//! [`NativeBackend`](crate::backend::NativeBackend) strings them together
//! for [`Handle::unwind_remote`](crate::Handle::unwind_remote).
//!
//! ## Platform Support
//!
//! Attach and capture are Linux-only; register capture is implemented for
//! x86-64. The walker and maps parser are plain data code and build
//! everywhere.

#[cfg(target_os = "linux")]
mod attach;
mod maps;
#[cfg(target_os = "linux")]
mod tracer;
mod walker;

#[cfg(target_os = "linux")]
pub use attach::{RemoteAttach, StopKind};
pub use maps::{MapEntry, ProcessMaps};
#[cfg(target_os = "linux")]
pub use tracer::{PtraceTracer, Tracer};
pub use walker::{FramePointerWalker, MemoryAccess, StackStep, Walk};

#[cfg(target_os = "linux")]
pub use self::linux::{capture_stopped, PtraceMemory};

#[cfg(target_os = "linux")]
mod linux
{
    use nix::sys::ptrace;
    use nix::unistd::Pid;

    use super::{MemoryAccess, ProcessMaps};
    use crate::error::Result;
    use crate::stream::Writer;
    use crate::types::ProcessId;

    /// Word reads through `PTRACE_PEEKDATA`; the target must be stopped under us
    #[derive(Debug, Clone, Copy)]
    pub struct PtraceMemory
    {
        pid: Pid,
    }

    impl PtraceMemory
    {
        #[must_use]
        pub fn new(pid: ProcessId) -> Self
        {
            Self { pid: Pid::from(pid) }
        }
    }

    impl MemoryAccess for PtraceMemory
    {
        #[allow(clippy::cast_sign_loss)]
        fn read_u64(&self, address: u64) -> Result<u64>
        {
            let word = ptrace::read(self.pid, address as ptrace::AddressType)?;
            Ok(word as u64)
        }
    }

    #[cfg_attr(not(target_arch = "x86_64"), allow(dead_code))]
    fn load_maps(pid: ProcessId) -> ProcessMaps
    {
        ProcessMaps::read(pid).unwrap_or_else(|err| {
            tracing::debug!(pid = %pid, %err, "No maps for target, frames will carry no filenames");
            ProcessMaps::default()
        })
    }

    /// Write the stack of a stopped, attached `pid` into `writer`.
    ///
    /// The first frame carries the full general-purpose register set; the
    /// rest carry pc, sp and fp. Filenames and file offsets come from the
    /// target's maps. The capture ends quietly when the buffer fills up.
    ///
    /// ## Errors
    ///
    /// [`StackwireError::Ptrace`](crate::StackwireError::Ptrace) when the
    /// registers cannot be read.
    #[cfg(target_arch = "x86_64")]
    pub fn capture_stopped(pid: ProcessId, writer: &mut Writer<'_>, max_frames: usize) -> Result<()>
    {
        use super::{FramePointerWalker, StackStep};
        use crate::stream::{Frame, REGISTER_ENTRY_SIZE};
        use crate::types::Register;

        let regs = ptrace::getregs(Pid::from(pid))?;
        let general = [
            (Register::X86_64Rax, regs.rax),
            (Register::X86_64Rbx, regs.rbx),
            (Register::X86_64Rcx, regs.rcx),
            (Register::X86_64Rdx, regs.rdx),
            (Register::X86_64Rsi, regs.rsi),
            (Register::X86_64Rdi, regs.rdi),
            (Register::X86_64Rbp, regs.rbp),
            (Register::X86_64Rsp, regs.rsp),
            (Register::X86_64R8, regs.r8),
            (Register::X86_64R9, regs.r9),
            (Register::X86_64R10, regs.r10),
            (Register::X86_64R11, regs.r11),
            (Register::X86_64R12, regs.r12),
            (Register::X86_64R13, regs.r13),
            (Register::X86_64R14, regs.r14),
            (Register::X86_64R15, regs.r15),
            (Register::X86_64Rip, regs.rip),
        ];

        let maps = load_maps(pid);
        let memory = PtraceMemory::new(pid);
        let start = StackStep {
            pc: regs.rip,
            sp: regs.rsp,
            fp: regs.rbp,
        };

        let mut frames = 0usize;
        for (depth, step) in FramePointerWalker::new(&memory, max_frames).walk(start).enumerate() {
            let mut scratch = [0u8; 17 * REGISTER_ENTRY_SIZE];
            let module = maps.find(step.pc);
            let mut frame = Frame::new(step.pc)
                .with_offset(module.map_or(0, |entry| entry.file_offset(step.pc)))
                .with_register_scratch(&mut scratch);
            frame.filename = module.and_then(|entry| entry.path.as_deref()).map(str::as_bytes);

            let walked = [
                (Register::X86_64Rip, step.pc),
                (Register::X86_64Rsp, step.sp),
                (Register::X86_64Rbp, step.fp),
            ];
            let registers: &[(Register, u64)] = if depth == 0 { &general } else { &walked };
            for &(reg, value) in registers {
                frame.register_append(reg, value)?;
            }

            if writer.write_frame(&frame).is_err() {
                break;
            }
            frames += 1;
        }
        tracing::debug!(pid = %pid, frames, "Captured remote stack");
        Ok(())
    }

    /// Register capture for this architecture is not implemented.
    ///
    /// ## Errors
    ///
    /// Always [`StackwireError::UnsupportedOperation`](crate::StackwireError::UnsupportedOperation).
    #[cfg(not(target_arch = "x86_64"))]
    pub fn capture_stopped(pid: ProcessId, writer: &mut Writer<'_>, max_frames: usize) -> Result<()>
    {
        let _ = (pid, writer, max_frames);
        Err(crate::error::StackwireError::UnsupportedOperation("remote register capture on this architecture"))
    }
}

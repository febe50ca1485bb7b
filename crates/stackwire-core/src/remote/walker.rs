//! Frame-pointer stack walk over someone else's memory.
//!
//! Works for code built with frame pointers (`-C force-frame-pointers`,
//! `-fno-omit-frame-pointer`); the walk ends early anywhere they were
//! omitted. Each step reads the saved frame pointer at `[fp]` and the
//! return address at `[fp + 8]`.

use crate::error::Result;

/// Word reads from the target's address space
pub trait MemoryAccess
{
    fn read_u64(&self, address: u64) -> Result<u64>;
}

/// Register state at one level of the walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackStep
{
    pub pc: u64,
    pub sp: u64,
    pub fp: u64,
}

/// Frame-pointer unwinder
#[derive(Debug, Clone, Copy)]
pub struct FramePointerWalker<'m, M>
{
    memory: &'m M,
    max_frames: usize,
}

impl<'m, M: MemoryAccess> FramePointerWalker<'m, M>
{
    pub fn new(memory: &'m M, max_frames: usize) -> Self
    {
        Self { memory, max_frames }
    }

    /// Levels starting at `start` (which is yielded first, unless its pc is 0)
    pub fn walk(&self, start: StackStep) -> Walk<'m, M>
    {
        Walk {
            memory: self.memory,
            next: (start.pc != 0).then_some(start),
            remaining: self.max_frames,
        }
    }

    /// One step up from `current`, or `None` when the chain ends
    pub fn step(&self, current: StackStep) -> Option<StackStep>
    {
        step(self.memory, current)
    }
}

fn step<M: MemoryAccess>(memory: &M, current: StackStep) -> Option<StackStep>
{
    let fp = current.fp;
    if fp == 0 || fp % 8 != 0 || fp < current.sp {
        return None;
    }
    let saved_fp = memory.read_u64(fp).ok()?;
    let return_address = memory.read_u64(fp.checked_add(8)?).ok()?;
    if return_address == 0 {
        return None;
    }

    // Frames grow down, so the caller's frame must sit above ours. A
    // chain that loops or goes backwards still gives us this return
    // address, but nothing after it.
    let next_fp = if saved_fp != 0 && saved_fp <= fp { 0 } else { saved_fp };
    Some(StackStep {
        pc: return_address,
        sp: fp.checked_add(16)?,
        fp: next_fp,
    })
}

/// Iterator returned by [`FramePointerWalker::walk`]
pub struct Walk<'m, M>
{
    memory: &'m M,
    next: Option<StackStep>,
    remaining: usize,
}

impl<M: MemoryAccess> Iterator for Walk<'_, M>
{
    type Item = StackStep;

    fn next(&mut self) -> Option<StackStep>
    {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next.take()?;
        self.remaining -= 1;
        self.next = step(self.memory, current);
        Some(current)
    }
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;
    use crate::error::StackwireError;

    struct Words(HashMap<u64, u64>);

    impl MemoryAccess for Words
    {
        fn read_u64(&self, address: u64) -> Result<u64>
        {
            self.0.get(&address).copied().ok_or(StackwireError::Ptrace(libc::EIO))
        }
    }

    fn chain() -> Words
    {
        // main <- middle <- leaf, each frame 0x40 above the previous one
        Words(HashMap::from([
            (0x7000, 0x7040),
            (0x7008, 0x40_1111),
            (0x7040, 0x7080),
            (0x7048, 0x40_2222),
            (0x7080, 0),
            (0x7088, 0x40_3333),
        ]))
    }

    const START: StackStep = StackStep {
        pc: 0x40_0000,
        sp: 0x6ff0,
        fp: 0x7000,
    };

    #[test]
    fn test_walks_until_null_frame_pointer()
    {
        let memory = chain();
        let pcs: Vec<u64> = FramePointerWalker::new(&memory, 64).walk(START).map(|s| s.pc).collect();
        assert_eq!(pcs, vec![0x40_0000, 0x40_1111, 0x40_2222, 0x40_3333]);
    }

    #[test]
    fn test_max_frames()
    {
        let memory = chain();
        assert_eq!(FramePointerWalker::new(&memory, 2).walk(START).count(), 2);
        assert_eq!(FramePointerWalker::new(&memory, 0).walk(START).count(), 0);
    }

    #[test]
    fn test_sp_follows_frame()
    {
        let memory = chain();
        let walker = FramePointerWalker::new(&memory, 64);
        let next = walker.step(START).unwrap();
        assert_eq!(next, StackStep { pc: 0x40_1111, sp: 0x7010, fp: 0x7040 });
    }

    #[test]
    fn test_backwards_chain_stops_after_return_address()
    {
        let memory = Words(HashMap::from([(0x7000, 0x7000), (0x7008, 0x40_1111)]));
        let pcs: Vec<u64> = FramePointerWalker::new(&memory, 64).walk(START).map(|s| s.pc).collect();
        assert_eq!(pcs, vec![0x40_0000, 0x40_1111]);
    }

    #[test]
    fn test_bad_frame_pointers()
    {
        let memory = chain();
        let walker = FramePointerWalker::new(&memory, 64);
        assert_eq!(walker.step(StackStep { fp: 0, ..START }), None);
        assert_eq!(walker.step(StackStep { fp: 0x7004, ..START }), None);
        assert_eq!(walker.step(StackStep { sp: 0x8000, ..START }), None);
        assert_eq!(walker.step(StackStep { fp: 0x9000, sp: 0, ..START }), None);
    }
}

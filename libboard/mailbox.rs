//! One-direction, single-slot word mailbox. AMP boards have two of these in
//! uncached shared memory, one per direction; delivery is exactly-once with
//! at most one message in flight.

use crate::{read_reg, write_reg};

pub trait Mailbox {
    /// Producer side: publishes a nonzero word. The slot must have been
    /// acknowledged first.
    fn post(&mut self, word: u32);
    /// Producer side: has the consumer released the slot?
    fn acknowledged(&self) -> bool;
    /// Consumer side: pending word, if any.
    fn take(&self) -> Option<u32>;
    /// Consumer side: releases the slot.
    fn acknowledge(&mut self);
}

pub struct MmioMailbox {
    addr: usize,
    last: u32
}

impl MmioMailbox {
    /// `addr` must point at a word in memory shared with the kernel CPU,
    /// outside any cached region.
    pub unsafe fn new(addr: usize) -> MmioMailbox {
        MmioMailbox { addr, last: 0 }
    }
}

impl Mailbox for MmioMailbox {
    fn post(&mut self, word: u32) {
        self.last = word;
        unsafe { write_reg(self.addr, word) }
    }

    fn acknowledged(&self) -> bool {
        let word = unsafe { read_reg(self.addr) };
        word == 0 || word != self.last
    }

    fn take(&self) -> Option<u32> {
        match unsafe { read_reg(self.addr) } {
            0 => None,
            word => Some(word)
        }
    }

    fn acknowledge(&mut self) {
        unsafe { write_reg(self.addr, 0) }
    }
}

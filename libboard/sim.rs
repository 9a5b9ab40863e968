//! Software stand-ins for the hardware traits, for host-side tests and
//! protocol work without gateware.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::Cell;

use crate::{Flash, FlashError, KernelCpu, Leds};
use crate::clock::Clock;
use crate::mailbox::Mailbox;
use crate::rtio::{self, Rtio};
use crate::uart::Serial;

pub struct SimClock {
    ms: Cell<u32>
}

impl SimClock {
    pub fn new() -> SimClock {
        SimClock { ms: Cell::new(0) }
    }

    pub fn advance(&self, ms: u32) {
        self.ms.set(self.ms.get().wrapping_add(ms))
    }
}

impl Clock for SimClock {
    fn get_ms(&self) -> u32 {
        self.ms.get()
    }
}

pub struct SimSerial {
    rx: VecDeque<u8>,
    tx: Vec<u8>
}

impl SimSerial {
    pub fn new() -> SimSerial {
        SimSerial { rx: VecDeque::new(), tx: Vec::new() }
    }

    /// Queues bytes "arriving" on the line.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied())
    }

    /// Drains everything written so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.tx)
    }
}

impl Serial for SimSerial {
    fn read(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, byte: u8) {
        self.tx.push(byte)
    }
}

pub struct SimLeds {
    pub value: u32,
    pub transitions: usize
}

impl SimLeds {
    pub fn new() -> SimLeds {
        SimLeds { value: 0, transitions: 0 }
    }
}

impl Leds for SimLeds {
    fn set(&mut self, value: u32) {
        if value != self.value {
            self.transitions += 1
        }
        self.value = value
    }
}

/// RAM-backed flash with NOR programming semantics (programming can only
/// clear bits) and an optional power-loss injector: after `set_power_cut`,
/// the array accepts that many more programmed bytes and then goes dead
/// until `reboot`.
pub struct SimFlash {
    mem:         Vec<u8>,
    sector_size: usize,
    fuel:        Option<usize>,
    dead:        bool
}

impl SimFlash {
    pub fn new(sector_size: usize, sector_count: usize) -> SimFlash {
        SimFlash {
            mem: vec![0xff; sector_size * sector_count],
            sector_size,
            fuel: None,
            dead: false
        }
    }

    pub fn set_power_cut(&mut self, bytes: usize) {
        self.fuel = Some(bytes)
    }

    pub fn reboot(&mut self) {
        self.fuel = None;
        self.dead = false;
    }
}

impl Flash for SimFlash {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> usize {
        self.mem.len() / self.sector_size
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.mem[offset..offset + buf.len()])
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        for (index, &byte) in data.iter().enumerate() {
            if self.dead {
                break
            }
            if let Some(fuel) = self.fuel {
                if fuel == 0 {
                    self.dead = true;
                    break
                }
                self.fuel = Some(fuel - 1);
            }
            self.mem[offset + index] &= byte;
        }

        for (index, &byte) in data.iter().enumerate() {
            if self.mem[offset + index] != byte {
                return Err(FlashError::WriteFail { offset: offset + index })
            }
        }
        Ok(())
    }

    fn erase_sector(&mut self, sector: usize) -> Result<(), FlashError> {
        if self.dead {
            return Err(FlashError::EraseFail { sector })
        }
        let start = sector * self.sector_size;
        for byte in &mut self.mem[start..start + self.sector_size] {
            *byte = 0xff
        }
        Ok(())
    }
}

/// Records the event stream and models fabric time for underflow checks.
pub struct SimRtio {
    counter:      u64,
    /// Cycles the fabric advances every time the counter is read.
    pub counter_step: u64,
    pub outputs:  Vec<(u64, u32, u32, u32)>,
    inputs:       BTreeMap<u32, VecDeque<u32>>,
    pub clock_source: u8,
    pub clock_locked: bool,
    pub fail_clock_switch: bool,
    probes:       BTreeMap<(u32, u8), u32>,
    injections:   BTreeMap<(u32, u8), u8>
}

impl SimRtio {
    pub fn new() -> SimRtio {
        SimRtio {
            counter: 0,
            counter_step: 0,
            outputs: Vec::new(),
            inputs: BTreeMap::new(),
            clock_source: 0,
            clock_locked: true,
            fail_clock_switch: false,
            probes: BTreeMap::new(),
            injections: BTreeMap::new()
        }
    }

    pub fn set_counter(&mut self, value: u64) {
        self.counter = value
    }

    pub fn set_probe(&mut self, channel: u32, probe: u8, value: u32) {
        self.probes.insert((channel, probe), value);
    }

    pub fn push_input(&mut self, channel: u32, data: u32) {
        self.inputs.entry(channel).or_insert_with(VecDeque::new).push_back(data)
    }
}

impl Rtio for SimRtio {
    fn init(&mut self) {}

    fn counter(&mut self) -> u64 {
        self.counter += self.counter_step;
        self.counter
    }

    fn output(&mut self, timestamp: u64, channel: u32, addr: u32, data: u32)
             -> Result<(), rtio::Error> {
        self.counter += self.counter_step;
        if timestamp <= self.counter {
            return Err(rtio::Error::Underflow {
                channel, timestamp,
                slack: timestamp.wrapping_sub(self.counter) as i64
            })
        }
        self.outputs.push((timestamp, channel, addr, data));
        Ok(())
    }

    fn input(&mut self, channel: u32) -> Result<u32, rtio::Error> {
        self.inputs.get_mut(&channel)
            .and_then(|queue| queue.pop_front())
            .ok_or(rtio::Error::InputTimeout { channel })
    }

    fn switch_clock(&mut self, source: u8) -> bool {
        if self.fail_clock_switch {
            self.clock_locked = false;
            return false
        }
        self.clock_source = source;
        self.clock_locked = true;
        true
    }

    fn clock_ok(&mut self) -> bool {
        self.clock_locked
    }

    fn monitor(&mut self, channel: u32, probe: u8) -> u32 {
        self.probes.get(&(channel, probe)).copied().unwrap_or(0)
    }

    fn inject(&mut self, channel: u32, overrd: u8, value: u8) {
        self.injections.insert((channel, overrd), value);
    }

    fn injection_status(&mut self, channel: u32, overrd: u8) -> u8 {
        self.injections.get(&(channel, overrd)).copied().unwrap_or(0)
    }
}

/// Word slot shared between both ends, like the AMP mailbox word.
#[derive(Clone)]
pub struct SimMailbox {
    slot: Rc<Cell<u32>>
}

impl SimMailbox {
    pub fn new() -> SimMailbox {
        SimMailbox { slot: Rc::new(Cell::new(0)) }
    }
}

impl Mailbox for SimMailbox {
    fn post(&mut self, word: u32) {
        self.slot.set(word)
    }

    fn acknowledged(&self) -> bool {
        self.slot.get() == 0
    }

    fn take(&self) -> Option<u32> {
        match self.slot.get() {
            0 => None,
            word => Some(word)
        }
    }

    fn acknowledge(&mut self) {
        self.slot.set(0)
    }
}

/// Kernel CPU reset line.
pub struct SimKernelCpu {
    in_reset: bool,
    pub resets: usize
}

impl SimKernelCpu {
    pub fn new() -> SimKernelCpu {
        SimKernelCpu { in_reset: true, resets: 0 }
    }
}

impl KernelCpu for SimKernelCpu {
    fn set_reset(&mut self, reset: bool) {
        if reset && !self.in_reset {
            self.resets += 1
        }
        self.in_reset = reset;
    }

    fn in_reset(&self) -> bool {
        self.in_reset
    }
}

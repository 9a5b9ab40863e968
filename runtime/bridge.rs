//! Runtime-side RTIO/DDS bridge.
//!
//! Holds the timeline cursor while no kernel is active: every write is
//! issued at `now` and the cursor then advances by at least `WRITE_GAP`
//! coarse cycles, so the cursor never decreases. `start` re-arms the cursor
//! a safe distance ahead of the fabric counter. Once a kernel runs, the
//! fabric belongs to it until `kloader` stops it.

use board::rtio::{self, Rtio};

/// Cursor headroom over the fabric counter after (re)start, coarse cycles.
pub const SAFE_START_OFFSET: u64 = 125_000;

/// Minimum gap between two bridge-issued events, coarse cycles.
pub const WRITE_GAP: u64 = 16;

/// Dead time around DDS reset and calibration edges, coarse cycles.
pub const DDS_CAL_GAP: u64 = 2_000;

// DDS SPI shim address map, per channel.
const DDS_CFR:     u32 = 0x00;
const DDS_FTW:     u32 = 0x04;
const DDS_POW:     u32 = 0x08;
const DDS_PROFILE: u32 = 0x0c;
/// IO_UPDATE strobe; data is ignored.
const DDS_FUD:     u32 = 0x40;
/// Set in the address word to run a read cycle instead of a write.
const DDS_READ:    u32 = 0x100;

const CFR_RESET:      u32 = 1 << 0;
const CFR_CAL_ENABLE: u32 = 1 << 1;

pub struct Bridge<'a> {
    rtio:     &'a mut dyn Rtio,
    channels: u32,
    now:      u64
}

impl<'a> Bridge<'a> {
    pub fn new(rtio: &'a mut dyn Rtio, channels: u32) -> Bridge<'a> {
        Bridge { rtio, channels, now: 0 }
    }

    /// Resets the fabric and re-arms the cursor ahead of it.
    pub fn start(&mut self) {
        self.rtio.init();
        self.now = self.rtio.counter() + SAFE_START_OFFSET;
    }

    /// Current timeline cursor, coarse cycles. Never decreases.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn write(&mut self, channel: u32, addr: u32, data: u32)
                -> Result<(), rtio::Error> {
        self.rtio.output(self.now, channel, addr, data)?;
        self.now += WRITE_GAP;
        Ok(())
    }

    pub fn read(&mut self, channel: u32, addr: u32) -> Result<u32, rtio::Error> {
        self.write(channel, addr | DDS_READ, 0)?;
        self.rtio.input(channel)
    }

    pub fn set_frequency(&mut self, channel: u32, ftw: u32, pow: u32, profile: u32)
                        -> Result<(), rtio::Error> {
        self.write(channel, DDS_FTW, ftw)?;
        self.write(channel, DDS_POW, pow)?;
        self.write(channel, DDS_PROFILE, profile)?;
        self.write(channel, DDS_FUD, 0)
    }

    /// Runs every channel's reset + calibration + IO_UPDATE sequence.
    /// Idempotent; the mandated dead times are spent on the timeline, not
    /// in host milliseconds.
    pub fn init_dds_all(&mut self) -> Result<(), rtio::Error> {
        for channel in 0..self.channels {
            self.write(channel, DDS_CFR, CFR_RESET)?;
            self.write(channel, DDS_FUD, 0)?;
            self.now += DDS_CAL_GAP;
            self.write(channel, DDS_CFR, CFR_CAL_ENABLE)?;
            self.write(channel, DDS_FUD, 0)?;
            self.now += DDS_CAL_GAP;
            self.write(channel, DDS_CFR, 0)?;
            self.write(channel, DDS_FUD, 0)?;
        }
        Ok(())
    }

    /// Reconfigures the RTIO reference clock mux, then resets the fabric
    /// and re-arms the cursor.
    pub fn switch_clock(&mut self, source: u8) -> bool {
        if !self.rtio.switch_clock(source) {
            return false
        }
        self.start();
        true
    }

    pub fn clock_ok(&mut self) -> bool {
        self.rtio.clock_ok()
    }

    pub fn rtio(&mut self) -> &mut dyn Rtio {
        &mut *self.rtio
    }
}

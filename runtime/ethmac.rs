//! LiteEth-style slot MAC as a smoltcp device. Received frames sit in SRAM
//! slots the gateware fills; transmission claims the next reader slot. The
//! runtime copies frames out of the slots immediately, so a slot is only
//! held across one `receive` call.

use alloc::vec::Vec;

use smoltcp::phy::{self, Device, DeviceCapabilities, Medium};
use smoltcp::time::Instant;

const SLOT_COUNT: usize = 4;
const SLOT_SIZE:  usize = 0x800;

// Register map: 0x00 SRAM_WRITER_SLOT, 0x04 SRAM_WRITER_LENGTH,
// 0x08 SRAM_WRITER_EV_PENDING, 0x0c SRAM_READER_START, 0x10 SRAM_READER_READY,
// 0x14 SRAM_READER_SLOT, 0x18 SRAM_READER_LENGTH, 0x1c PHY_RESET.
const ETHMAC_SRAM_WRITER_SLOT:       usize = 0x00;
const ETHMAC_SRAM_WRITER_LENGTH:     usize = 0x04;
const ETHMAC_SRAM_WRITER_EV_PENDING: usize = 0x08;
const ETHMAC_SRAM_READER_START:      usize = 0x0c;
const ETHMAC_SRAM_READER_READY:      usize = 0x10;
const ETHMAC_SRAM_READER_SLOT:       usize = 0x14;
const ETHMAC_SRAM_READER_LENGTH:     usize = 0x18;
const ETHMAC_PHY_RESET:              usize = 0x1c;

pub struct EthmacDevice {
    base: usize,
    sram: usize
}

impl EthmacDevice {
    /// `base` points at the MAC register block, `sram` at the packet slot
    /// memory (receive slots first, then transmit slots).
    pub unsafe fn new(base: usize, sram: usize) -> EthmacDevice {
        EthmacDevice { base, sram }
    }

    fn reg(&self, offset: usize) -> u32 {
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn set_reg(&self, offset: usize, value: u32) {
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }

    pub fn reset_phy(&mut self) {
        self.set_reg(ETHMAC_PHY_RESET, 1);
        self.set_reg(ETHMAC_PHY_RESET, 0);
    }

    fn rx_packet(&mut self) -> Option<Vec<u8>> {
        if self.reg(ETHMAC_SRAM_WRITER_EV_PENDING) == 0 {
            return None
        }
        let slot = self.reg(ETHMAC_SRAM_WRITER_SLOT) as usize % SLOT_COUNT;
        let length = (self.reg(ETHMAC_SRAM_WRITER_LENGTH) as usize).min(SLOT_SIZE);

        let mut packet = Vec::with_capacity(length);
        let slot_base = (self.sram + slot * SLOT_SIZE) as *const u8;
        for index in 0..length {
            packet.push(unsafe { core::ptr::read_volatile(slot_base.add(index)) })
        }
        self.set_reg(ETHMAC_SRAM_WRITER_EV_PENDING, 1);
        Some(packet)
    }

    fn tx_packet(&mut self, packet: &[u8]) {
        if self.reg(ETHMAC_SRAM_READER_READY) == 0 {
            // previous frame still going out; drop, TCP retransmits
            return
        }
        let slot = (self.reg(ETHMAC_SRAM_READER_SLOT) as usize + 1) % SLOT_COUNT;
        let slot_base = (self.sram + (SLOT_COUNT + slot) * SLOT_SIZE) as *mut u8;
        for (index, &byte) in packet.iter().enumerate() {
            unsafe { core::ptr::write_volatile(slot_base.add(index), byte) }
        }
        self.set_reg(ETHMAC_SRAM_READER_SLOT, slot as u32);
        self.set_reg(ETHMAC_SRAM_READER_LENGTH, packet.len() as u32);
        self.set_reg(ETHMAC_SRAM_READER_START, 1);
    }
}

pub struct EthRxToken {
    packet: Vec<u8>
}

impl phy::RxToken for EthRxToken {
    fn consume<R, F>(self, f: F) -> R
        where F: FnOnce(&[u8]) -> R
    {
        f(&self.packet)
    }
}

pub struct EthTxToken<'a> {
    device: &'a mut EthmacDevice
}

impl<'a> phy::TxToken for EthTxToken<'a> {
    fn consume<R, F>(self, len: usize, f: F) -> R
        where F: FnOnce(&mut [u8]) -> R
    {
        let mut packet = alloc::vec![0; len.min(SLOT_SIZE)];
        let result = f(&mut packet);
        self.device.tx_packet(&packet);
        result
    }
}

impl Device for EthmacDevice {
    type RxToken<'a> = EthRxToken;
    type TxToken<'a>
        = EthTxToken<'a>
    where
        Self: 'a;

    fn receive(&mut self, _timestamp: Instant)
              -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let packet = self.rx_packet()?;
        Some((EthRxToken { packet }, EthTxToken { device: self }))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        Some(EthTxToken { device: self })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        caps.max_transmission_unit = 1500;
        caps.max_burst_size = Some(SLOT_COUNT);
        caps
    }
}

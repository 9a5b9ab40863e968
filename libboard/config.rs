//! Log-structured key/value store over a pair of flash sectors.
//!
//! Records are appended to the active sector; a forward scan keeps the
//! latest record per key, so the most recent write wins. Removal appends a
//! zero-length record. When the tail runs out, the live records are
//! rewritten densely into the freshly erased alternate sector; the new
//! sector's sentinel is programmed only after the full rewrite, then the old
//! sector is staled, so a power loss leaves either the previous or the new
//! contents, never a mixture.
//!
//! On-flash record layout: `len:u16 | crc:u16 | key | 0x00 | value`, with
//! `len` covering the whole record and `crc` a CRC-16/XMODEM over everything
//! after the header. A header or CRC mismatch during a scan marks the end of
//! the log, not corruption; the torn tail is reclaimed at the next open.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};
use core::fmt;
use crc::{Crc, CRC_16_XMODEM};

use crate::{Flash, FlashError};

pub const KEY_SIZE_MAX: usize = 31;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

// 0xa5 = valid, 0xff = blank, 0x00 = staled by a completed swap.
const SENTINEL_VALID: u8 = 0xa5;
const SENTINEL_STALE: u8 = 0x00;

const SENTINEL_OFFSET: usize = 0;
const RECORDS_OFFSET:  usize = 4;
const HEADER_SIZE:     usize = 4;

/// Start compacting a little before the tail is literally full, so that the
/// sentinel and a torn header can never collide with a straddling record.
const COMPACT_SLACK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    SpaceExhausted,
    KeyInvalid,
    Utf8Error,
    WriteFail { offset: usize },
    EraseFail { sector: usize }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Error::SpaceExhausted =>
                write!(f, "space exhausted"),
            &Error::KeyInvalid =>
                write!(f, "malformed key"),
            &Error::Utf8Error =>
                write!(f, "value is not valid UTF-8"),
            &Error::WriteFail { offset } =>
                write!(f, "write verification failed at offset {}", offset),
            &Error::EraseFail { sector } =>
                write!(f, "erase verification failed in sector {}", sector)
        }
    }
}

impl From<FlashError> for Error {
    fn from(value: FlashError) -> Error {
        match value {
            FlashError::WriteFail { offset } => Error::WriteFail { offset },
            FlashError::EraseFail { sector } => Error::EraseFail { sector }
        }
    }
}

struct Record<'a> {
    key:   &'a [u8],
    value: &'a [u8]
}

/// Walks the records of one sector image. Stops at the erased tail or at
/// the first record whose header or CRC does not check out; `tail()` tells
/// where the scan ended and whether the end was clean.
struct Iter<'a> {
    data:   &'a [u8],
    offset: usize,
    dirty:  bool
}

impl<'a> Iter<'a> {
    fn new(data: &'a [u8]) -> Iter<'a> {
        Iter { data, offset: RECORDS_OFFSET, dirty: false }
    }

    fn tail(&self) -> usize {
        self.offset
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        let data = &self.data[self.offset..];

        if data.len() < HEADER_SIZE {
            return None
        }
        let record_size = LittleEndian::read_u16(data) as usize;
        if record_size == 0xffff {
            // erased tail
            return None
        }
        if record_size < HEADER_SIZE + 2 || record_size > data.len() {
            self.dirty = true;
            return None
        }

        let crc = LittleEndian::read_u16(&data[2..]);
        let body = &data[HEADER_SIZE..record_size];
        if crc != CRC16.checksum(body) {
            self.dirty = true;
            return None
        }

        match body.iter().position(|&x| x == 0) {
            None => {
                self.dirty = true;
                None
            }
            Some(pos) => {
                self.offset += record_size;
                let (key, zero_and_value) = body.split_at(pos);
                Some(Record { key, value: &zero_and_value[1..] })
            }
        }
    }
}

fn key_ok(key: &str) -> bool {
    !key.is_empty() && key.len() <= KEY_SIZE_MAX
        && key.bytes().all(|b| b != 0 && b.is_ascii())
}

pub struct Store<'a> {
    flash:  &'a mut dyn Flash,
    active: usize
}

impl<'a> Store<'a> {
    pub fn open(flash: &'a mut dyn Flash) -> Result<Store<'a>, Error> {
        debug_assert!(flash.sector_count() >= 2);

        let size = flash.sector_size();
        let sentinels = [sentinel(flash, 0), sentinel(flash, 1)];
        let active = match (sentinels[0], sentinels[1]) {
            (SENTINEL_VALID, SENTINEL_VALID) => {
                // Interrupted swap: both rewrites completed up to the stale
                // mark. Taking sector 0 is as good as either.
                flash.program(size + SENTINEL_OFFSET, &[SENTINEL_STALE])?;
                0
            }
            (SENTINEL_VALID, _) => 0,
            (_, SENTINEL_VALID) => 1,
            _ => {
                flash.erase_sector(0)?;
                flash.program(SENTINEL_OFFSET, &[SENTINEL_VALID])?;
                0
            }
        };

        let mut store = Store { flash, active };
        if store.tail_is_dirty() {
            debug!("reclaiming torn record tail");
            store.rewrite(None)?;
        }
        Ok(store)
    }

    fn sector_data(&self, sector: usize) -> Vec<u8> {
        let size = self.flash.sector_size();
        let mut data = vec![0; size];
        self.flash.read(sector * size, &mut data);
        data
    }

    fn tail_is_dirty(&self) -> bool {
        let data = self.sector_data(self.active);
        let mut iter = Iter::new(&data);
        while iter.next().is_some() {}
        iter.is_dirty()
    }

    /// Latest value for `key`; a zero-length value is a tombstone.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let data = self.sector_data(self.active);
        let mut value: Option<Vec<u8>> = None;
        for record in Iter::new(&data) {
            if record.key == key.as_bytes() {
                if record.value.is_empty() {
                    value = None
                } else {
                    value = Some(record.value.to_vec())
                }
            }
        }
        value
    }

    pub fn get_str(&self, key: &str) -> Result<Option<String>, Error> {
        match self.get(key) {
            None => Ok(None),
            Some(value) =>
                String::from_utf8(value)
                    .map(Some)
                    .map_err(|_| Error::Utf8Error)
        }
    }

    /// C-shaped read: fills `buf` with up to the value length and returns
    /// the number of bytes copied; 0 for absent or removed keys.
    pub fn read(&self, key: &str, buf: &mut [u8]) -> usize {
        match self.get(key) {
            None => 0,
            Some(value) => {
                let len = value.len().min(buf.len());
                buf[..len].copy_from_slice(&value[..len]);
                len
            }
        }
    }

    pub fn write(&mut self, key: &str, value: &[u8]) -> Result<(), Error> {
        if !key_ok(key) {
            return Err(Error::KeyInvalid)
        }

        let record_size = HEADER_SIZE + key.len() + 1 + value.len();
        let capacity = self.flash.sector_size() - RECORDS_OFFSET - COMPACT_SLACK;
        if record_size > capacity {
            return Err(Error::SpaceExhausted)
        }

        let (tail, dirty) = {
            let data = self.sector_data(self.active);
            let mut iter = Iter::new(&data);
            while iter.next().is_some() {}
            (iter.tail(), iter.is_dirty())
        };

        if dirty || tail + record_size + COMPACT_SLACK > self.flash.sector_size() {
            self.rewrite(Some((key.as_bytes(), value)))
        } else {
            self.append_at(self.active, tail, key.as_bytes(), value)
                .map(|_| ())
        }
    }

    pub fn write_int(&mut self, key: &str, value: u32) -> Result<(), Error> {
        let mut buf = [0; 10];
        let mut cursor = buf.len();
        let mut rest = value;
        loop {
            cursor -= 1;
            buf[cursor] = b'0' + (rest % 10) as u8;
            rest /= 10;
            if rest == 0 { break }
        }
        let digits = buf[cursor..].to_vec();
        self.write(key, &digits)
    }

    pub fn remove(&mut self, key: &str) -> Result<(), Error> {
        if !key_ok(key) {
            return Err(Error::KeyInvalid)
        }
        if self.get(key).is_none() {
            return Ok(())
        }
        self.write(key, &[])
    }

    pub fn erase(&mut self) -> Result<(), Error> {
        self.flash.erase_sector(0)?;
        self.flash.erase_sector(1)?;
        self.flash.program(SENTINEL_OFFSET, &[SENTINEL_VALID])?;
        self.active = 0;
        Ok(())
    }

    fn append_at(&mut self, sector: usize, offset: usize,
                 key: &[u8], value: &[u8]) -> Result<usize, Error> {
        let record_size = HEADER_SIZE + key.len() + 1 + value.len();
        if offset + record_size + COMPACT_SLACK > self.flash.sector_size() {
            return Err(Error::SpaceExhausted)
        }

        let mut record = Vec::with_capacity(record_size);
        record.extend_from_slice(&[0; HEADER_SIZE]);
        record.extend_from_slice(key);
        record.push(0);
        record.extend_from_slice(value);
        LittleEndian::write_u16(&mut record[0..], record_size as u16);
        let crc = CRC16.checksum(&record[HEADER_SIZE..]);
        LittleEndian::write_u16(&mut record[2..], crc);

        let base = sector * self.flash.sector_size();
        self.flash.program(base + offset, &record)?;
        Ok(offset + record_size)
    }

    /// Rewrites the live records densely into the alternate sector,
    /// optionally with one updated entry, and swaps sectors. Worst-case
    /// quadratic over the record count, which a flash sector keeps small.
    fn rewrite(&mut self, update: Option<(&[u8], &[u8])>) -> Result<(), Error> {
        let old = self.sector_data(self.active);

        let mut live: Vec<(&[u8], &[u8])> = Vec::new();
        for record in Iter::new(&old) {
            match live.iter_mut().find(|(key, _)| *key == record.key) {
                Some(entry) => entry.1 = record.value,
                None => live.push((record.key, record.value))
            }
        }
        if let Some((key, value)) = update {
            match live.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => live.push((key, value))
            }
        }

        let target = 1 - self.active;
        self.flash.erase_sector(target)?;

        let mut offset = RECORDS_OFFSET;
        for &(key, value) in &live {
            if value.is_empty() {
                continue
            }
            offset = self.append_at(target, offset, key, value)?;
        }

        let size = self.flash.sector_size();
        self.flash.program(target * size + SENTINEL_OFFSET, &[SENTINEL_VALID])?;
        self.flash.program(self.active * size + SENTINEL_OFFSET, &[SENTINEL_STALE])?;
        self.active = target;
        Ok(())
    }
}

fn sentinel(flash: &dyn Flash, sector: usize) -> u8 {
    let mut byte = [0];
    flash.read(sector * flash.sector_size() + SENTINEL_OFFSET, &mut byte);
    byte[0]
}

impl<'a> fmt::Debug for Store<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Store")
         .field("active", &self.active)
         .finish()
    }
}

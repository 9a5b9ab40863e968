//! Control-port framing.
//!
//! Every message on the control port is `magic:u8 | type:u8 | len:u32_be |
//! payload[len]`. The magic byte selects the channel multiplexed on the
//! connection: 0x5A carries the control dialog, 0x5B carries the kernel RPC
//! sub-channel. The length field is the payload length and is the only
//! big-endian scalar on the wire.

use alloc::vec::Vec;
use byteorder::{ByteOrder, BigEndian};

use io::{Write, Error as IoError};

pub const MAGIC_CONTROL: u8 = 0x5a;
pub const MAGIC_RPC:     u8 = 0x5b;

pub const HEADER_SIZE: usize = 6;

/// Upper bound on a single payload. Kernel images are the largest frames;
/// they have to fit the kernel memory window anyway.
pub const MAX_PAYLOAD: usize = 4 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Control,
    Rpc
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: Channel,
    pub ty:      u8,
    pub payload: Vec<u8>
}

#[derive(Fail, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[fail(display = "unknown magic byte {:#04x}", _0)]
    BadMagic(u8),
    #[fail(display = "frame payload of {} bytes exceeds limit", _0)]
    Oversized(u32)
}

/// Accumulates raw connection bytes and yields complete frames.
///
/// The session engine feeds whatever the socket currently holds and drains
/// frames afterwards; a partial frame stays buffered until the rest arrives,
/// so the caller never has to block on the network.
#[derive(Debug)]
pub struct Framer {
    buf: Vec<u8>
}

impl Framer {
    pub fn new() -> Framer {
        Framer { buf: Vec::new() }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes)
    }

    pub fn pop(&mut self) -> Result<Option<Frame>, Error> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None)
        }

        let channel = match self.buf[0] {
            MAGIC_CONTROL => Channel::Control,
            MAGIC_RPC     => Channel::Rpc,
            other         => return Err(Error::BadMagic(other))
        };
        let ty  = self.buf[1];
        let len = BigEndian::read_u32(&self.buf[2..6]);
        if len as usize > MAX_PAYLOAD {
            return Err(Error::Oversized(len))
        }

        let total = HEADER_SIZE + len as usize;
        if self.buf.len() < total {
            return Ok(None)
        }

        let payload = self.buf[HEADER_SIZE..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(Frame { channel, ty, payload }))
    }
}

/// Writes one complete frame.
pub fn write<W>(writer: &mut W, channel: Channel, ty: u8, payload: &[u8])
               -> Result<(), IoError<W::WriteError>>
    where W: Write + ?Sized
{
    let magic = match channel {
        Channel::Control => MAGIC_CONTROL,
        Channel::Rpc     => MAGIC_RPC
    };
    let mut header = [magic, ty, 0, 0, 0, 0];
    BigEndian::write_u32(&mut header[2..], payload.len() as u32);
    writer.write_all(&header)?;
    writer.write_all(payload)
}

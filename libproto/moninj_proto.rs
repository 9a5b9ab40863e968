//! Monitor/injection protocol on the secondary port.
//!
//! The dialog starts with a fixed magic line; afterwards host messages are a
//! type byte followed by fixed-size fields, so the parser can consume them
//! incrementally from whatever the socket has buffered.

use io::{Write, Error as IoError};
use io::proto::ProtoWrite;

pub const MAGIC: &[u8] = b"ARTIQ moninj\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMessage {
    MonitorProbe { enable: bool, channel: u32, probe: u8 },
    MonitorInjection { enable: bool, channel: u32, overrd: u8 },
    Inject { channel: u32, overrd: u8, value: u8 },
    GetInjectionStatus { channel: u32, overrd: u8 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMessage {
    MonitorStatus { channel: u32, probe: u8, value: u32 },
    InjectionStatus { channel: u32, overrd: u8, value: u8 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    WrongMagic,
    UnknownPacket(u8)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl HostMessage {
    /// Parses one message from the front of `buf`, returning it together
    /// with the number of bytes consumed, or `None` if more bytes are
    /// needed.
    pub fn parse(buf: &[u8]) -> Result<Option<(HostMessage, usize)>, Error> {
        let Some(&ty) = buf.first() else { return Ok(None) };
        let need = match ty {
            0 | 3 => 7,
            1     => 7,
            2     => 6,
            other => return Err(Error::UnknownPacket(other))
        };
        if buf.len() < need {
            return Ok(None)
        }

        let message = match ty {
            0 => HostMessage::MonitorProbe {
                enable:  buf[1] != 0,
                channel: read_u32(&buf[2..6]),
                probe:   buf[6]
            },
            1 => HostMessage::Inject {
                channel: read_u32(&buf[1..5]),
                overrd:  buf[5],
                value:   buf[6]
            },
            2 => HostMessage::GetInjectionStatus {
                channel: read_u32(&buf[1..5]),
                overrd:  buf[5]
            },
            3 => HostMessage::MonitorInjection {
                enable:  buf[1] != 0,
                channel: read_u32(&buf[2..6]),
                overrd:  buf[6]
            },
            _ => unreachable!()
        };
        Ok(Some((message, need)))
    }
}

impl DeviceMessage {
    pub fn write_to<W>(&self, writer: &mut W) -> Result<(), IoError<W::WriteError>>
        where W: Write + ?Sized
    {
        match *self {
            DeviceMessage::MonitorStatus { channel, probe, value } => {
                writer.write_u8(0)?;
                writer.write_u32(channel)?;
                writer.write_u8(probe)?;
                writer.write_u32(value)
            }
            DeviceMessage::InjectionStatus { channel, overrd, value } => {
                writer.write_u8(1)?;
                writer.write_u32(channel)?;
                writer.write_u8(overrd)?;
                writer.write_u8(value)
            }
        }
    }
}

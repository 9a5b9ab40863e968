//! Messages crossing the runtime/kernel mailbox.
//!
//! Payloads are serialized into the comm area of the kernel memory window;
//! the mailbox word only announces their presence and length. Exactly one
//! message per direction is in flight at any time.

use alloc::string::String;
use alloc::vec::Vec;
use core::convert::Infallible;

use io::{Cursor, Error as IoError};
use io::proto::{ProtoRead, ProtoWrite};

use crate::session_proto::ExceptionKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// kernel->runtime: blocked on a host service call.
    RpcCall { service: u32, tag: Vec<u8>, data: Vec<u8> },
    /// runtime->kernel: the host's return value.
    RpcReply { tag: Vec<u8>, data: Vec<u8> },
    /// kernel->runtime, terminal: the kernel CPU halted on a fault.
    Exception {
        kind:      ExceptionKind,
        message:   String,
        backtrace: Vec<u32>
    },
    /// kernel->runtime, terminal success.
    RunFinished,
    /// kernel->runtime: text for the log ring, delivered in emission order.
    Log(Vec<u8>),
    /// kernel->runtime: final timeline cursor, persisted for host telemetry.
    NowSave(u64),
}

impl Message {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            Message::RpcCall { service, ref tag, ref data } => {
                out.write_u8(1).unwrap();
                out.write_u32(service).unwrap();
                out.write_bytes(tag).unwrap();
                out.write_bytes(data).unwrap();
            }
            Message::RpcReply { ref tag, ref data } => {
                out.write_u8(2).unwrap();
                out.write_bytes(tag).unwrap();
                out.write_bytes(data).unwrap();
            }
            Message::Exception { kind, ref message, ref backtrace } => {
                out.write_u8(3).unwrap();
                out.write_u8(kind.to_u8()).unwrap();
                out.write_string(message).unwrap();
                out.write_u32(backtrace.len() as u32).unwrap();
                for &addr in backtrace {
                    out.write_u32(addr).unwrap()
                }
            }
            Message::RunFinished => out.write_u8(4).unwrap(),
            Message::Log(ref bytes) => {
                out.write_u8(5).unwrap();
                out.write_bytes(bytes).unwrap();
            }
            Message::NowSave(now) => {
                out.write_u8(6).unwrap();
                out.write_u64(now).unwrap();
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Message, IoError<Infallible>> {
        let mut reader = Cursor::new(data);
        Ok(match reader.read_u8()? {
            1 => Message::RpcCall {
                service: reader.read_u32()?,
                tag:     reader.read_bytes()?,
                data:    reader.read_bytes()?
            },
            2 => Message::RpcReply {
                tag:  reader.read_bytes()?,
                data: reader.read_bytes()?
            },
            3 => {
                let kind = ExceptionKind::from_u8(reader.read_u8()?)
                    .ok_or(IoError::Unrecognized)?;
                let message = reader.read_string()?;
                let count = reader.read_u32()? as usize;
                let mut backtrace = Vec::with_capacity(count);
                for _ in 0..count {
                    backtrace.push(reader.read_u32()?)
                }
                Message::Exception { kind, message, backtrace }
            }
            4 => Message::RunFinished,
            5 => Message::Log(reader.read_bytes()?),
            6 => Message::NowSave(reader.read_u64()?),
            _ => return Err(IoError::Unrecognized)
        })
    }
}

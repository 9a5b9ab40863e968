//! The control-port dialog: host requests, runtime replies, and the RPC
//! sub-channel messages exchanged while a kernel is blocked on the host.

use alloc::string::String;
use alloc::vec::Vec;
use core::convert::Infallible;

use io::{Write, Cursor, Error as IoError};
use io::proto::{ProtoRead, ProtoWrite};

use crate::frame::{self, Frame, Channel};

/// Error kinds carried by `Reply::Error`, mirrored in the log ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    BadImage,
    FlashFull,
    BridgeBusy,
    Hardware,
    Unrecoverable
}

impl ErrorKind {
    fn to_u8(self) -> u8 {
        match self {
            ErrorKind::Protocol      => 0,
            ErrorKind::BadImage      => 1,
            ErrorKind::FlashFull     => 2,
            ErrorKind::BridgeBusy    => 3,
            ErrorKind::Hardware      => 4,
            ErrorKind::Unrecoverable => 5
        }
    }

    pub fn from_u8(value: u8) -> Option<ErrorKind> {
        Some(match value {
            0 => ErrorKind::Protocol,
            1 => ErrorKind::BadImage,
            2 => ErrorKind::FlashFull,
            3 => ErrorKind::BridgeBusy,
            4 => ErrorKind::Hardware,
            5 => ErrorKind::Unrecoverable,
            _ => return None
        })
    }
}

/// Terminal kernel fault kinds (`Reply::KernelException`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    RtioUnderflow,
    RtioCollision,
    RtioBusy,
    BusError,
    Runtime
}

impl ExceptionKind {
    pub fn to_u8(self) -> u8 {
        match self {
            ExceptionKind::RtioUnderflow => 0,
            ExceptionKind::RtioCollision => 1,
            ExceptionKind::RtioBusy      => 2,
            ExceptionKind::BusError      => 3,
            ExceptionKind::Runtime       => 4
        }
    }

    pub fn from_u8(value: u8) -> Option<ExceptionKind> {
        Some(match value {
            0 => ExceptionKind::RtioUnderflow,
            1 => ExceptionKind::RtioCollision,
            2 => ExceptionKind::RtioBusy,
            3 => ExceptionKind::BusError,
            4 => ExceptionKind::Runtime,
            _ => return None
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ident,
    Log,
    SwitchClock(u8),

    LoadKernel(Vec<u8>),
    RunKernel { name: String },
    StopKernel,

    RpcReply { tag: Vec<u8>, data: Vec<u8> },

    FlashRead   { key: String },
    FlashWrite  { key: String, value: Vec<u8> },
    FlashRemove { key: String },
    FlashErase,
}

impl Request {
    pub fn parse(frame: &Frame) -> Result<Self, IoError<Infallible>> {
        let mut reader = Cursor::new(&frame.payload[..]);
        let request = match (frame.channel, frame.ty) {
            (Channel::Control, 1)  => Request::Ident,
            (Channel::Control, 2)  => Request::Log,
            (Channel::Control, 3)  => Request::SwitchClock(reader.read_u8()?),
            (Channel::Control, 4)  => Request::LoadKernel(reader.read_bytes()?),
            (Channel::Control, 5)  => Request::RunKernel {
                name: reader.read_string()?
            },
            (Channel::Control, 6)  => Request::StopKernel,
            (Channel::Control, 7)  => Request::FlashRead {
                key: reader.read_string()?
            },
            (Channel::Control, 8)  => Request::FlashWrite {
                key:   reader.read_string()?,
                value: reader.read_bytes()?
            },
            (Channel::Control, 9)  => Request::FlashRemove {
                key: reader.read_string()?
            },
            (Channel::Control, 10) => Request::FlashErase,
            (Channel::Rpc, 1)      => Request::RpcReply {
                tag:  reader.read_bytes()?,
                data: reader.read_bytes()?
            },
            _ => return Err(IoError::Unrecognized)
        };
        Ok(request)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Reply<'a> {
    Ident(&'a str),
    Log(&'a [u8]),

    ClockSwitchCompleted,
    ClockSwitchFailed,

    LoadCompleted,
    KernelFinished,
    KernelException {
        kind:      ExceptionKind,
        message:   &'a str,
        backtrace: &'a [u32],
        /// Log ring contents drained atomically with the fault so that no
        /// records are lost across the kernel teardown.
        log:       &'a [u8]
    },
    StopCompleted,

    RpcCall { service: u32, tag: &'a [u8], data: &'a [u8] },

    FlashRead(&'a [u8]),
    FlashOk,

    Error { kind: ErrorKind, message: &'a str },
}

impl<'a> Reply<'a> {
    pub fn write_to<W>(&self, writer: &mut W) -> Result<(), IoError<W::WriteError>>
        where W: Write + ?Sized
    {
        let mut payload = Vec::new();
        let (channel, ty) = match *self {
            Reply::Ident(ident) => {
                payload.write_string(ident).unwrap();
                (Channel::Control, 1)
            }
            Reply::Log(bytes) => {
                payload.write_bytes(bytes).unwrap();
                (Channel::Control, 2)
            }
            Reply::ClockSwitchCompleted => (Channel::Control, 3),
            Reply::ClockSwitchFailed    => (Channel::Control, 4),
            Reply::LoadCompleted        => (Channel::Control, 5),
            Reply::KernelFinished       => (Channel::Control, 6),
            Reply::KernelException { kind, message, backtrace, log } => {
                payload.write_u8(kind.to_u8()).unwrap();
                payload.write_string(message).unwrap();
                payload.write_u32(backtrace.len() as u32).unwrap();
                for &addr in backtrace {
                    payload.write_u32(addr).unwrap()
                }
                payload.write_bytes(log).unwrap();
                (Channel::Control, 7)
            }
            Reply::StopCompleted => (Channel::Control, 8),
            Reply::RpcCall { service, tag, data } => {
                payload.write_u32(service).unwrap();
                payload.write_bytes(tag).unwrap();
                payload.write_bytes(data).unwrap();
                (Channel::Rpc, 1)
            }
            Reply::FlashRead(bytes) => {
                payload.write_bytes(bytes).unwrap();
                (Channel::Control, 9)
            }
            Reply::FlashOk => (Channel::Control, 10),
            Reply::Error { kind, message } => {
                payload.write_u8(kind.to_u8()).unwrap();
                payload.write_string(message).unwrap();
                (Channel::Control, 11)
            }
        };
        frame::write(writer, channel, ty, &payload)
    }
}

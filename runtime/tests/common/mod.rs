//! Shared helpers for the end-to-end suites: host-side frame encoding,
//! reply decoding, and a minimal kernel image builder.

#![allow(dead_code)]

use byteorder::{ByteOrder, LittleEndian};
use io::Cursor;
use io::proto::{ProtoRead, ProtoWrite};
use proto::frame::{self, Channel, Frame, Framer};

pub fn control_frame(ty: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    frame::write(&mut out, Channel::Control, ty, payload).unwrap();
    out
}

pub fn req_ident() -> Vec<u8> {
    control_frame(1, &[])
}

pub fn req_log() -> Vec<u8> {
    control_frame(2, &[])
}

pub fn req_switch_clock(source: u8) -> Vec<u8> {
    control_frame(3, &[source])
}

pub fn req_load_kernel(image: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.write_bytes(image).unwrap();
    control_frame(4, &payload)
}

pub fn req_run_kernel(name: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.write_string(name).unwrap();
    control_frame(5, &payload)
}

pub fn req_stop_kernel() -> Vec<u8> {
    control_frame(6, &[])
}

pub fn req_flash_read(key: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.write_string(key).unwrap();
    control_frame(7, &payload)
}

pub fn req_flash_write(key: &str, value: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.write_string(key).unwrap();
    payload.write_bytes(value).unwrap();
    control_frame(8, &payload)
}

pub fn rpc_reply(tag: &[u8], data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.write_bytes(tag).unwrap();
    payload.write_bytes(data).unwrap();
    let mut out = Vec::new();
    frame::write(&mut out, Channel::Rpc, 1, &payload).unwrap();
    out
}

/// Host-side view of the device's replies.
#[derive(Debug, PartialEq, Eq)]
pub enum HostReply {
    Ident(String),
    Log(Vec<u8>),
    ClockSwitchCompleted,
    ClockSwitchFailed,
    LoadCompleted,
    KernelFinished,
    KernelException {
        kind:      u8,
        message:   String,
        backtrace: Vec<u32>,
        log:       Vec<u8>
    },
    StopCompleted,
    RpcCall { service: u32, tag: Vec<u8>, data: Vec<u8> },
    FlashRead(Vec<u8>),
    FlashOk,
    Error { kind: u8, message: String }
}

pub fn decode_reply(frame: &Frame) -> HostReply {
    let mut reader = Cursor::new(&frame.payload[..]);
    match (frame.channel, frame.ty) {
        (Channel::Control, 1) => HostReply::Ident(reader.read_string().unwrap()),
        (Channel::Control, 2) => HostReply::Log(reader.read_bytes().unwrap()),
        (Channel::Control, 3) => HostReply::ClockSwitchCompleted,
        (Channel::Control, 4) => HostReply::ClockSwitchFailed,
        (Channel::Control, 5) => HostReply::LoadCompleted,
        (Channel::Control, 6) => HostReply::KernelFinished,
        (Channel::Control, 7) => {
            let kind = reader.read_u8().unwrap();
            let message = reader.read_string().unwrap();
            let count = reader.read_u32().unwrap();
            let mut backtrace = Vec::new();
            for _ in 0..count {
                backtrace.push(reader.read_u32().unwrap())
            }
            let log = reader.read_bytes().unwrap();
            HostReply::KernelException { kind, message, backtrace, log }
        }
        (Channel::Control, 8) => HostReply::StopCompleted,
        (Channel::Control, 9) => HostReply::FlashRead(reader.read_bytes().unwrap()),
        (Channel::Control, 10) => HostReply::FlashOk,
        (Channel::Control, 11) => HostReply::Error {
            kind:    reader.read_u8().unwrap(),
            message: reader.read_string().unwrap()
        },
        (Channel::Rpc, 1) => HostReply::RpcCall {
            service: reader.read_u32().unwrap(),
            tag:     reader.read_bytes().unwrap(),
            data:    reader.read_bytes().unwrap()
        },
        other => panic!("unknown reply frame {:?}", other)
    }
}

pub fn decode_replies(bytes: &[u8]) -> Vec<HostReply> {
    let mut framer = Framer::new();
    framer.feed(bytes);
    let mut replies = Vec::new();
    while let Some(frame) = framer.pop().unwrap() {
        replies.push(decode_reply(&frame))
    }
    replies
}

// ELF32/OpenRISC executable with one text segment and a `run_kernel`
// entry symbol, for exercising the loader end to end.
pub fn test_kernel_image(window_base: u32) -> Vec<u8> {
    const EHDR_SIZE: usize = 52;
    const PHDR_SIZE: usize = 32;
    const SHDR_SIZE: usize = 40;
    const SYM_SIZE:  usize = 16;

    let text = [0x15, 0x00, 0x00, 0x00, 0x44, 0x00, 0x48, 0x00];
    let strtab = b"\0run_kernel\0";

    let e_phoff = EHDR_SIZE;
    let e_shoff = e_phoff + PHDR_SIZE;
    let text_off = e_shoff + 3 * SHDR_SIZE;
    let symtab_off = text_off + text.len();
    let strtab_off = symtab_off + 2 * SYM_SIZE;

    let mut image = vec![0u8; strtab_off + strtab.len()];
    image[0..4].copy_from_slice(b"\x7fELF");
    image[4] = 1;
    image[5] = 1;
    image[6] = 1;
    LittleEndian::write_u16(&mut image[16..], 2);   // ET_EXEC
    LittleEndian::write_u16(&mut image[18..], 92);  // EM_OPENRISC
    LittleEndian::write_u32(&mut image[24..], window_base);
    LittleEndian::write_u32(&mut image[28..], e_phoff as u32);
    LittleEndian::write_u32(&mut image[32..], e_shoff as u32);
    LittleEndian::write_u16(&mut image[42..], PHDR_SIZE as u16);
    LittleEndian::write_u16(&mut image[44..], 1);
    LittleEndian::write_u16(&mut image[46..], SHDR_SIZE as u16);
    LittleEndian::write_u16(&mut image[48..], 3);

    {
        let phdr = &mut image[e_phoff..e_phoff + PHDR_SIZE];
        LittleEndian::write_u32(&mut phdr[0..], 1);  // PT_LOAD
        LittleEndian::write_u32(&mut phdr[4..], text_off as u32);
        LittleEndian::write_u32(&mut phdr[8..], window_base);
        LittleEndian::write_u32(&mut phdr[16..], text.len() as u32);
        LittleEndian::write_u32(&mut phdr[20..], text.len() as u32 + 32);
    }
    {
        let shdr = e_shoff + SHDR_SIZE;
        LittleEndian::write_u32(&mut image[shdr + 4..shdr + 8], 2);  // SHT_SYMTAB
        LittleEndian::write_u32(&mut image[shdr + 16..shdr + 20], symtab_off as u32);
        LittleEndian::write_u32(&mut image[shdr + 20..shdr + 24], (2 * SYM_SIZE) as u32);
        LittleEndian::write_u32(&mut image[shdr + 24..shdr + 28], 2);
    }
    {
        let shdr = e_shoff + 2 * SHDR_SIZE;
        LittleEndian::write_u32(&mut image[shdr + 4..shdr + 8], 3);  // SHT_STRTAB
        LittleEndian::write_u32(&mut image[shdr + 16..shdr + 20], strtab_off as u32);
        LittleEndian::write_u32(&mut image[shdr + 20..shdr + 24], strtab.len() as u32);
    }
    {
        let sym = symtab_off + SYM_SIZE;
        LittleEndian::write_u32(&mut image[sym..sym + 4], 1);
        LittleEndian::write_u32(&mut image[sym + 4..sym + 8], window_base);
    }

    image[text_off..text_off + text.len()].copy_from_slice(&text);
    image[strtab_off..strtab_off + strtab.len()].copy_from_slice(strtab);
    image
}

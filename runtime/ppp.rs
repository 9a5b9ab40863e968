//! PPP-over-serial: HDLC-like framing with byte stuffing and FCS-16, plus
//! the minimum of LCP and IPCP needed to bring an unauthenticated link up.
//! Each received UART byte is fed to `input`; outgoing bytes accumulate for
//! the polled UART writer. Negotiated IP traffic is exchanged with the
//! network stack through the IP-medium `phy::Device` implementation.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use crc::{Crc, CRC_16_IBM_SDLC};

use board::clock::{elapsed, Clock};
use board::uart::Serial;
use smoltcp::phy::{self, Device, DeviceCapabilities, Medium};
use smoltcp::time::Instant;

const FLAG:       u8 = 0x7e;
const ESCAPE:     u8 = 0x7d;
const ESCAPE_XOR: u8 = 0x20;
const ADDRESS:    u8 = 0xff;
const CONTROL:    u8 = 0x03;

const PROTO_IP:   u16 = 0x0021;
const PROTO_IPCP: u16 = 0x8021;
const PROTO_LCP:  u16 = 0xc021;

const CODE_CONF_REQ:   u8 = 1;
const CODE_CONF_ACK:   u8 = 2;
const CODE_CONF_NAK:   u8 = 3;
const CODE_CONF_REJ:   u8 = 4;
const CODE_TERM_REQ:   u8 = 5;
const CODE_TERM_ACK:   u8 = 6;
const CODE_ECHO_REQ:   u8 = 9;
const CODE_ECHO_REPLY: u8 = 10;

const LCP_OPT_AUTH:  u8 = 3;
const IPCP_OPT_ADDR: u8 = 3;

// PPP frame check sequence (CRC-16/X-25).
const FCS: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

const MAX_FRAME:  usize = 1600;
const RESTART_MS: u32   = 3000;

fn stuff_into(out: &mut VecDeque<u8>, body: &[u8]) {
    out.push_back(FLAG);
    let fcs = FCS.checksum(body);
    for &byte in body.iter().chain(fcs.to_le_bytes().iter()) {
        if byte == FLAG || byte == ESCAPE || byte < 0x20 {
            out.push_back(ESCAPE);
            out.push_back(byte ^ ESCAPE_XOR);
        } else {
            out.push_back(byte);
        }
    }
    out.push_back(FLAG);
}

pub struct Pppos {
    our_addr: [u8; 4],

    rx:       Vec<u8>,
    in_frame: bool,
    escaped:  bool,

    rx_queue: VecDeque<Vec<u8>>,
    tx_bytes: VecDeque<u8>,

    lcp_ours_acked:  bool,
    lcp_peer_acked:  bool,
    ipcp_sent:       bool,
    ipcp_ours_acked: bool,
    ipcp_peer_acked: bool,

    id:           u8,
    last_restart: u32
}

impl Pppos {
    pub fn new(our_addr: [u8; 4]) -> Pppos {
        Pppos {
            our_addr,
            rx:       Vec::new(),
            in_frame: false,
            escaped:  false,
            rx_queue: VecDeque::new(),
            tx_bytes: VecDeque::new(),
            lcp_ours_acked:  false,
            lcp_peer_acked:  false,
            ipcp_sent:       false,
            ipcp_ours_acked: false,
            ipcp_peer_acked: false,
            id:           0,
            last_restart: 0
        }
    }

    pub fn our_addr(&self) -> [u8; 4] {
        self.our_addr
    }

    /// Starts negotiation by sending the first LCP Configure-Request.
    pub fn connect(&mut self) {
        self.send_lcp_conf_req();
    }

    pub fn link_up(&self) -> bool {
        self.lcp_up() && self.ipcp_ours_acked && self.ipcp_peer_acked
    }

    fn lcp_up(&self) -> bool {
        self.lcp_ours_acked && self.lcp_peer_acked
    }

    /// Feeds one received line byte (the `pppos_input` shape).
    pub fn input(&mut self, byte: u8) {
        match byte {
            FLAG => {
                if self.in_frame && !self.rx.is_empty() {
                    self.end_frame()
                }
                self.in_frame = true;
                self.escaped = false;
                self.rx.clear();
            }
            ESCAPE if self.in_frame => self.escaped = true,
            byte if self.in_frame => {
                let byte = if self.escaped {
                    self.escaped = false;
                    byte ^ ESCAPE_XOR
                } else {
                    byte
                };
                if self.rx.len() < MAX_FRAME {
                    self.rx.push(byte)
                } else {
                    // runaway frame, drop it
                    self.in_frame = false
                }
            }
            _ => ()
        }
    }

    /// Drains the UART into the framer and the transmit queue into the
    /// UART. Called from the service loop.
    pub fn pump(&mut self, serial: &mut dyn Serial) {
        while let Some(byte) = serial.read() {
            self.input(byte)
        }
        while let Some(byte) = self.tx_bytes.pop_front() {
            serial.write(byte)
        }
    }

    /// Retransmits outstanding Configure-Requests until the link is up.
    pub fn poll(&mut self, clock: &dyn Clock) {
        if self.link_up() {
            return
        }
        if elapsed(clock, &mut self.last_restart, RESTART_MS) {
            if !self.lcp_ours_acked {
                self.send_lcp_conf_req()
            } else if !self.ipcp_ours_acked {
                self.send_ipcp_conf_req()
            }
        }
    }

    fn end_frame(&mut self) {
        let frame = core::mem::take(&mut self.rx);
        self.in_frame = false;
        if frame.len() < 4 {
            return
        }

        let (body, fcs_bytes) = frame.split_at(frame.len() - 2);
        let fcs = u16::from_le_bytes([fcs_bytes[0], fcs_bytes[1]]);
        if fcs != FCS.checksum(body) {
            debug!("ppp: FCS mismatch, dropping frame");
            return
        }

        let mut body = body;
        if body.len() >= 2 && body[0] == ADDRESS && body[1] == CONTROL {
            body = &body[2..];
        }
        if body.len() < 2 {
            return
        }
        let protocol = u16::from_be_bytes([body[0], body[1]]);
        let payload = body[2..].to_vec();

        match protocol {
            PROTO_LCP  => self.process_cp(PROTO_LCP, &payload),
            PROTO_IPCP if self.lcp_up() => self.process_cp(PROTO_IPCP, &payload),
            PROTO_IP   if self.link_up() => self.rx_queue.push_back(payload),
            _ => debug!("ppp: dropping protocol {:#06x} frame", protocol)
        }
    }

    fn process_cp(&mut self, protocol: u16, payload: &[u8]) {
        if payload.len() < 4 {
            return
        }
        let code = payload[0];
        let id = payload[1];
        let length = u16::from_be_bytes([payload[2], payload[3]]) as usize;
        if length < 4 || length > payload.len() {
            return
        }
        let options = payload[4..length].to_vec();

        match code {
            CODE_CONF_REQ => self.process_conf_req(protocol, id, &options),
            CODE_CONF_ACK => {
                if id == self.id {
                    match protocol {
                        PROTO_LCP  => self.lcp_ours_acked = true,
                        PROTO_IPCP => self.ipcp_ours_acked = true,
                        _ => ()
                    }
                    self.advance()
                }
            }
            CODE_CONF_NAK if protocol == PROTO_IPCP => {
                // adopt the suggested address and ask again
                if options.len() >= 6 && options[0] == IPCP_OPT_ADDR && options[1] == 6 {
                    self.our_addr.copy_from_slice(&options[2..6]);
                }
                self.send_ipcp_conf_req()
            }
            CODE_CONF_NAK | CODE_CONF_REJ => {
                match protocol {
                    PROTO_LCP  => self.send_lcp_conf_req(),
                    PROTO_IPCP => self.send_ipcp_conf_req(),
                    _ => ()
                }
            }
            CODE_TERM_REQ => {
                self.send_cp(protocol, CODE_TERM_ACK, id, &[]);
                self.lcp_ours_acked = false;
                self.lcp_peer_acked = false;
                self.ipcp_sent = false;
                self.ipcp_ours_acked = false;
                self.ipcp_peer_acked = false;
                info!("ppp: link terminated by peer");
            }
            CODE_ECHO_REQ if protocol == PROTO_LCP && self.lcp_up() => {
                self.send_cp(PROTO_LCP, CODE_ECHO_REPLY, id, &options)
            }
            _ => ()
        }
    }

    fn process_conf_req(&mut self, protocol: u16, id: u8, options: &[u8]) {
        // no authentication: reject any auth option, accept the rest
        let mut rejected = Vec::new();
        let mut cursor = options;
        while cursor.len() >= 2 {
            let kind = cursor[0];
            let len = (cursor[1] as usize).max(2).min(cursor.len());
            if protocol == PROTO_LCP && kind == LCP_OPT_AUTH {
                rejected.extend_from_slice(&cursor[..len]);
            }
            cursor = &cursor[len..];
        }

        if !rejected.is_empty() {
            self.send_cp(protocol, CODE_CONF_REJ, id, &rejected);
            return
        }

        self.send_cp(protocol, CODE_CONF_ACK, id, options);
        match protocol {
            PROTO_LCP  => self.lcp_peer_acked = true,
            PROTO_IPCP => self.ipcp_peer_acked = true,
            _ => ()
        }
        self.advance()
    }

    /// Moves negotiation forward once LCP completes.
    fn advance(&mut self) {
        if self.lcp_up() && !self.ipcp_sent {
            self.send_ipcp_conf_req()
        }
        if self.link_up() {
            info!("ppp: link is up, local address {}.{}.{}.{}",
                  self.our_addr[0], self.our_addr[1],
                  self.our_addr[2], self.our_addr[3]);
        }
    }

    fn send_lcp_conf_req(&mut self) {
        self.id = self.id.wrapping_add(1);
        let id = self.id;
        self.send_cp(PROTO_LCP, CODE_CONF_REQ, id, &[]);
    }

    fn send_ipcp_conf_req(&mut self) {
        self.id = self.id.wrapping_add(1);
        self.ipcp_sent = true;
        let mut option = vec![IPCP_OPT_ADDR, 6];
        option.extend_from_slice(&self.our_addr);
        let id = self.id;
        self.send_cp(PROTO_IPCP, CODE_CONF_REQ, id, &option);
    }

    fn send_cp(&mut self, protocol: u16, code: u8, id: u8, options: &[u8]) {
        let length = (4 + options.len()) as u16;
        let mut payload = vec![code, id];
        payload.extend_from_slice(&length.to_be_bytes());
        payload.extend_from_slice(options);
        self.send_frame(protocol, &payload)
    }

    fn send_frame(&mut self, protocol: u16, payload: &[u8]) {
        let mut body = vec![ADDRESS, CONTROL];
        body.extend_from_slice(&protocol.to_be_bytes());
        body.extend_from_slice(payload);
        stuff_into(&mut self.tx_bytes, &body)
    }
}

pub struct PppRxToken {
    packet: Vec<u8>
}

impl phy::RxToken for PppRxToken {
    fn consume<R, F>(self, f: F) -> R
        where F: FnOnce(&[u8]) -> R
    {
        f(&self.packet)
    }
}

pub struct PppTxToken<'a> {
    ppp: &'a mut Pppos
}

impl<'a> phy::TxToken for PppTxToken<'a> {
    fn consume<R, F>(self, len: usize, f: F) -> R
        where F: FnOnce(&mut [u8]) -> R
    {
        let mut packet = vec![0; len];
        let result = f(&mut packet);
        if self.ppp.link_up() {
            self.ppp.send_frame(PROTO_IP, &packet)
        }
        result
    }
}

impl Device for Pppos {
    type RxToken<'a> = PppRxToken;
    type TxToken<'a>
        = PppTxToken<'a>
    where
        Self: 'a;

    fn receive(&mut self, _timestamp: Instant)
              -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let packet = self.rx_queue.pop_front()?;
        Some((PppRxToken { packet }, PppTxToken { ppp: self }))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        Some(PppTxToken { ppp: self })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ip;
        caps.max_transmission_unit = 1500;
        caps
    }
}

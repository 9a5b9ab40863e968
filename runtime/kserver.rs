//! Socket plumbing between smoltcp and the protocol engines.
//!
//! One control socket (one session at a time; while it is occupied further
//! connection attempts find no listener and are reset without disturbing
//! the running kernel) and one always-on monitor/injection socket.
//! `service` is called from the supervisor loop after every interface poll
//! and never blocks.

use alloc::vec;
use alloc::vec::Vec;

use smoltcp::iface::{SocketHandle, SocketSet};
use smoltcp::socket::tcp;
use smoltcp::time::Duration;

use crate::moninj::{Monitor, MONINJ_PORT};
use crate::session::{Context, Session, CONTROL_PORT};

const CONTROL_BUFFER: usize = 65536;
const MONINJ_BUFFER:  usize = 2048;

pub struct KServer {
    control:     SocketHandle,
    moninj:      SocketHandle,
    session:     Option<Session>,
    control_tx:  Vec<u8>,
    monitor:     Monitor,
    moninj_up:   bool,
    moninj_tx:   Vec<u8>
}

fn socket_buffers(size: usize) -> (tcp::SocketBuffer<'static>, tcp::SocketBuffer<'static>) {
    (tcp::SocketBuffer::new(vec![0; size]),
     tcp::SocketBuffer::new(vec![0; size]))
}

impl KServer {
    pub fn new(sockets: &mut SocketSet) -> KServer {
        let (control_rx, control_tx) = socket_buffers(CONTROL_BUFFER);
        let (moninj_rx, moninj_tx) = socket_buffers(MONINJ_BUFFER);
        KServer {
            control:    sockets.add(tcp::Socket::new(control_rx, control_tx)),
            moninj:     sockets.add(tcp::Socket::new(moninj_rx, moninj_tx)),
            session:    None,
            control_tx: Vec::new(),
            monitor:    Monitor::new(),
            moninj_up:  false,
            moninj_tx:  Vec::new()
        }
    }

    pub fn session_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn service(&mut self, sockets: &mut SocketSet, ctx: &mut Context) {
        self.service_control(sockets, ctx);
        self.service_moninj(sockets, ctx);
    }

    fn service_control(&mut self, sockets: &mut SocketSet, ctx: &mut Context) {
        let socket = sockets.get_mut::<tcp::Socket>(self.control);

        if !socket.is_open() {
            if let Err(err) = socket.listen(CONTROL_PORT) {
                warn!("session: cannot listen: {}", err);
                return
            }
        }

        if self.session.is_none() && socket.is_active() {
            socket.set_timeout(Some(Duration::from_millis(2250)));
            socket.set_keep_alive(Some(Duration::from_millis(500)));
            if let Some(endpoint) = socket.remote_endpoint() {
                info!("new connection from {}", endpoint);
            }
            self.session = Some(Session::new());
        }

        let Some(session) = self.session.as_mut() else { return };

        let mut fatal = false;
        while socket.can_recv() && !fatal {
            let mut chunk = [0; 512];
            match socket.recv_slice(&mut chunk) {
                Ok(0) => break,
                Ok(length) => {
                    if session.on_data(ctx, &chunk[..length], &mut self.control_tx)
                              .is_err() {
                        fatal = true
                    }
                }
                Err(_) => break
            }
        }

        session.poll(ctx, &mut self.control_tx);

        while !self.control_tx.is_empty() && socket.can_send() {
            match socket.send_slice(&self.control_tx) {
                Ok(0) | Err(_) => break,
                Ok(sent) => {
                    self.control_tx.drain(..sent);
                }
            }
        }

        if fatal {
            error!("session aborted: unrecoverable protocol error");
            session.close(ctx);
            socket.abort();
            self.session = None;
            self.control_tx.clear();
        } else if !socket.is_active() || !socket.may_recv() {
            info!("connection closed");
            session.close(ctx);
            socket.close();
            self.session = None;
            self.control_tx.clear();
        }
    }

    fn service_moninj(&mut self, sockets: &mut SocketSet, ctx: &mut Context) {
        let socket = sockets.get_mut::<tcp::Socket>(self.moninj);

        if !socket.is_open() {
            if let Err(err) = socket.listen(MONINJ_PORT) {
                warn!("moninj: cannot listen: {}", err);
                return
            }
        }

        if !self.moninj_up && socket.is_active() {
            self.monitor.reset();
            self.moninj_up = true;
        }
        if !self.moninj_up {
            return
        }

        let kernel_running = ctx.kernel.running();
        let mut fatal = false;
        while socket.can_recv() && !fatal {
            let mut chunk = [0; 128];
            match socket.recv_slice(&mut chunk) {
                Ok(0) => break,
                Ok(length) => {
                    if self.monitor.on_data(ctx.bridge.rtio(), kernel_running,
                                            &chunk[..length], &mut self.moninj_tx)
                                   .is_err() {
                        fatal = true
                    }
                }
                Err(_) => break
            }
        }

        self.monitor.poll(ctx.bridge.rtio(), ctx.clock, &mut self.moninj_tx);

        while !self.moninj_tx.is_empty() && socket.can_send() {
            match socket.send_slice(&self.moninj_tx) {
                Ok(0) | Err(_) => break,
                Ok(sent) => {
                    self.moninj_tx.drain(..sent);
                }
            }
        }

        if fatal {
            error!("moninj: protocol error, dropping connection");
            socket.abort();
        }
        if fatal || !socket.is_active() || !socket.may_recv() {
            if socket.is_active() {
                socket.close()
            }
            self.monitor.reset();
            self.moninj_up = false;
            self.moninj_tx.clear();
        }
    }
}

//! Control-port session engine.
//!
//! A single poll-driven state machine: `on_data` consumes whatever the
//! socket has buffered and `poll` pumps kernel mailbox traffic; neither ever
//! blocks, so the network stack keeps running between frames. Replies are
//! appended to the caller's transmit queue.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as FmtWrite;
use log::Level;

use board::clock::Clock;
use board::config;
use proto::frame::{self, Frame, Framer};
use proto::kern_proto::Message as KernMessage;
use proto::session_proto::{Request, Reply, ErrorKind};

use crate::bridge::Bridge;
use crate::kernel;
use crate::logger::BufferLogger;

pub const CONTROL_PORT: u16 = 1381;

/// Everything the engine acts upon, bundled by the supervisor and passed by
/// reference; nothing here is global.
pub struct Context<'a, 'h> {
    pub clock:    &'a dyn Clock,
    pub store:    &'a mut config::Store<'h>,
    pub bridge:   &'a mut Bridge<'h>,
    pub kernel:   &'a mut (dyn kernel::Host + 'h),
    pub logger:   &'a BufferLogger,
    /// Final timeline cursor of the last kernel run, for host telemetry.
    pub now_save: &'a mut Option<u64>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    RpcWait,
    Closing
}

#[derive(Fail, Debug)]
pub enum Error {
    #[fail(display = "malformed frame: {}", _0)]
    Frame(#[cause] frame::Error)
}

pub struct Session {
    state:      State,
    framer:     Framer,
    kernel_log: String,
    entry_now:  u64
}

fn send(tx: &mut Vec<u8>, reply: Reply) {
    // a Vec sink cannot fail
    let _ = reply.write_to(tx);
}

impl Session {
    pub fn new() -> Session {
        Session {
            state:      State::Idle,
            framer:     Framer::new(),
            kernel_log: String::new(),
            entry_now:  0
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Feeds received connection bytes; any complete frames are processed
    /// and replies appended to `tx`. A framing error is fatal for the
    /// connection (there is no way to resynchronize the stream).
    pub fn on_data(&mut self, ctx: &mut Context, data: &[u8], tx: &mut Vec<u8>)
                  -> Result<(), Error> {
        self.framer.feed(data);
        loop {
            match self.framer.pop() {
                Ok(Some(frame)) => self.process_frame(ctx, &frame, tx),
                Ok(None) => return Ok(()),
                Err(err) => {
                    ctx.logger.record(Level::Error, "session",
                                      format_args!("{}", err));
                    self.recover(ctx, tx, ErrorKind::Protocol, "malformed frame");
                    return Err(Error::Frame(err))
                }
            }
        }
    }

    /// Pumps kernel mailbox traffic. Called from the service loop whether
    /// or not the socket has data.
    pub fn poll(&mut self, ctx: &mut Context, tx: &mut Vec<u8>) {
        while let Some(message) = ctx.kernel.recv() {
            self.process_kern_message(ctx, message, tx)
        }
    }

    /// Session teardown: stops any running kernel and returns the bridge to
    /// the runtime. Always safe to call.
    pub fn close(&mut self, ctx: &mut Context) {
        if self.state != State::Idle {
            info!("stopping kernel on session teardown");
        }
        ctx.kernel.stop();
        ctx.bridge.start();
        self.state = State::Closing;
    }

    /// Error recovery shared by every protocol violation: the fault is
    /// recorded, a running kernel is stopped, and the session returns to
    /// `Idle` with the TCP connection left open.
    fn recover(&mut self, ctx: &mut Context, tx: &mut Vec<u8>,
               kind: ErrorKind, message: &str) {
        ctx.logger.record(Level::Error, "session", format_args!("{}", message));
        if self.state == State::Running || self.state == State::RpcWait {
            ctx.kernel.stop();
            ctx.bridge.start();
        }
        self.state = State::Idle;
        send(tx, Reply::Error { kind, message });
    }

    fn drain_log(&mut self, ctx: &mut Context) -> Vec<u8> {
        self.flush_kernel_log(ctx);
        match ctx.logger.buffer() {
            Ok(mut buffer) => {
                let snapshot = buffer.extract().as_bytes().to_vec();
                buffer.clear();
                snapshot
            }
            Err(()) => Vec::new()
        }
    }

    fn flush_kernel_log(&mut self, ctx: &mut Context) {
        if self.kernel_log.is_empty() {
            return
        }
        for line in self.kernel_log.lines() {
            ctx.logger.record(Level::Info, "kernel", format_args!("{}", line))
        }
        self.kernel_log.clear()
    }

    fn process_frame(&mut self, ctx: &mut Context, frame: &Frame, tx: &mut Vec<u8>) {
        let request = match Request::parse(frame) {
            Ok(request) => request,
            Err(_) => {
                self.recover(ctx, tx, ErrorKind::Protocol, "unrecognized request");
                return
            }
        };
        self.process_host_request(ctx, request, tx)
    }

    fn process_host_request(&mut self, ctx: &mut Context, request: Request,
                            tx: &mut Vec<u8>) {
        debug!("comm<-host {:?}", request);
        match (self.state, request) {
            (_, Request::Ident) =>
                send(tx, Reply::Ident(crate::IDENT)),

            (_, Request::Log) => {
                let snapshot = self.drain_log(ctx);
                send(tx, Reply::Log(&snapshot))
            }

            // Stop is legal in every state and idempotent.
            (_, Request::StopKernel) => {
                ctx.kernel.stop();
                ctx.bridge.start();
                self.state = State::Idle;
                send(tx, Reply::StopCompleted)
            }

            (State::Idle, Request::SwitchClock(source)) => {
                if ctx.bridge.switch_clock(source) {
                    info!("RTIO clock switched to source {}", source);
                    send(tx, Reply::ClockSwitchCompleted)
                } else {
                    ctx.logger.record(Level::Error, "session",
                        format_args!("RTIO clock switch to source {} failed", source));
                    send(tx, Reply::ClockSwitchFailed)
                }
            }

            (State::Idle, Request::LoadKernel(image)) =>
                match ctx.kernel.load(&image) {
                    Ok(()) => send(tx, Reply::LoadCompleted),
                    Err(err) => {
                        let mut description = String::new();
                        let _ = write!(&mut description, "{}", err);
                        ctx.logger.record(Level::Error, "session",
                                          format_args!("{}", description));
                        send(tx, Reply::Error {
                            kind: ErrorKind::BadImage,
                            message: &description
                        })
                    }
                },

            (State::Idle, Request::RunKernel { name }) =>
                match ctx.kernel.start(&name) {
                    Ok(()) => {
                        self.entry_now = ctx.bridge.now();
                        self.state = State::Running;
                        // the reply is the kernel's terminal status
                    }
                    Err(err) => {
                        let mut description = String::new();
                        let _ = write!(&mut description, "{}", err);
                        self.recover(ctx, tx, ErrorKind::Protocol, &description)
                    }
                },

            (State::RpcWait, Request::RpcReply { tag, data }) => {
                match ctx.kernel.send(&KernMessage::RpcReply { tag, data }) {
                    Ok(()) => self.state = State::Running,
                    Err(err) => {
                        let mut description = String::new();
                        let _ = write!(&mut description, "{}", err);
                        self.recover(ctx, tx, ErrorKind::Protocol, &description)
                    }
                }
            }

            (State::Idle, Request::FlashRead { key }) => {
                let value = ctx.store.get(&key).unwrap_or_default();
                send(tx, Reply::FlashRead(&value))
            }

            (State::Idle, Request::FlashWrite { key, value }) =>
                match ctx.store.write(&key, &value) {
                    Ok(()) => send(tx, Reply::FlashOk),
                    Err(err) => self.flash_error(ctx, tx, err)
                },

            (State::Idle, Request::FlashRemove { key }) =>
                match ctx.store.remove(&key) {
                    Ok(()) => send(tx, Reply::FlashOk),
                    Err(err) => self.flash_error(ctx, tx, err)
                },

            (State::Idle, Request::FlashErase) =>
                match ctx.store.erase() {
                    Ok(()) => send(tx, Reply::FlashOk),
                    Err(err) => self.flash_error(ctx, tx, err)
                },

            (state, request) => {
                let mut description = String::new();
                let _ = write!(&mut description,
                               "request {:?} in {:?} state", request, state);
                self.recover(ctx, tx, ErrorKind::Protocol, &description)
            }
        }
    }

    fn flash_error(&mut self, ctx: &mut Context, tx: &mut Vec<u8>,
                   err: config::Error) {
        let kind = match err {
            config::Error::SpaceExhausted => ErrorKind::FlashFull,
            config::Error::KeyInvalid |
            config::Error::Utf8Error => ErrorKind::Protocol,
            config::Error::WriteFail { .. } => ErrorKind::Hardware,
            // erase verification failure is beyond repair from here
            config::Error::EraseFail { .. } => ErrorKind::Unrecoverable
        };
        let mut description = String::new();
        let _ = write!(&mut description, "{}", err);
        ctx.logger.record(Level::Error, "session",
                          format_args!("{}", description));
        send(tx, Reply::Error { kind, message: &description })
    }

    fn process_kern_message(&mut self, ctx: &mut Context, message: KernMessage,
                            tx: &mut Vec<u8>) {
        match (self.state, message) {
            (State::Running, KernMessage::Log(bytes)) |
            (State::RpcWait, KernMessage::Log(bytes)) => {
                self.kernel_log.push_str(&String::from_utf8_lossy(&bytes));
                if self.kernel_log.ends_with('\n') {
                    self.flush_kernel_log(ctx)
                }
            }

            (State::Running, KernMessage::NowSave(now)) => {
                if now < self.entry_now {
                    warn!("kernel reported a timeline cursor behind its entry point");
                }
                *ctx.now_save = Some(now);
            }

            (State::Running, KernMessage::RpcCall { service, tag, data }) => {
                send(tx, Reply::RpcCall {
                    service,
                    tag: &tag,
                    data: &data
                });
                self.state = State::RpcWait;
            }

            (State::Running, KernMessage::RunFinished) => {
                ctx.kernel.stop();
                ctx.bridge.start();
                self.state = State::Idle;
                send(tx, Reply::KernelFinished)
            }

            (State::Running, KernMessage::Exception { kind, message, backtrace }) |
            (State::RpcWait, KernMessage::Exception { kind, message, backtrace }) => {
                ctx.kernel.stop();
                ctx.bridge.start();
                self.state = State::Idle;
                ctx.logger.record(Level::Error, "kernel",
                                  format_args!("{}", message));
                // drain the ring into the terminal reply so that nothing is
                // lost across the teardown
                let log = self.drain_log(ctx);
                send(tx, Reply::KernelException {
                    kind,
                    message:   &message,
                    backtrace: &backtrace,
                    log:       &log
                })
            }

            (state, message) => {
                let mut description = String::new();
                let _ = write!(&mut description,
                               "kernel message {:?} in {:?} state", message, state);
                self.recover(ctx, tx, ErrorKind::Protocol, &description)
            }
        }
    }
}

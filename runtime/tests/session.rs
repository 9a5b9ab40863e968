//! End-to-end session scenarios over in-memory transports: the engine is
//! fed host frames directly and paired with either a scripted kernel host
//! or the real UP host and loader.

mod common;

use std::collections::VecDeque;

use board::config::Store;
use board::sim::{SimClock, SimFlash, SimRtio};
use proto::kern_proto::Message;
use proto::session_proto::ExceptionKind;

use runtime::bridge::Bridge;
use runtime::kernel::{self, Host};
use runtime::logger::{BufferLogger, LOG_RING_SIZE};
use runtime::session::{Context, Session, State};

use common::*;

/// Scripted kernel: `load` accepts anything, `start` begins draining the
/// script, and an `RpcReply` from the runtime releases the continuation.
struct MockKernel {
    loaded:   bool,
    running:  bool,
    script:   VecDeque<Message>,
    on_reply: VecDeque<Message>,
    sent:     Vec<Message>
}

impl MockKernel {
    fn new() -> MockKernel {
        MockKernel {
            loaded:   false,
            running:  false,
            script:   VecDeque::new(),
            on_reply: VecDeque::new(),
            sent:     Vec::new()
        }
    }
}

impl Host for MockKernel {
    fn load(&mut self, _image: &[u8]) -> Result<(), kernel::Error> {
        self.stop();
        self.loaded = true;
        Ok(())
    }

    fn start(&mut self, _entry: &str) -> Result<(), kernel::Error> {
        if !self.loaded {
            return Err(kernel::Error::NotLoaded)
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
        self.script.clear();
        self.on_reply.clear();
    }

    fn send(&mut self, message: &Message) -> Result<(), kernel::Error> {
        if let Message::RpcReply { .. } = message {
            while let Some(queued) = self.on_reply.pop_front() {
                self.script.push_back(queued)
            }
        }
        self.sent.push(message.clone());
        Ok(())
    }

    fn recv(&mut self) -> Option<Message> {
        if self.running {
            self.script.pop_front()
        } else {
            None
        }
    }

    fn running(&self) -> bool {
        self.running
    }
}

struct Fixture {
    flash:    SimFlash,
    rtio:     SimRtio,
    clock:    SimClock,
    logger:   &'static BufferLogger,
    now_save: Option<u64>
}

impl Fixture {
    fn new() -> Fixture {
        let storage = Box::leak(vec![0u8; LOG_RING_SIZE].into_boxed_slice());
        Fixture {
            flash:    SimFlash::new(4096, 2),
            rtio:     SimRtio::new(),
            clock:    SimClock::new(),
            logger:   Box::leak(Box::new(BufferLogger::new(storage))),
            now_save: None
        }
    }
}

/// Runs `steps` (raw host bytes) through a fresh session against `kernel`,
/// polling the mailbox after each step, and returns the decoded replies
/// plus the session's final state.
fn drive(fixture: &mut Fixture, kernel: &mut dyn Host, steps: &[Vec<u8>])
        -> (Vec<HostReply>, State) {
    let mut store = Store::open(&mut fixture.flash).unwrap();
    let mut bridge = Bridge::new(&mut fixture.rtio, 2);
    bridge.start();

    let mut session = Session::new();
    let mut tx = Vec::new();
    {
        let mut ctx = Context {
            clock:    &fixture.clock,
            store:    &mut store,
            bridge:   &mut bridge,
            kernel,
            logger:   fixture.logger,
            now_save: &mut fixture.now_save
        };
        for step in steps {
            session.on_data(&mut ctx, step, &mut tx).unwrap();
            session.poll(&mut ctx, &mut tx);
        }
        // drain any remaining kernel traffic
        for _ in 0..4 {
            session.poll(&mut ctx, &mut tx);
        }
    }
    (decode_replies(&tx), session.state())
}

#[test]
fn s2_ident_contains_build_string() {
    let mut fixture = Fixture::new();
    let mut kernel = MockKernel::new();
    let (replies, state) = drive(&mut fixture, &mut kernel, &[req_ident()]);
    match &replies[..] {
        [HostReply::Ident(ident)] => {
            assert!(!ident.is_empty());
            assert!(ident.contains("ARTIQ runtime built"), "ident = {:?}", ident);
        }
        other => panic!("unexpected replies: {:?}", other)
    }
    assert_eq!(state, State::Idle);
}

#[test]
fn s3_bad_image_is_rejected_and_session_stays_idle() {
    let mut fixture = Fixture::new();
    let mut window = vec![0u8; 128 * 1024];
    let mut kernel = runtime::kernel::up::Up::new(&mut window, 0x4080_0000);

    let (replies, state) = drive(&mut fixture, &mut kernel,
                                 &[req_load_kernel(&[0x12; 12]), req_ident()]);
    match &replies[..] {
        [HostReply::Error { kind, .. }, HostReply::Ident(_)] => {
            // BadImage
            assert_eq!(*kind, 1);
        }
        other => panic!("unexpected replies: {:?}", other)
    }
    assert_eq!(state, State::Idle);
}

#[test]
fn valid_image_loads_through_the_real_loader() {
    let mut fixture = Fixture::new();
    let mut window = vec![0u8; 128 * 1024];
    let mut kernel = runtime::kernel::up::Up::new(&mut window, 0x4080_0000);

    let image = test_kernel_image(0x4080_0000);
    let (replies, state) = drive(&mut fixture, &mut kernel,
                                 &[req_load_kernel(&image)]);
    assert_eq!(replies, vec![HostReply::LoadCompleted]);
    assert_eq!(state, State::Idle);
}

#[test]
fn s4_rpc_roundtrip_and_clean_finish() {
    let mut fixture = Fixture::new();
    let mut kernel = MockKernel::new();
    kernel.script.push_back(Message::RpcCall {
        service: 1,
        tag:     b"i".to_vec(),
        data:    vec![42, 0, 0, 0]
    });
    kernel.on_reply.push_back(Message::Log(b"rpc done\n".to_vec()));
    kernel.on_reply.push_back(Message::NowSave(2_000_000));
    kernel.on_reply.push_back(Message::RunFinished);

    let (replies, state) = drive(&mut fixture, &mut kernel, &[
        req_load_kernel(b"unused"),
        req_run_kernel("run_kernel"),
        rpc_reply(b"i", &[84, 0, 0, 0])
    ]);

    assert_eq!(replies, vec![
        HostReply::LoadCompleted,
        HostReply::RpcCall { service: 1, tag: b"i".to_vec(), data: vec![42, 0, 0, 0] },
        HostReply::KernelFinished
    ]);
    assert_eq!(state, State::Idle);
    assert!(!kernel.running());
    assert_eq!(kernel.sent, vec![Message::RpcReply {
        tag: b"i".to_vec(), data: vec![84, 0, 0, 0]
    }]);

    // the run left no error records behind
    let mut buffer = fixture.logger.buffer().unwrap();
    let log = buffer.extract().to_string();
    assert!(!log.contains("ERROR"), "log = {:?}", log);
    assert!(log.contains("rpc done"));

    // prop 6: the reported final cursor is ahead of the cursor at entry
    assert_eq!(fixture.now_save, Some(2_000_000));
}

#[test]
fn s5_underflow_surfaces_as_terminal_exception() {
    let mut fixture = Fixture::new();
    let mut kernel = MockKernel::new();
    kernel.script.push_back(Message::Exception {
        kind:      ExceptionKind::RtioUnderflow,
        message:   "RTIO underflow at 1000 mu, channel 2, slack -125000 mu".into(),
        backtrace: vec![0x4080_0010, 0x4080_0044]
    });

    let (replies, state) = drive(&mut fixture, &mut kernel, &[
        req_load_kernel(b"unused"),
        req_run_kernel("run_kernel")
    ]);

    match &replies[..] {
        [HostReply::LoadCompleted,
         HostReply::KernelException { kind, message, backtrace, log }] => {
            assert_eq!(*kind, ExceptionKind::RtioUnderflow.to_u8());
            assert!(message.contains("RTIO underflow"));
            assert_eq!(backtrace, &[0x4080_0010, 0x4080_0044]);
            // the ring was drained into the terminal reply
            let log = String::from_utf8_lossy(log);
            assert!(log.contains("RTIO underflow"), "log = {:?}", log);
        }
        other => panic!("unexpected replies: {:?}", other)
    }
    assert_eq!(state, State::Idle);
    assert!(!kernel.running());

    // ... and cleared in the process
    let mut buffer = fixture.logger.buffer().unwrap();
    assert!(buffer.is_empty());
}

#[test]
fn stop_kernel_is_idempotent() {
    let mut fixture = Fixture::new();
    let mut kernel = MockKernel::new();

    let (replies, state) = drive(&mut fixture, &mut kernel, &[
        req_load_kernel(b"unused"),
        req_run_kernel("run_kernel"),
        req_stop_kernel(),
        req_stop_kernel()
    ]);
    assert_eq!(replies, vec![
        HostReply::LoadCompleted,
        HostReply::StopCompleted,
        HostReply::StopCompleted
    ]);
    assert_eq!(state, State::Idle);
    assert!(!kernel.running());
}

#[test]
fn out_of_state_request_stops_kernel_and_keeps_connection() {
    let mut fixture = Fixture::new();
    let mut kernel = MockKernel::new();

    let (replies, state) = drive(&mut fixture, &mut kernel, &[
        req_load_kernel(b"unused"),
        req_run_kernel("run_kernel"),
        // flash writes are not allowed while the kernel runs
        req_flash_write("ip", b"10.0.0.1"),
        req_ident()
    ]);

    match &replies[..] {
        [HostReply::LoadCompleted,
         HostReply::Error { kind, .. },
         HostReply::Ident(_)] => assert_eq!(*kind, 0),  // protocol error
        other => panic!("unexpected replies: {:?}", other)
    }
    assert_eq!(state, State::Idle);
    assert!(!kernel.running());
}

#[test]
fn unsolicited_rpc_reply_is_a_protocol_error() {
    let mut fixture = Fixture::new();
    let mut kernel = MockKernel::new();
    let (replies, state) = drive(&mut fixture, &mut kernel,
                                 &[rpc_reply(b"i", &[0, 0, 0, 0])]);
    match &replies[..] {
        [HostReply::Error { kind, .. }] => assert_eq!(*kind, 0),
        other => panic!("unexpected replies: {:?}", other)
    }
    assert_eq!(state, State::Idle);
}

#[test]
fn flash_requests_hit_the_store() {
    let mut fixture = Fixture::new();
    let mut kernel = MockKernel::new();
    let (replies, _) = drive(&mut fixture, &mut kernel, &[
        req_flash_write("ip", b"192.168.1.50"),
        req_flash_read("ip"),
        req_flash_read("missing")
    ]);
    assert_eq!(replies, vec![
        HostReply::FlashOk,
        HostReply::FlashRead(b"192.168.1.50".to_vec()),
        HostReply::FlashRead(Vec::new())
    ]);
}

#[test]
fn log_request_drains_the_ring() {
    let mut fixture = Fixture::new();
    let mut kernel = MockKernel::new();
    fixture.logger.record(log::Level::Info, "test",
                          format_args!("breadcrumb"));

    let (replies, _) = drive(&mut fixture, &mut kernel,
                             &[req_log(), req_log()]);
    match &replies[..] {
        [HostReply::Log(first), HostReply::Log(second)] => {
            assert!(String::from_utf8_lossy(first).contains("breadcrumb"));
            // the first request cleared the ring
            assert!(second.is_empty());
        }
        other => panic!("unexpected replies: {:?}", other)
    }
}

#[test]
fn switch_clock_reinitializes_the_bridge() {
    let mut fixture = Fixture::new();
    let mut kernel = MockKernel::new();
    let (replies, _) = drive(&mut fixture, &mut kernel, &[req_switch_clock(1)]);
    assert_eq!(replies, vec![HostReply::ClockSwitchCompleted]);
    assert_eq!(fixture.rtio.clock_source, 1);

    fixture.rtio.fail_clock_switch = true;
    let (replies, _) = drive(&mut fixture, &mut kernel, &[req_switch_clock(0)]);
    assert_eq!(replies, vec![HostReply::ClockSwitchFailed]);
}

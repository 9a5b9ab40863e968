//! Monitor/injection engine on the always-on secondary port.
//!
//! Read-only probe introspection works at any time; manual TTL/DDS
//! overrides are refused while a kernel owns the fabric. Watched probes are
//! rescanned every 200 ms and changes pushed to the host.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use board::clock::{elapsed, Clock};
use board::rtio::Rtio;
use proto::moninj_proto::{DeviceMessage, Error, HostMessage, MAGIC};

pub const MONINJ_PORT: u16 = 1383;

const SCAN_PERIOD_MS: u32 = 200;

pub struct Monitor {
    magic_seen:   usize,
    buf:          Vec<u8>,
    probe_watch:  BTreeMap<(u32, u8), Option<u32>>,
    inject_watch: BTreeMap<(u32, u8), Option<u8>>,
    last_scan:    u32
}

impl Monitor {
    pub fn new() -> Monitor {
        Monitor {
            magic_seen:   0,
            buf:          Vec::new(),
            probe_watch:  BTreeMap::new(),
            inject_watch: BTreeMap::new(),
            last_scan:    0
        }
    }

    /// Forgets connection state; watch lists do not survive a disconnect.
    pub fn reset(&mut self) {
        self.magic_seen = 0;
        self.buf.clear();
        self.probe_watch.clear();
        self.inject_watch.clear();
    }

    pub fn on_data(&mut self, rtio: &mut dyn Rtio, kernel_running: bool,
                   data: &[u8], tx: &mut Vec<u8>) -> Result<(), Error> {
        let mut data = data;
        while self.magic_seen < MAGIC.len() && !data.is_empty() {
            if data[0] != MAGIC[self.magic_seen] {
                return Err(Error::WrongMagic)
            }
            self.magic_seen += 1;
            data = &data[1..];
        }
        self.buf.extend_from_slice(data);

        loop {
            let (message, consumed) = match HostMessage::parse(&self.buf)? {
                Some(parsed) => parsed,
                None => return Ok(())
            };
            self.buf.drain(..consumed);
            trace!("moninj<-host {:?}", message);

            match message {
                HostMessage::MonitorProbe { enable, channel, probe } => {
                    if enable {
                        self.probe_watch.entry((channel, probe)).or_insert(None);
                    } else {
                        self.probe_watch.remove(&(channel, probe));
                    }
                }
                HostMessage::MonitorInjection { enable, channel, overrd } => {
                    if enable {
                        self.inject_watch.entry((channel, overrd)).or_insert(None);
                    } else {
                        self.inject_watch.remove(&(channel, overrd));
                    }
                }
                HostMessage::Inject { channel, overrd, value } => {
                    if kernel_running {
                        warn!("injection into channel {} refused: kernel running",
                              channel)
                    } else {
                        rtio.inject(channel, overrd, value)
                    }
                }
                HostMessage::GetInjectionStatus { channel, overrd } => {
                    let value = rtio.injection_status(channel, overrd);
                    let reply = DeviceMessage::InjectionStatus { channel, overrd, value };
                    trace!("moninj->host {:?}", reply);
                    let _ = reply.write_to(tx);
                }
            }
        }
    }

    pub fn poll(&mut self, rtio: &mut dyn Rtio, clock: &dyn Clock,
                tx: &mut Vec<u8>) {
        if !elapsed(clock, &mut self.last_scan, SCAN_PERIOD_MS) {
            return
        }

        for (&(channel, probe), previous) in self.probe_watch.iter_mut() {
            let current = rtio.monitor(channel, probe);
            if *previous != Some(current) {
                let message = DeviceMessage::MonitorStatus {
                    channel, probe, value: current
                };
                trace!("moninj->host {:?}", message);
                let _ = message.write_to(tx);
                *previous = Some(current);
            }
        }
        for (&(channel, overrd), previous) in self.inject_watch.iter_mut() {
            let current = rtio.injection_status(channel, overrd);
            if *previous != Some(current) {
                let message = DeviceMessage::InjectionStatus {
                    channel, overrd, value: current
                };
                trace!("moninj->host {:?}", message);
                let _ = message.write_to(tx);
                *previous = Some(current);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use board::sim::{SimClock, SimRtio};

    fn connect(monitor: &mut Monitor, rtio: &mut SimRtio) {
        let mut tx = Vec::new();
        monitor.on_data(rtio, false, MAGIC, &mut tx).unwrap();
        assert!(tx.is_empty());
    }

    fn probe_watch_request(channel: u32, probe: u8) -> Vec<u8> {
        let mut bytes = vec![0u8, 1];
        bytes.extend_from_slice(&channel.to_le_bytes());
        bytes.push(probe);
        bytes
    }

    #[test]
    fn wrong_magic_is_fatal() {
        let mut monitor = Monitor::new();
        let mut rtio = SimRtio::new();
        let mut tx = Vec::new();
        assert_eq!(monitor.on_data(&mut rtio, false, b"HTTP/1.1", &mut tx),
                   Err(Error::WrongMagic));
    }

    #[test]
    fn watched_probe_reports_changes_only() {
        let mut monitor = Monitor::new();
        let mut rtio = SimRtio::new();
        let clock = SimClock::new();
        connect(&mut monitor, &mut rtio);

        let mut tx = Vec::new();
        monitor.on_data(&mut rtio, false, &probe_watch_request(5, 0), &mut tx).unwrap();

        rtio.set_probe(5, 0, 17);
        clock.advance(SCAN_PERIOD_MS);
        monitor.poll(&mut rtio, &clock, &mut tx);
        assert_eq!(&tx[..], &[0, 5, 0, 0, 0, 0, 17, 0, 0, 0]);

        // unchanged: nothing new is pushed
        tx.clear();
        clock.advance(SCAN_PERIOD_MS);
        monitor.poll(&mut rtio, &clock, &mut tx);
        assert!(tx.is_empty());
    }

    #[test]
    fn injection_refused_while_kernel_runs() {
        let mut monitor = Monitor::new();
        let mut rtio = SimRtio::new();
        connect(&mut monitor, &mut rtio);

        let mut inject = vec![1u8];
        inject.extend_from_slice(&3u32.to_le_bytes());
        inject.push(0);
        inject.push(1);

        let mut tx = Vec::new();
        monitor.on_data(&mut rtio, true, &inject, &mut tx).unwrap();
        assert_eq!(rtio.injection_status(3, 0), 0);

        monitor.on_data(&mut rtio, false, &inject, &mut tx).unwrap();
        assert_eq!(rtio.injection_status(3, 0), 1);
    }
}

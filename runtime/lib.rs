#![cfg_attr(not(test), no_std)]

extern crate alloc;
extern crate byteorder;
extern crate crc;
extern crate failure;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
extern crate log_buffer;
extern crate smoltcp;

extern crate board;
extern crate io;
extern crate proto;

use core::fmt;

use smoltcp::iface::{Config, Interface, SocketSet};
use smoltcp::phy::{Device, Medium};
use smoltcp::time::Instant;
use smoltcp::wire::{HardwareAddress, IpAddress, IpCidr};

use board::clock::{elapsed, Clock};
use board::config::Store;
use board::rtio::Rtio;
use board::uart::Serial;
use board::{Flash, Leds, SocReset};

pub mod logger;
pub mod kernel;
pub mod bridge;
pub mod session;
pub mod moninj;
pub mod net;
pub mod ethmac;
pub mod ppp;
pub mod kserver;
pub mod test_mode;

use bridge::Bridge;
use kserver::KServer;
use logger::BufferLogger;
use net::NetDevice;

pub const IDENT: &str = concat!("ARTIQ runtime built ", env!("CARGO_PKG_VERSION"));

/// DDS channels behind the RTIO shim on this board family.
pub const DDS_CHANNEL_COUNT: u32 = 8;

/// Hardware handed over by the board support package. Everything the
/// runtime touches goes through this one context; nothing is file-scope.
pub struct Peripherals<'a> {
    pub clock:  &'a dyn Clock,
    pub serial: &'a mut dyn Serial,
    pub leds:   &'a mut dyn Leds,
    pub flash:  &'a mut dyn Flash,
    pub rtio:   &'a mut dyn Rtio,
    pub kernel: &'a mut (dyn kernel::Host + 'a),
    pub logger: &'a BufferLogger,
    /// Watchdog-equivalent whole-SoC reset, the answer to unrecoverable
    /// faults.
    pub reset:  &'a mut dyn SocReset
}

/// `fmt::Write` adaptor for the serial console.
pub struct Console<'a>(pub &'a mut dyn Serial);

impl<'a> fmt::Write for Console<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.0.write(b'\r')
            }
            self.0.write(byte)
        }
        Ok(())
    }
}

/// Blinks the LED three times at 100 ms on/off; any `t` received on the
/// console during the blink selects test mode.
fn blink_and_check_test_mode(clock: &dyn Clock, serial: &mut dyn Serial,
                             leds: &mut dyn Leds) -> bool {
    let mut test_mode = false;
    for _ in 0..3 {
        for &on in &[1u32, 0] {
            leds.set(on);
            let mut event = clock.get_ms();
            while !elapsed(clock, &mut event, 100) {
                if let Some(byte) = serial.read() {
                    if byte == b't' || byte == b'T' {
                        test_mode = true
                    }
                }
            }
        }
    }
    test_mode
}

/// Device boot. The BSP calls this once with interrupts enabled and the
/// logger registered; it never returns.
pub fn startup(mut peripherals: Peripherals, device: &mut NetDevice) -> ! {
    {
        use core::fmt::Write;
        let _ = writeln!(Console(&mut *peripherals.serial), "{}", IDENT);
        let _ = writeln!(Console(&mut *peripherals.serial),
                         "press 't' to enter test mode...");
    }

    let test_mode = blink_and_check_test_mode(peripherals.clock,
                                              peripherals.serial,
                                              peripherals.leds);
    if test_mode {
        info!("entering test mode");
        test_mode::run(peripherals)
    } else {
        info!("entering regular mode");
        regular_main(peripherals, device)
    }
}

fn regular_main(peripherals: Peripherals, device: &mut NetDevice) -> ! {
    let Peripherals { clock, serial, flash, rtio, kernel, logger, reset, .. } =
        peripherals;

    let mut store = match Store::open(flash) {
        Ok(store) => store,
        Err(err) => {
            logger.record(log::Level::Error, "supervisor",
                          format_args!("flash storage unrecoverable: {}", err));
            reset.reset()
        }
    };
    let mut bridge = Bridge::new(rtio, DDS_CHANNEL_COUNT);
    bridge.start();
    if let Err(err) = bridge.init_dds_all() {
        // hardware fault: log it and carry on without calibrated DDS
        logger.record(log::Level::Error, "bridge",
                      format_args!("DDS initialization failed: {}", err));
    }
    kernel.stop();

    let addresses = net::get_addresses(&store);
    let mut config = match device.capabilities().medium {
        Medium::Ethernet =>
            Config::new(HardwareAddress::Ethernet(addresses.hardware_addr)),
        _ => Config::new(HardwareAddress::Ip)
    };
    config.random_seed = u64::from_le_bytes([
        addresses.hardware_addr.0[0], addresses.hardware_addr.0[1],
        addresses.hardware_addr.0[2], addresses.hardware_addr.0[3],
        addresses.hardware_addr.0[4], addresses.hardware_addr.0[5],
        0x5a, 0x5a
    ]);

    let mut iface = Interface::new(config, device,
                                   Instant::from_millis(clock.get_ms() as i64));
    iface.update_ip_addrs(|addrs| {
        addrs.push(IpCidr::new(IpAddress::Ipv4(addresses.ipv4_addr),
                               addresses.prefix_len))
             .expect("cannot add interface address")
    });
    if let Err(err) = iface.routes_mut().add_default_ipv4_route(addresses.gateway) {
        warn!("cannot add default route: {:?}", err);
    }

    let mut sockets = SocketSet::new(alloc::vec::Vec::new());
    let mut kserver = KServer::new(&mut sockets);
    let mut now_save = None;

    match device {
        NetDevice::Eth(eth) => {
            eth.reset_phy();
            info!("accepting sessions on Ethernet");
        }
        NetDevice::Ppp(ppp) => {
            ppp.connect();
            info!("accepting sessions on serial (PPP)");
        }
    }

    loop {
        if let NetDevice::Ppp(ppp) = &mut *device {
            ppp.pump(serial);
            ppp.poll(clock);
        }

        let timestamp = Instant::from_millis(clock.get_ms() as i64);
        let _ = iface.poll(timestamp, device, &mut sockets);

        let mut ctx = session::Context {
            clock,
            store:    &mut store,
            bridge:   &mut bridge,
            kernel:   &mut *kernel,
            logger,
            now_save: &mut now_save
        };
        kserver.service(&mut sockets, &mut ctx);
    }
}

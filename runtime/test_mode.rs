//! Test-mode REPL on the serial console, entered with `t` during the boot
//! blink. Exercises the bridge, the DDS channels and the key/value store
//! directly, without the network stack.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use board::config::Store;
use board::Leds;

use crate::bridge::Bridge;
use crate::{Console, Peripherals};

fn parse_int(token: &str) -> Option<u32> {
    if let Some(hex) = token.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}

pub fn execute(line: &str, leds: &mut dyn Leds, store: &mut Store,
               bridge: &mut Bridge, out: &mut String) {
    let mut tokens = line.split_whitespace();
    let command = match tokens.next() {
        Some(command) => command,
        None => return
    };
    let args: Vec<&str> = tokens.collect();

    match (command, args.as_slice()) {
        ("help", _) => {
            let _ = writeln!(out, "available commands:");
            let _ = writeln!(out, "  leds <value>             - set LED outputs");
            let _ = writeln!(out, "  clksw <source>           - switch RTIO clock");
            let _ = writeln!(out, "  counter                  - read RTIO counter");
            let _ = writeln!(out, "  ddsinit                  - reset and calibrate all DDS");
            let _ = writeln!(out, "  ddsftw <ch> <ftw>        - set DDS frequency tuning word");
            let _ = writeln!(out, "  ddsw <ch> <addr> <data>  - write DDS register");
            let _ = writeln!(out, "  ddsr <ch> <addr>         - read DDS register");
            let _ = writeln!(out, "  fsread <key>             - read a config value");
            let _ = writeln!(out, "  fswrite <key> <value>    - write a config value");
            let _ = writeln!(out, "  fsrm <key>               - remove a config key");
            let _ = writeln!(out, "  fserase                  - erase the config region");
        }

        ("leds", [value]) => match parse_int(value) {
            Some(value) => leds.set(value),
            None => { let _ = writeln!(out, "invalid value"); }
        },

        ("clksw", [source]) => match parse_int(source) {
            Some(source) if source <= 1 => {
                if bridge.switch_clock(source as u8) {
                    let _ = writeln!(out, "clock switched");
                } else {
                    let _ = writeln!(out, "clock switch failed");
                }
            }
            _ => { let _ = writeln!(out, "invalid source"); }
        },

        ("counter", []) => {
            let _ = writeln!(out, "{}", bridge.rtio().counter());
        }

        ("ddsinit", []) => match bridge.init_dds_all() {
            Ok(()) => { let _ = writeln!(out, "DDS initialized"); }
            Err(err) => { let _ = writeln!(out, "DDS init failed: {}", err); }
        },

        ("ddsftw", [channel, ftw]) =>
            match (parse_int(channel), parse_int(ftw)) {
                (Some(channel), Some(ftw)) =>
                    match bridge.set_frequency(channel, ftw, 0, 0) {
                        Ok(()) => { let _ = writeln!(out, "ftw set"); }
                        Err(err) => { let _ = writeln!(out, "error: {}", err); }
                    },
                _ => { let _ = writeln!(out, "invalid arguments"); }
            },

        ("ddsw", [channel, addr, data]) =>
            match (parse_int(channel), parse_int(addr), parse_int(data)) {
                (Some(channel), Some(addr), Some(data)) =>
                    match bridge.write(channel, addr, data) {
                        Ok(()) => { let _ = writeln!(out, "ok"); }
                        Err(err) => { let _ = writeln!(out, "error: {}", err); }
                    },
                _ => { let _ = writeln!(out, "invalid arguments"); }
            },

        ("ddsr", [channel, addr]) =>
            match (parse_int(channel), parse_int(addr)) {
                (Some(channel), Some(addr)) =>
                    match bridge.read(channel, addr) {
                        Ok(data) => { let _ = writeln!(out, "{:#010x}", data); }
                        Err(err) => { let _ = writeln!(out, "error: {}", err); }
                    },
                _ => { let _ = writeln!(out, "invalid arguments"); }
            },

        ("fsread", [key]) => match store.get(key) {
            Some(value) => {
                let _ = writeln!(out, "{}", String::from_utf8_lossy(&value));
            }
            None => { let _ = writeln!(out, "(not found)"); }
        },

        ("fswrite", [key, value]) =>
            match store.write(key, value.as_bytes()) {
                Ok(()) => { let _ = writeln!(out, "ok"); }
                Err(err) => { let _ = writeln!(out, "error: {}", err); }
            },

        ("fsrm", [key]) => match store.remove(key) {
            Ok(()) => { let _ = writeln!(out, "ok"); }
            Err(err) => { let _ = writeln!(out, "error: {}", err); }
        },

        ("fserase", []) => match store.erase() {
            Ok(()) => { let _ = writeln!(out, "ok"); }
            Err(err) => { let _ = writeln!(out, "error: {}", err); }
        },

        _ => { let _ = writeln!(out, "unknown command, try help"); }
    }
}

pub fn run(peripherals: Peripherals) -> ! {
    let Peripherals { serial, leds, flash, rtio, .. } = peripherals;

    let mut store = match Store::open(flash) {
        Ok(store) => store,
        Err(err) => {
            let _ = writeln!(Console(&mut *serial),
                             "cannot open flash storage: {}", err);
            loop {}
        }
    };
    let mut bridge = Bridge::new(rtio, crate::DDS_CHANNEL_COUNT);
    bridge.start();

    let _ = writeln!(Console(&mut *serial), "test mode, type help for commands");
    let mut line = Vec::new();
    loop {
        let byte = match serial.read() {
            Some(byte) => byte,
            None => continue
        };

        if byte == b'\r' || byte == b'\n' {
            serial.write(b'\r');
            serial.write(b'\n');
            let command = String::from_utf8_lossy(&line).into_owned();
            let mut out = String::new();
            execute(&command, leds, &mut store, &mut bridge, &mut out);
            let _ = write!(Console(&mut *serial), "{}", out);
            line.clear();
        } else if byte == 0x08 || byte == 0x7f {
            if line.pop().is_some() {
                serial.write(0x08);
                serial.write(b' ');
                serial.write(0x08);
            }
        } else if line.len() < 256 {
            serial.write(byte);
            line.push(byte);
        }
    }
}

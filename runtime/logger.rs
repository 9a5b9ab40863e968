//! Logging: the `log` facade backed by a fixed wrap-around ring, mirrored to
//! the console below a configurable level. The ring writer never blocks and
//! overwrites the oldest bytes; readers take a linearized snapshot.

use core::cell::{Cell, RefCell, RefMut};
use core::fmt::Write;
use log::{Log, Level, LevelFilter};
use log_buffer::LogBuffer;

/// Ring size. Snapshots return at most one byte less, always the most
/// recent history.
pub const LOG_RING_SIZE: usize = 4096;

pub struct LogBufferRef<'a> {
    buffer:        RefMut<'a, LogBuffer<&'static mut [u8]>>,
    old_log_level: LevelFilter
}

impl<'a> LogBufferRef<'a> {
    fn new(buffer: RefMut<'a, LogBuffer<&'static mut [u8]>>) -> LogBufferRef<'a> {
        let old_log_level = log::max_level();
        log::set_max_level(LevelFilter::Off);
        LogBufferRef { buffer, old_log_level }
    }

    pub fn is_empty(&mut self) -> bool {
        self.extract().is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear()
    }

    /// Linearized snapshot, capped at `LOG_RING_SIZE - 1` bytes keeping the
    /// newest records.
    pub fn extract(&mut self) -> &str {
        let snapshot = self.buffer.extract();
        let mut start = snapshot.len().saturating_sub(LOG_RING_SIZE - 1);
        while !snapshot.is_char_boundary(start) {
            start += 1
        }
        &snapshot[start..]
    }
}

impl<'a> Drop for LogBufferRef<'a> {
    fn drop(&mut self) {
        log::set_max_level(self.old_log_level)
    }
}

pub struct BufferLogger {
    buffer:      RefCell<LogBuffer<&'static mut [u8]>>,
    uart_filter: Cell<LevelFilter>,
    console:     Cell<Option<fn(core::fmt::Arguments)>>,
    time_ms:     Cell<Option<fn() -> u32>>
}

static mut LOGGER: *const BufferLogger = core::ptr::null();

impl BufferLogger {
    pub fn new(buffer: &'static mut [u8]) -> BufferLogger {
        BufferLogger {
            buffer:      RefCell::new(LogBuffer::new(buffer)),
            uart_filter: Cell::new(LevelFilter::Info),
            console:     Cell::new(None),
            time_ms:     Cell::new(None)
        }
    }

    pub fn register<F: FnOnce()>(&'static self, f: F) {
        unsafe {
            LOGGER = self;
            log::set_logger(&*LOGGER)
                .expect("global logger can only be initialized once");
        }
        log::set_max_level(LevelFilter::Info);
        f();
    }

    pub fn with<R, F: FnOnce(&BufferLogger) -> R>(f: F) -> R {
        f(unsafe { &*LOGGER })
    }

    pub fn buffer<'a>(&'a self) -> Result<LogBufferRef<'a>, ()> {
        self.buffer
            .try_borrow_mut()
            .map(LogBufferRef::new)
            .map_err(|_| ())
    }

    pub fn set_uart_log_level(&self, max_level: LevelFilter) {
        self.uart_filter.set(max_level)
    }

    /// Console sink for the mirror path, typically the UART.
    pub fn set_console(&self, console: fn(core::fmt::Arguments)) {
        self.console.set(Some(console))
    }

    /// Timestamp source for record prefixes.
    pub fn set_time_source(&self, time_ms: fn() -> u32) {
        self.time_ms.set(Some(time_ms))
    }

    /// Appends one record to the ring, bypassing the global `log` filter.
    /// The session engine uses this for records that must survive into the
    /// ring regardless of filtering, e.g. error replies.
    pub fn record(&self, level: Level, target: &str, args: core::fmt::Arguments) {
        let timestamp = self.time_ms.get().map(|f| f()).unwrap_or(0);
        let seconds = timestamp / 1000;
        let millis  = timestamp % 1000;

        if let Ok(mut buffer) = self.buffer.try_borrow_mut() {
            let _ = writeln!(buffer, "[{:6}.{:03}s] {:>5}({}): {}",
                             seconds, millis, level, target, args);
        }

        if level <= self.uart_filter.get() {
            if let Some(console) = self.console.get() {
                console(format_args!("[{:6}.{:03}s] {:>5}({}): {}",
                                     seconds, millis, level, target, args))
            }
        }
    }
}

// single-CPU: the ring is only ever touched from the runtime CPU
unsafe impl Sync for BufferLogger {}

impl Log for BufferLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.record(record.level(), record.target(), *record.args())
        }
    }

    fn flush(&self) {
    }
}

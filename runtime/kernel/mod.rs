//! Kernel loading and supervision.
//!
//! The session engine drives kernels exclusively through the [`Host`]
//! capability; whether the kernel runs on a second CPU (`amp`) or on the
//! runtime CPU itself (`up`) is invisible to it.

use alloc::string::String;

use proto::kern_proto::Message;

pub mod image;
pub mod amp;
pub mod up;

/// Entry point symbols a kernel image may export.
pub const ENTRY_POINTS: &[&str] = &["run_kernel", "finalize"];

/// Upper bound on the support blob holding the syscall stubs.
pub const KSUPPORT_SIZE_MAX: usize = 32 * 1024;

#[derive(Fail, Debug)]
pub enum Error {
    #[fail(display = "cannot load kernel: {}", _0)]
    Load(#[cause] image::Error),
    #[fail(display = "support blob does not fit its reservation")]
    SupportTooLarge,
    #[fail(display = "no kernel loaded")]
    NotLoaded,
    #[fail(display = "kernel already running")]
    AlreadyRunning,
    #[fail(display = "unknown entry point {}", _0)]
    UnknownEntry(String),
    #[fail(display = "mailbox busy")]
    MailboxBusy,
    #[fail(display = "message does not fit the comm area")]
    MessageTooLarge,
}

impl From<image::Error> for Error {
    fn from(value: image::Error) -> Error {
        Error::Load(value)
    }
}

pub trait Host {
    /// Deposits a kernel image into the kernel memory window, stopping any
    /// resident kernel first.
    fn load(&mut self, image: &[u8]) -> Result<(), Error>;
    /// Resumes the kernel at the named entry point.
    fn start(&mut self, entry: &str) -> Result<(), Error>;
    /// Halts the kernel and resets the mailbox. Idempotent.
    fn stop(&mut self);
    /// Hands one message to the kernel. At most one may be in flight.
    fn send(&mut self, message: &Message) -> Result<(), Error>;
    /// Next message from the kernel, if one is pending.
    fn recv(&mut self) -> Option<Message>;
    fn running(&self) -> bool;
}

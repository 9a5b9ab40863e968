//! Kernel host for AMP boards: the kernel runs on a second CPU held in
//! reset between runs. Messages are serialized into comm buffers at the top
//! of the kernel memory window; a pair of one-word mailboxes announces them.
//!
//! While the kernel CPU is out of reset it owns the window and the RTIO
//! fabric; the runtime only touches the comm buffers, whose ownership is
//! handed over one message at a time through the mailbox words.

use alloc::vec::Vec;

use board::KernelCpu;
use board::mailbox::Mailbox;
use proto::kern_proto::Message;

use super::{image, Error, Host, ENTRY_POINTS, KSUPPORT_SIZE_MAX};

/// Per-direction comm buffer size. Bounds one serialized message.
pub const COMM_SIZE: usize = 2048;

/// The kernel image is linked above the support blob reservation.
pub const PAYLOAD_OFFSET: usize = KSUPPORT_SIZE_MAX;

pub struct Amp<'a> {
    cpu:         &'a mut dyn KernelCpu,
    to_kernel:   &'a mut dyn Mailbox,
    from_kernel: &'a mut dyn Mailbox,
    window:      &'a mut [u8],
    window_base: u32,
    ksupport:    &'a [u8],
    loaded:      Option<image::Loaded>,
    running:     bool
}

impl<'a> Amp<'a> {
    pub fn new(cpu: &'a mut dyn KernelCpu,
               to_kernel: &'a mut dyn Mailbox,
               from_kernel: &'a mut dyn Mailbox,
               window: &'a mut [u8], window_base: u32,
               ksupport: &'a [u8]) -> Result<Amp<'a>, Error> {
        if ksupport.len() > KSUPPORT_SIZE_MAX {
            return Err(Error::SupportTooLarge)
        }
        debug_assert!(window.len() > PAYLOAD_OFFSET + 2 * COMM_SIZE + 4);

        cpu.set_reset(true);
        Ok(Amp {
            cpu, to_kernel, from_kernel,
            window, window_base, ksupport,
            loaded: None,
            running: false
        })
    }

    fn boot_vector_at(&self) -> usize {
        self.window.len() - 2 * COMM_SIZE - 4
    }

    fn to_kernel_at(&self) -> usize {
        self.window.len() - 2 * COMM_SIZE
    }

    fn from_kernel_at(&self) -> usize {
        self.window.len() - COMM_SIZE
    }
}

impl<'a> Host for Amp<'a> {
    fn load(&mut self, kernel: &[u8]) -> Result<(), Error> {
        self.stop();

        let payload_base = self.window_base + PAYLOAD_OFFSET as u32;
        let image_area_end = self.boot_vector_at();
        let loaded = image::load(kernel,
                                 &mut self.window[PAYLOAD_OFFSET..image_area_end],
                                 payload_base, ENTRY_POINTS)?;
        self.window[..self.ksupport.len()].copy_from_slice(self.ksupport);
        self.loaded = Some(loaded);
        Ok(())
    }

    fn start(&mut self, entry: &str) -> Result<(), Error> {
        if self.running {
            return Err(Error::AlreadyRunning)
        }
        let loaded = self.loaded.as_ref().ok_or(Error::NotLoaded)?;
        let address = loaded.entry(entry)
            .ok_or_else(|| Error::UnknownEntry(entry.into()))?;

        let vector = self.boot_vector_at();
        self.window[vector..vector + 4].copy_from_slice(&address.to_le_bytes());
        self.cpu.set_reset(false);
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.cpu.set_reset(true);
        self.to_kernel.acknowledge();
        self.from_kernel.acknowledge();
        self.running = false;
    }

    fn send(&mut self, message: &Message) -> Result<(), Error> {
        if !self.to_kernel.acknowledged() {
            return Err(Error::MailboxBusy)
        }

        let mut encoded = Vec::new();
        message.encode(&mut encoded);
        if encoded.len() > COMM_SIZE {
            return Err(Error::MessageTooLarge)
        }

        let offset = self.to_kernel_at();
        self.window[offset..offset + encoded.len()].copy_from_slice(&encoded);
        self.to_kernel.post(encoded.len() as u32);
        Ok(())
    }

    fn recv(&mut self) -> Option<Message> {
        let length = self.from_kernel.take()? as usize;
        if length > COMM_SIZE {
            warn!("kernel posted an oversized message ({} bytes), dropping", length);
            self.from_kernel.acknowledge();
            return None
        }

        let offset = self.from_kernel_at();
        let message = Message::decode(&self.window[offset..offset + length]);
        self.from_kernel.acknowledge();
        match message {
            Ok(message) => Some(message),
            Err(_) => {
                warn!("undecodable message from kernel CPU, dropping");
                None
            }
        }
    }

    fn running(&self) -> bool {
        self.running
    }
}

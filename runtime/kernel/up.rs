//! Kernel host for UP boards: the kernel shares the runtime CPU, so
//! `start` is a direct call into the resolved entry and returns when the
//! kernel does. The mailbox pair degenerates to two in-memory slots the
//! syscall layer exchanges with the runtime between calls.

use proto::kern_proto::Message;

use super::{image, Error, Host, ENTRY_POINTS};

pub struct Up<'a> {
    window:      &'a mut [u8],
    window_base: u32,
    loaded:      Option<image::Loaded>,
    running:     bool,
    to_kernel:   Option<Message>,
    from_kernel: Option<Message>
}

impl<'a> Up<'a> {
    pub fn new(window: &'a mut [u8], window_base: u32) -> Up<'a> {
        Up {
            window, window_base,
            loaded: None,
            running: false,
            to_kernel: None,
            from_kernel: None
        }
    }
}

impl<'a> Host for Up<'a> {
    fn load(&mut self, kernel: &[u8]) -> Result<(), Error> {
        self.stop();
        let loaded = image::load(kernel, self.window, self.window_base,
                                 ENTRY_POINTS)?;
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

        self.running = true;
        // Cooperative: the kernel runs to its next suspension point (or
        // completion) on this CPU and returns here.
        unsafe {
            let kernel_entry: extern "C" fn() = core::mem::transmute(address as usize);
            kernel_entry();
        }
        self.from_kernel = Some(Message::RunFinished);
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
        self.to_kernel = None;
        self.from_kernel = None;
    }

    fn send(&mut self, message: &Message) -> Result<(), Error> {
        if self.to_kernel.is_some() {
            return Err(Error::MailboxBusy)
        }
        self.to_kernel = Some(message.clone());
        Ok(())
    }

    fn recv(&mut self) -> Option<Message> {
        self.from_kernel.take()
    }

    fn running(&self) -> bool {
        self.running
    }
}

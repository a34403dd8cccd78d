//! Keyboard driver process.

use log::warn;

use crate::context::Process;
use crate::error::{KernelError, KernelResult};
use crate::interrupt::KEYBOARD_IRQ;
use crate::kernel::Kernel;
use crate::message::Message;
use crate::port::PortId;

pub const KEYBOARD_PRIORITY: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardMessage {
    /// Answered with the next key as a `u8`.
    NextKey,
}

pub(crate) fn start(kernel: &Kernel) -> KernelResult<PortId> {
    kernel.create_process(keyboard_process, KEYBOARD_PRIORITY, (), "Keyboard process")
}

fn keyboard_process(process: &Process, _param: ()) {
    loop {
        let (msg, client) = process.receive();
        if !msg.is::<KeyboardMessage>() {
            warn!("keyboard: unexpected message from {client}");
            process.reply(client);
            continue;
        }
        let key = process.wait_for_device(KEYBOARD_IRQ, |dev| dev.keyboard.read());
        process.reply_with(client, Message::new(key));
    }
}

impl Process {
    /// Blocks until the next key press and returns it.
    pub fn read_key(&self) -> KernelResult<u8> {
        let port = self
            .kernel()
            .keyboard_port()
            .ok_or(KernelError::ServiceUnavailable("keyboard"))?;
        let reply = self.send(port, Message::new(KeyboardMessage::NextKey))?;
        reply
            .and_then(|msg| msg.downcast::<u8>().ok())
            .ok_or(KernelError::ServiceUnavailable("keyboard"))
    }
}

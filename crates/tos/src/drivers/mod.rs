//! Simulated devices and the driver processes serving them.

use std::collections::VecDeque;

pub mod com;
pub mod keyboard;

/// Device registers, accessed only under the kernel lock.
#[derive(Debug, Default)]
pub(crate) struct Devices {
    pub uart: Uart,
    pub keyboard: Keyboard,
}

/// COM1 UART: a receive FIFO filled by the host and a transmit log.
#[derive(Debug, Default)]
pub(crate) struct Uart {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl Uart {
    pub fn receive(&mut self, byte: u8) {
        self.rx.push_back(byte);
    }

    pub fn read(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.tx.extend_from_slice(bytes);
    }

    pub fn transmitted(&self) -> &[u8] {
        &self.tx
    }
}

/// Keyboard controller holding keys not yet read.
#[derive(Debug, Default)]
pub(crate) struct Keyboard {
    keys: VecDeque<u8>,
}

impl Keyboard {
    pub fn press(&mut self, key: u8) {
        self.keys.push_back(key);
    }

    pub fn read(&mut self) -> Option<u8> {
        self.keys.pop_front()
    }
}

//! COM1 serial driver.
//!
//! The COM process serves one request at a time on its public port. While a
//! request is in flight the public port stays closed, so the next client
//! queues on it, and the only port the COM process listens on is the private
//! one the reader answers through.

use log::{debug, warn};

use crate::context::Process;
use crate::error::{KernelError, KernelResult};
use crate::interrupt::COM1_IRQ;
use crate::kernel::Kernel;
use crate::message::Message;
use crate::port::PortId;

pub const COM_PRIORITY: u8 = 6;
pub const COM_READER_PRIORITY: u8 = 7;

/// A serial exchange: write `output`, then read `input_len` bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComMessage {
    pub output: Vec<u8>,
    pub input_len: usize,
}

struct ReadRequest {
    len: usize,
}

struct ReadDone(Vec<u8>);

pub(crate) fn start(kernel: &Kernel) -> KernelResult<PortId> {
    kernel.create_process(com_process, COM_PRIORITY, (), "COM process")
}

fn com_process(process: &Process, _param: ()) {
    let Some(public) = process.home_port() else {
        warn!("COM process started without a port");
        return;
    };
    let reader = process
        .create_port()
        .and_then(|private| {
            process.create_process(com_reader, COM_READER_PRIORITY, private, "COM reader")
        });
    let reader = match reader {
        Ok(port) => port,
        Err(err) => {
            warn!("COM reader could not be started: {err}");
            return;
        }
    };

    loop {
        let (msg, client) = process.receive();
        let request = match msg.downcast::<ComMessage>() {
            Ok(request) => request,
            Err(_) => {
                warn!("COM: unexpected message from {client}");
                process.reply(client);
                continue;
            }
        };
        debug!(
            "COM: {client} writes {} bytes, reads {}",
            request.output.len(),
            request.input_len
        );

        if let Err(err) = exchange(process, public, reader, &request) {
            warn!("COM: exchange for {client} failed: {err}");
            process.reply(client);
            continue;
        }

        let (done, _reader) = process.receive();
        let input = done.downcast::<ReadDone>().map(|d| d.0).unwrap_or_default();
        if let Err(err) = process.open_port(public) {
            warn!("COM: public port lost: {err}");
        }
        process.reply_with(client, Message::new(input));
    }
}

fn exchange(
    process: &Process,
    public: PortId,
    reader: PortId,
    request: &ComMessage,
) -> KernelResult<()> {
    process.close_port(public)?;
    process.message(
        reader,
        Message::new(ReadRequest {
            len: request.input_len,
        }),
    )?;
    process.with_devices(|dev| dev.uart.write(&request.output));
    Ok(())
}

fn com_reader(process: &Process, reply_port: PortId) {
    loop {
        let (msg, _com) = process.receive();
        let len = msg.downcast::<ReadRequest>().map(|r| r.len).unwrap_or(0);

        let mut input = Vec::with_capacity(len);
        for _ in 0..len {
            input.push(process.wait_for_device(COM1_IRQ, |dev| dev.uart.read()));
        }

        if let Err(err) = process.message(reply_port, Message::new(ReadDone(input))) {
            warn!("COM reader stops: {err}");
            return;
        }
    }
}

impl Process {
    /// Writes `output` to COM1 and waits for `input_len` bytes of input.
    pub fn serial_exchange(
        &self,
        output: impl Into<Vec<u8>>,
        input_len: usize,
    ) -> KernelResult<Vec<u8>> {
        let port = self
            .kernel()
            .com_port()
            .ok_or(KernelError::ServiceUnavailable("serial"))?;
        let reply = self.send(
            port,
            Message::new(ComMessage {
                output: output.into(),
                input_len,
            }),
        )?;
        Ok(reply
            .and_then(|msg| msg.downcast::<Vec<u8>>().ok())
            .unwrap_or_default())
    }
}

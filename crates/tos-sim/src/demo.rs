//! Demo workload: periodic sleepers reporting to a counter server, plus an
//! optional serial client.

use log::{info, warn};
use tos::{Message, PortId, Process};

pub const LAUNCHER_PRIORITY: u8 = 7;
const COUNTER_PRIORITY: u8 = 4;
const SLEEPER_PRIORITY: u8 = 3;
const SERIAL_CLIENT_PRIORITY: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct Workload {
    pub sleepers: usize,
    pub serial_text: Option<String>,
}

/// Entry of the launcher process. Creates every demo process, then exits.
pub fn launcher(process: &Process, workload: Workload) {
    let counter = match process.create_process(counter, COUNTER_PRIORITY, (), "counter") {
        Ok(port) => port,
        Err(err) => {
            warn!("counter server not started: {err}");
            return;
        }
    };

    for n in 0..workload.sleepers {
        let period = (n as i32 + 1) * 2;
        let name = format!("sleeper {n}");
        let started = process.create_process(sleeper, SLEEPER_PRIORITY, (counter, period), &name);
        if let Err(err) = started {
            warn!("{name} not started: {err}");
        }
    }

    if let Some(text) = workload.serial_text {
        if let Err(err) =
            process.create_process(serial_client, SERIAL_CLIENT_PRIORITY, text, "serial client")
        {
            warn!("serial client not started: {err}");
        }
    }
}

fn counter(process: &Process, _param: ()) {
    let mut total: u32 = 0;
    loop {
        let (_, sender) = process.receive();
        total += 1;
        info!("counter: report from {sender}, total {total}");
        process.reply_with(sender, Message::new(total));
    }
}

fn sleeper(process: &Process, (counter, period): (PortId, i32)) {
    loop {
        if let Err(err) = process.sleep(period) {
            warn!("{}: sleep failed: {err}", process.name());
            return;
        }
        match process.send(counter, Message::empty()) {
            Ok(reply) => {
                let total = reply.and_then(|m| m.downcast::<u32>().ok()).unwrap_or(0);
                info!("{} woke after {period} ticks ({total})", process.name());
            }
            Err(err) => {
                warn!("{}: counter gone: {err}", process.name());
                return;
            }
        }
    }
}

fn serial_client(process: &Process, text: String) {
    let prompt = format!("echo {} bytes> ", text.len());
    match process.serial_exchange(prompt, text.len()) {
        Ok(input) => info!("serial client read {:?}", String::from_utf8_lossy(&input)),
        Err(err) => warn!("serial client failed: {err}"),
    }
}

//! Timer service: a delta list of sleepers driven by the timer interrupt.
//!
//! The timer process owns the list. A notifier process at the top priority
//! waits on [`TIMER_IRQ`] and forwards each tick with `message`, so a burst
//! of interrupts while the timer process is busy collapses into one pulse.

use ktrace::records::timer;
use log::{trace, warn};

use crate::context::Process;
use crate::error::{KernelError, KernelResult};
use crate::interrupt::TIMER_IRQ;
use crate::message::Message;
use crate::port::PortId;
use crate::process::ProcessId;
use crate::trace::slot_bytes;

pub const TIMER_PRIORITY: u8 = 6;
pub const NOTIFIER_PRIORITY: u8 = 7;

/// Requests understood by the timer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMessage {
    /// Sent by a sleeper; answered with a reply once the ticks have elapsed.
    Sleep { ticks: i32 },
    /// Posted by the notifier on every timer interrupt.
    Tick,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    pid: ProcessId,
    delta: i32,
    next: Option<usize>,
}

/// Sleep entries ordered by deadline, each storing its distance to the
/// previous entry. One node per process slot.
pub(crate) struct DeltaList {
    nodes: Vec<Option<Entry>>,
    head: Option<usize>,
}

impl DeltaList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: vec![None; capacity],
            head: None,
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Queues `pid` to wake after `ticks` ticks. Values below one wake on the
    /// next tick. Equal deadlines wake in insertion order.
    pub fn insert(&mut self, pid: ProcessId, ticks: i32) {
        let slot = pid.slot();
        if slot >= self.nodes.len() {
            return;
        }
        self.unlink(slot);

        let mut remaining = ticks.max(0);
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(entry) = self.nodes[idx] else { break };
            if remaining < entry.delta {
                break;
            }
            remaining -= entry.delta;
            prev = Some(idx);
            cursor = entry.next;
        }

        if let Some(entry) = cursor.and_then(|idx| self.nodes[idx].as_mut()) {
            entry.delta -= remaining;
        }
        self.nodes[slot] = Some(Entry {
            pid,
            delta: remaining,
            next: cursor,
        });
        match prev.and_then(|idx| self.nodes[idx].as_mut()) {
            Some(before) => before.next = Some(slot),
            None => self.head = Some(slot),
        }
    }

    /// Removes the entry held by `slot`, folding its delta into its successor.
    fn unlink(&mut self, slot: usize) {
        let Some(entry) = self.nodes[slot].take() else {
            return;
        };
        if let Some(next) = entry.next.and_then(|idx| self.nodes[idx].as_mut()) {
            next.delta += entry.delta;
        }
        if self.head == Some(slot) {
            self.head = entry.next;
            return;
        }
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(node) = self.nodes[idx].as_mut() else { break };
            if node.next == Some(slot) {
                node.next = entry.next;
                return;
            }
            cursor = node.next;
        }
    }

    /// Ages the list by one tick and returns every sleeper now due, in
    /// deadline order.
    pub fn tick(&mut self) -> Vec<ProcessId> {
        let mut due = Vec::new();
        let Some(head) = self.head else {
            return due;
        };
        if let Some(entry) = self.nodes[head].as_mut() {
            entry.delta -= 1;
        }

        while let Some(idx) = self.head {
            let Some(entry) = self.nodes[idx] else { break };
            if entry.delta > 0 {
                break;
            }
            self.nodes[idx] = None;
            self.head = entry.next;
            // A head that went negative already consumed part of the next gap.
            if let Some(next) = entry.next.and_then(|n| self.nodes[n].as_mut()) {
                next.delta += entry.delta;
            }
            due.push(entry.pid);
        }
        due
    }

    /// Absolute ticks left per sleeper, in list order.
    #[cfg(test)]
    pub fn remaining(&self) -> Vec<(ProcessId, i32)> {
        let mut out = Vec::new();
        let mut total = 0;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(entry) = self.nodes[idx] else { break };
            total += entry.delta;
            out.push((entry.pid, total));
            cursor = entry.next;
        }
        out
    }
}

pub(crate) fn timer_process(process: &Process, _param: ()) {
    let Some(port) = process.home_port() else {
        warn!("timer process started without a port");
        return;
    };
    if let Err(err) =
        process.create_process(timer_notifier, NOTIFIER_PRIORITY, port, "Timer notifier")
    {
        warn!("timer notifier could not be created: {err}");
        return;
    }

    let mut sleepers = DeltaList::with_capacity(process.kernel().limits().max_processes);
    loop {
        let (msg, sender) = process.receive();
        match msg.downcast::<TimerMessage>() {
            Ok(TimerMessage::Tick) => {
                for pid in sleepers.tick() {
                    trace!("timer: waking {pid}");
                    process.emit(timer::WAKE, &slot_bytes(pid.slot()));
                    process.reply(pid);
                }
            }
            Ok(TimerMessage::Sleep { ticks }) => {
                trace!("timer: {sender} sleeps {ticks} ticks");
                let [a, b] = slot_bytes(sender.slot());
                let [t0, t1, t2, t3] = ticks.to_le_bytes();
                process.emit(timer::SLEEP, &[a, b, t0, t1, t2, t3]);
                sleepers.insert(sender, ticks);
            }
            Err(_) => {
                warn!("timer: unexpected message from {sender}");
                process.reply(sender);
            }
        }
    }
}

fn timer_notifier(process: &Process, timer_port: PortId) {
    loop {
        process.wait_for_interrupt(TIMER_IRQ);
        if process.message(timer_port, Message::new(TimerMessage::Tick)).is_err() {
            warn!("timer port {timer_port} is gone, notifier stops");
            return;
        }
    }
}

impl Process {
    /// Blocks the caller for `ticks` timer ticks.
    pub fn sleep(&self, ticks: i32) -> KernelResult<()> {
        let port = self
            .kernel()
            .timer_port()
            .ok_or(KernelError::ServiceUnavailable("timer"))?;
        self.send(port, Message::new(TimerMessage::Sleep { ticks }))
            .map(|_| ())
    }
}

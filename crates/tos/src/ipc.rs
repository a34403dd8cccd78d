//! Rendezvous message passing over ports.
//!
//! `send` blocks until the receiver replies. `message` blocks only until the
//! receiver picks the payload up. Either call hands off directly when the
//! port is open and its owner already waits in `receive`; otherwise the
//! caller joins the port's FIFO of blocked senders.

use ktrace::records::ipc;
use log::trace;

use crate::context::Process;
use crate::error::{KernelError, KernelResult};
use crate::message::Message;
use crate::port::PortId;
use crate::process::{ProcessId, ProcessState};
use crate::trace::slot_bytes;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Send,
    Message,
}

impl Process {
    /// Sends `msg` to `port` and blocks until the owner replies. Returns the
    /// payload given to [`reply_with`](Self::reply_with), if any.
    pub fn send(&self, port: PortId, msg: Message) -> KernelResult<Option<Message>> {
        self.deliver(port, msg, Delivery::Send)
    }

    /// Hands `msg` to the owner of `port` without waiting for a reply.
    pub fn message(&self, port: PortId, msg: Message) -> KernelResult<()> {
        self.deliver(port, msg, Delivery::Message).map(|_| ())
    }

    fn deliver(
        &self,
        port: PortId,
        msg: Message,
        kind: Delivery,
    ) -> KernelResult<Option<Message>> {
        let me = self.id();
        let mut st = self.enter();

        let (owner, open) = match st.ports.get(port) {
            Some(p) => match p.owner {
                Some(owner) => (owner, p.open),
                None => return Err(KernelError::StalePort(port)),
            },
            None => return Err(KernelError::StalePort(port)),
        };
        if let Some(pcb) = st.procs.get_mut(me) {
            pcb.reply = None;
        }

        let waiting = open && st.state_of(owner) == Some(ProcessState::ReceiveBlocked);
        if waiting {
            if let Some(pcb) = st.procs.get_mut(owner) {
                pcb.inbox = Some((me, msg));
            }
            st.add_ready(owner);
            if kind == Delivery::Send {
                st.remove_ready(me);
                st.set_state(me, ProcessState::ReplyBlocked);
            }
        } else {
            let blocked = match kind {
                Delivery::Send => ProcessState::SendBlocked,
                Delivery::Message => ProcessState::MessageBlocked,
            };
            st.remove_ready(me);
            st.set_state(me, blocked);
            if let Some(pcb) = st.procs.get_mut(me) {
                pcb.outbox = Some(msg);
            }
            let locked = &mut *st;
            locked.ports.push_blocked(&mut locked.procs, port.slot(), me.slot());
        }

        let record = match kind {
            Delivery::Send => ipc::SEND,
            Delivery::Message => ipc::MESSAGE,
        };
        trace!(
            "{me} {} {port}{}",
            if kind == Delivery::Send { "sends to" } else { "messages" },
            if waiting { " (handed off)" } else { " (queued)" }
        );
        st.trace_ipc(record, me, port, waiting);

        self.switch(&mut st);
        Ok(st.procs.get_mut(me).and_then(|pcb| pcb.reply.take()))
    }

    /// Takes the oldest waiting payload from the caller's open ports, in
    /// port-list order, blocking if there is none. A `message` sender is
    /// released at once; a `send` sender waits for [`reply`](Self::reply).
    pub fn receive(&self) -> (Message, ProcessId) {
        let me = self.id();
        let mut st = self.enter();

        let first = st.procs.get(me).and_then(|pcb| pcb.first_port);
        let locked = &mut *st;
        if let Some(slot) = locked.ports.pop_first_waiting(&mut locked.procs, first) {
            let Some(sender) = st.procs.id_at(slot) else {
                st.fatal(format!("receive: blocked list of {me} holds free slot {slot}"));
            };
            let msg = st
                .procs
                .get_mut(sender)
                .and_then(|pcb| pcb.outbox.take())
                .unwrap_or_default();
            match st.state_of(sender) {
                Some(ProcessState::MessageBlocked) => st.add_ready(sender),
                Some(ProcessState::SendBlocked) => {
                    st.set_state(sender, ProcessState::ReplyBlocked)
                }
                other => st.fatal(format!(
                    "receive: {sender} was queued on a port while {other:?}"
                )),
            }
            trace!("{me} receives from {sender}");
            st.trace_receive(me, sender);
            return (msg, sender);
        }

        st.remove_ready(me);
        st.set_state(me, ProcessState::ReceiveBlocked);
        self.switch(&mut st);

        let delivered = st.procs.get_mut(me).and_then(|pcb| pcb.inbox.take());
        match delivered {
            Some((sender, msg)) => {
                trace!("{me} receives from {sender}");
                st.trace_receive(me, sender);
                (msg, sender)
            }
            None => st.fatal(format!("receive: {me} resumed without a message")),
        }
    }

    /// Releases a reply-blocked sender. No-op for any other state, including
    /// a sender that no longer exists. Always yields.
    pub fn reply(&self, sender: ProcessId) {
        self.release(sender, None);
    }

    /// Like [`reply`](Self::reply), handing `msg` back as the result of the
    /// sender's `send`.
    pub fn reply_with(&self, sender: ProcessId, msg: Message) {
        self.release(sender, Some(msg));
    }

    fn release(&self, sender: ProcessId, msg: Option<Message>) {
        let mut st = self.enter();
        if st.state_of(sender) == Some(ProcessState::ReplyBlocked) {
            if let Some(pcb) = st.procs.get_mut(sender) {
                pcb.reply = msg;
            }
            st.add_ready(sender);
            trace!("{} replies to {sender}", self.id());
            st.trace.emit(ipc::REPLY, &slot_bytes(sender.slot()));
        }
        self.switch(&mut st);
    }

    /// Attaches a new port to the calling process.
    pub fn create_port(&self) -> KernelResult<PortId> {
        let mut st = self.enter();
        st.create_port(self.id())
    }

    /// Lets the port accept direct hand-offs again.
    pub fn open_port(&self, port: PortId) -> KernelResult<()> {
        self.set_open(port, true)
    }

    /// Forces every sender to `port` onto its blocked list, even while the
    /// owner waits in `receive`.
    pub fn close_port(&self, port: PortId) -> KernelResult<()> {
        self.set_open(port, false)
    }

    fn set_open(&self, port: PortId, open: bool) -> KernelResult<()> {
        let mut st = self.enter();
        let p = st.ports.get_mut(port).ok_or(KernelError::StalePort(port))?;
        p.open = open;
        Ok(())
    }

    /// True iff any port of `pid`, open or closed, has a waiting sender.
    pub fn check_messages(&self, pid: ProcessId) -> bool {
        self.enter().check_messages(pid)
    }

    pub fn port_owner(&self, port: PortId) -> Option<ProcessId> {
        self.enter().port_owner(port)
    }
}

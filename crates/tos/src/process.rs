//! Process identities and the process table.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::message::Message;
use crate::port::PortId;

/// Number of priority levels.
pub const PRIORITY_LEVELS: usize = 8;

/// Scheduling priority, higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Priority(u8);

impl Priority {
    /// Level of the idle process.
    pub const IDLE: Priority = Priority(0);
    pub const MAX: Priority = Priority(PRIORITY_LEVELS as u8 - 1);

    pub fn new(value: u8) -> KernelResult<Self> {
        if (value as usize) < PRIORITY_LEVELS {
            Ok(Self(value))
        } else {
            Err(KernelError::InvalidPriority(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub(crate) fn level(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a process. The generation guards against a recycled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId {
    slot: u16,
    generation: u32,
}

impl ProcessId {
    pub(crate) fn new(slot: usize, generation: u32) -> Self {
        Self {
            slot: slot as u16,
            generation,
        }
    }

    pub fn slot(self) -> usize {
        self.slot as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}.{}", self.slot, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ProcessState {
    Ready,
    SendBlocked,
    ReplyBlocked,
    ReceiveBlocked,
    MessageBlocked,
    InterruptBlocked,
}

impl ProcessState {
    /// Fixed-width label used in the process dump.
    pub fn label(self) -> &'static str {
        match self {
            Self::Ready => "READY          ",
            Self::SendBlocked => "SEND_BLOCKED   ",
            Self::ReplyBlocked => "REPLY_BLOCKED  ",
            Self::ReceiveBlocked => "RECEIVE_BLOCKED",
            Self::MessageBlocked => "MESSAGE_BLOCKED",
            Self::InterruptBlocked => "INTR_BLOCKED   ",
        }
    }
}

/// Ready-queue neighbours, as slot indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Links {
    pub next: usize,
    pub prev: usize,
}

/// Process control block.
#[derive(Debug)]
pub(crate) struct Pcb {
    pub generation: u32,
    pub used: bool,
    pub priority: Priority,
    pub state: ProcessState,
    pub name: String,
    /// Port returned by `create_process`.
    pub home_port: Option<PortId>,
    /// Head of the owned-port chain (port slot).
    pub first_port: Option<usize>,
    /// Present only while linked into a ready queue.
    pub links: Option<Links>,
    /// Port slot whose blocked list holds this process.
    pub blocked_on: Option<usize>,
    pub next_blocked: Option<usize>,
    /// Payload parked while send- or message-blocked.
    pub outbox: Option<Message>,
    /// Payload handed over by a sender while receive-blocked.
    pub inbox: Option<(ProcessId, Message)>,
    /// Payload handed back by `reply_with`.
    pub reply: Option<Message>,
    pub wait_vector: Option<u8>,
}

impl Pcb {
    fn unused() -> Self {
        Self {
            generation: 0,
            used: false,
            priority: Priority::IDLE,
            state: ProcessState::Ready,
            name: String::new(),
            home_port: None,
            first_port: None,
            links: None,
            blocked_on: None,
            next_blocked: None,
            outbox: None,
            inbox: None,
            reply: None,
            wait_vector: None,
        }
    }

    fn reset(&mut self) {
        let generation = self.generation.wrapping_add(1);
        *self = Self::unused();
        self.generation = generation;
    }
}

/// Snapshot of one process, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub name: String,
    pub priority: Priority,
    pub state: ProcessState,
    pub active: bool,
}

/// Fixed-capacity slab of PCBs.
pub(crate) struct ProcessTable {
    slots: Vec<Pcb>,
}

impl ProcessTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Pcb::unused()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims the first free slot.
    pub fn allocate(&mut self, name: &str, priority: Priority) -> KernelResult<ProcessId> {
        let slot = self
            .slots
            .iter()
            .position(|pcb| !pcb.used)
            .ok_or(KernelError::ProcessTableFull)?;

        let pcb = &mut self.slots[slot];
        pcb.used = true;
        pcb.priority = priority;
        pcb.state = ProcessState::Ready;
        pcb.name = name.to_owned();
        Ok(ProcessId::new(slot, pcb.generation))
    }

    /// Frees the slot and invalidates every handle to it.
    pub fn release(&mut self, slot: usize) {
        if let Some(pcb) = self.slots.get_mut(slot) {
            pcb.reset();
        }
    }

    pub fn get(&self, pid: ProcessId) -> Option<&Pcb> {
        self.slots
            .get(pid.slot())
            .filter(|pcb| pcb.used && pcb.generation == pid.generation)
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Pcb> {
        self.slots
            .get_mut(pid.slot())
            .filter(|pcb| pcb.used && pcb.generation == pid.generation)
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.get(pid).is_some()
    }

    /// Current handle of a used slot.
    pub fn id_at(&self, slot: usize) -> Option<ProcessId> {
        self.slots
            .get(slot)
            .filter(|pcb| pcb.used)
            .map(|pcb| ProcessId::new(slot, pcb.generation))
    }

    pub fn pcb_at(&self, slot: usize) -> Option<&Pcb> {
        self.slots.get(slot).filter(|pcb| pcb.used)
    }

    pub fn pcb_at_mut(&mut self, slot: usize) -> Option<&mut Pcb> {
        self.slots.get_mut(slot).filter(|pcb| pcb.used)
    }

    /// Used slots in table order.
    pub fn iter(&self) -> impl Iterator<Item = (ProcessId, &Pcb)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, pcb)| pcb.used)
            .map(|(slot, pcb)| (ProcessId::new(slot, pcb.generation), pcb))
    }
}

//! Record identifiers emitted by the kernel.
//!
//! Process and port identifiers are encoded as the slot index (`u16`, little
//! endian) followed by nothing else; generations are omitted to keep records
//! short.

/// Scheduler records.
pub mod sched {
    /// Context switch: `from slot, to slot`.
    pub const NEXT: u8 = 1;
    /// The idle process halted with nothing ready.
    pub const IDLE: u8 = 2;
}

/// Process lifecycle records.
pub mod proc {
    /// Process created: `slot, priority`.
    pub const CREATE: u8 = 10;
    /// Process killed by another process or the host: `slot`.
    pub const KILL: u8 = 11;
    /// Process left its entry function or called exit: `slot`.
    pub const EXIT: u8 = 12;
}

/// Message passing records.
pub mod ipc {
    /// Blocking send: `sender slot, port slot, handed off (0/1)`.
    pub const SEND: u8 = 20;
    /// Fire-and-forget message: `sender slot, port slot, handed off (0/1)`.
    pub const MESSAGE: u8 = 21;
    /// Receive completed: `receiver slot, sender slot`.
    pub const RECEIVE: u8 = 22;
    /// Reply released a sender: `sender slot`.
    pub const REPLY: u8 = 23;
}

/// Interrupt records.
pub mod intr {
    /// Vector latched by the host: `vector`.
    pub const RAISE: u8 = 30;
    /// Vector delivered to its waiting process: `vector, slot`.
    pub const DELIVER: u8 = 31;
}

/// Timer service records.
pub mod timer {
    /// Sleep request queued: `slot, ticks (i32)`.
    pub const SLEEP: u8 = 40;
    /// Sleeper released: `slot`.
    pub const WAKE: u8 = 41;
}

//! # tos - Teaching Operating System kernel core
//!
//! A small priority-scheduled kernel with synchronous message passing,
//! hosted on ordinary threads:
//! - Processes live in a fixed-capacity table and are addressed by
//!   generation-checked [`ProcessId`]s.
//! - Eight priority levels, each a circular ready list. The dispatcher runs
//!   the highest non-empty level and round-robins within it.
//! - Rendezvous IPC over [`PortId`]s: `send`, `message`, `receive`, `reply`.
//! - Interrupts (timer, keyboard, COM1) wake the single process waiting on
//!   each vector and force a reschedule.
//! - A timer process turns `sleep(ticks)` into wake-ups using a delta list.
//!
//! ## Execution model
//!
//! Every process runs on its own host thread, but exactly one of them holds
//! the CPU at any time. All kernel state sits behind one lock, the stand-in
//! for masking interrupts. Interrupts raised by the host are latched and
//! delivered at the next interrupt window: any kernel call, any resign, or
//! an iteration of the idle process. [`Kernel::wait_idle`] returns once every
//! process is blocked, which is how tests and the simulator step the system.
//!
//! ## Module Overview
//!
//! - [`process`] - process identities, states and the process table
//! - [`port`] - port identities and blocked-sender lists
//! - [`interrupt`] - vectors and the simulated interrupt controller
//! - [`timer`] - sleep service
//! - [`drivers`] - COM1 and keyboard driver processes
//! - [`config`] - boot configuration

pub mod config;
mod context;
pub mod drivers;
mod error;
pub mod interrupt;
mod ipc;
mod kernel;
mod message;
pub mod port;
pub mod process;
mod ready;
mod state;
pub mod timer;
mod trace;

pub use config::{KernelConfig, KernelConfigBuilder, KernelLimits};
pub use context::Process;
pub use drivers::com::ComMessage;
pub use drivers::keyboard::KeyboardMessage;
pub use error::{KernelError, KernelResult};
pub use interrupt::{RaiseOutcome, COM1_IRQ, COM2_IRQ, KEYBOARD_IRQ, TIMER_IRQ};
pub use kernel::Kernel;
pub use message::Message;
pub use port::{PortId, PortInfo};
pub use process::{Priority, ProcessId, ProcessInfo, ProcessState};
pub use timer::TimerMessage;

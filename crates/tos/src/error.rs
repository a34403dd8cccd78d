use std::io;

use thiserror::Error;

use crate::port::PortId;
use crate::process::ProcessId;

/// Caller-visible kernel errors.
///
/// Broken invariants are not represented here: they stop the kernel through
/// the fatal path instead of being returned.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("priority {0} outside 0..=7")]
    InvalidPriority(u8),
    #[error("process table is full")]
    ProcessTableFull,
    #[error("port table is full")]
    PortTableFull,
    #[error("process {0} no longer exists")]
    StaleProcess(ProcessId),
    #[error("port {0} no longer exists")]
    StalePort(PortId),
    #[error("invalid kernel configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("kernel halted: {0}")]
    Halted(String),
    #[error("{0} service is not running")]
    ServiceUnavailable(&'static str),
    #[error("failed to spawn process thread: {0}")]
    Spawn(#[source] io::Error),
}

pub type KernelResult<T> = Result<T, KernelError>;

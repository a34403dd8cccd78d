#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tos::{Kernel, KernelConfig, PortId, Process, ProcessId};

/// Event log shared between processes and the test body.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Kernel without any services, so only the test's processes run.
pub fn bare_kernel() -> Kernel {
    Kernel::boot(KernelConfig::builder().timer(false).build()).expect("boot kernel")
}

/// Runs `body` inside a top-priority launcher process and waits until the
/// system settles. Processes created by the launcher all exist before any of
/// them is dispatched.
pub fn launch<F>(kernel: &Kernel, body: F)
where
    F: FnOnce(&Process) + Send + 'static,
{
    kernel
        .create_process(move |p, ()| body(p), 7, (), "launcher")
        .expect("create launcher");
    kernel.wait_idle().expect("kernel settles");
}

pub fn owner(kernel: &Kernel, port: PortId) -> ProcessId {
    kernel.port_owner(port).expect("port has an owner")
}

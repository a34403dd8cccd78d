//! The running process's view of the kernel and the context switch.
//!
//! Each process owns a host thread, but only the thread named by
//! `KernelState::active` makes progress. Switching means storing the next
//! process in `active`, waking its thread and parking on our own condition
//! variable until the baton comes back. A thread that wakes to find its slot
//! destroyed, or the kernel stopped, unwinds with [`Unwind`] and exits
//! without running any more user code.

use std::cell::Cell;
use std::marker::PhantomData;
use std::panic;

use log::{debug, trace, warn};
use parking_lot::MutexGuard;

use crate::drivers::Devices;
use crate::error::KernelResult;
use crate::kernel::Kernel;
use crate::port::PortId;
use crate::process::{Priority, ProcessId, ProcessState};
use crate::state::KernelState;

/// Panic payload used to unwind a process thread that must stop.
pub(crate) struct Unwind;

fn unwind() -> ! {
    panic::resume_unwind(Box::new(Unwind))
}

/// Handle passed to a process entry function. Every kernel service a process
/// uses goes through it.
///
/// The handle is tied to its thread: it is `Send` for the spawn but not
/// `Sync`, so it cannot be shared with helper threads.
pub struct Process {
    kernel: Kernel,
    pid: ProcessId,
    _not_sync: PhantomData<Cell<()>>,
}

impl Process {
    pub(crate) fn new(kernel: Kernel, pid: ProcessId) -> Self {
        Self {
            kernel,
            pid,
            _not_sync: PhantomData,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.pid
    }

    /// The kernel this process runs on. Host calls that wait for quiescence
    /// must not be made from a process.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn name(&self) -> String {
        self.lock()
            .procs
            .get(self.pid)
            .map(|pcb| pcb.name.clone())
            .unwrap_or_default()
    }

    pub fn priority(&self) -> Priority {
        self.lock()
            .procs
            .get(self.pid)
            .map(|pcb| pcb.priority)
            .unwrap_or(Priority::IDLE)
    }

    /// The port created together with this process.
    pub fn home_port(&self) -> Option<PortId> {
        self.lock().procs.get(self.pid).and_then(|pcb| pcb.home_port)
    }

    fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.kernel.shared.state.lock()
    }

    pub(crate) fn emit(&self, record: u8, payload: &[u8]) {
        self.lock().trace.emit(record, payload);
    }

    /// Parks until this process first receives the CPU.
    pub(crate) fn start(&self) {
        let mut st = self.lock();
        self.park(&mut st);
    }

    /// Waits for the baton. Unwinds if the process was destroyed or the
    /// kernel stopped meanwhile.
    pub(crate) fn park(&self, st: &mut MutexGuard<'_, KernelState>) {
        loop {
            if st.must_unwind(self.pid) {
                unwind();
            }
            if st.active == self.pid {
                return;
            }
            self.kernel.shared.switch[self.pid.slot()].wait(st);
        }
    }

    /// Locks the kernel for a call from this process and opens an interrupt
    /// window. May be preempted before returning.
    pub(crate) fn enter(&self) -> MutexGuard<'_, KernelState> {
        let mut st = self.lock();
        self.check_active(&mut st);
        if st.deliver_pending() || st.resched {
            self.switch(&mut st);
        }
        st
    }

    fn check_active(&self, st: &mut MutexGuard<'_, KernelState>) {
        if st.must_unwind(self.pid) {
            unwind();
        }
        if st.active != self.pid {
            let active = st.active;
            st.fatal(format!(
                "{} called into the kernel while {} holds the CPU",
                self.pid, active
            ));
        }
    }

    /// Delivers pending interrupts, runs the dispatcher and, if it picks
    /// someone else, passes the CPU and parks until it comes back.
    pub(crate) fn switch(&self, st: &mut MutexGuard<'_, KernelState>) {
        st.deliver_pending();
        st.resched = false;
        let next = st.dispatch();
        if next != self.pid {
            st.switch_to(next);
            self.kernel.shared.wake(next);
            self.park(st);
        }
    }

    /// Gives up the CPU voluntarily. Returns when the dispatcher picks this
    /// process again.
    pub fn resign(&self) {
        let mut st = self.lock();
        self.check_active(&mut st);
        self.switch(&mut st);
    }

    /// Creates a child process. The caller keeps the CPU; the child runs at
    /// the next dispatch.
    pub fn create_process<F, P>(
        &self,
        entry: F,
        priority: u8,
        param: P,
        name: &str,
    ) -> KernelResult<PortId>
    where
        F: FnOnce(&Process, P) + Send + 'static,
        P: Send + 'static,
    {
        let priority = Priority::new(priority)?;
        drop(self.enter());
        let (_, port) = self.kernel.spawn(entry, priority, param, name)?;
        Ok(port)
    }

    /// Kills a process. Without `force` the target must be ready, above
    /// priority 0, without waiting senders and not the caller. A forced kill
    /// of the caller behaves like [`Process::exit`] and does not return.
    /// The idle process is never killed. Does not yield otherwise.
    pub fn kill_process(&self, pid: ProcessId, force: bool) -> bool {
        if force && pid == self.pid {
            self.exit()
        }
        let mut st = self.enter();
        let killed = st.kill(pid, force, Some(self.pid));
        if killed {
            self.kernel.shared.wake(pid);
        }
        killed
    }

    /// Blocks until `vector` fires. The registration is removed once the
    /// process resumes; the vector stays in service until the next wait.
    pub fn wait_for_interrupt(&self, vector: u8) {
        let mut st = self.enter();
        self.block_on_interrupt(&mut st, vector);
    }

    fn block_on_interrupt(&self, st: &mut MutexGuard<'_, KernelState>, vector: u8) {
        let me = self.pid;
        st.remove_ready(me);
        st.pic.register(vector, me);
        st.set_state(me, ProcessState::InterruptBlocked);
        if let Some(pcb) = st.procs.get_mut(me) {
            pcb.wait_vector = Some(vector);
        }
        trace!("{me} waits for interrupt {vector:#04x}");

        self.switch(st);

        if st.pic.handler(vector) == Some(me) {
            st.pic.clear(vector);
        }
    }

    /// Polls a device under the kernel lock and, while it has nothing,
    /// waits on its interrupt. The check and the wait form one critical
    /// section, so input latched in between cannot be missed.
    pub(crate) fn wait_for_device<T>(
        &self,
        vector: u8,
        mut poll: impl FnMut(&mut Devices) -> Option<T>,
    ) -> T {
        let mut st = self.enter();
        loop {
            if let Some(value) = poll(&mut st.devices) {
                return value;
            }
            self.block_on_interrupt(&mut st, vector);
        }
    }

    pub(crate) fn with_devices<R>(&self, f: impl FnOnce(&mut Devices) -> R) -> R {
        let mut st = self.enter();
        f(&mut st.devices)
    }

    /// Terminates the calling process: its ports are removed, the slot is
    /// released and the CPU goes to the next ready process.
    pub fn exit(&self) -> ! {
        self.finish();
        unwind()
    }

    /// Tears the process down after its entry function ended.
    pub(crate) fn finish(&self) {
        let mut st = self.lock();
        if st.must_unwind(self.pid) {
            return;
        }
        debug!("{} exits", self.pid);
        self.kernel.emit_exit(&st, self.pid);
        let pending = st.check_messages(self.pid);
        if pending {
            warn!("{} exits with senders still waiting", self.pid);
        }
        st.destroy(self.pid);
        if st.active == self.pid {
            let next = st.dispatch();
            st.switch_to(next);
            self.kernel.shared.wake(next);
        }
    }
}

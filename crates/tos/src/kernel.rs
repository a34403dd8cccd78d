//! Host-side kernel handle and the thread-per-process runtime.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ktrace::records::{intr, proc, sched};
use log::{debug, info, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::config::{KernelConfig, KernelLimits};
use crate::context::{Process, Unwind};
use crate::drivers;
use crate::error::{KernelError, KernelResult};
use crate::interrupt::{RaiseOutcome, COM1_IRQ, KEYBOARD_IRQ};
use crate::port::{PortId, PortInfo};
use crate::process::{Priority, ProcessId, ProcessInfo};
use crate::state::KernelState;
use crate::timer::{self, TIMER_PRIORITY};
use crate::trace::{slot_bytes, Trace};

pub(crate) struct Shared {
    pub state: Mutex<KernelState>,
    /// One per process slot; a parked thread waits on its own.
    pub switch: Vec<Condvar>,
    /// Signalled whenever the idle process halts or the kernel stops.
    pub idle: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
    idle_callback: Option<fn()>,
    name: &'static str,
}

impl Shared {
    pub fn wake(&self, pid: ProcessId) {
        if let Some(cv) = self.switch.get(pid.slot()) {
            cv.notify_all();
        }
    }

    pub fn wake_all(&self) {
        for cv in &self.switch {
            cv.notify_all();
        }
        self.idle.notify_all();
    }

    /// Marks the system busy and nudges the idle process.
    pub fn poke(&self, st: &mut KernelState) {
        st.quiescent = false;
        self.wake(st.idle);
    }

    /// Runs `f` under the kernel lock on a host thread. A fatal stop raised
    /// inside wakes every parked thread before the panic continues.
    fn host<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        match panic::catch_unwind(AssertUnwindSafe(|| f(&mut self.state.lock()))) {
            Ok(value) => value,
            Err(payload) => {
                self.wake_all();
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Handle to a booted kernel. Clones share the same kernel.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) shared: Arc<Shared>,
}

impl Kernel {
    /// Boots a kernel: the idle process, then the services enabled in
    /// `config`. Returns once the system is quiescent.
    pub fn boot(config: KernelConfig) -> KernelResult<Self> {
        config.validate()?;

        let state = KernelState::new(config.limits, Trace::new(config.trace.clone()));
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            switch: (0..config.limits.max_processes)
                .map(|_| Condvar::new())
                .collect(),
            idle: Condvar::new(),
            threads: Mutex::new(Vec::new()),
            idle_callback: config.idle_callback,
            name: config.name,
        });
        let kernel = Self { shared };

        let (idle, _) = kernel.spawn(idle_process, Priority::IDLE, (), "Idle process")?;
        {
            let mut st = kernel.shared.state.lock();
            st.idle = idle;
            st.active = idle;
        }

        if config.timer {
            let (_, port) = kernel.spawn(
                timer::timer_process,
                Priority::new(TIMER_PRIORITY)?,
                (),
                "Timer process",
            )?;
            kernel.shared.state.lock().timer_port = Some(port);
        }
        if config.serial {
            let port = drivers::com::start(&kernel)?;
            kernel.shared.state.lock().com_port = Some(port);
        }
        if config.keyboard {
            let port = drivers::keyboard::start(&kernel)?;
            kernel.shared.state.lock().keyboard_port = Some(port);
        }

        {
            let mut st = kernel.shared.state.lock();
            kernel.shared.poke(&mut st);
        }
        kernel.wait_idle()?;
        info!("{} booted with {:?}", config.name, config.limits);
        Ok(kernel)
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn limits(&self) -> KernelLimits {
        self.shared.state.lock().limits
    }

    /// Spawns the thread backing a new process. Shared by the host API and
    /// by processes creating children.
    pub(crate) fn spawn<F, P>(
        &self,
        entry: F,
        priority: Priority,
        param: P,
        name: &str,
    ) -> KernelResult<(ProcessId, PortId)>
    where
        F: FnOnce(&Process, P) + Send + 'static,
        P: Send + 'static,
    {
        let (pid, port) = self.shared.state.lock().create_slot(name, priority)?;

        let kernel = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("tos-{}-{}", pid.slot(), name))
            .spawn(move || kernel.run_process(pid, entry, param));

        match spawned {
            Ok(handle) => {
                let mut threads = self.shared.threads.lock();
                threads.retain(|t| !t.is_finished());
                threads.push(handle);
                Ok((pid, port))
            }
            Err(err) => {
                let mut st = self.shared.state.lock();
                let was_active = st.active == pid;
                st.destroy(pid);
                if was_active {
                    let next = st.dispatch();
                    st.switch_to(next);
                    self.shared.wake(next);
                }
                Err(KernelError::Spawn(err))
            }
        }
    }

    fn run_process<F, P>(self, pid: ProcessId, entry: F, param: P)
    where
        F: FnOnce(&Process, P),
    {
        let process = Process::new(self.clone(), pid);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            process.start();
            entry(&process, param);
        }));

        match outcome {
            Ok(()) => process.finish(),
            Err(payload) if payload.is::<Unwind>() => {}
            Err(payload) => {
                if self.shared.state.lock().halted.is_some() {
                    self.shared.wake_all();
                } else {
                    warn!("{pid} panicked: {}", panic_message(&*payload));
                    process.finish();
                }
            }
        }
    }

    /// Creates a process running `entry(&process, param)`. It becomes ready
    /// immediately and runs at the next dispatch.
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
        let (_, port) = self.spawn(entry, priority, param, name)?;
        let mut st = self.shared.state.lock();
        st.resched = true;
        self.shared.poke(&mut st);
        Ok(port)
    }

    /// Kills `pid` subject to the rules of [`Process::kill_process`]. The
    /// process currently holding the CPU is never killed from the host.
    pub fn kill_process(&self, pid: ProcessId, force: bool) -> bool {
        let mut st = self.shared.state.lock();
        if st.active == pid {
            warn!("kill {pid} refused: target is running");
            return false;
        }
        let killed = st.kill(pid, force, None);
        if killed {
            self.shared.wake(pid);
            st.resched = true;
            self.shared.poke(&mut st);
        }
        killed
    }

    /// Raises an interrupt line. Unknown or unclaimed serviced vectors stop
    /// the kernel.
    pub fn raise_interrupt(&self, vector: u8) -> RaiseOutcome {
        self.shared.host(|st| {
            let outcome = st.pic.raise(vector);
            match outcome {
                RaiseOutcome::Latched => {
                    trace!("interrupt {vector:#04x} latched");
                    st.trace.emit(intr::RAISE, &[vector]);
                    self.shared.poke(st);
                }
                RaiseOutcome::Ignored => trace!("interrupt {vector:#04x} ignored"),
                RaiseOutcome::Spurious => {
                    st.fatal(format!("service_intr_{vector:#04x}: Spurious interrupt"))
                }
                RaiseOutcome::Unexpected => {
                    st.fatal(format!("unexpected interrupt {vector:#04x}"))
                }
            }
            outcome
        })
    }

    /// Feeds one byte into the COM1 receiver.
    pub fn serial_input(&self, byte: u8) {
        self.device_input(COM1_IRQ, |st| st.devices.uart.receive(byte));
    }

    /// Latches a key press.
    pub fn key_press(&self, key: u8) {
        self.device_input(KEYBOARD_IRQ, |st| st.devices.keyboard.press(key));
    }

    fn device_input(&self, vector: u8, latch: impl FnOnce(&mut KernelState)) {
        self.shared.host(|st| {
            latch(st);
            if st.pic.is_claimed(vector) && st.pic.raise(vector) == RaiseOutcome::Latched {
                st.trace.emit(intr::RAISE, &[vector]);
            }
            self.shared.poke(st);
        });
    }

    /// Bytes written to the COM1 transmitter so far.
    pub fn serial_output(&self) -> Vec<u8> {
        self.shared.state.lock().devices.uart.transmitted().to_vec()
    }

    /// Blocks until every process is blocked and the idle process halts.
    pub fn wait_idle(&self) -> KernelResult<()> {
        let mut st = self.shared.state.lock();
        loop {
            if let Some(reason) = &st.halted {
                return Err(KernelError::Halted(reason.clone()));
            }
            if st.shutdown {
                return Err(KernelError::Halted("kernel shut down".into()));
            }
            if st.is_quiescent() {
                return Ok(());
            }
            self.shared.idle.wait(&mut st);
        }
    }

    /// Like [`wait_idle`](Self::wait_idle) with a deadline. Returns `false`
    /// if the system was still busy when the timeout expired.
    pub fn wait_idle_for(&self, timeout: Duration) -> KernelResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.state.lock();
        loop {
            if let Some(reason) = &st.halted {
                return Err(KernelError::Halted(reason.clone()));
            }
            if st.shutdown {
                return Err(KernelError::Halted("kernel shut down".into()));
            }
            if st.is_quiescent() {
                return Ok(true);
            }
            if self.shared.idle.wait_until(&mut st, deadline).timed_out() {
                return Ok(st.is_quiescent());
            }
        }
    }

    /// Reason of the fatal stop, if one happened.
    pub fn halted(&self) -> Option<String> {
        self.shared.state.lock().halted.clone()
    }

    pub fn process_info(&self, pid: ProcessId) -> Option<ProcessInfo> {
        self.shared.state.lock().process_info(pid)
    }

    pub fn port_info(&self, port: PortId) -> Option<PortInfo> {
        self.shared.state.lock().port_info(port)
    }

    pub fn port_owner(&self, port: PortId) -> Option<ProcessId> {
        self.shared.state.lock().port_owner(port)
    }

    pub fn check_messages(&self, pid: ProcessId) -> bool {
        self.shared.state.lock().check_messages(pid)
    }

    /// Snapshot of all processes in table order.
    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.shared.state.lock().processes()
    }

    pub fn process_dump(&self) -> String {
        self.shared.state.lock().dump()
    }

    pub fn timer_port(&self) -> Option<PortId> {
        self.shared.state.lock().timer_port
    }

    pub fn com_port(&self) -> Option<PortId> {
        self.shared.state.lock().com_port
    }

    pub fn keyboard_port(&self) -> Option<PortId> {
        self.shared.state.lock().keyboard_port
    }

    /// Stops every process thread and joins them. A process stuck in code
    /// that never calls into the kernel keeps its thread alive.
    pub fn shutdown(&self) {
        {
            let mut st = self.shared.state.lock();
            if st.shutdown {
                return;
            }
            st.shutdown = true;
        }
        self.shared.wake_all();

        let current = thread::current().id();
        let handles: Vec<_> = self.shared.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                debug!("process thread ended with a panic during shutdown");
            }
        }
        debug!("{} shut down", self.shared.name);
    }
}

fn idle_process(process: &Process, _param: ()) {
    process.kernel().idle_loop(process);
}

impl Kernel {
    /// Body of the idle process: deliver interrupts, hand the CPU to any
    /// ready process, otherwise halt until the host does something.
    fn idle_loop(&self, process: &Process) {
        let shared = &self.shared;
        let me = process.id();
        let mut st = shared.state.lock();
        let mut settled = false;
        loop {
            if st.must_unwind(me) {
                drop(st);
                panic::resume_unwind(Box::new(Unwind));
            }
            if st.active != me {
                shared.switch[me.slot()].wait(&mut st);
                continue;
            }

            st.deliver_pending();
            st.resched = false;
            let next = st.dispatch();
            if next != me {
                st.quiescent = false;
                settled = false;
                st.switch_to(next);
                shared.wake(next);
                continue;
            }

            if !st.quiescent {
                // The callback runs before hosts blocked in wait_idle resume.
                if let (Some(callback), false) = (shared.idle_callback, settled) {
                    settled = true;
                    drop(st);
                    callback();
                    st = shared.state.lock();
                    continue;
                }
                settled = false;
                st.quiescent = true;
                st.trace.emit(sched::IDLE, &[]);
                shared.idle.notify_all();
            }
            shared.switch[me.slot()].wait(&mut st);
        }
    }

    pub(crate) fn emit_exit(&self, st: &KernelState, pid: ProcessId) {
        st.trace.emit(proc::EXIT, &slot_bytes(pid.slot()));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

//! Kernel-wide state guarded by the single kernel lock.
//!
//! Holding the lock stands in for running with interrupts masked. Every
//! method here assumes the caller holds it.

use std::fmt::Write as _;

use ktrace::records::{ipc, proc, sched};
use log::{debug, error, trace, warn};

use crate::config::KernelLimits;
use crate::drivers::Devices;
use crate::error::{KernelError, KernelResult};
use crate::interrupt::InterruptController;
use crate::port::{PortId, PortInfo, PortTable};
use crate::process::{Priority, ProcessId, ProcessInfo, ProcessState, ProcessTable};
use crate::ready::ReadyQueues;
use crate::trace::{slot_bytes, slot_pair, Trace};

pub(crate) struct KernelState {
    pub limits: KernelLimits,
    pub procs: ProcessTable,
    pub ready: ReadyQueues,
    pub ports: PortTable,
    pub pic: InterruptController,
    pub devices: Devices,
    pub active: ProcessId,
    pub idle: ProcessId,
    /// Slot that followed the active process when it left the ready list.
    resume: Option<usize>,
    /// Set when an interrupt window must run the dispatcher.
    pub resched: bool,
    pub quiescent: bool,
    pub halted: Option<String>,
    pub shutdown: bool,
    pub timer_port: Option<PortId>,
    pub com_port: Option<PortId>,
    pub keyboard_port: Option<PortId>,
    pub trace: Trace,
}

impl KernelState {
    pub fn new(limits: KernelLimits, trace: Trace) -> Self {
        let first = ProcessId::new(0, 0);
        Self {
            limits,
            procs: ProcessTable::with_capacity(limits.max_processes),
            ready: ReadyQueues::new(),
            ports: PortTable::with_capacity(limits.max_ports),
            pic: InterruptController::new(),
            devices: Devices::default(),
            active: first,
            idle: first,
            resume: None,
            resched: false,
            quiescent: false,
            halted: None,
            shutdown: false,
            timer_port: None,
            com_port: None,
            keyboard_port: None,
            trace,
        }
    }

    /// True if the calling thread must stop: the kernel halted or shut down,
    /// or `pid` was destroyed.
    pub fn must_unwind(&self, pid: ProcessId) -> bool {
        self.halted.is_some() || self.shutdown || !self.procs.contains(pid)
    }

    pub fn is_quiescent(&self) -> bool {
        self.quiescent && self.active == self.idle && !self.pic.has_pending()
    }

    /// Links `pid` into its ready list and marks it ready.
    pub fn add_ready(&mut self, pid: ProcessId) {
        if !self.procs.contains(pid) {
            self.fatal(format!("add_ready_queue: stale process {pid}"));
        }
        if let Err(err) = self.ready.add(&mut self.procs, pid.slot()) {
            self.fatal(err.to_string());
        }
        if let Some(pcb) = self.procs.get_mut(pid) {
            pcb.state = ProcessState::Ready;
        }
    }

    /// Unlinks `pid` from its ready list. The caller sets the blocked state.
    pub fn remove_ready(&mut self, pid: ProcessId) {
        if !self.procs.contains(pid) {
            self.fatal(format!("remove_ready_queue: stale process {pid}"));
        }
        match self.ready.remove(&mut self.procs, pid.slot()) {
            Ok(next) => {
                if pid == self.active {
                    self.resume = next;
                }
            }
            Err(err) => self.fatal(err.to_string()),
        }
    }

    pub fn set_state(&mut self, pid: ProcessId, state: ProcessState) {
        if let Some(pcb) = self.procs.get_mut(pid) {
            pcb.state = state;
        }
    }

    pub fn state_of(&self, pid: ProcessId) -> Option<ProcessState> {
        self.procs.get(pid).map(|pcb| pcb.state)
    }

    /// Selects the next process to run. An empty ready set is fatal.
    pub fn dispatch(&mut self) -> ProcessId {
        let resume = self.resume.take();
        let slot = match self.ready.dispatch(&self.procs, self.active.slot(), resume) {
            Some(slot) => slot,
            None => self.fatal("dispatcher: no process is ready"),
        };
        match self.procs.id_at(slot) {
            Some(pid) => pid,
            None => self.fatal(format!("dispatcher: slot {slot} is not in use")),
        }
    }

    /// Hands the CPU to `next`. The caller wakes its thread.
    pub fn switch_to(&mut self, next: ProcessId) {
        if next == self.active {
            return;
        }
        trace!("switch {} -> {}", self.active, next);
        self.trace
            .emit(sched::NEXT, &slot_pair(self.active.slot(), next.slot()));
        self.active = next;
    }

    /// Delivers every latched interrupt whose handler is waiting. Returns
    /// true if any process was woken.
    pub fn deliver_pending(&mut self) -> bool {
        let vectors = self.pic.take_deliverable();
        let delivered = !vectors.is_empty();
        for vector in vectors {
            let Some(pid) = self.pic.handler(vector) else {
                self.fatal(format!("service_intr_{vector:#04x}: Spurious interrupt"));
            };
            if self.state_of(pid) != Some(ProcessState::InterruptBlocked) {
                self.fatal(format!("service_intr_{vector:#04x}: No process waiting"));
            }
            trace!("interrupt {vector:#04x} -> {pid}");
            let [a, b] = slot_bytes(pid.slot());
            self.trace.emit(ktrace::records::intr::DELIVER, &[vector, a, b]);
            self.add_ready(pid);
        }
        if delivered {
            self.resched = true;
        }
        delivered
    }

    /// Allocates a PCB plus its implicit port and links it ready.
    pub fn create_slot(
        &mut self,
        name: &str,
        priority: Priority,
    ) -> KernelResult<(ProcessId, PortId)> {
        if let Some(reason) = &self.halted {
            return Err(KernelError::Halted(reason.clone()));
        }
        let pid = self.procs.allocate(name, priority)?;
        let port = match self.ports.allocate(&mut self.procs, pid) {
            Ok(port) => port,
            Err(err) => {
                self.procs.release(pid.slot());
                return Err(err);
            }
        };
        if let Some(pcb) = self.procs.get_mut(pid) {
            pcb.home_port = Some(port);
        }
        self.add_ready(pid);

        debug!("created process {pid} '{name}' at priority {priority} with {port}");
        let [a, b] = slot_bytes(pid.slot());
        self.trace.emit(proc::CREATE, &[a, b, priority.value()]);
        Ok((pid, port))
    }

    pub fn create_port(&mut self, owner: ProcessId) -> KernelResult<PortId> {
        let port = self.ports.allocate(&mut self.procs, owner)?;
        debug!("created {port} for {owner}");
        Ok(port)
    }

    /// True iff any port of `pid`, open or closed, has a waiting sender.
    pub fn check_messages(&self, pid: ProcessId) -> bool {
        self.procs
            .get(pid)
            .is_some_and(|pcb| self.ports.has_waiting(pcb.first_port))
    }

    /// Kills `target` if the rules allow it. `caller` is `None` for the host.
    ///
    /// Without `force` the target must be ready, outside priority 0, and have
    /// no waiting senders. The running process and the idle process are never
    /// killed here; a forced self-kill exits through `Process::kill_process`.
    pub fn kill(&mut self, target: ProcessId, force: bool, caller: Option<ProcessId>) -> bool {
        let Some(pcb) = self.procs.get(target) else {
            warn!("kill {target}: no such process");
            return false;
        };
        let refusal = if Some(target) == caller || target == self.active {
            Some("target is running")
        } else if target == self.idle {
            Some("target is the idle process")
        } else if force {
            None
        } else if pcb.state != ProcessState::Ready {
            Some("target is blocked")
        } else if pcb.priority == Priority::IDLE {
            Some("target runs at priority 0")
        } else if self.check_messages(target) {
            Some("target has pending messages")
        } else {
            None
        };

        if let Some(reason) = refusal {
            warn!("kill {target} refused: {reason}");
            return false;
        }

        debug!("killing {target}{}", if force { " (forced)" } else { "" });
        self.trace.emit(proc::KILL, &slot_bytes(target.slot()));
        self.destroy(target);
        true
    }

    /// Tears down `pid`: queue membership, interrupt registration, ports and
    /// finally the slot itself.
    pub fn destroy(&mut self, pid: ProcessId) {
        let Some(pcb) = self.procs.get(pid) else {
            return;
        };
        let linked = pcb.links.is_some();
        let blocked_on = pcb.blocked_on;
        let wait_vector = pcb.wait_vector;

        if linked {
            self.remove_ready(pid);
        }
        if let Some(port_slot) = blocked_on {
            self.ports
                .unlink_blocked(&mut self.procs, port_slot, pid.slot());
        }
        self.pic.unregister_process(pid, wait_vector);
        self.remove_ports(pid);
        self.procs.release(pid.slot());
    }

    /// Frees every port owned by `owner`. Senders blocked on those ports stay
    /// blocked; they are reported, not woken.
    pub fn remove_ports(&mut self, owner: ProcessId) {
        let Some(first) = self.procs.get(owner).map(|pcb| pcb.first_port) else {
            return;
        };
        for port_slot in self.ports.chain(first) {
            let id = self.ports.id_at(port_slot);
            let stranded = self.ports.release(&mut self.procs, port_slot);
            for slot in stranded {
                if let Some(sender) = self.procs.id_at(slot) {
                    warn!(
                        "{sender} stays blocked: port {} of {owner} was removed",
                        id.map(|p| p.to_string()).unwrap_or_default()
                    );
                }
            }
            if let Some(id) = id {
                debug!("removed {id}");
            }
        }
        if let Some(pcb) = self.procs.get_mut(owner) {
            pcb.first_port = None;
            pcb.home_port = None;
        }
    }

    pub fn trace_ipc(&self, record: u8, sender: ProcessId, port: PortId, handed_off: bool) {
        let [a, b, c, d] = slot_pair(sender.slot(), port.slot());
        self.trace.emit(record, &[a, b, c, d, handed_off as u8]);
    }

    pub fn trace_receive(&self, receiver: ProcessId, sender: ProcessId) {
        self.trace
            .emit(ipc::RECEIVE, &slot_pair(receiver.slot(), sender.slot()));
    }

    pub fn process_info(&self, pid: ProcessId) -> Option<ProcessInfo> {
        self.procs.get(pid).map(|pcb| ProcessInfo {
            id: pid,
            name: pcb.name.clone(),
            priority: pcb.priority,
            state: pcb.state,
            active: pid == self.active,
        })
    }

    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.procs
            .iter()
            .filter_map(|(pid, _)| self.process_info(pid))
            .collect()
    }

    pub fn port_info(&self, id: PortId) -> Option<PortInfo> {
        let port = self.ports.get(id)?;
        let owner = port.owner?;
        let blocked = self
            .ports
            .blocked(&self.procs, id.slot())
            .into_iter()
            .filter_map(|slot| self.procs.id_at(slot))
            .collect();
        Some(PortInfo {
            id,
            owner,
            open: port.open,
            blocked,
        })
    }

    pub fn port_owner(&self, id: PortId) -> Option<ProcessId> {
        self.ports.get(id).and_then(|port| port.owner)
    }

    /// Process table in the classic dump layout.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        out.push_str("State          \tActive\tPrio\tName\n");
        out.push_str("----------------------------------------------------\n");
        for (pid, pcb) in self.procs.iter() {
            let marker = if pid == self.active { "*     " } else { "      " };
            let _ = writeln!(
                out,
                "{}\t{}\t{:4}\t{}",
                pcb.state.label(),
                marker,
                pcb.priority.value(),
                pcb.name
            );
        }
        out
    }

    /// Stops the kernel: records the reason, logs the process table and
    /// panics the calling thread. Parked threads are woken by whoever catches
    /// the panic.
    pub fn fatal(&mut self, reason: impl Into<String>) -> ! {
        let reason = reason.into();
        if self.halted.is_none() {
            self.halted = Some(reason.clone());
        }
        error!("kernel panic: {reason}");
        for line in self.dump().lines() {
            error!("{line}");
        }
        panic!("kernel panic: {reason}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> KernelState {
        let mut st = KernelState::new(
            KernelLimits {
                max_processes: 6,
                max_ports: 12,
            },
            Trace::default(),
        );
        let (idle, _) = st.create_slot("idle", Priority::IDLE).unwrap();
        st.idle = idle;
        st.active = idle;
        st
    }

    #[test]
    fn create_links_process_and_its_port() {
        let mut st = state();
        let (pid, port) = st.create_slot("worker", Priority::new(3).unwrap()).unwrap();

        assert_eq!(st.state_of(pid), Some(ProcessState::Ready));
        assert_eq!(st.port_owner(port), Some(pid));
        assert_eq!(st.ready.members(&st.procs, 3), vec![pid.slot()]);
    }

    #[test]
    fn create_rolls_back_when_ports_run_out() {
        let mut st = KernelState::new(
            KernelLimits {
                max_processes: 2,
                max_ports: 2,
            },
            Trace::default(),
        );
        let (first, _) = st.create_slot("a", Priority::new(1).unwrap()).unwrap();
        st.create_port(first).unwrap();

        assert!(matches!(
            st.create_slot("b", Priority::new(1).unwrap()),
            Err(KernelError::PortTableFull)
        ));
        assert_eq!(st.processes().len(), 1);
    }

    #[test]
    fn kill_refuses_blocked_idle_and_priority_zero() {
        let mut st = state();
        let (blocked, _) = st.create_slot("blocked", Priority::new(3).unwrap()).unwrap();
        st.remove_ready(blocked);
        st.set_state(blocked, ProcessState::ReceiveBlocked);
        let (low, _) = st.create_slot("low", Priority::IDLE).unwrap();

        assert!(!st.kill(blocked, false, None));
        assert!(!st.kill(low, false, None));
        assert!(!st.kill(st.idle, true, None));
        assert_eq!(st.processes().len(), 3);

        assert!(st.kill(blocked, true, None));
        assert!(st.process_info(blocked).is_none());
    }

    #[test]
    fn kill_refuses_target_with_waiting_sender() {
        let mut st = state();
        let (target, port) = st.create_slot("target", Priority::new(2).unwrap()).unwrap();
        let (sender, _) = st.create_slot("sender", Priority::new(2).unwrap()).unwrap();
        st.remove_ready(sender);
        st.set_state(sender, ProcessState::SendBlocked);
        st.ports
            .push_blocked(&mut st.procs, port.slot(), sender.slot());

        assert!(st.check_messages(target));
        assert!(!st.kill(target, false, None));
    }

    #[test]
    fn destroy_strands_senders_without_waking_them() {
        let mut st = state();
        let (owner, port) = st.create_slot("owner", Priority::new(2).unwrap()).unwrap();
        let (sender, _) = st.create_slot("sender", Priority::new(2).unwrap()).unwrap();
        st.remove_ready(sender);
        st.set_state(sender, ProcessState::SendBlocked);
        st.ports
            .push_blocked(&mut st.procs, port.slot(), sender.slot());

        assert!(st.kill(owner, true, None));
        assert!(st.port_info(port).is_none());
        assert_eq!(st.state_of(sender), Some(ProcessState::SendBlocked));
        assert_eq!(st.procs.get(sender).unwrap().blocked_on, None);
    }

    #[test]
    fn destroying_a_blocked_sender_unlinks_it() {
        let mut st = state();
        let (_, port) = st.create_slot("owner", Priority::new(2).unwrap()).unwrap();
        let (sender, _) = st.create_slot("sender", Priority::new(2).unwrap()).unwrap();
        st.remove_ready(sender);
        st.set_state(sender, ProcessState::SendBlocked);
        st.ports
            .push_blocked(&mut st.procs, port.slot(), sender.slot());

        assert!(st.kill(sender, true, None));
        assert!(st.port_info(port).unwrap().blocked.is_empty());
    }

    #[test]
    fn dump_marks_the_active_process() {
        let mut st = state();
        st.create_slot("worker", Priority::new(5).unwrap()).unwrap();
        let dump = st.dump();
        let lines: Vec<_> = dump.lines().collect();

        assert_eq!(lines[0], "State          \tActive\tPrio\tName");
        assert_eq!(lines[2], "READY          \t*     \t   0\tidle");
        assert_eq!(lines[3], "READY          \t      \t   5\tworker");
    }

    #[test]
    #[should_panic(expected = "no process is ready")]
    fn dispatch_with_nothing_ready_is_fatal() {
        let mut st = state();
        let idle = st.idle;
        st.remove_ready(idle);
        st.dispatch();
    }
}

//! Ports and their blocked-sender FIFOs.

use std::fmt;

use crate::error::{KernelError, KernelResult};
use crate::process::{ProcessId, ProcessTable};

/// Handle to a port. The generation guards against a recycled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId {
    slot: u16,
    generation: u32,
}

impl PortId {
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

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port{}.{}", self.slot, self.generation)
    }
}

#[derive(Debug)]
pub(crate) struct Port {
    pub generation: u32,
    pub used: bool,
    pub open: bool,
    pub owner: Option<ProcessId>,
    /// Blocked-list ends, as process slots.
    pub head: Option<usize>,
    pub tail: Option<usize>,
    pub len: usize,
    /// Next port of the same owner.
    pub next: Option<usize>,
}

impl Port {
    fn unused() -> Self {
        Self {
            generation: 0,
            used: false,
            open: true,
            owner: None,
            head: None,
            tail: None,
            len: 0,
            next: None,
        }
    }
}

/// Snapshot of one port, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub id: PortId,
    pub owner: ProcessId,
    pub open: bool,
    /// Processes waiting in the blocked list, oldest first.
    pub blocked: Vec<ProcessId>,
}

pub(crate) struct PortTable {
    slots: Vec<Port>,
}

impl PortTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Port::unused()).collect(),
        }
    }

    /// Claims a free port for `owner` and links it at the head of the
    /// owner's port chain.
    pub fn allocate(&mut self, procs: &mut ProcessTable, owner: ProcessId) -> KernelResult<PortId> {
        let pcb = procs
            .get_mut(owner)
            .ok_or(KernelError::StaleProcess(owner))?;
        let slot = self
            .slots
            .iter()
            .position(|port| !port.used)
            .ok_or(KernelError::PortTableFull)?;

        let port = &mut self.slots[slot];
        port.used = true;
        port.open = true;
        port.owner = Some(owner);
        port.head = None;
        port.tail = None;
        port.len = 0;
        port.next = pcb.first_port;
        pcb.first_port = Some(slot);

        Ok(PortId::new(slot, port.generation))
    }

    pub fn get(&self, id: PortId) -> Option<&Port> {
        self.slots
            .get(id.slot())
            .filter(|port| port.used && port.generation == id.generation)
    }

    pub fn get_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.slots
            .get_mut(id.slot())
            .filter(|port| port.used && port.generation == id.generation)
    }

    pub fn at(&self, slot: usize) -> Option<&Port> {
        self.slots.get(slot).filter(|port| port.used)
    }

    pub fn id_at(&self, slot: usize) -> Option<PortId> {
        self.at(slot).map(|port| PortId::new(slot, port.generation))
    }

    /// Ports owned by the process whose chain starts at `first`, newest first.
    pub fn chain(&self, first: Option<usize>) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = first;
        while let Some(slot) = cursor {
            if out.len() >= self.slots.len() {
                break;
            }
            out.push(slot);
            cursor = self.at(slot).and_then(|port| port.next);
        }
        out
    }

    /// Appends `sender` to the port's blocked FIFO.
    pub fn push_blocked(&mut self, procs: &mut ProcessTable, port_slot: usize, sender: usize) {
        let tail = self.slots[port_slot].tail;
        match tail.and_then(|slot| procs.pcb_at_mut(slot)) {
            Some(last) => last.next_blocked = Some(sender),
            None => self.slots[port_slot].head = Some(sender),
        }
        if let Some(pcb) = procs.pcb_at_mut(sender) {
            pcb.next_blocked = None;
            pcb.blocked_on = Some(port_slot);
        }
        let port = &mut self.slots[port_slot];
        port.tail = Some(sender);
        port.len += 1;
    }

    /// Pops the oldest waiting sender from the first open port in the chain.
    pub fn pop_first_waiting(
        &mut self,
        procs: &mut ProcessTable,
        first: Option<usize>,
    ) -> Option<usize> {
        let port_slot = self
            .chain(first)
            .into_iter()
            .find(|&slot| self.slots[slot].open && self.slots[slot].head.is_some())?;

        let sender = self.slots[port_slot].head?;
        let next = procs.pcb_at_mut(sender).and_then(|pcb| {
            pcb.blocked_on = None;
            pcb.next_blocked.take()
        });

        let port = &mut self.slots[port_slot];
        port.head = next;
        if next.is_none() {
            port.tail = None;
        }
        port.len = port.len.saturating_sub(1);
        Some(sender)
    }

    /// Removes `sender` from whatever position it holds in the port's FIFO.
    pub fn unlink_blocked(&mut self, procs: &mut ProcessTable, port_slot: usize, sender: usize) {
        let Some(port) = self.slots.get(port_slot) else {
            return;
        };
        let mut prev: Option<usize> = None;
        let mut cursor = port.head;
        while let Some(slot) = cursor {
            let next = procs.pcb_at(slot).and_then(|pcb| pcb.next_blocked);
            if slot == sender {
                match prev.and_then(|p| procs.pcb_at_mut(p)) {
                    Some(before) => before.next_blocked = next,
                    None => self.slots[port_slot].head = next,
                }
                if self.slots[port_slot].tail == Some(sender) {
                    self.slots[port_slot].tail = prev;
                }
                self.slots[port_slot].len = self.slots[port_slot].len.saturating_sub(1);
                if let Some(pcb) = procs.pcb_at_mut(sender) {
                    pcb.next_blocked = None;
                    pcb.blocked_on = None;
                }
                return;
            }
            prev = Some(slot);
            cursor = next;
        }
    }

    /// Blocked senders of a port, oldest first.
    pub fn blocked(&self, procs: &ProcessTable, port_slot: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = self.at(port_slot).and_then(|port| port.head);
        while let Some(slot) = cursor {
            if out.len() >= procs.capacity() {
                break;
            }
            out.push(slot);
            cursor = procs.pcb_at(slot).and_then(|pcb| pcb.next_blocked);
        }
        out
    }

    /// True if any port in the chain, open or closed, has a waiting sender.
    pub fn has_waiting(&self, first: Option<usize>) -> bool {
        self.chain(first)
            .into_iter()
            .any(|slot| self.slots[slot].head.is_some())
    }

    /// Frees one port. Blocked senders are detached from the list but left in
    /// their blocked state; the returned slots name them.
    pub fn release(&mut self, procs: &mut ProcessTable, port_slot: usize) -> Vec<usize> {
        let stranded = self.blocked(procs, port_slot);
        for &slot in &stranded {
            if let Some(pcb) = procs.pcb_at_mut(slot) {
                pcb.next_blocked = None;
                pcb.blocked_on = None;
            }
        }
        if let Some(port) = self.slots.get_mut(port_slot) {
            let generation = port.generation.wrapping_add(1);
            *port = Port::unused();
            port.generation = generation;
        }
        stranded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Priority;

    fn setup(processes: usize) -> (ProcessTable, PortTable, Vec<ProcessId>) {
        let mut procs = ProcessTable::with_capacity(processes);
        let pids = (0..processes)
            .map(|_| procs.allocate("p", Priority::new(1).unwrap()).unwrap())
            .collect();
        (procs, PortTable::with_capacity(4), pids)
    }

    #[test]
    fn new_ports_go_to_the_head_of_the_chain() {
        let (mut procs, mut ports, pids) = setup(1);
        let a = ports.allocate(&mut procs, pids[0]).unwrap();
        let b = ports.allocate(&mut procs, pids[0]).unwrap();

        let first = procs.get(pids[0]).unwrap().first_port;
        assert_eq!(ports.chain(first), vec![b.slot(), a.slot()]);
    }

    #[test]
    fn blocked_list_is_fifo() {
        let (mut procs, mut ports, pids) = setup(4);
        let port = ports.allocate(&mut procs, pids[0]).unwrap();
        for pid in &pids[1..] {
            ports.push_blocked(&mut procs, port.slot(), pid.slot());
        }
        assert_eq!(ports.get(port).unwrap().len, 3);

        let first = procs.get(pids[0]).unwrap().first_port;
        let order: Vec<_> = (0..3)
            .map(|_| ports.pop_first_waiting(&mut procs, first).unwrap())
            .collect();
        assert_eq!(order, vec![pids[1].slot(), pids[2].slot(), pids[3].slot()]);
        assert!(ports.pop_first_waiting(&mut procs, first).is_none());
        assert_eq!(ports.get(port).unwrap().tail, None);
    }

    #[test]
    fn closed_ports_are_skipped_by_pop_but_counted_as_waiting() {
        let (mut procs, mut ports, pids) = setup(2);
        let port = ports.allocate(&mut procs, pids[0]).unwrap();
        ports.push_blocked(&mut procs, port.slot(), pids[1].slot());
        ports.get_mut(port).unwrap().open = false;

        let first = procs.get(pids[0]).unwrap().first_port;
        assert!(ports.pop_first_waiting(&mut procs, first).is_none());
        assert!(ports.has_waiting(first));
    }

    #[test]
    fn unlink_from_the_middle_keeps_order() {
        let (mut procs, mut ports, pids) = setup(4);
        let port = ports.allocate(&mut procs, pids[0]).unwrap();
        for pid in &pids[1..] {
            ports.push_blocked(&mut procs, port.slot(), pid.slot());
        }
        ports.unlink_blocked(&mut procs, port.slot(), pids[2].slot());
        assert_eq!(
            ports.blocked(&procs, port.slot()),
            vec![pids[1].slot(), pids[3].slot()]
        );

        ports.unlink_blocked(&mut procs, port.slot(), pids[3].slot());
        assert_eq!(ports.get(port).unwrap().tail, Some(pids[1].slot()));
        assert_eq!(ports.get(port).unwrap().len, 1);
    }

    #[test]
    fn release_invalidates_handle_and_reports_stranded() {
        let (mut procs, mut ports, pids) = setup(2);
        let port = ports.allocate(&mut procs, pids[0]).unwrap();
        ports.push_blocked(&mut procs, port.slot(), pids[1].slot());

        let stranded = ports.release(&mut procs, port.slot());
        assert_eq!(stranded, vec![pids[1].slot()]);
        assert!(ports.get(port).is_none());
        assert_eq!(procs.get(pids[1]).unwrap().blocked_on, None);
    }

    #[test]
    fn exhaustion_is_reported() {
        let (mut procs, mut ports, pids) = setup(1);
        for _ in 0..4 {
            ports.allocate(&mut procs, pids[0]).unwrap();
        }
        assert!(matches!(
            ports.allocate(&mut procs, pids[0]),
            Err(KernelError::PortTableFull)
        ));
    }
}

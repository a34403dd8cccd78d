//! Per-priority circular ready lists and the dispatch rule.

use std::fmt;

use crate::process::{Links, ProcessTable, PRIORITY_LEVELS};

#[derive(Default, Clone, Copy)]
struct ReadySet {
    bits: u8,
}

impl ReadySet {
    fn insert(&mut self, level: usize) {
        Self::assert_range(level);
        self.bits |= 1u8 << level;
    }

    fn remove(&mut self, level: usize) {
        Self::assert_range(level);
        self.bits &= !(1u8 << level);
    }

    #[cfg(test)]
    fn contains(&self, level: usize) -> bool {
        Self::assert_range(level);
        (self.bits & (1u8 << level)) != 0
    }

    fn max(&self) -> Option<usize> {
        if self.bits == 0 {
            None
        } else {
            Some(7 - self.bits.leading_zeros() as usize)
        }
    }

    fn assert_range(level: usize) {
        assert!(
            level < PRIORITY_LEVELS,
            "priority {level} exceeds supported range 0..7"
        );
    }
}

/// Linkage faults. Each one means the ready lists no longer match the PCBs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkError {
    /// The slot is not in use.
    Stale(usize),
    AlreadyLinked(usize),
    NotLinked(usize),
    /// A neighbour pointer leads to an unlinked or unused slot.
    Corrupt(usize),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale(slot) => write!(f, "ready queue: slot {slot} is not in use"),
            Self::AlreadyLinked(slot) => {
                write!(f, "ready queue: slot {slot} is already linked")
            }
            Self::NotLinked(slot) => write!(f, "ready queue: slot {slot} is not linked"),
            Self::Corrupt(slot) => write!(f, "ready queue: broken link at slot {slot}"),
        }
    }
}

/// Eight circular doubly-linked lists threaded through the PCBs.
#[derive(Default)]
pub(crate) struct ReadyQueues {
    heads: [Option<usize>; PRIORITY_LEVELS],
    occupied: ReadySet,
}

fn links_mut(procs: &mut ProcessTable, slot: usize) -> Result<&mut Links, LinkError> {
    procs
        .pcb_at_mut(slot)
        .and_then(|pcb| pcb.links.as_mut())
        .ok_or(LinkError::Corrupt(slot))
}

impl ReadyQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `slot` at the tail of its priority level.
    pub fn add(&mut self, procs: &mut ProcessTable, slot: usize) -> Result<(), LinkError> {
        let pcb = procs.pcb_at(slot).ok_or(LinkError::Stale(slot))?;
        if pcb.links.is_some() {
            return Err(LinkError::AlreadyLinked(slot));
        }
        let level = pcb.priority.level();

        let links = match self.heads[level] {
            None => {
                self.heads[level] = Some(slot);
                self.occupied.insert(level);
                Links {
                    next: slot,
                    prev: slot,
                }
            }
            Some(head) => {
                let tail = links_mut(procs, head)?.prev;
                links_mut(procs, tail)?.next = slot;
                links_mut(procs, head)?.prev = slot;
                Links {
                    next: head,
                    prev: tail,
                }
            }
        };

        if let Some(pcb) = procs.pcb_at_mut(slot) {
            pcb.links = Some(links);
        }
        Ok(())
    }

    /// Unlinks `slot`, returning the member that followed it, if any remain.
    pub fn remove(
        &mut self,
        procs: &mut ProcessTable,
        slot: usize,
    ) -> Result<Option<usize>, LinkError> {
        let pcb = procs.pcb_at_mut(slot).ok_or(LinkError::Stale(slot))?;
        let level = pcb.priority.level();
        let links = pcb.links.take().ok_or(LinkError::NotLinked(slot))?;

        if links.next == slot {
            if self.heads[level] != Some(slot) {
                return Err(LinkError::Corrupt(slot));
            }
            self.heads[level] = None;
            self.occupied.remove(level);
            return Ok(None);
        }

        links_mut(procs, links.prev)?.next = links.next;
        links_mut(procs, links.next)?.prev = links.prev;
        if self.heads[level] == Some(slot) {
            self.heads[level] = Some(links.next);
        }
        Ok(Some(links.next))
    }

    /// Highest non-empty level.
    pub fn highest(&self) -> Option<usize> {
        self.occupied.max()
    }

    /// Picks the next process to run.
    ///
    /// At the highest non-empty level: if `active` is linked there, its
    /// successor continues the round robin. If `active` just left that level,
    /// `resume` (the member that followed it) takes its turn. Otherwise the
    /// level's head runs.
    pub fn dispatch(
        &self,
        procs: &ProcessTable,
        active: usize,
        resume: Option<usize>,
    ) -> Option<usize> {
        let level = self.highest()?;
        let at_level = |slot: usize| {
            procs
                .pcb_at(slot)
                .filter(|pcb| pcb.links.is_some() && pcb.priority.level() == level)
        };

        if let Some(links) = at_level(active).and_then(|pcb| pcb.links) {
            return Some(links.next);
        }
        if let Some(slot) = resume.filter(|&slot| at_level(slot).is_some()) {
            return Some(slot);
        }
        self.heads[level]
    }

    /// Members of one level in round-robin order starting at the head.
    #[cfg(test)]
    pub fn members(&self, procs: &ProcessTable, level: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let Some(head) = self.heads[level] else {
            return out;
        };
        let mut cursor = head;
        loop {
            out.push(cursor);
            match procs.pcb_at(cursor).and_then(|pcb| pcb.links) {
                Some(links) if links.next != head && out.len() < procs.capacity() => {
                    cursor = links.next;
                }
                _ => break,
            }
        }
        out
    }

    #[cfg(test)]
    pub fn is_empty(&self, level: usize) -> bool {
        !self.occupied.contains(level)
    }

    #[cfg(test)]
    pub fn head(&self, level: usize) -> Option<usize> {
        self.heads[level]
    }
}

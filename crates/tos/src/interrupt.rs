//! Simulated interrupt controller and the vector-to-process table.

use crate::process::ProcessId;

pub const MAX_INTERRUPTS: usize = 256;

pub const TIMER_IRQ: u8 = 0x60;
pub const KEYBOARD_IRQ: u8 = 0x61;
pub const COM2_IRQ: u8 = 0x63;
pub const COM1_IRQ: u8 = 0x64;

/// Vectors routed through the remapped PIC pair (master at 0x60, slave at
/// 0x68).
pub const PIC_VECTORS: std::ops::RangeInclusive<u8> = 0x60..=0x6F;

/// Ascending, so delivery runs lowest vector first.
const SERVICED: [u8; 4] = [TIMER_IRQ, KEYBOARD_IRQ, COM2_IRQ, COM1_IRQ];

/// What the controller did with a raised vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseOutcome {
    /// Latched for delivery at the next interrupt window.
    Latched,
    /// A PIC line without a service routine; the default handler drops it.
    Ignored,
    /// A serviced line with nobody waiting on it.
    Spurious,
    /// Outside the PIC range.
    Unexpected,
}

pub(crate) struct InterruptController {
    table: Vec<Option<ProcessId>>,
    latched: Vec<bool>,
    in_service: Vec<bool>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            table: vec![None; MAX_INTERRUPTS],
            latched: vec![false; MAX_INTERRUPTS],
            in_service: vec![false; MAX_INTERRUPTS],
        }
    }

    pub fn is_serviced(vector: u8) -> bool {
        SERVICED.contains(&vector)
    }

    /// Registers `pid` as the handler of `vector` and ends any service in
    /// progress on it.
    pub fn register(&mut self, vector: u8, pid: ProcessId) {
        self.table[vector as usize] = Some(pid);
        self.in_service[vector as usize] = false;
    }

    pub fn clear(&mut self, vector: u8) {
        self.table[vector as usize] = None;
    }

    pub fn handler(&self, vector: u8) -> Option<ProcessId> {
        self.table[vector as usize]
    }

    /// True while a handler is registered or still servicing the last
    /// delivery.
    pub fn is_claimed(&self, vector: u8) -> bool {
        self.table[vector as usize].is_some() || self.in_service[vector as usize]
    }

    /// Drops every registration and in-service mark held by `pid`.
    pub fn unregister_process(&mut self, pid: ProcessId, wait_vector: Option<u8>) {
        for entry in self.table.iter_mut() {
            if *entry == Some(pid) {
                *entry = None;
            }
        }
        if let Some(vector) = wait_vector {
            self.in_service[vector as usize] = false;
        }
    }

    /// Raises a vector. Repeated raises before delivery coalesce.
    pub fn raise(&mut self, vector: u8) -> RaiseOutcome {
        if !PIC_VECTORS.contains(&vector) {
            return RaiseOutcome::Unexpected;
        }
        if !Self::is_serviced(vector) {
            return RaiseOutcome::Ignored;
        }
        if !self.is_claimed(vector) {
            return RaiseOutcome::Spurious;
        }
        self.latched[vector as usize] = true;
        RaiseOutcome::Latched
    }

    /// Takes the latched vectors that are not in service, lowest first, and
    /// marks them in service.
    pub fn take_deliverable(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for vector in SERVICED {
            let idx = vector as usize;
            if self.latched[idx] && !self.in_service[idx] && self.table[idx].is_some() {
                self.latched[idx] = false;
                self.in_service[idx] = true;
                out.push(vector);
            }
        }
        out
    }

    pub fn has_pending(&self) -> bool {
        SERVICED.iter().any(|&v| {
            let idx = v as usize;
            self.latched[idx] && !self.in_service[idx] && self.table[idx].is_some()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(slot: usize) -> ProcessId {
        ProcessId::new(slot, 0)
    }

    #[test]
    fn unregistered_serviced_vector_is_spurious() {
        let mut pic = InterruptController::new();
        assert_eq!(pic.raise(TIMER_IRQ), RaiseOutcome::Spurious);
    }

    #[test]
    fn vectors_outside_the_pic_are_unexpected() {
        let mut pic = InterruptController::new();
        assert_eq!(pic.raise(0x20), RaiseOutcome::Unexpected);
        assert_eq!(pic.raise(0x70), RaiseOutcome::Unexpected);
        assert_eq!(pic.raise(0x65), RaiseOutcome::Ignored);
    }

    #[test]
    fn raises_coalesce_until_delivered() {
        let mut pic = InterruptController::new();
        pic.register(TIMER_IRQ, pid(3));
        assert_eq!(pic.raise(TIMER_IRQ), RaiseOutcome::Latched);
        assert_eq!(pic.raise(TIMER_IRQ), RaiseOutcome::Latched);

        assert_eq!(pic.take_deliverable(), vec![TIMER_IRQ]);
        assert!(pic.take_deliverable().is_empty());
    }

    #[test]
    fn latched_vectors_are_delivered_lowest_first() {
        let mut pic = InterruptController::new();
        for (vector, slot) in [(COM1_IRQ, 1), (TIMER_IRQ, 2), (COM2_IRQ, 3), (KEYBOARD_IRQ, 4)] {
            pic.register(vector, pid(slot));
        }
        for vector in [COM1_IRQ, KEYBOARD_IRQ, COM2_IRQ, TIMER_IRQ] {
            pic.raise(vector);
        }
        assert_eq!(
            pic.take_deliverable(),
            vec![TIMER_IRQ, KEYBOARD_IRQ, COM2_IRQ, COM1_IRQ]
        );
    }

    #[test]
    fn in_service_vector_stays_latched_until_reregistered() {
        let mut pic = InterruptController::new();
        pic.register(COM1_IRQ, pid(2));
        pic.raise(COM1_IRQ);
        assert_eq!(pic.take_deliverable(), vec![COM1_IRQ]);

        pic.clear(COM1_IRQ);
        assert_eq!(pic.raise(COM1_IRQ), RaiseOutcome::Latched);
        assert!(!pic.has_pending());

        pic.register(COM1_IRQ, pid(2));
        assert!(pic.has_pending());
        assert_eq!(pic.take_deliverable(), vec![COM1_IRQ]);
    }

    #[test]
    fn unregister_releases_a_dead_handler() {
        let mut pic = InterruptController::new();
        pic.register(KEYBOARD_IRQ, pid(4));
        pic.unregister_process(pid(4), Some(KEYBOARD_IRQ));
        assert!(!pic.is_claimed(KEYBOARD_IRQ));
    }
}

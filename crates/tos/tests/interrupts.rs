//! Interrupt delivery and the fatal paths of the interrupt controller.

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{bare_kernel, owner, Events};
use tos::{KernelError, ProcessState, RaiseOutcome, KEYBOARD_IRQ, TIMER_IRQ};

#[test]
fn handler_wakes_once_per_interrupt() {
    let kernel = bare_kernel();
    let count = Arc::new(AtomicU32::new(0));

    let seen = count.clone();
    let port = kernel
        .create_process(
            move |p, ()| loop {
                p.wait_for_interrupt(KEYBOARD_IRQ);
                seen.fetch_add(1, Ordering::SeqCst);
            },
            5,
            (),
            "handler",
        )
        .unwrap();
    kernel.wait_idle().unwrap();
    assert_eq!(
        kernel.process_info(owner(&kernel, port)).unwrap().state,
        ProcessState::InterruptBlocked
    );

    for expected in 1..=3 {
        assert_eq!(kernel.raise_interrupt(KEYBOARD_IRQ), RaiseOutcome::Latched);
        kernel.wait_idle().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), expected);
    }
    kernel.shutdown();
}

#[test]
fn interrupt_preempts_at_the_next_kernel_call() {
    let kernel = bare_kernel();
    let events = Events::default();

    let log = events.clone();
    kernel
        .create_process(
            move |p, ()| {
                p.wait_for_interrupt(KEYBOARD_IRQ);
                log.push("handled");
            },
            5,
            (),
            "handler",
        )
        .unwrap();
    kernel.wait_idle().unwrap();

    let log = events.clone();
    kernel
        .create_process(
            move |p, ()| {
                p.kernel().raise_interrupt(KEYBOARD_IRQ);
                log.push("raised");
                p.check_messages(p.id());
                log.push("resumed");
            },
            2,
            (),
            "worker",
        )
        .unwrap();
    kernel.wait_idle().unwrap();

    assert_eq!(events.take(), ["raised", "handled", "resumed"]);
    kernel.shutdown();
}

#[test]
fn unserviced_pic_vector_is_ignored() {
    let kernel = bare_kernel();
    assert_eq!(kernel.raise_interrupt(0x65), RaiseOutcome::Ignored);
    kernel.wait_idle().unwrap();
    assert!(kernel.halted().is_none());
    kernel.shutdown();
}

#[test]
#[should_panic(expected = "Spurious interrupt")]
fn unclaimed_timer_interrupt_is_fatal() {
    let kernel = bare_kernel();
    kernel.raise_interrupt(TIMER_IRQ);
}

#[test]
#[should_panic(expected = "unexpected interrupt")]
fn vector_outside_the_pic_is_fatal() {
    let kernel = bare_kernel();
    kernel.raise_interrupt(0x20);
}

#[test]
fn fatal_stop_halts_the_whole_kernel() {
    let kernel = bare_kernel();
    let waiter = kernel
        .create_process(|p, ()| drop(p.receive()), 3, (), "waiter")
        .unwrap();
    kernel.wait_idle().unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| kernel.raise_interrupt(0x05)));
    assert!(result.is_err());

    let reason = kernel.halted().unwrap();
    assert!(reason.contains("unexpected interrupt"));
    assert!(matches!(kernel.wait_idle(), Err(KernelError::Halted(_))));
    assert!(matches!(
        kernel.create_process(|_, ()| {}, 1, (), "late"),
        Err(KernelError::Halted(_))
    ));
    assert!(kernel.port_info(waiter).is_some());
    kernel.shutdown();
}

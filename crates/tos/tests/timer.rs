//! Sleep service driven by host timer ticks.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{bare_kernel, launch, Events};
use tos::{Kernel, KernelConfig, KernelError, Message, Process, TIMER_IRQ};

fn timer_kernel() -> Kernel {
    Kernel::boot(KernelConfig::default()).unwrap()
}

fn tick(kernel: &Kernel, n: usize) {
    for _ in 0..n {
        kernel.raise_interrupt(TIMER_IRQ);
        kernel.wait_idle().unwrap();
    }
}

fn counter_server(p: &Process, count: Arc<AtomicU32>) {
    loop {
        let (_, sender) = p.receive();
        count.fetch_add(1, Ordering::SeqCst);
        p.reply(sender);
    }
}

#[test]
fn timer_process_runs_after_boot() {
    let kernel = timer_kernel();
    let names: Vec<_> = kernel.processes().into_iter().map(|p| p.name).collect();

    assert!(names.iter().any(|n| n == "Timer process"));
    assert!(names.iter().any(|n| n == "Timer notifier"));
    assert!(kernel.timer_port().is_some());
    kernel.shutdown();
}

#[test]
fn sleepers_wake_exactly_once_after_their_ticks() {
    let kernel = timer_kernel();
    let count = Arc::new(AtomicU32::new(0));

    let server_count = count.clone();
    launch(&kernel, move |p| {
        let counter = p
            .create_process(counter_server, 4, server_count, "counter")
            .unwrap();
        for name in ["sleeper 1", "sleeper 2"] {
            p.create_process(
                move |p, ()| {
                    p.sleep(5).unwrap();
                    p.send(counter, Message::empty()).unwrap();
                },
                3,
                (),
                name,
            )
            .unwrap();
        }
    });

    tick(&kernel, 4);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    tick(&kernel, 1);
    assert_eq!(count.load(Ordering::SeqCst), 2);

    tick(&kernel, 5);
    assert_eq!(count.load(Ordering::SeqCst), 2);
    kernel.shutdown();
}

#[test]
fn sleepers_wake_in_deadline_order() {
    let kernel = timer_kernel();
    let events = Events::default();

    let log = events.clone();
    launch(&kernel, move |p| {
        for (name, ticks) in [("slow", 6), ("fast", 2), ("mid", 4), ("mid too", 4)] {
            let log = log.clone();
            p.create_process(
                move |p, ()| {
                    p.sleep(ticks).unwrap();
                    log.push(name);
                },
                3,
                (),
                name,
            )
            .unwrap();
        }
    });

    tick(&kernel, 2);
    assert_eq!(events.take(), ["fast"]);
    tick(&kernel, 2);
    assert_eq!(events.take(), ["mid", "mid too"]);
    tick(&kernel, 1);
    assert!(events.take().is_empty());
    tick(&kernel, 1);
    assert_eq!(events.take(), ["slow"]);
    kernel.shutdown();
}

#[test]
fn repeated_sleeps_accumulate_without_drift() {
    let kernel = timer_kernel();
    let events = Events::default();

    let log = events.clone();
    kernel
        .create_process(
            move |p, ()| {
                for round in 0..3 {
                    p.sleep(3).unwrap();
                    log.push(format!("wake {round}"));
                }
            },
            3,
            (),
            "periodic",
        )
        .unwrap();
    kernel.wait_idle().unwrap();

    tick(&kernel, 2);
    assert!(events.take().is_empty());
    tick(&kernel, 1);
    assert_eq!(events.take(), ["wake 0"]);
    tick(&kernel, 3);
    assert_eq!(events.take(), ["wake 1"]);
    tick(&kernel, 3);
    assert_eq!(events.take(), ["wake 2"]);
    kernel.shutdown();
}

#[test]
fn zero_and_negative_sleeps_wake_on_next_tick() {
    let kernel = timer_kernel();
    let events = Events::default();

    let log = events.clone();
    launch(&kernel, move |p| {
        for (name, ticks) in [("zero", 0), ("negative", -3)] {
            let log = log.clone();
            p.create_process(
                move |p, ()| {
                    p.sleep(ticks).unwrap();
                    log.push(name);
                },
                3,
                (),
                name,
            )
            .unwrap();
        }
    });

    assert!(events.snapshot().is_empty());
    tick(&kernel, 1);
    let mut woken = events.take();
    woken.sort();
    assert_eq!(woken, ["negative", "zero"]);
    kernel.shutdown();
}

#[test]
fn sleep_without_timer_service_fails() {
    let kernel = bare_kernel();
    let unavailable = Arc::new(AtomicU32::new(0));

    let flag = unavailable.clone();
    kernel
        .create_process(
            move |p, ()| {
                if matches!(p.sleep(1), Err(KernelError::ServiceUnavailable(_))) {
                    flag.store(1, Ordering::SeqCst);
                }
            },
            3,
            (),
            "sleeper",
        )
        .unwrap();
    kernel.wait_idle().unwrap();

    assert_eq!(unavailable.load(Ordering::SeqCst), 1);
    kernel.shutdown();
}

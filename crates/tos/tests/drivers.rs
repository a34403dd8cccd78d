//! COM1 and keyboard driver processes.

mod common;

use std::sync::{Arc, Mutex};

use common::owner;
use tos::{Kernel, KernelConfig, ProcessState};

fn driver_kernel() -> Kernel {
    Kernel::boot(
        KernelConfig::builder()
            .timer(false)
            .serial(true)
            .keyboard(true)
            .build(),
    )
    .unwrap()
}

type Slot<T> = Arc<Mutex<Option<T>>>;

#[test]
fn serial_exchange_writes_then_collects_input() {
    let kernel = driver_kernel();
    let input: Slot<Vec<u8>> = Arc::default();

    let sink = input.clone();
    kernel
        .create_process(
            move |p, ()| {
                *sink.lock().unwrap() = Some(p.serial_exchange("hello", 3).unwrap());
            },
            3,
            (),
            "client",
        )
        .unwrap();
    kernel.wait_idle().unwrap();

    assert_eq!(kernel.serial_output(), b"hello");
    assert!(input.lock().unwrap().is_none());

    for byte in *b"abc" {
        kernel.serial_input(byte);
        kernel.wait_idle().unwrap();
    }

    assert_eq!(input.lock().unwrap().as_deref(), Some(&b"abc"[..]));
    kernel.shutdown();
}

#[test]
fn input_typed_ahead_is_buffered() {
    let kernel = driver_kernel();
    for byte in *b"xyz" {
        kernel.serial_input(byte);
    }
    kernel.wait_idle().unwrap();

    let input: Slot<Vec<u8>> = Arc::default();
    let sink = input.clone();
    kernel
        .create_process(
            move |p, ()| {
                *sink.lock().unwrap() = Some(p.serial_exchange(Vec::new(), 2).unwrap());
            },
            3,
            (),
            "client",
        )
        .unwrap();
    kernel.wait_idle().unwrap();

    assert_eq!(input.lock().unwrap().as_deref(), Some(&b"xy"[..]));
    kernel.shutdown();
}

#[test]
fn second_client_queues_while_an_exchange_is_in_flight() {
    let kernel = driver_kernel();
    let com = kernel.com_port().unwrap();
    let results: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::default();

    let mut clients = Vec::new();
    for name in ["first", "second"] {
        let sink = results.clone();
        let port = kernel
            .create_process(
                move |p, ()| {
                    let got = p.serial_exchange(name, 1).unwrap();
                    sink.lock().unwrap().push((name.to_string(), got));
                },
                3,
                (),
                name,
            )
            .unwrap();
        kernel.wait_idle().unwrap();
        clients.push(owner(&kernel, port));
    }

    let port = kernel.port_info(com).unwrap();
    assert!(!port.open);
    assert_eq!(port.blocked, [clients[1]]);
    assert_eq!(
        kernel.process_info(clients[1]).unwrap().state,
        ProcessState::SendBlocked
    );

    kernel.serial_input(b'1');
    kernel.wait_idle().unwrap();
    kernel.serial_input(b'2');
    kernel.wait_idle().unwrap();

    assert_eq!(
        *results.lock().unwrap(),
        [
            ("first".to_string(), b"1".to_vec()),
            ("second".to_string(), b"2".to_vec())
        ]
    );
    assert_eq!(kernel.serial_output(), b"firstsecond");
    assert!(kernel.port_info(com).unwrap().open);
    kernel.shutdown();
}

#[test]
fn read_key_returns_pressed_keys_in_order() {
    let kernel = driver_kernel();
    let keys: Arc<Mutex<Vec<u8>>> = Arc::default();

    let sink = keys.clone();
    kernel
        .create_process(
            move |p, ()| {
                for _ in 0..3 {
                    let key = p.read_key().unwrap();
                    sink.lock().unwrap().push(key);
                }
            },
            3,
            (),
            "reader",
        )
        .unwrap();
    kernel.wait_idle().unwrap();

    kernel.key_press(b'q');
    kernel.wait_idle().unwrap();
    assert_eq!(*keys.lock().unwrap(), b"q");

    kernel.key_press(b'w');
    kernel.key_press(b'e');
    kernel.wait_idle().unwrap();
    assert_eq!(*keys.lock().unwrap(), b"qwe");
    kernel.shutdown();
}

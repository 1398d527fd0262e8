// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use slog::{o, Logger};
use uart_sim::common::AccessWidth;
use uart_sim::hw::uart::{Status, WaitMode, DATA_REG_ADDR, STATUS_REG_ADDR};
use uart_sim::{Params, RegisterBank, Uart};

fn setup(params: Params) -> (Arc<RegisterBank>, Arc<Uart>) {
    let log = Logger::root(slog::Discard, o!());
    let regs = Arc::new(RegisterBank::new());
    let uart = Uart::new(regs.clone(), params, &log);
    uart.start().expect("UART starts");
    (regs, uart)
}

#[test]
fn transmit_hi() {
    let (regs, uart) = setup(Params::default());
    uart.write_bytes(b"Hi").unwrap();
    regs.set_tx_not_full(true);

    uart.handle_interrupt();
    uart.handle_interrupt();

    assert_eq!(uart.tx_queue_len(), 0);
    assert_eq!(regs.read(DATA_REG_ADDR, AccessWidth::Byte), b'i' as u32);
    assert!(!uart.tx_error());
}

#[test]
fn receive_single_byte() {
    let (regs, uart) = setup(Params::default());
    regs.set_rx_not_empty(true);
    regs.load_rx_data(b'H');

    uart.handle_interrupt();

    assert_eq!(uart.rx_queue_len(), 1);
    assert_eq!(uart.total_bytes_received(), 1);
}

#[test]
fn transmit_flood_drains_without_error() {
    let (regs, uart) = setup(Params::default());
    let msg: Vec<u8> = (0..200u8).collect();
    uart.write_bytes(&msg).unwrap();
    regs.set_tx_not_full(true);

    for _ in 0..257 {
        uart.handle_interrupt();
    }
    assert_eq!(uart.tx_queue_len(), 0);
    assert!(!uart.tx_error());
    assert_eq!(regs.tx_data(), 199);
}

#[test]
fn receive_flood_overflows() {
    let (regs, uart) = setup(Params::default());
    regs.set_rx_not_empty(true);
    regs.load_rx_data(b'x');

    for _ in 0..257 {
        uart.handle_interrupt();
    }
    assert_eq!(uart.rx_queue_len(), 256);
    assert_eq!(uart.total_bytes_received(), 257);
    assert!(uart.rx_error());
    assert!(!uart.tx_error());
}

#[test]
fn nonblocking_read_reports_available() {
    let (regs, uart) = setup(Params::default());
    regs.set_rx_not_empty(true);
    for b in *b"Hi" {
        regs.load_rx_data(b);
        uart.handle_interrupt();
    }

    let mut buf = [0u8; 5];
    let read = uart.read_bytes_nonblocking(&mut buf).unwrap();
    assert_eq!(read, 2);
    assert_eq!(&buf[..read], b"Hi");
    assert_eq!(uart.rx_queue_len(), 0);
}

#[test]
fn stop_disables_uart() {
    let (regs, uart) = setup(Params::default());
    regs.set_rx_not_empty(true);
    uart.stop();

    assert!(!uart.interrupts_enabled());
    assert_eq!(regs.status(), Status::RX_NOT_EMPTY);
    assert_eq!(regs.read(STATUS_REG_ADDR, AccessWidth::Half), 0x0001);

    uart.handle_interrupt();
    assert_eq!(uart.total_bytes_received(), 0);
    assert!(uart.write_bytes(b"late").is_err());
}

/// A peripheral thread keeps raising interrupts while the application
/// blocks writing more than the transmit queue can hold.
fn loopback_roundtrip(wait: WaitMode) {
    let params = Params { wait, ..Params::default() };
    let (regs, uart) = setup(params);
    regs.set_tx_not_full(true);

    let done = Arc::new(AtomicBool::new(false));
    let peripheral = {
        let (regs, uart, done) = (regs.clone(), uart.clone(), done.clone());
        std::thread::spawn(move || {
            let mut sent = Vec::new();
            let mut last = regs.tx_data();
            while !done.load(Ordering::Acquire) {
                uart.handle_interrupt();
                let data = regs.tx_data();
                if data != last {
                    sent.push(data);
                    last = data;
                }
                std::thread::yield_now();
            }
            sent
        })
    };

    // Adjacent bytes always differ and none is zero, so each change of the
    // data register marks exactly one transmitted byte.
    let msg: Vec<u8> = (1..=255u8).cycle().take(600).collect();
    uart.write_bytes(&msg).unwrap();
    while uart.tx_queue_len() != 0 {
        std::thread::yield_now();
    }
    done.store(true, Ordering::Release);
    let sent = peripheral.join().unwrap();

    assert_eq!(sent, msg);
    assert!(!uart.tx_error());
}

#[test]
fn loopback_condvar() {
    loopback_roundtrip(WaitMode::Condvar);
}

#[test]
fn loopback_yield() {
    loopback_roundtrip(WaitMode::Yield);
}

#[test]
fn blocking_read_waits_for_interrupts() {
    let (regs, uart) = setup(Params::default());

    let reader = {
        let uart = uart.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; 3];
            uart.read_bytes_blocking(&mut buf).map(|_| buf)
        })
    };

    regs.set_rx_not_empty(true);
    for b in *b"abc" {
        regs.load_rx_data(b);
        uart.handle_interrupt();
    }

    let buf = reader.join().unwrap().unwrap();
    assert_eq!(&buf, b"abc");
    assert_eq!(uart.total_bytes_received(), 3);
}

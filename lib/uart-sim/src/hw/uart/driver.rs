// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt-driven UART driver.
//!
//! Application threads exchange bytes with the driver through a pair of
//! queues.  The interrupt routine is the only producer into the receive
//! queue and the only consumer of the transmit queue; each invocation moves
//! at most one byte in each direction, servicing receive before transmit.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use slog::{debug, error, info, warn, Logger};

use super::regs::*;
use crate::common::AccessWidth;
use crate::intr_gate::InterruptGate;
use crate::queue::{ByteQueue, QueueError};

#[usdt::provider(provider = "uart_sim")]
mod probes {
    fn uart_isr(status: u16) {}
}

/// Default capacity of both the transmit and receive queues.
pub const QUEUE_LEN: usize = 256;

/// How blocking reads and writes wait for the queues to make progress.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum WaitMode {
    /// Sleep until the interrupt routine signals a change in occupancy.
    #[default]
    Condvar,
    /// Retry the queue operation, yielding the thread between attempts.
    Yield,
}

#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Params {
    pub tx_queue_len: NonZeroUsize,
    pub rx_queue_len: NonZeroUsize,
    pub wait: WaitMode,
}
impl Default for Params {
    fn default() -> Self {
        let len = NonZeroUsize::new(QUEUE_LEN).unwrap();
        Self { tx_queue_len: len, rx_queue_len: len, wait: WaitMode::default() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UartError {
    #[error("failed to initialize UART queues")]
    Init(#[source] QueueError),

    #[error("failed to queue bytes for transmit")]
    Transmit(#[source] QueueError),

    #[error("failed to read bytes from receive queue")]
    Receive(#[source] QueueError),

    #[error("UART is not started")]
    NotStarted,
}

struct Queues {
    tx: ByteQueue,
    rx: ByteQueue,
}

pub struct Uart {
    regs: Arc<RegisterBank>,
    params: Params,
    gate: InterruptGate,

    /// Present only between `start()` and `stop()`.
    queues: Mutex<Option<Arc<Queues>>>,

    // Advisory state written by the interrupt routine.  Readers may observe
    // slightly stale values.
    bytes_received: AtomicU32,
    rx_error: AtomicBool,
    tx_error: AtomicBool,

    log: Logger,
}

impl Uart {
    pub fn new(
        regs: Arc<RegisterBank>,
        params: Params,
        log: &Logger,
    ) -> Arc<Self> {
        Arc::new(Self {
            regs,
            params,
            gate: InterruptGate::new(),
            queues: Mutex::new(None),
            bytes_received: AtomicU32::new(0),
            rx_error: AtomicBool::new(false),
            tx_error: AtomicBool::new(false),
            log: log.new(slog::o!("component" => "uart")),
        })
    }

    /// Allocate the queues, reset counters and error flags, enable the
    /// transmitter, receiver and UART interrupt, then open the global
    /// interrupt gate.
    pub fn start(&self) -> Result<(), UartError> {
        let tx = self.alloc_queue("tx", self.params.tx_queue_len)?;
        let rx = self.alloc_queue("rx", self.params.rx_queue_len)?;
        *self.queues.lock().unwrap() = Some(Arc::new(Queues { tx, rx }));

        self.bytes_received.store(0, Ordering::Relaxed);
        self.rx_error.store(false, Ordering::Relaxed);
        self.tx_error.store(false, Ordering::Relaxed);

        let status = self.read_status()
            | Status::INTR_ENABLE
            | Status::TX_ENABLE
            | Status::RX_ENABLE;
        self.write_status(status);

        self.gate.enable();
        info!(self.log, "UART started";
            "tx_queue_len" => self.params.tx_queue_len.get(),
            "rx_queue_len" => self.params.rx_queue_len.get(),
            "wait" => ?self.params.wait
        );
        Ok(())
    }

    /// Close the interrupt gate, disable the UART, and release the queues.
    ///
    /// Must only be called once for each successful `start()`.
    pub fn stop(&self) {
        self.gate.disable();

        let status = self.read_status()
            - (Status::INTR_ENABLE | Status::TX_ENABLE | Status::RX_ENABLE);
        self.write_status(status);

        let queues = self.queues.lock().unwrap().take();
        if let Some(queues) = queues {
            info!(self.log, "UART stopped";
                "tx_pending" => queues.tx.len().unwrap_or(0),
                "rx_pending" => queues.rx.len().unwrap_or(0),
                "bytes_received" => self.total_bytes_received()
            );
        }
    }

    fn alloc_queue(
        &self,
        dir: &'static str,
        len: NonZeroUsize,
    ) -> Result<ByteQueue, UartError> {
        ByteQueue::new(len).map_err(|e| {
            error!(self.log, "queue allocation failed";
                "queue" => dir, "error" => %e);
            UartError::Init(e)
        })
    }

    fn queues(&self) -> Option<Arc<Queues>> {
        self.queues.lock().unwrap().clone()
    }

    fn read_status(&self) -> Status {
        let raw = self.regs.read(STATUS_REG_ADDR, AccessWidth::Half);
        Status::from_bits_retain(raw as u16)
    }
    fn write_status(&self, status: Status) {
        self.regs.write(
            STATUS_REG_ADDR,
            AccessWidth::Half,
            u32::from(status.bits()),
        );
    }

    fn enqueue_blocking(
        &self,
        queue: &ByteQueue,
        data: u8,
    ) -> Result<(), QueueError> {
        match self.params.wait {
            WaitMode::Condvar => queue.enqueue_wait(data),
            WaitMode::Yield => loop {
                match queue.enqueue(data) {
                    Err(QueueError::Full) => std::thread::yield_now(),
                    res => return res,
                }
            },
        }
    }
    fn dequeue_blocking(&self, queue: &ByteQueue) -> Result<u8, QueueError> {
        match self.params.wait {
            WaitMode::Condvar => queue.dequeue_wait(),
            WaitMode::Yield => loop {
                match queue.dequeue() {
                    Err(QueueError::Empty) => std::thread::yield_now(),
                    res => return res,
                }
            },
        }
    }

    /// Queue every byte of `data` for transmission, in order, waiting for
    /// room whenever the transmit queue is full.
    ///
    /// On failure, bytes queued before the failing one remain queued.
    pub fn write_bytes(&self, data: &[u8]) -> Result<(), UartError> {
        let queues = self.queues().ok_or(UartError::NotStarted)?;
        for &byte in data {
            if let Err(e) = self.enqueue_blocking(&queues.tx, byte) {
                error!(self.log, "transmit enqueue failed"; "error" => %e);
                return Err(UartError::Transmit(e));
            }
        }
        Ok(())
    }

    /// Fill `buf` from the receive queue, waiting for data as needed.
    pub fn read_bytes_blocking(&self, buf: &mut [u8]) -> Result<(), UartError> {
        let queues = self.queues().ok_or(UartError::NotStarted)?;
        for slot in buf.iter_mut() {
            match self.dequeue_blocking(&queues.rx) {
                Ok(data) => *slot = data,
                Err(e) => {
                    error!(self.log, "receive dequeue failed"; "error" => %e);
                    return Err(UartError::Receive(e));
                }
            }
        }
        Ok(())
    }

    /// Read whatever is immediately available from the receive queue, up to
    /// `buf.len()` bytes, returning the number read.  Never waits.
    pub fn read_bytes_nonblocking(
        &self,
        buf: &mut [u8],
    ) -> Result<usize, UartError> {
        let queues = self.queues().ok_or(UartError::NotStarted)?;
        let mut count = 0;
        for slot in buf.iter_mut() {
            match queues.rx.dequeue() {
                Ok(data) => *slot = data,
                Err(QueueError::Empty) => break,
                Err(e) => {
                    error!(self.log, "receive dequeue failed"; "error" => %e);
                    return Err(UartError::Receive(e));
                }
            }
            count += 1;
        }
        Ok(count)
    }

    /// Bytes waiting in the receive queue.  Zero while stopped.
    pub fn rx_queue_len(&self) -> usize {
        self.queues().and_then(|q| q.rx.len().ok()).unwrap_or(0)
    }
    /// Bytes waiting in the transmit queue.  Zero while stopped.
    pub fn tx_queue_len(&self) -> usize {
        self.queues().and_then(|q| q.tx.len().ok()).unwrap_or(0)
    }
    pub fn total_bytes_received(&self) -> u32 {
        self.bytes_received.load(Ordering::Relaxed)
    }
    /// Has the receive path recorded an error since the last `start()`?
    pub fn rx_error(&self) -> bool {
        self.rx_error.load(Ordering::Relaxed)
    }
    /// Has the transmit path recorded an error since the last `start()`?
    pub fn tx_error(&self) -> bool {
        self.tx_error.load(Ordering::Relaxed)
    }
    pub fn interrupts_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    pub fn status(&self) -> UartStatus {
        UartStatus {
            interrupts_enabled: self.interrupts_enabled(),
            tx_queue_len: self.tx_queue_len(),
            rx_queue_len: self.rx_queue_len(),
            bytes_received: self.total_bytes_received(),
            rx_error: self.rx_error(),
            tx_error: self.tx_error(),
        }
    }

    /// Service one interrupt from the peripheral.
    ///
    /// Does nothing while the interrupt gate is closed.
    pub fn handle_interrupt(&self) {
        if !self.gate.is_enabled() {
            return;
        }
        let Some(queues) = self.queues() else {
            return;
        };

        // Decisions for both directions come from this one snapshot
        let status = self.read_status();
        probes::uart_isr!(|| status.bits());

        self.service_rx(status, &queues.rx);
        self.service_tx(status, &queues.tx);
    }

    fn service_rx(&self, status: Status, rx: &ByteQueue) {
        if status.contains(Status::RX_ERROR) {
            self.rx_error.store(true, Ordering::Relaxed);
            self.bytes_received.fetch_add(1, Ordering::Relaxed);
            warn!(self.log, "receive error reported by peripheral";
                "status" => format!("{:#06x}", status.bits()));
            return;
        }
        if !status.contains(Status::RX_READY) {
            return;
        }

        let data = self.regs.read(DATA_REG_ADDR, AccessWidth::Byte) as u8;
        self.bytes_received.fetch_add(1, Ordering::Relaxed);

        match rx.is_full() {
            Ok(true) => {
                self.rx_error.store(true, Ordering::Relaxed);
                warn!(self.log, "receive queue full, dropping byte";
                    "data" => data);
            }
            Ok(false) => match rx.enqueue(data) {
                Ok(()) => debug!(self.log, "received byte"; "data" => data),
                Err(e) => {
                    self.rx_error.store(true, Ordering::Relaxed);
                    error!(self.log, "receive enqueue failed"; "error" => %e);
                }
            },
            Err(e) => {
                self.rx_error.store(true, Ordering::Relaxed);
                error!(self.log, "receive queue unusable"; "error" => %e);
            }
        }
    }

    fn service_tx(&self, status: Status, tx: &ByteQueue) {
        if !status.contains(Status::TX_READY) {
            return;
        }

        match tx.dequeue() {
            Ok(data) => {
                self.regs.write(
                    DATA_REG_ADDR,
                    AccessWidth::Byte,
                    u32::from(data),
                );
                debug!(self.log, "transmitted byte"; "data" => data);
            }
            // Nothing to send
            Err(QueueError::Empty) => {}
            Err(e) => {
                self.tx_error.store(true, Ordering::Relaxed);
                error!(self.log, "transmit dequeue failed"; "error" => %e);
            }
        }
    }
}

/// Point-in-time view of the driver state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UartStatus {
    pub interrupts_enabled: bool,
    pub tx_queue_len: usize,
    pub rx_queue_len: usize,
    pub bytes_received: u32,
    pub rx_error: bool,
    pub tx_error: bool,
}
impl fmt::Display for UartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Global Interrupt Enable : {}",
            self.interrupts_enabled as u8
        )?;
        writeln!(f, "Transmit Queue Length   : {}", self.tx_queue_len)?;
        writeln!(f, "Receive Queue Length    : {}", self.rx_queue_len)?;
        writeln!(f, "Bytes Received          : {}", self.bytes_received)?;
        writeln!(f, "Receive Error           : {}", self.rx_error as u8)?;
        write!(f, "Transmit Error          : {}", self.tx_error as u8)
    }
}

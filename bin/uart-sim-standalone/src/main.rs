// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use slog::{o, Drain};

use uart_sim::usdt::register_probes;
use uart_sim::{RegisterBank, Uart};

mod config;

fn build_log() -> (slog::Logger, slog_async::AsyncGuard) {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    (slog::Logger::root(drain.fuse(), o!()), guard)
}

/// Simulated hardware driving the UART through a scripted session.
struct Session {
    regs: Arc<RegisterBank>,
    uart: Arc<Uart>,
}
impl Session {
    fn show_registers(&self, title: &str) {
        println!("\n{title}:\n{}", self.regs.snapshot());
    }
    fn show_uart(&self, title: &str) {
        println!("\n{title}:\n{}", self.uart.status());
    }
    fn interrupts(&self, count: usize, verbose: bool) {
        for i in 1..=count {
            self.uart.handle_interrupt();
            if verbose {
                self.show_registers(&format!("Registers after {i} interrupts"));
                self.show_uart(&format!("UART status after {i} interrupts"));
            }
        }
    }

    fn run(
        &self,
        demo: &config::Demo,
        log: &slog::Logger,
    ) -> anyhow::Result<()> {
        self.show_registers("Initial register values");

        self.uart.start().context("Failed to start UART")?;
        slog::info!(log, "UART initialized");
        self.show_registers("Registers after UART initialization");
        self.show_uart("Initial UART status");

        // Transmit: queue the message, then let the peripheral drain it
        // with one spare interrupt to show that an empty queue is benign.
        let message = demo.transmit.as_bytes();
        println!("\nAdding {:?} to the transmit queue", demo.transmit);
        self.uart
            .write_bytes(message)
            .context("Failed to queue transmit data")?;
        self.show_uart("UART status after adding to transmit queue");

        println!("\nPeripheral raises TX Not Full");
        self.regs.set_tx_not_full(true);
        self.show_registers("Registers");
        self.interrupts(message.len() + 1, true);

        // Receive: the peripheral delivers one byte per interrupt
        println!("\nPeripheral clears TX Not Full, raises RX Not Empty");
        self.regs.set_tx_not_full(false);
        self.regs.set_rx_not_empty(true);
        self.show_registers("Registers");

        for (i, &byte) in demo.receive.as_bytes().iter().enumerate() {
            let count = i + 1;
            self.regs.load_rx_data(byte);
            self.uart.handle_interrupt();
            self.show_registers(&format!("Registers after {count} interrupts"));
            self.show_uart(&format!("UART status after {count} interrupts"));
        }

        let mut buf = vec![0u8; demo.read_len];
        let count = self
            .uart
            .read_bytes_nonblocking(&mut buf)
            .context("Failed to read receive queue")?;
        println!(
            "\nRead {count} bytes from the receive queue: {:?}",
            String::from_utf8_lossy(&buf[..count])
        );

        // Overflow the receive queue
        println!("\nRaising {} receive interrupts", demo.flood);
        self.interrupts(demo.flood, false);
        self.show_uart(&format!("UART status after {} interrupts", demo.flood));

        println!("\nStopping UART");
        self.uart.stop();
        self.show_registers("Registers after stop");
        Ok(())
    }
}

#[derive(clap::Parser)]
/// Scripted session against a simulated interrupt-driven UART.
struct Args {
    /// Session config file.  Built-in defaults are used when omitted.
    #[clap(value_name = "CONFIG", action)]
    config: Option<String>,

    /// Override the number of receive interrupts raised at the end.
    #[clap(short, long, action)]
    flood: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let Args { config, flood } = Args::parse();

    // Ensure proper setup of USDT probes
    register_probes().context("Failed to setup USDT probes")?;

    let (log, _log_async_guard) = build_log();

    let mut config = match config {
        Some(path) => config::parse(&path)?,
        None => config::Config::default(),
    };
    if let Some(flood) = flood {
        config.demo.flood = flood;
    }

    let log = log.new(o!("name" => config.main.name.clone()));
    let regs = Arc::new(RegisterBank::new());
    let uart = Uart::new(regs.clone(), config.uart.clone(), &log);

    println!("Beginning UART session {}", uart_sim::version());
    Session { regs, uart }.run(&config.demo, &log)
}

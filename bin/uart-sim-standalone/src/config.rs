// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use uart_sim::Params;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub main: Main,

    #[serde(default)]
    pub uart: Params,

    #[serde(default)]
    pub demo: Demo,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Main {
    pub name: String,
}
impl Default for Main {
    fn default() -> Self {
        Self { name: "uart0".to_string() }
    }
}

/// Script for the simulated peripheral.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Demo {
    /// Bytes the application queues for transmit
    pub transmit: String,
    /// Bytes the peripheral delivers, one per interrupt
    pub receive: String,
    /// Size of the non-blocking read issued after receiving
    pub read_len: usize,
    /// Number of interrupts raised at the end with the receiver still
    /// reporting data, to overflow the receive queue
    pub flood: usize,
}
impl Default for Demo {
    fn default() -> Self {
        Self {
            transmit: "Hi".to_string(),
            receive: "Hi".to_string(),
            read_len: 5,
            flood: 257,
        }
    }
}

pub fn parse(path: &str) -> anyhow::Result<Config> {
    let file_data =
        std::fs::read(path).context("Failed to read given config.toml")?;
    Ok(toml::from_str::<Config>(
        std::str::from_utf8(&file_data)
            .context("config should be valid utf-8")?,
    )?)
}

#[cfg(test)]
mod test {
    use super::*;

    use uart_sim::hw::uart::WaitMode;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.main.name, "uart0");
        assert_eq!(config.uart, Params::default());
        assert_eq!(config.demo.flood, 257);
    }

    #[test]
    fn parse_uart_section() {
        let config: Config = toml::from_str(
            r#"
            [uart]
            tx_queue_len = 16
            wait = "yield"

            [demo]
            transmit = "hello"
            read_len = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.uart.tx_queue_len.get(), 16);
        assert_eq!(config.uart.rx_queue_len.get(), 256);
        assert_eq!(config.uart.wait, WaitMode::Yield);
        assert_eq!(config.demo.transmit, "hello");
        assert_eq!(config.demo.read_len, 8);
        assert_eq!(config.demo.receive, "Hi");
    }

    #[test]
    fn reject_zero_capacity() {
        let res = toml::from_str::<Config>("[uart]\nrx_queue_len = 0\n");
        assert!(res.is_err());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![allow(clippy::style)]

pub extern crate usdt;
#[macro_use]
extern crate bitflags;

pub mod common;
pub mod hw;
pub mod intr_gate;
pub mod queue;

pub use hw::uart::{Params, RegisterBank, Uart, UartError};
pub use queue::{ByteQueue, QueueError};

pub fn version() -> &'static str {
    concat!("v", env!("CARGO_PKG_VERSION"))
}

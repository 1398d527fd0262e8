// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicBool, Ordering};

/// Software analogue of a processor's global interrupt-enable bit.
///
/// Each driver context owns its own gate, so independent simulated
/// instances do not observe one another.
#[derive(Debug, Default)]
pub struct InterruptGate {
    enabled: AtomicBool,
}
impl InterruptGate {
    pub const fn new() -> Self {
        Self { enabled: AtomicBool::new(false) }
    }
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

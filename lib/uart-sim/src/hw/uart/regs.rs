// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Memory-mapped UART register bank.
//!
//! Two 16-bit registers sit back to back in the simulated address space:
//!
//! ```text
//!   STATUS + 0   status bits 0-7    RX_NOT_EMPTY, TX_NOT_FULL, RX_ERROR
//!   STATUS + 1   status bits 8-15   TX_ENABLE, RX_ENABLE, INTR_ENABLE
//!   DATA   + 0   data byte
//!   DATA   + 1   reserved, reads as zero
//! ```
//!
//! Any other address reads as zero and ignores writes.  Software writes to
//! the status register only reach the enable bits; the readiness and error
//! bits are driven by the peripheral through the `set_*` accessors.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use byteorder::{ByteOrder, LE};

use crate::common::*;

pub use bits::*;

#[usdt::provider(provider = "uart_sim")]
mod probes {
    fn reg_read(addr: u64, bytes: u8, value: u64) {}
    fn reg_write(addr: u64, bytes: u8, value: u64, was_handled: u8) {}
}

// Backing store layout
const STATUS_LOW: usize = 0;
const STATUS_HIGH: usize = 1;
const DATA_LOW: usize = 2;
const DATA_HIGH: usize = 3;

// Software-writable status bits all live in the high byte
const WRITABLE_HIGH: u8 = (Status::WRITABLE.bits() >> 8) as u8;
const _: () = assert!(Status::WRITABLE.bits() & 0xff == 0);

bitflags! {
    /// Bits of the 16-bit status register.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Status: u16 {
        const RX_NOT_EMPTY = 1 << RX_NOT_EMPTY_BIT;
        const TX_NOT_FULL = 1 << TX_NOT_FULL_BIT;
        const RX_ERROR = 1 << RX_ERROR_BIT;
        const TX_ENABLE = 1 << TX_ENABLE_BIT;
        const RX_ENABLE = 1 << RX_ENABLE_BIT;
        const INTR_ENABLE = 1 << INTR_ENABLE_BIT;

        /// Bits software is permitted to change.
        const WRITABLE = Self::TX_ENABLE.bits()
            | Self::RX_ENABLE.bits()
            | Self::INTR_ENABLE.bits();

        /// Conditions for servicing the receive path.
        const RX_READY = Self::RX_NOT_EMPTY.bits() | Self::RX_ENABLE.bits();
        /// Conditions for servicing the transmit path.
        const TX_READY = Self::TX_NOT_FULL.bits() | Self::TX_ENABLE.bits();
    }
}

/// Identifies one of the registers in the bank.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegId {
    Status,
    Data,
}
impl RegId {
    pub const fn base(&self) -> u32 {
        match self {
            RegId::Status => STATUS_REG_ADDR,
            RegId::Data => DATA_REG_ADDR,
        }
    }

    /// Resolve an address to the register covering it and the byte offset
    /// of the address within that register.
    pub fn resolve(addr: u32) -> Option<(RegId, usize)> {
        [RegId::Status, RegId::Data].into_iter().find_map(|id| {
            let off = addr.checked_sub(id.base())? as usize;
            (off < REG_LEN).then_some((id, off))
        })
    }

    /// Index of the register's low byte in the backing store.
    const fn store_idx(&self) -> usize {
        match self {
            RegId::Status => STATUS_LOW,
            RegId::Data => DATA_LOW,
        }
    }
}

/// Backing store for the status and data registers.
///
/// Each byte is an individual atomic cell: accesses are byte-granular, as
/// they would be on the hardware, and no lock is taken.
pub struct RegisterBank {
    store: [AtomicU8; 2 * REG_LEN],
}
impl RegisterBank {
    pub fn new() -> Self {
        Self { store: Default::default() }
    }

    /// Read `width` bytes starting at `addr`, composed little-endian.
    ///
    /// Bytes which fall outside the two registers read as zero, so accesses
    /// straddling a register boundary see exactly the contiguous layout of
    /// the store.
    pub fn read(&self, addr: u32, width: AccessWidth) -> u32 {
        let mut buf = [0u8; 4];
        for (i, byte) in buf[..width.bytes()].iter_mut().enumerate() {
            let byte_addr = addr.wrapping_add(i as u32);
            if let Some((id, off)) = RegId::resolve(byte_addr) {
                let mut ro = ReadOp::from_buf(off, std::slice::from_mut(byte));
                self.reg_rw(id, RWOp::Read(&mut ro));
            }
        }
        let val = LE::read_u32(&buf);

        probes::reg_read!(|| (addr as u64, width.bytes() as u8, val as u64));
        val
    }

    /// Write the low `width` bytes of `value` starting at `addr`.
    ///
    /// A write must land on a single register: byte writes may target
    /// either byte of a register, while half-word and word writes must
    /// start at the register base and are truncated to the register width.
    /// Anything else is ignored.  Returns whether the write was accepted.
    pub fn write(&self, addr: u32, width: AccessWidth, value: u32) -> bool {
        let value = value & width.mask();
        let target = RegId::resolve(addr).filter(|(_id, off)| {
            width == AccessWidth::Byte || *off == 0
        });

        let handled = match target {
            Some((id, off)) => {
                let bytes = (value as u16).to_le_bytes();
                let data = match width {
                    AccessWidth::Byte => &bytes[..1],
                    AccessWidth::Half | AccessWidth::Word => &bytes[..],
                };
                let mut wo = WriteOp::from_buf(off, data);
                self.reg_rw(id, RWOp::Write(&mut wo));
                true
            }
            None => false,
        };

        probes::reg_write!(|| (
            addr as u64,
            width.bytes() as u8,
            value as u64,
            handled as u8
        ));
        handled
    }

    fn reg_rw(&self, id: RegId, rwo: RWOp) {
        let off = rwo.offset();
        let len = rwo.len();
        debug_assert!(off + len <= REG_LEN);

        match (id, rwo) {
            (_, RWOp::Read(ro)) => {
                let cur = self.load_reg(id).to_le_bytes();
                ro.write_bytes(&cur[off..(off + len)]);
            }
            (RegId::Status, RWOp::Write(wo)) => {
                // The low byte holds only peripheral-driven bits, so only a
                // write covering the high byte has any effect.
                let mut val = [0u8; REG_LEN];
                wo.read_bytes(&mut val[off..(off + len)]);
                if off + len == REG_LEN {
                    self.apply_status_write(val[REG_LEN - 1]);
                }
            }
            (RegId::Data, RWOp::Write(wo)) => {
                let mut val = [0u8; REG_LEN];
                wo.read_bytes(&mut val[off..(off + len)]);
                if off == 0 {
                    self.store_byte(DATA_LOW, val[0]);
                }
                // upper byte is reserved
                self.store_byte(DATA_HIGH, 0);
            }
        }
    }

    /// Update the enable bits from the high byte of a status write.
    fn apply_status_write(&self, high: u8) {
        // Closure always yields a value, so the update cannot fail
        let _ = self.store[STATUS_HIGH].fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |cur| Some((cur & !WRITABLE_HIGH) | (high & WRITABLE_HIGH)),
        );
    }

    fn load_reg(&self, id: RegId) -> u16 {
        let idx = id.store_idx();
        u16::from_le_bytes([self.load_byte(idx), self.load_byte(idx + 1)])
    }
    fn load_byte(&self, idx: usize) -> u8 {
        self.store[idx].load(Ordering::Acquire)
    }
    fn store_byte(&self, idx: usize, val: u8) {
        self.store[idx].store(val, Ordering::Release)
    }

    /// Current status register contents.
    pub fn status(&self) -> Status {
        Status::from_bits_retain(self.load_reg(RegId::Status))
    }

    /// Set or clear hardware-owned status bits, bypassing the software
    /// write mask.  Only bits in the low (hardware) byte may be driven.
    fn set_hw_bits(&self, bits: Status, set: bool) {
        debug_assert!(bits.bits() & 0xff00 == 0);
        let mask = bits.bits() as u8;
        if set {
            self.store[STATUS_LOW].fetch_or(mask, Ordering::AcqRel);
        } else {
            self.store[STATUS_LOW].fetch_and(!mask, Ordering::AcqRel);
        }
    }
    /// Peripheral reports a received byte waiting in the data register.
    pub fn set_rx_not_empty(&self, set: bool) {
        self.set_hw_bits(Status::RX_NOT_EMPTY, set)
    }
    /// Peripheral reports room for a byte to transmit.
    pub fn set_tx_not_full(&self, set: bool) {
        self.set_hw_bits(Status::TX_NOT_FULL, set)
    }
    /// Peripheral reports a receive-side line error.
    pub fn set_rx_error(&self, set: bool) {
        self.set_hw_bits(Status::RX_ERROR, set)
    }
    /// Peripheral latches a received byte into the data register.
    pub fn load_rx_data(&self, data: u8) {
        self.store_byte(DATA_LOW, data);
    }
    /// Byte most recently placed in the data register.
    pub fn tx_data(&self) -> u8 {
        self.load_byte(DATA_LOW)
    }

    pub fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            status: self.status(),
            data: self.load_reg(RegId::Data),
        }
    }
}
impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the register bank.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegisterSnapshot {
    pub status: Status,
    pub data: u16,
}
impl fmt::Display for RegisterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |bit: Status| self.status.contains(bit) as u8;
        let byte = self.data as u8;
        writeln!(f, "RX Register Not Empty : {}", flag(Status::RX_NOT_EMPTY))?;
        writeln!(f, "TX Register Not Full  : {}", flag(Status::TX_NOT_FULL))?;
        writeln!(f, "RX Error              : {}", flag(Status::RX_ERROR))?;
        writeln!(f, "TX Enable             : {}", flag(Status::TX_ENABLE))?;
        writeln!(f, "RX Enable             : {}", flag(Status::RX_ENABLE))?;
        writeln!(f, "UART Interrupt Enable : {}", flag(Status::INTR_ENABLE))?;
        write!(
            f,
            "Data Register         : {:#04x} {:?}",
            byte,
            char::from(byte).escape_default().to_string()
        )
    }
}

mod bits {
    #![allow(unused)]

    /*
     * Register addresses
     */
    pub const STATUS_REG_ADDR: u32 = 0x8000_0120;
    pub const DATA_REG_ADDR: u32 = 0x8000_0122;
    pub const REG_LEN: usize = 2;

    /*
     * Status register bit positions
     */
    pub const RX_NOT_EMPTY_BIT: u16 = 0; // received byte available (RO)
    pub const TX_NOT_FULL_BIT: u16 = 1; // room to transmit (RO)
    pub const RX_ERROR_BIT: u16 = 2; // receive line error (RO)
    pub const TX_ENABLE_BIT: u16 = 13; // transmitter enable (RW)
    pub const RX_ENABLE_BIT: u16 = 14; // receiver enable (RW)
    pub const INTR_ENABLE_BIT: u16 = 15; // UART interrupt enable (RW)
}

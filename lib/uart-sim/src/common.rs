// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Width of a single register access.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessWidth {
    Byte,
    Half,
    Word,
}
impl AccessWidth {
    pub const fn bytes(&self) -> usize {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Half => 2,
            AccessWidth::Word => 4,
        }
    }
    /// Mask covering the bits an access of this width can carry.
    pub const fn mask(&self) -> u32 {
        match self {
            AccessWidth::Byte => 0xff,
            AccessWidth::Half => 0xffff,
            AccessWidth::Word => 0xffff_ffff,
        }
    }
}

/// Represents an abstract requested read operation against a register.
///
/// Fulfilled by writing bytes into it with [`ReadOp::write_bytes`].
pub struct ReadOp<'a> {
    buf: &'a mut [u8],
    offset: usize,
    write_offset: usize,
}

impl<'a> ReadOp<'a> {
    /// Initializes a new read operation from a buffer.
    ///
    /// # Arguments
    ///
    /// - `op_offset`: Byte offset within the register which should be
    /// accessed to populate `buf`.
    /// - `buf`: A buffer which represents the "sink" of the read operation.
    pub fn from_buf(op_offset: usize, buf: &'a mut [u8]) -> Self {
        Self { buf, offset: op_offset, write_offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
    pub fn avail(&self) -> usize {
        self.len() - self.write_offset
    }
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        let copy_len = data.len();
        let wr_off = self.write_offset;
        assert!(copy_len <= self.avail());

        self.buf[wr_off..(wr_off + copy_len)].copy_from_slice(data);
        self.write_offset += copy_len;
    }
}

/// Represents an abstract requested write operation against a register.
///
/// Fulfilled by reading bytes out of it with [`WriteOp::read_bytes`].
pub struct WriteOp<'a> {
    buf: &'a [u8],
    offset: usize,
    read_offset: usize,
}
impl<'a> WriteOp<'a> {
    /// Initializes a new write operation from a buffer.
    ///
    /// # Arguments
    ///
    /// - `op_offset`: Byte offset within the register where `buf` should be
    /// stored.
    /// - `buf`: A buffer which represents the "source" of the write operation.
    pub fn from_buf(op_offset: usize, buf: &'a [u8]) -> Self {
        Self { buf, offset: op_offset, read_offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
    pub fn avail(&self) -> usize {
        self.len() - self.read_offset
    }
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn read_bytes(&mut self, data: &mut [u8]) {
        let copy_len = data.len();
        if copy_len == 0 {
            return;
        }
        let rd_off = self.read_offset;
        assert!(copy_len <= self.avail());

        data.copy_from_slice(&self.buf[rd_off..(rd_off + copy_len)]);
        self.read_offset += copy_len;
    }
}

pub enum RWOp<'a, 'b> {
    Read(&'a mut ReadOp<'b>),
    Write(&'a mut WriteOp<'b>),
}
impl RWOp<'_, '_> {
    pub fn offset(&self) -> usize {
        match self {
            RWOp::Read(ro) => ro.offset,
            RWOp::Write(wo) => wo.offset,
        }
    }
    pub fn len(&self) -> usize {
        match self {
            RWOp::Read(ro) => ro.len(),
            RWOp::Write(wo) => wo.len(),
        }
    }
}

//! Tag memory operations (read/write/lock/kill/block-*) and their local
//! argument validation. Rendering them onto the wire is the codec's job
//! (`src/codec/mod.rs`); this module only owns shape and validation.

use crate::error::{Error, Result};
use crate::tag::MemoryBank;

/// Lock action applied to a memory area (per EPC Gen2 Lock command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    /// Leave read/write accessible without a password.
    Unlock,
    /// Require a password for read/write.
    Lock,
    /// Permanently unlock; can never be locked again.
    PermUnlock,
    /// Permanently lock; password always required, can never be unlocked.
    PermLock,
}

/// Which area a [`LockAction`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTarget {
    /// User memory bank.
    User,
    /// TID memory bank.
    Tid,
    /// EPC memory bank.
    Epc,
    /// Access password.
    AccessPassword,
    /// Kill password.
    KillPassword,
}

/// A Gen2 or ISO18000-6B tag operation, with its arguments.
///
/// Each variant carries everything the codec needs to render it onto the
/// wire except the effective antenna/protocol/filter, which are resolved
/// from the parameter registry by `ReaderCore::execute_tag_op`.
#[derive(Debug, Clone)]
pub enum TagOp {
    /// Read `word_count` 16-bit words from `bank` starting at `word_ptr`.
    Gen2ReadData {
        bank: MemoryBank,
        word_ptr: u32,
        word_count: u8,
    },
    /// Write `data` (must be an even number of bytes) to `bank` starting
    /// at `word_ptr`.
    Gen2WriteData {
        bank: MemoryBank,
        word_ptr: u32,
        data: Vec<u8>,
    },
    /// Overwrite the entire EPC bank with a new EPC value.
    Gen2WriteTag { epc: Vec<u8> },
    /// Apply a lock action to a memory area.
    Gen2Lock {
        target: LockTarget,
        action: LockAction,
    },
    /// Kill the tag with the given 4-byte kill password.
    Gen2Kill { kill_password: [u8; 4] },
    /// Write `data` as a block starting at `block_ptr` in `bank`.
    Gen2BlockWrite {
        bank: MemoryBank,
        block_ptr: u32,
        data: Vec<u8>,
    },
    /// Permanently lock `block_range` blocks starting at `block_ptr` in
    /// `bank`.
    Gen2BlockPermaLock {
        bank: MemoryBank,
        block_ptr: u32,
        block_range: u8,
    },
    /// Erase `word_count` words starting at `word_ptr` in `bank`.
    Gen2BlockErase {
        bank: MemoryBank,
        word_ptr: u32,
        word_count: u8,
    },
    /// ISO18000-6B read of `length` bytes starting at `address`.
    Iso18k6BRead { address: u8, length: u8 },
    /// ISO18000-6B write of `data` (one byte) at `address`.
    Iso18k6BWrite { address: u8, data: u8 },
    /// ISO18000-6B lock of the byte at `address`.
    Iso18k6BLock { address: u8 },
}

/// Whether a [`TagOp`] returns bytes to the caller or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOpResultKind {
    /// The op returns bytes (e.g. a read).
    Bytes,
    /// The op returns nothing on success (e.g. a write/lock/kill).
    Unit,
}

impl TagOp {
    /// The declared result shape for this op, per §4.6.
    pub fn result_kind(&self) -> TagOpResultKind {
        match self {
            TagOp::Gen2ReadData { .. }
            | TagOp::Gen2BlockPermaLock { .. }
            | TagOp::Iso18k6BRead { .. } => TagOpResultKind::Bytes,
            _ => TagOpResultKind::Unit,
        }
    }

    /// Validate this operation's arguments without consulting a device.
    pub fn validate(&self) -> Result<()> {
        match self {
            TagOp::Gen2WriteData { data, .. } if data.len() % 2 != 0 => Err(Error::InvalidArgument(
                "Gen2 write data must be a whole number of 16-bit words".into(),
            )),
            TagOp::Gen2WriteTag { epc } if epc.is_empty() || epc.len() % 2 != 0 => {
                Err(Error::InvalidArgument(
                    "Gen2 EPC must be a non-empty, even number of bytes".into(),
                ))
            }
            TagOp::Gen2BlockWrite { data, .. } if data.is_empty() || data.len() % 2 != 0 => {
                Err(Error::InvalidArgument(
                    "Gen2 block write data must be a non-empty, even number of bytes".into(),
                ))
            }
            TagOp::Gen2BlockPermaLock { block_range, .. } if *block_range == 0 => Err(
                Error::InvalidArgument("block-permalock range must be at least 1".into()),
            ),
            TagOp::Gen2ReadData { word_count, .. } if *word_count == 0 => Err(
                Error::InvalidArgument("read word count must be at least 1".into()),
            ),
            TagOp::Iso18k6BRead { length, .. } if *length == 0 => Err(Error::InvalidArgument(
                "ISO 18000-6B read length must be at least 1".into(),
            )),
            _ => Ok(()),
        }
    }
}

//! Tag identity, read results, filters and read plans.

use std::time::SystemTime;

use crate::error::{Error, Result};

/// Air-interface protocol a tag was singulated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// EPCglobal UHF Class-1 Gen2.
    Gen2,
    /// ISO 18000-6B.
    Iso18k6B,
    /// IPX (manufacturer-specific low-level protocol).
    Ipx,
}

/// A tag's identity as singulated on the air interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagData {
    /// EPC (or equivalent identity) bytes.
    pub epc: Vec<u8>,
    /// Protocol the tag was read under.
    pub protocol: Protocol,
    /// CRC reported alongside the EPC, if the reader provides one.
    pub crc: Option<u16>,
}

impl TagData {
    /// Build a tag identity.
    pub fn new(epc: Vec<u8>, protocol: Protocol, crc: Option<u16>) -> Self {
        Self { epc, protocol, crc }
    }
}

/// One observed tag singulation, as delivered by a synchronous read or the
/// background engine.
#[derive(Debug, Clone)]
pub struct TagReadData {
    /// The tag that was read.
    pub tag: TagData,
    /// Antenna index it was read on.
    pub antenna: u8,
    /// Protocol (duplicated from `tag.protocol` for convenience).
    pub protocol: Protocol,
    /// When the reader reported this read.
    pub timestamp: SystemTime,
    /// Signal strength in dBm, as reported by the device.
    pub rssi: i16,
    /// Number of times this tag was observed during the read cycle.
    pub read_count: u32,
    /// Result bytes of an accompanying tag operation, if any was embedded
    /// in the read (e.g. an embedded Gen2 read-after-inventory).
    pub op_result: Option<Vec<u8>>,
}

/// Memory bank a Gen2/ISO18k6B operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBank {
    /// Reserved bank (kill/access passwords).
    Reserved,
    /// EPC bank.
    Epc,
    /// TID bank.
    Tid,
    /// User memory bank.
    User,
}

impl MemoryBank {
    pub(crate) fn to_code(self) -> u8 {
        match self {
            MemoryBank::Reserved => 0x00,
            MemoryBank::Epc => 0x01,
            MemoryBank::Tid => 0x02,
            MemoryBank::User => 0x03,
        }
    }
}

/// Which tags participate in an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    /// No filter: whatever tag singulates first.
    None,
    /// Match a specific EPC exactly.
    Epc(Vec<u8>),
    /// A Gen2 Select: match `length` bits of `mask` against `bank` starting
    /// at bit `offset`, optionally inverted.
    Select {
        /// Invert the match sense.
        invert: bool,
        /// Memory bank the mask is matched against.
        bank: MemoryBank,
        /// Starting bit offset within the bank.
        offset: u32,
        /// Number of bits to match.
        length: u16,
        /// Mask bytes, `ceil(length / 8)` long.
        mask: Vec<u8>,
    },
}

impl TagFilter {
    /// Validate shape invariants (mask length matches the declared bit
    /// length) without talking to a device.
    pub fn validate(&self) -> Result<()> {
        if let TagFilter::Select { length, mask, .. } = self {
            let want_bytes = (*length as usize).div_ceil(8);
            if mask.len() != want_bytes {
                return Err(Error::InvalidArgument(format!(
                    "select mask is {} bytes, but length {} bits needs {want_bytes}",
                    mask.len(),
                    length
                )));
            }
        }
        Ok(())
    }
}

/// A single-antenna/protocol/filter read specification, or a set of them.
#[derive(Debug, Clone)]
pub enum ReadPlan {
    /// Inventory on one set of antennas, under one protocol, with one
    /// optional filter and optional embedded tag operation.
    Simple {
        /// Antenna indices to use, in sequence.
        antennas: Vec<u8>,
        /// Protocol to inventory under.
        protocol: Protocol,
        /// Optional pre-filter.
        filter: TagFilter,
        /// Optional tag operation to embed in each singulation.
        op: Option<crate::tagop::TagOp>,
        /// Relative weight versus sibling plans in a `Multi` plan.
        weight: u32,
    },
    /// A flat set of `Simple` plans, run in round-robin. Depth is fixed at
    /// 1: a `Multi` plan's children must all be `Simple`.
    Multi(Vec<ReadPlan>),
}

impl ReadPlan {
    /// A plan that inventories Gen2 on antenna 1, no filter, no embedded op.
    pub fn default_simple() -> Self {
        ReadPlan::Simple {
            antennas: vec![1],
            protocol: Protocol::Gen2,
            filter: TagFilter::None,
            op: None,
            weight: 1,
        }
    }

    /// Validate the depth-1 invariant: a `Multi` plan may only contain
    /// `Simple` children.
    pub fn validate(&self) -> Result<()> {
        match self {
            ReadPlan::Simple { filter, .. } => filter.validate(),
            ReadPlan::Multi(children) => {
                for child in children {
                    match child {
                        ReadPlan::Simple { filter, .. } => filter.validate()?,
                        ReadPlan::Multi(_) => {
                            return Err(Error::InvalidArgument(
                                "read plan depth must be 1: Multi cannot contain Multi".into(),
                            ));
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

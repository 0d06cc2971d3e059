//! The serial protocol's opcode catalog.
//!
//! One byte per command; request and response share an opcode.

/// Query firmware/protocol version.
pub const GET_VERSION: u8 = 0x01;
/// Set the regulatory region.
pub const SET_REGION: u8 = 0x02;
/// Get the regulatory region.
pub const GET_REGION: u8 = 0x03;
/// Get transmit power.
pub const GET_POWER: u8 = 0x04;
/// Set transmit power.
pub const SET_POWER: u8 = 0x05;
/// Read tag IDs, singulating multiple tags in one exchange.
pub const READ_TAG_ID_MULTIPLE: u8 = 0x10;
/// Arm a continuous (streaming) inventory.
pub const START_CONTINUOUS_READ: u8 = 0x11;
/// Stop a continuous (streaming) inventory.
pub const STOP_CONTINUOUS_READ: u8 = 0x12;
/// Pull one buffered tag report during continuous read.
pub const GET_TAG_BUFFER: u8 = 0x13;
/// Discard all buffered tag reports.
pub const CLEAR_TAG_BUFFER: u8 = 0x14;
/// Gen2 read-data tag operation.
pub const GEN2_READ_DATA: u8 = 0x20;
/// Gen2 write-data tag operation.
pub const WRITE_TAG_DATA: u8 = 0x21;
/// Gen2 write-EPC tag operation.
pub const GEN2_WRITE_TAG: u8 = 0x22;
/// Gen2 lock tag operation.
pub const LOCK_TAG: u8 = 0x23;
/// Gen2 kill tag operation.
pub const KILL_TAG: u8 = 0x24;
/// Gen2 block-write tag operation.
pub const GEN2_BLOCK_WRITE: u8 = 0x25;
/// Gen2 block-permalock tag operation.
pub const GEN2_BLOCK_PERMALOCK: u8 = 0x26;
/// Gen2 block-erase tag operation.
pub const GEN2_BLOCK_ERASE: u8 = 0x27;
/// Read-after-write verification.
pub const READ_AFTER_WRITE: u8 = 0x28;
/// Gen2 Select, sent ahead of a filtered tag operation.
pub const GEN2_SELECT: u8 = 0x29;
/// ISO18000-6B read.
pub const ISO18K6B_READ: u8 = 0x30;
/// ISO18000-6B write.
pub const ISO18K6B_WRITE: u8 = 0x31;
/// ISO18000-6B lock.
pub const ISO18K6B_LOCK: u8 = 0x32;
/// Read a GPIO pin's current state.
pub const GPIO_GET: u8 = 0x40;
/// Set a GPIO pin's state.
pub const GPIO_SET: u8 = 0x41;
/// Report the currently-running onboard program/application.
pub const GET_CURRENT_PROGRAM: u8 = 0x50;

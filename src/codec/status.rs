//! The 16-bit device fault code table and its category mapping.

use crate::error::FaultCategory;

/// Soft fault: the continuous-read tag buffer overflowed. The engine
/// re-arms locally instead of treating this as terminal.
pub const TAG_ID_BUFFER_FULL: u16 = 0x0400;

/// Soft fault: no antenna is connected to the working port. Surfaced to
/// exception listeners, but doesn't stop a continuous read.
pub const NO_ANTENNA: u16 = 0x0500;

/// No tag responded to the operation (e.g. an empty field during a
/// synchronous read).
pub const NO_TAG_FOUND: u16 = 0x0300;

/// Invalid argument rejected by the firmware itself (distinct from a
/// locally-detected `ProgrammerFault`).
pub const INVALID_ARGUMENT: u16 = 0x0201;

/// Streaming read timed out waiting for the device.
pub const STREAM_TIMEOUT: u16 = 0x0202;

/// Map a 16-bit device fault code to its coarse category.
///
/// Categorization is by the code's high byte, per the wire specification's
/// code-block layout: 0x01xx fatal, 0x02xx protocol, 0x03xx/0x04xx tag,
/// 0x05xx hardware, 0x08xx unsupported. Anything outside those blocks is
/// conservatively treated as `Protocol`.
pub fn category_for(code: u16) -> FaultCategory {
    match code >> 8 {
        0x01 => FaultCategory::Fatal,
        0x02 => FaultCategory::Protocol,
        0x03 | 0x04 => FaultCategory::Tag,
        0x05 => FaultCategory::Hardware,
        0x08 => FaultCategory::Unsupported,
        _ => FaultCategory::Protocol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_as_documented() {
        assert_eq!(category_for(TAG_ID_BUFFER_FULL), FaultCategory::Tag);
        assert_eq!(category_for(NO_ANTENNA), FaultCategory::Hardware);
        assert_eq!(category_for(0x0101), FaultCategory::Fatal);
        assert_eq!(category_for(0x0801), FaultCategory::Unsupported);
    }

    #[test]
    fn unknown_block_falls_back_to_protocol() {
        assert_eq!(category_for(0xFFFF), FaultCategory::Protocol);
    }
}

//! Command frame encoding/decoding.
//!
//! Wire format: `SOH | LEN:u8 | OPCODE:u8 | PAYLOAD[LEN] | CRC16:u16 (big-endian)`.
//! `LEN` is the payload length only; it excludes the header and the CRC.
//! The CRC covers `OPCODE || PAYLOAD` (see [`crate::crc`]).

use std::time::Duration;

use log::{trace, warn};

use crate::crc::crc16_ccitt;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Start-of-header byte.
pub const SOH: u8 = 0xFF;

/// Maximum payload length a frame can carry (one length byte).
pub const MAX_PAYLOAD: usize = 255;

/// How many bytes of lookahead we'll scan for an SOH before giving up.
const SOH_LOOKAHEAD: usize = 64;

/// A decoded frame: opcode plus payload. The CRC is verified, not carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command/response opcode byte.
    pub opcode: u8,
    /// Payload bytes (excludes SOH, length, opcode, CRC).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a new frame.
    pub fn new(opcode: u8, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    /// Encode this frame to its on-wire representation.
    ///
    /// Fails locally with [`Error::InvalidArgument`] if the payload is too
    /// long to be framed; no bytes are produced in that case.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(Error::InvalidArgument(format!(
                "payload length {} exceeds maximum frame payload of {MAX_PAYLOAD}",
                self.payload.len()
            )));
        }
        let mut crc_input = Vec::with_capacity(1 + self.payload.len());
        crc_input.push(self.opcode);
        crc_input.extend_from_slice(&self.payload);
        let crc = crc16_ccitt(&crc_input);

        let mut out = Vec::with_capacity(3 + self.payload.len() + 2);
        out.push(SOH);
        out.push(self.payload.len() as u8);
        out.extend(crc_input);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(out)
    }

    /// Decode a frame from a byte buffer that begins at or before the SOH.
    ///
    /// Returns the frame and the number of bytes consumed from the front
    /// of `buf`.
    pub fn decode(buf: &[u8]) -> Result<(Frame, usize)> {
        let soh_pos = buf
            .iter()
            .take(SOH_LOOKAHEAD)
            .position(|&b| b == SOH)
            .ok_or_else(|| Error::Malformed("no SOH found within lookahead window".into()))?;
        let rest = &buf[soh_pos..];
        if rest.len() < 4 {
            return Err(Error::Malformed("frame shorter than minimum header".into()));
        }
        let len = rest[1] as usize;
        let total = 2 + 1 + len + 2; // SOH, LEN, OPCODE, payload, CRC
        if rest.len() < total {
            return Err(Error::Malformed(format!(
                "declared length {len} needs {total} bytes, only {} available",
                rest.len()
            )));
        }
        let opcode = rest[2];
        let payload = rest[3..3 + len].to_vec();
        let got_crc = u16::from_be_bytes([rest[3 + len], rest[3 + len + 1]]);

        let mut crc_input = Vec::with_capacity(1 + len);
        crc_input.push(opcode);
        crc_input.extend_from_slice(&payload);
        let want_crc = crc16_ccitt(&crc_input);
        if want_crc != got_crc {
            warn!("frame CRC mismatch: got 0x{got_crc:04x}, want 0x{want_crc:04x}");
            return Err(Error::CrcMismatch);
        }
        Ok((Frame { opcode, payload }, soh_pos + total))
    }
}

/// Encodes a frame and writes it to `transport`, then reads and decodes a
/// response frame within `timeout`.
///
/// This is the only place framing and transport are combined; the codec
/// layer only ever sees [`Frame`] values.
pub fn exchange(transport: &mut dyn Transport, frame: &Frame, timeout: Duration) -> Result<Frame> {
    let bytes = frame.encode()?;
    trace!("framer: writing {} bytes (opcode 0x{:02x})", bytes.len(), frame.opcode);
    transport.write(&bytes)?;

    // Read the fixed header first so we know how much payload+CRC to pull.
    let header = transport.read(3, timeout)?;
    if header[0] != SOH {
        return Err(Error::Malformed(format!(
            "expected SOH 0x{SOH:02x}, got 0x{:02x}",
            header[0]
        )));
    }
    let len = header[1] as usize;
    let rest = transport.read(len + 2, timeout)?;

    let mut full = header;
    full.extend(rest);
    let (decoded, _) = Frame::decode(&full)?;
    trace!(
        "framer: decoded response opcode 0x{:02x}, {} byte payload",
        decoded.opcode,
        decoded.payload.len()
    );
    Ok(decoded)
}

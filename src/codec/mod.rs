//! The serial command codec: marshals typed operations to frame payloads,
//! submits them through the framer/transport, and parses typed results.
//!
//! This is the only layer that knows the wire layout of each opcode. Higher
//! layers (`reader`, `background`) only ever see [`TagReadData`],
//! [`Region`], [`GpioPin`] and friends.

pub mod opcode;
pub mod status;

use std::time::{Duration, SystemTime};

use log::{trace, warn};

use crate::error::{Error, FaultCategory, Result};
use crate::framer::{self, Frame};
use crate::gpio::GpioPin;
use crate::region::Region;
use crate::tag::{MemoryBank, Protocol, TagData, TagFilter, TagReadData};
use crate::tagop::{LockAction, LockTarget, TagOp, TagOpResultKind};
use crate::transport::Transport;

fn protocol_to_code(p: Protocol) -> u8 {
    match p {
        Protocol::Gen2 => 0x01,
        Protocol::Iso18k6B => 0x02,
        Protocol::Ipx => 0x03,
    }
}

fn protocol_from_code(code: u8) -> Protocol {
    match code {
        0x02 => Protocol::Iso18k6B,
        0x03 => Protocol::Ipx,
        _ => Protocol::Gen2,
    }
}

fn lock_target_code(t: LockTarget) -> u8 {
    match t {
        LockTarget::User => 0x01,
        LockTarget::Tid => 0x02,
        LockTarget::Epc => 0x03,
        LockTarget::AccessPassword => 0x04,
        LockTarget::KillPassword => 0x05,
    }
}

fn lock_action_code(a: LockAction) -> u8 {
    match a {
        LockAction::Unlock => 0x00,
        LockAction::Lock => 0x01,
        LockAction::PermUnlock => 0x02,
        LockAction::PermLock => 0x03,
    }
}

/// Stateless command codec. Holds no state of its own; every method takes
/// the transport and operation timeout explicitly so callers (`ReaderCore`,
/// `BackgroundEngine`) control locking and lifetime.
pub struct CommandCodec;

impl CommandCodec {
    /// Send one command frame and parse its response, peeling off the
    /// status byte per §4.3: 0 = success (remaining bytes returned as-is),
    /// non-zero = a 16-bit fault code follows, mapped to a category.
    pub fn execute(
        transport: &mut dyn Transport,
        opcode: u8,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let frame = Frame::new(opcode, payload);
        let response = framer::exchange(transport, &frame, timeout)?;
        let body = &response.payload;
        let status = *body
            .first()
            .ok_or_else(|| Error::ParseFault("empty response payload".into()))?;
        if status == 0 {
            trace!("codec: opcode 0x{opcode:02x} succeeded");
            return Ok(body[1..].to_vec());
        }
        if body.len() < 3 {
            return Err(Error::ParseFault(
                "fault response missing 16-bit fault code".into(),
            ));
        }
        let code = u16::from_be_bytes([body[1], body[2]]);
        let category = status::category_for(code);
        warn!("codec: opcode 0x{opcode:02x} faulted with 0x{code:04x} ({category})");
        Err(Error::CodeFault { code, category })
    }

    /// `GET_VERSION`: returns (software version string, serial string).
    pub fn get_version(transport: &mut dyn Transport, timeout: Duration) -> Result<(String, String)> {
        let body = Self::execute(transport, opcode::GET_VERSION, vec![], timeout)?;
        if body.len() < 4 {
            return Err(Error::ParseFault("GET_VERSION response too short".into()));
        }
        let (major, minor, patch) = (body[0], body[1], body[2]);
        let serial_len = body[3] as usize;
        let serial_bytes = body
            .get(4..4 + serial_len)
            .ok_or_else(|| Error::ParseFault("GET_VERSION serial field truncated".into()))?;
        let serial = String::from_utf8_lossy(serial_bytes).to_string();
        Ok((format!("{major}.{minor}.{patch}"), serial))
    }

    /// `SET_REGION`.
    pub fn set_region(transport: &mut dyn Transport, timeout: Duration, region: Region) -> Result<()> {
        Self::execute(transport, opcode::SET_REGION, vec![region.to_code()], timeout)?;
        Ok(())
    }

    /// `GET_REGION`.
    pub fn get_region(transport: &mut dyn Transport, timeout: Duration) -> Result<Region> {
        let body = Self::execute(transport, opcode::GET_REGION, vec![], timeout)?;
        let code = *body
            .first()
            .ok_or_else(|| Error::ParseFault("GET_REGION response empty".into()))?;
        Region::from_code(code)
    }

    /// `GET_POWER`, in centi-dBm.
    pub fn get_power(transport: &mut dyn Transport, timeout: Duration) -> Result<u16> {
        let body = Self::execute(transport, opcode::GET_POWER, vec![], timeout)?;
        if body.len() < 2 {
            return Err(Error::ParseFault("GET_POWER response too short".into()));
        }
        Ok(u16::from_be_bytes([body[0], body[1]]))
    }

    /// `SET_POWER`, in centi-dBm.
    pub fn set_power(transport: &mut dyn Transport, timeout: Duration, centi_dbm: u16) -> Result<()> {
        Self::execute(
            transport,
            opcode::SET_POWER,
            centi_dbm.to_be_bytes().to_vec(),
            timeout,
        )?;
        Ok(())
    }

    /// `GPIO_GET`.
    pub fn gpio_get(transport: &mut dyn Transport, timeout: Duration, id: u32) -> Result<GpioPin> {
        let body = Self::execute(transport, opcode::GPIO_GET, vec![id as u8], timeout)?;
        if body.len() < 2 {
            return Err(Error::ParseFault("GPIO_GET response too short".into()));
        }
        Ok(GpioPin::new(id, body[0] != 0, body[1] != 0))
    }

    /// `GPIO_SET`.
    pub fn gpio_set(transport: &mut dyn Transport, timeout: Duration, pin: GpioPin) -> Result<()> {
        Self::execute(
            transport,
            opcode::GPIO_SET,
            vec![pin.id as u8, pin.high as u8, pin.output as u8],
            timeout,
        )?;
        Ok(())
    }

    /// `GET_CURRENT_PROGRAM`, used as the canonical lazy/probed parameter.
    pub fn get_current_program(transport: &mut dyn Transport, timeout: Duration) -> Result<u8> {
        let body = Self::execute(transport, opcode::GET_CURRENT_PROGRAM, vec![], timeout)?;
        body.first()
            .copied()
            .ok_or_else(|| Error::ParseFault("GET_CURRENT_PROGRAM response empty".into()))
    }

    /// `READ_TAG_ID_MULTIPLE`: a synchronous read of fixed `duration`.
    /// Returns the tag records the device buffered during that window.
    pub fn read_tag_id_multiple(
        transport: &mut dyn Transport,
        timeout: Duration,
        duration: Duration,
    ) -> Result<Vec<TagReadData>> {
        let ms = u16::try_from(duration.as_millis().min(u16::MAX as u128))
            .map_err(|_| Error::InvalidArgument("read duration overflows u16 milliseconds".into()))?;
        let body = Self::execute(
            transport,
            opcode::READ_TAG_ID_MULTIPLE,
            ms.to_be_bytes().to_vec(),
            timeout,
        )?;
        parse_tag_records(&body)
    }

    /// `GEN2_SELECT`, sent ahead of a filtered Gen2 tag operation. A no-op
    /// for [`TagFilter::None`].
    pub fn select(transport: &mut dyn Transport, timeout: Duration, filter: &TagFilter) -> Result<()> {
        filter.validate()?;
        let Some(payload) = select_payload(filter) else {
            return Ok(());
        };
        Self::execute(transport, opcode::GEN2_SELECT, payload, timeout)?;
        Ok(())
    }

    /// Execute a filtered tag operation: per §4.6, resolves the Select
    /// step for Gen2 filters, then renders and submits the operation
    /// itself. Returns `Some(bytes)` for ops with a data result, `None`
    /// for ops that only signal success/failure.
    pub fn execute_tag_op(
        transport: &mut dyn Transport,
        timeout: Duration,
        op: &TagOp,
        filter: &TagFilter,
        access_password: [u8; 4],
    ) -> Result<Option<Vec<u8>>> {
        op.validate()?;
        if matches!(op, TagOp::Iso18k6BRead { .. } | TagOp::Iso18k6BWrite { .. } | TagOp::Iso18k6BLock { .. }) {
            // ISO18000-6B embeds the filter in the op-specific opcode
            // instead of a separate Select command.
        } else {
            Self::select(transport, timeout, filter)?;
        }
        let (op_opcode, op_payload) = render_tag_op(op, filter, access_password)?;
        let body = Self::execute(transport, op_opcode, op_payload, timeout)?;
        Ok(match op.result_kind() {
            TagOpResultKind::Bytes => Some(body),
            TagOpResultKind::Unit => None,
        })
    }

    /// `START_CONTINUOUS_READ`: arm streaming inventory on one
    /// antenna/protocol. The device then sends one frame per tag report
    /// (or a fault frame) until `stop_continuous_read` is issued.
    pub fn start_continuous_read(
        transport: &mut dyn Transport,
        timeout: Duration,
        antenna: u8,
        protocol: Protocol,
    ) -> Result<()> {
        Self::execute(
            transport,
            opcode::START_CONTINUOUS_READ,
            vec![antenna, protocol_to_code(protocol)],
            timeout,
        )?;
        Ok(())
    }

    /// `STOP_CONTINUOUS_READ`.
    pub fn stop_continuous_read(transport: &mut dyn Transport, timeout: Duration) -> Result<()> {
        Self::execute(transport, opcode::STOP_CONTINUOUS_READ, vec![], timeout)?;
        Ok(())
    }

    /// `CLEAR_TAG_BUFFER`: used to recover from `TAG_ID_BUFFER_FULL`.
    pub fn clear_tag_buffer(transport: &mut dyn Transport, timeout: Duration) -> Result<()> {
        Self::execute(transport, opcode::CLEAR_TAG_BUFFER, vec![], timeout)?;
        Ok(())
    }

    /// Read and parse one streamed tag-report frame during a continuous
    /// read. Distinct from `execute` because the device is the one
    /// initiating this frame (no prior write from us).
    pub fn read_streamed_report(
        transport: &mut dyn Transport,
        timeout: Duration,
    ) -> Result<TagReadData> {
        let header = transport.read(3, timeout)?;
        if header[0] != framer::SOH {
            return Err(Error::Malformed(format!(
                "expected SOH, got 0x{:02x}",
                header[0]
            )));
        }
        let len = header[1] as usize;
        let rest = transport.read(len + 2, timeout)?;
        let mut full = header;
        full.extend(rest);
        let (frame, _) = Frame::decode(&full)?;
        let body = &frame.payload;
        let status = *body
            .first()
            .ok_or_else(|| Error::ParseFault("empty streamed report".into()))?;
        if status != 0 {
            if body.len() < 3 {
                return Err(Error::ParseFault(
                    "fault streamed report missing 16-bit fault code".into(),
                ));
            }
            let code = u16::from_be_bytes([body[1], body[2]]);
            return Err(Error::CodeFault {
                code,
                category: status::category_for(code),
            });
        }
        let records = parse_tag_records(&body[1..])?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| Error::ParseFault("streamed report carried no tag record".into()))
    }
}

/// One tag record's on-wire layout:
/// `epc_len:u8 | epc[epc_len] | antenna:u8 | rssi:i8 | read_count:u8`.
fn parse_one_record(buf: &[u8]) -> Result<(TagReadData, usize)> {
    let epc_len = *buf
        .first()
        .ok_or_else(|| Error::ParseFault("tag record missing EPC length".into()))? as usize;
    let need = 1 + epc_len + 3;
    if buf.len() < need {
        return Err(Error::ParseFault("tag record truncated".into()));
    }
    let epc = buf[1..1 + epc_len].to_vec();
    let antenna = buf[1 + epc_len];
    let rssi = buf[2 + epc_len] as i8 as i16;
    let read_count = buf[3 + epc_len];
    let tag = TagData::new(epc, Protocol::Gen2, None);
    Ok((
        TagReadData {
            tag,
            antenna,
            protocol: Protocol::Gen2,
            timestamp: SystemTime::now(),
            rssi,
            read_count: read_count as u32,
            op_result: None,
        },
        need,
    ))
}

/// A `READ_TAG_ID_MULTIPLE` response body: `tag_count:u8` followed by that
/// many records as laid out in [`parse_one_record`].
fn parse_tag_records(body: &[u8]) -> Result<Vec<TagReadData>> {
    let count = *body
        .first()
        .ok_or_else(|| Error::ParseFault("tag record set missing count".into()))? as usize;
    let mut rest = &body[1..];
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let (rec, consumed) = parse_one_record(rest)?;
        out.push(rec);
        rest = &rest[consumed..];
    }
    Ok(out)
}

fn select_payload(filter: &TagFilter) -> Option<Vec<u8>> {
    match filter {
        TagFilter::None => None,
        TagFilter::Epc(epc) => {
            // Per §9: translate a bare EPC match into an equivalent Select
            // against the EPC bank, starting past the 32-bit PC/CRC
            // preamble most Gen2 tags carry there.
            let mut payload = vec![0u8, MemoryBank::Epc.to_code()];
            payload.extend_from_slice(&32u32.to_be_bytes());
            payload.extend_from_slice(&((epc.len() as u16) * 8).to_be_bytes());
            payload.extend_from_slice(epc);
            Some(payload)
        }
        TagFilter::Select {
            invert,
            bank,
            offset,
            length,
            mask,
        } => {
            let mut payload = vec![*invert as u8, bank.to_code()];
            payload.extend_from_slice(&offset.to_be_bytes());
            payload.extend_from_slice(&length.to_be_bytes());
            payload.extend_from_slice(mask);
            Some(payload)
        }
    }
}

fn render_tag_op(op: &TagOp, filter: &TagFilter, access_password: [u8; 4]) -> Result<(u8, Vec<u8>)> {
    Ok(match op {
        TagOp::Gen2ReadData {
            bank,
            word_ptr,
            word_count,
        } => {
            let mut p = vec![bank.to_code()];
            p.extend_from_slice(&word_ptr.to_be_bytes());
            p.push(*word_count);
            p.extend_from_slice(&access_password);
            (opcode::GEN2_READ_DATA, p)
        }
        TagOp::Gen2WriteData {
            bank,
            word_ptr,
            data,
        } => {
            let mut p = vec![bank.to_code()];
            p.extend_from_slice(&word_ptr.to_be_bytes());
            p.push((data.len() / 2) as u8);
            p.extend_from_slice(&access_password);
            p.extend_from_slice(data);
            (opcode::WRITE_TAG_DATA, p)
        }
        TagOp::Gen2WriteTag { epc } => {
            let mut p = access_password.to_vec();
            p.push(epc.len() as u8);
            p.extend_from_slice(epc);
            (opcode::GEN2_WRITE_TAG, p)
        }
        TagOp::Gen2Lock { target, action } => {
            let mut p = access_password.to_vec();
            p.push(lock_target_code(*target));
            p.push(lock_action_code(*action));
            (opcode::LOCK_TAG, p)
        }
        TagOp::Gen2Kill { kill_password } => (opcode::KILL_TAG, kill_password.to_vec()),
        TagOp::Gen2BlockWrite {
            bank,
            block_ptr,
            data,
        } => {
            let mut p = vec![bank.to_code()];
            p.extend_from_slice(&block_ptr.to_be_bytes());
            p.push((data.len() / 2) as u8);
            p.extend_from_slice(&access_password);
            p.extend_from_slice(data);
            (opcode::GEN2_BLOCK_WRITE, p)
        }
        TagOp::Gen2BlockPermaLock {
            bank,
            block_ptr,
            block_range,
        } => {
            let mut p = vec![bank.to_code()];
            p.extend_from_slice(&block_ptr.to_be_bytes());
            p.push(*block_range);
            p.extend_from_slice(&access_password);
            (opcode::GEN2_BLOCK_PERMALOCK, p)
        }
        TagOp::Gen2BlockErase {
            bank,
            word_ptr,
            word_count,
        } => {
            let mut p = vec![bank.to_code()];
            p.extend_from_slice(&word_ptr.to_be_bytes());
            p.push(*word_count);
            p.extend_from_slice(&access_password);
            (opcode::GEN2_BLOCK_ERASE, p)
        }
        TagOp::Iso18k6BRead { address, length } => {
            let mut p = vec![*address, *length];
            p.extend(iso_filter_bytes(filter));
            (opcode::ISO18K6B_READ, p)
        }
        TagOp::Iso18k6BWrite { address, data } => {
            let mut p = vec![*address, *data];
            p.extend(iso_filter_bytes(filter));
            (opcode::ISO18K6B_WRITE, p)
        }
        TagOp::Iso18k6BLock { address } => {
            let mut p = vec![*address];
            p.extend(iso_filter_bytes(filter));
            (opcode::ISO18K6B_LOCK, p)
        }
    })
}

/// ISO18000-6B embeds its filter (an 8-byte tag UID match, or a wildcard)
/// directly in the op-specific opcode rather than a separate Select.
fn iso_filter_bytes(filter: &TagFilter) -> Vec<u8> {
    match filter {
        TagFilter::Epc(id) => {
            let mut buf = id.clone();
            buf.resize(8, 0);
            buf
        }
        _ => vec![0u8; 8],
    }
}

// `FaultCategory` is re-exported via `crate::error` for callers matching on
// `Error::CodeFault { category, .. }`; referenced here only for doc links.
#[allow(unused_imports)]
use FaultCategory as _FaultCategoryDocLink;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn ok_frame(opcode: u8, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8];
        payload.extend_from_slice(data);
        Frame::new(opcode, payload).encode().unwrap()
    }

    #[test]
    fn get_version_parses_fields() {
        let mut t = MockTransport::new();
        t.push_response(ok_frame(opcode::GET_VERSION, &[1, 2, 3, 4, b'A', b'B', b'C', b'D']));
        let (sw, serial) = CommandCodec::get_version(&mut t, Duration::from_millis(100)).unwrap();
        assert_eq!(sw, "1.2.3");
        assert_eq!(serial, "ABCD");
    }

    #[test]
    fn fault_byte_maps_to_code_fault() {
        let mut t = MockTransport::new();
        let mut payload = vec![1u8]; // non-zero status
        payload.extend_from_slice(&status::TAG_ID_BUFFER_FULL.to_be_bytes());
        t.push_response(Frame::new(opcode::READ_TAG_ID_MULTIPLE, payload).encode().unwrap());
        let err = CommandCodec::read_tag_id_multiple(&mut t, Duration::from_millis(100), Duration::from_millis(500))
            .unwrap_err();
        match err {
            Error::CodeFault { code, category } => {
                assert_eq!(code, status::TAG_ID_BUFFER_FULL);
                assert_eq!(category, FaultCategory::Tag);
            }
            other => panic!("expected CodeFault, got {other:?}"),
        }
    }

    #[test]
    fn read_tag_id_multiple_parses_two_records() {
        let mut t = MockTransport::new();
        let mut data = vec![2u8]; // tag_count
        // Record 1
        data.push(2); // epc_len
        data.extend([0xE2, 0x00]);
        data.push(1); // antenna
        data.push((-45i8) as u8); // rssi
        data.push(1); // read_count
        // Record 2
        data.push(2);
        data.extend([0xE2, 0x01]);
        data.push(1);
        data.push((-50i8) as u8);
        data.push(1);
        t.push_response(ok_frame(opcode::READ_TAG_ID_MULTIPLE, &data));

        let reads = CommandCodec::read_tag_id_multiple(
            &mut t,
            Duration::from_millis(100),
            Duration::from_millis(500),
        )
        .unwrap();
        assert_eq!(reads.len(), 2);
        assert_eq!(reads[0].tag.epc, vec![0xE2, 0x00]);
        assert_eq!(reads[0].rssi, -45);
        assert_eq!(reads[1].tag.epc, vec![0xE2, 0x01]);
        assert_eq!(reads[1].rssi, -50);
    }

    #[test]
    fn execute_tag_op_block_permalock_returns_raw_bytes() {
        let mut t = MockTransport::new();
        t.push_response(ok_frame(opcode::GEN2_BLOCK_PERMALOCK, &[0x00, 0x01, 0x02, 0x03]));
        let op = TagOp::Gen2BlockPermaLock {
            bank: MemoryBank::User,
            block_ptr: 0,
            block_range: 1,
        };
        let result = CommandCodec::execute_tag_op(
            &mut t,
            Duration::from_millis(100),
            &op,
            &TagFilter::None,
            [0; 4],
        )
        .unwrap();
        assert_eq!(result, Some(vec![0x00, 0x01, 0x02, 0x03]));
    }

    #[test]
    fn execute_tag_op_sends_select_before_gen2_write() {
        let mut t = MockTransport::new();
        t.push_response(ok_frame(opcode::GEN2_SELECT, &[]));
        t.push_response(ok_frame(opcode::KILL_TAG, &[]));
        let op = TagOp::Gen2Kill {
            kill_password: [1, 2, 3, 4],
        };
        let filter = TagFilter::Epc(vec![0xAA, 0xBB]);
        let result =
            CommandCodec::execute_tag_op(&mut t, Duration::from_millis(100), &op, &filter, [0; 4]).unwrap();
        assert_eq!(result, None);
        assert_eq!(t.written().len(), 2);
    }
}

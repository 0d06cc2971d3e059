//! End-to-end scenarios against the in-crate `MockTransport`: synchronous
//! reads, tag operations, background start/stop, CRC recovery, region
//! fallback and continuous-mode buffer-full recovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gen2reader::background::BackgroundMode;
use gen2reader::codec::{opcode, status};
use gen2reader::error::Error;
use gen2reader::framer::Frame;
use gen2reader::param::ParamValue;
use gen2reader::region::Region;
use gen2reader::tag::{MemoryBank, Protocol, TagFilter};
use gen2reader::tagop::TagOp;
use gen2reader::transport::mock::MockTransport;
use gen2reader::ReaderCore;

fn ok_frame(opcode: u8, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8];
    payload.extend_from_slice(data);
    Frame::new(opcode, payload).encode().unwrap()
}

fn fault_frame(opcode: u8, code: u16) -> Vec<u8> {
    let mut payload = vec![1u8];
    payload.extend_from_slice(&code.to_be_bytes());
    Frame::new(opcode, payload).encode().unwrap()
}

fn version_and_region(mock: &mut MockTransport, region: Region) {
    mock.push_response(ok_frame(opcode::GET_VERSION, &[1, 0, 0, 4, b'T', b'E', b'S', b'T']));
    mock.push_response(ok_frame(opcode::GET_REGION, &[region.to_code()]));
}

fn reader_with(mock: MockTransport) -> ReaderCore {
    ReaderCore::from_transport("eapi:///dev/mock", Box::new(mock))
}

/// S1: a fixed-duration synchronous read returns exactly the records the
/// device reports, in order.
#[test]
fn s1_synchronous_read_returns_records_in_order() {
    let mut mock = MockTransport::new();
    version_and_region(&mut mock, Region::Na);
    let mut body = vec![2u8]; // tag_count
    body.push(2);
    body.extend([0xE2, 0x0A]);
    body.push(1);
    body.push((-45i8) as u8);
    body.push(1);
    body.push(2);
    body.extend([0xE2, 0x0B]);
    body.push(1);
    body.push((-50i8) as u8);
    body.push(1);
    mock.push_response(ok_frame(opcode::READ_TAG_ID_MULTIPLE, &body));

    let mut reader = reader_with(mock);
    reader.connect().unwrap();
    let reads = reader.read_sync(Duration::from_millis(500)).unwrap();

    assert_eq!(reads.len(), 2);
    assert_eq!(reads[0].tag.epc, vec![0xE2, 0x0A]);
    assert_eq!(reads[0].rssi, -45);
    assert_eq!(reads[1].tag.epc, vec![0xE2, 0x0B]);
    assert_eq!(reads[1].rssi, -50);
}

/// S2: BlockPermaLock returns its raw result bytes (status byte stripped).
#[test]
fn s2_block_permalock_returns_result_bytes() {
    let mut mock = MockTransport::new();
    version_and_region(&mut mock, Region::Na);
    mock.push_response(ok_frame(opcode::GEN2_BLOCK_PERMALOCK, &[0x00, 0x01, 0x02, 0x03]));

    let mut reader = reader_with(mock);
    reader.connect().unwrap();
    let op = TagOp::Gen2BlockPermaLock {
        bank: MemoryBank::User,
        block_ptr: 0,
        block_range: 1,
    };
    let result = reader.execute_tag_op(&op, &TagFilter::None).unwrap();
    assert_eq!(result, Some(vec![0x00, 0x01, 0x02, 0x03]));
}

/// S3: background polled reads deliver every tag event, no exceptions, and
/// leave the engine idle with both queues drained after stop.
#[test]
fn s3_background_polled_start_stop() {
    let mut mock = MockTransport::new();
    version_and_region(&mut mock, Region::Na);
    for i in 0..3u8 {
        let mut body = vec![1u8, 2];
        body.extend([0xE2, i]);
        body.push(1);
        body.push((-40i8) as u8);
        body.push(1);
        mock.push_response(ok_frame(opcode::READ_TAG_ID_MULTIPLE, &body));
    }
    for _ in 0..50 {
        mock.push_response(ok_frame(opcode::READ_TAG_ID_MULTIPLE, &[0u8]));
    }

    let mut reader = reader_with(mock);
    reader.connect().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    reader
        .add_read_listener(Box::new(move |r| seen2.lock().unwrap().push(r.tag.epc.clone())))
        .unwrap();
    let exceptions = Arc::new(AtomicUsize::new(0));
    let exceptions2 = exceptions.clone();
    reader
        .add_exception_listener(Box::new(move |_| {
            exceptions2.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    reader
        .start_reading(
            BackgroundMode::Polled {
                async_on_time: Duration::from_millis(1),
                async_off_time: Duration::from_millis(30),
            },
            1,
            Protocol::Gen2,
        )
        .unwrap();
    std::thread::sleep(Duration::from_millis(150));
    reader.stop_reading();

    assert_eq!(
        reader.background_state(),
        gen2reader::background::EngineState::Idle
    );
    assert_eq!(exceptions.load(Ordering::SeqCst), 0);
    let seen = seen.lock().unwrap();
    for i in 0..3u8 {
        assert!(seen.contains(&vec![0xE2, i]), "missing tag {i}");
    }
}

/// S4: a corrupted response raises CrcMismatch; the handle is still usable
/// for the next command afterward.
#[test]
fn s4_crc_corruption_then_recovery() {
    let mut mock = MockTransport::new();
    let mut bad = ok_frame(opcode::GET_VERSION, &[1, 0, 0, 1, b'X']);
    let corrupt_at = bad.len() - 3; // inside the payload, not the length byte
    bad[corrupt_at] ^= 0x01;
    mock.push_response(bad);
    version_and_region(&mut mock, Region::Na);

    let mut reader = reader_with(mock);
    assert!(matches!(reader.connect(), Err(Error::CrcMismatch)));
    assert!(!reader.is_connected());

    reader.connect().unwrap();
    assert!(reader.is_connected());
}

/// S5: a cold device reporting UNSPEC falls back to NA at connect time.
#[test]
fn s5_region_unspec_falls_back_to_na() {
    let mut mock = MockTransport::new();
    mock.push_response(ok_frame(opcode::GET_VERSION, &[1, 0, 0, 1, b'Z']));
    mock.push_response(ok_frame(opcode::GET_REGION, &[Region::Unspec.to_code()]));
    mock.push_response(ok_frame(opcode::SET_REGION, &[]));

    let mut reader = reader_with(mock);
    reader.connect().unwrap();
    assert!(matches!(
        reader.param_get("/reader/region/id").unwrap(),
        ParamValue::Region(Region::Na)
    ));
}

/// S6: a buffer-full fault during continuous mode re-arms locally instead
/// of stopping the engine, and later reports still reach listeners.
#[test]
fn s6_continuous_buffer_full_recovers() {
    let mut mock = MockTransport::new();
    version_and_region(&mut mock, Region::Na);

    let mut first = ok_frame(opcode::START_CONTINUOUS_READ, &[]);
    first.extend(fault_frame(opcode::READ_TAG_ID_MULTIPLE, status::TAG_ID_BUFFER_FULL));
    mock.push_response(first);
    mock.push_response(ok_frame(opcode::CLEAR_TAG_BUFFER, &[]));

    let mut record = vec![1u8];
    record.extend([0xAB, 0xCD]);
    record.push(1);
    record.push((-33i8) as u8);
    record.push(1);
    let mut report = vec![0u8];
    report.push(1); // tag_count
    report.extend(record);
    let mut second = ok_frame(opcode::START_CONTINUOUS_READ, &[]);
    second.extend(Frame::new(opcode::READ_TAG_ID_MULTIPLE, report).encode().unwrap());
    mock.push_response(second);

    let mut reader = reader_with(mock);
    reader.connect().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    reader
        .add_read_listener(Box::new(move |r| seen2.lock().unwrap().push(r.tag.epc.clone())))
        .unwrap();

    reader
        .start_reading(BackgroundMode::Continuous, 1, Protocol::Gen2)
        .unwrap();
    std::thread::sleep(Duration::from_millis(100));
    reader.stop_reading();

    assert_eq!(
        reader.background_state(),
        gen2reader::background::EngineState::Idle
    );
    assert!(seen.lock().unwrap().contains(&vec![0xAB, 0xCD]));
}

//! Byte-oriented duplex transports: the wire underneath the framer.
//!
//! A [`Transport`] knows nothing about framing or opcodes. It just moves
//! bytes, with a timeout on reads, and optionally reports every successful
//! write/read to a trace hook for diagnostics.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{Error, Result};

/// Direction of a traced transport event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes written to the device.
    Write,
    /// Bytes read from the device.
    Read,
}

/// One traced transport event, handed to a transport-trace listener.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    /// Whether this was a write or a read.
    pub direction: Direction,
    /// The bytes that were written or read.
    pub bytes: Vec<u8>,
    /// The timeout that was in effect for this operation, if any.
    pub timeout: Option<Duration>,
}

/// Callback invoked for every successful transport write/read.
pub type TraceHook = Box<dyn Fn(&TransportEvent) + Send + Sync>;

/// A duplex byte channel with a per-operation timeout.
///
/// Implementations have no retry policy and no framing awareness; that's
/// layered on top by [`crate::framer`].
pub trait Transport: Send {
    /// Open the underlying channel. Implementations that open at
    /// construction time may treat this as a no-op.
    fn open(&mut self) -> Result<()>;

    /// Close the underlying channel. Idempotent.
    fn close(&mut self) -> Result<()>;

    /// Write all of `bytes` to the channel.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read exactly `len` bytes, failing with [`Error::Timeout`] if they
    /// don't arrive before `timeout`.
    fn read(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Change the baud rate, for transports where that's meaningful.
    /// Transports that don't have a baud rate (e.g. TCP) treat this as a
    /// no-op.
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<()>;

    /// Install (or clear, with `None`) a trace hook.
    fn set_trace_hook(&mut self, hook: Option<TraceHook>);
}

/// Shared trace-hook plumbing so each concrete transport doesn't repeat it.
#[derive(Default)]
struct Tracer {
    hook: Option<TraceHook>,
}

impl Tracer {
    fn fire(&self, direction: Direction, bytes: &[u8], timeout: Option<Duration>) {
        if let Some(hook) = &self.hook {
            hook(&TransportEvent {
                direction,
                bytes: bytes.to_vec(),
                timeout,
            });
        }
    }
}

/// TCP client transport: connects once at construction, then behaves like
/// any other duplex byte channel.
///
/// This is the transport used by `tmr://host` / `eapi` deployments that
/// talk to a reader over the network, and by every test and demo in this
/// crate since it requires no physical hardware.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    addr: String,
    tracer: Tracer,
}

impl TcpTransport {
    /// Connect to `host:port` immediately.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("connecting TCP transport to {addr}");
        let stream = TcpStream::connect(&addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: Some(stream),
            addr,
            tracer: Tracer::default(),
        })
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::Closed)
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.stream = Some(TcpStream::connect(&self.addr)?);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream_mut()?.write_all(bytes)?;
        self.tracer.fire(Direction::Write, bytes, None);
        Ok(())
    }

    fn read(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let stream = self.stream_mut()?;
        stream.set_read_timeout(Some(timeout))?;
        let mut buf = vec![0u8; len];
        match stream.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                trace!("TCP transport read timed out after {timeout:?}");
                return Err(Error::Timeout);
            }
            Err(e) => return Err(e.into()),
        }
        self.tracer.fire(Direction::Read, &buf, Some(timeout));
        Ok(buf)
    }

    fn set_baud_rate(&mut self, _baud: u32) -> Result<()> {
        // Meaningless over TCP.
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stream_mut()?.flush()?;
        Ok(())
    }

    fn set_trace_hook(&mut self, hook: Option<TraceHook>) {
        self.tracer.hook = hook;
    }
}

/// Serial-port transport, backed by the `serialport` crate.
///
/// Gated behind the `serial` feature, matching this ecosystem's practice of
/// keeping hardware-specific backends opt-in.
#[cfg(feature = "serial")]
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    tracer: Tracer,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    /// Open `device` (e.g. `/dev/ttyUSB0`) at `baud`.
    pub fn open_device(device: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(device, baud)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        Ok(Self {
            port,
            tracer: Tracer::default(),
        })
    }
}

#[cfg(feature = "serial")]
impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.tracer.fire(Direction::Write, bytes, None);
        Ok(())
    }

    fn read(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let mut buf = vec![0u8; len];
        match self.port.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                warn!("serial transport read timed out after {timeout:?}");
                return Err(Error::Timeout);
            }
            Err(e) => return Err(e.into()),
        }
        self.tracer.fire(Direction::Read, &buf, Some(timeout));
        Ok(buf)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.port
            .set_baud_rate(baud)
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }

    fn set_trace_hook(&mut self, hook: Option<TraceHook>) {
        self.tracer.hook = hook;
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    //! A scripted transport for unit and integration tests: replies to each
    //! write with the next queued response, optionally corrupting a byte.

    use super::*;
    use std::collections::VecDeque;

    /// One scripted exchange: bytes the test expects to be written, and
    /// the bytes to hand back on the next read.
    pub struct MockTransport {
        responses: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
        pending_read: Vec<u8>,
        tracer: Tracer,
        closed: bool,
    }

    impl MockTransport {
        /// Create a transport that has no scripted responses yet.
        pub fn new() -> Self {
            Self {
                responses: VecDeque::new(),
                written: Vec::new(),
                pending_read: Vec::new(),
                tracer: Tracer::default(),
                closed: false,
            }
        }

        /// Queue a response that will be returned by subsequent `read`
        /// calls, as if the device had sent it after our next write.
        pub fn push_response(&mut self, bytes: Vec<u8>) {
            self.responses.push_back(bytes);
        }

        /// All bytes ever written to this transport, one entry per call.
        pub fn written(&self) -> &[Vec<u8>] {
            &self.written
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self) -> Result<()> {
            self.closed = false;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            if self.closed {
                return Err(Error::Closed);
            }
            self.written.push(bytes.to_vec());
            self.tracer.fire(Direction::Write, bytes, None);
            if let Some(next) = self.responses.pop_front() {
                self.pending_read.extend(next);
            }
            Ok(())
        }

        fn read(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
            if self.closed {
                return Err(Error::Closed);
            }
            if self.pending_read.len() < len {
                return Err(Error::Timeout);
            }
            let out: Vec<u8> = self.pending_read.drain(..len).collect();
            self.tracer.fire(Direction::Read, &out, Some(timeout));
            Ok(out)
        }

        fn set_baud_rate(&mut self, _baud: u32) -> Result<()> {
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn set_trace_hook(&mut self, hook: Option<TraceHook>) {
            self.tracer.hook = hook;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    #[test]
    fn mock_round_trips_a_write_then_read() {
        let mut t = MockTransport::new();
        t.push_response(vec![1, 2, 3]);
        t.write(&[0xAA]).unwrap();
        let got = t.read(3, Duration::from_millis(10)).unwrap();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn mock_read_times_out_with_insufficient_bytes() {
        let mut t = MockTransport::new();
        t.push_response(vec![1]);
        t.write(&[0xAA]).unwrap();
        assert!(matches!(
            t.read(3, Duration::from_millis(10)),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn trace_hook_sees_writes_and_reads() {
        use std::sync::{Arc, Mutex};
        let seen: Arc<Mutex<Vec<Direction>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut t = MockTransport::new();
        t.set_trace_hook(Some(Box::new(move |ev| {
            seen2.lock().unwrap().push(ev.direction);
        })));
        t.push_response(vec![9]);
        t.write(&[1]).unwrap();
        t.read(1, Duration::from_millis(10)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Direction::Write, Direction::Read]);
    }
}

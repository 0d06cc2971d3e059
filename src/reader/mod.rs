//! `ReaderCore`: the public façade. URI-based construction, variant
//! dispatch, connection lifecycle, parameter access, and the synchronous
//! and background operation surface.

pub mod uri;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};

use crate::background::{BackgroundEngine, BackgroundMode, EngineState};
use crate::codec::CommandCodec;
use crate::error::{Error, Result};
use crate::gpio::GpioPin;
use crate::listener::{
    ExceptionListener, ExceptionListenerRegistry, ReadListener, ReadListenerRegistry, ReaderStatus,
    StatusListener, StatusListenerRegistry, TraceListener, TraceListenerRegistry,
};
use crate::param::{ParamValue, ParameterRegistry};
use crate::region::Region;
use crate::tag::{Protocol, TagFilter, TagReadData};
use crate::tagop::TagOp;
use crate::transport::{Transport, TransportEvent};
use uri::ReaderScheme;

/// Parameters that may be read/written before `connect()` succeeds.
const PRECONNECT_PARAMS: &[&str] = &[
    "/reader/uri",
    "/reader/commandtimeout",
    "/reader/transporttimeout",
];

/// A protocol family behind the `ReaderCore` contract. Only the serial
/// command-set variant is fully implemented in this crate; RQL and LLRP are
/// out of scope per §1 and are represented by a stub that reports
/// `Unsupported` for everything beyond what `connect()` needs for dispatch.
pub trait ReaderVariant: Send {
    fn connect(&mut self, timeout: Duration) -> Result<()>;
    fn disconnect(&mut self);
    fn get_version(&mut self, timeout: Duration) -> Result<(String, String)>;
    fn get_region(&mut self, timeout: Duration) -> Result<Region>;
    fn set_region(&mut self, timeout: Duration, region: Region) -> Result<()>;
    fn get_power(&mut self, timeout: Duration) -> Result<u16>;
    fn set_power(&mut self, timeout: Duration, centi_dbm: u16) -> Result<()>;
    fn read_tag_id_multiple(&mut self, timeout: Duration, duration: Duration) -> Result<Vec<TagReadData>>;
    fn execute_tag_op(
        &mut self,
        timeout: Duration,
        op: &TagOp,
        filter: &TagFilter,
        access_password: [u8; 4],
    ) -> Result<Option<Vec<u8>>>;
    fn gpio_get(&mut self, timeout: Duration, id: u32) -> Result<GpioPin>;
    fn gpio_set(&mut self, timeout: Duration, pin: GpioPin) -> Result<()>;
    fn get_current_program(&mut self, timeout: Duration) -> Result<u8>;

    #[allow(clippy::too_many_arguments)]
    fn start_background(
        &mut self,
        mode: BackgroundMode,
        antenna: u8,
        protocol: Protocol,
        read_listeners: Arc<ReadListenerRegistry>,
        exception_listeners: Arc<ExceptionListenerRegistry>,
        status_listeners: Arc<StatusListenerRegistry>,
        command_timeout: Duration,
    ) -> Result<()>;
    fn stop_background(&mut self);
    fn background_state(&self) -> EngineState;
    fn set_transport_trace_hook(&mut self, hook: Option<Box<dyn Fn(&TransportEvent) + Send + Sync>>);
}

/// The serial command-set variant: everything in §4 of this crate's design
/// is implemented against a [`Transport`] through [`CommandCodec`].
pub struct SerialVariant {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    background: Option<BackgroundEngine>,
}

impl SerialVariant {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            background: None,
        }
    }

    fn with_transport<T>(&self, f: impl FnOnce(&mut dyn Transport) -> Result<T>) -> Result<T> {
        let mut guard = self.transport.lock()?;
        f(&mut **guard)
    }
}

impl ReaderVariant for SerialVariant {
    fn connect(&mut self, _timeout: Duration) -> Result<()> {
        self.with_transport(|t| t.open())
    }

    fn disconnect(&mut self) {
        self.stop_background();
        if let Ok(mut guard) = self.transport.lock() {
            let _ = guard.close();
        }
    }

    fn get_version(&mut self, timeout: Duration) -> Result<(String, String)> {
        self.with_transport(|t| CommandCodec::get_version(t, timeout))
    }

    fn get_region(&mut self, timeout: Duration) -> Result<Region> {
        self.with_transport(|t| CommandCodec::get_region(t, timeout))
    }

    fn set_region(&mut self, timeout: Duration, region: Region) -> Result<()> {
        self.with_transport(|t| CommandCodec::set_region(t, timeout, region))
    }

    fn get_power(&mut self, timeout: Duration) -> Result<u16> {
        self.with_transport(|t| CommandCodec::get_power(t, timeout))
    }

    fn set_power(&mut self, timeout: Duration, centi_dbm: u16) -> Result<()> {
        self.with_transport(|t| CommandCodec::set_power(t, timeout, centi_dbm))
    }

    fn read_tag_id_multiple(&mut self, timeout: Duration, duration: Duration) -> Result<Vec<TagReadData>> {
        self.with_transport(|t| CommandCodec::read_tag_id_multiple(t, timeout, duration))
    }

    fn execute_tag_op(
        &mut self,
        timeout: Duration,
        op: &TagOp,
        filter: &TagFilter,
        access_password: [u8; 4],
    ) -> Result<Option<Vec<u8>>> {
        self.with_transport(|t| CommandCodec::execute_tag_op(t, timeout, op, filter, access_password))
    }

    fn gpio_get(&mut self, timeout: Duration, id: u32) -> Result<GpioPin> {
        self.with_transport(|t| CommandCodec::gpio_get(t, timeout, id))
    }

    fn gpio_set(&mut self, timeout: Duration, pin: GpioPin) -> Result<()> {
        self.with_transport(|t| CommandCodec::gpio_set(t, timeout, pin))
    }

    fn get_current_program(&mut self, timeout: Duration) -> Result<u8> {
        self.with_transport(|t| CommandCodec::get_current_program(t, timeout))
    }

    fn start_background(
        &mut self,
        mode: BackgroundMode,
        antenna: u8,
        protocol: Protocol,
        read_listeners: Arc<ReadListenerRegistry>,
        exception_listeners: Arc<ExceptionListenerRegistry>,
        status_listeners: Arc<StatusListenerRegistry>,
        command_timeout: Duration,
    ) -> Result<()> {
        if self.background.is_none() {
            self.background = Some(BackgroundEngine::new(
                self.transport.clone(),
                read_listeners,
                exception_listeners,
                status_listeners,
                command_timeout,
            ));
        }
        self.background
            .as_mut()
            .expect("just constructed")
            .start_reading(mode, antenna, protocol)
    }

    fn stop_background(&mut self) {
        if let Some(engine) = self.background.as_mut() {
            engine.stop_reading();
        }
    }

    fn background_state(&self) -> EngineState {
        self.background
            .as_ref()
            .map(|e| e.state())
            .unwrap_or(EngineState::Idle)
    }

    fn set_transport_trace_hook(&mut self, hook: Option<Box<dyn Fn(&TransportEvent) + Send + Sync>>) {
        if let Ok(mut guard) = self.transport.lock() {
            guard.set_trace_hook(hook);
        }
    }
}

/// Stand-in for the RQL/LLRP peer variants: every operation this crate
/// doesn't implement for them reports [`Error::Unsupported`].
pub struct StubVariant {
    name: &'static str,
}

impl StubVariant {
    pub fn rql() -> Self {
        Self { name: "RQL" }
    }
    pub fn llrp() -> Self {
        Self { name: "LLRP" }
    }

    fn unsupported<T>(&self, op: &str) -> Result<T> {
        Err(Error::Unsupported(format!("{} variant does not implement {op}", self.name)))
    }
}

impl ReaderVariant for StubVariant {
    fn connect(&mut self, _timeout: Duration) -> Result<()> {
        debug!("{} variant connect is a capability-probe-only stub", self.name);
        Ok(())
    }
    fn disconnect(&mut self) {}
    fn get_version(&mut self, _timeout: Duration) -> Result<(String, String)> {
        self.unsupported("get_version")
    }
    fn get_region(&mut self, _timeout: Duration) -> Result<Region> {
        self.unsupported("get_region")
    }
    fn set_region(&mut self, _timeout: Duration, _region: Region) -> Result<()> {
        self.unsupported("set_region")
    }
    fn get_power(&mut self, _timeout: Duration) -> Result<u16> {
        self.unsupported("get_power")
    }
    fn set_power(&mut self, _timeout: Duration, _centi_dbm: u16) -> Result<()> {
        self.unsupported("set_power")
    }
    fn read_tag_id_multiple(&mut self, _timeout: Duration, _duration: Duration) -> Result<Vec<TagReadData>> {
        self.unsupported("read_tag_id_multiple")
    }
    fn execute_tag_op(
        &mut self,
        _timeout: Duration,
        _op: &TagOp,
        _filter: &TagFilter,
        _access_password: [u8; 4],
    ) -> Result<Option<Vec<u8>>> {
        self.unsupported("execute_tag_op")
    }
    fn gpio_get(&mut self, _timeout: Duration, _id: u32) -> Result<GpioPin> {
        self.unsupported("gpio_get")
    }
    fn gpio_set(&mut self, _timeout: Duration, _pin: GpioPin) -> Result<()> {
        self.unsupported("gpio_set")
    }
    fn get_current_program(&mut self, _timeout: Duration) -> Result<u8> {
        self.unsupported("get_current_program")
    }
    fn start_background(
        &mut self,
        _mode: BackgroundMode,
        _antenna: u8,
        _protocol: Protocol,
        _read_listeners: Arc<ReadListenerRegistry>,
        _exception_listeners: Arc<ExceptionListenerRegistry>,
        _status_listeners: Arc<StatusListenerRegistry>,
        _command_timeout: Duration,
    ) -> Result<()> {
        self.unsupported("start_background")
    }
    fn stop_background(&mut self) {}
    fn background_state(&self) -> EngineState {
        EngineState::Idle
    }
    fn set_transport_trace_hook(&mut self, _hook: Option<Box<dyn Fn(&TransportEvent) + Send + Sync>>) {}
}

/// The public reader façade: identity, connection state, parameter
/// registry, listener registries, and the variant it dispatches to.
pub struct ReaderCore {
    uri: String,
    variant: Box<dyn ReaderVariant>,
    connected: bool,
    params: Mutex<ParameterRegistry>,
    read_listeners: Arc<ReadListenerRegistry>,
    exception_listeners: Arc<ExceptionListenerRegistry>,
    status_listeners: Arc<StatusListenerRegistry>,
    trace_listeners: Arc<TraceListenerRegistry>,
}

impl ReaderCore {
    /// Parse `uri` and build the selected variant, without connecting.
    ///
    /// `tmr://<host>` is ambiguous per §4.5 (probe LLRP, fall back to RQL);
    /// since this crate treats both as out-of-scope stub collaborators
    /// (§1), it resolves directly to the RQL stub rather than performing a
    /// real LLRP capability probe (an Open Question decision; see
    /// DESIGN.md).
    pub fn from_uri(uri: &str) -> Result<Self> {
        let scheme = uri::parse(uri)?;
        let variant: Box<dyn ReaderVariant> = match scheme {
            ReaderScheme::Serial { device_path } => Box::new(SerialVariant::new(open_serial(&device_path)?)),
            ReaderScheme::Rql { host: _, port: _ } => Box::new(StubVariant::rql()),
            ReaderScheme::Llrp { host: _, port: _ } => Box::new(StubVariant::llrp()),
            ReaderScheme::TmrNetwork { .. } => Box::new(StubVariant::rql()),
        };
        Ok(Self::with_variant(uri, variant))
    }

    /// Build a reader over an already-open transport, bypassing URI
    /// dispatch. Used by the demo CLI against a TCP reader and by this
    /// crate's own tests against [`crate::transport::mock::MockTransport`].
    pub fn from_transport(uri: &str, transport: Box<dyn Transport>) -> Self {
        Self::with_variant(uri, Box::new(SerialVariant::new(transport)))
    }

    fn with_variant(uri: &str, variant: Box<dyn ReaderVariant>) -> Self {
        let mut params = ParameterRegistry::new();
        seed_parameters(&mut params, uri);
        Self {
            uri: uri.to_string(),
            variant,
            connected: false,
            params: Mutex::new(params),
            read_listeners: Arc::new(ReadListenerRegistry::default()),
            exception_listeners: Arc::new(ExceptionListenerRegistry::default()),
            status_listeners: Arc::new(StatusListenerRegistry::default()),
            trace_listeners: Arc::new(TraceListenerRegistry::default()),
        }
    }

    fn require_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::InvalidArgument("reader is not connected".into()))
        }
    }

    fn command_timeout(&self) -> Duration {
        match self.params.lock().ok().and_then(|mut p| p.get("/reader/commandTimeout").ok()) {
            Some(ParamValue::U32(ms)) => Duration::from_millis(ms as u64),
            _ => Duration::from_secs(1),
        }
    }

    /// Open the transport, negotiate version, confirm lazy parameters, and
    /// bootstrap the region (NA fallback on UNSPEC). Leaves the handle
    /// disconnected on any failure.
    pub fn connect(&mut self) -> Result<()> {
        let timeout = self.command_timeout();
        self.variant.connect(timeout)?;

        // RQL/LLRP are out-of-scope stub collaborators (§1): their
        // `connect()` is the entire contract, with no version handshake or
        // region bootstrap to perform.
        match self.variant.get_version(timeout) {
            Ok((software, serial)) => {
                {
                    let mut params = self.params.lock()?;
                    params.add_param("/reader/version/software", ParamValue::Str(software), false, None, None);
                    params.add_param("/reader/version/serial", ParamValue::Str(serial), false, None, None);
                }

                let region = self.variant.get_region(timeout)?;
                let region = if region == Region::Unspec {
                    info!("device reported UNSPEC region, falling back to NA");
                    self.variant.set_region(timeout, Region::Na)?;
                    Region::Na
                } else {
                    region
                };
                self.params
                    .lock()?
                    .add_param("/reader/region/id", ParamValue::Region(region), true, None, None);
            }
            Err(Error::Unsupported(reason)) => {
                debug!("skipping capability bootstrap for this variant: {reason}");
            }
            Err(e) => return Err(e),
        }

        let trace_listeners = self.trace_listeners.clone();
        self.variant.set_transport_trace_hook(Some(Box::new(move |ev: &TransportEvent| {
            trace_listeners.notify_all(ev);
        })));

        self.connected = true;
        self.status_listeners.notify_all(ReaderStatus::Connected);
        Ok(())
    }

    /// Release the transport, interrupt the background engine, and mark
    /// this handle disconnected. Infallible and idempotent.
    pub fn destroy(&mut self) {
        self.variant.stop_background();
        self.variant.disconnect();
        if self.connected {
            self.connected = false;
            self.status_listeners.notify_all(ReaderStatus::Disconnected);
        }
    }

    /// Fetch a parameter's value.
    pub fn param_get(&self, name: &str) -> Result<ParamValue> {
        if !self.connected && !is_preconnect_param(name) {
            return Err(Error::InvalidArgument(format!(
                "{name} is not accessible before connect()"
            )));
        }
        self.params.lock()?.get(name)
    }

    /// Set a parameter's value.
    pub fn param_set(&self, name: &str, value: ParamValue) -> Result<()> {
        if !self.connected && !is_preconnect_param(name) {
            return Err(Error::InvalidArgument(format!(
                "{name} is not accessible before connect()"
            )));
        }
        self.params.lock()?.set(name, value)
    }

    /// Names of every confirmed parameter.
    pub fn param_list(&self) -> Result<Vec<String>> {
        Ok(self.params.lock()?.list())
    }

    /// This handle's connection URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Whether `connect()` has succeeded and `destroy()` hasn't run since.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// A synchronous inventory of fixed `duration`.
    pub fn read_sync(&mut self, duration: Duration) -> Result<Vec<TagReadData>> {
        self.require_connected()?;
        let timeout = self.command_timeout();
        self.variant.read_tag_id_multiple(timeout, duration)
    }

    /// Execute a tag operation against the effective filter, antenna,
    /// protocol and access password resolved from the parameter registry.
    pub fn execute_tag_op(&mut self, op: &TagOp, filter: &TagFilter) -> Result<Option<Vec<u8>>> {
        self.require_connected()?;
        let timeout = self.command_timeout();
        let access_password = {
            let mut params = self.params.lock()?;
            match params.get("/reader/gen2/accessPassword") {
                Ok(ParamValue::Bytes(bytes)) if bytes.len() == 4 => {
                    [bytes[0], bytes[1], bytes[2], bytes[3]]
                }
                _ => [0u8; 4],
            }
        };
        self.variant.execute_tag_op(timeout, op, filter, access_password)
    }

    pub fn gpio_get(&mut self, id: u32) -> Result<GpioPin> {
        self.require_connected()?;
        let timeout = self.command_timeout();
        self.variant.gpio_get(timeout, id)
    }

    pub fn gpio_set(&mut self, pin: GpioPin) -> Result<()> {
        self.require_connected()?;
        let timeout = self.command_timeout();
        self.variant.gpio_set(timeout, pin)
    }

    /// Start background reading. `antenna`/`protocol` default to 1/Gen2
    /// when the effective read plan doesn't resolve to a single value.
    pub fn start_reading(&mut self, mode: BackgroundMode, antenna: u8, protocol: Protocol) -> Result<()> {
        self.require_connected()?;
        let timeout = self.command_timeout();
        self.variant.start_background(
            mode,
            antenna,
            protocol,
            self.read_listeners.clone(),
            self.exception_listeners.clone(),
            self.status_listeners.clone(),
            timeout,
        )
    }

    /// Stop background reading. Never raises.
    pub fn stop_reading(&mut self) {
        self.variant.stop_background();
    }

    pub fn background_state(&self) -> EngineState {
        self.variant.background_state()
    }

    pub fn add_read_listener(&self, listener: ReadListener) -> Result<u64> {
        self.read_listeners.add(listener)
    }
    pub fn remove_read_listener(&self, id: u64) -> Result<()> {
        self.read_listeners.remove(id)
    }
    pub fn add_exception_listener(&self, listener: ExceptionListener) -> Result<u64> {
        self.exception_listeners.add(listener)
    }
    pub fn remove_exception_listener(&self, id: u64) -> Result<()> {
        self.exception_listeners.remove(id)
    }
    pub fn add_status_listener(&self, listener: StatusListener) -> Result<u64> {
        self.status_listeners.add(listener)
    }
    pub fn remove_status_listener(&self, id: u64) -> Result<()> {
        self.status_listeners.remove(id)
    }
    /// May be added before `connect()`, per §3's invariant.
    pub fn add_transport_listener(&self, listener: TraceListener) -> Result<u64> {
        self.trace_listeners.add(listener)
    }
    pub fn remove_transport_listener(&self, id: u64) -> Result<()> {
        self.trace_listeners.remove(id)
    }
}

fn is_preconnect_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    PRECONNECT_PARAMS.iter().any(|p| *p == lower)
}

#[cfg(not(feature = "serial"))]
fn open_serial(_device_path: &str) -> Result<Box<dyn Transport>> {
    Err(Error::Unsupported(
        "serial transport requires building with the 'serial' feature".into(),
    ))
}

#[cfg(feature = "serial")]
fn open_serial(device_path: &str) -> Result<Box<dyn Transport>> {
    Ok(Box::new(crate::transport::SerialTransport::open_device(device_path, 115_200)?))
}

fn seed_parameters(params: &mut ParameterRegistry, uri: &str) {
    params.add_param("/reader/uri", ParamValue::Str(uri.to_string()), false, None, None);
    params.add_param("/reader/commandTimeout", ParamValue::U32(1000), true, None, None);
    params.add_param("/reader/transportTimeout", ParamValue::U32(1000), true, None, None);
    params.add_param(
        "/reader/read/plan",
        ParamValue::ReadPlan(Box::new(crate::tag::ReadPlan::default_simple())),
        true,
        None,
        None,
    );
    params.add_param("/reader/read/asyncOnTime", ParamValue::U32(250), true, None, None);
    params.add_param("/reader/read/asyncOffTime", ParamValue::U32(0), true, None, None);
    params.add_param(
        "/reader/gen2/accessPassword",
        ParamValue::Bytes(vec![0, 0, 0, 0]),
        true,
        None,
        None,
    );
    params.add_param("/reader/antenna/portList", ParamValue::PortList(vec![1]), true, None, None);
    params.add_param("/reader/tagop/antenna", ParamValue::U32(1), true, None, None);
    params.add_param(
        "/reader/tagop/protocol",
        ParamValue::Str("gen2".to_string()),
        true,
        None,
        None,
    );
    // Lazy: not every firmware exposes a current-program concept.
    params.add_unconfirmed_param("/reader/currentProgram", ParamValue::U32(0), false, None, None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::opcode;
    use crate::framer::Frame;
    use crate::transport::mock::MockTransport;

    fn ok_frame(opcode: u8, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8];
        payload.extend_from_slice(data);
        Frame::new(opcode, payload).encode().unwrap()
    }

    fn reader_with_mock(mock: MockTransport) -> ReaderCore {
        ReaderCore::from_transport("eapi:///dev/mock", Box::new(mock))
    }

    #[test]
    fn connect_bootstraps_region_unspec_to_na() {
        let mut t = MockTransport::new();
        t.push_response(ok_frame(opcode::GET_VERSION, &[1, 0, 0, 3, b'A', b'B', b'C']));
        t.push_response(ok_frame(opcode::GET_REGION, &[Region::Unspec.to_code()]));
        t.push_response(ok_frame(opcode::SET_REGION, &[]));
        let mut reader = reader_with_mock(t);
        reader.connect().unwrap();
        assert!(reader.is_connected());
        assert!(matches!(
            reader.param_get("/reader/region/id").unwrap(),
            ParamValue::Region(Region::Na)
        ));
    }

    #[test]
    fn operations_fail_before_connect() {
        let reader = reader_with_mock(MockTransport::new());
        assert!(matches!(
            reader.param_get("/reader/region/id"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(reader.param_get("/reader/uri"), Ok(ParamValue::Str(_))));
    }

    #[test]
    fn from_uri_rejects_unknown_scheme() {
        assert!(matches!(ReaderCore::from_uri("http://x"), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn from_uri_rql_yields_stub_that_reports_unsupported() {
        let mut reader = ReaderCore::from_uri("rql://reader.local").unwrap();
        reader.connect().unwrap();
        assert!(matches!(
            reader.read_sync(Duration::from_millis(100)),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn read_sync_returns_parsed_tags() {
        let mut t = MockTransport::new();
        t.push_response(ok_frame(opcode::GET_VERSION, &[1, 0, 0, 1, b'Z']));
        t.push_response(ok_frame(opcode::GET_REGION, &[Region::Na.to_code()]));
        let mut record = vec![1u8];
        record.push(2);
        record.extend([0xAB, 0xCD]);
        record.push(1);
        record.push(0xE4); // -28 as i8
        record.push(1);
        t.push_response(ok_frame(opcode::READ_TAG_ID_MULTIPLE, &record));
        let mut reader = reader_with_mock(t);
        reader.connect().unwrap();
        let reads = reader.read_sync(Duration::from_millis(100)).unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].tag.epc, vec![0xAB, 0xCD]);
    }
}

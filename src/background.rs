//! The background inventory engine: polled and continuous reads running on
//! their own worker threads, feeding bounded queues that notifier threads
//! drain into listeners.
//!
//! Thread model and cooperative cancellation mirror this codebase's
//! multithreaded flowgraph runner: one `StopSignal` shared by clone, workers
//! poll it between iterations rather than being killed, and a `sync_channel`
//! of bounded capacity is the only thing workers hand data across.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::codec::CommandCodec;
use crate::error::{Error, Result};
use crate::listener::{ExceptionListenerRegistry, ReadListenerRegistry, ReaderStatus, StatusListenerRegistry};
use crate::tag::{Protocol, TagReadData};
use crate::transport::Transport;

/// Capacity of the tag/exception queues between the reader worker and its
/// notifier threads.
const QUEUE_CAPACITY: usize = 256;

/// A cheaply-cloneable cooperative cancellation flag.
///
/// Workers check `is_set()` between iterations instead of being forcibly
/// killed; `signal()` is idempotent and can be called from any thread.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Engine lifecycle state, per §4.7's `Idle -> Arming -> Running -> Draining
/// -> Idle` state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Arming,
    Running,
    Draining,
}

/// How the engine drives inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundMode {
    /// Repeated fixed-duration synchronous reads ("background reader").
    Polled {
        async_on_time: Duration,
        async_off_time: Duration,
    },
    /// One streaming inventory command, parsed frame-by-frame ("true async").
    Continuous,
}

enum QueueItem<T> {
    Item(T),
    Done,
}

/// Owns the reader worker plus its notifier threads. One `BackgroundEngine`
/// per `ReaderCore`; `start`/`stop` drive the Idle/Running transition.
pub struct BackgroundEngine {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    read_listeners: Arc<ReadListenerRegistry>,
    exception_listeners: Arc<ExceptionListenerRegistry>,
    status_listeners: Arc<StatusListenerRegistry>,
    command_timeout: Duration,
    state: Arc<Mutex<EngineState>>,
    stop: StopSignal,
    workers: Vec<JoinHandle<()>>,
}

impl BackgroundEngine {
    pub fn new(
        transport: Arc<Mutex<Box<dyn Transport>>>,
        read_listeners: Arc<ReadListenerRegistry>,
        exception_listeners: Arc<ExceptionListenerRegistry>,
        status_listeners: Arc<StatusListenerRegistry>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            read_listeners,
            exception_listeners,
            status_listeners,
            command_timeout,
            state: Arc::new(Mutex::new(EngineState::Idle)),
            stop: StopSignal::new(),
            workers: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().expect("engine state mutex poisoned")
    }

    /// Arm and start background reading. Fails if already running.
    pub fn start_reading(
        &mut self,
        mode: BackgroundMode,
        antenna: u8,
        protocol: Protocol,
    ) -> Result<()> {
        {
            let mut state = self.state.lock()?;
            if *state != EngineState::Idle {
                return Err(Error::InvalidArgument(
                    "background engine is already running".into(),
                ));
            }
            *state = EngineState::Arming;
        }
        self.stop.reset();

        let (tag_tx, tag_rx) = sync_channel::<QueueItem<TagReadData>>(QUEUE_CAPACITY);
        let (exc_tx, exc_rx) = sync_channel::<QueueItem<Error>>(QUEUE_CAPACITY);

        // Each stage below may fail to spawn; on failure, any already-spawned
        // workers are reclaimed (their senders are dropped or already moved,
        // which disconnects their receivers and lets them exit) before the
        // engine reverts to Idle and the error propagates.
        let notifier = match spawn_notifier(
            tag_rx,
            self.read_listeners.clone(),
            default_read_listener_active(&self.read_listeners),
        ) {
            Ok(h) => h,
            Err(e) => {
                drop(tag_tx);
                drop(exc_tx);
                *self.state.lock()? = EngineState::Idle;
                return Err(e);
            }
        };

        let exception_notifier = match spawn_exception_notifier(
            exc_rx,
            self.exception_listeners.clone(),
            default_exception_listener_active(&self.exception_listeners),
        ) {
            Ok(h) => h,
            Err(e) => {
                drop(tag_tx);
                drop(exc_tx);
                let _ = notifier.join();
                *self.state.lock()? = EngineState::Idle;
                return Err(e);
            }
        };

        let spawn_reader = match mode {
            BackgroundMode::Polled {
                async_on_time,
                async_off_time,
            } => self.spawn_polled_worker(tag_tx, exc_tx, async_on_time, async_off_time),
            BackgroundMode::Continuous => {
                self.spawn_continuous_worker(tag_tx, exc_tx, antenna, protocol)
            }
        };
        let reader = match spawn_reader {
            Ok(h) => h,
            Err(e) => {
                let _ = notifier.join();
                let _ = exception_notifier.join();
                *self.state.lock()? = EngineState::Idle;
                return Err(e);
            }
        };

        self.workers = vec![reader, notifier, exception_notifier];
        *self.state.lock()? = EngineState::Running;
        self.status_listeners.notify_all(ReaderStatus::BackgroundArmed);
        Ok(())
    }

    /// Stop background reading. Waits for the reader worker to notice the
    /// stop signal, then for both queues to drain, then joins every worker.
    /// Non-throwing from a protocol standpoint: it always completes.
    pub fn stop_reading(&mut self) {
        let mut state = self.state.lock().expect("engine state mutex poisoned");
        if *state == EngineState::Idle {
            return;
        }
        *state = EngineState::Draining;
        drop(state);

        self.stop.signal();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("background worker thread panicked");
            }
        }
        *self.state.lock().expect("engine state mutex poisoned") = EngineState::Idle;
        self.status_listeners.notify_all(ReaderStatus::BackgroundStopped);
    }

    fn spawn_polled_worker(
        &self,
        tag_tx: SyncSender<QueueItem<TagReadData>>,
        exc_tx: SyncSender<QueueItem<Error>>,
        async_on_time: Duration,
        async_off_time: Duration,
    ) -> Result<JoinHandle<()>> {
        let transport = self.transport.clone();
        let stop = self.stop.clone();
        let timeout = self.command_timeout;
        std::thread::Builder::new()
            .name("reader-polled".into())
            .spawn(move || {
                while !stop.is_set() {
                    let reads = {
                        let mut t = match transport.lock() {
                            Ok(t) => t,
                            Err(_) => break,
                        };
                        CommandCodec::read_tag_id_multiple(&mut **t, timeout, async_on_time)
                    };
                    match reads {
                        Ok(reads) => {
                            for read in reads {
                                if tag_tx.send(QueueItem::Item(read)).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            let fatal = e.is_fatal_to_connection();
                            warn!("polled read failed: {e}");
                            let _ = exc_tx.send(QueueItem::Item(e));
                            if fatal {
                                break;
                            }
                        }
                    }
                    if stop.is_set() {
                        break;
                    }
                    if !async_off_time.is_zero() {
                        std::thread::sleep(async_off_time);
                    }
                }
                let _ = tag_tx.send(QueueItem::Done);
                let _ = exc_tx.send(QueueItem::Done);
            })
            .map_err(Error::from)
    }

    fn spawn_continuous_worker(
        &self,
        tag_tx: SyncSender<QueueItem<TagReadData>>,
        exc_tx: SyncSender<QueueItem<Error>>,
        antenna: u8,
        protocol: Protocol,
    ) -> Result<JoinHandle<()>> {
        let transport = self.transport.clone();
        let stop = self.stop.clone();
        let timeout = self.command_timeout;
        std::thread::Builder::new()
            .name("reader-continuous".into())
            .spawn(move || {
                {
                    let mut t = match transport.lock() {
                        Ok(t) => t,
                        Err(_) => return,
                    };
                    if let Err(e) = CommandCodec::start_continuous_read(&mut **t, timeout, antenna, protocol) {
                        let _ = exc_tx.send(QueueItem::Item(e));
                        let _ = tag_tx.send(QueueItem::Done);
                        let _ = exc_tx.send(QueueItem::Done);
                        return;
                    }
                }

                while !stop.is_set() {
                    let report = {
                        let mut t = match transport.lock() {
                            Ok(t) => t,
                            Err(_) => break,
                        };
                        CommandCodec::read_streamed_report(&mut **t, timeout)
                    };
                    match report {
                        Ok(read) => {
                            if tag_tx.send(QueueItem::Item(read)).is_err() {
                                break;
                            }
                        }
                        Err(Error::CodeFault { code, .. })
                            if code == crate::codec::status::TAG_ID_BUFFER_FULL =>
                        {
                            debug!("tag buffer full, re-arming continuous read");
                            let mut t = match transport.lock() {
                                Ok(t) => t,
                                Err(_) => break,
                            };
                            if CommandCodec::clear_tag_buffer(&mut **t, timeout).is_err() {
                                break;
                            }
                            if CommandCodec::start_continuous_read(&mut **t, timeout, antenna, protocol).is_err() {
                                break;
                            }
                        }
                        Err(Error::CodeFault { code, .. }) if code == crate::codec::status::NO_ANTENNA => {
                            let _ = exc_tx.send(QueueItem::Item(Error::CodeFault {
                                code,
                                category: crate::error::FaultCategory::Hardware,
                            }));
                        }
                        Err(e @ (Error::Timeout | Error::InvalidArgument(_))) => {
                            warn!("continuous read stopped: {e}");
                            let _ = exc_tx.send(QueueItem::Item(e));
                            break;
                        }
                        Err(e) => {
                            let fatal = e.is_fatal_to_connection();
                            let _ = exc_tx.send(QueueItem::Item(e));
                            if fatal {
                                break;
                            }
                        }
                    }
                }

                if let Ok(mut t) = transport.lock() {
                    let _ = CommandCodec::stop_continuous_read(&mut **t, timeout);
                }
                let _ = tag_tx.send(QueueItem::Done);
                let _ = exc_tx.send(QueueItem::Done);
            })
            .map_err(Error::from)
    }
}

fn default_read_listener_active(registry: &ReadListenerRegistry) -> bool {
    registry.is_empty().unwrap_or(true)
}

fn default_exception_listener_active(registry: &ExceptionListenerRegistry) -> bool {
    registry.is_empty().unwrap_or(true)
}

fn spawn_notifier(
    rx: Receiver<QueueItem<TagReadData>>,
    listeners: Arc<ReadListenerRegistry>,
    inject_default: bool,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("reader-tag-notifier".into())
        .spawn(move || loop {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(QueueItem::Item(read)) => {
                    if inject_default {
                        info!(
                            "tag read: epc={:02x?} antenna={} rssi={}",
                            read.tag.epc, read.antenna, read.rssi
                        );
                    }
                    listeners.notify_all(&read);
                }
                Ok(QueueItem::Done) => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .map_err(Error::from)
}

fn spawn_exception_notifier(
    rx: Receiver<QueueItem<Error>>,
    listeners: Arc<ExceptionListenerRegistry>,
    inject_default: bool,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("reader-exception-notifier".into())
        .spawn(move || loop {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(QueueItem::Item(err)) => {
                    if inject_default {
                        warn!("background exception: {err}");
                    }
                    listeners.notify_all(&err);
                }
                Ok(QueueItem::Done) => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{opcode, status};
    use crate::framer::Frame;
    use crate::transport::mock::MockTransport;

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

    #[test]
    fn polled_mode_delivers_reads_then_stops_cleanly() {
        let mut t = MockTransport::new();
        let mut record = vec![2u8]; // tag_count
        record.push(2);
        record.extend([0xE2, 0x00]);
        record.push(1);
        record.push(0xD0); // -48 as i8
        record.push(1);
        t.push_response(ok_frame(opcode::READ_TAG_ID_MULTIPLE, &record));
        // enough scripted responses for a few polling cycles before stop
        for _ in 0..5 {
            t.push_response(ok_frame(opcode::READ_TAG_ID_MULTIPLE, &[0u8]));
        }

        let transport: Arc<Mutex<Box<dyn Transport>>> = Arc::new(Mutex::new(Box::new(t)));
        let reads = Arc::new(Mutex::new(Vec::new()));
        let read_listeners = Arc::new(ReadListenerRegistry::default());
        let reads2 = reads.clone();
        read_listeners
            .add(Box::new(move |r: &TagReadData| {
                reads2.lock().unwrap().push(r.tag.epc.clone());
            }))
            .unwrap();

        let mut engine = BackgroundEngine::new(
            transport,
            read_listeners,
            Arc::new(ExceptionListenerRegistry::default()),
            Arc::new(StatusListenerRegistry::default()),
            Duration::from_millis(200),
        );
        engine
            .start_reading(
                BackgroundMode::Polled {
                    async_on_time: Duration::from_millis(1),
                    async_off_time: Duration::from_millis(1),
                },
                1,
                Protocol::Gen2,
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        engine.stop_reading();

        assert_eq!(engine.state(), EngineState::Idle);
        assert!(reads.lock().unwrap().contains(&vec![0xE2, 0x00]));
    }

    #[test]
    fn start_reading_twice_fails() {
        let t = MockTransport::new();
        let transport: Arc<Mutex<Box<dyn Transport>>> = Arc::new(Mutex::new(Box::new(t)));
        let mut engine = BackgroundEngine::new(
            transport,
            Arc::new(ReadListenerRegistry::default()),
            Arc::new(ExceptionListenerRegistry::default()),
            Arc::new(StatusListenerRegistry::default()),
            Duration::from_millis(200),
        );
        engine
            .start_reading(
                BackgroundMode::Polled {
                    async_on_time: Duration::from_millis(5),
                    async_off_time: Duration::from_millis(50),
                },
                1,
                Protocol::Gen2,
            )
            .unwrap();
        let second = engine.start_reading(
            BackgroundMode::Polled {
                async_on_time: Duration::from_millis(5),
                async_off_time: Duration::from_millis(50),
            },
            1,
            Protocol::Gen2,
        );
        assert!(second.is_err());
        engine.stop_reading();
    }

    #[test]
    fn buffer_full_triggers_local_rearm_in_continuous_mode() {
        // Each MockTransport write pops exactly one queued response into its
        // read buffer, but the continuous worker only writes when it sends
        // a command (start/clear/restart) -- the streamed reports in
        // between are read without a matching write. So every frame that
        // must be available before the *next* write is concatenated into
        // the response for the write that precedes it.
        let mut t = MockTransport::new();
        let mut first = ok_frame(opcode::START_CONTINUOUS_READ, &[]);
        first.extend(fault_frame(opcode::READ_TAG_ID_MULTIPLE, status::TAG_ID_BUFFER_FULL));
        t.push_response(first);
        t.push_response(ok_frame(opcode::CLEAR_TAG_BUFFER, &[]));
        let mut third = ok_frame(opcode::START_CONTINUOUS_READ, &[]);
        for _ in 0..3 {
            third.extend(fault_frame(opcode::READ_TAG_ID_MULTIPLE, status::TAG_ID_BUFFER_FULL));
        }
        t.push_response(third);

        let transport: Arc<Mutex<Box<dyn Transport>>> = Arc::new(Mutex::new(Box::new(t)));
        let mut engine = BackgroundEngine::new(
            transport,
            Arc::new(ReadListenerRegistry::default()),
            Arc::new(ExceptionListenerRegistry::default()),
            Arc::new(StatusListenerRegistry::default()),
            Duration::from_millis(200),
        );
        engine
            .start_reading(BackgroundMode::Continuous, 1, Protocol::Gen2)
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        engine.stop_reading();
        assert_eq!(engine.state(), EngineState::Idle);
    }
}

//! Listener registries for tag reads, exceptions, reader status changes and
//! transport-level tracing.
//!
//! Each registry is a thin `Mutex<Vec<...>>` around a snapshot-then-notify
//! algorithm: a concurrent `add`/`remove` during delivery can't skip or
//! double-deliver an in-flight notification, and one listener panicking (or
//! erroring, for the fallible kinds) never stops its siblings from being
//! notified.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::error;

use crate::error::Result;
use crate::tag::TagReadData;
use crate::transport::TransportEvent;

/// Status transitions a `ReaderCore` may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStatus {
    Connected,
    Disconnected,
    BackgroundArmed,
    BackgroundStopped,
}

pub type ReadListener = Box<dyn Fn(&TagReadData) + Send + Sync>;
pub type ExceptionListener = Box<dyn Fn(&crate::error::Error) + Send + Sync>;
pub type StatusListener = Box<dyn Fn(ReaderStatus) + Send + Sync>;
pub type TraceListener = Box<dyn Fn(&TransportEvent) + Send + Sync>;

struct Entry<T> {
    id: u64,
    listener: Arc<T>,
}

/// A generic add/remove/notify-all registry. Not exported directly; the
/// four concrete registries below fix `T` to each listener kind.
struct Registry<T> {
    entries: Mutex<Vec<Entry<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> Registry<T> {
    fn add(&self, listener: T) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock()?.push(Entry {
            id,
            listener: Arc::new(listener),
        });
        Ok(id)
    }

    fn remove(&self, id: u64) -> Result<()> {
        self.entries.lock()?.retain(|e| e.id != id);
        Ok(())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.entries.lock()?.is_empty())
    }
}

impl<T: Fn(&U) + Send + Sync, U> Registry<T> {
    /// Notify every listener with a reference event, tolerating panics.
    ///
    /// Snapshots the listener `Arc`s under a short lock, then drops the
    /// guard before invoking anything: listener bodies never run while the
    /// registry is locked, so a slow callback doesn't stall concurrent
    /// `add`/`remove` or other notifications.
    fn notify_ref(&self, event: &U) {
        let snapshot: Vec<Arc<T>> = {
            let Ok(guard) = self.entries.lock() else {
                return;
            };
            guard.iter().map(|e| e.listener.clone()).collect()
        };
        for listener in &snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            if result.is_err() {
                error!("listener panicked during notification; continuing");
            }
        }
    }
}

/// Registry of tag-read listeners.
#[derive(Default)]
pub struct ReadListenerRegistry(Registry<ReadListener>);

impl ReadListenerRegistry {
    pub fn add(&self, listener: ReadListener) -> Result<u64> {
        self.0.add(listener)
    }
    pub fn remove(&self, id: u64) -> Result<()> {
        self.0.remove(id)
    }
    pub fn is_empty(&self) -> Result<bool> {
        self.0.is_empty()
    }
    pub fn notify_all(&self, read: &TagReadData) {
        self.0.notify_ref(read);
    }
}

/// Registry of exception listeners.
#[derive(Default)]
pub struct ExceptionListenerRegistry(Registry<ExceptionListener>);

impl ExceptionListenerRegistry {
    pub fn add(&self, listener: ExceptionListener) -> Result<u64> {
        self.0.add(listener)
    }
    pub fn remove(&self, id: u64) -> Result<()> {
        self.0.remove(id)
    }
    pub fn is_empty(&self) -> Result<bool> {
        self.0.is_empty()
    }
    pub fn notify_all(&self, err: &crate::error::Error) {
        self.0.notify_ref(err);
    }
}

/// Registry of reader-status listeners.
#[derive(Default)]
pub struct StatusListenerRegistry(Registry<StatusListener>);

impl StatusListenerRegistry {
    pub fn add(&self, listener: StatusListener) -> Result<u64> {
        self.0.add(listener)
    }
    pub fn remove(&self, id: u64) -> Result<()> {
        self.0.remove(id)
    }
    pub fn notify_all(&self, status: ReaderStatus) {
        let snapshot: Vec<Arc<StatusListener>> = {
            let Ok(guard) = self.0.entries.lock() else {
                return;
            };
            guard.iter().map(|e| e.listener.clone()).collect()
        };
        for listener in &snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(status)));
            if result.is_err() {
                error!("status listener panicked during notification; continuing");
            }
        }
    }
}

/// Registry of transport-trace listeners.
#[derive(Default)]
pub struct TraceListenerRegistry(Registry<TraceListener>);

impl TraceListenerRegistry {
    pub fn add(&self, listener: TraceListener) -> Result<u64> {
        self.0.add(listener)
    }
    pub fn remove(&self, id: u64) -> Result<()> {
        self.0.remove(id)
    }
    pub fn notify_all(&self, event: &TransportEvent) {
        self.0.notify_ref(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tag::{Protocol, TagData};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn sample_read() -> TagReadData {
        TagReadData {
            tag: TagData::new(vec![1, 2], Protocol::Gen2, None),
            antenna: 1,
            protocol: Protocol::Gen2,
            timestamp: SystemTime::now(),
            rssi: -40,
            read_count: 1,
            op_result: None,
        }
    }

    #[test]
    fn all_listeners_are_notified() {
        let reg = ReadListenerRegistry::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = count.clone();
            reg.add(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        reg.notify_all(&sample_read());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn removed_listener_is_not_notified() {
        let reg = ReadListenerRegistry::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = reg
            .add(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        reg.remove(id).unwrap();
        reg.notify_all(&sample_read());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_block_siblings() {
        let reg = ReadListenerRegistry::default();
        let count = Arc::new(AtomicUsize::new(0));
        reg.add(Box::new(|_| panic!("boom"))).unwrap();
        let c = count.clone();
        reg.add(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        reg.notify_all(&sample_read());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exception_registry_delivers_errors() {
        let reg = ExceptionListenerRegistry::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        reg.add(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        reg.notify_all(&Error::Timeout);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

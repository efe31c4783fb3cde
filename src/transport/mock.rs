//! Mock transport for tests.
//!
//! Records every write in order, remembers the last value of each point, and lets tests
//! drive the snapshot, drop the link, or make writes to specific points fail.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = MockTransport::new();
//! transport.fail_writes_to("P200");
//! transport.set_snapshot(ProcessSnapshot { upper_limit: true, ..Default::default() });
//! assert!(transport.write_analog("P200", 100).await.is_err());
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use super::{check_percent, PointValue, ProcessTransport};
use crate::error::TransportError;
use crate::process::{ProcessSnapshot, SnapshotFeed, TagValue};

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    /// Point name.
    pub point: String,
    /// Value written.
    pub value: PointValue,
}

/// In-memory transport that records writes.
#[derive(Debug)]
pub struct MockTransport {
    feed: SnapshotFeed,
    points: Mutex<BTreeMap<String, PointValue>>,
    writes: Mutex<Vec<RecordedWrite>>,
    failing: Mutex<HashSet<String>>,
    connected: AtomicBool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Connected transport with a default (all zero) snapshot.
    pub fn new() -> Self {
        Self::with_snapshot(ProcessSnapshot::default())
    }

    /// Connected transport starting from `snapshot`.
    pub fn with_snapshot(snapshot: ProcessSnapshot) -> Self {
        Self {
            feed: SnapshotFeed::new(snapshot),
            points: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Replace the published snapshot.
    pub fn set_snapshot(&self, snapshot: ProcessSnapshot) {
        self.feed.replace(snapshot);
    }

    /// Publish a single tag update.
    pub fn publish(&self, tag: &str, value: TagValue) -> Result<(), TransportError> {
        self.feed.apply_item(tag, value)
    }

    /// Mutate the published snapshot in place.
    pub fn update_snapshot(&self, f: impl FnOnce(&mut ProcessSnapshot)) {
        self.feed.modify(f);
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<ProcessSnapshot> {
        self.feed.subscribe()
    }

    /// Make every subsequent write to `point` fail.
    pub fn fail_writes_to(&self, point: &str) {
        self.failing.lock().insert(point.to_string());
    }

    /// Stop failing writes to `point`.
    pub fn clear_failure(&self, point: &str) {
        self.failing.lock().remove(point);
    }

    /// Toggle the link state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every successful write so far, in order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    /// Last value written to `point`, if any.
    pub fn point(&self, point: &str) -> Option<PointValue> {
        self.points.lock().get(point).copied()
    }

    /// Last value of every point written so far.
    pub fn points(&self) -> BTreeMap<String, PointValue> {
        self.points.lock().clone()
    }

    /// Values written to `point`, oldest first.
    pub fn history(&self, point: &str) -> Vec<PointValue> {
        self.writes
            .lock()
            .iter()
            .filter(|w| w.point == point)
            .map(|w| w.value)
            .collect()
    }

    /// True when every point ever written is currently neutral.
    pub fn all_neutral(&self) -> bool {
        self.points.lock().values().all(PointValue::is_neutral)
    }

    fn record(&self, name: &str, value: PointValue) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        if self.failing.lock().contains(name) {
            return Err(TransportError::Rejected {
                point: name.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.points.lock().insert(name.to_string(), value);
        self.writes.lock().push(RecordedWrite {
            point: name.to_string(),
            value,
        });
        Ok(())
    }
}

#[async_trait]
impl ProcessTransport for MockTransport {
    async fn write_digital(&self, name: &str, value: bool) -> Result<(), TransportError> {
        self.record(name, PointValue::Digital(value))
    }

    async fn write_analog(&self, name: &str, percent: u8) -> Result<(), TransportError> {
        check_percent(name, percent)?;
        self.record(name, PointValue::Analog(percent))
    }

    fn snapshot(&self) -> ProcessSnapshot {
        self.feed.current()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

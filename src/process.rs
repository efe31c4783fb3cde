//! Process snapshot model.
//!
//! A [`ProcessSnapshot`] is the latest known set of plant sensor readings. Transports own a
//! [`SnapshotFeed`], the single writer, and apply partial updates keyed by plant tag name.
//! Readers (condition predicates, the regulation loop) take a copy of the current value and
//! never mutate it.
//!
//! The feed is a `tokio::sync::watch` channel: every update is applied under the channel's
//! lock, so a reader always sees a whole snapshot and the last write per field wins.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::error::TransportError;

/// White liquor tank level.
pub const TAG_LI100: &str = "LI100";
/// Impregnation liquor tank level.
pub const TAG_LI200: &str = "LI200";
/// Black liquor tank level.
pub const TAG_LI400: &str = "LI400";
/// Digester pressure.
pub const TAG_PI300: &str = "PI300";
/// Digester temperature.
pub const TAG_TI300: &str = "TI300";
/// Digester upper limit switch.
pub const TAG_LS_PLUS_300: &str = "LS+300";
/// Digester lower limit switch.
pub const TAG_LS_MINUS_300: &str = "LS-300";

/// Every tag a transport is expected to publish.
pub const SUBSCRIBED_TAGS: [&str; 7] = [
    TAG_LI100,
    TAG_LI200,
    TAG_PI300,
    TAG_TI300,
    TAG_LI400,
    TAG_LS_PLUS_300,
    TAG_LS_MINUS_300,
];

/// Latest plant sensor readings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// White liquor tank (T100) level.
    pub li100: i32,
    /// Impregnation liquor tank (T200) level.
    pub li200: i32,
    /// Black liquor tank (T400) level.
    pub li400: i32,
    /// Digester (T300) pressure.
    pub pi300: i32,
    /// Digester (T300) temperature in °C.
    pub ti300: f64,
    /// `LS+300`: digester filled up to the upper switch.
    pub upper_limit: bool,
    /// `LS-300`: liquid present at the lower switch.
    pub lower_limit: bool,
}

/// A single tag value as delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Boolean switch state.
    Bool(bool),
    /// Integer indicator.
    Int(i32),
    /// Floating point indicator.
    Float(f64),
}

impl ProcessSnapshot {
    /// Apply one tag update in place. Other fields keep their prior value.
    ///
    /// Integer tags accept float values (truncated) and float tags accept integers, since
    /// field-bus clients are loose about numeric kinds. Booleans are never coerced.
    pub fn apply(&mut self, tag: &str, value: TagValue) -> Result<(), TransportError> {
        let mismatch = || TransportError::Rejected {
            point: tag.to_string(),
            reason: format!("unexpected value {value:?}"),
        };

        match tag {
            TAG_LI100 => self.li100 = as_int(value).ok_or_else(mismatch)?,
            TAG_LI200 => self.li200 = as_int(value).ok_or_else(mismatch)?,
            TAG_LI400 => self.li400 = as_int(value).ok_or_else(mismatch)?,
            TAG_PI300 => self.pi300 = as_int(value).ok_or_else(mismatch)?,
            TAG_TI300 => self.ti300 = as_float(value).ok_or_else(mismatch)?,
            TAG_LS_PLUS_300 => self.upper_limit = as_bool(value).ok_or_else(mismatch)?,
            TAG_LS_MINUS_300 => self.lower_limit = as_bool(value).ok_or_else(mismatch)?,
            _ => return Err(TransportError::UnknownPoint(tag.to_string())),
        }
        Ok(())
    }
}

fn as_int(value: TagValue) -> Option<i32> {
    match value {
        TagValue::Int(v) => Some(v),
        TagValue::Float(v) if v.is_finite() => Some(v as i32),
        _ => None,
    }
}

fn as_float(value: TagValue) -> Option<f64> {
    match value {
        TagValue::Float(v) => Some(v),
        TagValue::Int(v) => Some(f64::from(v)),
        TagValue::Bool(_) => None,
    }
}

fn as_bool(value: TagValue) -> Option<bool> {
    match value {
        TagValue::Bool(v) => Some(v),
        _ => None,
    }
}

/// Single-writer handle on the live snapshot.
#[derive(Debug)]
pub struct SnapshotFeed {
    sender: watch::Sender<ProcessSnapshot>,
}

impl Default for SnapshotFeed {
    fn default() -> Self {
        Self::new(ProcessSnapshot::default())
    }
}

impl SnapshotFeed {
    /// Create a feed holding `initial`.
    pub fn new(initial: ProcessSnapshot) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Current snapshot (copy).
    pub fn current(&self) -> ProcessSnapshot {
        *self.sender.borrow()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<ProcessSnapshot> {
        self.sender.subscribe()
    }

    /// Apply a batch of tag updates atomically.
    ///
    /// Unhandled tags are logged and skipped; the remaining updates still apply. Returns
    /// the number of tags applied.
    pub fn apply_items<'a, I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, TagValue)>,
    {
        let mut applied = 0;
        self.sender.send_modify(|snapshot| {
            for (tag, value) in items {
                match snapshot.apply(tag, value) {
                    Ok(()) => applied += 1,
                    Err(err) => warn!(tag, error = %err, "Unhandled process item"),
                }
            }
        });
        trace!(applied, "Process items updated");
        applied
    }

    /// Apply a single tag update.
    pub fn apply_item(&self, tag: &str, value: TagValue) -> Result<(), TransportError> {
        let mut result = Ok(());
        self.sender.send_if_modified(|snapshot| {
            let before = *snapshot;
            result = snapshot.apply(tag, value);
            *snapshot != before
        });
        result
    }

    /// Mutate the snapshot directly. Used by simulators that compute several fields at once.
    pub fn modify(&self, f: impl FnOnce(&mut ProcessSnapshot)) {
        self.sender.send_modify(f);
    }

    /// Replace the whole snapshot.
    pub fn replace(&self, snapshot: ProcessSnapshot) {
        self.sender.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_defaults() {
        let snapshot = ProcessSnapshot::default();
        assert_eq!(snapshot.li100, 0);
        assert_eq!(snapshot.li200, 0);
        assert_eq!(snapshot.pi300, 0);
        assert_eq!(snapshot.ti300, 0.0);
        assert_eq!(snapshot.li400, 0);
        assert!(!snapshot.upper_limit);
        assert!(!snapshot.lower_limit);
    }

    #[test]
    fn test_partial_update_leaves_other_fields() {
        let feed = SnapshotFeed::default();
        feed.apply_item(TAG_LI400, TagValue::Int(31)).unwrap();
        feed.apply_item(TAG_TI300, TagValue::Float(88.5)).unwrap();
        feed.apply_item(TAG_LI400, TagValue::Int(12)).unwrap();

        let snapshot = feed.current();
        assert_eq!(snapshot.li400, 12);
        assert_eq!(snapshot.ti300, 88.5);
        assert_eq!(snapshot.li100, 0);
        assert!(!snapshot.upper_limit);
    }

    #[test]
    fn test_numeric_kinds_are_coerced() {
        let mut snapshot = ProcessSnapshot::default();
        snapshot.apply(TAG_PI300, TagValue::Float(14.9)).unwrap();
        snapshot.apply(TAG_TI300, TagValue::Int(21)).unwrap();
        assert_eq!(snapshot.pi300, 14);
        assert_eq!(snapshot.ti300, 21.0);
    }

    #[test]
    fn test_bool_tag_rejects_numbers() {
        let mut snapshot = ProcessSnapshot::default();
        let err = snapshot
            .apply(TAG_LS_PLUS_300, TagValue::Int(1))
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }));
        assert!(!snapshot.upper_limit);
    }

    #[test]
    fn test_unknown_tag_is_skipped() {
        let feed = SnapshotFeed::default();
        let applied = feed.apply_items([
            ("FI100", TagValue::Float(3.0)),
            (TAG_LS_PLUS_300, TagValue::Bool(true)),
        ]);
        assert_eq!(applied, 1);
        assert!(feed.current().upper_limit);
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let feed = SnapshotFeed::default();
        let mut rx = feed.subscribe();
        feed.apply_item(TAG_LS_MINUS_300, TagValue::Bool(true)).unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().lower_limit);
    }

    #[test]
    fn test_subscribed_tags_are_all_handled() {
        let mut snapshot = ProcessSnapshot::default();
        for tag in SUBSCRIBED_TAGS {
            let value = match tag {
                TAG_LS_PLUS_300 | TAG_LS_MINUS_300 => TagValue::Bool(true),
                _ => TagValue::Int(1),
            };
            assert!(snapshot.apply(tag, value).is_ok(), "tag {tag} not handled");
        }
    }
}

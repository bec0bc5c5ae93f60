//! Unread counters derived from the caller's read markers.
//!
//! `lastReads` maps a stream id to the sequence number of the last post the
//! caller has read in that stream. Only streams with a marker can be unread.

use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Tracks read markers and the newest post per stream.
#[derive(Debug, Default, Clone)]
pub struct UnreadTracker {
    self_id: Option<String>,
    last_reads: Map<String, Value>,
    last_read_items: Map<String, Value>,
    latest_seq: HashMap<String, u64>,
}

impl UnreadTracker {
    /// Create a tracker for the given caller.
    #[must_use]
    pub fn new(self_id: Option<String>) -> Self {
        Self {
            self_id,
            ..Default::default()
        }
    }

    /// Set the caller's user id.
    pub fn set_self_id(&mut self, self_id: Option<String>) {
        self.self_id = self_id;
    }

    /// Take read markers from the caller's own user record.
    ///
    /// Returns `true` if `lastReads` or `lastReadItems` changed. Fields absent
    /// from the record are left as they were.
    pub fn observe_self(&mut self, me: &Value) -> bool {
        let mut changed = false;
        if let Some(last_reads) = me.get("lastReads").and_then(Value::as_object) {
            if *last_reads != self.last_reads {
                self.last_reads = last_reads.clone();
                changed = true;
            }
        }
        if let Some(items) = me.get("lastReadItems").and_then(Value::as_object) {
            if *items != self.last_read_items {
                self.last_read_items = items.clone();
                changed = true;
            }
        }
        changed
    }

    /// Record the newest sequence number per stream from a batch of posts.
    ///
    /// Posts written by the caller are ignored. Returns `true` if any stream
    /// advanced.
    pub fn observe_posts(&mut self, posts: &[&Value]) -> bool {
        let mut changed = false;
        for post in posts {
            let creator = post.get("creatorId").and_then(Value::as_str);
            if creator.is_some() && creator == self.self_id.as_deref() {
                continue;
            }
            let (Some(stream), Some(seq)) = (
                post.get("streamId").and_then(Value::as_str),
                post.get("seqNum").and_then(seq_number),
            ) else {
                continue;
            };
            let latest = self.latest_seq.entry(stream.to_string()).or_default();
            if seq > *latest {
                *latest = seq;
                changed = true;
            }
        }
        changed
    }

    /// Unread count for a stream.
    #[must_use]
    pub fn unread_count(&self, stream_id: &str) -> u64 {
        let Some(last_read) = self.last_reads.get(stream_id).and_then(seq_number) else {
            return 0;
        };
        self.latest_seq
            .get(stream_id)
            .map(|latest| latest.saturating_sub(last_read))
            .unwrap_or(0)
    }

    /// Payload for an `unreads` event.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let mut unreads = Map::new();
        let mut total = 0;
        for stream in self.last_reads.keys() {
            let count = self.unread_count(stream);
            if count > 0 {
                unreads.insert(stream.clone(), json!(count));
                total += count;
            }
        }
        json!({
            "lastReads": self.last_reads,
            "lastReadItems": self.last_read_items,
            "unreads": unreads,
            "totalUnreads": total,
        })
    }
}

/// Sequence numbers arrive as numbers or numeric strings.
fn seq_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_self_detects_changes() {
        let mut tracker = UnreadTracker::new(Some("me".into()));
        let me = json!({"id": "me", "lastReads": {"s1": 3}});
        assert!(tracker.observe_self(&me));
        assert!(!tracker.observe_self(&me));

        // A record without read markers leaves them untouched.
        assert!(!tracker.observe_self(&json!({"id": "me", "username": "x"})));

        assert!(tracker.observe_self(&json!({"lastReadItems": {"p1": 1}})));
    }

    #[test]
    fn test_unread_counts() {
        let mut tracker = UnreadTracker::new(Some("me".into()));
        tracker.observe_self(&json!({"lastReads": {"s1": 3, "s2": "10"}}));

        let posts = [
            json!({"streamId": "s1", "seqNum": 5, "creatorId": "u2"}),
            json!({"streamId": "s1", "seqNum": 7, "creatorId": "me"}),
            json!({"streamId": "s2", "seqNum": "12", "creatorId": "u3"}),
            json!({"streamId": "s3", "seqNum": 4, "creatorId": "u3"}),
        ];
        let refs: Vec<&Value> = posts.iter().collect();
        assert!(tracker.observe_posts(&refs));
        assert!(!tracker.observe_posts(&refs));

        assert_eq!(tracker.unread_count("s1"), 2);
        assert_eq!(tracker.unread_count("s2"), 2);
        assert_eq!(tracker.unread_count("s3"), 0);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot["unreads"], json!({"s1": 2, "s2": 2}));
        assert_eq!(snapshot["totalUnreads"], 4);
    }

    #[test]
    fn test_reading_clears_unreads() {
        let mut tracker = UnreadTracker::new(None);
        tracker.observe_self(&json!({"lastReads": {"s1": 1}}));
        let post = json!({"streamId": "s1", "seqNum": 4});
        tracker.observe_posts(&[&post]);
        assert_eq!(tracker.unread_count("s1"), 3);

        tracker.observe_self(&json!({"lastReads": {"s1": 4}}));
        assert_eq!(tracker.unread_count("s1"), 0);
    }
}

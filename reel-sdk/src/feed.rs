//! Receiver-side notification list with duplicate collapsing.
//!
//! The gateway never suppresses sends: the same logical notification can
//! reach a client twice — once as a live push and once more when the durable
//! list is refreshed. Consumers collapse those here: two entries with the
//! same `{kind, from_user_id}` landing within [`DEDUP_WINDOW_SECS`] seconds
//! of each other count as one.

use chrono::{DateTime, Utc};

/// Entries closer together than this (same kind and sender) collapse.
pub const DEDUP_WINDOW_SECS: i64 = 5;

#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub kind: String,
    pub message: String,
    pub from_user_id: String,
    pub metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// Deduplicating notification list, newest last.
#[derive(Debug, Default)]
pub struct NotificationFeed {
    entries: Vec<FeedEntry>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry unless it collapses into an existing one. Returns
    /// whether the entry was actually added.
    pub fn push(
        &mut self,
        kind: &str,
        message: &str,
        from_user_id: &str,
        metadata: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> bool {
        let duplicate = self.entries.iter().any(|e| {
            e.kind == kind
                && e.from_user_id == from_user_id
                && (received_at - e.received_at).num_seconds().abs() < DEDUP_WINDOW_SECS
        });
        if duplicate {
            return false;
        }
        self.entries.push(FeedEntry {
            kind: kind.to_string(),
            message: message.to_string(),
            from_user_id: from_user_id.to_string(),
            metadata,
            received_at,
        });
        true
    }

    /// Fold a durable-list refresh into the feed, collapsing entries that
    /// were already delivered as live pushes. Returns how many were new.
    pub fn merge<I>(&mut self, refreshed: I) -> usize
    where
        I: IntoIterator<Item = FeedEntry>,
    {
        refreshed
            .into_iter()
            .filter(|e| {
                self.push(
                    &e.kind,
                    &e.message,
                    &e.from_user_id,
                    e.metadata.clone(),
                    e.received_at,
                )
            })
            .count()
    }

    pub fn entries(&self) -> &[FeedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn same_kind_and_sender_within_window_collapse() {
        let mut feed = NotificationFeed::new();
        assert!(feed.push("friend_request", "a", "u-1", serde_json::Value::Null, at(0)));
        assert!(!feed.push("friend_request", "a again", "u-1", serde_json::Value::Null, at(3)));
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn outside_window_both_kept() {
        let mut feed = NotificationFeed::new();
        assert!(feed.push("friend_request", "a", "u-1", serde_json::Value::Null, at(0)));
        assert!(feed.push("friend_request", "b", "u-1", serde_json::Value::Null, at(6)));
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn different_sender_or_kind_kept() {
        let mut feed = NotificationFeed::new();
        assert!(feed.push("friend_request", "a", "u-1", serde_json::Value::Null, at(0)));
        assert!(feed.push("friend_request", "a", "u-2", serde_json::Value::Null, at(1)));
        assert!(feed.push("review_liked", "a", "u-1", serde_json::Value::Null, at(1)));
        assert_eq!(feed.len(), 3);
    }

    #[test]
    fn merge_collapses_push_then_refresh() {
        let mut feed = NotificationFeed::new();
        // Live push arrives first...
        feed.push("friend_request", "hana", "u-1", serde_json::Value::Null, at(0));
        // ...then a durable-list refresh re-delivers it plus an older entry.
        let added = feed.merge(vec![
            FeedEntry {
                kind: "friend_request".into(),
                message: "hana".into(),
                from_user_id: "u-1".into(),
                metadata: serde_json::Value::Null,
                received_at: at(2),
            },
            FeedEntry {
                kind: "review_liked".into(),
                message: "liked your review".into(),
                from_user_id: "u-9".into(),
                metadata: serde_json::Value::Null,
                received_at: at(-60),
            },
        ]);
        assert_eq!(added, 1);
        assert_eq!(feed.len(), 2);
    }
}

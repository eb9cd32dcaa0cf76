//! Live/history message reconciliation
//!
//! A chatroom's history arrives in pages over REST while new messages
//! arrive live over the broker — and a message the user just sent shows
//! up twice: once rendered optimistically, once as the broker echo. The
//! timeline merges all three sources without double-rendering.
//!
//! Ordering is deliberate: live messages append in arrival order and
//! older pages prepend, with no re-sort by timestamp. The feed does not
//! guarantee global clock ordering across pagination boundaries, so a
//! sort would shuffle entries on every page load; append/prepend keeps
//! merges O(1) per message and the view stable.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::EventEnvelope;

/// Two messages closer together than this, with the same sender and
/// content, are one user action seen twice.
pub const DUPLICATE_WINDOW_MS: i64 = 5_000;

/// A chat message as held by the consuming layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned message id
    pub id: String,

    /// Chatroom this message belongs to
    pub chatroom_id: String,

    /// Author
    pub sender_id: String,

    /// Message body
    pub content: String,

    /// Server-side creation time
    pub created_at: DateTime<Utc>,

    /// Optional attachment link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
}

impl ChatMessage {
    /// Parse a message out of a live event payload.
    pub fn from_event(envelope: &EventEnvelope) -> Result<Self, serde_json::Error> {
        serde_json::from_value(envelope.payload.clone())
    }

    /// The §duplicate rule: same id, or same sender and content within
    /// the window (an optimistic send and its broker echo).
    fn is_duplicate_of(&self, other: &ChatMessage) -> bool {
        if self.id == other.id {
            return true;
        }
        self.sender_id == other.sender_id
            && self.content == other.content
            && (self.created_at - other.created_at)
                .num_milliseconds()
                .abs()
                < DUPLICATE_WINDOW_MS
    }
}

/// An ordered message sequence fed from pagination and the live feed
#[derive(Debug, Clone, Default)]
pub struct MessageTimeline {
    messages: Vec<ChatMessage>,
    ids: HashSet<String>,
}

impl MessageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the timeline from the first (most recent) history page.
    pub fn from_history(page: Vec<ChatMessage>) -> Self {
        let mut timeline = Self::new();
        timeline.prepend_history(page);
        timeline
    }

    /// Merge one live message, in arrival order. Returns whether the
    /// message was appended (false: suppressed as a duplicate).
    pub fn merge(&mut self, incoming: ChatMessage) -> bool {
        if self.ids.contains(&incoming.id) {
            return false;
        }
        // Scan newest-first: an optimistic echo trails its original by
        // well under the window, so this exits early in practice.
        if self
            .messages
            .iter()
            .rev()
            .any(|held| held.is_duplicate_of(&incoming))
        {
            return false;
        }
        self.ids.insert(incoming.id.clone());
        self.messages.push(incoming);
        true
    }

    /// Put an older history page in front of the held sequence,
    /// preserving the page's own order. Dedup here is by id only — an
    /// optimistic echo cannot arrive via pagination. Returns how many
    /// entries were added.
    pub fn prepend_history(&mut self, page: Vec<ChatMessage>) -> usize {
        let fresh: Vec<ChatMessage> = page
            .into_iter()
            .filter(|message| !self.ids.contains(&message.id))
            .collect();
        for message in &fresh {
            self.ids.insert(message.id.clone());
        }
        let added = fresh.len();
        self.messages.splice(0..0, fresh);
        added
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(id: &str, sender: &str, content: &str, at_ms: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            chatroom_id: "room-1".to_string(),
            sender_id: sender.to_string(),
            content: content.to_string(),
            created_at: Utc.timestamp_millis_opt(at_ms).unwrap(),
            attachment_url: None,
        }
    }

    #[test]
    fn test_merge_appends_in_arrival_order() {
        let mut timeline = MessageTimeline::new();
        assert!(timeline.merge(message("m1", "s1", "first", 1_000)));
        assert!(timeline.merge(message("m2", "s2", "second", 500)));

        let ids: Vec<&str> = timeline.messages().iter().map(|m| m.id.as_str()).collect();
        // Arrival order, even though m2 has the earlier timestamp
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_merge_is_idempotent_within_window() {
        let mut timeline = MessageTimeline::new();
        assert!(timeline.merge(message("m1", "s1", "hi", 10_000)));
        assert!(!timeline.merge(message("m1", "s1", "hi", 10_000)));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_same_id_is_duplicate_regardless_of_timestamp() {
        let mut timeline = MessageTimeline::new();
        assert!(timeline.merge(message("m1", "s1", "hi", 0)));
        assert!(!timeline.merge(message("m1", "s1", "hi", 3_600_000)));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_optimistic_echo_is_suppressed() {
        let mut timeline = MessageTimeline::new();
        // Optimistic local render with a client-temporary id
        assert!(timeline.merge(message("tmp-1", "s1", "hello", 10_000)));
        // Broker echo: server id, slightly later server timestamp
        assert!(!timeline.merge(message("m77", "s1", "hello", 12_500)));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let mut timeline = MessageTimeline::new();
        assert!(timeline.merge(message("m1", "s1", "hello", 10_000)));
        // Exactly 5000ms apart: not a duplicate (strict less-than)
        assert!(timeline.merge(message("m2", "s1", "hello", 15_000)));
        // 4999ms apart: duplicate
        assert!(!timeline.merge(message("m3", "s1", "hello", 19_999)));
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn test_same_content_different_sender_is_kept() {
        let mut timeline = MessageTimeline::new();
        assert!(timeline.merge(message("m1", "s1", "ok", 10_000)));
        assert!(timeline.merge(message("m2", "s2", "ok", 10_100)));
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn test_prepend_history_keeps_page_order() {
        let mut timeline = MessageTimeline::new();
        timeline.merge(message("m10", "s1", "newest", 100_000));

        let added = timeline.prepend_history(vec![
            message("m8", "s1", "older", 80_000),
            message("m9", "s2", "old", 90_000),
        ]);
        assert_eq!(added, 2);

        let ids: Vec<&str> = timeline.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m8", "m9", "m10"]);
    }

    #[test]
    fn test_prepend_history_dedups_by_id_only() {
        let mut timeline = MessageTimeline::new();
        timeline.merge(message("m9", "s1", "live", 90_000));

        // The page carries m9 again plus a message that would trip the
        // time-window rule — pagination entries are still kept.
        let added = timeline.prepend_history(vec![
            message("m8", "s1", "live", 89_000),
            message("m9", "s1", "live", 90_000),
        ]);
        assert_eq!(added, 1);

        let ids: Vec<&str> = timeline.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m8", "m9"]);
    }

    #[test]
    fn test_from_history_then_live_merge() {
        let mut timeline = MessageTimeline::from_history(vec![
            message("m1", "s1", "hello", 10_000),
            message("m2", "s2", "hey", 20_000),
        ]);
        assert_eq!(timeline.len(), 2);

        assert!(timeline.merge(message("m3", "s1", "you there?", 30_000)));
        // Live duplicate of a historical entry
        assert!(!timeline.merge(message("m2", "s2", "hey", 20_000)));
        assert_eq!(timeline.len(), 3);
    }

    #[test]
    fn test_from_event_parses_camel_case_payload() {
        let envelope = EventEnvelope {
            channel: "private-chatroom-9".to_string(),
            event: "message.created".to_string(),
            payload: serde_json::json!({
                "id": "m1",
                "chatroomId": "room-9",
                "senderId": "agent-3",
                "content": "hello",
                "createdAt": "2025-06-01T12:00:00Z",
            }),
            received_at: Utc::now(),
        };

        let parsed = ChatMessage::from_event(&envelope).unwrap();
        assert_eq!(parsed.id, "m1");
        assert_eq!(parsed.chatroom_id, "room-9");
        assert_eq!(parsed.sender_id, "agent-3");
    }
}

//! Channel types and handler tables
//!
//! A channel is a named topic with a kind (public, private, presence),
//! an explicit table of event handlers, and — for presence channels —
//! an advisory member set. Entries are owned exclusively by the
//! registry; callers only ever see [`ChannelInfo`] snapshots.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};

use crate::error::RealtimeError;
use crate::protocol::EventEnvelope;

/// Handler invoked for one named event on one channel
pub type EventHandler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

/// Channel access classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// No authorization needed
    Public,
    /// Requires a grant from the authorization endpoint
    Private,
    /// Requires a grant and tracks advisory membership
    Presence,
}

impl ChannelKind {
    /// Whether subscribing needs a grant from the authorization endpoint
    pub fn requires_auth(&self) -> bool {
        matches!(self, ChannelKind::Private | ChannelKind::Presence)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Public => write!(f, "public"),
            ChannelKind::Private => write!(f, "private"),
            ChannelKind::Presence => write!(f, "presence"),
        }
    }
}

/// An explicit event-name -> handler table, built by the caller and
/// merged into the channel entry on subscribe.
#[derive(Clone, Default)]
pub struct EventHandlers {
    handlers: HashMap<String, EventHandler>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event name. Replaces any handler the
    /// table already held for that name.
    pub fn on(
        mut self,
        event: impl Into<String>,
        handler: impl Fn(&EventEnvelope) + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(event.into(), Arc::new(handler));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn into_map(self) -> HashMap<String, EventHandler> {
        self.handlers
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("EventHandlers").field("events", &names).finish()
    }
}

/// Read-only snapshot of a registry entry
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub name: String,
    pub kind: ChannelKind,
    pub is_subscribed: bool,
    pub subscribed_at: Option<DateTime<Utc>>,

    /// Presence member ids. Advisory for the UI only — never an
    /// authorization source.
    pub members: HashSet<String>,
}

/// Registry-internal channel state
pub(crate) struct ChannelEntry {
    pub(crate) name: String,
    pub(crate) kind: ChannelKind,
    pub(crate) handlers: HashMap<String, EventHandler>,
    pub(crate) subscribed: bool,
    pub(crate) subscribed_at: Option<DateTime<Utc>>,
    pub(crate) members: HashSet<String>,

    /// Waiter for the in-flight subscription confirmation, if any
    pub(crate) pending: Option<oneshot::Sender<Result<(), RealtimeError>>>,

    /// Serializes subscribe attempts for this channel name
    pub(crate) gate: Arc<Mutex<()>>,
}

impl ChannelEntry {
    pub(crate) fn new(name: &str, kind: ChannelKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            handlers: HashMap::new(),
            subscribed: false,
            subscribed_at: None,
            members: HashSet::new(),
            pending: None,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Merge a handler table into this entry, replacing handlers for
    /// event names both tables carry.
    pub(crate) fn merge_handlers(&mut self, handlers: EventHandlers) {
        self.handlers.extend(handlers.into_map());
    }

    pub(crate) fn snapshot(&self) -> ChannelInfo {
        ChannelInfo {
            name: self.name.clone(),
            kind: self.kind,
            is_subscribed: self.subscribed,
            subscribed_at: self.subscribed_at,
            members: self.members.clone(),
        }
    }
}

impl fmt::Debug for ChannelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("subscribed", &self.subscribed)
            .field("handlers", &self.handlers.len())
            .field("members", &self.members.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_channel_kind_auth_requirement() {
        assert!(!ChannelKind::Public.requires_auth());
        assert!(ChannelKind::Private.requires_auth());
        assert!(ChannelKind::Presence.requires_auth());
    }

    #[test]
    fn test_handlers_builder() {
        let handlers = EventHandlers::new()
            .on("message.created", |_| {})
            .on("message.deleted", |_| {});
        assert_eq!(handlers.len(), 2);
        assert!(!handlers.is_empty());
    }

    #[test]
    fn test_merge_replaces_same_event_name() {
        let hits = Arc::new(AtomicUsize::new(0));

        let mut entry = ChannelEntry::new("private-chatroom-1", ChannelKind::Private);
        entry.merge_handlers(EventHandlers::new().on("message.created", |_| {
            panic!("replaced handler must not run");
        }));

        let hits_clone = hits.clone();
        entry.merge_handlers(EventHandlers::new().on("message.created", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(entry.handlers.len(), 1);
        let envelope = EventEnvelope {
            channel: "private-chatroom-1".into(),
            event: "message.created".into(),
            payload: serde_json::Value::Null,
            received_at: Utc::now(),
        };
        entry.handlers["message.created"](&envelope);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_reflects_entry() {
        let mut entry = ChannelEntry::new("presence-room-1", ChannelKind::Presence);
        entry.subscribed = true;
        entry.subscribed_at = Some(Utc::now());
        entry.members.insert("u1".to_string());

        let info = entry.snapshot();
        assert_eq!(info.name, "presence-room-1");
        assert_eq!(info.kind, ChannelKind::Presence);
        assert!(info.is_subscribed);
        assert!(info.subscribed_at.is_some());
        assert!(info.members.contains("u1"));
    }
}

//! Local pub/sub event bus: channel subscribers, glob pattern subscribers,
//! and bounded per-channel history.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::RwLock;
use sa_domain::error::Result;
use sa_domain::event::EventMessage;
use uuid::Uuid;

const DEFAULT_HISTORY_CAPACITY: usize = 1000;

pub type Handler = Arc<dyn Fn(&EventMessage) -> Result<()> + Send + Sync>;

struct SubEntry {
    id: Uuid,
    handler: Handler,
}

struct Inner {
    channel_subs: HashMap<String, Vec<SubEntry>>,
    pattern_subs: Vec<(String, SubEntry)>,
    history: HashMap<String, VecDeque<EventMessage>>,
    history_capacity: usize,
    closed: bool,
    published: u64,
    delivered: u64,
    handler_errors: u64,
}

impl Inner {
    fn new(history_capacity: usize) -> Self {
        Inner {
            channel_subs: HashMap::new(),
            pattern_subs: Vec::new(),
            history: HashMap::new(),
            history_capacity,
            closed: false,
            published: 0,
            delivered: 0,
            handler_errors: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusStats {
    pub channels: usize,
    pub channel_subscriptions: usize,
    pub pattern_subscriptions: usize,
    pub published: u64,
    pub delivered: u64,
    pub handler_errors: u64,
    pub closed: bool,
}

/// An opaque handle returned by `subscribe`/`subscribe_pattern`. Dropping it
/// unregisters the handler; the bus is referenced weakly so a dangling
/// subscription never keeps the bus alive.
pub struct Subscription {
    id: Uuid,
    target: SubscriptionTarget,
    bus: Weak<RwLock<Inner>>,
}

enum SubscriptionTarget {
    Channel(String),
    Pattern(String),
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut inner = inner.write();
            match &self.target {
                SubscriptionTarget::Channel(channel) => {
                    if let Some(subs) = inner.channel_subs.get_mut(channel) {
                        subs.retain(|s| s.id != self.id);
                    }
                }
                SubscriptionTarget::Pattern(_) => {
                    inner.pattern_subs.retain(|(_, s)| s.id != self.id);
                }
            }
        }
    }
}

pub struct EventBus {
    inner: Arc<RwLock<Inner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        EventBus {
            inner: Arc::new(RwLock::new(Inner::new(capacity))),
        }
    }

    pub fn subscribe(&self, channel: impl Into<String>, handler: Handler) -> Subscription {
        let channel = channel.into();
        let id = Uuid::new_v4();
        {
            let mut inner = self.inner.write();
            inner
                .channel_subs
                .entry(channel.clone())
                .or_default()
                .push(SubEntry { id, handler });
        }
        Subscription {
            id,
            target: SubscriptionTarget::Channel(channel),
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscribe_pattern(&self, glob: impl Into<String>, handler: Handler) -> Subscription {
        let glob = glob.into();
        let id = Uuid::new_v4();
        {
            let mut inner = self.inner.write();
            inner.pattern_subs.push((glob.clone(), SubEntry { id, handler }));
        }
        Subscription {
            id,
            target: SubscriptionTarget::Pattern(glob),
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Publish `message` on `channel`. Delivers at-least-once to every
    /// subscriber live at call time, in registration order; a handler
    /// error is logged and does not stop delivery to the rest.
    pub fn publish(&self, channel: &str, message: EventMessage) {
        let (channel_handlers, pattern_handlers, closed) = {
            let mut inner = self.inner.write();
            if inner.closed {
                return;
            }
            inner.published += 1;

            let history = inner
                .history
                .entry(channel.to_string())
                .or_insert_with(VecDeque::new);
            history.push_back(message.clone());
            if history.len() > inner.history_capacity {
                history.pop_front();
            }

            let channel_handlers: Vec<Handler> = inner
                .channel_subs
                .get(channel)
                .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default();
            let pattern_handlers: Vec<Handler> = inner
                .pattern_subs
                .iter()
                .filter(|(glob, _)| channel_glob_match(glob, channel))
                .map(|(_, s)| s.handler.clone())
                .collect();

            (channel_handlers, pattern_handlers, false)
        };
        let _ = closed;

        for handler in channel_handlers.iter().chain(pattern_handlers.iter()) {
            let mut inner = self.inner.write();
            inner.delivered += 1;
            drop(inner);
            if let Err(err) = handler(&message) {
                tracing::warn!(channel = %channel, error = %err, "event bus handler failed");
                let mut inner = self.inner.write();
                inner.handler_errors += 1;
            }
        }
    }

    pub fn get_history(&self, channel: &str, limit: usize) -> Vec<EventMessage> {
        let inner = self.inner.read();
        match inner.history.get(channel) {
            Some(history) => {
                let start = history.len().saturating_sub(limit);
                history.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn get_stats(&self) -> BusStats {
        let inner = self.inner.read();
        BusStats {
            channels: inner.history.len(),
            channel_subscriptions: inner.channel_subs.values().map(|v| v.len()).sum(),
            pattern_subscriptions: inner.pattern_subs.len(),
            published: inner.published,
            delivered: inner.delivered,
            handler_errors: inner.handler_errors,
            closed: inner.closed,
        }
    }

    /// Release all subscriptions and drop retained history; subsequent
    /// `publish` calls become no-ops.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        inner.closed = true;
        inner.channel_subs.clear();
        inner.pattern_subs.clear();
        inner.history.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Dot-separated glob matching: `*` matches exactly one segment, `**`
/// matches zero or more segments.
fn channel_glob_match(pattern: &str, channel: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let channel: Vec<&str> = channel.split('.').collect();
    segments_match(&pattern, &channel)
}

fn segments_match(pattern: &[&str], channel: &[&str]) -> bool {
    match (pattern.first(), channel.first()) {
        (None, None) => true,
        (Some(&"**"), _) => {
            segments_match(&pattern[1..], channel)
                || (!channel.is_empty() && segments_match(pattern, &channel[1..]))
        }
        (Some(&"*"), Some(_)) => segments_match(&pattern[1..], &channel[1..]),
        (Some(p), Some(c)) if *p == *c => segments_match(&pattern[1..], &channel[1..]),
        _ => false,
    }
}

pub fn new_event(event_type: impl Into<String>, data: serde_json::Value) -> EventMessage {
    EventMessage::new(Uuid::new_v4().to_string(), event_type, data, Utc::now())
}

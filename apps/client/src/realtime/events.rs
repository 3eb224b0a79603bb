use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

pub const RESUME_PROCESSING: &str = "resume:processing";
pub const RESUME_COMPLETED: &str = "resume:completed";
pub const RESUME_ERROR: &str = "resume:error";
pub const JOBS_RECOMMENDATIONS: &str = "jobs:recommendations";
pub const JOB_UPDATED: &str = "job:updated";
pub const CHAT_MESSAGE: &str = "chat:message";
pub const INTERVIEW_SCHEDULED: &str = "interview:scheduled";
pub const INTERVIEW_REMINDER: &str = "interview:reminder";
pub const SYSTEM_NOTIFICATION: &str = "system:notification";

/// Every server-pushed event the client understands.
pub const INBOUND_EVENTS: [&str; 9] = [
    RESUME_PROCESSING,
    RESUME_COMPLETED,
    RESUME_ERROR,
    JOBS_RECOMMENDATIONS,
    JOB_UPDATED,
    CHAT_MESSAGE,
    INTERVIEW_SCHEDULED,
    INTERVIEW_REMINDER,
    SYSTEM_NOTIFICATION,
];

/// First frame on every connection; binds the socket to the signed-in user.
pub const AUTH_EVENT: &str = "auth";

/// An inbound event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub name: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

pub type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Named-event subscriber registry.
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
}

impl Subscribers {
    pub(crate) fn add(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub(crate) fn remove(&self, event: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }

    /// Calls every handler registered for the event. Handlers run outside the lock,
    /// so they may subscribe or unsubscribe themselves.
    pub(crate) fn deliver(&self, event: &ChannelEvent) -> usize {
        let matching: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.name)
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        for handler in &matching {
            handler(event);
        }
        matching.len()
    }
}

//! User-facing notifications.
//!
//! What to show for a given real-time event lives here; how to show it belongs to
//! whichever `Notifier` the view layer installs.

use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::realtime::events;

pub const RECONNECT_EXHAUSTED_MESSAGE: &str =
    "Lost connection to real-time updates. Please refresh the page.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    /// Persistent notifications stay until the user acts on them.
    pub persistent: bool,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            persistent: false,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let Notification {
            level,
            message,
            persistent,
        } = notification;
        match level {
            NotificationLevel::Info | NotificationLevel::Success => info!(persistent, "{message}"),
            NotificationLevel::Warning => warn!(persistent, "{message}"),
            NotificationLevel::Error => error!(persistent, "{message}"),
        }
    }
}

/// Buffers notifications until a view drains them.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    pending: Mutex<Vec<Notification>>,
}

impl NotificationQueue {
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Notifier for NotificationQueue {
    fn notify(&self, notification: Notification) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

/// Maps an inbound real-time event to a toast.
/// Only the allowlisted event names produce one; everything else is data-only.
pub fn for_event(name: &str, payload: &Value) -> Option<Notification> {
    let notification = match name {
        events::RESUME_PROCESSING => Notification::info("Your resume is being analyzed..."),
        events::RESUME_COMPLETED => Notification::success("Resume analysis completed!"),
        events::RESUME_ERROR => Notification::error(
            text(payload, "message").unwrap_or("Resume analysis failed. Please try again."),
        ),
        events::JOBS_RECOMMENDATIONS => Notification::info("New job recommendations are available!"),
        events::JOB_UPDATED => match text(payload, "title") {
            Some(title) => Notification::info(format!("{title} has been updated")),
            None => Notification::info("A job you're following has been updated"),
        },
        events::CHAT_MESSAGE => match text(payload, "senderName") {
            Some(sender) => Notification::info(format!("New message from {sender}")),
            None => Notification::info("You have a new message"),
        },
        events::INTERVIEW_SCHEDULED => match text(payload, "jobTitle") {
            Some(title) => Notification::success(format!("Interview scheduled for {title}")),
            None => Notification::success("A new interview has been scheduled"),
        },
        events::INTERVIEW_REMINDER => Notification::warning(
            text(payload, "message").unwrap_or("You have an upcoming interview"),
        ),
        events::SYSTEM_NOTIFICATION => {
            let message = text(payload, "message")?;
            let level = match text(payload, "type") {
                Some("success") => NotificationLevel::Success,
                Some("warning") => NotificationLevel::Warning,
                Some("error") => NotificationLevel::Error,
                _ => NotificationLevel::Info,
            };
            Notification::new(level, message)
        }
        _ => return None,
    };
    Some(notification)
}

fn text<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

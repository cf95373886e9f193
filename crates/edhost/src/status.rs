use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::locked;

#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub content: String,
    pub kind: MessageKind,
    pub created_at: Instant,
    pub auto_clear_duration: Option<Duration>,
}

impl StatusMessage {
    pub fn new(content: String, kind: MessageKind) -> Self {
        let auto_clear_duration = Self::default_duration_for_kind(&kind);
        Self {
            content,
            kind,
            created_at: Instant::now(),
            auto_clear_duration,
        }
    }

    pub fn with_duration(content: String, kind: MessageKind, duration: Duration) -> Self {
        Self {
            content,
            kind,
            created_at: Instant::now(),
            auto_clear_duration: Some(duration),
        }
    }

    pub fn permanent(content: String, kind: MessageKind) -> Self {
        Self {
            content,
            kind,
            created_at: Instant::now(),
            auto_clear_duration: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        if let Some(duration) = self.auto_clear_duration {
            self.created_at.elapsed() > duration
        } else {
            false
        }
    }

    fn default_duration_for_kind(kind: &MessageKind) -> Option<Duration> {
        match kind {
            MessageKind::Info => Some(Duration::from_secs(3)),
            MessageKind::Success => Some(Duration::from_secs(2)),
            MessageKind::Warning => Some(Duration::from_secs(5)),
            MessageKind::Error => Some(Duration::from_secs(7)),
        }
    }
}

/// User-facing message presentation.
///
/// `show_error` is the blocking-dialog equivalent and must stay visible
/// until the user acknowledges it; `status_message` is a transient
/// status-line notice.
pub trait StatusSink: Send + Sync {
    fn show_error(&self, message: &str);
    fn status_message(&self, message: &str);
}

/// Status sink that queues messages for a host to render.
///
/// Errors are queued as permanent messages, status notices expire on their
/// own; `update` drops expired ones the way a status line would.
#[derive(Default)]
pub struct QueuedStatus {
    messages: Mutex<VecDeque<StatusMessage>>,
}

impl QueuedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: StatusMessage) {
        locked(&self.messages).push_back(message);
    }

    /// Messages still alive, oldest first.
    pub fn pending(&self) -> Vec<StatusMessage> {
        self.update();
        locked(&self.messages).iter().cloned().collect()
    }

    /// Removes and returns every queued message, as a host does once it
    /// has rendered them.
    pub fn take(&self) -> Vec<StatusMessage> {
        locked(&self.messages).drain(..).collect()
    }

    /// Drops expired messages.
    pub fn update(&self) {
        locked(&self.messages).retain(|message| !message.is_expired());
    }
}

impl StatusSink for QueuedStatus {
    fn show_error(&self, message: &str) {
        self.push(StatusMessage::permanent(
            message.to_string(),
            MessageKind::Error,
        ));
    }

    fn status_message(&self, message: &str) {
        self.push(StatusMessage::new(message.to_string(), MessageKind::Info));
    }
}

/// Status sink for terminal use: errors to stderr, notices to stdout.
#[derive(Default, Clone, Copy)]
pub struct ConsoleStatus;

impl ConsoleStatus {
    pub fn new() -> Self {
        Self
    }
}

impl StatusSink for ConsoleStatus {
    fn show_error(&self, message: &str) {
        eprintln!("エラー: {}", message);
    }

    fn status_message(&self, message: &str) {
        println!("{}", message);
    }
}

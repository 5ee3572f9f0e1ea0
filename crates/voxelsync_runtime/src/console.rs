//! The in-session message log.
//!
//! Background failures (saves, disconnects) land here instead of
//! interrupting the simulation.

use std::collections::VecDeque;
use std::fmt;

use log::{error, info, warn};

/// Severity of a logged message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Routine information.
    Notification,
    /// Something went wrong but the session continues.
    Warning,
    /// Something failed.
    Error,
}

/// One line of the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Severity.
    pub kind: MessageKind,
    /// Text.
    pub text: String,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageKind::Notification => write!(f, "{}", self.text),
            MessageKind::Warning => write!(f, "warning: {}", self.text),
            MessageKind::Error => write!(f, "error: {}", self.text),
        }
    }
}

/// Bounded log of session messages. Oldest entries are dropped first.
#[derive(Debug)]
pub struct MessageLog {
    entries: VecDeque<Message>,
    capacity: usize,
    disposed: bool,
}

impl MessageLog {
    /// Default number of retained messages.
    pub const DEFAULT_CAPACITY: usize = 200;

    /// Creates a log holding at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            disposed: false,
        }
    }

    /// Appends a message. Ignored after [`Self::dispose`].
    pub fn push(&mut self, kind: MessageKind, text: impl Into<String>) {
        if self.disposed {
            return;
        }
        let text = text.into();
        match kind {
            MessageKind::Notification => info!("{text}"),
            MessageKind::Warning => warn!("{text}"),
            MessageKind::Error => error!("{text}"),
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Message { kind, text });
    }

    /// Messages, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    /// Number of retained messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clears the log and stops accepting messages.
    pub fn dispose(&mut self) {
        self.entries.clear();
        self.disposed = true;
    }

    /// Returns true after [`Self::dispose`].
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

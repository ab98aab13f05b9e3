//! Message Queues
//!
//! Two independent FIFO queues feed messages into a running agent:
//! - Steering: drained before the next provider round-trip of the current run
//! - Follow-up: drained at run start and when a run would otherwise end
//!
//! Both queues live behind one mutex so enqueue and dequeue are atomic with
//! respect to each other. No ordering is guaranteed between the two queues.

use pi_ai::Message;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// How many queued messages one drain takes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueMode {
    /// Take the oldest message only
    #[default]
    OneAtATime,
    /// Take every queued message
    All,
}

/// Which queue an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Mid-run injection
    Steering,
    /// Run-boundary injection
    FollowUp,
}

impl QueueKind {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Steering => "steering",
            Self::FollowUp => "follow_up",
        }
    }
}

#[derive(Debug, Default)]
struct Queues {
    steering: VecDeque<Message>,
    follow_up: VecDeque<Message>,
    steering_mode: QueueMode,
    follow_up_mode: QueueMode,
}

impl Queues {
    fn queue(&mut self, kind: QueueKind) -> &mut VecDeque<Message> {
        match kind {
            QueueKind::Steering => &mut self.steering,
            QueueKind::FollowUp => &mut self.follow_up,
        }
    }
}

/// Steering and follow-up queues with per-queue drain modes
#[derive(Debug, Default)]
pub struct QueueManager {
    inner: Mutex<Queues>,
}

impl QueueManager {
    /// Create empty queues, both in one-at-a-time mode
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty queues with the given modes
    #[must_use]
    pub fn with_modes(steering: QueueMode, follow_up: QueueMode) -> Self {
        let manager = Self::new();
        manager.set_mode(QueueKind::Steering, steering);
        manager.set_mode(QueueKind::FollowUp, follow_up);
        manager
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a message to a queue
    pub fn enqueue(&self, kind: QueueKind, message: Message) {
        let mut queues = self.lock();
        let queue = queues.queue(kind);
        queue.push_back(message);
        debug!(queue = kind.as_str(), pending = queue.len(), "Message queued");
    }

    /// Remove and return the oldest messages.
    ///
    /// Takes one message under [`QueueMode::OneAtATime`] and the whole queue
    /// under [`QueueMode::All`]. Returns an empty vector when nothing is queued.
    pub fn dequeue(&self, kind: QueueKind, mode: QueueMode) -> Vec<Message> {
        let mut queues = self.lock();
        let queue = queues.queue(kind);
        let taken: Vec<Message> = match mode {
            QueueMode::OneAtATime => queue.pop_front().into_iter().collect(),
            QueueMode::All => queue.drain(..).collect(),
        };
        if !taken.is_empty() {
            debug!(
                queue = kind.as_str(),
                taken = taken.len(),
                remaining = queue.len(),
                "Queue drained"
            );
        }
        taken
    }

    /// Dequeue using the queue's configured mode
    pub fn drain(&self, kind: QueueKind) -> Vec<Message> {
        let mode = self.mode(kind);
        self.dequeue(kind, mode)
    }

    /// Set the drain mode of a queue
    pub fn set_mode(&self, kind: QueueKind, mode: QueueMode) {
        let mut queues = self.lock();
        match kind {
            QueueKind::Steering => queues.steering_mode = mode,
            QueueKind::FollowUp => queues.follow_up_mode = mode,
        }
    }

    /// Drain mode of a queue
    #[must_use]
    pub fn mode(&self, kind: QueueKind) -> QueueMode {
        let queues = self.lock();
        match kind {
            QueueKind::Steering => queues.steering_mode,
            QueueKind::FollowUp => queues.follow_up_mode,
        }
    }

    /// Discard everything in one queue
    pub fn clear(&self, kind: QueueKind) {
        self.lock().queue(kind).clear();
    }

    /// Discard everything in both queues
    pub fn clear_all(&self) {
        let mut queues = self.lock();
        queues.steering.clear();
        queues.follow_up.clear();
    }

    /// Whether either queue holds messages
    #[must_use]
    pub fn has_pending(&self) -> bool {
        let queues = self.lock();
        !queues.steering.is_empty() || !queues.follow_up.is_empty()
    }

    /// Whether one queue holds messages
    #[must_use]
    pub fn has_pending_in(&self, kind: QueueKind) -> bool {
        !self.lock().queue(kind).is_empty()
    }

    /// Number of messages in one queue
    #[must_use]
    pub fn len(&self, kind: QueueKind) -> usize {
        self.lock().queue(kind).len()
    }
}

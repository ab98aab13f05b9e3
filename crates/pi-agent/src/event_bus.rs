//! EventBus - fan-out of agent events across runs
//!
//! A run's [`AgentEventStream`](crate::AgentEventStream) ends with the run.
//! The bus outlives runs, so listeners attached to an [`Agent`](crate::Agent)
//! keep receiving events from every subsequent prompt.
//!
//! Each subscriber owns an unbounded queue. A slow subscriber only delays
//! itself: it never loses events and never blocks the publisher.

use crate::event::AgentEvent;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Event bus delivering every published event to every live subscriber
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<AgentEvent>>>>,
}

impl EventBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<AgentEvent>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to all future events.
    ///
    /// The subscription ends once every handle to the bus is gone.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push(tx);
        EventSubscription { rx }
    }

    /// Publish an event to all active subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: AgentEvent) -> usize {
        let mut subscribers = self.subscribers();
        // Dropped subscriptions are pruned here
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Get the current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

/// Receiving half of a bus subscription, in publish order
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<AgentEvent>,
}

impl EventSubscription {
    /// Wait for the next event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued
    pub fn try_recv(&mut self) -> Result<AgentEvent, TryRecvError> {
        self.rx.try_recv()
    }
}

impl Stream for EventSubscription {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

//! EventStream - Multi-subscriber push stream with a single terminal result
//!
//! Producers `push` events and finish with exactly one `end(result)`.
//! Every subscriber owns an unbounded channel, so the producer never waits
//! on a listener and a slow listener only delays itself.
//!
//! A primary subscription is registered at construction. [`EventStream::events`]
//! hands it out once, so a consumer that starts iterating after the producer
//! has already pushed still observes every event.

use crate::error::{Error, Result};
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};

/// Item observed by a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<T, R> {
    /// A pushed event
    Event(T),
    /// The terminal result, delivered once as the last item
    End(R),
}

struct State<T, R> {
    subscribers: Vec<(u64, mpsc::UnboundedSender<StreamItem<T, R>>)>,
    next_id: u64,
    primary: Option<Subscription<T, R>>,
    closed: bool,
}

struct Inner<T, R> {
    state: Mutex<State<T, R>>,
    result: watch::Sender<Option<R>>,
}

impl<T, R> Inner<T, R> {
    fn lock(&self) -> MutexGuard<'_, State<T, R>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Push-based event stream with exactly one terminal result
pub struct EventStream<T, R> {
    inner: Arc<Inner<T, R>>,
}

impl<T, R> Clone for EventStream<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, R> std::fmt::Debug for EventStream<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("EventStream")
            .field("subscribers", &state.subscribers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T: Clone, R: Clone> Default for EventStream<T, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone, R: Clone> EventStream<T, R> {
    /// Create an open stream
    #[must_use]
    pub fn new() -> Self {
        let (result, _) = watch::channel(None);
        let stream = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    subscribers: Vec::new(),
                    next_id: 0,
                    primary: None,
                    closed: false,
                }),
                result,
            }),
        };
        let primary = stream.subscribe();
        stream.inner.lock().primary = Some(primary);
        stream
    }

    /// Deliver `event` to every live subscriber.
    ///
    /// Fails with [`Error::StreamClosed`] once the stream has ended.
    pub fn push(&self, event: T) -> Result<()> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(Error::StreamClosed);
        }
        state
            .subscribers
            .retain(|(_, tx)| tx.send(StreamItem::Event(event.clone())).is_ok());
        Ok(())
    }

    /// Store the terminal result and deliver it to every live subscriber.
    ///
    /// Only the first call succeeds.
    pub fn end(&self, result: R) -> Result<()> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(Error::StreamClosed);
        }
        state.closed = true;
        for (_, tx) in state.subscribers.drain(..) {
            let _ = tx.send(StreamItem::End(result.clone()));
        }
        self.inner.result.send_replace(Some(result));
        Ok(())
    }

    /// Register a listener for all future events.
    ///
    /// After the stream has ended the subscription yields only the stored
    /// terminal result.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T, R> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;

        if state.closed {
            if let Some(result) = self.inner.result.borrow().clone() {
                let _ = tx.send(StreamItem::End(result));
            }
        } else {
            state.subscribers.push((id, tx));
        }

        Subscription {
            id,
            rx,
            stream: Arc::downgrade(&self.inner),
        }
    }

    /// Consume the stream as a sequence.
    ///
    /// The first call returns the primary subscription with every event
    /// pushed since construction. Later calls behave like [`subscribe`](Self::subscribe).
    #[must_use]
    pub fn events(&self) -> Subscription<T, R> {
        let primary = self.inner.lock().primary.take();
        match primary {
            Some(primary) => primary,
            None => self.subscribe(),
        }
    }

    /// Wait for the terminal result
    pub async fn result(&self) -> Result<R> {
        let mut rx = self.inner.result.subscribe();
        let value = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::StreamClosed)?;
        (*value).clone().ok_or(Error::StreamClosed)
    }

    /// Whether `end` has been called
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of live subscribers, the unclaimed primary included
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// A listener's view of an [`EventStream`].
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T, R> {
    id: u64,
    rx: mpsc::UnboundedReceiver<StreamItem<T, R>>,
    stream: Weak<Inner<T, R>>,
}

impl<T, R> Subscription<T, R> {
    /// Wait for the next item. Returns `None` after the terminal result.
    pub async fn next(&mut self) -> Option<StreamItem<T, R>> {
        self.rx.recv().await
    }

    /// Take the next item if one is already buffered
    pub fn try_next(&mut self) -> Option<StreamItem<T, R>> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving events
    pub fn unsubscribe(self) {}
}

impl<T, R> Drop for Subscription<T, R> {
    fn drop(&mut self) {
        if let Some(inner) = self.stream.upgrade() {
            inner.lock().subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl<T, R> Stream for Subscription<T, R> {
    type Item = StreamItem<T, R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T, R> std::fmt::Debug for Subscription<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

//! Command channel contract and event fan-out
//!
//! A channel sends one command and yields one reply, in whatever order the
//! target answers. Events are delivered in order per event name, either to a
//! single-shot `once` subscriber or to an ongoing `on` stream.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// Connection to an inspectable target
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Send a command and wait for its reply
    async fn send(&self, method: &str, params: Value) -> Result<Value>;

    /// Receive the next occurrence of `event`
    fn once(&self, event: &str) -> EventOnce;

    /// Receive every occurrence of `event` from now on
    fn on(&self, event: &str) -> EventStream;
}

/// Single-shot event subscription
///
/// Resolves with the next payload, or fails with `EventStreamClosed` if the
/// channel shuts down first.
#[derive(Debug)]
pub struct EventOnce {
    event: String,
    rx: oneshot::Receiver<Value>,
}

impl EventOnce {
    /// Name of the subscribed event
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl Future for EventOnce {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(payload)) => Poll::Ready(Ok(payload)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::EventStreamClosed(this.event.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Ongoing event subscription
#[derive(Debug)]
pub struct EventStream {
    event: String,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl EventStream {
    /// Name of the subscribed event
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Receive the next payload, `None` once the channel shuts down
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Receive a payload that is already buffered
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}

enum Subscriber {
    Once(oneshot::Sender<Value>),
    On(mpsc::UnboundedSender<Value>),
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<String, Vec<Subscriber>>,
    closed: bool,
}

/// Per-event fan-out used by channel implementations
#[derive(Default)]
pub struct EventHub {
    state: Mutex<HubState>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single-shot subscriber
    pub fn once(&self, event: &str) -> EventOnce {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        // Dropping the sender fails the subscription right away
        if !state.closed {
            state
                .subscribers
                .entry(event.to_string())
                .or_default()
                .push(Subscriber::Once(tx));
        }
        EventOnce {
            event: event.to_string(),
            rx,
        }
    }

    /// Register an ongoing subscriber
    pub fn on(&self, event: &str) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if !state.closed {
            state
                .subscribers
                .entry(event.to_string())
                .or_default()
                .push(Subscriber::On(tx));
        }
        EventStream {
            event: event.to_string(),
            rx,
        }
    }

    /// Deliver an event to its subscribers, returns how many received it
    ///
    /// `once` subscribers are consumed; `on` subscribers whose stream was
    /// dropped are pruned.
    pub fn dispatch(&self, event: &str, params: &Value) -> usize {
        let mut state = self.state.lock();
        let Some(subscribers) = state.subscribers.remove(event) else {
            tracing::trace!("No subscribers for {}", event);
            return 0;
        };

        let mut delivered = 0;
        let mut retained = Vec::with_capacity(subscribers.len());
        for subscriber in subscribers {
            match subscriber {
                Subscriber::Once(tx) => {
                    if tx.send(params.clone()).is_ok() {
                        delivered += 1;
                    }
                }
                Subscriber::On(tx) => {
                    if tx.send(params.clone()).is_ok() {
                        delivered += 1;
                        retained.push(Subscriber::On(tx));
                    }
                }
            }
        }

        if !retained.is_empty() {
            state.subscribers.insert(event.to_string(), retained);
        }

        tracing::trace!("Delivered {} to {} subscriber(s)", event, delivered);
        delivered
    }

    /// Number of live subscribers for an event
    pub fn subscriber_count(&self, event: &str) -> usize {
        let state = self.state.lock();
        state.subscribers.get(event).map_or(0, |subscribers| {
            subscribers
                .iter()
                .filter(|s| match s {
                    Subscriber::Once(tx) => !tx.is_closed(),
                    Subscriber::On(tx) => !tx.is_closed(),
                })
                .count()
        })
    }

    /// Shut down: pending `once` subscribers fail, `on` streams end
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

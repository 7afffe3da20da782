//! In-process transport for tests and demos.

use crate::error::{Result, WakeError};
use crate::transport::{Transport, TransportEvent, topic_matches};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

#[derive(Debug, Default)]
struct BusState {
    connected: bool,
    subscriptions: Vec<String>,
    subscribe_calls: usize,
    published: Vec<(String, Vec<u8>)>,
}

/// Transport end handed to the service.
///
/// Messages are only delivered if they match a current subscription, like
/// a broker would. Publishing while disconnected fails.
pub struct MemoryTransport {
    events: UnboundedReceiver<TransportEvent>,
    state: Arc<Mutex<BusState>>,
}

/// Test end: drives connection events and inspects what was published.
///
/// The transport reports end of stream once every `MemoryBus` clone is
/// dropped.
#[derive(Clone)]
pub struct MemoryBus {
    events: UnboundedSender<TransportEvent>,
    state: Arc<Mutex<BusState>>,
}

impl MemoryTransport {
    pub fn new() -> (MemoryTransport, MemoryBus) {
        let (tx, rx) = unbounded_channel();
        let state = Arc::new(Mutex::new(BusState::default()));
        (
            MemoryTransport {
                events: rx,
                state: Arc::clone(&state),
            },
            MemoryBus { events: tx, state },
        )
    }
}

fn lock(state: &Mutex<BusState>) -> MutexGuard<'_, BusState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        let mut state = lock(&self.state);
        for topic in topics {
            if !state.subscriptions.contains(topic) {
                state.subscriptions.push(topic.clone());
            }
        }
        state.subscribe_calls += 1;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(WakeError::TransportDisconnected {
                message: format!("cannot publish on {}", topic),
            });
        }
        state.published.push((topic.to_string(), payload));
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            let event = self.events.recv().await?;
            if self.deliver(&event) {
                return Some(event);
            }
        }
    }
}

impl MemoryTransport {
    /// Updates the connection flag; drops messages nobody subscribed to.
    fn deliver(&self, event: &TransportEvent) -> bool {
        let mut state = lock(&self.state);
        match event {
            TransportEvent::Connected => state.connected = true,
            TransportEvent::Disconnected { .. } => state.connected = false,
            TransportEvent::Message { topic, .. } => {
                return state.connected
                    && state
                        .subscriptions
                        .iter()
                        .any(|filter| topic_matches(filter, topic));
            }
        }
        true
    }
}

impl MemoryBus {
    pub fn connect(&self) {
        self.events.send(TransportEvent::Connected).ok();
    }

    pub fn disconnect(&self, reason: &str) {
        self.events
            .send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            })
            .ok();
    }

    /// Delivers a message as if a peer had published it.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.events
            .send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.into(),
            })
            .ok();
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state).subscriptions.clone()
    }

    /// How many times the service has (re)subscribed.
    pub fn subscribe_calls(&self) -> usize {
        lock(&self.state).subscribe_calls
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.state).published.clone()
    }

    /// Topics published so far, in order.
    pub fn published_topics(&self) -> Vec<String> {
        lock(&self.state)
            .published
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Polls until at least `count` messages were published or `timeout`
    /// elapses. Returns whether the count was reached.
    pub async fn wait_for_published(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if lock(&self.state).published.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Polls until `predicate` holds or `timeout` elapses.
    pub async fn wait_until(&self, timeout: Duration, predicate: impl Fn(&MemoryBus) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

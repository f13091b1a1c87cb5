//! Change notification boundary.
//!
//! Every committed mutation emits exactly one [`ChangeEvent`] to the
//! configured [`ChangeNotifier`], after the store lock is released. The
//! legacy system wired this through globally registered save/delete hooks
//! that had to be disconnected around bulk writes; here emission is an
//! explicit call in the commit path and bulk paths pass
//! [`Notify::Suppress`] instead.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Entity kind named in an event, mirroring the stored record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    AttribType,
    Schema,
    Graph,
    Vertex,
    Transaction,
    GraphAttribute,
    VertexAttribute,
    TransactionAttribute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    Created,
    Updated,
    Deleted,
}

/// One committed mutation: entity kind, parent graph (where applicable),
/// the affected row id, and for attribute-row events the attribute row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub op: ChangeOp,
    pub graph_id: Option<u64>,
    pub id: u64,
    pub attribute_id: Option<u64>,
}

/// Whether a write path delivers its per-row events or defers to a coarser
/// summary event emitted by the enclosing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notify {
    Deliver,
    Suppress,
}

/// Sink for committed-mutation events.
///
/// The store guarantees at-least-one emission attempt per committed mutation,
/// after commit; implementations must not assume delivery can roll a write
/// back, and must be cheap enough to call inline (spawn internally if not).
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, event: &ChangeEvent);
}

/// Default sink: drops every event.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl ChangeNotifier for NullNotifier {
    fn notify(&self, _event: &ChangeEvent) {}
}

/// Test double that records every event in order.
#[derive(Debug, Default)]
pub struct BufferingNotifier {
    events: Mutex<Vec<ChangeEvent>>,
}

impl BufferingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl ChangeNotifier for BufferingNotifier {
    fn notify(&self, event: &ChangeEvent) {
        self.events.lock().push(event.clone());
    }
}

/// A fallible downstream transport (broker exchange, websocket fan-out).
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &ChangeEvent) -> Result<(), String>;
}

/// Wraps a fallible [`EventSink`] with capped exponential backoff.
///
/// Delivery failure never propagates to the write path; after the attempt
/// budget is exhausted the event is dropped with a warning.
pub struct RetryingNotifier<S> {
    sink: S,
    max_attempts: u32,
    initial_delay: Duration,
}

impl<S: EventSink> RetryingNotifier<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
        }
    }

    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl<S: EventSink> ChangeNotifier for RetryingNotifier<S> {
    fn notify(&self, event: &ChangeEvent) {
        let mut delay = self.initial_delay;
        for attempt in 1..=self.max_attempts {
            match self.sink.publish(event) {
                Ok(()) => return,
                Err(err) if attempt == self.max_attempts => {
                    tracing::warn!(
                        ?event,
                        attempts = attempt,
                        error = %err,
                        "dropping change event after exhausting delivery retries"
                    );
                }
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "event delivery failed, backing off");
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }
}

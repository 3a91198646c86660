//! In-memory event source.
//!
//! Mirrors consumer-group semantics closely enough for tests: polled records
//! stay pending until acknowledged, and pending records idle for
//! `redeliver_after` are handed out again.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mpipe_models::{DeliveryHandle, FileEvent};

use crate::error::{QueueError, QueueResult};
use crate::source::{EventSource, StreamRecord};

const STREAM: &str = "memory";

/// A record routed to the dead-letter stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub original_id: String,
    pub payload: Vec<u8>,
    pub error: String,
}

#[derive(Debug)]
struct Pending {
    record: StreamRecord,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    ready: VecDeque<StreamRecord>,
    pending: BTreeMap<String, Pending>,
    acked: Vec<String>,
    dead: Vec<DeadLetter>,
    attempts: HashMap<String, u32>,
    deliveries: HashMap<String, u32>,
}

#[derive(Debug, Clone)]
pub struct MemorySource {
    state: Arc<Mutex<MemoryState>>,
    redeliver_after: Duration,
    idle_wait: Duration,
    max_delivery_attempts: u32,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl MemorySource {
    /// Pending records idle for `redeliver_after` are delivered again.
    pub fn new(redeliver_after: Duration) -> Self {
        Self {
            state: Arc::default(),
            redeliver_after,
            idle_wait: Duration::from_millis(5),
            max_delivery_attempts: 3,
        }
    }

    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a raw record; returns its ID.
    pub fn push(&self, payload: impl Into<Vec<u8>>, headers: HashMap<String, String>) -> String {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("{}-0", state.next_id);
        state.ready.push_back(StreamRecord {
            delivery: DeliveryHandle::new(STREAM, &id),
            payload: Some(payload.into()),
            headers,
        });
        id
    }

    /// Append a well-formed notification for `event`.
    pub fn push_event(&self, event: &FileEvent) -> String {
        let payload = event.to_payload().unwrap_or_default();
        self.push(payload, HashMap::new())
    }

    /// IDs acknowledged so far, in order. Includes dead-lettered records.
    pub fn acked(&self) -> Vec<String> {
        self.state().acked.clone()
    }

    pub fn ack_count(&self, id: &str) -> usize {
        self.state().acked.iter().filter(|a| a.as_str() == id).count()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state().dead.clone()
    }

    /// IDs delivered but not yet acknowledged.
    pub fn pending_ids(&self) -> Vec<String> {
        self.state().pending.keys().cloned().collect()
    }

    /// Times a record has been handed out.
    pub fn delivery_count(&self, id: &str) -> u32 {
        self.state().deliveries.get(id).copied().unwrap_or(0)
    }

    /// Nothing ready and nothing pending.
    pub fn is_drained(&self) -> bool {
        let state = self.state();
        state.ready.is_empty() && state.pending.is_empty()
    }

    fn take_batch(&self) -> Vec<StreamRecord> {
        let mut state = self.state();
        let now = Instant::now();
        let mut batch = Vec::new();

        for pending in state.pending.values_mut() {
            if now.duration_since(pending.delivered_at) >= self.redeliver_after {
                pending.delivered_at = now;
                batch.push(pending.record.clone());
            }
        }

        while let Some(record) = state.ready.pop_front() {
            state.pending.insert(
                record.delivery.message_id.clone(),
                Pending {
                    record: record.clone(),
                    delivered_at: now,
                },
            );
            batch.push(record);
        }

        for record in &batch {
            *state
                .deliveries
                .entry(record.delivery.message_id.clone())
                .or_default() += 1;
        }
        batch
    }
}

#[async_trait]
impl EventSource for MemorySource {
    async fn poll(&self) -> QueueResult<Vec<StreamRecord>> {
        let batch = self.take_batch();
        if batch.is_empty() {
            tokio::time::sleep(self.idle_wait).await;
        }
        Ok(batch)
    }

    async fn ack(&self, delivery: &DeliveryHandle) -> QueueResult<()> {
        let mut state = self.state();
        if state.pending.remove(&delivery.message_id).is_none() {
            return Err(QueueError::unknown_delivery(delivery.to_string()));
        }
        state.attempts.remove(&delivery.message_id);
        state.acked.push(delivery.message_id.clone());
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &DeliveryHandle,
        payload: &[u8],
        error: &str,
    ) -> QueueResult<()> {
        self.state().dead.push(DeadLetter {
            original_id: delivery.message_id.clone(),
            payload: payload.to_vec(),
            error: error.to_string(),
        });
        self.ack(delivery).await
    }

    async fn keep_alive(&self, deliveries: &[DeliveryHandle]) -> QueueResult<()> {
        let mut state = self.state();
        let now = Instant::now();
        for delivery in deliveries {
            if let Some(pending) = state.pending.get_mut(&delivery.message_id) {
                pending.delivered_at = now;
            }
        }
        Ok(())
    }

    async fn record_failure(&self, delivery: &DeliveryHandle) -> QueueResult<u32> {
        let mut state = self.state();
        let count = state
            .attempts
            .entry(delivery.message_id.clone())
            .or_default();
        *count += 1;
        Ok(*count)
    }

    fn max_delivery_attempts(&self) -> u32 {
        self.max_delivery_attempts
    }
}

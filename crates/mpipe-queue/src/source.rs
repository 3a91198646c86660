//! Event source seam.

use std::collections::HashMap;

use async_trait::async_trait;
use mpipe_models::{DeliveryHandle, EventError, FileEvent};

use crate::error::QueueResult;

/// Stream entry field holding the JSON body.
pub const PAYLOAD_FIELD: &str = "payload";

/// One raw record as delivered by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub delivery: DeliveryHandle,
    /// `None` when the entry has no payload field
    pub payload: Option<Vec<u8>>,
    /// Every other entry field
    pub headers: HashMap<String, String>,
}

impl StreamRecord {
    /// Decode into a [`FileEvent`] carrying this record's handle and trace.
    pub fn decode(&self) -> Result<FileEvent, EventError> {
        FileEvent::from_record(
            self.payload.as_deref().unwrap_or_default(),
            &self.headers,
            self.delivery.clone(),
        )
    }
}

/// A partitioned, consumer-group stream of upload notifications.
///
/// Delivery is at-least-once: anything not acknowledged is eventually handed
/// out again by [`EventSource::poll`].
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Next batch: idle unacknowledged records due for redelivery, then new
    /// ones. May block for a bounded time and return an empty batch.
    async fn poll(&self) -> QueueResult<Vec<StreamRecord>>;

    /// Mark a record consumed; it will not be delivered again.
    async fn ack(&self, delivery: &DeliveryHandle) -> QueueResult<()>;

    /// Copy a record to the dead-letter stream with the reason, then
    /// acknowledge the original.
    async fn dead_letter(
        &self,
        delivery: &DeliveryHandle,
        payload: &[u8],
        error: &str,
    ) -> QueueResult<()>;

    /// Reset the idle time of records still being worked on so they are not
    /// reclaimed for redelivery.
    async fn keep_alive(&self, deliveries: &[DeliveryHandle]) -> QueueResult<()>;

    /// Count one failed attempt for a record; returns the new total.
    async fn record_failure(&self, delivery: &DeliveryHandle) -> QueueResult<u32>;

    /// Attempts after which a failing record is dead-lettered.
    fn max_delivery_attempts(&self) -> u32;
}

//! Deliveries currently owned by this process.
//!
//! The gate inserts a delivery when it enqueues the record and the worker
//! removes it once the file reaches an outcome. Redeliveries of a record in
//! the set are not enqueued again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mpipe_models::DeliveryHandle;

#[derive(Debug, Clone, Default)]
pub struct InFlight {
    deliveries: Arc<Mutex<HashSet<DeliveryHandle>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn deliveries(&self) -> MutexGuard<'_, HashSet<DeliveryHandle>> {
        self.deliveries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false if the delivery was already in flight.
    pub fn insert(&self, delivery: &DeliveryHandle) -> bool {
        self.deliveries().insert(delivery.clone())
    }

    pub fn remove(&self, delivery: &DeliveryHandle) {
        self.deliveries().remove(delivery);
    }

    pub fn contains(&self, delivery: &DeliveryHandle) -> bool {
        self.deliveries().contains(delivery)
    }

    pub fn snapshot(&self) -> Vec<DeliveryHandle> {
        self.deliveries().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.deliveries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries().is_empty()
    }
}

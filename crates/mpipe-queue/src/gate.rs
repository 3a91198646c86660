//! Ingestion gate: stream records in, bounded work queue out.
//!
//! The gate never waits for queue capacity. A record that does not fit is
//! left unacknowledged and comes back through redelivery, so the stream
//! consumer keeps polling no matter how far behind the workers are.
//!
//! Records already in flight are never enqueued twice, and their idle time in
//! the stream is refreshed periodically so a long transcode is not reclaimed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, Counter};
use mpipe_models::FileEvent;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::inflight::InFlight;
use crate::source::{EventSource, StreamRecord};

/// Wait before polling again after a source error.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Default period between idle-time refreshes of in-flight records.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// What the gate did with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Handed to the work queue
    Enqueued,
    /// Queue full; left unacknowledged for redelivery
    Dropped,
    /// Could not be decoded; acknowledged and discarded
    Malformed,
    /// Redelivery of a record still queued or being processed; ignored
    InFlight,
}

impl Admission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Admission::Enqueued => "enqueued",
            Admission::Dropped => "dropped",
            Admission::Malformed => "malformed",
            Admission::InFlight => "in_flight",
        }
    }
}

/// Handles for `mpipe_events_admitted_total{outcome}`.
#[derive(Clone)]
pub struct GateMetrics {
    enqueued: Counter,
    dropped: Counter,
    malformed: Counter,
    in_flight: Counter,
}

impl GateMetrics {
    pub const ADMITTED_TOTAL: &'static str = "mpipe_events_admitted_total";

    /// Handles that record nothing.
    pub fn noop() -> Self {
        Self {
            enqueued: Counter::noop(),
            dropped: Counter::noop(),
            malformed: Counter::noop(),
            in_flight: Counter::noop(),
        }
    }

    /// Register the series with the installed recorder.
    pub fn register() -> Self {
        let series = |outcome: Admission| counter!(Self::ADMITTED_TOTAL, "outcome" => outcome.as_str());
        Self {
            enqueued: series(Admission::Enqueued),
            dropped: series(Admission::Dropped),
            malformed: series(Admission::Malformed),
            in_flight: series(Admission::InFlight),
        }
    }

    fn record(&self, admission: Admission) {
        match admission {
            Admission::Enqueued => self.enqueued.increment(1),
            Admission::Dropped => self.dropped.increment(1),
            Admission::Malformed => self.malformed.increment(1),
            Admission::InFlight => self.in_flight.increment(1),
        }
    }
}

/// Totals reported when the gate stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub in_flight: u64,
}

impl GateStats {
    fn count(&mut self, admission: Admission) {
        match admission {
            Admission::Enqueued => self.enqueued += 1,
            Admission::Dropped => self.dropped += 1,
            Admission::Malformed => self.malformed += 1,
            Admission::InFlight => self.in_flight += 1,
        }
    }
}

/// Single producer of the work queue.
pub struct IngestionGate {
    source: Arc<dyn EventSource>,
    sender: mpsc::Sender<FileEvent>,
    shutdown: watch::Receiver<bool>,
    metrics: GateMetrics,
    in_flight: Option<InFlight>,
    keep_alive_interval: Duration,
}

impl IngestionGate {
    pub fn new(
        source: Arc<dyn EventSource>,
        sender: mpsc::Sender<FileEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            sender,
            shutdown,
            metrics: GateMetrics::noop(),
            in_flight: None,
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
        }
    }

    /// Track deliveries in a set shared with the workers that drain the
    /// queue. Without one, every redelivery is enqueued.
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_metrics(mut self, metrics: GateMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Decode one record and try to enqueue it without waiting.
    pub async fn admit(&self, record: StreamRecord) -> Admission {
        let admission = match record.decode() {
            Ok(event) if !self.track(&record) => {
                debug!(
                    filename = %event.filename,
                    delivery = %record.delivery,
                    "Record already in flight, not enqueued again"
                );
                Admission::InFlight
            }
            Ok(event) => {
                let filename = event.filename.clone();
                match self.sender.try_send(event) {
                    Ok(()) => {
                        debug!(filename = %filename, delivery = %record.delivery, "Enqueued event");
                        Admission::Enqueued
                    }
                    Err(_) => {
                        self.untrack(&record);
                        debug!(
                            filename = %filename,
                            delivery = %record.delivery,
                            "Work queue full, leaving record for redelivery"
                        );
                        Admission::Dropped
                    }
                }
            }
            Err(e) => {
                warn!(delivery = %record.delivery, error = %e, "Discarding malformed record");
                if let Err(e) = self.source.ack(&record.delivery).await {
                    warn!(delivery = %record.delivery, error = %e, "Failed to acknowledge malformed record");
                }
                Admission::Malformed
            }
        };

        self.metrics.record(admission);
        admission
    }

    /// Returns false if the record is already in flight.
    fn track(&self, record: &StreamRecord) -> bool {
        self.in_flight
            .as_ref()
            .map_or(true, |in_flight| in_flight.insert(&record.delivery))
    }

    fn untrack(&self, record: &StreamRecord) {
        if let Some(in_flight) = &self.in_flight {
            in_flight.remove(&record.delivery);
        }
    }

    /// Reset the stream idle time of every in-flight record.
    async fn keep_alive(&self) {
        let Some(in_flight) = &self.in_flight else {
            return;
        };
        let deliveries = in_flight.snapshot();
        if deliveries.is_empty() {
            return;
        }
        if let Err(e) = self.source.keep_alive(&deliveries).await {
            warn!(count = deliveries.len(), error = %e, "Failed to refresh in-flight records");
        }
    }

    /// Poll the source until cancelled or until every worker is gone.
    ///
    /// Dropping the gate's sender on return lets idle workers observe a
    /// closed queue.
    pub async fn run(self) -> GateStats {
        let mut shutdown = self.shutdown.clone();
        let mut stats = GateStats::default();
        let mut last_keep_alive = Instant::now();
        info!("Ingestion gate started");

        loop {
            if *shutdown.borrow() || self.sender.is_closed() {
                break;
            }

            if last_keep_alive.elapsed() >= self.keep_alive_interval {
                self.keep_alive().await;
                last_keep_alive = Instant::now();
            }

            let polled = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                polled = self.source.poll() => polled,
            };

            match polled {
                Ok(records) => {
                    for record in records {
                        stats.count(self.admit(record).await);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to poll event source");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(
            enqueued = stats.enqueued,
            dropped = stats.dropped,
            malformed = stats.malformed,
            in_flight = stats.in_flight,
            "Ingestion gate stopped"
        );
        stats
    }
}

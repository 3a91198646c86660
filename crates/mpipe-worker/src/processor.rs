//! Per-file processing: ledger transitions around the rendition pipeline.
//!
//! A record is acknowledged only once its outputs are uploaded, or when no
//! redelivery could ever change the result (already processed, or routed to
//! the dead-letter stream).

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use mpipe_ledger::{LedgerError, StatusLedger};
use mpipe_media::RenditionPipeline;
use mpipe_models::{FileEvent, ProcessStatus};
use mpipe_queue::{EventSource, InFlight};
use mpipe_storage::{BlobStore, UploadSummary};
use tracing::{debug, error, info, warn, Instrument};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::FileContext;
use crate::telemetry::{FileOutcome, Telemetry};

/// Shared by every worker; each call owns one file end to end.
#[derive(Clone)]
pub struct FileProcessor {
    ledger: Arc<dyn StatusLedger>,
    source: Arc<dyn EventSource>,
    pipeline: RenditionPipeline,
    telemetry: Telemetry,
    in_flight: Option<InFlight>,
}

impl FileProcessor {
    pub fn new(
        ledger: Arc<dyn StatusLedger>,
        source: Arc<dyn EventSource>,
        pipeline: RenditionPipeline,
    ) -> Self {
        Self {
            ledger,
            source,
            pipeline,
            telemetry: Telemetry::noop(),
            in_flight: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Release each delivery from `in_flight` once its file has an outcome.
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    /// Process one event using `blob` and the scratch directory `scratch`.
    ///
    /// Never fails: every error ends up as a ledger transition, a log entry
    /// and an outcome. `scratch` is removed before returning.
    pub async fn process(
        &self,
        blob: &dyn BlobStore,
        scratch: &Path,
        ctx: &FileContext,
        event: &FileEvent,
    ) -> FileOutcome {
        let started = Instant::now();

        let outcome = async {
            let outcome = self.handle(blob, scratch, event).await;
            remove_scratch(scratch).await;
            info!(
                outcome = outcome.as_str(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Finished file"
            );
            outcome
        }
        .instrument(ctx.span())
        .await;

        if let (Some(in_flight), Some(delivery)) = (&self.in_flight, &event.delivery) {
            in_flight.remove(delivery);
        }
        self.telemetry.record_file(outcome, started.elapsed());
        outcome
    }

    async fn handle(&self, blob: &dyn BlobStore, scratch: &Path, event: &FileEvent) -> FileOutcome {
        match self.ledger.is_already_processed(&event.filename).await {
            Ok(true) => {
                info!("File already processed, skipping");
                self.ack(event).await;
                return FileOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Idempotency check failed, leaving record for redelivery");
                return FileOutcome::Deferred;
            }
        }

        if let Err(e) = RenditionPipeline::dispatch(&event.content_type) {
            warn!(content_type = %event.content_type, "Rejecting unsupported content");
            self.dead_letter(event, &e.to_string()).await;
            return FileOutcome::Rejected;
        }

        match self.ledger.update_status(&event.filename, ProcessStatus::Processing).await {
            Ok(()) => {}
            Err(LedgerError::AlreadySucceeded { .. }) => {
                info!("File finished by another delivery, skipping");
                self.ack(event).await;
                return FileOutcome::Skipped;
            }
            Err(e @ LedgerError::NotFound(_)) => {
                warn!(error = %e, "No ledger row to claim, rejecting");
                self.dead_letter(event, &e.to_string()).await;
                return FileOutcome::Rejected;
            }
            Err(e) => {
                warn!(error = %e, "Failed to mark file as processing, leaving record for redelivery");
                return FileOutcome::Deferred;
            }
        }

        match self.execute(blob, scratch, event).await {
            Ok(summary) => {
                if let Err(e) = self
                    .ledger
                    .update_status(&event.filename, ProcessStatus::Success)
                    .await
                {
                    error!(error = %e, "Outputs uploaded but ledger not marked SUCCESS");
                }
                info!(
                    uploaded = summary.uploaded.len(),
                    skipped = summary.skipped,
                    "File processed"
                );
                self.ack(event).await;
                FileOutcome::Succeeded
            }
            Err(e) => self.fail(event, e).await,
        }
    }

    /// Download, run every pipeline stage, upload.
    async fn execute(
        &self,
        blob: &dyn BlobStore,
        scratch: &Path,
        event: &FileEvent,
    ) -> WorkerResult<UploadSummary> {
        tokio::fs::create_dir_all(scratch).await?;

        let input = blob.download(&event.filename, scratch).await?;
        debug!(path = %input.display(), "Downloaded source");

        let output = self.pipeline.run(&input, &event.content_type).await?;
        if !output.cleanup.is_clean() {
            warn!(failures = output.cleanup.failures, "Cleanup left files behind");
        }

        let summary = blob
            .upload_directory(&output.output_dir, event.basename())
            .await?;
        Ok(summary)
    }

    async fn fail(&self, event: &FileEvent, err: WorkerError) -> FileOutcome {
        error!(stage = err.stage(), error = %err, "File processing failed");

        match self.ledger.update_status(&event.filename, ProcessStatus::Fail).await {
            Ok(()) => {}
            Err(LedgerError::AlreadySucceeded { .. }) => {
                info!("File finished by another delivery, skipping");
                self.ack(event).await;
                return FileOutcome::Skipped;
            }
            Err(e) => warn!(error = %e, "Failed to mark file as failed"),
        }

        if !err.is_retryable() {
            self.dead_letter(event, &err.to_string()).await;
            return FileOutcome::Rejected;
        }

        let Some(delivery) = &event.delivery else {
            return FileOutcome::Failed;
        };
        match self.source.record_failure(delivery).await {
            Ok(attempts) if attempts >= self.source.max_delivery_attempts() => {
                warn!(attempts, "Delivery attempts exhausted");
                self.dead_letter(event, &err.to_string()).await;
                FileOutcome::DeadLettered
            }
            Ok(attempts) => {
                info!(attempts, "Leaving record for redelivery");
                FileOutcome::Failed
            }
            Err(e) => {
                warn!(error = %e, "Failed to count delivery attempt");
                FileOutcome::Failed
            }
        }
    }

    async fn ack(&self, event: &FileEvent) {
        let Some(delivery) = &event.delivery else {
            return;
        };
        if let Err(e) = self.source.ack(delivery).await {
            warn!(error = %e, "Failed to acknowledge record");
        }
    }

    async fn dead_letter(&self, event: &FileEvent, reason: &str) {
        let Some(delivery) = &event.delivery else {
            return;
        };
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode dead-letter payload");
                Vec::new()
            }
        };
        if let Err(e) = self.source.dead_letter(delivery, &payload, reason).await {
            warn!(error = %e, "Failed to route record to dead letter stream");
        }
    }
}

async fn remove_scratch(scratch: &Path) {
    match tokio::fs::remove_dir_all(scratch).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %scratch.display(), error = %e, "Failed to remove scratch directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpipe_ledger::MemoryLedger;
    use mpipe_media::testing::{ScriptedEngine, ScriptedPackager};
    use mpipe_media::PipelineConfig;
    use mpipe_models::RenditionLadder;
    use mpipe_queue::MemorySource;
    use mpipe_storage::MemoryBlobStore;
    use std::time::Duration;

    struct Harness {
        ledger: Arc<MemoryLedger>,
        source: Arc<MemorySource>,
        blob: MemoryBlobStore,
        engine: Arc<ScriptedEngine>,
        processor: FileProcessor,
        scratch: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(MemoryLedger::new());
        let source = Arc::new(MemorySource::new(Duration::from_secs(60)));
        let engine = Arc::new(ScriptedEngine::new());
        let config = PipelineConfig {
            ladder: RenditionLadder::from_codec_list("h264").unwrap(),
            ..PipelineConfig::default()
        };
        let pipeline = RenditionPipeline::new(config, engine.clone(), Arc::new(ScriptedPackager::new()));
        let processor = FileProcessor::new(ledger.clone(), source.clone(), pipeline);
        Harness {
            ledger,
            source,
            blob: MemoryBlobStore::new(),
            engine,
            processor,
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    async fn delivered(source: &MemorySource, event: FileEvent) -> FileEvent {
        source.push_event(&event);
        source.poll().await.unwrap().remove(0).decode().unwrap()
    }

    #[tokio::test]
    async fn test_ledger_outage_defers_without_ack() {
        let h = harness();
        h.ledger.register("clip.mp4");
        h.ledger.set_unavailable(true);
        let event = delivered(&h.source, FileEvent::new("clip.mp4", "video/mp4", 7)).await;
        let ctx = FileContext::new(0, &event);

        let scratch = h.scratch.path().join("worker-0");
        let outcome = h.processor.process(&h.blob, &scratch, &ctx, &event).await;

        assert_eq!(outcome, FileOutcome::Deferred);
        assert!(h.source.acked().is_empty());
        assert_eq!(h.blob.download_count(), 0);
        assert!(h.engine.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_missing_upload_fails_and_cleans_scratch() {
        let h = harness();
        h.ledger.register("clip.mp4");
        let event = delivered(&h.source, FileEvent::new("clip.mp4", "video/mp4", 7)).await;
        let ctx = FileContext::new(0, &event);

        let scratch = h.scratch.path().join("worker-0");
        let outcome = h.processor.process(&h.blob, &scratch, &ctx, &event).await;

        assert_eq!(outcome, FileOutcome::Failed);
        assert_eq!(
            h.ledger.history("clip.mp4"),
            [ProcessStatus::Processing, ProcessStatus::Fail]
        );
        assert!(h.source.acked().is_empty());
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_unregistered_file_is_dead_lettered_before_download() {
        let h = harness();
        h.blob.put_upload("clip.mp4", b"frames".to_vec());
        let event = delivered(&h.source, FileEvent::new("clip.mp4", "video/mp4", 7)).await;
        let ctx = FileContext::new(0, &event);

        let scratch = h.scratch.path().join("worker-0");
        let outcome = h.processor.process(&h.blob, &scratch, &ctx, &event).await;

        assert_eq!(outcome, FileOutcome::Rejected);
        assert_eq!(h.blob.download_count(), 0);
        assert!(h.engine.invocations().is_empty());
        assert_eq!(h.source.dead_letters().len(), 1);
        assert!(h.source.dead_letters()[0].error.contains("clip.mp4"));
        assert!(h.ledger.transitions().is_empty());
    }

    #[tokio::test]
    async fn test_row_vanishing_on_claim_is_dead_lettered() {
        let h = harness();
        h.ledger.register("clip.mp4");
        h.ledger.vanish_on(ProcessStatus::Processing);
        h.blob.put_upload("clip.mp4", b"frames".to_vec());
        let event = delivered(&h.source, FileEvent::new("clip.mp4", "video/mp4", 7)).await;
        let ctx = FileContext::new(0, &event);

        let scratch = h.scratch.path().join("worker-0");
        let outcome = h.processor.process(&h.blob, &scratch, &ctx, &event).await;

        assert_eq!(outcome, FileOutcome::Rejected);
        assert_eq!(h.blob.download_count(), 0);
        assert_eq!(h.source.dead_letters().len(), 1);
        assert!(h.source.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn test_failed_claim_defers_without_work() {
        let h = harness();
        h.ledger.register("clip.mp4");
        h.ledger.set_read_only(true);
        h.blob.put_upload("clip.mp4", b"frames".to_vec());
        let event = delivered(&h.source, FileEvent::new("clip.mp4", "video/mp4", 7)).await;
        let ctx = FileContext::new(0, &event);

        let scratch = h.scratch.path().join("worker-0");
        let outcome = h.processor.process(&h.blob, &scratch, &ctx, &event).await;

        assert_eq!(outcome, FileOutcome::Deferred);
        assert_eq!(h.blob.download_count(), 0);
        assert!(h.engine.invocations().is_empty());
        assert!(h.source.acked().is_empty());
        assert_eq!(h.source.pending_ids().len(), 1);
        assert_eq!(h.ledger.status("clip.mp4").await.unwrap(), Some(ProcessStatus::InQueue));
    }

    #[tokio::test]
    async fn test_outcome_releases_in_flight_delivery() {
        let h = harness();
        let in_flight = InFlight::new();
        let processor = h.processor.clone().with_in_flight(in_flight.clone());
        h.ledger.seed("clip.mp4", ProcessStatus::Success);
        let event = delivered(&h.source, FileEvent::new("clip.mp4", "video/mp4", 7)).await;
        let delivery = event.delivery.clone().unwrap();
        assert!(in_flight.insert(&delivery));

        let ctx = FileContext::new(0, &event);
        let scratch = h.scratch.path().join("worker-0");
        let outcome = processor.process(&h.blob, &scratch, &ctx, &event).await;

        assert_eq!(outcome, FileOutcome::Skipped);
        assert!(!in_flight.contains(&delivery));
    }

    #[tokio::test]
    async fn test_extensionless_input_is_dead_lettered() {
        let h = harness();
        h.ledger.register("clip");
        h.blob.put_upload("clip", b"frames".to_vec());
        let event = delivered(&h.source, FileEvent::new("clip", "video/mp4", 7)).await;
        let ctx = FileContext::new(0, &event);

        let scratch = h.scratch.path().join("worker-0");
        let outcome = h.processor.process(&h.blob, &scratch, &ctx, &event).await;

        assert_eq!(outcome, FileOutcome::Rejected);
        assert_eq!(h.ledger.status("clip").await.unwrap(), Some(ProcessStatus::Fail));
        assert_eq!(h.source.dead_letters().len(), 1);
    }
}

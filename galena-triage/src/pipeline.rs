//! Pipeline orchestration: container → adapters → classifier /
//! correlation → artifact store.
//!
//! One task per (source, adapter) pair; artifact families are
//! independent and run concurrently. Photo records flow through a
//! bounded channel into a classifier worker pool (backpressure keeps
//! photo bytes from piling up in memory); every other record appends to
//! the store directly. Correlation is a join barrier after the
//! contact/message/call/account adapters; the classifier has no
//! dependency on it and drains in parallel.
//!
//! Cancellation is cooperative: in-flight work finishes its current
//! record (the store never sees a half-written record) and a run
//! cancelled before the correlation barrier commits no entity groupings
//! at all.

use crate::adapters::{adapter_for, AdapterContext};
use crate::classify::PhotoClassifier;
use crate::container::{open_container, BackupContainer};
use crate::correlate::correlate;
use crate::store::ArtifactStore;
use galena_common::config::TriageConfig;
use galena_common::diag::Diagnostic;
use galena_common::records::{ArtifactKind, CanonicalRecord, DeviceProfile, RecordBody};
use galena_common::time::TimeNormalizer;
use galena_common::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one pipeline run.
pub struct TriageRun {
    pub run_id: Uuid,
    pub store: Arc<ArtifactStore>,
    pub profile: DeviceProfile,
}

pub struct TriagePipeline {
    config: TriageConfig,
    classifier: Arc<PhotoClassifier>,
}

impl TriagePipeline {
    /// Pipeline with the built-in heuristic content model.
    pub fn new(config: TriageConfig) -> Self {
        Self::with_classifier(config, Arc::new(PhotoClassifier::with_default_model()))
    }

    /// Pipeline with a caller-supplied classifier (swapped content
    /// model, or a stub in tests).
    pub fn with_classifier(config: TriageConfig, classifier: Arc<PhotoClassifier>) -> Self {
        Self { config, classifier }
    }

    /// Run the full pipeline over one backup container.
    ///
    /// Only container-level failures return `Err`; every lesser problem
    /// lands in the run summary or on individual records.
    pub async fn run(
        &self,
        container_path: &Path,
        cancel: CancellationToken,
    ) -> Result<TriageRun> {
        let run_id = Uuid::new_v4();
        info!(%run_id, container = %container_path.display(), "Starting triage run");

        let container = {
            let path = container_path.to_path_buf();
            tokio::task::spawn_blocking(move || open_container(&path))
                .await
                .map_err(|e| Error::Internal(format!("container open task: {e}")))??
        };

        let profile = container.device_profile();
        let ctx = AdapterContext {
            normalizer: TimeNormalizer::new(self.config.device_offset),
            platform: container.platform(),
            os_version: profile.os_version.clone(),
        };
        let store = Arc::new(ArtifactStore::new(self.config.include_implausible));

        // Classifier pool, fed by a bounded queue
        let (photo_tx, photo_rx) =
            mpsc::channel::<CanonicalRecord>(self.config.classify_queue_depth.max(1));
        let workers = self.spawn_classifier_workers(
            photo_rx,
            Arc::clone(&container),
            Arc::clone(&store),
            cancel.clone(),
        );

        // One task per (source, adapter) pair
        let mut tasks: JoinSet<()> = JoinSet::new();
        for kind in self.config.kinds.clone() {
            let present = container.sources_for(kind);
            for expected in container.expected_sources(kind) {
                if !present.contains(&expected) {
                    debug!(kind = kind.as_str(), source = %expected.logical_path, "Expected source absent");
                    store.source_diagnostic(
                        kind,
                        expected.logical_path.clone(),
                        Diagnostic::source_missing(format!(
                            "{} not present in container",
                            expected.display_name
                        )),
                    );
                }
            }

            for descriptor in present {
                let container = Arc::clone(&container);
                let store = Arc::clone(&store);
                let ctx = ctx.clone();
                let cancel = cancel.clone();
                let photo_tx = photo_tx.clone();

                tasks.spawn(async move {
                    if cancel.is_cancelled() {
                        return;
                    }

                    let staged = {
                        let container = Arc::clone(&container);
                        let descriptor = descriptor.clone();
                        tokio::task::spawn_blocking(move || container.stage(&descriptor))
                            .await
                            .expect("staging task panicked")
                    };
                    let staged = match staged {
                        Ok(staged) => staged,
                        Err(e) => {
                            warn!(kind = kind.as_str(), source = %descriptor.logical_path, error = %e, "Source staging failed");
                            store.source_diagnostic(
                                kind,
                                descriptor.logical_path.clone(),
                                Diagnostic::source_missing(format!("staging failed: {e}")),
                            );
                            return;
                        }
                    };

                    let adapter = adapter_for(kind);
                    match adapter.parse(&staged, &ctx).await {
                        Ok(output) => {
                            if output.skipped_rows > 0 {
                                store.note_skipped(kind, output.skipped_rows);
                            }
                            for record in output.records {
                                if cancel.is_cancelled() {
                                    debug!(kind = kind.as_str(), "Cancelled mid-source; remaining records dropped");
                                    return;
                                }
                                if kind == ArtifactKind::Photos {
                                    // Bounded send is the backpressure
                                    // point between adapters and the
                                    // classifier
                                    tokio::select! {
                                        _ = cancel.cancelled() => return,
                                        sent = photo_tx.send(record) => {
                                            if sent.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                } else {
                                    store.append(record);
                                }
                            }
                        }
                        Err(e) => {
                            warn!(kind = kind.as_str(), source = %staged.descriptor.logical_path, error = %e, "Adapter could not read source");
                            store.source_diagnostic(
                                kind,
                                staged.descriptor.logical_path.clone(),
                                Diagnostic::source_missing(e.to_string()),
                            );
                        }
                    }
                });
            }
        }
        drop(photo_tx);

        // Adapter barrier
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Adapter task panicked; its source yields no records");
            }
        }

        // Correlation barrier: cancellation before this point discards
        // all correlation output cleanly
        if cancel.is_cancelled() {
            info!(%run_id, "Run cancelled before correlation; no entities committed");
        } else {
            let batch: Vec<CanonicalRecord> = store
                .snapshot()
                .into_iter()
                .filter(|r| {
                    matches!(
                        r.body,
                        RecordBody::Contact(_)
                            | RecordBody::Message(_)
                            | RecordBody::Call(_)
                            | RecordBody::Account(_)
                    )
                })
                .collect();
            let result = tokio::task::spawn_blocking(move || correlate(&batch))
                .await
                .map_err(|e| Error::Internal(format!("correlation task: {e}")))?;
            store.set_entities(result.contacts, result.conversations);
        }

        // Classifier drain (independent of correlation)
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Classifier worker panicked");
            }
        }

        let summary = store.summary();
        info!(
            %run_id,
            records = store.len(),
            source_diagnostics = summary.source_diagnostics.len(),
            cancelled = cancel.is_cancelled(),
            "Triage run finished"
        );

        Ok(TriageRun {
            run_id,
            store,
            profile,
        })
    }

    fn spawn_classifier_workers(
        &self,
        photo_rx: mpsc::Receiver<CanonicalRecord>,
        container: Arc<dyn BackupContainer>,
        store: Arc<ArtifactStore>,
        cancel: CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let worker_count = self.config.classifier_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
        });
        let photo_rx = Arc::new(Mutex::new(photo_rx));

        (0..worker_count)
            .map(|worker| {
                let photo_rx = Arc::clone(&photo_rx);
                let container = Arc::clone(&container);
                let store = Arc::clone(&store);
                let classifier = Arc::clone(&self.classifier);
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    loop {
                        // Stop taking new work once cancelled; the record
                        // already being classified below still completes
                        if cancel.is_cancelled() {
                            break;
                        }
                        let Some(record) = photo_rx.lock().await.recv().await else {
                            break;
                        };

                        let container = Arc::clone(&container);
                        let classifier = Arc::clone(&classifier);
                        let classified = tokio::task::spawn_blocking(move || {
                            let media_ref = match &record.body {
                                RecordBody::Photo(photo) => photo.media_ref.clone(),
                                _ => None,
                            };
                            let image = media_ref.and_then(|address| {
                                container.read_media(&address).ok()
                            });
                            let mut record = record;
                            classifier.classify(&mut record, image.as_deref());
                            record
                        })
                        .await;

                        match classified {
                            Ok(record) => store.append(record),
                            Err(e) => {
                                warn!(worker, error = %e, "Classification task panicked; photo record lost")
                            }
                        }
                    }
                    debug!(worker, "Classifier worker exited");
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_container_is_fatal() {
        let pipeline = TriagePipeline::new(TriageConfig::default());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(pipeline.run(
            Path::new("/no/such/backup"),
            CancellationToken::new(),
        ));
        assert!(matches!(result, Err(Error::Container(_))));
    }
}

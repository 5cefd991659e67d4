use crate::config::Config;
use chrono::NaiveDateTime;
use rollcall_core::{
    AttendancePipeline, ByteOrder, DetectedFace, DisplayableOutcome, Gallery, StoreError,
};
use rollcall_store::{SqliteStore, SqliteStoreError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] SqliteStoreError),
    #[error("gallery load failed: {0}")]
    Gallery(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine did not answer within {0} ms")]
    Timeout(u64),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Most recent outcome, for display surfaces that must never wait on storage.
#[derive(Debug, Clone, Serialize)]
pub struct LatestOutcome {
    pub at: NaiveDateTime,
    pub outcome: DisplayableOutcome,
}

/// Counters reported by `Status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub gallery_size: usize,
    pub gallery_skipped: usize,
    pub detections: u64,
    pub logged: u64,
    pub degraded: u64,
    /// Detections dropped because the caller timed out before they were dequeued.
    pub abandoned: u64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Detect {
        face: DetectedFace,
        now: NaiveDateTime,
        reply: oneshot::Sender<DisplayableOutcome>,
    },
    ReloadGallery {
        reply: oneshot::Sender<Result<usize, StoreError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    latest: watch::Receiver<Option<LatestOutcome>>,
    decision_timeout: Duration,
}

impl EngineHandle {
    /// Run one detection through the pipeline.
    ///
    /// Gives up after the decision timeout. A request still queued at that
    /// point is dropped unprocessed; one already being decided is finished
    /// and published to [`latest`](Self::latest).
    pub async fn detect(
        &self,
        face: DetectedFace,
        now: NaiveDateTime,
    ) -> Result<DisplayableOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(EngineRequest::Detect { face, now, reply: reply_tx }, reply_rx)
            .await
    }

    pub async fn reload_gallery(&self) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let loaded = self
            .request(EngineRequest::ReloadGallery { reply: reply_tx }, reply_rx)
            .await?;
        Ok(loaded?)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(EngineRequest::Status { reply: reply_tx }, reply_rx)
            .await
    }

    /// Last published outcome. Never blocks.
    pub fn latest(&self) -> Option<LatestOutcome> {
        self.latest.borrow().clone()
    }

    async fn request<T>(
        &self,
        req: EngineRequest,
        reply_rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        let exchange = async {
            self.tx
                .send(req)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };
        tokio::time::timeout(self.decision_timeout, exchange)
            .await
            .map_err(|_| EngineError::Timeout(self.decision_timeout.as_millis() as u64))?
    }
}

/// Open the database, load the gallery and spawn the engine thread.
///
/// Fails fast at startup if the database or gallery is unavailable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let store = Arc::new(SqliteStore::open(&config.db_path, config.write_timeout())?);
    let gallery = Gallery::load(store.as_ref(), config.embedding_byte_order)?;
    let pipeline = AttendancePipeline::new(store, Arc::new(gallery), config.pipeline_settings());
    spawn_with_pipeline(
        pipeline,
        config.embedding_byte_order,
        config.queue_depth,
        config.decision_timeout(),
    )
}

pub fn spawn_with_pipeline(
    mut pipeline: AttendancePipeline<SqliteStore>,
    byte_order: ByteOrder,
    queue_depth: usize,
    decision_timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));
    let (latest_tx, latest_rx) = watch::channel::<Option<LatestOutcome>>(None);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(identities = pipeline.gallery().len(), "engine thread started");
            let mut status = EngineStatus::default();

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { face, now, reply } => {
                        if reply.is_closed() {
                            status.abandoned += 1;
                            tracing::debug!(at = %now, "caller gone; skipping detection");
                            continue;
                        }
                        let outcome = pipeline.handle_detection(&face, now);
                        status.detections += 1;
                        if matches!(outcome, DisplayableOutcome::Logged { .. }) {
                            status.logged += 1;
                        }
                        if outcome.is_degraded() {
                            status.degraded += 1;
                            tracing::warn!(message = %outcome.message(), "degraded outcome");
                        }
                        latest_tx.send_replace(Some(LatestOutcome {
                            at: now,
                            outcome: outcome.clone(),
                        }));
                        let _ = reply.send(outcome);
                    }
                    EngineRequest::ReloadGallery { reply } => {
                        let result = pipeline.reload_gallery(byte_order);
                        match &result {
                            Ok(count) => tracing::info!(identities = count, "gallery reloaded"),
                            Err(e) => {
                                tracing::warn!(error = %e, "gallery reload failed; keeping current")
                            }
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        status.gallery_size = pipeline.gallery().len();
                        status.gallery_skipped = pipeline.gallery().skipped();
                        let _ = reply.send(status.clone());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        latest: latest_rx,
        decision_timeout,
    })
}

//! Bounded session registry and worker pool
//!
//! [`SessionManager::start`] validates synchronously, registers the session
//! and returns at once; the pipeline runs on a blocking worker once one of
//! `worker_limit` permits is free. Finished sessions stay queryable until
//! their TTL lapses or the registry needs the slot.

use super::bus::{EventBus, ProgressSink};
use super::events::ProgressEvent;
use super::pipeline::{PipelineContext, TrainingPipeline, TrainingRequest};
use super::reporter::ProgressReporter;
use crate::config::ServiceConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use terrawatch_algorithms::classification::{ModelStore, ModelType};
use terrawatch_core::io::RasterStore;
use terrawatch_core::{Error, Result};
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub status: SessionStatus,
    pub model_type: ModelType,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub output_path: Option<PathBuf>,
    pub tile_path: Option<PathBuf>,
}

/// Immediate reply to a start request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingAck {
    pub accepted: bool,
    pub session_id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionLimits {
    /// Registry capacity, running and finished sessions together
    pub max_sessions: usize,
    /// Retention of finished sessions
    pub ttl: Duration,
    /// Pipelines running at once
    pub worker_limit: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            ttl: Duration::from_secs(3600),
            worker_limit: 4,
        }
    }
}

struct SessionEntry {
    info: SessionInfo,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    finished: Option<Instant>,
}

type Registry = Arc<RwLock<HashMap<String, SessionEntry>>>;

/// Owns every training session of the process
pub struct SessionManager {
    sessions: Registry,
    bus: Arc<EventBus>,
    pipeline: Arc<TrainingPipeline>,
    workers: Arc<Semaphore>,
    limits: SessionLimits,
}

impl SessionManager {
    pub fn new(pipeline: TrainingPipeline, bus: Arc<EventBus>, limits: SessionLimits) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            bus,
            pipeline: Arc::new(pipeline),
            workers: Arc::new(Semaphore::new(limits.worker_limit.max(1))),
            limits,
        }
    }

    pub fn from_config(
        config: &ServiceConfig,
        raster_store: Arc<dyn RasterStore>,
        model_store: Arc<dyn ModelStore>,
    ) -> Self {
        let rt = &config.realtime;
        let pipeline = TrainingPipeline::new(PipelineContext {
            raster_store,
            model_store,
            classifier_params: config.classifier.clone(),
            chunk_count: rt.chunk_count,
            output_dir: config.output_dir.clone(),
            tiles_dir: config.tiles_dir.clone(),
        });
        let limits = SessionLimits {
            max_sessions: rt.max_sessions,
            ttl: rt.session_ttl(),
            worker_limit: rt.worker_limit,
        };
        Self::new(pipeline, Arc::new(EventBus::new(rt.event_capacity)), limits)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// Events of one session; subscribe before [`start`](Self::start) to see them all
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.bus.subscribe(session_id)
    }

    /// Register and launch a session without waiting for it to run
    pub async fn start(&self, request: TrainingRequest) -> Result<TrainingAck> {
        if request.session_id.trim().is_empty() {
            return Err(Error::Validation("session_id must not be empty".into()));
        }
        if !tokio::fs::try_exists(&request.image_path).await.unwrap_or(false) {
            let sessions = self.sessions.read().await;
            self.release_rejected_topic(&sessions, &request.session_id);
            return Err(Error::Validation(format!(
                "Image path does not exist: {}",
                request.image_path.display()
            )));
        }

        let mut sessions = self.sessions.write().await;
        self.evict_expired(&mut sessions);

        if let Some(existing) = sessions.get(&request.session_id) {
            if !existing.info.status.is_finished() {
                return Err(Error::Validation(format!(
                    "session '{}' is already active",
                    request.session_id
                )));
            }
            sessions.remove(&request.session_id);
        }
        if sessions.len() >= self.limits.max_sessions && !self.evict_oldest_finished(&mut sessions) {
            warn!(active = sessions.len(), "session limit reached");
            let count = sessions.len();
            self.release_rejected_topic(&sessions, &request.session_id);
            return Err(Error::SessionLimit(count));
        }

        let session_id = request.session_id.clone();
        let cancel = CancellationToken::new();
        let info = SessionInfo {
            session_id: session_id.clone(),
            status: SessionStatus::Queued,
            model_type: request.model_type,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
            output_path: None,
            tile_path: None,
        };
        let handle = self.spawn(request, cancel.clone());
        sessions.insert(
            session_id.clone(),
            SessionEntry {
                info,
                cancel,
                handle: Some(handle),
                finished: None,
            },
        );
        info!(session_id = %session_id, "session queued");

        Ok(TrainingAck {
            accepted: true,
            session_id,
            status: SessionStatus::Queued,
        })
    }

    fn spawn(&self, request: TrainingRequest, cancel: CancellationToken) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let workers = Arc::clone(&self.workers);
        let pipeline = Arc::clone(&self.pipeline);
        let sink: Arc<dyn ProgressSink> = self.bus.clone();
        let reporter = Arc::new(ProgressReporter::new(request.session_id.clone(), sink));

        tokio::spawn(async move {
            let session_id = request.session_id.clone();
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = workers.acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                reporter.fail(&Error::Cancelled);
                let error = Some(Error::Cancelled.to_string());
                finish(&sessions, &session_id, SessionStatus::Cancelled, error, None).await;
                return;
            };

            set_status(&sessions, &session_id, SessionStatus::Running).await;
            info!(session_id = %session_id, "session running");

            let worker_reporter = Arc::clone(&reporter);
            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                pipeline.run(&request, &worker_reporter, &cancel)
            })
            .await;

            match result {
                Ok(Ok(outcome)) => {
                    let paths = Some((outcome.output_path, outcome.tile_path));
                    finish(&sessions, &session_id, SessionStatus::Completed, None, paths).await;
                }
                Ok(Err(Error::Cancelled)) => {
                    let error = Some(Error::Cancelled.to_string());
                    finish(&sessions, &session_id, SessionStatus::Cancelled, error, None).await;
                }
                Ok(Err(e)) => {
                    finish(&sessions, &session_id, SessionStatus::Failed, Some(e.to_string()), None).await;
                }
                Err(join) => {
                    let err = Error::Other(format!("training worker panicked: {}", join));
                    reporter.fail(&err);
                    finish(&sessions, &session_id, SessionStatus::Failed, Some(err.to_string()), None).await;
                }
            }
        })
    }

    pub async fn status(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(session_id).map(|e| e.info.clone())
    }

    /// All registered sessions, oldest first
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let mut all: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .values()
            .map(|e| e.info.clone())
            .collect();
        all.sort_by_key(|i| i.created_at);
        all
    }

    pub async fn active_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|e| !e.info.status.is_finished())
            .count()
    }

    /// Signal a queued or running session; `false` if unknown or already finished
    pub async fn cancel(&self, session_id: &str) -> bool {
        match self.sessions.read().await.get(session_id) {
            Some(entry) if !entry.info.status.is_finished() => {
                entry.cancel.cancel();
                info!(session_id = %session_id, "session cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Cancel everything still queued or running
    pub async fn cancel_all(&self) {
        for entry in self.sessions.read().await.values() {
            if !entry.info.status.is_finished() {
                entry.cancel.cancel();
            }
        }
    }

    /// Wait for a session's worker to finish and return its final state
    pub async fn join(&self, session_id: &str) -> Option<SessionInfo> {
        let handle = self
            .sessions
            .write()
            .await
            .get_mut(session_id)
            .and_then(|e| e.handle.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(session_id = %session_id, error = %e, "session task ended abnormally");
            }
        }
        self.status(session_id).await
    }

    /// Evict finished sessions older than the TTL; returns how many went
    pub async fn prune(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        self.evict_expired(&mut sessions)
    }

    fn evict_expired(&self, sessions: &mut HashMap<String, SessionEntry>) -> usize {
        let ttl = self.limits.ttl;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, e)| e.finished.is_some_and(|t| t.elapsed() >= ttl))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
            self.bus.remove_idle_topic(id);
        }
        // subscriptions that never led to a session, once their receivers are gone
        self.bus.sweep_idle(|id| sessions.contains_key(id));
        expired.len()
    }

    /// A rejected request leaves no topic behind unless another run owns the id;
    /// waiting subscribers see their channel close
    fn release_rejected_topic(&self, sessions: &HashMap<String, SessionEntry>, session_id: &str) {
        if !sessions.contains_key(session_id) && self.bus.remove_topic(session_id) {
            info!(session_id = %session_id, "closed topic of rejected session");
        }
    }

    fn evict_oldest_finished(&self, sessions: &mut HashMap<String, SessionEntry>) -> bool {
        let oldest = sessions
            .iter()
            .filter_map(|(id, e)| e.finished.map(|t| (t, id.clone())))
            .min_by_key(|(t, _)| *t)
            .map(|(_, id)| id);
        match oldest {
            Some(id) => {
                sessions.remove(&id);
                self.bus.remove_idle_topic(&id);
                true
            }
            None => false,
        }
    }
}

async fn set_status(sessions: &Registry, session_id: &str, status: SessionStatus) {
    if let Some(entry) = sessions.write().await.get_mut(session_id) {
        entry.info.status = status;
    }
}

async fn finish(
    sessions: &Registry,
    session_id: &str,
    status: SessionStatus,
    error: Option<String>,
    paths: Option<(PathBuf, PathBuf)>,
) {
    if let Some(entry) = sessions.write().await.get_mut(session_id) {
        entry.info.status = status;
        entry.info.finished_at = Some(Utc::now());
        entry.info.error = error;
        if let Some((output, tiles)) = paths {
            entry.info.output_path = Some(output);
            entry.info.tile_path = Some(tiles);
        }
        entry.finished = Some(Instant::now());
    }
    info!(session_id = %session_id, status = ?status, "session finished");
}

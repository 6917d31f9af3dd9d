//! Session coordinator
//!
//! Owns per-stream aggregate state (viewers, carried-over audio tension,
//! detection history) and glues the pipeline together: media chunks are
//! dispatched to video and audio analysis concurrently, the resulting
//! detections run through the decision engine, and surviving instructions
//! enter the per-stream delay buffer. Overrides and adjustment responses are
//! routed to the learning engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_common::config::VigilConfig;
use vigil_common::events::{CancelReason, EventBus, VigilEvent};
use vigil_common::time;
use vigil_common::types::{
    default_filters, AdjustmentNotification, Detection, FilterCategory, Modality, OverrideType,
    RiskLevel,
};

use crate::analysis::{AudioAnalysis, AudioContext, DetectionSource};
use crate::db::ProfileStore;
use crate::engine::learning::{AdjustmentOutcome, LearningEngine};
use crate::engine::scheduler::{CancelOutcome, DelayScheduler, ScheduleOutcome, SchedulerStats};
use crate::engine::decision;
use crate::{Error, Result};

/// One media chunk submitted for analysis
///
/// Payloads are opaque base64 strings handed through to the detection
/// source; Vigil never decodes media itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaChunk {
    #[serde(default)]
    pub video_frame: Option<String>,
    #[serde(default)]
    pub audio_chunk: Option<String>,
    /// Position on the stream timeline; defaults to the current wall clock
    #[serde(default)]
    pub origin_ms: Option<u64>,
}

/// A user override arriving from the control surface
#[derive(Debug, Clone, Deserialize)]
pub struct OverrideEvent {
    /// Scheduled filter to cancel, when the override targets one
    #[serde(default)]
    pub detection_id: Option<Uuid>,
    pub category: FilterCategory,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub override_type: OverrideType,
}

/// Summary of one ingested chunk
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IngestSummary {
    pub detections: usize,
    pub scheduled: usize,
    pub risk: RiskLevel,
}

/// One retained history entry for retrospective safety queries
#[derive(Debug, Clone, Serialize)]
pub struct SafetyEvent {
    pub timestamp_ms: u64,
    pub detections: Vec<Detection>,
    pub risk: RiskLevel,
}

/// Filter criteria for a retrospective safety search
#[derive(Debug, Clone, Default)]
pub struct SafetyQuery {
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
    pub categories: Vec<FilterCategory>,
}

/// Aggregate counters for one stream session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub stream_id: Uuid,
    pub user_id: String,
    pub started_at_ms: u64,
    pub uptime_ms: u64,
    pub viewer_count: usize,
    pub chunks: u64,
    pub scheduled: u64,
    pub fired: u64,
    pub cancelled: u64,
    pub overrides: u64,
}

/// Carried-over audio severity signal
///
/// The previous chunk's peak tension biases the next chunk's analysis
/// context.
#[derive(Debug, Clone, Copy, Default)]
struct TensionContext {
    previous_tension: f64,
    chunk_count: u64,
}

/// Per-stream state owned by the coordinator
pub struct StreamSession {
    stream_id: Uuid,
    user_id: String,
    started_at_ms: u64,
    viewers: RwLock<HashSet<String>>,
    tension: RwLock<TensionContext>,
    history: RwLock<VecDeque<SafetyEvent>>,
    scheduler: DelayScheduler,
    chunks: AtomicU64,
    overrides: AtomicU64,
}

impl StreamSession {
    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Scheduler counters for this stream
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Number of entries currently held in the delay buffer
    pub async fn pending_filters(&self) -> usize {
        self.scheduler.pending_count().await
    }
}

/// Coordinates all active stream sessions
pub struct SessionCoordinator {
    config: VigilConfig,
    store: Arc<dyn ProfileStore>,
    source: Arc<dyn DetectionSource>,
    learning: Arc<LearningEngine>,
    events: EventBus,
    sessions: RwLock<HashMap<Uuid, Arc<StreamSession>>>,
}

impl SessionCoordinator {
    pub fn new(
        config: VigilConfig,
        store: Arc<dyn ProfileStore>,
        source: Arc<dyn DetectionSource>,
        learning: Arc<LearningEngine>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            store,
            source,
            learning,
            events,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Output boundary event bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start a stream session for a user
    pub async fn start_stream(&self, user_id: &str) -> Arc<StreamSession> {
        let stream_id = Uuid::new_v4();
        let scheduler = DelayScheduler::new(
            stream_id,
            self.config.buffer.effective_delay_ms(),
            self.config.buffer.max_pending_filters,
            self.events.clone(),
        );

        let session = Arc::new(StreamSession {
            stream_id,
            user_id: user_id.to_string(),
            started_at_ms: time::now_ms(),
            viewers: RwLock::new(HashSet::new()),
            tension: RwLock::new(TensionContext::default()),
            history: RwLock::new(VecDeque::new()),
            scheduler,
            chunks: AtomicU64::new(0),
            overrides: AtomicU64::new(0),
        });

        self.sessions
            .write()
            .await
            .insert(stream_id, session.clone());

        info!(stream = %stream_id, user = user_id, "stream started");
        self.events.emit_lossy(VigilEvent::StreamStarted {
            stream_id,
            user_id: user_id.to_string(),
            timestamp: time::now(),
        });
        session
    }

    /// Stop a stream session
    ///
    /// Force-cancels every pending filter without generating override
    /// records (teardown is not a user choice). Returns the number of
    /// entries cancelled.
    pub async fn stop_stream(&self, stream_id: Uuid) -> Result<usize> {
        let session = self
            .sessions
            .write()
            .await
            .remove(&stream_id)
            .ok_or_else(|| Error::NotFound(format!("stream {}", stream_id)))?;

        let cancelled = session.scheduler.teardown().await;
        info!(stream = %stream_id, cancelled, "stream stopped");
        self.events.emit_lossy(VigilEvent::StreamStopped {
            stream_id,
            cancelled_pending: cancelled,
            timestamp: time::now(),
        });
        Ok(cancelled)
    }

    /// Register a viewer on a stream
    pub async fn add_viewer(&self, stream_id: Uuid, viewer_id: &str) -> Result<usize> {
        let session = self.session(stream_id).await?;
        let count = {
            let mut viewers = session.viewers.write().await;
            viewers.insert(viewer_id.to_string());
            viewers.len()
        };
        self.events.emit_lossy(VigilEvent::ViewerJoined {
            stream_id,
            viewer_id: viewer_id.to_string(),
            viewer_count: count,
            timestamp: time::now(),
        });
        Ok(count)
    }

    /// Remove a viewer from a stream
    pub async fn remove_viewer(&self, stream_id: Uuid, viewer_id: &str) -> Result<usize> {
        let session = self.session(stream_id).await?;
        let count = {
            let mut viewers = session.viewers.write().await;
            viewers.remove(viewer_id);
            viewers.len()
        };
        self.events.emit_lossy(VigilEvent::ViewerLeft {
            stream_id,
            viewer_id: viewer_id.to_string(),
            viewer_count: count,
            timestamp: time::now(),
        });
        Ok(count)
    }

    /// Ingest one media chunk
    ///
    /// Video and audio analysis run concurrently and never block one
    /// another; a failed or timed-out analysis yields no detections and a
    /// structured warning (fail-open). Detections that survive validation
    /// run through the decision engine and surviving instructions enter the
    /// delay buffer.
    pub async fn ingest_chunk(&self, stream_id: Uuid, chunk: MediaChunk) -> Result<IngestSummary> {
        let session = self.session(stream_id).await?;
        let origin_ms = chunk.origin_ms.unwrap_or_else(time::now_ms);
        session.chunks.fetch_add(1, Ordering::Relaxed);

        let audio_context = {
            let tension = session.tension.read().await;
            AudioContext {
                previous_tension: tension.previous_tension,
                chunk_count: tension.chunk_count,
                stream_duration_ms: origin_ms.saturating_sub(session.started_at_ms),
            }
        };

        let video_task = async {
            match &chunk.video_frame {
                Some(frame) => {
                    self.analyze_video_fail_open(stream_id, frame, origin_ms)
                        .await
                }
                None => Vec::new(),
            }
        };
        let audio_task = async {
            match &chunk.audio_chunk {
                Some(audio) => Some(
                    self.analyze_audio_fail_open(stream_id, audio, origin_ms, &audio_context)
                        .await,
                ),
                None => None,
            }
        };
        let (video_detections, audio_analysis) = tokio::join!(video_task, audio_task);

        let mut detections = video_detections;
        if let Some(audio) = audio_analysis {
            let peak = audio
                .detections
                .iter()
                .map(|d| d.confidence)
                .fold(0.0_f64, f64::max);
            {
                let mut tension = session.tension.write().await;
                if let Some(score) = audio.tension {
                    tension.previous_tension = score;
                } else if !audio.detections.is_empty() {
                    tension.previous_tension = peak;
                }
                tension.chunk_count += 1;
            }
            detections.extend(audio.detections);
        }

        // Malformed detections are dropped, never fatal
        let valid: Vec<Detection> = detections
            .into_iter()
            .filter(|d| match d.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(stream = %stream_id, "dropping malformed detection: {}", e);
                    false
                }
            })
            .collect();

        let mut filters = match self.store.active_profile(&session.user_id).await {
            Ok(Some(profile)) => profile.filters,
            Ok(None) => default_filters(),
            Err(e) => {
                warn!(
                    user = %session.user_id,
                    "profile load failed, using defaults: {}", e
                );
                default_filters()
            }
        };
        // Carried-over tension from the previous chunk biases this decision
        decision::adjust_for_tension(&mut filters, audio_context.previous_tension);
        let learned = self.learning.learned_preferences(&session.user_id).await;

        let mut scheduled = 0;
        for detection in &valid {
            let Some(instruction) = decision::decide(detection, &filters, &learned) else {
                continue;
            };
            match session
                .scheduler
                .schedule(detection.category, instruction)
                .await
            {
                ScheduleOutcome::Scheduled { .. } => {
                    scheduled += 1;
                    self.learning
                        .record_trigger(
                            &session.user_id,
                            detection.category,
                            detection.subcategory.as_deref(),
                        )
                        .await;
                }
                ScheduleOutcome::Duplicate => {
                    debug!(stream = %stream_id, detection = %detection.id, "duplicate detection id, not rescheduled");
                }
                ScheduleOutcome::Closed => {
                    warn!(stream = %stream_id, "chunk arrived after teardown, instruction dropped");
                }
            }
        }

        let risk = classify_risk(&valid);
        if !valid.is_empty() {
            {
                let mut history = session.history.write().await;
                if history.len() >= self.config.buffer.history_limit {
                    history.pop_front();
                }
                history.push_back(SafetyEvent {
                    timestamp_ms: origin_ms,
                    detections: valid.clone(),
                    risk,
                });
            }
            if let Err(e) = self.store.append_detections(&session.user_id, &valid).await {
                warn!(user = %session.user_id, "failed to persist detections: {}", e);
            }
        }

        Ok(IngestSummary {
            detections: valid.len(),
            scheduled,
            risk,
        })
    }

    /// Handle a user override
    ///
    /// Cancels the targeted pending filter when one is named (a cancel that
    /// lost the race to the deadline is a logged no-op), records the
    /// override, and emits an adjustment proposal when the override pattern
    /// warrants one.
    pub async fn handle_override(
        &self,
        stream_id: Uuid,
        event: OverrideEvent,
    ) -> Result<Option<AdjustmentNotification>> {
        let session = self.session(stream_id).await?;

        if let Some(detection_id) = event.detection_id {
            match session
                .scheduler
                .cancel(detection_id, CancelReason::UserOverride)
                .await
            {
                CancelOutcome::Cancelled => {
                    debug!(stream = %stream_id, detection = %detection_id, "filter cancelled by override")
                }
                CancelOutcome::AlreadyResolved => {
                    debug!(stream = %stream_id, detection = %detection_id, "override arrived after resolution")
                }
            }
        }

        session.overrides.fetch_add(1, Ordering::Relaxed);
        self.learning
            .record_override(
                &session.user_id,
                event.category,
                event.subcategory.as_deref(),
                event.override_type,
                &stream_id.to_string(),
            )
            .await;

        let proposal = self
            .learning
            .check_for_adjustment(
                &session.user_id,
                event.category,
                event.subcategory.as_deref(),
            )
            .await;

        match proposal {
            Some(proposal) => {
                self.events.emit_lossy(VigilEvent::AdjustmentProposed {
                    user_id: session.user_id.clone(),
                    notification: proposal.notification.clone(),
                    expires_at_ms: proposal.expires_at_ms,
                    timestamp: time::now(),
                });
                Ok(Some(proposal.notification))
            }
            None => Ok(None),
        }
    }

    /// Handle a user's answer to a pending adjustment proposal
    pub async fn handle_adjustment_response(
        &self,
        user_id: &str,
        category: FilterCategory,
        subcategory: Option<&str>,
        accepted: bool,
    ) -> AdjustmentOutcome {
        let outcome = self
            .learning
            .process_adjustment_response(user_id, category, subcategory, accepted)
            .await;

        match &outcome {
            AdjustmentOutcome::Committed(preference) => {
                self.events.emit_lossy(VigilEvent::AdjustmentCommitted {
                    user_id: user_id.to_string(),
                    preference: preference.clone(),
                    timestamp: time::now(),
                });
            }
            AdjustmentOutcome::Expired => {
                self.events.emit_lossy(VigilEvent::AdjustmentExpired {
                    user_id: user_id.to_string(),
                    category,
                    subcategory: subcategory.map(String::from),
                    timestamp: time::now(),
                });
            }
            AdjustmentOutcome::Rejected | AdjustmentOutcome::NoProposal => {}
        }
        outcome
    }

    /// Retrospective safety search over the stream's detection history
    pub async fn safety_search(
        &self,
        stream_id: Uuid,
        query: &SafetyQuery,
    ) -> Result<Vec<SafetyEvent>> {
        let session = self.session(stream_id).await?;
        let history = session.history.read().await;
        Ok(history
            .iter()
            .filter(|event| {
                query.start_ms.map_or(true, |s| event.timestamp_ms >= s)
                    && query.end_ms.map_or(true, |e| event.timestamp_ms <= e)
                    && (query.categories.is_empty()
                        || event
                            .detections
                            .iter()
                            .any(|d| query.categories.contains(&d.category)))
            })
            .cloned()
            .collect())
    }

    /// Aggregate counters for one stream
    pub async fn session_stats(&self, stream_id: Uuid) -> Result<SessionStats> {
        let session = self.session(stream_id).await?;
        let scheduler = session.scheduler.stats();
        let viewer_count = session.viewers.read().await.len();
        Ok(SessionStats {
            stream_id,
            user_id: session.user_id.clone(),
            started_at_ms: session.started_at_ms,
            uptime_ms: time::now_ms().saturating_sub(session.started_at_ms),
            viewer_count,
            chunks: session.chunks.load(Ordering::Relaxed),
            scheduled: scheduler.scheduled,
            fired: scheduler.fired,
            cancelled: scheduler.cancelled,
            overrides: session.overrides.load(Ordering::Relaxed),
        })
    }

    /// Ids of all active streams
    pub async fn active_streams(&self) -> Vec<Uuid> {
        self.sessions.read().await.keys().copied().collect()
    }

    async fn session(&self, stream_id: Uuid) -> Result<Arc<StreamSession>> {
        self.sessions
            .read()
            .await
            .get(&stream_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("stream {}", stream_id)))
    }

    async fn analyze_video_fail_open(
        &self,
        stream_id: Uuid,
        frame: &str,
        origin_ms: u64,
    ) -> Vec<Detection> {
        let timeout = Duration::from_millis(self.config.analysis.timeout_ms);
        match tokio::time::timeout(timeout, self.source.analyze_video(frame, stream_id, origin_ms))
            .await
        {
            Ok(Ok(detections)) => detections,
            Ok(Err(e)) => {
                self.warn_analysis(stream_id, Modality::Visual, e.to_string());
                Vec::new()
            }
            Err(_) => {
                self.warn_analysis(
                    stream_id,
                    Modality::Visual,
                    format!("analysis timed out after {}ms", timeout.as_millis()),
                );
                Vec::new()
            }
        }
    }

    async fn analyze_audio_fail_open(
        &self,
        stream_id: Uuid,
        audio: &str,
        origin_ms: u64,
        context: &AudioContext,
    ) -> AudioAnalysis {
        let timeout = Duration::from_millis(self.config.analysis.timeout_ms);
        match tokio::time::timeout(
            timeout,
            self.source.analyze_audio(audio, stream_id, origin_ms, context),
        )
        .await
        {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) => {
                self.warn_analysis(stream_id, Modality::Audio, e.to_string());
                AudioAnalysis::default()
            }
            Err(_) => {
                self.warn_analysis(
                    stream_id,
                    Modality::Audio,
                    format!("analysis timed out after {}ms", timeout.as_millis()),
                );
                AudioAnalysis::default()
            }
        }
    }

    fn warn_analysis(&self, stream_id: Uuid, modality: Modality, message: String) {
        warn!(stream = %stream_id, ?modality, "{}", message);
        self.events.emit_lossy(VigilEvent::AnalysisWarning {
            stream_id,
            modality,
            message,
            timestamp: time::now(),
        });
    }
}

/// Coarse risk classification over a detection window
pub fn classify_risk(detections: &[Detection]) -> RiskLevel {
    if detections.is_empty() {
        return RiskLevel::None;
    }
    let mean =
        detections.iter().map(|d| d.confidence).sum::<f64>() / detections.len() as f64;
    if mean > 0.9 {
        RiskLevel::High
    } else if mean > 0.7 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::types::Modality;

    fn detection(confidence: f64) -> Detection {
        Detection {
            id: Uuid::new_v4(),
            category: FilterCategory::Violence,
            subcategory: None,
            confidence,
            origin_ms: 0,
            duration_ms: None,
            region: None,
            modality: Modality::Visual,
        }
    }

    #[test]
    fn test_risk_classification_boundaries() {
        assert_eq!(classify_risk(&[]), RiskLevel::None);
        assert_eq!(classify_risk(&[detection(0.95)]), RiskLevel::High);
        // Exactly 0.9 is medium, not high
        assert_eq!(classify_risk(&[detection(0.9)]), RiskLevel::Medium);
        assert_eq!(classify_risk(&[detection(0.75)]), RiskLevel::Medium);
        // Exactly 0.7 is low
        assert_eq!(classify_risk(&[detection(0.7)]), RiskLevel::Low);
        assert_eq!(classify_risk(&[detection(0.2)]), RiskLevel::Low);
        // Mean of 0.95 and 0.65 is 0.8: medium
        assert_eq!(
            classify_risk(&[detection(0.95), detection(0.65)]),
            RiskLevel::Medium
        );
    }
}

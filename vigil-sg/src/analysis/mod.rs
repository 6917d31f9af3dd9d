//! Detection source seam
//!
//! The content classifier is an external collaborator. The coordinator
//! consumes it through [`DetectionSource`] and wraps every call in a
//! timeout: a failed or unresponsive analyzer yields no detections and the
//! pipeline stays fail-open rather than stalling buffer release.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vigil_common::types::Detection;

use crate::{Error, Result};

/// Carried-over analysis context for one stream's audio
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AudioContext {
    /// Peak severity observed in the previous audio chunk
    pub previous_tension: f64,
    /// Number of audio chunks analyzed so far
    pub chunk_count: u64,
    /// Time since the stream started (ms)
    pub stream_duration_ms: u64,
}

/// Result of analyzing one audio chunk
#[derive(Debug, Clone, Default)]
pub struct AudioAnalysis {
    pub detections: Vec<Detection>,
    /// Tension score carried into the next chunk's context
    pub tension: Option<f64>,
}

/// External content classifier
///
/// Implementations analyze opaque media payloads and return detections on
/// the stream timeline. Errors are surfaced so the caller can fail open;
/// an implementation must never block indefinitely.
#[async_trait]
pub trait DetectionSource: Send + Sync {
    /// Identifier for logs
    fn source_id(&self) -> &'static str;

    /// Analyze one video frame
    async fn analyze_video(
        &self,
        frame_b64: &str,
        stream_id: Uuid,
        origin_ms: u64,
    ) -> Result<Vec<Detection>>;

    /// Analyze one audio chunk with the stream's tension context
    async fn analyze_audio(
        &self,
        audio_b64: &str,
        stream_id: Uuid,
        origin_ms: u64,
        context: &AudioContext,
    ) -> Result<AudioAnalysis>;

    /// Whether the source can currently serve requests
    fn is_available(&self) -> bool {
        true
    }
}

/// Source used when no analyzer is configured
///
/// Always returns empty results, which leaves content passing through the
/// buffer unfiltered.
pub struct NullSource;

#[async_trait]
impl DetectionSource for NullSource {
    fn source_id(&self) -> &'static str {
        "null"
    }

    async fn analyze_video(
        &self,
        _frame_b64: &str,
        _stream_id: Uuid,
        _origin_ms: u64,
    ) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }

    async fn analyze_audio(
        &self,
        _audio_b64: &str,
        _stream_id: Uuid,
        _origin_ms: u64,
        _context: &AudioContext,
    ) -> Result<AudioAnalysis> {
        Ok(AudioAnalysis::default())
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize)]
struct VideoAnalyzeRequest<'a> {
    frame: &'a str,
    stream_id: Uuid,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct AudioAnalyzeRequest<'a> {
    audio: &'a str,
    stream_id: Uuid,
    timestamp: u64,
    context: AudioContext,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    detections: Vec<Detection>,
    #[serde(default)]
    tension: Option<f64>,
}

/// HTTP-backed detection source
///
/// Posts media payloads to an external analyzer service
/// (`POST {base}/analyze/video`, `POST {base}/analyze/audio`).
pub struct HttpDetectionSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDetectionSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<AnalyzeResponse> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Analysis(format!("analyzer request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Analysis(format!(
                "analyzer returned {} for {}",
                response.status(),
                url
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Analysis(format!("malformed analyzer reply: {}", e)))
    }
}

#[async_trait]
impl DetectionSource for HttpDetectionSource {
    fn source_id(&self) -> &'static str {
        "http"
    }

    async fn analyze_video(
        &self,
        frame_b64: &str,
        stream_id: Uuid,
        origin_ms: u64,
    ) -> Result<Vec<Detection>> {
        let request = VideoAnalyzeRequest {
            frame: frame_b64,
            stream_id,
            timestamp: origin_ms,
        };
        let response = self.post("/analyze/video", &request).await?;
        Ok(response.detections)
    }

    async fn analyze_audio(
        &self,
        audio_b64: &str,
        stream_id: Uuid,
        origin_ms: u64,
        context: &AudioContext,
    ) -> Result<AudioAnalysis> {
        let request = AudioAnalyzeRequest {
            audio: audio_b64,
            stream_id,
            timestamp: origin_ms,
            context: *context,
        };
        let response = self.post("/analyze/audio", &request).await?;
        Ok(AudioAnalysis {
            detections: response.detections,
            tension: response.tension,
        })
    }
}

//! Cloud adapters
//!
//! [`CloudExecutor`] runs the upload, submit, wait and cleanup sequence
//! against the remote job service. [`CloudTranscriber`] and
//! [`CloudDiarizer`] put a capability face on it, convert the remote output
//! and fall back to a local provider when the failure allows it.

use async_trait::async_trait;
use podscribe_core::domain::transcript::{SpeakerTurn, Transcript, TranscriptSegment};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Diarizer, Transcriber};
use crate::config::{CloudConfig, ProviderConfig};
use crate::error::{ProviderError, Result};
use crate::progress::ProgressReporter;
use crate::remote::{PollOptions, RemoteJobClient};
use crate::storage::{ObjectUploader, PresignedObject, object_key};

/// Whether a failed remote execution should be retried locally
///
/// Exactly: the error is recoverable, fallback is enabled, and a local
/// provider exists.
pub fn should_fall_back(error: &ProviderError, fallback_enabled: bool, has_local: bool) -> bool {
    error.recoverable && fallback_enabled && has_local
}

/// Drives one remote execution for a single job
pub struct CloudExecutor {
    jobs: Arc<dyn RemoteJobClient>,
    uploader: Arc<dyn ObjectUploader>,
    poll: PollOptions,
    presign_ttl: Duration,
    fallback_enabled: bool,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl CloudExecutor {
    /// Builds an executor after validating `config`
    ///
    /// Validation happens here so a bad configuration fails before anything
    /// is uploaded.
    pub fn new(
        config: &CloudConfig,
        jobs: Arc<dyn RemoteJobClient>,
        uploader: Arc<dyn ObjectUploader>,
        provider: &ProviderConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            jobs,
            uploader,
            poll: PollOptions {
                timeout: config.timeout,
                poll_interval: config.poll_interval,
            },
            presign_ttl: config.presign_ttl,
            fallback_enabled: config.fallback_enabled,
            progress: provider.progress.clone(),
            cancel: provider.cancel.clone(),
        })
    }

    /// Uploads `audio`, runs the remote job with `params` and returns its raw
    /// output
    ///
    /// The uploaded object is deleted on every path once it exists.
    pub async fn execute(
        &self,
        audio: &Path,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        if self.cancel.is_cancelled() {
            return Err(ProviderError::cancelled());
        }

        self.progress.step(5.0, "upload", "uploading audio");

        let key = object_key(audio);
        let object = tokio::select! {
            _ = self.cancel.cancelled() => {
                // The upload may have reached the store before it was dropped
                self.uploader.delete(&key).await;
                return Err(ProviderError::cancelled());
            }
            object = self.uploader.upload_and_presign(audio, &key, self.presign_ttl) => object?,
        };

        let outcome = self.run_remote(&object, params).await;

        self.uploader.delete(&object.key).await;

        outcome
    }

    async fn run_remote(
        &self,
        object: &PresignedObject,
        mut params: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value> {
        params.insert("audio_url".to_string(), object.url.clone().into());

        self.progress.step(15.0, "submit", "submitting remote job");

        let job_id = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ProviderError::cancelled()),
            id = self.jobs.submit(serde_json::Value::Object(params)) => id?,
        };

        info!("Submitted remote job {}", job_id);

        let progress = self.progress.clone();
        let on_progress = move |message: &str| progress.message(message);

        let output = self
            .jobs
            .wait_for_completion(&job_id, self.poll, &on_progress, &self.cancel)
            .await?;

        self.progress.step(90.0, "convert", "remote job finished");
        Ok(output)
    }

    /// Resolves a remote failure, running `local` when the error allows it
    async fn recover<T, F>(&self, capability: &str, error: ProviderError, local: Option<F>) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        if !should_fall_back(&error, self.fallback_enabled, local.is_some()) {
            return Err(error);
        }

        if self.cancel.is_cancelled() {
            return Err(ProviderError::cancelled());
        }

        let Some(local) = local else {
            return Err(error);
        };

        warn!("Cloud {} failed, falling back to local: {}", capability, error);
        self.progress.step(
            50.0,
            "fallback",
            format!("cloud {} failed, running locally", capability),
        );

        local.await
    }
}

fn optional_params(
    entries: [(&str, Option<serde_json::Value>); 2],
) -> serde_json::Map<String, serde_json::Value> {
    entries
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
        .collect()
}

#[derive(Debug, Deserialize)]
struct RemoteTranscript {
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    detected_language: Option<String>,
}

/// Converts the remote ASR output into a [`Transcript`]
///
/// Outputs with only a `text` field become a single untimed segment.
fn transcript_from_output(output: serde_json::Value) -> Result<Transcript> {
    let remote: RemoteTranscript = serde_json::from_value(output)
        .map_err(|e| ProviderError::unexpected(format!("unexpected ASR output: {}", e)))?;

    let segments = match (remote.segments.is_empty(), remote.text) {
        (true, Some(text)) if !text.trim().is_empty() => vec![TranscriptSegment {
            start: 0.0,
            end: 0.0,
            text,
            speaker: None,
        }],
        _ => remote.segments,
    };

    Ok(Transcript {
        segments,
        language: remote.language.or(remote.detected_language),
    })
}

#[derive(Debug, Deserialize)]
struct RemoteTurns {
    segments: Vec<SpeakerTurn>,
}

fn turns_from_output(output: serde_json::Value) -> Result<Vec<SpeakerTurn>> {
    serde_json::from_value::<RemoteTurns>(output)
        .map(|r| r.segments)
        .map_err(|e| ProviderError::unexpected(format!("unexpected diarization output: {}", e)))
}

/// ASR on the remote job service with optional local fallback
pub struct CloudTranscriber {
    executor: CloudExecutor,
    language: Option<String>,
    fallback: Option<Arc<dyn Transcriber>>,
}

impl CloudTranscriber {
    pub fn new(
        executor: CloudExecutor,
        config: &ProviderConfig,
        fallback: Option<Arc<dyn Transcriber>>,
    ) -> Self {
        Self {
            executor,
            language: config.language.clone(),
            fallback,
        }
    }

    async fn transcribe_remote(&self, audio: &Path) -> Result<Transcript> {
        let params = optional_params([
            ("language", self.language.clone().map(Into::into)),
            ("word_timestamps", Some(true.into())),
        ]);
        let output = self.executor.execute(audio, params).await?;
        transcript_from_output(output)
    }
}

#[async_trait]
impl Transcriber for CloudTranscriber {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn transcribe(&self, audio: &Path) -> Result<Transcript> {
        match self.transcribe_remote(audio).await {
            Ok(transcript) => Ok(transcript),
            Err(error) => {
                let local = self.fallback.as_ref().map(|p| p.transcribe(audio));
                self.executor.recover("transcription", error, local).await
            }
        }
    }
}

/// Diarization on the remote job service with optional local fallback
pub struct CloudDiarizer {
    executor: CloudExecutor,
    min_speakers: Option<u32>,
    max_speakers: Option<u32>,
    fallback: Option<Arc<dyn Diarizer>>,
}

impl CloudDiarizer {
    pub fn new(
        executor: CloudExecutor,
        config: &ProviderConfig,
        fallback: Option<Arc<dyn Diarizer>>,
    ) -> Self {
        Self {
            executor,
            min_speakers: config.min_speakers,
            max_speakers: config.max_speakers,
            fallback,
        }
    }

    async fn diarize_remote(&self, audio: &Path) -> Result<Vec<SpeakerTurn>> {
        let params = optional_params([
            ("min_speakers", self.min_speakers.map(Into::into)),
            ("max_speakers", self.max_speakers.map(Into::into)),
        ]);
        let output = self.executor.execute(audio, params).await?;
        turns_from_output(output)
    }
}

#[async_trait]
impl Diarizer for CloudDiarizer {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn diarize(&self, audio: &Path) -> Result<Vec<SpeakerTurn>> {
        match self.diarize_remote(audio).await {
            Ok(turns) => Ok(turns),
            Err(error) => {
                let local = self.fallback.as_ref().map(|p| p.diarize(audio));
                self.executor.recover("diarization", error, local).await
            }
        }
    }
}

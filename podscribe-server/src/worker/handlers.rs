//! Job handlers, one per job type

use podscribe_cloud::{
    Diarizer, ErrorKind, LlmAnalyzer, LlmConfig, ProgressReporter, ProviderConfig,
    ProviderContext, ProviderError, ProviderKind, ProviderRegistry, Transcriber, assign_speakers,
};
use podscribe_core::domain::job::{Job, JobType};
use podscribe_core::domain::transcript::{SpeakerTurn, Transcript};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Provider registries and the selected backends
pub struct Capabilities {
    pub asr: ProviderRegistry<dyn Transcriber>,
    pub diarization: ProviderRegistry<dyn Diarizer>,
    pub context: ProviderContext,
    pub asr_provider: String,
    pub diarization_provider: String,
    pub llm: Option<LlmConfig>,
}

impl Capabilities {
    /// Built-in registries with local backends selected
    pub fn new(context: ProviderContext) -> Self {
        Self {
            asr: ProviderRegistry::asr(),
            diarization: ProviderRegistry::diarization(),
            context,
            asr_provider: ProviderKind::Local.as_str().to_string(),
            diarization_provider: ProviderKind::Local.as_str().to_string(),
            llm: None,
        }
    }

    fn transcriber(&self, config: &ProviderConfig) -> Result<Arc<dyn Transcriber>, HandlerError> {
        Ok(self.asr.create(&self.asr_provider, &self.context, config)?)
    }

    fn diarizer(&self, config: &ProviderConfig) -> Result<Arc<dyn Diarizer>, HandlerError> {
        Ok(self
            .diarization
            .create(&self.diarization_provider, &self.context, config)?)
    }
}

/// Why a job handler did not produce a result
#[derive(Debug)]
pub enum HandlerError {
    MissingInput(&'static str),
    InvalidInput(String),
    Provider(ProviderError),
    Panicked(String),
}

impl HandlerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HandlerError::Provider(e) if e.kind == ErrorKind::Cancelled)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::MissingInput(key) => write!(f, "Missing required input '{}'", key),
            HandlerError::InvalidInput(msg) => f.write_str(msg),
            HandlerError::Provider(e) => write!(f, "{}", e),
            HandlerError::Panicked(msg) => write!(f, "Job handler panicked: {}", msg),
        }
    }
}

impl From<ProviderError> for HandlerError {
    fn from(err: ProviderError) -> Self {
        HandlerError::Provider(err)
    }
}

/// Runs `job` and returns the value stored as its result
pub async fn execute(
    capabilities: Arc<Capabilities>,
    job: Job,
    progress: ProgressReporter,
    cancel: CancellationToken,
) -> Result<Value, HandlerError> {
    if cancel.is_cancelled() {
        return Err(ProviderError::cancelled().into());
    }

    debug!("Dispatching job {} to the {} handler", job.id, job.job_type);

    match job.job_type {
        JobType::Transcribe => transcribe(&capabilities, &job, progress, cancel).await,
        JobType::Diarize => diarize(&capabilities, &job, progress, cancel).await,
        JobType::Pipeline => pipeline(&capabilities, &job, progress, cancel).await,
        JobType::Analyze => analyze(&capabilities, &job, progress, cancel).await,
    }
}

fn audio_path(job: &Job) -> Result<PathBuf, HandlerError> {
    job.input_str("audio_path")
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .ok_or(HandlerError::MissingInput("audio_path"))
}

fn provider_config(job: &Job, progress: ProgressReporter, cancel: CancellationToken) -> ProviderConfig {
    ProviderConfig {
        language: job.input_str("language").map(String::from),
        device: job.input_str("device").map(String::from),
        min_speakers: job.input_u32("min_speakers"),
        max_speakers: job.input_u32("max_speakers"),
        progress,
        cancel,
    }
}

fn speakers(turns: &[SpeakerTurn]) -> Vec<&str> {
    turns
        .iter()
        .map(|t| t.speaker.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn transcript_result(transcript: &Transcript, provider: &str) -> Value {
    json!({
        "provider": provider,
        "language": transcript.language,
        "text": transcript.text(),
        "segments": transcript.segments,
    })
}

async fn transcribe(
    capabilities: &Capabilities,
    job: &Job,
    progress: ProgressReporter,
    cancel: CancellationToken,
) -> Result<Value, HandlerError> {
    let audio = audio_path(job)?;
    progress.step(0.0, "transcribe", "starting transcription");

    let config = provider_config(job, progress.stage(0.0, 95.0), cancel);
    let transcriber = capabilities.transcriber(&config)?;
    let transcript = transcriber.transcribe(&audio).await?;

    progress.step(100.0, "transcribe", "transcription finished");
    Ok(transcript_result(&transcript, transcriber.name()))
}

async fn diarize(
    capabilities: &Capabilities,
    job: &Job,
    progress: ProgressReporter,
    cancel: CancellationToken,
) -> Result<Value, HandlerError> {
    let audio = audio_path(job)?;
    progress.step(0.0, "diarize", "starting diarization");

    let config = provider_config(job, progress.stage(0.0, 95.0), cancel);
    let diarizer = capabilities.diarizer(&config)?;
    let turns = diarizer.diarize(&audio).await?;

    progress.step(100.0, "diarize", "diarization finished");
    Ok(json!({
        "provider": diarizer.name(),
        "speakers": speakers(&turns),
        "segments": turns,
    }))
}

/// Transcribe, diarize, then label transcript segments with speakers
async fn pipeline(
    capabilities: &Capabilities,
    job: &Job,
    progress: ProgressReporter,
    cancel: CancellationToken,
) -> Result<Value, HandlerError> {
    let audio = audio_path(job)?;

    progress.step(0.0, "transcribe", "starting transcription");
    let config = provider_config(job, progress.stage(0.0, 50.0), cancel.clone());
    let mut transcript = capabilities.transcriber(&config)?.transcribe(&audio).await?;

    if cancel.is_cancelled() {
        return Err(ProviderError::cancelled().into());
    }

    progress.step(50.0, "diarize", "starting diarization");
    let config = provider_config(job, progress.stage(50.0, 90.0), cancel);
    let turns = capabilities.diarizer(&config)?.diarize(&audio).await?;

    progress.step(90.0, "align", "assigning speakers to segments");
    assign_speakers(&mut transcript.segments, &turns);

    progress.step(100.0, "align", "pipeline finished");
    Ok(json!({
        "language": transcript.language,
        "text": transcript.text(),
        "speakers": speakers(&turns),
        "segments": transcript.segments,
    }))
}

/// Text of the `transcript` input: a string or a transcript object
fn transcript_text(job: &Job) -> Result<String, HandlerError> {
    let value = job
        .input
        .get("transcript")
        .ok_or(HandlerError::MissingInput("transcript"))?;

    let text = match value {
        Value::String(text) => text.clone(),
        other => serde_json::from_value::<Transcript>(other.clone())
            .map(|t| t.text())
            .map_err(|e| HandlerError::InvalidInput(format!("Invalid transcript input: {}", e)))?,
    };

    if text.trim().is_empty() {
        return Err(HandlerError::InvalidInput("Transcript is empty".to_string()));
    }
    Ok(text)
}

async fn analyze(
    capabilities: &Capabilities,
    job: &Job,
    progress: ProgressReporter,
    cancel: CancellationToken,
) -> Result<Value, HandlerError> {
    let text = transcript_text(job)?;
    let llm = capabilities.llm.as_ref().ok_or_else(|| {
        ProviderError::invalid_config("analysis requires LLM_API_URL and LLM_MODEL")
    })?;
    let analyzer = LlmAnalyzer::new(llm)?;

    progress.step(10.0, "analyze", "requesting analysis");
    let summary = tokio::select! {
        _ = cancel.cancelled() => return Err(ProviderError::cancelled().into()),
        summary = analyzer.analyze(&text, job.input_str("prompt")) => summary?,
    };

    progress.step(100.0, "analyze", "analysis finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use podscribe_core::domain::job::JobInput;

    fn job(job_type: JobType, input: Value) -> Job {
        let input: JobInput = serde_json::from_value(input).unwrap();
        Job::new(job_type, input)
    }

    #[test]
    fn test_provider_config_from_input() {
        let job = job(
            JobType::Diarize,
            json!({"audio_path": "/a.wav", "language": "de", "min_speakers": 2, "max_speakers": 3}),
        );
        let config = provider_config(&job, ProgressReporter::noop(), CancellationToken::new());

        assert_eq!(config.language.as_deref(), Some("de"));
        assert_eq!(config.min_speakers, Some(2));
        assert_eq!(config.max_speakers, Some(3));
        assert_eq!(config.device, None);
    }

    #[test]
    fn test_transcript_text_input() {
        let plain = job(JobType::Analyze, json!({"transcript": "hello there"}));
        assert_eq!(transcript_text(&plain).unwrap(), "hello there");

        let structured = job(
            JobType::Analyze,
            json!({"transcript": {"segments": [
                {"start": 0.0, "end": 1.0, "text": "hello"},
                {"start": 1.0, "end": 2.0, "text": "again"}
            ]}}),
        );
        assert_eq!(transcript_text(&structured).unwrap(), "hello again");

        let missing = job(JobType::Analyze, json!({}));
        assert!(matches!(
            transcript_text(&missing),
            Err(HandlerError::MissingInput("transcript"))
        ));

        let blank = job(JobType::Analyze, json!({"transcript": "  "}));
        assert!(matches!(
            transcript_text(&blank),
            Err(HandlerError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_analyze_without_llm_fails() {
        let capabilities = Arc::new(Capabilities::new(ProviderContext::default()));
        let job = job(JobType::Analyze, json!({"transcript": "hello"}));

        let err = execute(capabilities, job, ProgressReporter::noop(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("LLM_API_URL"));
    }

    #[tokio::test]
    async fn test_cancelled_job_does_not_start() {
        let capabilities = Arc::new(Capabilities::new(ProviderContext::default()));
        let job = job(JobType::Transcribe, json!({"audio_path": "/a.wav"}));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = execute(capabilities, job, ProgressReporter::noop(), cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_job() {
        let mut capabilities = Capabilities::new(ProviderContext::default());
        capabilities.asr_provider = "whisperx".to_string();
        let job = job(JobType::Transcribe, json!({"audio_path": "/a.wav"}));

        let err = execute(
            Arc::new(capabilities),
            job,
            ProgressReporter::noop(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Valid providers: cloud, local"));
    }
}

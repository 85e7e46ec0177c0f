//! Local command-line backends
//!
//! Both backends run an external program that prints a JSON document on
//! stdout: `{"segments": [{"start", "end", "text"}], "language"}` for
//! transcription and `{"segments": [{"start", "end", "speaker"}]}` for
//! diarization. The inference itself lives in that program.

use async_trait::async_trait;
use podscribe_core::domain::transcript::{SpeakerTurn, Transcript};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use super::{Diarizer, Transcriber};
use crate::config::{LocalToolConfig, ProviderConfig};
use crate::error::{ProviderError, Result};
use crate::progress::ProgressReporter;

/// Runs `command` to completion and returns its stdout
async fn run_json_command(mut command: Command, program: &str) -> Result<Vec<u8>> {
    debug!("Running {:?}", command);

    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProviderError::local(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProviderError::local(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    Ok(output.stdout)
}

#[derive(Debug, Deserialize)]
struct TurnsOutput {
    segments: Vec<SpeakerTurn>,
}

fn parse_transcript(stdout: &[u8]) -> Result<Transcript> {
    serde_json::from_slice(stdout)
        .map_err(|e| ProviderError::local(format!("unparsable transcript output: {}", e)))
}

fn parse_turns(stdout: &[u8]) -> Result<Vec<SpeakerTurn>> {
    serde_json::from_slice::<TurnsOutput>(stdout)
        .map(|o| o.segments)
        .map_err(|e| ProviderError::local(format!("unparsable diarization output: {}", e)))
}

/// Transcription through a whisper-style command-line program
///
/// Invoked as `<binary> [--model M] [--language L] [--device D] <audio>`.
pub struct CommandTranscriber {
    binary: String,
    model: Option<PathBuf>,
    language: Option<String>,
    device: Option<String>,
    progress: ProgressReporter,
}

impl CommandTranscriber {
    pub fn new(tools: &LocalToolConfig, config: &ProviderConfig) -> Self {
        Self {
            binary: tools.transcribe_binary.clone(),
            model: tools.transcribe_model.clone(),
            language: config.language.clone(),
            device: config.device.clone(),
            progress: config.progress.clone(),
        }
    }

    fn command(&self, audio: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(model) = &self.model {
            command.arg("--model").arg(model);
        }
        if let Some(language) = &self.language {
            command.arg("--language").arg(language);
        }
        if let Some(device) = &self.device {
            command.arg("--device").arg(device);
        }
        command.arg(audio);
        command
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    fn name(&self) -> &str {
        "local"
    }

    async fn transcribe(&self, audio: &Path) -> Result<Transcript> {
        if let Some(model) = &self.model {
            if !model.exists() {
                return Err(ProviderError::local(format!(
                    "model not found: {}",
                    model.display()
                )));
            }
        }

        self.progress
            .step(20.0, "transcribe", format!("transcribing locally with {}", self.binary));

        let stdout = run_json_command(self.command(audio), &self.binary).await?;
        let transcript = parse_transcript(&stdout)?;

        info!(
            "Local transcription produced {} segment(s)",
            transcript.segments.len()
        );
        Ok(transcript)
    }
}

/// Diarization through a command-line program
///
/// Invoked as `<binary> [--min-speakers N] [--max-speakers N] [--device D] <audio>`.
pub struct CommandDiarizer {
    binary: String,
    min_speakers: Option<u32>,
    max_speakers: Option<u32>,
    device: Option<String>,
    progress: ProgressReporter,
}

impl CommandDiarizer {
    pub fn new(tools: &LocalToolConfig, config: &ProviderConfig) -> Self {
        Self {
            binary: tools.diarize_binary.clone(),
            min_speakers: config.min_speakers,
            max_speakers: config.max_speakers,
            device: config.device.clone(),
            progress: config.progress.clone(),
        }
    }

    fn command(&self, audio: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(min) = self.min_speakers {
            command.arg("--min-speakers").arg(min.to_string());
        }
        if let Some(max) = self.max_speakers {
            command.arg("--max-speakers").arg(max.to_string());
        }
        if let Some(device) = &self.device {
            command.arg("--device").arg(device);
        }
        command.arg(audio);
        command
    }
}

#[async_trait]
impl Diarizer for CommandDiarizer {
    fn name(&self) -> &str {
        "local"
    }

    async fn diarize(&self, audio: &Path) -> Result<Vec<SpeakerTurn>> {
        self.progress
            .step(20.0, "diarize", format!("diarizing locally with {}", self.binary));

        let stdout = run_json_command(self.command(audio), &self.binary).await?;
        let turns = parse_turns(&stdout)?;

        info!("Local diarization produced {} turn(s)", turns.len());
        Ok(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_transcript() {
        let out = br#"{"segments": [{"start": 0.0, "end": 2.5, "text": "Hi all"}], "language": "en"}"#;
        let transcript = parse_transcript(out).unwrap();
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.language.as_deref(), Some("en"));
        assert!(parse_transcript(b"not json").is_err());
    }

    #[test]
    fn test_parse_turns() {
        let out = br#"{"segments": [{"start": 0.0, "end": 4.0, "speaker": "SPEAKER_01"}]}"#;
        let turns = parse_turns(out).unwrap();
        assert_eq!(turns[0].speaker, "SPEAKER_01");
        assert_eq!(parse_turns(br#"{"turns": []}"#).unwrap_err().kind, ErrorKind::LocalExecution);
    }

    #[test]
    fn test_command_arguments() {
        let tools = LocalToolConfig {
            diarize_binary: "pyannote-cli".into(),
            ..Default::default()
        };
        let config = ProviderConfig {
            min_speakers: Some(2),
            max_speakers: Some(4),
            ..Default::default()
        };
        let diarizer = CommandDiarizer::new(&tools, &config);
        let command = diarizer.command(Path::new("/audio/ep.wav"));
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(command.as_std().get_program(), "pyannote-cli");
        assert_eq!(
            args,
            vec!["--min-speakers", "2", "--max-speakers", "4", "/audio/ep.wav"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_local_error() {
        let tools = LocalToolConfig {
            transcribe_binary: "podscribe-test-no-such-binary".into(),
            ..Default::default()
        };
        let transcriber = CommandTranscriber::new(&tools, &ProviderConfig::default());

        let err = transcriber
            .transcribe(Path::new("/audio/ep.wav"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::LocalExecution);
        assert!(!err.recoverable);
    }

    #[tokio::test]
    async fn test_missing_model_is_reported() {
        let tools = LocalToolConfig {
            transcribe_model: Some(PathBuf::from("/models/does-not-exist.bin")),
            ..Default::default()
        };
        let transcriber = CommandTranscriber::new(&tools, &ProviderConfig::default());

        let err = transcriber
            .transcribe(Path::new("/audio/ep.wav"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("model not found"));
    }
}

//! Capability providers
//!
//! A provider performs one capability (ASR or diarization). Callers never
//! pick a concrete type; they ask the [`ProviderRegistry`](crate::registry::ProviderRegistry)
//! for one by name.

mod cloud;
mod local;

pub use cloud::{CloudDiarizer, CloudExecutor, CloudTranscriber, should_fall_back};
pub use local::{CommandDiarizer, CommandTranscriber};

use async_trait::async_trait;
use podscribe_core::domain::transcript::{SpeakerTurn, Transcript};
use std::path::Path;

use crate::error::Result;

/// Automatic speech recognition
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, audio: &Path) -> Result<Transcript>;
}

/// Speaker diarization
#[async_trait]
pub trait Diarizer: Send + Sync {
    fn name(&self) -> &str;

    async fn diarize(&self, audio: &Path) -> Result<Vec<SpeakerTurn>>;
}

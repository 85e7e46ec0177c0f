//! Podscribe capability layer
//!
//! Runs speech recognition and diarization either on a remote GPU job
//! service or on this machine. Callers select a backend by name through a
//! [`ProviderRegistry`]; cloud backends upload audio to object storage,
//! submit a remote job, poll it to completion and fall back to the local
//! backend on recoverable failures.
//!
//! # Example
//!
//! ```no_run
//! use podscribe_cloud::{ProviderConfig, ProviderContext, ProviderRegistry};
//! use std::path::Path;
//!
//! # async fn run() -> podscribe_cloud::Result<()> {
//! let registry = ProviderRegistry::asr();
//! let transcriber = registry.create("local", &ProviderContext::default(), &ProviderConfig::default())?;
//! let transcript = transcriber.transcribe(Path::new("episode.wav")).await?;
//! println!("{}", transcript.text());
//! # Ok(())
//! # }
//! ```

pub mod align;
pub mod analysis;
pub mod config;
pub mod error;
pub mod progress;
pub mod provider;
pub mod registry;
pub mod remote;
pub mod storage;

pub use align::assign_speakers;
pub use analysis::{LlmAnalyzer, LlmConfig};
pub use config::{Capability, CloudConfig, LocalToolConfig, ProviderConfig, StorageConfig};
pub use error::{ErrorKind, ProviderError, Result};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use provider::{Diarizer, Transcriber};
pub use registry::{CloudBackend, ProviderContext, ProviderKind, ProviderRegistry};
pub use remote::{HttpJobClient, PollOptions, RemoteJobClient, RemoteJobHandle, RemoteStatus};
pub use storage::{ObjectUploader, PresignedObject, S3Uploader};

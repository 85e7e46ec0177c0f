//! Capability configuration
//!
//! `CloudConfig` and `StorageConfig` describe the remote job service and the
//! object store. Both are validated before any work starts; an invalid
//! configuration is a hard failure. `ProviderConfig` carries the per-job
//! inputs a provider instance is built with.

use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, Result};
use crate::progress::ProgressReporter;

/// Which capability a provider implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Asr,
    Diarization,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Asr => "asr",
            Capability::Diarization => "diarization",
        }
    }
}

/// Remote job service settings
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Bearer token for the job service
    pub api_key: String,

    /// Service base URL, endpoint ids are appended to it
    pub api_base: String,

    /// Endpoint id serving transcription
    pub asr_endpoint_id: Option<String>,

    /// Endpoint id serving diarization
    pub diarization_endpoint_id: Option<String>,

    /// Overall budget for one remote job
    pub timeout: Duration,

    /// Delay between status polls
    pub poll_interval: Duration,

    /// Whether recoverable failures may fall back to local execution
    pub fallback_enabled: bool,

    /// Lifetime of the presigned input URL
    pub presign_ttl: Duration,
}

impl CloudConfig {
    pub const DEFAULT_API_BASE: &'static str = "https://api.runpod.ai/v2";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: Self::DEFAULT_API_BASE.to_string(),
            asr_endpoint_id: None,
            diarization_endpoint_id: None,
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs_f64(2.0),
            fallback_enabled: true,
            presign_ttl: Duration::from_secs(3600),
        }
    }

    /// Checks credentials and timing
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::invalid_config("cloud API key is empty"));
        }

        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ProviderError::invalid_config(
                "cloud API base must start with http:// or https://",
            ));
        }

        if self.timeout.is_zero() {
            return Err(ProviderError::invalid_config("timeout must be greater than 0"));
        }

        if self.poll_interval.is_zero() {
            return Err(ProviderError::invalid_config(
                "poll interval must be greater than 0",
            ));
        }

        if self.poll_interval >= self.timeout {
            return Err(ProviderError::invalid_config(
                "poll interval must be shorter than the timeout",
            ));
        }

        Ok(())
    }

    /// Endpoint id for a capability, failing when it is not configured
    pub fn endpoint_for(&self, capability: Capability) -> Result<&str> {
        let endpoint = match capability {
            Capability::Asr => self.asr_endpoint_id.as_deref(),
            Capability::Diarization => self.diarization_endpoint_id.as_deref(),
        };

        endpoint
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                ProviderError::invalid_config(format!(
                    "no cloud endpoint configured for {}",
                    capability.as_str()
                ))
            })
    }
}

/// S3-compatible object store settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() || self.bucket.is_empty() {
            return Err(ProviderError::invalid_config(
                "object storage endpoint and bucket are required",
            ));
        }

        if self.access_key.is_empty() || self.secret_key.is_empty() {
            return Err(ProviderError::invalid_config(
                "object storage credentials are required",
            ));
        }

        Ok(())
    }
}

/// Settings for the local command-line backends
#[derive(Debug, Clone)]
pub struct LocalToolConfig {
    pub transcribe_binary: String,
    pub transcribe_model: Option<PathBuf>,
    pub diarize_binary: String,
}

impl Default for LocalToolConfig {
    fn default() -> Self {
        Self {
            transcribe_binary: "whisper-cli".to_string(),
            transcribe_model: None,
            diarize_binary: "diarize".to_string(),
        }
    }
}

/// Per-invocation provider inputs
///
/// Built by the caller for one job and never shared between jobs.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub language: Option<String>,
    pub device: Option<String>,
    pub min_speakers: Option<u32>,
    pub max_speakers: Option<u32>,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> CloudConfig {
        let mut config = CloudConfig::new("secret");
        config.asr_endpoint_id = Some("asr-endpoint".into());
        config
    }

    #[test]
    fn test_defaults() {
        let config = CloudConfig::new("secret");
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(config.fallback_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = valid();
        config.api_key = "  ".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.poll_interval = Duration::from_secs(600);
        assert!(config.validate().is_err());

        let mut config = valid();
        config.api_base = "api.runpod.ai".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_lookup() {
        let config = valid();
        assert_eq!(config.endpoint_for(Capability::Asr).unwrap(), "asr-endpoint");
        let err = config.endpoint_for(Capability::Diarization).unwrap_err();
        assert!(err.to_string().contains("diarization"));
        assert!(!err.recoverable);
    }

    #[test]
    fn test_storage_validation() {
        let storage = StorageConfig {
            endpoint: "http://localhost:9000".into(),
            bucket: "podcasts".into(),
            region: "us-east-1".into(),
            access_key: "minio".into(),
            secret_key: String::new(),
        };
        assert!(storage.validate().is_err());
    }
}

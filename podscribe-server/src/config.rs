//! Server configuration
//!
//! Everything is read from environment variables once at startup and
//! checked by [`Config::validate`]. An invalid configuration stops the
//! process before the listener or the workers start.

use anyhow::{Context, Result, anyhow, bail};
use podscribe_cloud::{
    Capability, CloudBackend, CloudConfig, LlmConfig, LocalToolConfig, ProviderContext,
    ProviderKind, S3Uploader, StorageConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection string for the job store
    pub database_url: String,

    /// HTTP listen address
    pub bind_addr: String,

    /// Number of jobs executed concurrently
    pub worker_concurrency: usize,

    /// How long an idle worker sleeps before asking for work again
    pub worker_idle_interval: Duration,

    /// Bound of each event subscriber's queue
    pub subscriber_queue_size: usize,

    /// Provider names resolved through the registries
    pub asr_provider: String,
    pub diarization_provider: String,

    /// Remote job service, present when `CLOUD_API_KEY` is set
    pub cloud: Option<CloudConfig>,

    /// Object store, present when `S3_BUCKET` is set
    pub storage: Option<StorageConfig>,

    pub local: LocalToolConfig,

    /// Chat completion service, present when `LLM_API_URL` is set
    pub llm: Option<LlmConfig>,
}

impl Config {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            bind_addr: "0.0.0.0:8080".to_string(),
            worker_concurrency: 1,
            worker_idle_interval: Duration::from_secs(1),
            subscriber_queue_size: 100,
            asr_provider: ProviderKind::Local.as_str().to_string(),
            diarization_provider: ProviderKind::Local.as_str().to_string(),
            cloud: None,
            storage: None,
            local: LocalToolConfig::default(),
            llm: None,
        }
    }

    /// Creates configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable lookup
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self::new(
            var("DATABASE_URL").unwrap_or_else(|| "sqlite://podscribe.db?mode=rwc".to_string()),
        );

        if let Some(addr) = var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.worker_concurrency = parse_or(var("WORKER_CONCURRENCY"), "WORKER_CONCURRENCY", 1)?;
        config.worker_idle_interval =
            seconds_or(var("WORKER_IDLE_INTERVAL"), "WORKER_IDLE_INTERVAL", 1.0)?;
        config.subscriber_queue_size =
            parse_or(var("SUBSCRIBER_QUEUE_SIZE"), "SUBSCRIBER_QUEUE_SIZE", 100)?;

        if let Some(name) = var("ASR_PROVIDER") {
            config.asr_provider = name;
        }
        if let Some(name) = var("DIARIZATION_PROVIDER") {
            config.diarization_provider = name;
        }

        if let Some(api_key) = var("CLOUD_API_KEY") {
            let mut cloud = CloudConfig::new(api_key);
            if let Some(base) = var("CLOUD_API_BASE") {
                cloud.api_base = base;
            }
            cloud.asr_endpoint_id = var("CLOUD_ASR_ENDPOINT_ID");
            cloud.diarization_endpoint_id = var("CLOUD_DIARIZATION_ENDPOINT_ID");
            cloud.timeout = seconds_or(var("CLOUD_TIMEOUT"), "CLOUD_TIMEOUT", 600.0)?;
            cloud.poll_interval =
                seconds_or(var("CLOUD_POLL_INTERVAL"), "CLOUD_POLL_INTERVAL", 2.0)?;
            cloud.fallback_enabled = flag_or(var("CLOUD_FALLBACK"), "CLOUD_FALLBACK", true)?;
            cloud.presign_ttl = seconds_or(var("S3_PRESIGN_TTL"), "S3_PRESIGN_TTL", 3600.0)?;
            config.cloud = Some(cloud);
        }

        if let Some(bucket) = var("S3_BUCKET") {
            config.storage = Some(StorageConfig {
                endpoint: var("S3_ENDPOINT").unwrap_or_default(),
                bucket,
                region: var("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                access_key: var("S3_ACCESS_KEY").unwrap_or_default(),
                secret_key: var("S3_SECRET_KEY").unwrap_or_default(),
            });
        }

        if let Some(binary) = var("WHISPER_BINARY") {
            config.local.transcribe_binary = binary;
        }
        config.local.transcribe_model = var("WHISPER_MODEL").map(PathBuf::from);
        if let Some(binary) = var("DIARIZE_BINARY") {
            config.local.diarize_binary = binary;
        }

        if let Some(api_url) = var("LLM_API_URL") {
            config.llm = Some(LlmConfig {
                api_url,
                api_key: var("LLM_API_KEY"),
                model: var("LLM_MODEL").unwrap_or_default(),
            });
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            bail!("database_url cannot be empty");
        }

        SocketAddr::from_str(&self.bind_addr)
            .with_context(|| format!("invalid bind address '{}'", self.bind_addr))?;

        if self.worker_concurrency == 0 {
            bail!("worker_concurrency must be greater than 0");
        }

        if self.worker_idle_interval.is_zero() {
            bail!("worker_idle_interval must be greater than 0");
        }

        if self.subscriber_queue_size == 0 {
            bail!("subscriber_queue_size must be greater than 0");
        }

        for (name, capability) in [
            (&self.asr_provider, Capability::Asr),
            (&self.diarization_provider, Capability::Diarization),
        ] {
            let kind = ProviderKind::parse(name).ok_or_else(|| {
                anyhow!(
                    "unknown {} provider '{}', expected one of: {}",
                    capability.as_str(),
                    name,
                    ProviderKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })?;

            if kind == ProviderKind::Cloud {
                let cloud = self.cloud.as_ref().ok_or_else(|| {
                    anyhow!(
                        "{} provider is 'cloud' but CLOUD_API_KEY is not set",
                        capability.as_str()
                    )
                })?;
                cloud.endpoint_for(capability)?;
                if self.storage.is_none() {
                    bail!(
                        "{} provider is 'cloud' but object storage (S3_BUCKET) is not configured",
                        capability.as_str()
                    );
                }
            }
        }

        if let Some(cloud) = &self.cloud {
            cloud.validate().context("invalid cloud configuration")?;
        }
        if let Some(storage) = &self.storage {
            storage.validate().context("invalid object storage configuration")?;
        }
        if let Some(llm) = &self.llm {
            llm.validate().context("invalid LLM configuration")?;
        }

        Ok(())
    }

    /// Builds the shared provider resources
    pub fn provider_context(&self) -> Result<ProviderContext> {
        let cloud = match (&self.cloud, &self.storage) {
            (Some(cloud), Some(storage)) => Some(CloudBackend {
                config: cloud.clone(),
                uploader: Arc::new(S3Uploader::new(storage)?),
            }),
            _ => None,
        };

        Ok(ProviderContext {
            cloud,
            local: self.local.clone(),
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, v)),
        None => Ok(default),
    }
}

fn seconds_or(value: Option<String>, key: &str, default: f64) -> Result<Duration> {
    let secs: f64 = parse_or(value, key, default)?;
    Duration::try_from_secs_f64(secs).map_err(|_| anyhow!("{} must be a non-negative number", key))
}

fn flag_or(value: Option<String>, key: &str, default: bool) -> Result<bool> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => bail!("{} has an invalid value '{}'", key, other),
    }
}

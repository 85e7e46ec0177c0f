//! Provider registry
//!
//! Maps a provider name to a constructor for one capability. The set of
//! provider kinds is closed; registries are built once at startup and then
//! only read, so selecting a backend never touches calling code.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::{Capability, CloudConfig, LocalToolConfig, ProviderConfig};
use crate::error::{ProviderError, Result};
use crate::provider::{
    CloudDiarizer, CloudExecutor, CloudTranscriber, CommandDiarizer, CommandTranscriber, Diarizer,
    Transcriber,
};
use crate::remote::HttpJobClient;
use crate::storage::ObjectUploader;

/// Known provider backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    /// Remote job service, falling back to `Local` when permitted
    Cloud,
    /// Command-line program on this machine
    Local,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Cloud, ProviderKind::Local];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Cloud => "cloud",
            ProviderKind::Local => "local",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote execution resources shared by all cloud providers
#[derive(Clone)]
pub struct CloudBackend {
    pub config: CloudConfig,
    pub uploader: Arc<dyn ObjectUploader>,
}

/// Process-wide resources handed to constructors
///
/// Built once at startup.
#[derive(Clone, Default)]
pub struct ProviderContext {
    pub cloud: Option<CloudBackend>,
    pub local: LocalToolConfig,
}

impl ProviderContext {
    /// The configured cloud backend, validated
    fn cloud_backend(&self) -> Result<&CloudBackend> {
        let backend = self.cloud.as_ref().ok_or_else(|| {
            ProviderError::invalid_config("cloud provider selected but cloud access is not configured")
        })?;
        backend.config.validate()?;
        Ok(backend)
    }
}

/// Builds a provider instance for one job
pub type Constructor<T> = fn(&ProviderContext, &ProviderConfig) -> Result<Arc<T>>;

pub struct ProviderRegistry<T: ?Sized> {
    capability: Capability,
    constructors: HashMap<ProviderKind, Constructor<T>>,
}

impl<T: ?Sized> ProviderRegistry<T> {
    /// Creates an empty registry for `capability`
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            constructors: HashMap::new(),
        }
    }

    /// Adds or replaces the constructor for `kind`
    pub fn register(&mut self, kind: ProviderKind, constructor: Constructor<T>) -> &mut Self {
        if self.constructors.insert(kind, constructor).is_some() {
            debug!("Replaced {} provider '{}'", self.capability.as_str(), kind);
        }
        self
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.constructors.keys().copied().collect();
        kinds.sort();
        kinds.into_iter().map(|k| k.as_str()).collect()
    }

    /// Constructs the provider registered under `name`
    pub fn create(
        &self,
        name: &str,
        context: &ProviderContext,
        config: &ProviderConfig,
    ) -> Result<Arc<T>> {
        let constructor = ProviderKind::parse(name)
            .and_then(|kind| self.constructors.get(&kind))
            .ok_or_else(|| {
                ProviderError::unknown_provider(name, self.capability.as_str(), &self.names())
            })?;

        constructor(context, config)
    }
}

impl ProviderRegistry<dyn Transcriber> {
    /// Registry with every built-in ASR backend
    pub fn asr() -> Self {
        let mut registry = Self::new(Capability::Asr);
        registry
            .register(ProviderKind::Local, local_transcriber)
            .register(ProviderKind::Cloud, cloud_transcriber);
        registry
    }
}

impl ProviderRegistry<dyn Diarizer> {
    /// Registry with every built-in diarization backend
    pub fn diarization() -> Self {
        let mut registry = Self::new(Capability::Diarization);
        registry
            .register(ProviderKind::Local, local_diarizer)
            .register(ProviderKind::Cloud, cloud_diarizer);
        registry
    }
}

fn local_transcriber(context: &ProviderContext, config: &ProviderConfig) -> Result<Arc<dyn Transcriber>> {
    Ok(Arc::new(CommandTranscriber::new(&context.local, config)))
}

fn local_diarizer(context: &ProviderContext, config: &ProviderConfig) -> Result<Arc<dyn Diarizer>> {
    Ok(Arc::new(CommandDiarizer::new(&context.local, config)))
}

fn cloud_executor(
    context: &ProviderContext,
    config: &ProviderConfig,
    capability: Capability,
) -> Result<(CloudExecutor, bool)> {
    let backend = context.cloud_backend()?;
    let cloud = &backend.config;
    let endpoint = cloud.endpoint_for(capability)?;
    let jobs = Arc::new(HttpJobClient::new(&cloud.api_base, endpoint, &cloud.api_key)?);
    let executor = CloudExecutor::new(cloud, jobs, backend.uploader.clone(), config)?;
    Ok((executor, cloud.fallback_enabled))
}

fn cloud_transcriber(context: &ProviderContext, config: &ProviderConfig) -> Result<Arc<dyn Transcriber>> {
    let (executor, fallback_enabled) = cloud_executor(context, config, Capability::Asr)?;
    let fallback = fallback_enabled
        .then(|| local_transcriber(context, config))
        .transpose()?;
    Ok(Arc::new(CloudTranscriber::new(executor, config, fallback)))
}

fn cloud_diarizer(context: &ProviderContext, config: &ProviderConfig) -> Result<Arc<dyn Diarizer>> {
    let (executor, fallback_enabled) = cloud_executor(context, config, Capability::Diarization)?;
    let fallback = fallback_enabled
        .then(|| local_diarizer(context, config))
        .transpose()?;
    Ok(Arc::new(CloudDiarizer::new(executor, config, fallback)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::error::ErrorKind;
    use crate::storage::S3Uploader;
    use async_trait::async_trait;
    use podscribe_core::domain::transcript::Transcript;
    use std::path::Path;

    fn cloud_context(asr_endpoint: Option<&str>) -> ProviderContext {
        let uploader = S3Uploader::new(&StorageConfig {
            endpoint: "http://localhost:9000".into(),
            bucket: "podcasts".into(),
            region: "us-east-1".into(),
            access_key: "a".into(),
            secret_key: "s".into(),
        })
        .unwrap();

        ProviderContext {
            cloud: Some(CloudBackend {
                config: CloudConfig {
                    asr_endpoint_id: asr_endpoint.map(String::from),
                    ..CloudConfig::new("key")
                },
                uploader: Arc::new(uploader),
            }),
            local: LocalToolConfig::default(),
        }
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(ProviderKind::parse("Cloud"), Some(ProviderKind::Cloud));
        assert_eq!(ProviderKind::parse(" local "), Some(ProviderKind::Local));
        assert_eq!(ProviderKind::parse("runpod"), None);
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(ProviderRegistry::asr().names(), vec!["cloud", "local"]);
        assert_eq!(ProviderRegistry::diarization().names(), vec!["cloud", "local"]);
    }

    #[test]
    fn test_unknown_provider_lists_valid_names() {
        let err = ProviderRegistry::asr()
            .create("whisperx", &ProviderContext::default(), &ProviderConfig::default())
            .err()
            .unwrap();

        assert_eq!(err.kind, ErrorKind::UnknownProvider);
        assert!(!err.recoverable);
        assert!(err.to_string().contains("cloud, local"));
    }

    #[test]
    fn test_unregistered_kind_is_unknown() {
        let mut registry = ProviderRegistry::<dyn Diarizer>::new(Capability::Diarization);
        registry.register(ProviderKind::Local, local_diarizer);

        let err = registry
            .create("cloud", &ProviderContext::default(), &ProviderConfig::default())
            .err()
            .unwrap();

        assert_eq!(err.kind, ErrorKind::UnknownProvider);
        assert!(err.to_string().ends_with("Valid providers: local"));
    }

    #[test]
    fn test_local_provider() {
        let provider = ProviderRegistry::asr()
            .create("local", &ProviderContext::default(), &ProviderConfig::default())
            .unwrap();
        assert_eq!(provider.name(), "local");
    }

    #[test]
    fn test_cloud_requires_configuration() {
        let err = ProviderRegistry::asr()
            .create("cloud", &ProviderContext::default(), &ProviderConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);

        let err = ProviderRegistry::asr()
            .create("cloud", &cloud_context(None), &ProviderConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_cloud_provider() {
        let provider = ProviderRegistry::asr()
            .create("cloud", &cloud_context(Some("asr-ep")), &ProviderConfig::default())
            .unwrap();
        assert_eq!(provider.name(), "cloud");
    }

    struct Canned;

    #[async_trait]
    impl Transcriber for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn transcribe(&self, _audio: &Path) -> Result<Transcript> {
            Ok(Transcript::default())
        }
    }

    fn canned(_: &ProviderContext, _: &ProviderConfig) -> Result<Arc<dyn Transcriber>> {
        Ok(Arc::new(Canned))
    }

    #[test]
    fn test_register_replaces_entry() {
        let mut registry = ProviderRegistry::asr();
        registry.register(ProviderKind::Local, canned);

        let provider = registry
            .create("local", &ProviderContext::default(), &ProviderConfig::default())
            .unwrap();
        assert_eq!(provider.name(), "canned");
    }
}

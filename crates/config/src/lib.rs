//! Configuration for skyvault.
//!
//! Configuration is an immutable input to the rest of the workspace: it is
//! loaded once (see [`Config::load`]) and then passed by reference into the
//! storage registry and the replication engine. Nothing downstream performs
//! its own I/O to discover settings.
//!
//! # Sources
//! Later sources override earlier ones:
//! 1. built-in defaults,
//! 2. a config file (`--config` path, else `config.{toml,yaml,json}` in the
//!    platform config directory),
//! 3. the `SECRETS` environment variable (a JSON object, see [`Secrets`]),
//! 4. the plain `AWS_REGION`, `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`
//!    environment variables,
//! 5. `SKYVAULT_`-prefixed environment variables using `__` for nesting, e.g.
//!    `SKYVAULT_STORAGE__REPLICATE_TO_ALL=true`.

pub mod error;
mod secrets;

pub use crate::secrets::Secrets;
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Provider name of the S3 adapter in the storage registry.
pub const PROVIDER_AWS: &str = "aws";
/// Provider name of the Google Cloud Storage adapter in the storage registry.
pub const PROVIDER_GCP: &str = "gcp";

const ENV_PREFIX: &str = "SKYVAULT_";

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity recorded as `uploaded_by` on every metadata record.
    pub server_id: String,
    /// Bucket (or container) every provider uploads into.
    pub bucket: String,
    pub storage: StorageConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            server_id: "skyvault".to_string(),
            bucket: "skyvault".to_string(),
            storage: StorageConfig::default(),
        }
    }
}

/// Which providers are enabled and how uploads are replicated across them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Provider used when a request does not name one.
    pub default_provider: String,
    /// Upload every file to every enabled provider.
    pub replicate_to_all: bool,
    /// Delete copies that already succeeded when a sibling upload fails.
    pub rollback_on_failure: bool,
    pub aws: AwsConfig,
    pub gcp: GcpConfig,
}
impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_provider: PROVIDER_AWS.to_string(),
            replicate_to_all: false,
            rollback_on_failure: false,
            aws: AwsConfig::default(),
            gcp: GcpConfig::default(),
        }
    }
}

/// Credentials for S3 and S3-compatible services.
///
/// The adapter is only enabled when both halves of the key pair are present.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint URL for S3-compatible services (MinIO, Backblaze, ...).
    pub endpoint: Option<String>,
    /// Total attempts per SDK call. `1` disables the SDK's own retries.
    pub max_attempts: u32,
}
impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            endpoint: None,
            max_attempts: 1,
        }
    }
}
impl AwsConfig {
    pub fn is_enabled(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}
// Hand-written so the secret never ends up in a log line.
impl std::fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Google Cloud Storage settings.
///
/// Without a credentials file the adapter falls back to application default
/// credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    pub project_id: String,
    pub credentials_file: Option<PathBuf>,
}
impl GcpConfig {
    pub fn is_enabled(&self) -> bool {
        !self.project_id.is_empty()
    }
}

impl Config {
    /// Load configuration from every source, then validate it.
    ///
    /// `path` overrides the config file lookup in the platform config
    /// directory. A missing file is not an error; figment skips it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let secrets = match std::env::var("SECRETS") {
            Ok(raw) => Some(Secrets::from_json(&raw)?),
            Err(_) => None,
        };
        Self::from_figment(Self::figment(path, secrets))
    }

    /// Assemble the layered [`Figment`] without extracting it.
    pub fn figment(path: Option<&Path>, secrets: Option<Secrets>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match path {
            Some(path) => figment = Self::merge_file(figment, path),
            None => {
                if let Some(dirs) = ProjectDirs::from("", "", "skyvault") {
                    for name in ["config.toml", "config.yaml", "config.json"] {
                        figment = Self::merge_file(figment, &dirs.config_dir().join(name));
                    }
                }
            },
        }
        if let Some(secrets) = secrets {
            figment = figment.merge(secrets);
        }
        figment
            .merge(Env::raw().only(&["AWS_REGION", "AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"]).map(|key| {
                match key.as_str().to_ascii_uppercase().as_str() {
                    "AWS_REGION" => "storage.aws.region".into(),
                    "AWS_ACCESS_KEY_ID" => "storage.aws.access_key_id".into(),
                    _ => "storage.aws.secret_access_key".into(),
                }
            }))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate a configuration from an already-built figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(
            default_provider = %config.storage.default_provider,
            replicate_to_all = config.storage.replicate_to_all,
            aws = config.storage.aws.is_enabled(),
            gcp = config.storage.gcp.is_enabled(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("bucket must not be empty".to_string()));
        }
        if self.storage.default_provider.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("storage.default_provider must not be empty".to_string()));
        }
        if self.storage.aws.max_attempts == 0 {
            exn::bail!(ErrorKind::Invalid("storage.aws.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    fn merge_file(figment: Figment, path: &Path) -> Figment {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Toml::file(path)),
        }
    }
}

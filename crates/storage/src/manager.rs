//! Provider registry.

use crate::AdapterHandle;
use crate::error::{ErrorKind, Result};
use skyvault_config::Config;
use std::collections::BTreeMap;

/// Registry mapping provider names to storage adapters.
///
/// Built once at startup and immutable afterwards, so it can be shared behind
/// an [`Arc`](std::sync::Arc) and read from any number of tasks without
/// locking.
pub struct StorageManager {
    adapters: BTreeMap<String, AdapterHandle>,
    default_provider: String,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("providers", &self.providers())
            .field("default_provider", &self.default_provider)
            .finish()
    }
}

impl StorageManager {
    /// Build a registry from already-constructed adapters, keyed by
    /// [`StorageAdapter::provider()`](crate::StorageAdapter::provider).
    ///
    /// A later adapter with the same name replaces an earlier one.
    ///
    /// # Errors
    /// [`Config`](ErrorKind::Config) if `adapters` is empty or none of them
    /// is named `default_provider`.
    pub fn new(adapters: impl IntoIterator<Item = AdapterHandle>, default_provider: impl Into<String>) -> Result<Self> {
        let adapters: BTreeMap<String, AdapterHandle> =
            adapters.into_iter().map(|adapter| (adapter.provider().to_string(), adapter)).collect();
        let default_provider = default_provider.into();
        if adapters.is_empty() {
            exn::bail!(ErrorKind::Config("no storage providers are enabled".to_string()));
        }
        if !adapters.contains_key(&default_provider) {
            exn::bail!(ErrorKind::Config(format!(
                "default provider {default_provider} is not enabled (enabled: {})",
                adapters.keys().cloned().collect::<Vec<_>>().join(", ")
            )));
        }
        tracing::info!(
            providers = ?adapters.keys().collect::<Vec<_>>(),
            default = %default_provider,
            "Storage providers registered"
        );
        Ok(Self { adapters, default_provider })
    }

    /// Build one adapter per provider enabled in `config`.
    ///
    /// A provider counts as enabled once its credentials are configured (see
    /// [`AwsConfig::is_enabled`](skyvault_config::AwsConfig::is_enabled) and
    /// [`GcpConfig::is_enabled`](skyvault_config::GcpConfig::is_enabled)).
    /// Configuring a provider this build was compiled without is an error.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut adapters: Vec<AdapterHandle> = Vec::new();
        if config.storage.aws.is_enabled() {
            #[cfg(feature = "s3")]
            adapters.push(std::sync::Arc::new(crate::adapter::S3Adapter::from_config(
                skyvault_config::PROVIDER_AWS,
                &config.storage.aws,
            )));
            #[cfg(not(feature = "s3"))]
            exn::bail!(ErrorKind::Config("AWS credentials are configured but S3 support is not compiled in".to_string()));
        }
        if config.storage.gcp.is_enabled() {
            #[cfg(feature = "gcs")]
            adapters.push(std::sync::Arc::new(crate::adapter::GcsAdapter::new(
                skyvault_config::PROVIDER_GCP,
                &config.storage.gcp,
            )));
            #[cfg(not(feature = "gcs"))]
            exn::bail!(ErrorKind::Config("a GCP project is configured but GCS support is not compiled in".to_string()));
        }
        Self::new(adapters, config.storage.default_provider.clone())
    }

    /// Look up an adapter by name; the empty string means the default.
    ///
    /// # Errors
    /// [`UnsupportedProvider`](ErrorKind::UnsupportedProvider) for a name
    /// that is not registered.
    pub fn resolve(&self, provider: &str) -> Result<AdapterHandle> {
        let name = if provider.is_empty() { self.default_provider.as_str() } else { provider };
        match self.adapters.get(name) {
            Some(adapter) => Ok(adapter.clone()),
            None => exn::bail!(ErrorKind::UnsupportedProvider(name.to_string())),
        }
    }

    /// Every registered adapter, keyed (and therefore ordered) by name.
    pub fn all_providers(&self) -> &BTreeMap<String, AdapterHandle> {
        &self.adapters
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Sorted names of every registered provider.
    pub fn providers(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}

//! The `SECRETS` environment variable.
//!
//! Deployment platforms inject credentials as a single JSON object of
//! upper-case keys. This provider maps the keys it recognises onto the
//! configuration tree and ignores the rest (database URLs and the like belong
//! to other services sharing the same secret).

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::providers::Serialized;
use figment::value::{Dict, Map};
use figment::{Metadata, Profile, Provider};
use serde_json::{Map as JsonMap, Value};
use std::collections::HashMap;

/// Recognised keys and the configuration path each one lands on.
const MAPPING: &[(&str, &[&str])] = &[
    ("BUCKET_NAME", &["bucket"]),
    ("AWS_REGION", &["storage", "aws", "region"]),
    ("AWS_ACCESS_KEY_ID", &["storage", "aws", "access_key_id"]),
    ("AWS_SECRET_ACCESS_KEY", &["storage", "aws", "secret_access_key"]),
    ("GCP_PROJECT_ID", &["storage", "gcp", "project_id"]),
    ("GCP_CREDENTIALS_FILE", &["storage", "gcp", "credentials_file"]),
    ("DEFAULT_CLOUD", &["storage", "default_provider"]),
    ("REPLICATE_TO_ALL_CLOUDS", &["storage", "replicate_to_all"]),
];

/// A [`Provider`] built from the JSON object in `SECRETS`.
///
/// ```
/// use skyvault_config::{Config, Secrets};
///
/// let secrets = Secrets::from_json(r#"{"DEFAULT_CLOUD": "gcp", "GCP_PROJECT_ID": "p"}"#).unwrap();
/// let config = Config::from_figment(Config::figment(None, Some(secrets))).unwrap();
/// assert_eq!(config.storage.default_provider, "gcp");
/// ```
#[derive(Debug, Clone)]
pub struct Secrets {
    tree: Value,
}

impl Secrets {
    /// Parse the raw JSON. Values must be strings, as they are in the
    /// environment; `REPLICATE_TO_ALL_CLOUDS` is true only for `"true"`.
    pub fn from_json(raw: &str) -> Result<Self> {
        let flat: HashMap<String, String> = serde_json::from_str(raw).or_raise(|| ErrorKind::Load)?;
        let mut root = JsonMap::new();
        for (key, path) in MAPPING {
            let Some(value) = flat.get(*key) else {
                continue;
            };
            let value = match *key {
                "REPLICATE_TO_ALL_CLOUDS" => Value::Bool(value == "true"),
                _ => Value::String(value.clone()),
            };
            insert(&mut root, path, value);
        }
        Ok(Self { tree: Value::Object(root) })
    }
}

fn insert(node: &mut JsonMap<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {},
        [leaf] => {
            node.insert((*leaf).to_string(), value);
        },
        [branch, rest @ ..] => {
            let child = node.entry((*branch).to_string()).or_insert_with(|| Value::Object(JsonMap::new()));
            if let Value::Object(child) = child {
                insert(child, rest, value);
            }
        },
    }
}

impl Provider for Secrets {
    fn metadata(&self) -> Metadata {
        Metadata::named("SECRETS environment variable")
    }

    fn data(&self) -> std::result::Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(&self.tree).data()
    }
}

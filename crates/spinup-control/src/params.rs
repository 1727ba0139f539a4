use std::{collections::HashMap, path::PathBuf};

use anyhow::Context;

use crate::config::{ConfigError, Settings};

/// Key under the parameter path that holds the managed server's id.
pub const INSTANCE_ID_KEY: &str = "instanceid";

/// Hierarchical parameter lookup (`/game/prod/instanceid` style keys).
#[async_trait::async_trait]
pub trait ParameterResolver: Send + Sync {
    /// `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
}

/// Parameters stored as one file per key beneath `root`.
#[derive(Debug, Clone)]
pub struct FileParameterResolver {
    root: PathBuf,
}

impl FileParameterResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl ParameterResolver for FileParameterResolver {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let rel = key.trim_start_matches('/');
        if rel.split('/').any(|part| part == "..") {
            anyhow::bail!("parameter key must not contain '..': {key}");
        }
        let path = self.root.join(rel);
        match tokio::fs::read_to_string(&path).await {
            Ok(v) => Ok(Some(v.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read parameter {}", path.display())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticParameterResolver {
    values: HashMap<String, String>,
}

impl StaticParameterResolver {
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[async_trait::async_trait]
impl ParameterResolver for StaticParameterResolver {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }
}

pub fn instance_id_key(param_path: &str) -> String {
    let base = param_path.trim_end_matches('/');
    format!("{base}/{INSTANCE_ID_KEY}")
}

/// Resolve the managed server id. Missing or empty is fatal at startup.
pub async fn resolve_instance_id(
    resolver: &dyn ParameterResolver,
    param_path: &str,
) -> Result<String, ConfigError> {
    let key = instance_id_key(param_path);
    let value = resolver
        .get(&key)
        .await
        .map_err(|e| ConfigError::Parameter {
            key: key.clone(),
            reason: format!("{e:#}"),
        })?
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    value.ok_or(ConfigError::MissingInstanceId { key })
}

/// `SPINUP_INSTANCE_ID` wins over the parameter tree.
pub async fn resolve_from_settings(settings: &Settings) -> Result<String, ConfigError> {
    match settings.instance_id_override.as_deref() {
        Some(id) => {
            let resolver = StaticParameterResolver::default()
                .with(instance_id_key(&settings.param_path), id);
            resolve_instance_id(&resolver, &settings.param_path).await
        }
        None => {
            let resolver = FileParameterResolver::new(&settings.param_root);
            resolve_instance_id(&resolver, &settings.param_path).await
        }
    }
}

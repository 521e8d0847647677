//! Connector contract and the type-tag registry that selects implementations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{DataSink, DataSource};
use crate::error::{Error, Result};
use crate::keystore::{Keystore, KeystoreError, Secret};
use crate::provenance::ProvenanceRecorder;

pub const KEYSTORE_NAME_KEY: &str = "keystore_name";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub pull: bool,
    pub push: bool,
    pub refresh_metadata: bool,
}

impl Capabilities {
    pub const SOURCE: Capabilities = Capabilities {
        pull: true,
        push: false,
        refresh_metadata: false,
    };
    pub const SINK: Capabilities = Capabilities {
        pull: false,
        push: true,
        refresh_metadata: false,
    };
}

/// Everything a source connector needs for one pull.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub job_id: i64,
    pub source: DataSource,
    /// Restrict the pull to one subject when set.
    pub subject_id: Option<String>,
    pub job_metadata: Value,
    pub secret: Option<Secret>,
}

/// A file to hand to a sink, usually taken from the latest presence events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    pub md5: Option<String>,
    pub subject_id: Option<String>,
    pub data_source_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PushRequest {
    pub job_id: i64,
    pub sink: DataSink,
    pub file: FileRef,
    pub job_metadata: Value,
    pub secret: Option<Secret>,
}

fn unsupported(tag: &str, op: &str) -> Error {
    Error::UnsupportedType(format!("connector '{tag}' does not support {op}"))
}

/// Capability set for one source or sink type. Metadata is opaque to the
/// registry and handed to the connector untouched.
#[async_trait]
pub trait Connector: Send + Sync {
    fn type_tag(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn validate(&self, metadata: &Value) -> Result<()>;

    fn keystore_name(&self, metadata: &Value) -> Option<String> {
        metadata
            .get(KEYSTORE_NAME_KEY)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    async fn pull(&self, _req: PullRequest, _recorder: &ProvenanceRecorder) -> Result<()> {
        Err(unsupported(self.type_tag(), "pull"))
    }

    async fn push(&self, _req: PushRequest, _recorder: &ProvenanceRecorder) -> Result<()> {
        Err(unsupported(self.type_tag(), "push"))
    }

    async fn refresh_metadata(
        &self,
        _req: PullRequest,
        _recorder: &ProvenanceRecorder,
    ) -> Result<()> {
        Err(unsupported(self.type_tag(), "refresh_metadata"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub type_tag: String,
    pub capabilities: Capabilities,
}

/// Populated once at startup; read-only afterwards.
#[derive(Clone, Default)]
pub struct Registry {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.connectors.keys()).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connector under its type tag, replacing any previous one.
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> &mut Self {
        let tag = connector.type_tag().to_string();
        if self.connectors.insert(tag.clone(), connector).is_some() {
            tracing::warn!(type_tag = %tag, "connector replaced in registry");
        }
        self
    }

    pub fn with(mut self, connector: Arc<dyn Connector>) -> Self {
        self.register(connector);
        self
    }

    pub fn get(&self, type_tag: &str) -> Result<Arc<dyn Connector>> {
        self.connectors
            .get(type_tag)
            .cloned()
            .ok_or_else(|| Error::UnsupportedType(format!("unknown connector type '{type_tag}'")))
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.connectors.contains_key(type_tag)
    }

    pub fn supported(&self) -> Vec<ConnectorInfo> {
        self.connectors
            .iter()
            .map(|(tag, c)| ConnectorInfo {
                type_tag: tag.clone(),
                capabilities: c.capabilities(),
            })
            .collect()
    }

    pub fn validate(&self, type_tag: &str, metadata: &Value) -> Result<()> {
        self.get(type_tag)?.validate(metadata)
    }
}

/// Resolves the credential named by the connector's metadata. Returns
/// `None` when the metadata names no key.
pub async fn resolve_credentials(
    connector: &dyn Connector,
    keystore: &dyn Keystore,
    project_id: &str,
    metadata: &Value,
) -> Result<Option<Secret>> {
    let Some(key_name) = connector.keystore_name(metadata) else {
        return Ok(None);
    };
    match keystore.resolve(project_id, &key_name).await {
        Ok(secret) => Ok(Some(secret)),
        Err(err) => {
            let reason = match err {
                KeystoreError::NotFound { .. } => "not found in keystore".to_string(),
                KeystoreError::Backend(detail) => detail,
            };
            Err(Error::CredentialResolution { key_name, reason })
        }
    }
}

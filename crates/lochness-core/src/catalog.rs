//! Data source and sink definitions, looked up by the scheduler at dispatch.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connector::Registry;
use crate::error::{Error, Result};

fn default_active() -> bool {
    true
}

fn empty_metadata() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DataSource {
    pub data_source_name: String,
    pub project_id: String,
    pub site_id: String,
    pub data_source_type: String,
    #[serde(default = "default_active")]
    pub data_source_is_active: bool,
    /// Connector-specific settings; secrets appear only as `keystore_name`.
    #[serde(default = "empty_metadata")]
    pub data_source_metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DataSink {
    pub data_sink_id: i64,
    pub data_sink_name: String,
    pub project_id: String,
    pub site_id: String,
    pub data_sink_type: String,
    #[serde(default = "empty_metadata")]
    pub data_sink_metadata: Value,
}

pub trait Catalog: Send + Sync {
    fn data_source(&self, project_id: &str, site_id: &str, name: &str) -> Option<DataSource>;

    fn data_sink(&self, project_id: &str, site_id: &str, name: &str) -> Option<DataSink>;
}

type CatalogKey = (String, String, String);

/// An entry that failed validation while the catalog was being built.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub kind: &'static str,
    pub name: String,
    pub error: Error,
}

/// Catalog declared up front in configuration. Every entry is checked
/// against the connector registry on insert.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    sources: HashMap<CatalogKey, DataSource>,
    sinks: HashMap<CatalogKey, DataSink>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog, keeping every valid entry and reporting the rest.
    pub fn build(
        registry: &Registry,
        sources: impl IntoIterator<Item = DataSource>,
        sinks: impl IntoIterator<Item = DataSink>,
    ) -> (Self, Vec<Rejected>) {
        let mut catalog = Self::new();
        let mut rejected = Vec::new();
        for source in sources {
            let name = source.data_source_name.clone();
            if let Err(error) = catalog.insert_source(registry, source) {
                tracing::warn!(data_source = %name, %error, "data source rejected");
                rejected.push(Rejected {
                    kind: "data_source",
                    name,
                    error,
                });
            }
        }
        for sink in sinks {
            let name = sink.data_sink_name.clone();
            if let Err(error) = catalog.insert_sink(registry, sink) {
                tracing::warn!(data_sink = %name, %error, "data sink rejected");
                rejected.push(Rejected {
                    kind: "data_sink",
                    name,
                    error,
                });
            }
        }
        (catalog, rejected)
    }

    pub fn insert_source(&mut self, registry: &Registry, source: DataSource) -> Result<()> {
        let connector = registry.get(&source.data_source_type)?;
        if !connector.capabilities().pull {
            return Err(Error::validation(format!(
                "connector '{}' cannot act as a data source",
                source.data_source_type
            )));
        }
        connector.validate(&source.data_source_metadata)?;
        let key = (
            source.project_id.clone(),
            source.site_id.clone(),
            source.data_source_name.clone(),
        );
        self.sources.insert(key, source);
        Ok(())
    }

    pub fn insert_sink(&mut self, registry: &Registry, sink: DataSink) -> Result<()> {
        let connector = registry.get(&sink.data_sink_type)?;
        if !connector.capabilities().push {
            return Err(Error::validation(format!(
                "connector '{}' cannot act as a data sink",
                sink.data_sink_type
            )));
        }
        connector.validate(&sink.data_sink_metadata)?;
        let key = (
            sink.project_id.clone(),
            sink.site_id.clone(),
            sink.data_sink_name.clone(),
        );
        self.sinks.insert(key, sink);
        Ok(())
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

fn key(project_id: &str, site_id: &str, name: &str) -> CatalogKey {
    (project_id.to_string(), site_id.to_string(), name.to_string())
}

impl Catalog for StaticCatalog {
    fn data_source(&self, project_id: &str, site_id: &str, name: &str) -> Option<DataSource> {
        self.sources.get(&key(project_id, site_id, name)).cloned()
    }

    fn data_sink(&self, project_id: &str, site_id: &str, name: &str) -> Option<DataSink> {
        self.sinks.get(&key(project_id, site_id, name)).cloned()
    }
}

//! Domain core for Lochness: job model, connector contract, provenance
//! events and the sync status fold. Nothing in here touches storage.

pub mod catalog;
pub mod config;
pub mod connector;
pub mod error;
pub mod keystore;
pub mod model;
pub mod provenance;
pub mod reconcile;
pub mod redact;
pub mod time;

pub use catalog::{Catalog, DataSink, DataSource, StaticCatalog};
pub use config::{load_config, load_effective, Config};
pub use connector::{
    resolve_credentials, Capabilities, Connector, ConnectorInfo, FileRef, PullRequest,
    PushRequest, Registry,
};
pub use error::{Error, FailureClass, Result};
pub use keystore::{EnvKeystore, Keystore, KeystoreError, Secret, StaticKeystore};
pub use model::{
    ClaimFilter, Completion, Job, JobFilter, JobOutcome, JobStatus, JobType, NewJob, Scope,
    ValidJob,
};
pub use provenance::{
    FilePresenceEvent, ProvenanceBatch, ProvenanceRecorder, PullEvent, PushEvent, Stored,
};
pub use reconcile::{reconcile, Granularity, StatusScope, StreamStatus, SyncStatus};
pub use redact::Redactor;

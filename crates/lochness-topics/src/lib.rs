//! Canonical bus topic constants shared by the scheduler, server and CLI.
//!
//! Keep this list grouped by section and favor dot.case names.

// Job lifecycle
pub const TOPIC_JOBS_ENQUEUED: &str = "jobs.enqueued";
pub const TOPIC_JOBS_CLAIMED: &str = "jobs.claimed";
pub const TOPIC_JOBS_COMPLETED: &str = "jobs.completed";
pub const TOPIC_JOBS_FAILED: &str = "jobs.failed";
pub const TOPIC_JOBS_REAPED: &str = "jobs.reaped";

// Provenance
pub const TOPIC_PROVENANCE_APPENDED: &str = "provenance.appended";

// Connectors
pub const TOPIC_CONNECTORS_REGISTERED: &str = "connectors.registered";
pub const TOPIC_CONNECTORS_REJECTED: &str = "connectors.rejected";

// Service
pub const TOPIC_SERVICE_START: &str = "service.start";
pub const TOPIC_SERVICE_STOP: &str = "service.stop";
/// First frame on every event stream.
pub const TOPIC_SERVICE_CONNECTED: &str = "service.connected";

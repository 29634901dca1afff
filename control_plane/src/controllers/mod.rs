//! Promotion controllers. Each reconcile call is a pure decision over the
//! application status and the listener caches, followed by at most one
//! publish call.

mod readiness;
mod routes;
mod services;
mod workloads;

pub use readiness::is_workload_ready;
pub use routes::RouteController;
pub use services::ServiceController;
pub use workloads::WorkloadController;

use crate::publisher::PublishError;
use strum::Display;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DeferReason {
    NoLatestInstance,
    WorkloadMissing,
    WorkloadNotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Deferred(DeferReason),
    Published,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Failed to publish {kind}: {source}")]
    Publish {
        kind: &'static str,
        #[source]
        source: PublishError,
    },
}

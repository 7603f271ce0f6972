//! # Verify Access Operator
//!
//! A Kubernetes operator that drives `IBMSecurityVerifyAccess` custom
//! resources toward running workloads.
//!
//! Each resource describes one deployable Verify Access instance. A
//! convergence pass derives the target Deployment and the shared credential
//! Secret from the declarative spec, applies idempotent corrections when the
//! observed cluster state drifts, and reports the outcome as a single
//! `Available` status condition.

pub mod backoff;
pub mod crd;
pub mod credentials;
pub mod deployment;
pub mod metrics;
pub mod reconciler;
pub mod secret;
pub mod server;
pub mod status;

/// Field manager identity used for all API writes performed by the operator.
pub const FIELD_MANAGER: &str = "verify-access-operator";

pub use crd::{IBMSecurityVerifyAccess, VerifyAccess, VerifyAccessSpec, VerifyAccessStatus};

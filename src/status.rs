//! # Condition Reporter
//!
//! Writes the single `Available` status condition reflecting the outcome of
//! the last convergence pass. The condition list is replaced wholesale on
//! every report; only the latest outcome is retained.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::error;

use crate::crd::{VerifyAccess, VerifyAccessStatus};
use crate::FIELD_MANAGER;

/// Which convergence path produced the outcome being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergencePath {
    Created,
    Updated,
}

impl ConvergencePath {
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::Created => "DeploymentCreated",
            Self::Updated => "DeploymentUpdated",
        }
    }

    #[must_use]
    pub fn success_message(self) -> &'static str {
        match self {
            Self::Created => "The deployment has been created.",
            Self::Updated => "The deployment has been updated.",
        }
    }
}

/// Build the single `Available` condition for an outcome.
///
/// `error` carries the failure text when the convergence attempt failed;
/// `None` means success. The observed generation is taken from the resource
/// so stale reports are recognizable.
#[must_use]
pub fn available_condition(
    path: ConvergencePath,
    error: Option<&str>,
    observed_generation: Option<i64>,
) -> Condition {
    let (status, message) = match error {
        None => ("True", path.success_message().to_string()),
        Some(text) => ("False", text.to_string()),
    };

    Condition {
        type_: "Available".to_string(),
        status: status.to_string(),
        reason: path.reason().to_string(),
        message,
        last_transition_time: Time(Utc::now()),
        observed_generation,
    }
}

/// Replace the resource's condition list with a single entry describing the
/// outcome, and persist it through the status subresource.
///
/// A failed status write is an error in its own right: the caller surfaces
/// it even when the reported operation succeeded, so that a convergence
/// whose status write failed is retried.
pub async fn report(
    client: &Client,
    resource: &VerifyAccess,
    path: ConvergencePath,
    error: Option<&str>,
) -> Result<(), kube::Error> {
    let name = resource.name_any();
    let namespace = resource.namespace().unwrap_or_else(|| "default".to_string());

    let api: Api<VerifyAccess> = Api::namespaced(client.clone(), &namespace);

    let status = VerifyAccessStatus {
        conditions: vec![available_condition(
            path,
            error,
            resource.metadata.generation,
        )],
    };

    let patch = serde_json::json!({ "status": status });

    if let Err(e) = api
        .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
    {
        error!(
            name = %name,
            namespace = %namespace,
            "Failed to update the condition for the resource: {}",
            e
        );
        return Err(e);
    }

    Ok(())
}

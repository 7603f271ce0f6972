//! # Reconciler
//!
//! Core convergence logic for `IBMSecurityVerifyAccess` resources.
//!
//! One pass per delivered event:
//!
//! 1. Fetch the resource; a missing resource is a deletion race and
//!    converges as a no-op.
//! 2. Look up the owned Deployment. Absent: synchronize the credential
//!    secret, build and create the Deployment, report the `Available`
//!    condition for the create path regardless of outcome.
//! 3. Present: compare the replica count only. Drift is corrected with a
//!    single update and reported; anything else is left untouched so a
//!    reconcile never triggers an unwanted rollout.
//!
//! Any API failure aborts the pass and is surfaced to the controller
//! runtime, which redelivers with backoff. No retries happen in here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::{watcher, Controller};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backoff::FibonacciBackoff;
use crate::crd::VerifyAccess;
use crate::secret::SecretSynchronizer;
use crate::server::ServerState;
use crate::status::{self, ConvergencePath};
use crate::{deployment, metrics};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to update the resource status: {0}")]
    Status(#[source] kube::Error),

    #[error("the resource is missing the metadata required for ownership")]
    MissingObjectMeta,
}

/// Injected per-process state shared by every convergence pass.
///
/// The credential-secret mutex lives inside the synchronizer; nothing here
/// is ambient global state.
pub struct Context {
    client: Client,
    synchronizer: SecretSynchronizer,
    backoffs: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl Context {
    #[must_use]
    pub fn new(client: Client, synchronizer: SecretSynchronizer) -> Self {
        Self {
            client,
            synchronizer,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    fn reset_backoff(&self, key: &str) {
        if let Some(backoff) = self.backoffs.lock().unwrap().get_mut(key) {
            backoff.reset();
        }
    }

    fn next_backoff(&self, key: &str) -> std::time::Duration {
        self.backoffs
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .next_backoff()
    }
}

fn resource_key(resource: &VerifyAccess) -> String {
    format!(
        "{}/{}",
        resource.namespace().unwrap_or_else(|| "default".to_string()),
        resource.name_any()
    )
}

/// One convergence pass for one resource identity.
pub async fn reconcile(resource: Arc<VerifyAccess>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start = Instant::now();
    metrics::increment_reconciliations();

    let name = resource.name_any();
    let namespace = resource
        .namespace()
        .unwrap_or_else(|| "default".to_string());
    let key = resource_key(&resource);

    // Re-fetch so the pass works against the latest spec, and so a deletion
    // race is recognized here rather than surfacing as a downstream error.
    let resources: Api<VerifyAccess> = Api::namespaced(ctx.client.clone(), &namespace);
    let resource = match resources.get(&name).await {
        Ok(current) => current,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            info!(
                name = %name,
                namespace = %namespace,
                "The VerifyAccess resource was not found. \
                 Ignoring this error since the object must have been deleted"
            );
            return Ok(Action::await_change());
        }
        Err(e) => {
            error!(
                name = %name,
                namespace = %namespace,
                "Failed to get the VerifyAccess resource: {}",
                e
            );
            return Err(Error::Kube(e));
        }
    };

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);

    let action = match deployments.get(&name).await {
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            create_deployment(&ctx, &resource, &deployments).await?;
            Ok(Action::await_change())
        }
        Err(e) => {
            error!(
                name = %name,
                namespace = %namespace,
                "Failed to retrieve the Deployment resource: {}",
                e
            );

            // The failure is also surfaced to users through the condition;
            // the lookup error keeps precedence over a failed status write.
            let _ = status::report(
                &ctx.client,
                &resource,
                ConvergencePath::Created,
                Some(&e.to_string()),
            )
            .await;

            Err(Error::Kube(e))
        }
        Ok(found) => {
            debug!(name = %name, namespace = %namespace, "Found a matching deployment");
            correct_replica_drift(&ctx, &resource, &deployments, found).await?;
            Ok(Action::await_change())
        }
    };

    if action.is_ok() {
        ctx.reset_backoff(&key);
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    }

    action
}

/// Create path: the deployment does not exist yet.
///
/// The credential secret is ensured first since the deployment references
/// it. The condition is reported for both outcomes; a create failure takes
/// precedence over a condition-write failure, but a condition-write failure
/// after a successful create is still surfaced so the pass is redelivered.
async fn create_deployment(
    ctx: &Context,
    resource: &VerifyAccess,
    deployments: &Api<Deployment>,
) -> Result<(), Error> {
    let name = resource.name_any();
    let namespace = resource
        .namespace()
        .unwrap_or_else(|| "default".to_string());

    let owner = resource
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectMeta)?;

    let outcome = async {
        ctx.synchronizer.ensure(&namespace, &owner).await?;

        let dep = deployment::build(resource, ctx.synchronizer.config(), owner.clone());

        info!(name = %name, namespace = %namespace, "Creating a new deployment");

        deployments.create(&PostParams::default(), &dep).await?;
        Ok::<(), kube::Error>(())
    }
    .await
    .map_err(Error::Kube);

    if let Err(e) = &outcome {
        error!(
            name = %name,
            namespace = %namespace,
            "Failed to create the new deployment: {}",
            e
        );
    } else {
        metrics::increment_deployments_created();
    }

    let error_text = outcome.as_ref().err().map(ToString::to_string);
    let report = status::report(
        &ctx.client,
        resource,
        ConvergencePath::Created,
        error_text.as_deref(),
    )
    .await;

    outcome?;
    report.map_err(Error::Status)?;

    Ok(())
}

/// Update path: only the replica count is compared and corrected. All other
/// fields are set at creation time and deliberately never re-synchronized.
async fn correct_replica_drift(
    ctx: &Context,
    resource: &VerifyAccess,
    deployments: &Api<Deployment>,
    mut found: Deployment,
) -> Result<(), Error> {
    let name = resource.name_any();
    let namespace = resource
        .namespace()
        .unwrap_or_else(|| "default".to_string());

    let desired = resource.spec.replicas;

    // A deployment without a spec has nothing to correct; writing one back
    // would report an update on every pass without changing anything.
    let Some(found_spec) = found.spec.as_mut() else {
        return Ok(());
    };

    if found_spec.replicas == Some(desired) {
        return Ok(());
    }

    found_spec.replicas = Some(desired);

    let outcome = deployments
        .replace(&name, &PostParams::default(), &found)
        .await
        .map(|_| ())
        .map_err(Error::Kube);

    match &outcome {
        Ok(()) => {
            info!(
                name = %name,
                namespace = %namespace,
                replicas = desired,
                "Updated an existing deployment"
            );
            metrics::increment_deployments_updated();
        }
        Err(e) => {
            error!(
                name = %name,
                namespace = %namespace,
                "Failed to update deployment: {}",
                e
            );
        }
    }

    let error_text = outcome.as_ref().err().map(ToString::to_string);
    let report = status::report(
        &ctx.client,
        resource,
        ConvergencePath::Updated,
        error_text.as_deref(),
    )
    .await;

    outcome?;
    report.map_err(Error::Status)?;

    Ok(())
}

/// Redelivery policy: per-resource Fibonacci backoff.
pub fn error_policy(resource: Arc<VerifyAccess>, error: &Error, ctx: Arc<Context>) -> Action {
    metrics::increment_reconciliation_errors();

    let key = resource_key(&resource);
    let delay = ctx.next_backoff(&key);

    warn!(
        resource = %key,
        "Reconciliation failed, requeueing in {}s: {}",
        delay.as_secs(),
        error
    );

    Action::requeue(delay)
}

/// Run the controller watch loop until shutdown.
///
/// Watches `IBMSecurityVerifyAccess` resources (all namespaces, or a single
/// one when configured) and owns the Deployments it creates so their events
/// also trigger redelivery.
pub async fn run(
    ctx: Arc<Context>,
    state: Arc<ServerState>,
    watch_namespace: Option<&str>,
) -> anyhow::Result<()> {
    let client = ctx.client.clone();

    let (resources, deployments) = if let Some(ns) = watch_namespace {
        (
            Api::<VerifyAccess>::namespaced(client.clone(), ns),
            Api::<Deployment>::namespaced(client, ns),
        )
    } else {
        (
            Api::<VerifyAccess>::all(client.clone()),
            Api::<Deployment>::all(client),
        )
    };

    info!("Starting the VerifyAccess controller");
    state.set_ready();

    Controller::new(resources, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(o) => debug!(?o, "reconciled"),
                Err(e) => warn!("reconcile error: {}", e),
            }
        })
        .await;

    Ok(())
}

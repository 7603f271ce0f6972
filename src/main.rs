//! # Verify Access Operator
//!
//! Controller binary. Wires together:
//!
//! 1. **Tracing** - `RUST_LOG`-driven structured logging
//! 2. **Metrics and probes** - HTTP server for `/metrics`, `/healthz`, `/readyz`
//! 3. **Credential refresher** - background task publishing snapshot manager
//!    credentials into the shared store
//! 4. **Controller** - the `IBMSecurityVerifyAccess` watch loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use kube::Client;
use tokio::sync::Mutex;
use tracing::{error, info};

use verify_access_operator::credentials::{
    CredentialRefresher, CredentialStore, EnvCredentialSource,
};
use verify_access_operator::metrics;
use verify_access_operator::reconciler::{self, Context};
use verify_access_operator::secret::{SecretConfig, SecretSynchronizer};
use verify_access_operator::server::{serve, ServerState};

#[derive(Debug, Parser)]
#[command(name = "verify-access-operator", about = "Verify Access operator")]
struct Args {
    /// Port for the metrics and probe endpoints.
    #[arg(long, env = "METRICS_PORT", default_value_t = 5000)]
    metrics_port: u16,

    /// Restrict the watch to a single namespace instead of the whole cluster.
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Seconds between snapshot manager credential refreshes.
    #[arg(long, env = "CREDENTIAL_REFRESH_SECONDS", default_value_t = 300)]
    credential_refresh_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verify_access_operator=info".into()),
        )
        .init();

    info!(
        "Starting the Verify Access operator (version {}, build {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_GIT_HASH"),
        env!("BUILD_DATETIME")
    );

    metrics::register().context("Failed to register metrics")?;

    let server_state = ServerState::new();
    let server_port = args.metrics_port;
    let probe_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = serve(server_port, probe_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create the Kubernetes client")?;

    // The store is shared between the refresher and the secret synchronizer;
    // its mutex is the serialization point for all credential secret writes.
    let store = Arc::new(Mutex::new(CredentialStore::default()));
    let refresher = CredentialRefresher::spawn(
        Arc::new(EnvCredentialSource),
        Arc::clone(&store),
        Duration::from_secs(args.credential_refresh_seconds),
    );

    let synchronizer = SecretSynchronizer::new(client.clone(), SecretConfig::default(), store);
    let ctx = Arc::new(Context::new(client, synchronizer));

    reconciler::run(ctx, server_state, args.watch_namespace.as_deref()).await?;

    info!("Controller stopped");
    refresher.shutdown().await;

    Ok(())
}

use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use node_policy_controller::cli::{format_dry_run, Args};
use node_policy_controller::client::{ComputeClient, MetadataClient, StaticToken, TokenSource};
use node_policy_controller::cluster::{
    CachedNodeProvider, NodeWatcher, PolicyApplier, Reconciler, WatchConfig,
};
use node_policy_controller::config::{load_env_file, Settings};
use node_policy_controller::server::{create_router, AppState};

#[tokio::main]
async fn main() {
    let mut args = Args::parse();

    // Load .env file if specified, then re-read flags so env-backed ones see it
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = load_env_file(env_file) {
            eprintln!("{}", e);
            process::exit(1);
        }
        args = Args::parse();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_filter())),
        )
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let metadata = Arc::new(MetadataClient::from_env()?);
    let settings = Settings::resolve(&args, metadata.as_ref()).await?;

    // Dry-run mode: print settings and exit
    if args.dry_run {
        println!("{}", format_dry_run(&settings));
        return Ok(());
    }

    if settings.security_policy_url.is_empty() {
        warn!("No security policy given, selected nodes will have their policy cleared");
    }

    let tokens: Arc<dyn TokenSource> = match settings.access_token {
        Some(ref token) => Arc::new(StaticToken::new(token.clone())),
        None => metadata as Arc<dyn TokenSource>,
    };
    let compute = ComputeClient::new(
        settings.compute_endpoint.clone(),
        tokens,
        settings.request_timeout,
    )
    .context("Failed to build Compute Engine client")?;
    let applier = PolicyApplier::new(
        Arc::new(compute),
        settings.project_id.clone(),
        settings.security_policy_url.clone(),
    );

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let watcher = NodeWatcher::new(Api::<Node>::all(client));
    let store = watcher.store();

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(CachedNodeProvider::new(store.clone())),
        applier,
        settings.selector.clone(),
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let state = AppState::new(reconciler.clone());
    {
        let state = state.clone();
        tokio::spawn(async move {
            match store.wait_until_ready().await {
                Ok(()) => {
                    info!("Node cache synced");
                    state.mark_ready();
                }
                Err(e) => warn!("Node cache never became ready: {}", e),
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&settings.health_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.health_addr))?;

    info!("Health server listening on {}", settings.health_addr);
    info!("Endpoints:");
    info!("  GET  /healthz - Liveness check");
    info!("  GET  /readyz  - Node cache synced");
    info!("  GET  /status  - Processed nodes");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let app = create_router(state);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
        {
            error!("Health server error: {}", e);
        }
    });

    let config = WatchConfig {
        requeue_after: settings.requeue_after,
        call_timeout: settings.request_timeout,
    };
    watcher.run(reconciler, config, shutdown.clone()).await;

    // The watch stream can end on its own; make sure the server follows
    shutdown.cancel();
    let _ = server.await;

    info!("Controller stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::Context;
use std::{env, sync::Arc};
use tokio::{net::TcpListener, sync::mpsc, time::interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use log_shipper::{
    config::{ShipperConfig, LOG_LEVEL_VAR},
    driver::{LifecycleEvent, PipelineDriver},
    key::ObjectKeyGenerator,
    listener::IngestListener,
    logger,
    policy::BatchPolicy,
    queue::IngestQueue,
    transport::FsBlobStore,
    uploader::{FinalizeOutcome, Uploader},
};

const LIFECYCLE_CHANNEL_SIZE: usize = 16;

#[tokio::main]
pub async fn main() {
    let env_filter = log_directives(env::var(LOG_LEVEL_VAR).ok().as_deref());
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .event_format(logger::Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }
    debug!("Logging subsystem enabled");

    if let Err(e) = run().await {
        error!("Log shipper stopped: {e:#}");
        std::process::exit(1);
    }
}

fn log_directives(level: Option<&str>) -> String {
    let level = level.map_or_else(|| "info".to_string(), str::to_lowercase);
    format!("h2=off,hyper=off,{level}")
}

async fn run() -> anyhow::Result<()> {
    let config = ShipperConfig::from_env().context("invalid configuration")?;
    info!(
        "Starting log shipper for bucket {} (ship rate: {} bytes, {} invokes, {} ms)",
        config.bucket,
        config.thresholds.max_bytes,
        config.thresholds.max_invokes,
        config.thresholds.max_millis
    );

    let queue = Arc::new(IngestQueue::new());
    let cancel = CancellationToken::new();

    let tcp = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind push endpoint on {}", config.listen_addr))?;
    let listener = IngestListener::new(Arc::clone(&queue), cancel.clone());
    let listener_handle = tokio::spawn(listener.serve(tcp));

    let keys = ObjectKeyGenerator::new(&config.source_name);
    let store = Arc::new(FsBlobStore::new(&config.store_root, config.source_name.clone()));
    let uploader = Uploader::new(store, keys, config.uploader_config());
    let policy = BatchPolicy::new(Arc::clone(&queue), config.thresholds);
    let driver = PipelineDriver::new(Arc::clone(&queue), policy, uploader, config.shutdown_grace);

    let (tx, rx) = mpsc::channel(LIFECYCLE_CHANNEL_SIZE);
    let driver_handle = tokio::spawn(driver.run(rx));

    let mut ticks = interval(config.tick_interval);
    ticks.tick().await;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if tx.send(LifecycleEvent::Invoke).await.is_err() {
                    error!("Pipeline stopped unexpectedly");
                    break;
                }
            }
            () = &mut shutdown => {
                debug!("Shutdown signal received");
                break;
            }
        }
    }

    cancel.cancel();
    let _ = tx.send(LifecycleEvent::Shutdown).await;
    match driver_handle.await {
        Ok(Ok(FinalizeOutcome::Shipped { key, bytes, .. })) => {
            debug!("Final batch of {bytes} bytes shipped to {key}");
        }
        Ok(Ok(FinalizeOutcome::NothingToShip)) => debug!("No logs left to ship"),
        Ok(Err(e)) => error!("Final batch was not shipped: {e}"),
        Err(e) => error!("Pipeline task failed: {e}"),
    }
    match listener_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Push endpoint failed: {e}"),
        Err(e) => error!("Push endpoint task failed: {e}"),
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

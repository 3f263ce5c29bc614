// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use std::{env, process, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use spool_shipper::{
    client::{shared, UploadClient},
    config::{read_node_id, BacklogPolicy, Config},
    error::ShipperError,
    failures::FailureCounters,
    spool::SpoolRegistry,
    sweeper::RetrySweeper,
    uploader::EventUploader,
    watcher::SpoolWatcher,
};

#[tokio::main]
pub async fn main() {
    let config = Config::from_env(env::args().skip(1));

    // Fall back to the default level so a bad configuration can still be reported
    let log_level = config
        .as_ref()
        .map(|config| config.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    // Also installs the `log` bridge, so records from `notify` reach the same output
    #[allow(clippy::expect_used)]
    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .event_format(logger::Formatter)
        .try_init()
        .expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("Shutting down: {e}");
        process::exit(1);
    }
    info!("Shut down");
}

async fn run(config: Config) -> Result<(), ShipperError> {
    let node_id = read_node_id(&config.node_id_file)?;
    let registry = Arc::new(SpoolRegistry::scan(&config.uploads_root)?);
    if registry.is_empty() {
        warn!(
            "No spool directories found under {}",
            config.uploads_root.display()
        );
    }
    for directory in registry.iter() {
        info!(
            "Shipping {} from {}",
            directory.name(),
            directory.path().display()
        );
    }
    match config.backlog_policy {
        BacklogPolicy::Quota { max_bytes } => info!(
            "Retrying every {}s, keeping at most {max_bytes} bytes of failed uploads",
            config.retry_interval.as_secs()
        ),
        BacklogPolicy::MaxAge { max_age } => info!(
            "Retrying every {}s, giving up on files after {}s",
            config.retry_interval.as_secs(),
            max_age.as_secs()
        ),
    }

    let client = shared(UploadClient::new(&config, node_id)?);
    let (_watcher, events) = SpoolWatcher::subscribe(Arc::clone(&registry))?;
    info!("Uploading to {} as build {}", config.uploads_url, config.build_id);

    let cancel_token = CancellationToken::new();
    tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            wait_for_signal().await;
            cancel_token.cancel();
        }
    });

    let failures = FailureCounters::new(Arc::clone(&registry), config.failures_file.clone());
    let sweeper = RetrySweeper::new(
        Arc::clone(&registry),
        Arc::clone(&client),
        failures,
        config.retry_interval,
        config.backlog_policy,
    );
    let sweeper_handle = tokio::spawn(sweeper.run(cancel_token.clone()));

    let uploader = EventUploader::new(registry, client);
    let result = uploader.run(events, cancel_token.clone()).await;

    cancel_token.cancel();
    if let Err(e) = sweeper_handle.await {
        error!("Retry sweeper task failed: {e}");
    }
    result
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => match result {
                        Ok(()) => info!("Received Ctrl+C, shutting down"),
                        Err(e) => {
                            error!("Failed to listen for Ctrl+C: {e}");
                            sigterm.recv().await;
                            info!("Received SIGTERM, shutting down");
                        }
                    },
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => error!("Failed to listen for SIGTERM: {e}"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            // Without any signal source, run until the event loop fails
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

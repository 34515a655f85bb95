// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context as _, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use arangodb_operator::config::{Config, Mode};
use arangodb_operator::constants::kubernetes::ACCESS_CACHE_TTL;
use arangodb_operator::context::Context;
use arangodb_operator::crd::{self, CrdOutcome, CrdRegistry};
use arangodb_operator::kclient::{Factories, RateLimiters};

/// How long startup waits for a usable kubeconfig
const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `install` waits for new CRDs to be served
const ESTABLISHED_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: mode={:?}", config.mode);

    let registry = CrdRegistry::builtin().context("Failed to register built-in CRDs")?;
    registry
        .validate()
        .context("Built-in CRDs are not valid")?;
    let opts = config.ensure_options(&registry);

    if config.mode == Mode::Generate {
        let yaml = crd::generate_crd_yaml(&registry, &opts).await?;
        print!("{}", yaml);
        return Ok(());
    }

    info!("Starting ArangoDB operator");

    let limiters = Arc::new(RateLimiters::new(
        config.kubernetes_qps,
        config.kubernetes_burst,
    ));
    let factories = Arc::new(Factories::new(
        limiters,
        ACCESS_CACHE_TTL,
        config.kubernetes_timeout,
    ));

    let ctx = Context::background();
    let client = factories
        .default_factory()
        .ensure_ready(&ctx, STARTUP_TIMEOUT)
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let report = crd::ensure(&ctx, &client, &registry, &opts)
        .await
        .context("Failed to ensure CRDs")?;
    for (name, outcome) in report.outcomes() {
        match outcome {
            CrdOutcome::Skipped(reason) => info!("CRD {} skipped: {}", name, reason),
            CrdOutcome::Failed(message) => warn!("CRD {} failed: {}", name, message),
            _ => {}
        }
    }

    if config.mode == Mode::Install {
        let created: Vec<String> = report
            .outcomes()
            .iter()
            .filter(|(_, outcome)| matches!(outcome, CrdOutcome::Created | CrdOutcome::Updated))
            .map(|(name, _)| name.clone())
            .collect();
        if !created.is_empty() {
            crd::wait_for_established(
                &ctx,
                &client,
                &created,
                Duration::from_secs(1),
                ESTABLISHED_TIMEOUT,
            )
            .await
            .context("CRDs did not become established")?;
        }
        info!("CRD installation finished");
        return Ok(());
    }

    // Keep the kubeconfig fresh until the process is asked to stop
    let refresh = {
        let factories = factories.clone();
        let ctx = ctx.clone();
        let interval = config.refresh_interval;
        tokio::spawn(async move { factories.refresh_loop(&ctx, interval).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    ctx.cancel();
    factories.default_factory().rate_limiter().stop();
    refresh.await?;

    Ok(())
}

// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Named client factories.
//!
//! A factory turns a [`ConfigGetter`] into a rate-limited [`Client`] bundle and
//! rebuilds it only when the kubeconfig checksum changes. Every factory has a
//! named rate limiter, shared with all clients it ever builds.

use crate::context::Context;
use crate::error::{ConfigurationError, OperatorError, Result};
use crate::kclient::access::AccessCache;
use crate::kclient::config_getter::{default_config_getter, ConfigGetter};
use crate::kclient::rate_limiter::{RateLimitLayer, RateLimiter, RateLimiters};
use crate::kclient::Client;
use crate::retry::{permanent, retry_with_context, Failure, RetryError};
use kube::client::ClientBuilder;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Name of the factory talking to the operator's own cluster
pub const DEFAULT_FACTORY: &str = "";

/// Name of the factory whose rate limiter is never shared with the others
pub const UNATTACHED_FACTORY: &str = "unattached";

#[derive(Default)]
struct FactoryState {
    getter: Option<ConfigGetter>,
    checksum: Option<String>,
    client: Option<Client>,
}

pub struct Factory {
    name: String,
    limiter: Arc<RateLimiter>,
    access: Arc<AccessCache>,
    timeout: Duration,
    state: RwLock<FactoryState>,
    generation: AtomicU64,
}

impl Factory {
    pub fn new(name: &str, limiter: Arc<RateLimiter>, access_ttl: Duration, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            limiter,
            access: Arc::new(AccessCache::new(name, access_ttl)),
            timeout,
            state: RwLock::new(FactoryState::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_config_getter(mut self, getter: ConfigGetter) -> Self {
        self.state.get_mut().getter = Some(getter);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Number of client bundles built so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Load the configuration and rebuild the client if it changed.
    ///
    /// On failure the previous client stays in place.
    #[instrument(skip(self), fields(factory = %self.name))]
    pub async fn refresh(&self) -> Result<()> {
        let getter = self
            .state
            .read()
            .await
            .getter
            .clone()
            .ok_or_else(|| ConfigurationError::MissingConfigGetter(self.name.clone()))?;

        let (config, checksum) = getter().await?;

        let mut state = self.state.write().await;
        if state.client.is_some() && state.checksum.as_deref() == Some(checksum.as_str()) {
            debug!("Kubeconfig unchanged, keeping client");
            return Ok(());
        }

        let kubernetes = ClientBuilder::try_from(config)?
            .with_layer(&RateLimitLayer::new(self.limiter.clone()))
            .build();

        // A new credential may carry different permissions.
        self.access.clear();
        state.client = Some(self.bundle(kubernetes));
        state.checksum = Some(checksum);
        info!("Kubernetes client for factory '{}' refreshed", self.name);
        Ok(())
    }

    /// Refresh until a client is available, retrying transient failures for
    /// up to `timeout`. A missing config getter fails at once.
    pub async fn ensure_ready(
        &self,
        ctx: &Context,
        timeout: Duration,
    ) -> std::result::Result<Client, RetryError<OperatorError>> {
        let factory = self;
        retry_with_context(
            ctx,
            move |_| async move {
                match factory.refresh().await {
                    Ok(()) => factory.ready_client().await.map_err(Failure::Transient),
                    Err(e @ OperatorError::Configuration(_)) => Err(permanent(e)),
                    Err(e) => Err(Failure::Transient(e)),
                }
            },
            timeout,
            None,
        )
        .await
    }

    /// Current client, if one was built
    pub async fn client(&self) -> Option<Client> {
        self.state.read().await.client.clone()
    }

    /// Current client, or an error when the factory was never refreshed
    pub async fn ready_client(&self) -> Result<Client> {
        self.client()
            .await
            .ok_or_else(|| OperatorError::ClientNotReady(self.name.clone()))
    }

    /// Replace the client with `kubernetes` as is, bypassing the config getter.
    pub async fn set_client(&self, kubernetes: kube::Client) {
        let mut state = self.state.write().await;
        self.access.clear();
        state.client = Some(self.bundle(kubernetes));
        state.checksum = None;
    }

    /// Swap the config getter; the next refresh builds a new client.
    pub async fn set_kube_config_getter(&self, getter: ConfigGetter) {
        let mut state = self.state.write().await;
        state.getter = Some(getter);
        state.checksum = None;
        state.client = None;
        self.access.clear();
    }

    async fn has_getter(&self) -> bool {
        self.state.read().await.getter.is_some()
    }

    fn bundle(&self, kubernetes: kube::Client) -> Client {
        self.generation.fetch_add(1, Ordering::SeqCst);
        Client::new(&self.name, kubernetes, self.access.clone(), self.timeout)
    }
}

/// Registry of named factories
pub struct Factories {
    limiters: Arc<RateLimiters>,
    access_ttl: Duration,
    timeout: Duration,
    factories: Mutex<HashMap<String, Arc<Factory>>>,
}

impl Factories {
    pub fn new(limiters: Arc<RateLimiters>, access_ttl: Duration, timeout: Duration) -> Self {
        Self {
            limiters,
            access_ttl,
            timeout,
            factories: Mutex::new(HashMap::new()),
        }
    }

    pub fn rate_limiters(&self) -> &Arc<RateLimiters> {
        &self.limiters
    }

    /// Get the factory called `name`, creating it on first use.
    ///
    /// New factories have no config getter, except for the default and the
    /// unattached ones which use [`default_config_getter`].
    pub fn get(&self, name: &str) -> Arc<Factory> {
        let mut factories = self.factories.lock().unwrap_or_else(PoisonError::into_inner);
        factories
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Created client factory '{}'", name);
                let factory =
                    Factory::new(name, self.limiters.get(name), self.access_ttl, self.timeout);
                if name == DEFAULT_FACTORY || name == UNATTACHED_FACTORY {
                    Arc::new(factory.with_config_getter(default_config_getter()))
                } else {
                    Arc::new(factory)
                }
            })
            .clone()
    }

    pub fn default_factory(&self) -> Arc<Factory> {
        self.get(DEFAULT_FACTORY)
    }

    pub fn unattached(&self) -> Arc<Factory> {
        self.get(UNATTACHED_FACTORY)
    }

    /// Refresh every factory with a config getter. Failures are logged and
    /// returned; the affected factories keep their previous clients.
    pub async fn refresh_all(&self) -> Vec<(String, OperatorError)> {
        let factories: Vec<Arc<Factory>> = self
            .factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut failures = Vec::new();
        for factory in factories {
            if !factory.has_getter().await {
                continue;
            }
            if let Err(e) = factory.refresh().await {
                warn!("Failed to refresh client factory '{}': {}", factory.name(), e);
                failures.push((factory.name().to_string(), e));
            }
        }
        failures
    }

    /// Refresh all factories every `interval` until `ctx` is done.
    pub async fn refresh_loop(&self, ctx: &Context, interval: Duration) {
        info!("Starting kubeconfig refresh every {:?}", interval);
        loop {
            tokio::select! {
                _ = ctx.done() => break,
                _ = tokio::time::sleep(interval) => {
                    self.refresh_all().await;
                }
            }
        }
        info!("Kubeconfig refresh stopped");
    }
}

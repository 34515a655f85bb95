// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The bundle of typed Kubernetes clients handed out by a factory.

use crate::constants::groups;
use crate::context::Context;
use crate::error::Result;
use crate::kclient::access::AccessCache;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Kubernetes clients sharing one credential, one rate limiter and one
/// RBAC decision cache. Cloning is cheap.
#[derive(Clone)]
pub struct Client {
    name: String,
    kubernetes: kube::Client,
    access: Arc<AccessCache>,
    timeout: Duration,
}

impl Client {
    pub fn new(
        name: &str,
        kubernetes: kube::Client,
        access: Arc<AccessCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            kubernetes,
            access,
            timeout,
        }
    }

    /// Name of the factory this client was built by
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Core Kubernetes client
    pub fn kubernetes(&self) -> &kube::Client {
        &self.kubernetes
    }

    /// CustomResourceDefinitions (apiextensions.k8s.io/v1)
    pub fn kubernetes_extensions(&self) -> Api<CustomResourceDefinition> {
        Api::all(self.kubernetes.clone())
    }

    /// One of the operator's own custom resources, e.g. `ArangoDeployment`
    pub fn arango(&self, group: &str, version: &str, kind: &str, namespace: &str) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind));
        Api::namespaced_with(self.kubernetes.clone(), namespace, &resource)
    }

    /// `ArangoDeployment` resources of `namespace`
    pub fn arango_deployments(&self, namespace: &str) -> Api<DynamicObject> {
        self.arango(groups::DATABASE, "v1", "ArangoDeployment", namespace)
    }

    /// Prometheus operator `ServiceMonitor` resources of `namespace`
    pub fn monitoring(&self, namespace: &str) -> Api<DynamicObject> {
        let resource =
            ApiResource::from_gvk(&GroupVersionKind::gvk(groups::MONITORING, "v1", "ServiceMonitor"));
        Api::namespaced_with(self.kubernetes.clone(), namespace, &resource)
    }

    pub fn access_cache(&self) -> &AccessCache {
        &self.access
    }

    /// Timeout applied to every single API call
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one API call bounded by `ctx` and the client timeout.
    pub async fn call<T, F>(&self, ctx: &Context, call: F) -> Result<T>
    where
        F: Future<Output = kube::Result<T>>,
    {
        Ok(ctx.with_timeout(self.timeout).run(call).await??)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

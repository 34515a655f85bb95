// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! RBAC checks with cached SelfSubjectAccessReview results.
//!
//! A failed check is a soft deny, never an error: callers skip the work they
//! are not allowed to do instead of failing.

use crate::cache::TtlCache;
use crate::constants::groups;
use crate::context::Context;
use crate::error::Result;
use crate::kclient::Client;
use futures::future::join_all;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
    SubjectAccessReviewStatus,
};
use kube::api::{Api, PostParams};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Attributes of a single RBAC question, used as the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AccessRequest {
    pub namespace: String,
    pub verb: String,
    pub group: String,
    pub version: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
}

impl AccessRequest {
    pub fn new(verb: &str, group: &str, version: &str, resource: &str) -> Self {
        Self {
            verb: verb.to_string(),
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            ..Default::default()
        }
    }

    /// Access to a single CustomResourceDefinition
    pub fn crd(verb: &str, name: &str) -> Self {
        Self::new(verb, groups::API_EXTENSIONS, "v1", "customresourcedefinitions").with_name(name)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_subresource(mut self, subresource: &str) -> Self {
        self.subresource = subresource.to_string();
        self
    }

    fn resource_attributes(&self) -> ResourceAttributes {
        fn opt(value: &str) -> Option<String> {
            (!value.is_empty()).then(|| value.to_string())
        }

        ResourceAttributes {
            namespace: opt(&self.namespace),
            verb: opt(&self.verb),
            group: opt(&self.group),
            version: opt(&self.version),
            resource: opt(&self.resource),
            subresource: opt(&self.subresource),
            name: opt(&self.name),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessStatus {
    pub allowed: bool,
    pub denied: bool,
    pub reason: String,
    pub evaluation_error: String,
}

impl AccessStatus {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    /// An explicit deny always wins over an allow.
    pub fn is_allowed(&self) -> bool {
        self.allowed && !self.denied
    }

    fn unable_to_check(err: impl std::fmt::Display) -> Self {
        Self {
            allowed: false,
            reason: format!("Unable to check access: {}", err),
            ..Default::default()
        }
    }
}

impl From<SubjectAccessReviewStatus> for AccessStatus {
    fn from(status: SubjectAccessReviewStatus) -> Self {
        Self {
            allowed: status.allowed,
            denied: status.denied.unwrap_or(false),
            reason: status.reason.unwrap_or_default(),
            evaluation_error: status.evaluation_error.unwrap_or_default(),
        }
    }
}

/// RBAC decisions of one client identity
pub struct AccessCache {
    name: String,
    cache: TtlCache<AccessRequest, AccessStatus>,
}

impl AccessCache {
    pub fn new(name: &str, ttl: Duration) -> Self {
        Self {
            name: name.to_string(),
            cache: TtlCache::new(ttl),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

/// Check whether `client` may perform `request`, consulting the cache first.
#[instrument(skip(ctx, client), fields(client = %client.name()))]
pub async fn verify_access_request(
    ctx: &Context,
    client: &Client,
    request: &AccessRequest,
) -> AccessStatus {
    let result = client
        .access_cache()
        .cache
        .get(request, || review(ctx, client, request))
        .await;

    match result {
        Ok(status) => {
            debug!(allowed = status.is_allowed(), reason = %status.reason, "Access verified");
            status
        }
        Err(err) => {
            warn!("Unable to check access: {}", err);
            AccessStatus::unable_to_check(err)
        }
    }
}

/// Check all `requests` concurrently; allowed only if every one is allowed.
///
/// The reported status is the first denied request in input order. All
/// checks run to completion.
pub async fn verify_all_access_request(
    ctx: &Context,
    client: &Client,
    requests: &[AccessRequest],
) -> AccessStatus {
    let statuses = join_all(
        requests
            .iter()
            .map(|request| verify_access_request(ctx, client, request)),
    )
    .await;

    statuses
        .into_iter()
        .find(|status| !status.is_allowed())
        .unwrap_or_else(AccessStatus::allowed)
}

/// Shorthand for a single CRD permission check
pub async fn verify_crd_access(ctx: &Context, client: &Client, verb: &str, name: &str) -> bool {
    verify_access_request(ctx, client, &AccessRequest::crd(verb, name))
        .await
        .is_allowed()
}

async fn review(ctx: &Context, client: &Client, request: &AccessRequest) -> Result<AccessStatus> {
    let reviews: Api<SelfSubjectAccessReview> = Api::all(client.kubernetes().clone());
    let review = SelfSubjectAccessReview {
        spec: SelfSubjectAccessReviewSpec {
            resource_attributes: Some(request.resource_attributes()),
            ..Default::default()
        },
        ..Default::default()
    };

    let created = client
        .call(ctx, reviews.create(&PostParams::default(), &review))
        .await?;

    Ok(created.status.map(AccessStatus::from).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_client, FakeApiServer};

    const CRD: &str = "arangodeployments.database.arangodb.com";

    #[test]
    fn test_explicit_deny_wins() {
        let status = AccessStatus {
            allowed: true,
            denied: true,
            ..Default::default()
        };
        assert!(!status.is_allowed());
    }

    #[test]
    fn test_resource_attributes_skip_empty_fields() {
        let attrs = AccessRequest::crd("get", CRD).resource_attributes();
        assert_eq!(attrs.verb.as_deref(), Some("get"));
        assert_eq!(attrs.group.as_deref(), Some("apiextensions.k8s.io"));
        assert_eq!(attrs.name.as_deref(), Some(CRD));
        assert_eq!(attrs.namespace, None);
        assert_eq!(attrs.subresource, None);
    }

    #[tokio::test]
    async fn test_allowed_request() {
        let server = FakeApiServer::new();
        let client = test_client(&server);

        let status =
            verify_access_request(&Context::background(), &client, &AccessRequest::crd("get", CRD))
                .await;
        assert!(status.is_allowed());
    }

    #[tokio::test]
    async fn test_denied_request() {
        let server = FakeApiServer::new().deny("create", CRD);
        let client = test_client(&server);

        let status = verify_access_request(
            &Context::background(),
            &client,
            &AccessRequest::crd("create", CRD),
        )
        .await;
        assert!(!status.is_allowed());
        assert!(status.denied);
    }

    #[tokio::test]
    async fn test_decisions_are_cached() {
        let server = FakeApiServer::new();
        let client = test_client(&server);
        let ctx = Context::background();
        let request = AccessRequest::crd("get", CRD);

        for _ in 0..3 {
            assert!(verify_access_request(&ctx, &client, &request).await.is_allowed());
        }
        assert_eq!(server.review_count(), 1);

        verify_access_request(&ctx, &client, &AccessRequest::crd("update", CRD)).await;
        assert_eq!(server.review_count(), 2);
    }

    #[tokio::test]
    async fn test_review_failure_is_soft_deny() {
        let server = FakeApiServer::new().fail_reviews();
        let client = test_client(&server);

        let status =
            verify_access_request(&Context::background(), &client, &AccessRequest::crd("get", CRD))
                .await;
        assert!(!status.allowed);
        assert!(status.reason.starts_with("Unable to check access"));
    }

    #[tokio::test]
    async fn test_verify_all_reports_first_denied() {
        let server = FakeApiServer::new().deny("update", CRD).deny("delete", CRD);
        let client = test_client(&server);

        let requests = vec![
            AccessRequest::crd("get", CRD),
            AccessRequest::crd("update", CRD),
            AccessRequest::crd("delete", CRD),
        ];
        let status = verify_all_access_request(&Context::background(), &client, &requests).await;

        assert!(!status.is_allowed());
        assert!(status.reason.contains("update"));
        assert_eq!(server.review_count(), 3);
    }

    #[tokio::test]
    async fn test_verify_all_allows_empty_and_all_allowed() {
        let server = FakeApiServer::new();
        let client = test_client(&server);
        let ctx = Context::background();

        assert!(verify_all_access_request(&ctx, &client, &[]).await.is_allowed());

        let requests = vec![AccessRequest::crd("get", CRD), AccessRequest::crd("list", CRD)];
        assert!(verify_all_access_request(&ctx, &client, &requests)
            .await
            .is_allowed());
    }
}

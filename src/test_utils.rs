// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! In-memory Kubernetes API server for tests.
//!
//! Serves CustomResourceDefinition get/create/replace and
//! SelfSubjectAccessReview, and records what it was asked.

use crate::constants::kubernetes::{ACCESS_CACHE_TTL, DEFAULT_TIMEOUT};
use crate::kclient::{AccessCache, Client};
use http::{Method, Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

const CRD_PATH: &str = "/apis/apiextensions.k8s.io/v1/customresourcedefinitions";
const REVIEW_PATH: &str = "/apis/authorization.k8s.io/v1/selfsubjectaccessreviews";

#[derive(Default)]
struct FakeState {
    crds: BTreeMap<String, Value>,
    denied: HashSet<(String, String)>,
    failing_crds: HashSet<String>,
    fail_reviews: bool,
    crd_calls: HashMap<String, usize>,
    reviews: usize,
    resource_version: u64,
}

impl FakeState {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// Fake API server usable as the service of a `kube::Client`
#[derive(Clone, Default)]
pub struct FakeApiServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny `verb` on the CRD called `name`
    pub fn deny(self, verb: &str, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .denied
            .insert((verb.to_string(), name.to_string()));
        self
    }

    /// Answer every SelfSubjectAccessReview with an internal error
    pub fn fail_reviews(self) -> Self {
        self.state.lock().unwrap().fail_reviews = true;
        self
    }

    /// Answer every request for the CRD called `name` with an internal error
    pub fn fail_crd(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_crds
            .insert(name.to_string());
        self
    }

    /// Pre-load a live CRD
    pub fn with_crd(self, mut crd: Value) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let name = crd["metadata"]["name"].as_str().unwrap().to_string();
            crd["metadata"]["resourceVersion"] = json!(state.next_resource_version());
            state.crds.insert(name, crd);
        }
        self
    }

    /// Current live CRD called `name`
    pub fn crd(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().crds.get(name).cloned()
    }

    /// Number of CRD requests made with `method`
    pub fn crd_calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .crd_calls
            .get(method)
            .copied()
            .unwrap_or_default()
    }

    /// Number of SelfSubjectAccessReviews received
    pub fn review_count(&self) -> usize {
        self.state.lock().unwrap().reviews
    }

    pub fn into_client(self) -> kube::Client {
        kube::Client::new(self, "default")
    }

    fn handle(&self, method: &Method, path: &str, body: &[u8]) -> (u16, Value) {
        if path == REVIEW_PATH && *method == Method::POST {
            return self.review(body);
        }

        let Some(rest) = path.strip_prefix(CRD_PATH) else {
            return status(404, "NotFound", &format!("{} not found", path));
        };

        let mut state = self.state.lock().unwrap();
        *state.crd_calls.entry(method.to_string()).or_default() += 1;

        let name = match rest.strip_prefix('/') {
            Some(name) => name.to_string(),
            None => serde_json::from_slice::<Value>(body)
                .ok()
                .and_then(|crd| crd["metadata"]["name"].as_str().map(str::to_string))
                .unwrap_or_default(),
        };
        if state.failing_crds.contains(&name) {
            return status(500, "InternalError", "etcd is unavailable");
        }

        match (method.as_str(), rest.is_empty()) {
            ("GET", false) => match state.crds.get(&name) {
                Some(crd) => (200, crd.clone()),
                None => not_found(&name),
            },
            ("POST", true) => {
                if state.crds.contains_key(&name) {
                    return status(409, "AlreadyExists", &format!("{} already exists", name));
                }
                let mut crd: Value = serde_json::from_slice(body).unwrap();
                crd["metadata"]["resourceVersion"] = json!(state.next_resource_version());
                crd["metadata"]["uid"] = json!(format!("uid-{}", name));
                crd["status"] = json!({
                    "conditions": [{ "type": "Established", "status": "True" }]
                });
                state.crds.insert(name, crd.clone());
                (201, crd)
            }
            ("PUT", false) => {
                let Some(live) = state.crds.get(&name) else {
                    return not_found(&name);
                };
                let mut crd: Value = serde_json::from_slice(body).unwrap();
                let expected = &live["metadata"]["resourceVersion"];
                let given = &crd["metadata"]["resourceVersion"];
                if !given.is_null() && given != expected {
                    return status(409, "Conflict", "the object has been modified");
                }
                crd["metadata"]["uid"] = live["metadata"]["uid"].clone();
                crd["metadata"]["resourceVersion"] = json!(state.next_resource_version());
                state.crds.insert(name, crd.clone());
                (200, crd)
            }
            _ => status(405, "MethodNotAllowed", "method not allowed"),
        }
    }

    fn review(&self, body: &[u8]) -> (u16, Value) {
        let mut state = self.state.lock().unwrap();
        state.reviews += 1;
        if state.fail_reviews {
            return status(500, "InternalError", "authorizer is unavailable");
        }

        let mut review: Value = serde_json::from_slice(body).unwrap();
        let attributes = &review["spec"]["resourceAttributes"];
        let verb = attributes["verb"].as_str().unwrap_or_default().to_string();
        let name = attributes["name"].as_str().unwrap_or_default().to_string();

        review["status"] = if state.denied.contains(&(verb.clone(), name.clone())) {
            json!({
                "allowed": false,
                "denied": true,
                "reason": format!("{} on customresourcedefinitions/{} is forbidden", verb, name),
            })
        } else {
            json!({ "allowed": true })
        };
        (201, review)
    }
}

impl Service<Request<Body>> for FakeApiServer {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let server = self.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body.collect().await?.to_bytes();
            let (code, value) = server.handle(&parts.method, parts.uri.path(), &body);

            Ok(Response::builder()
                .status(code)
                .header("content-type", "application/json")
                .body(Body::from(value.to_string().into_bytes()))
                .unwrap())
        })
    }
}

/// A client bundle talking to `server`
pub fn test_client(server: &FakeApiServer) -> Client {
    Client::new(
        "",
        server.clone().into_client(),
        Arc::new(AccessCache::new("", ACCESS_CACHE_TTL)),
        DEFAULT_TIMEOUT,
    )
}

fn status(code: u16, reason: &str, message: &str) -> (u16, Value) {
    (
        code,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": code
        }),
    )
}

fn not_found(name: &str) -> (u16, Value) {
    status(
        404,
        "NotFound",
        &format!("customresourcedefinitions.apiextensions.k8s.io \"{}\" not found", name),
    )
}

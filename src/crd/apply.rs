// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Bring the CRDs of the cluster in line with the registry.
//!
//! A CRD is only written when its content labels differ from the desired
//! ones. Missing permissions skip the CRD instead of failing the run.

use crate::constants::OPERATOR_NAME;
use crate::context::Context;
use crate::crd::definition::CrdOptions;
use crate::crd::registry::{CrdRegistration, CrdRegistry};
use crate::error::{OperatorError, Result};
use crate::kclient::{verify_crd_access, Client};
use crate::retry::{self, RetryError};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::PostParams;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Default)]
pub struct EnsureCrdOptions {
    /// Record failures per CRD and continue with the next one
    pub ignore_errors: bool,
    /// Write every CRD even if its labels are current
    pub force_update: bool,
    /// Per-CRD options, overriding the registered defaults
    pub crd_options: BTreeMap<String, CrdOptions>,
    /// CRDs left alone
    pub skip: BTreeSet<String>,
}

impl EnsureCrdOptions {
    /// Options for `name`: the override if present, else `default`.
    pub fn options_for(&self, name: &str, default: CrdOptions) -> CrdOptions {
        self.crd_options.get(name).copied().unwrap_or(default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Listed in [`EnsureCrdOptions::skip`]
    Excluded,
    GetDenied,
    CreateDenied,
    UpdateDenied,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Excluded => write!(f, "excluded by configuration"),
            SkipReason::GetDenied => write!(f, "get not allowed"),
            SkipReason::CreateDenied => write!(f, "create not allowed"),
            SkipReason::UpdateDenied => write!(f, "update not allowed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrdOutcome {
    Created,
    Updated,
    UpToDate,
    Skipped(SkipReason),
    Failed(String),
}

/// Outcome of one [`ensure`] run per CRD
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsureReport {
    outcomes: BTreeMap<String, CrdOutcome>,
}

impl EnsureReport {
    pub fn get(&self, name: &str) -> Option<&CrdOutcome> {
        self.outcomes.get(name)
    }

    pub fn outcomes(&self) -> &BTreeMap<String, CrdOutcome> {
        &self.outcomes
    }

    /// Names of the CRDs that could not be applied
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, CrdOutcome::Failed(_)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Number of CRDs written to the cluster
    pub fn changed(&self) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| matches!(outcome, CrdOutcome::Created | CrdOutcome::Updated))
            .count()
    }

    fn record(&mut self, name: &str, outcome: CrdOutcome) {
        self.outcomes.insert(name.to_string(), outcome);
    }
}

/// Create or upgrade every registered CRD that is not skipped.
///
/// Errors abort the run unless `ignore_errors` is set, in which case they are
/// recorded in the report.
#[instrument(skip_all, fields(client = %client.name()))]
pub async fn ensure(
    ctx: &Context,
    client: &Client,
    registry: &CrdRegistry,
    opts: &EnsureCrdOptions,
) -> Result<EnsureReport> {
    let _guard = registry.lock().await;
    let mut report = EnsureReport::default();

    for (name, crd) in registry.iter() {
        if opts.skip.contains(name) {
            info!("CRD {} is skipped", name);
            report.record(name, CrdOutcome::Skipped(SkipReason::Excluded));
            continue;
        }

        match ensure_crd(ctx, client, name, crd, opts).await {
            Ok(outcome) => report.record(name, outcome),
            Err(e) if opts.ignore_errors => {
                warn!("Unable to ensure CRD {}: {}", name, e);
                report.record(name, CrdOutcome::Failed(e.to_string()));
            }
            Err(e) => {
                error!("Unable to ensure CRD {}: {}", name, e);
                return Err(e);
            }
        }
    }

    info!(
        "CRDs ensured: {} changed, {} failed",
        report.changed(),
        report.failed().len()
    );
    Ok(report)
}

async fn ensure_crd(
    ctx: &Context,
    client: &Client,
    name: &str,
    crd: &CrdRegistration,
    opts: &EnsureCrdOptions,
) -> Result<CrdOutcome> {
    if !verify_crd_access(ctx, client, "get", name).await {
        info!("Get operations are not allowed for CRD {}", name);
        return Ok(CrdOutcome::Skipped(SkipReason::GetDenied));
    }

    let definition = crd.definition(opts.options_for(name, crd.default_options()))?;
    let crds = client.kubernetes_extensions();

    let Some(mut live) = client.call(ctx, crds.get_opt(name)).await? else {
        if !verify_crd_access(ctx, client, "create", name).await {
            info!("Create operations are not allowed for CRD {}", name);
            return Ok(CrdOutcome::Skipped(SkipReason::CreateDenied));
        }

        client
            .call(ctx, crds.create(&post_params(), &definition.labeled()))
            .await?;
        info!("CRD {} created", name);
        return Ok(CrdOutcome::Created);
    };

    if !verify_crd_access(ctx, client, "update", name).await {
        info!("Update operations are not allowed for CRD {}", name);
        return Ok(CrdOutcome::Skipped(SkipReason::UpdateDenied));
    }

    if !opts.force_update && definition.labels.matches(live.metadata.labels.as_ref()) {
        info!("CRD {} update not required", name);
        return Ok(CrdOutcome::UpToDate);
    }

    definition
        .labels
        .apply_to(live.metadata.labels.get_or_insert_with(BTreeMap::new));
    live.spec = definition.crd.spec;

    client
        .call(ctx, crds.replace(name, &post_params(), &live))
        .await?;
    info!("CRD {} updated", name);
    Ok(CrdOutcome::Updated)
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(OPERATOR_NAME.to_string()),
        ..Default::default()
    }
}

/// Poll until every CRD in `names` reports the `Established` condition.
#[instrument(skip(ctx, client))]
pub async fn wait_for_established(
    ctx: &Context,
    client: &Client,
    names: &[String],
    interval: Duration,
    timeout: Duration,
) -> std::result::Result<(), RetryError<OperatorError>> {
    let crds = client.kubernetes_extensions();

    retry::timeout(interval, timeout, || {
        let crds = crds.clone();
        async move {
            for name in names {
                let crd = client.call(ctx, crds.get_opt(name)).await?;
                if !crd.as_ref().is_some_and(is_established) {
                    debug!("CRD {} is not established yet", name);
                    return Ok(ControlFlow::Continue(()));
                }
            }
            info!("All CRDs are established");
            Ok(ControlFlow::Break(()))
        }
    })
    .await
}

fn is_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
}

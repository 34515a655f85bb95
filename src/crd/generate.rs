// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Offline export of the registered CRDs.

use crate::crd::apply::EnsureCrdOptions;
use crate::crd::registry::CrdRegistry;
use crate::error::Result;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

/// Render every CRD not in the skip list, in name order, with labels.
pub async fn generate_crds(
    registry: &CrdRegistry,
    opts: &EnsureCrdOptions,
) -> Result<Vec<CustomResourceDefinition>> {
    let _guard = registry.lock().await;
    render_all(registry, opts)
}

/// All rendered CRDs as one multi-document YAML stream
pub async fn generate_crd_yaml(registry: &CrdRegistry, opts: &EnsureCrdOptions) -> Result<String> {
    let _guard = registry.lock().await;

    let mut out = String::new();
    for crd in render_all(registry, opts)? {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}

fn render_all(
    registry: &CrdRegistry,
    opts: &EnsureCrdOptions,
) -> Result<Vec<CustomResourceDefinition>> {
    registry
        .iter()
        .filter(|(name, _)| !opts.skip.contains(*name))
        .map(|(name, crd)| -> Result<CustomResourceDefinition> {
            let definition = crd.definition(opts.options_for(name, crd.default_options()))?;
            Ok(definition.labeled())
        })
        .collect()
}

// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CustomResourceDefinitions owned by the operator

pub mod apply;
pub mod definition;
pub mod definitions;
pub mod generate;
pub mod registry;

pub use apply::{ensure, wait_for_established, CrdOutcome, EnsureCrdOptions, EnsureReport, SkipReason};
pub use definition::{CrdDefinition, CrdDefinitionData, CrdLabels, CrdOptions};
pub use generate::{generate_crd_yaml, generate_crds};
pub use registry::{CrdGetter, CrdRegistration, CrdRegistry};

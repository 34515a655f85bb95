// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::context::ContextError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to load kubeconfig: {0}")]
    KubeconfigError(String),

    #[error("Kubernetes client for factory '{0}' is not initialized")]
    ClientNotReady(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Kubernetes call aborted: {0}")]
    Context(#[from] ContextError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

/// Errors that can only be fixed by changing the build or the startup
/// configuration. They are reported before the operator starts serving.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("CRD {0} is already registered")]
    DuplicateCrd(String),

    #[error("Schema for version {version} of CRD {name} is missing")]
    MissingSchema { name: String, version: String },

    #[error("Embedded definition of CRD {name} is invalid: {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("CRDs {first} and {second} have identical checksums")]
    ChecksumCollision { first: String, second: String },

    #[error("Kubeconfig getter is not set for factory '{0}'")]
    MissingConfigGetter(String),

    #[error("Invalid value '{value}' for {key}")]
    InvalidSetting { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, OperatorError>;

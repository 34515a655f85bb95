// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::kubernetes::{
    DEFAULT_BURST, DEFAULT_QPS, DEFAULT_REFRESH_INTERVAL, DEFAULT_TIMEOUT,
};
use crate::crd::{CrdRegistry, EnsureCrdOptions};
use crate::error::ConfigurationError;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// What the operator binary does after startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Apply the CRDs, wait for them to be established and exit
    Install,
    /// Print the CRDs as YAML and exit without contacting a cluster
    Generate,
    /// Apply the CRDs and keep the clients refreshed until stopped
    #[default]
    Run,
}

impl FromStr for Mode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "install" => Ok(Mode::Install),
            "generate" => Ok(Mode::Generate),
            "run" => Ok(Mode::Run),
            _ => Err(ConfigurationError::InvalidSetting {
                key: "OPERATOR_MODE".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub mode: Mode,
    /// Timeout of a single Kubernetes API call
    pub kubernetes_timeout: Duration,
    pub kubernetes_qps: f32,
    pub kubernetes_burst: u32,
    /// Interval between kubeconfig reloads
    pub refresh_interval: Duration,
    /// Overrides the registered schema default of every CRD when set
    pub crd_with_schema: Option<bool>,
    /// Overrides the registered preserve default of every CRD when set
    pub crd_with_preserve: Option<bool>,
    pub crd_ignore_errors: bool,
    pub crd_force_update: bool,
    pub crd_skip: BTreeSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            kubernetes_timeout: DEFAULT_TIMEOUT,
            kubernetes_qps: DEFAULT_QPS,
            kubernetes_burst: DEFAULT_BURST,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            crd_with_schema: None,
            crd_with_preserve: None,
            crd_ignore_errors: false,
            crd_force_update: false,
            crd_skip: BTreeSet::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mode = match get("OPERATOR_MODE") {
            Some(value) => value.parse()?,
            None => defaults.mode,
        };

        let kubernetes_timeout = get("OPERATOR_KUBERNETES_TIMEOUT_SECS")
            .map(|value| parse_setting::<u64>("OPERATOR_KUBERNETES_TIMEOUT_SECS", &value))
            .transpose()?
            .map_or(defaults.kubernetes_timeout, Duration::from_secs);
        let kubernetes_qps = get("OPERATOR_KUBERNETES_QPS")
            .map(|value| parse_setting::<f32>("OPERATOR_KUBERNETES_QPS", &value))
            .transpose()?
            .unwrap_or(defaults.kubernetes_qps);
        let kubernetes_burst = get("OPERATOR_KUBERNETES_BURST")
            .map(|value| parse_setting::<u32>("OPERATOR_KUBERNETES_BURST", &value))
            .transpose()?
            .unwrap_or(defaults.kubernetes_burst);
        let refresh_interval = get("OPERATOR_REFRESH_INTERVAL_SECS")
            .map(|value| parse_setting::<u64>("OPERATOR_REFRESH_INTERVAL_SECS", &value))
            .transpose()?
            .map_or(defaults.refresh_interval, Duration::from_secs);

        let crd_with_schema = get("OPERATOR_CRD_WITH_SCHEMA")
            .map(|value| parse_setting::<bool>("OPERATOR_CRD_WITH_SCHEMA", &value))
            .transpose()?;
        let crd_with_preserve = get("OPERATOR_CRD_WITH_PRESERVE")
            .map(|value| parse_setting::<bool>("OPERATOR_CRD_WITH_PRESERVE", &value))
            .transpose()?;
        let crd_ignore_errors = get("OPERATOR_CRD_IGNORE_ERRORS")
            .map(|value| parse_setting::<bool>("OPERATOR_CRD_IGNORE_ERRORS", &value))
            .transpose()?
            .unwrap_or(defaults.crd_ignore_errors);
        let crd_force_update = get("OPERATOR_CRD_FORCE_UPDATE")
            .map(|value| parse_setting::<bool>("OPERATOR_CRD_FORCE_UPDATE", &value))
            .transpose()?
            .unwrap_or(defaults.crd_force_update);
        let crd_skip: BTreeSet<String> = get("OPERATOR_CRD_SKIP")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if kubernetes_timeout.is_zero() {
            return Err(ConfigurationError::InvalidSetting {
                key: "OPERATOR_KUBERNETES_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
            })
            .context("Kubernetes timeout must be positive");
        }
        if !kubernetes_qps.is_finite() || kubernetes_qps < 0.0 {
            return Err(ConfigurationError::InvalidSetting {
                key: "OPERATOR_KUBERNETES_QPS".to_string(),
                value: kubernetes_qps.to_string(),
            })
            .context("Kubernetes QPS must be a finite, non-negative number");
        }
        if refresh_interval.is_zero() {
            return Err(ConfigurationError::InvalidSetting {
                key: "OPERATOR_REFRESH_INTERVAL_SECS".to_string(),
                value: "0".to_string(),
            })
            .context("Refresh interval must be positive");
        }

        Ok(Config {
            mode,
            kubernetes_timeout,
            kubernetes_qps,
            kubernetes_burst,
            refresh_interval,
            crd_with_schema,
            crd_with_preserve,
            crd_ignore_errors,
            crd_force_update,
            crd_skip,
        })
    }

    /// Apply options for every CRD in `registry`, with the global overrides
    /// layered over the registered defaults.
    pub fn ensure_options(&self, registry: &CrdRegistry) -> EnsureCrdOptions {
        let crd_options = registry
            .default_crd_options()
            .into_iter()
            .map(|(name, mut options)| {
                if let Some(with_schema) = self.crd_with_schema {
                    options.with_schema = with_schema;
                }
                if let Some(with_preserve) = self.crd_with_preserve {
                    options.with_preserve = with_preserve;
                }
                (name, options)
            })
            .collect();

        EnsureCrdOptions {
            ignore_errors: self.crd_ignore_errors,
            force_update: self.crd_force_update,
            crd_options,
            skip: self.crd_skip.clone(),
        }
    }
}

fn parse_setting<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse::<T>().map_err(|e| {
        anyhow::Error::new(ConfigurationError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
        })
        .context(e.to_string())
    })
}

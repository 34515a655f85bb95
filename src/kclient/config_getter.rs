// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Sources of Kubernetes client configuration.
//!
//! A [`ConfigGetter`] returns a `kube::Config` together with a checksum of the
//! material it was built from. Factories only rebuild their clients when the
//! checksum changes.

use crate::error::{OperatorError, Result};
use crate::util::sha256_hex;
use futures::future::BoxFuture;
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Service-account token mounted into every pod
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

pub type ConfigGetter =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(kube::Config, String)>> + Send + Sync>;

/// `KUBECONFIG`, then the in-cluster service account, then `~/.kube/config`.
pub fn default_config_getter() -> ConfigGetter {
    Arc::new(|| Box::pin(load_default_config()))
}

/// Always hands out the same configuration.
pub fn static_config_getter(config: kube::Config, checksum: &str) -> ConfigGetter {
    let checksum = checksum.to_string();
    Arc::new(move || {
        let config = config.clone();
        let checksum = checksum.clone();
        Box::pin(async move { Ok((config, checksum)) })
    })
}

/// Builds the configuration from kubeconfig contents held in memory.
pub fn kubeconfig_getter(contents: String) -> ConfigGetter {
    Arc::new(move || {
        let contents = contents.clone();
        Box::pin(async move {
            let kubeconfig = parse_kubeconfig(&contents)?;
            let config = config_from_kubeconfig(kubeconfig).await?;
            Ok((config, sha256_hex(contents.as_bytes())))
        })
    })
}

#[instrument]
pub async fn load_default_config() -> Result<(kube::Config, String)> {
    if let Some(paths) = env::var_os("KUBECONFIG").filter(|paths| !paths.is_empty()) {
        let paths: Vec<PathBuf> = env::split_paths(&paths).collect();
        debug!("Loading kubeconfig from KUBECONFIG: {:?}", paths);
        return load_kubeconfig_files(&paths).await;
    }

    match kube::Config::incluster() {
        Ok(config) => {
            debug!("Using in-cluster configuration");
            return Ok((config, token_checksum(Path::new(SERVICE_ACCOUNT_TOKEN)).await));
        }
        Err(e) => debug!("In-cluster configuration not available: {}", e),
    }

    let home = env::var_os("HOME").ok_or_else(|| {
        OperatorError::KubeconfigError(
            "KUBECONFIG is not set, not running in a cluster and HOME is unknown".to_string(),
        )
    })?;
    let path = Path::new(&home).join(".kube").join("config");
    debug!("Loading kubeconfig from {}", path.display());
    load_kubeconfig_files(&[path]).await
}

/// Load and merge kubeconfig files; the checksum covers all of their bytes.
pub async fn load_kubeconfig_files(paths: &[PathBuf]) -> Result<(kube::Config, String)> {
    let mut raw = Vec::new();
    let mut merged: Option<Kubeconfig> = None;

    for path in paths {
        let data = tokio::fs::read(path).await.map_err(|e| {
            OperatorError::KubeconfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let contents = String::from_utf8(data).map_err(|e| {
            OperatorError::KubeconfigError(format!("Failed to decode {}: {}", path.display(), e))
        })?;
        let kubeconfig = parse_kubeconfig(&contents)?;

        merged = Some(match merged {
            Some(previous) => previous.merge(kubeconfig).map_err(|e| {
                OperatorError::KubeconfigError(format!("Failed to merge kubeconfig: {}", e))
            })?,
            None => kubeconfig,
        });
        raw.extend_from_slice(contents.as_bytes());
    }

    let kubeconfig = merged
        .ok_or_else(|| OperatorError::KubeconfigError("No kubeconfig file given".to_string()))?;
    let config = config_from_kubeconfig(kubeconfig).await?;
    Ok((config, sha256_hex(&raw)))
}

fn parse_kubeconfig(contents: &str) -> Result<Kubeconfig> {
    serde_yaml::from_str(contents)
        .map_err(|e| OperatorError::KubeconfigError(format!("Failed to parse kubeconfig: {}", e)))
}

async fn config_from_kubeconfig(kubeconfig: Kubeconfig) -> Result<kube::Config> {
    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| OperatorError::KubeconfigError(format!("Failed to create config: {}", e)))
}

/// Checksum of the token at `path`. An unreadable token hashes as empty, so
/// the next successful read is seen as a credential change.
async fn token_checksum(path: &Path) -> String {
    let token = match tokio::fs::read(path).await {
        Ok(token) => token,
        Err(e) => {
            warn!("Failed to read service account token {}: {}", path.display(), e);
            Vec::new()
        }
    };
    sha256_hex(&token)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn kubeconfig_yaml(server: &str) -> String {
        format!(
            r#"apiVersion: v1
kind: Config
clusters:
- name: test
  cluster:
    server: {}
    insecure-skip-tls-verify: true
contexts:
- name: test
  context:
    cluster: test
    user: test
current-context: test
users:
- name: test
  user:
    token: secret-token
"#,
            server
        )
    }

    #[tokio::test]
    async fn test_kubeconfig_getter_checksums_contents() {
        let getter = kubeconfig_getter(kubeconfig_yaml("https://10.0.0.1:6443"));
        let (config, checksum) = getter().await.unwrap();
        assert_eq!(config.cluster_url.host(), Some("10.0.0.1"));
        assert_eq!(
            checksum,
            sha256_hex(kubeconfig_yaml("https://10.0.0.1:6443").as_bytes())
        );

        let (_, again) = getter().await.unwrap();
        assert_eq!(checksum, again);

        let other = kubeconfig_getter(kubeconfig_yaml("https://10.0.0.2:6443"));
        let (_, changed) = other().await.unwrap();
        assert_ne!(checksum, changed);
    }

    #[tokio::test]
    async fn test_load_kubeconfig_file() {
        let path = env::temp_dir().join(format!("arangodb-operator-kubeconfig-{}", std::process::id()));
        let contents = kubeconfig_yaml("https://10.0.0.3:6443");
        std::fs::write(&path, &contents).unwrap();

        let (config, checksum) = load_kubeconfig_files(&[path.clone()]).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.cluster_url.host(), Some("10.0.0.3"));
        assert_eq!(checksum, sha256_hex(contents.as_bytes()));
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_file() {
        let result = load_kubeconfig_files(&[PathBuf::from("/nonexistent/kubeconfig")]).await;
        assert!(matches!(result, Err(OperatorError::KubeconfigError(_))));
    }

    #[tokio::test]
    async fn test_token_checksum() {
        let path = env::temp_dir().join(format!("arangodb-operator-token-{}", std::process::id()));
        std::fs::write(&path, "token-a").unwrap();
        let checksum = token_checksum(&path).await;
        std::fs::remove_file(&path).unwrap();
        assert_eq!(checksum, sha256_hex(b"token-a"));

        let missing = token_checksum(Path::new("/nonexistent/token")).await;
        assert_eq!(missing, sha256_hex(b""));
        assert_ne!(missing, checksum);
    }

    #[tokio::test]
    async fn test_invalid_kubeconfig() {
        let getter = kubeconfig_getter("clusters: [".to_string());
        assert!(matches!(
            getter().await,
            Err(OperatorError::KubeconfigError(_))
        ));
    }
}

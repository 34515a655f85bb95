// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Registry of the CRDs the operator manages.
//!
//! The registry is filled once at startup and read-only afterwards. Applying
//! and exporting CRDs are serialized through [`CrdRegistry::lock`].

use crate::crd::definition::{CrdDefinition, CrdDefinitionData, CrdOptions};
use crate::crd::definitions;
use crate::error::ConfigurationError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Renders a CRD for a set of options
pub type CrdGetter =
    Arc<dyn Fn(CrdOptions) -> Result<CrdDefinition, ConfigurationError> + Send + Sync>;

#[derive(Clone)]
pub struct CrdRegistration {
    getter: CrdGetter,
    default_options: CrdOptions,
}

impl CrdRegistration {
    pub fn definition(&self, options: CrdOptions) -> Result<CrdDefinition, ConfigurationError> {
        (self.getter)(options)
    }

    pub fn default_options(&self) -> CrdOptions {
        self.default_options
    }
}

#[derive(Default)]
pub struct CrdRegistry {
    crds: BTreeMap<String, CrdRegistration>,
    lock: Mutex<()>,
}

impl CrdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every CRD compiled into the operator
    pub fn builtin() -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        for (data, options) in definitions::builtin() {
            registry.register_data(data, options)?;
        }
        Ok(registry)
    }

    /// Register a CRD under the name its getter reports for `default_options`.
    pub fn register<F>(&mut self, getter: F, default_options: CrdOptions) -> Result<(), ConfigurationError>
    where
        F: Fn(CrdOptions) -> Result<CrdDefinition, ConfigurationError> + Send + Sync + 'static,
    {
        let name = getter(default_options)?.name;
        if self.crds.contains_key(&name) {
            return Err(ConfigurationError::DuplicateCrd(name));
        }

        debug!("Registered CRD {}", name);
        self.crds.insert(
            name,
            CrdRegistration {
                getter: Arc::new(getter),
                default_options,
            },
        );
        Ok(())
    }

    /// Register embedded definition data
    pub fn register_data(
        &mut self,
        data: CrdDefinitionData,
        default_options: CrdOptions,
    ) -> Result<(), ConfigurationError> {
        self.register(move |options| data.render(options), default_options)
    }

    pub fn get(&self, name: &str) -> Option<&CrdRegistration> {
        self.crds.get(name)
    }

    /// Registered CRDs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CrdRegistration)> {
        self.crds.iter().map(|(name, crd)| (name.as_str(), crd))
    }

    pub fn names(&self) -> Vec<String> {
        self.crds.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.crds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crds.is_empty()
    }

    /// Default options of every registered CRD
    pub fn default_crd_options(&self) -> BTreeMap<String, CrdOptions> {
        self.crds
            .iter()
            .map(|(name, crd)| (name.clone(), crd.default_options))
            .collect()
    }

    /// Check that every CRD renders in all option combinations and that no
    /// two CRDs share a checksum.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut seen: HashMap<String, String> = HashMap::new();

        for (name, crd) in &self.crds {
            let mut definition = None;
            for options in [
                CrdOptions::new(true, false),
                CrdOptions::new(true, true),
                CrdOptions::new(false, false),
            ] {
                let rendered = crd.definition(options)?;
                if &rendered.name != name {
                    return Err(ConfigurationError::InvalidDefinition {
                        name: name.clone(),
                        reason: format!("renders as {}", rendered.name),
                    });
                }
                definition = Some(rendered);
            }

            if let Some(definition) = definition {
                let (checksum, _) = definition.data.label_checksum();
                if let Some(first) = seen.insert(checksum, name.clone()) {
                    return Err(ConfigurationError::ChecksumCollision {
                        first,
                        second: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Serializes apply and export runs
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::definitions::{BACKUPS_BACKUP, DATABASE_DEPLOYMENT};

    #[test]
    fn test_builtin_registry() {
        let registry = CrdRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 8);
        assert_eq!(
            registry.names(),
            vec![
                "arangobackuppolicies.backup.arangodb.com",
                "arangobackups.backup.arangodb.com",
                "arangoclustersynchronizations.database.arangodb.com",
                "arangodeploymentreplications.replication.database.arangodb.com",
                "arangodeployments.database.arangodb.com",
                "arangolocalstorages.storage.arangodb.com",
                "arangomembers.database.arangodb.com",
                "arangotasks.database.arangodb.com",
            ]
        );
        registry.validate().unwrap();
    }

    #[test]
    fn test_default_crd_options() {
        let registry = CrdRegistry::builtin().unwrap();
        let options = registry.default_crd_options();
        assert_eq!(options.len(), 8);
        assert_eq!(
            options["arangodeployments.database.arangodb.com"],
            CrdOptions::new(true, true)
        );
        assert_eq!(
            options["arangobackups.backup.arangodb.com"],
            CrdOptions::default()
        );
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = CrdRegistry::new();
        registry
            .register_data(BACKUPS_BACKUP, CrdOptions::default())
            .unwrap();
        assert_eq!(
            registry.register_data(BACKUPS_BACKUP, CrdOptions::new(false, false)),
            Err(ConfigurationError::DuplicateCrd(
                "arangobackups.backup.arangodb.com".to_string()
            ))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_getter_receives_requested_options() {
        let mut registry = CrdRegistry::new();
        registry
            .register_data(DATABASE_DEPLOYMENT, CrdOptions::default())
            .unwrap();
        let crd = registry.get("arangodeployments.database.arangodb.com").unwrap();

        let definition = crd.definition(CrdOptions::new(false, false)).unwrap();
        assert_eq!(definition.options, CrdOptions::new(false, false));
        assert_eq!(definition.labels.schema, None);
    }

    #[test]
    fn test_validate_reports_missing_schema() {
        let definition = String::from_utf8(BACKUPS_BACKUP.definition().to_vec()).unwrap();
        let mut registry = CrdRegistry::new();
        registry
            .register_data(
                CrdDefinitionData::new(definition.into_bytes(), b"v1: {}\n".to_vec()),
                CrdOptions::new(false, false),
            )
            .unwrap();

        assert_eq!(
            registry.validate(),
            Err(ConfigurationError::MissingSchema {
                name: "arangobackups.backup.arangodb.com".to_string(),
                version: "v1alpha".to_string(),
            })
        );
    }

    #[test]
    fn test_validate_reports_checksum_collision() {
        let mut registry = CrdRegistry::new();
        registry
            .register_data(BACKUPS_BACKUP, CrdOptions::default())
            .unwrap();
        registry
            .register(
                |options| {
                    let mut definition = BACKUPS_BACKUP.render(options)?;
                    definition.name = "copies.backup.arangodb.com".to_string();
                    Ok(definition)
                },
                CrdOptions::default(),
            )
            .unwrap();

        assert!(matches!(
            registry.validate(),
            Err(ConfigurationError::ChecksumCollision { .. })
        ));
    }
}

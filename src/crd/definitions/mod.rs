// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRDs compiled into the operator binary.

use crate::crd::definition::{CrdDefinitionData, CrdOptions};

macro_rules! embedded {
    ($file:literal) => {
        CrdDefinitionData::from_static(
            include_str!(concat!($file, ".yaml")),
            include_str!(concat!($file, ".schema.generated.yaml")),
        )
    };
}

pub const DATABASE_DEPLOYMENT: CrdDefinitionData = embedded!("database-deployment");
pub const DATABASE_MEMBER: CrdDefinitionData = embedded!("database-member");
pub const DATABASE_TASK: CrdDefinitionData = embedded!("database-task");
pub const DATABASE_CLUSTER_SYNCHRONIZATION: CrdDefinitionData =
    embedded!("database-clustersynchronization");
pub const BACKUPS_BACKUP: CrdDefinitionData = embedded!("backups-backup");
pub const BACKUPS_BACKUP_POLICY: CrdDefinitionData = embedded!("backups-backuppolicy");
pub const REPLICATION_DEPLOYMENT_REPLICATION: CrdDefinitionData =
    embedded!("replication-deploymentreplication");
pub const STORAGE_LOCAL_STORAGE: CrdDefinitionData = embedded!("storage-localstorage");

/// Every built-in CRD with its default options
pub fn builtin() -> Vec<(CrdDefinitionData, CrdOptions)> {
    vec![
        // Deployments carry user-provided server arguments the schema cannot describe.
        (DATABASE_DEPLOYMENT, CrdOptions::new(true, true)),
        (DATABASE_MEMBER, CrdOptions::default()),
        (DATABASE_TASK, CrdOptions::default()),
        (DATABASE_CLUSTER_SYNCHRONIZATION, CrdOptions::default()),
        (BACKUPS_BACKUP, CrdOptions::default()),
        (BACKUPS_BACKUP_POLICY, CrdOptions::default()),
        (REPLICATION_DEPLOYMENT_REPLICATION, CrdOptions::default()),
        (STORAGE_LOCAL_STORAGE, CrdOptions::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_definitions_render() {
        for (data, options) in builtin() {
            let definition = data.render(options).unwrap();
            assert!(definition.name.ends_with("arangodb.com"), "{}", definition.name);
            data.render(CrdOptions::new(false, false)).unwrap();
        }
    }

    #[test]
    fn test_builtin_checksums_are_distinct() {
        let definitions: HashSet<String> = builtin().iter().map(|(d, _)| d.checksum().0).collect();
        let schemas: HashSet<String> = builtin().iter().map(|(d, _)| d.checksum().1).collect();
        assert_eq!(definitions.len(), builtin().len());
        assert_eq!(schemas.len(), builtin().len());
    }

    #[test]
    fn test_backup_versions() {
        let crd = BACKUPS_BACKUP.crd().unwrap();
        let versions: Vec<&str> = crd.spec.versions.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(versions, vec!["v1", "v1alpha"]);
        assert!(crd.spec.versions[0].storage);
        assert_eq!(
            crd.spec.versions[0]
                .additional_printer_columns
                .as_ref()
                .map(Vec::len),
            Some(8)
        );
    }
}

// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Embedded CustomResourceDefinition artifacts and their rendering.

use crate::constants::labels;
use crate::error::ConfigurationError;
use crate::util::sha256_hex;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceValidation, JSONSchemaProps,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// How a CRD is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdOptions {
    /// Install the full OpenAPI validation schema
    pub with_schema: bool,
    /// Keep fields the schema does not know about
    pub with_preserve: bool,
}

impl Default for CrdOptions {
    fn default() -> Self {
        Self {
            with_schema: true,
            with_preserve: false,
        }
    }
}

impl CrdOptions {
    pub fn new(with_schema: bool, with_preserve: bool) -> Self {
        Self {
            with_schema,
            with_preserve,
        }
    }

    /// Without a schema unknown fields are always preserved.
    pub fn effective_preserve(&self) -> bool {
        self.with_preserve || !self.with_schema
    }
}

/// Raw CRD manifest plus the validation schema of each of its versions.
///
/// Both blobs are kept byte for byte; their SHA-256 hashes identify the
/// definition on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrdDefinitionData {
    definition: Cow<'static, [u8]>,
    schema_definition: Cow<'static, [u8]>,
}

impl CrdDefinitionData {
    pub const fn from_static(definition: &'static str, schema_definition: &'static str) -> Self {
        Self {
            definition: Cow::Borrowed(definition.as_bytes()),
            schema_definition: Cow::Borrowed(schema_definition.as_bytes()),
        }
    }

    pub fn new(definition: Vec<u8>, schema_definition: Vec<u8>) -> Self {
        Self {
            definition: Cow::Owned(definition),
            schema_definition: Cow::Owned(schema_definition),
        }
    }

    pub fn definition(&self) -> &[u8] {
        &self.definition
    }

    pub fn schema_definition(&self) -> &[u8] {
        &self.schema_definition
    }

    /// Hex SHA-256 of the definition and of the schema definition
    pub fn checksum(&self) -> (String, String) {
        (
            sha256_hex(&self.definition),
            sha256_hex(&self.schema_definition),
        )
    }

    /// The checksums as stored in CRD labels. Label values are limited to 63
    /// characters, so the last hex digit is dropped.
    pub fn label_checksum(&self) -> (String, String) {
        let (mut definition, mut schema) = self.checksum();
        definition.truncate(labels::MAX_VALUE_LENGTH);
        schema.truncate(labels::MAX_VALUE_LENGTH);
        (definition, schema)
    }

    /// The manifest exactly as embedded, without any version schema applied
    pub fn crd(&self) -> Result<CustomResourceDefinition, ConfigurationError> {
        serde_yaml::from_slice(&self.definition).map_err(|e| self.invalid(e))
    }

    /// Validation schema per API version name
    pub fn schemas(&self) -> Result<BTreeMap<String, CustomResourceValidation>, ConfigurationError> {
        if self.schema_definition.is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_yaml::from_slice(&self.schema_definition).map_err(|e| self.invalid(e))
    }

    /// Build the CRD object for `options`.
    pub fn render(&self, options: CrdOptions) -> Result<CrdDefinition, ConfigurationError> {
        let mut crd = self.crd()?;
        let name = crd.metadata.name.clone().unwrap_or_default();
        if name.is_empty() {
            return Err(ConfigurationError::InvalidDefinition {
                name: crd.spec.names.plural.clone(),
                reason: "metadata.name is not set".to_string(),
            });
        }

        if options.with_schema {
            let schemas = self.schemas()?;
            for version in crd.spec.versions.iter_mut() {
                let mut schema = schemas.get(&version.name).cloned().ok_or_else(|| {
                    ConfigurationError::MissingSchema {
                        name: name.clone(),
                        version: version.name.clone(),
                    }
                })?;
                if options.with_preserve {
                    schema
                        .open_api_v3_schema
                        .get_or_insert_with(object_schema)
                        .x_kubernetes_preserve_unknown_fields = Some(true);
                }
                version.schema = Some(schema);
            }
        } else {
            for version in crd.spec.versions.iter_mut() {
                version.schema = Some(CustomResourceValidation {
                    open_api_v3_schema: Some(JSONSchemaProps {
                        x_kubernetes_preserve_unknown_fields: Some(true),
                        ..object_schema()
                    }),
                });
            }
        }

        Ok(CrdDefinition {
            name,
            labels: CrdLabels::new(self, options),
            data: self.clone(),
            options,
            crd,
        })
    }

    fn invalid(&self, err: serde_yaml::Error) -> ConfigurationError {
        let name = serde_yaml::from_slice::<serde_yaml::Value>(&self.definition)
            .ok()
            .and_then(|value| value["metadata"]["name"].as_str().map(str::to_string))
            .unwrap_or_else(|| "<unknown>".to_string());
        ConfigurationError::InvalidDefinition {
            name,
            reason: err.to_string(),
        }
    }
}

fn object_schema() -> JSONSchemaProps {
    JSONSchemaProps {
        type_: Some("object".to_string()),
        ..Default::default()
    }
}

/// A CRD rendered for a set of options
#[derive(Debug, Clone)]
pub struct CrdDefinition {
    pub name: String,
    pub data: CrdDefinitionData,
    pub options: CrdOptions,
    pub labels: CrdLabels,
    pub crd: CustomResourceDefinition,
}

impl CrdDefinition {
    /// The CRD object carrying the content labels, ready to be sent.
    pub fn labeled(&self) -> CustomResourceDefinition {
        let mut crd = self.crd.clone();
        self.labels
            .apply_to(crd.metadata.labels.get_or_insert_with(BTreeMap::new));
        crd
    }
}

/// Labels describing which definition a live CRD was last written from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrdLabels {
    pub version: String,
    /// Only set when the schema is installed
    pub schema: Option<String>,
    pub preserve_unknown_fields: bool,
}

impl CrdLabels {
    pub fn new(data: &CrdDefinitionData, options: CrdOptions) -> Self {
        let (version, schema) = data.label_checksum();
        Self {
            version,
            schema: options.with_schema.then_some(schema),
            preserve_unknown_fields: options.effective_preserve(),
        }
    }

    /// True when `live` already carries exactly these labels.
    pub fn matches(&self, live: Option<&BTreeMap<String, String>>) -> bool {
        let Some(live) = live else {
            return false;
        };
        live.get(labels::VERSION) == Some(&self.version)
            && live.get(labels::SCHEMA) == self.schema.as_ref()
            && live.get(labels::PRESERVE_UNKNOWN_FIELDS).map(String::as_str)
                == Some(bool_label(self.preserve_unknown_fields))
    }

    /// Overwrite the three labels in `target`, leaving all others alone.
    pub fn apply_to(&self, target: &mut BTreeMap<String, String>) {
        target.insert(labels::VERSION.to_string(), self.version.clone());
        target.remove(labels::SCHEMA);
        if let Some(schema) = &self.schema {
            target.insert(labels::SCHEMA.to_string(), schema.clone());
        }
        target.insert(
            labels::PRESERVE_UNKNOWN_FIELDS.to_string(),
            bool_label(self.preserve_unknown_fields).to_string(),
        );
    }
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Labels recording what was last applied to a live CustomResourceDefinition
pub mod labels {
    /// Hex SHA-256 of the embedded CRD manifest. Only the first 63 of its 64
    /// characters are stored, since that is the label value limit.
    pub const VERSION: &str = "arangodb.com/version";
    /// Hex SHA-256 of the embedded validation schema, cut to 63 characters like
    /// [`VERSION`]. Only set when the schema is applied.
    pub const SCHEMA: &str = "arangodb.com/schema";
    /// "true" when unknown fields are preserved
    pub const PRESERVE_UNKNOWN_FIELDS: &str = "arangodb.com/x-preserve-unknown-fields";

    /// Longest value Kubernetes accepts for a label
    pub const MAX_VALUE_LENGTH: usize = 63;
}

/// Field manager of every write the operator makes
pub const OPERATOR_NAME: &str = "arangodb-operator";

/// API groups the operator talks to
pub mod groups {
    pub const DATABASE: &str = "database.arangodb.com";
    pub const MONITORING: &str = "monitoring.coreos.com";
    pub const API_EXTENSIONS: &str = "apiextensions.k8s.io";
}

/// Kubernetes client defaults
pub mod kubernetes {
    use std::time::Duration;

    /// Timeout of a single API-server call
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
    /// Sustained request rate shared by all clients of one factory
    pub const DEFAULT_QPS: f32 = 15.0;
    /// Request burst shared by all clients of one factory
    pub const DEFAULT_BURST: u32 = 30;
    /// Interval between kubeconfig refreshes
    pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
    /// Lifetime of a cached RBAC decision
    pub const ACCESS_CACHE_TTL: Duration = Duration::from_secs(60);
}

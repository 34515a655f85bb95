// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Rate-limited, access-checked Kubernetes clients

pub mod access;
pub mod client;
pub mod config_getter;
pub mod factory;
pub mod rate_limiter;

pub use access::{
    verify_access_request, verify_all_access_request, verify_crd_access, AccessCache,
    AccessRequest, AccessStatus,
};
pub use client::Client;
pub use config_getter::{default_config_getter, ConfigGetter};
pub use factory::{Factories, Factory, DEFAULT_FACTORY, UNATTACHED_FACTORY};
pub use rate_limiter::{RateLimitError, RateLimitLayer, RateLimiter, RateLimiters};

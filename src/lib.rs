// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod cache;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod error;
pub mod kclient;
pub mod retry;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

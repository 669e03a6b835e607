// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster-wide configuration flags.
//!
//! The reconciler snapshots the flags once per pass so a pass is
//! deterministic given its inputs, even if the cluster config changes
//! mid-flight.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Which API surface is enabled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApiFields {
    #[default]
    Stable,
    Beta,
    Alpha,
}

impl ApiFields {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "stable" => Some(ApiFields::Stable),
            "beta" => Some(ApiFields::Beta),
            "alpha" => Some(ApiFields::Alpha),
            _ => None,
        }
    }
}

/// How child status is embedded in the run status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmbeddedStatus {
    /// Child references only
    #[default]
    Minimal,
    /// Legacy full per-child status maps
    Full,
    /// Transitional: both forms
    Both,
}

impl EmbeddedStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "minimal" | "default" => Some(EmbeddedStatus::Minimal),
            "full" => Some(EmbeddedStatus::Full),
            "both" => Some(EmbeddedStatus::Both),
            _ => None,
        }
    }

    pub fn minimal(&self) -> bool {
        matches!(self, EmbeddedStatus::Minimal | EmbeddedStatus::Both)
    }

    pub fn full(&self) -> bool {
        matches!(self, EmbeddedStatus::Full | EmbeddedStatus::Both)
    }
}

/// One immutable snapshot of the cluster configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Flags {
    pub enable_api_fields: ApiFields,
    pub enable_custom_tasks: bool,
    pub enable_oci_bundles: bool,
    pub embedded_status: EmbeddedStatus,
    pub max_matrix_combinations: usize,
    pub default_service_account: String,
    pub default_timeout: Duration,
    pub default_cloud_events_sink: Option<String>,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            enable_api_fields: ApiFields::Stable,
            enable_custom_tasks: false,
            enable_oci_bundles: false,
            embedded_status: EmbeddedStatus::Minimal,
            max_matrix_combinations: 256,
            default_service_account: "default".to_string(),
            default_timeout: Duration::from_secs(60 * 60),
            default_cloud_events_sink: None,
        }
    }
}

impl Flags {
    /// Parse from a config-map style key/value set. Unknown keys and
    /// unparsable values fall back to defaults.
    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        let mut flags = Flags::default();
        if let Some(v) = map.get("enable-api-fields").and_then(|s| ApiFields::parse(s)) {
            flags.enable_api_fields = v;
        }
        if let Some(v) = map.get("enable-custom-tasks").and_then(|s| s.parse().ok()) {
            flags.enable_custom_tasks = v;
        }
        if let Some(v) = map.get("enable-oci-bundles").and_then(|s| s.parse().ok()) {
            flags.enable_oci_bundles = v;
        }
        if let Some(v) = map
            .get("embedded-status")
            .and_then(|s| EmbeddedStatus::parse(s))
        {
            flags.embedded_status = v;
        }
        if let Some(v) = map
            .get("default-max-matrix-combinations-count")
            .and_then(|s| s.parse().ok())
        {
            flags.max_matrix_combinations = v;
        }
        if let Some(v) = map.get("default-service-account") {
            flags.default_service_account = v.clone();
        }
        if let Some(mins) = map
            .get("default-timeout-minutes")
            .and_then(|s| s.parse::<u64>().ok())
        {
            flags.default_timeout = Duration::from_secs(mins * 60);
        }
        if let Some(v) = map.get("default-cloud-events-sink") {
            if !v.is_empty() {
                flags.default_cloud_events_sink = Some(v.clone());
            }
        }
        flags
    }

    /// Matrix fan-out is an alpha field
    pub fn matrix_allowed(&self) -> bool {
        self.enable_api_fields >= ApiFields::Alpha
    }

    /// Object-typed params are an alpha field
    pub fn object_params_allowed(&self) -> bool {
        self.enable_api_fields >= ApiFields::Alpha
    }
}

/// Source of flag snapshots; captured once at the start of each reconcile
pub trait FlagSource: Send + Sync + 'static {
    fn snapshot(&self) -> Flags;
}

impl FlagSource for Flags {
    fn snapshot(&self) -> Flags {
        self.clone()
    }
}

/// Live-updatable source for long-running controllers
impl FlagSource for Arc<RwLock<Flags>> {
    fn snapshot(&self) -> Flags {
        self.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
#[path = "flags_tests.rs"]
mod tests;

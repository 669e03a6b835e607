// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace bindings and the persistent claim object

use crate::meta::ObjectMeta;
use serde::{Deserialize, Serialize};

/// A run-level workspace binding: exactly one volume source should be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceBinding {
    pub name: String,
    /// Prefix applied inside the volume for this run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<ClaimRef>,
    /// Materialized into one claim per run per template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_claim_template: Option<ClaimTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDir>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapProjection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretProjection>,
}

impl WorkspaceBinding {
    pub fn claim(name: impl Into<String>, claim_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persistent_volume_claim: Some(ClaimRef {
                claim_name: claim_name.into(),
            }),
            ..Default::default()
        }
    }

    pub fn empty_dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            empty_dir: Some(EmptyDir::default()),
            ..Default::default()
        }
    }

    pub fn template(name: impl Into<String>, spec: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            volume_claim_template: Some(ClaimTemplate { spec }),
            ..Default::default()
        }
    }

    /// Which volume source the binding carries
    pub fn source(&self) -> Option<WorkspaceSource> {
        if self.persistent_volume_claim.is_some() {
            Some(WorkspaceSource::PersistentClaim)
        } else if self.volume_claim_template.is_some() {
            Some(WorkspaceSource::ClaimTemplate)
        } else if self.empty_dir.is_some() {
            Some(WorkspaceSource::EmptyDir)
        } else if self.config_map.is_some() {
            Some(WorkspaceSource::ConfigMap)
        } else if self.secret.is_some() {
            Some(WorkspaceSource::Secret)
        } else {
            None
        }
    }

    /// Claims can be shared across tasks and want co-location
    pub fn is_shared_claim(&self) -> bool {
        matches!(
            self.source(),
            Some(WorkspaceSource::PersistentClaim | WorkspaceSource::ClaimTemplate)
        )
    }
}

/// The kind of volume backing a workspace binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceSource {
    PersistentClaim,
    ClaimTemplate,
    EmptyDir,
    ConfigMap,
    Secret,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRef {
    pub claim_name: String,
}

/// Template for a per-run claim; the spec is copied verbatim onto the claim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimTemplate {
    pub spec: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmptyDir {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapProjection {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretProjection {
    pub secret_name: String,
}

/// A persistent volume claim owned by a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentClaim {
    pub meta: ObjectMeta,
    pub spec: serde_json::Value,
}

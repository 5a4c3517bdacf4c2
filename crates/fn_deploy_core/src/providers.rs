//! Service handles the pipeline talks to.
//!
//! Both traits are passed explicitly to the pipeline; there are no
//! process-wide clients.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    #[default]
    X86_64,
    Arm64,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        }
    }
}

/// Everything about a function except its code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConfig {
    pub function_name: String,
    pub handler: String,
    pub role: String,
    pub runtime: String,
    pub timeout_secs: u32,
    pub memory_mb: u32,
    pub architecture: Architecture,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Stable identity of a deployed function plus its last-modified marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionIdentity {
    pub function_name: String,
    pub function_arn: String,
    pub last_modified: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionState {
    Pending,
    Active,
    Inactive,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Successful,
    InProgress,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionStatus {
    pub last_modified: String,
    pub state: FunctionState,
    pub last_update: UpdateStatus,
    pub reason: Option<String>,
}

impl FunctionStatus {
    /// No creation or update is still being applied.
    pub fn is_settled(&self) -> bool {
        self.state != FunctionState::Pending && self.last_update != UpdateStatus::InProgress
    }

    pub fn has_failed(&self) -> bool {
        self.state == FunctionState::Failed || self.last_update == UpdateStatus::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUpdate {
    pub last_modified: Option<String>,
    pub code_sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublishedArtifact {
    pub store_key: String,
    pub store_location: String,
}

/// Durable blob store for packaged code.
///
/// There is no delete: published artifacts are shared by digest
/// and outlive the resources that reference them.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Bucket or container the keys live in.
    fn location(&self) -> &str;

    async fn put_archive(&self, key: &str, archive: &Path) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    fn region(&self) -> &str;

    async fn create_function(
        &self,
        config: &FunctionConfig,
        placeholder_zip: &[u8],
    ) -> Result<FunctionIdentity, ProviderError>;

    async fn update_function_configuration(
        &self,
        config: &FunctionConfig,
    ) -> Result<FunctionIdentity, ProviderError>;

    async fn update_function_code(
        &self,
        function_name: &str,
        artifact: &PublishedArtifact,
        architecture: Architecture,
    ) -> Result<CodeUpdate, ProviderError>;

    async fn function_status(&self, function_name: &str) -> Result<FunctionStatus, ProviderError>;

    async fn delete_function(&self, function_name: &str) -> Result<(), ProviderError>;
}

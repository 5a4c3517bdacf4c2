use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::providers::{ArtifactStore, PublishedArtifact};
use crate::resource::ManagedResource;
use crate::storage_keys::{artifact_object_key, validate_logical_name};

/// Uploads `archive` under its content-addressed key.
///
/// Publishing the same digest twice leaves the store unchanged.
pub async fn publish_artifact(
    store: &dyn ArtifactStore,
    logical_name: &str,
    digest: &str,
    archive: &Path,
) -> Result<PublishedArtifact> {
    validate_logical_name(logical_name)?;
    let store_key = artifact_object_key(logical_name, digest);
    store.put_archive(&store_key, archive).await?;

    info!(
        component = "publisher",
        logical_name,
        digest,
        store_key = %store_key,
        store_location = store.location(),
        "published artifact"
    );
    Ok(PublishedArtifact {
        store_key,
        store_location: store.location().to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInputs {
    pub logical_name: String,
    pub digest: String,
    pub store_location: String,
    pub archive_path: PathBuf,
}

/// Published code package. Retained when its owner is destroyed because other
/// deployments may reference the same digest.
pub struct ArtifactResource {
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactResource {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ManagedResource for ArtifactResource {
    type Inputs = ArtifactInputs;
    type Outputs = PublishedArtifact;

    const KIND: &'static str = "artifact";

    async fn create(&self, inputs: &ArtifactInputs) -> Result<PublishedArtifact> {
        publish_artifact(
            self.store.as_ref(),
            &inputs.logical_name,
            &inputs.digest,
            &inputs.archive_path,
        )
        .await
    }

    async fn update(
        &self,
        _prior_inputs: &ArtifactInputs,
        _prior: &PublishedArtifact,
        inputs: &ArtifactInputs,
    ) -> Result<PublishedArtifact> {
        self.create(inputs).await
    }

    async fn delete(&self, _prior: &PublishedArtifact) -> Result<()> {
        Ok(())
    }

    // The local archive path changes between runs; only the key matters.
    fn needs_update(&self, prior_inputs: &ArtifactInputs, inputs: &ArtifactInputs) -> bool {
        prior_inputs.logical_name != inputs.logical_name
            || prior_inputs.digest != inputs.digest
            || prior_inputs.store_location != inputs.store_location
    }

    fn retain_on_delete(&self) -> bool {
        true
    }
}

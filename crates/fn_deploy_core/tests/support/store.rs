use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use fn_deploy_core::providers::ArtifactStore;
use fn_deploy_core::ProviderError;

pub const STORE_LOCATION: &str = "fn-deploy-artifacts";

/// In-memory blob store that skips keys it already holds.
#[derive(Default)]
pub struct RecordingArtifactStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    uploads: Mutex<u32>,
}

impl RecordingArtifactStore {
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("poisoned mutex")
            .keys()
            .cloned()
            .collect()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().expect("poisoned mutex").get(key).cloned()
    }

    pub fn uploads(&self) -> u32 {
        *self.uploads.lock().expect("poisoned mutex")
    }
}

#[async_trait]
impl ArtifactStore for RecordingArtifactStore {
    fn location(&self) -> &str {
        STORE_LOCATION
    }

    async fn put_archive(&self, key: &str, archive: &Path) -> Result<(), ProviderError> {
        if self
            .objects
            .lock()
            .expect("poisoned mutex")
            .contains_key(key)
        {
            return Ok(());
        }
        let body = std::fs::read(archive)
            .map_err(|error| ProviderError::fatal("put_archive", error.to_string()))?;
        *self.uploads.lock().expect("poisoned mutex") += 1;
        self.objects
            .lock()
            .expect("poisoned mutex")
            .insert(key.to_string(), body);
        Ok(())
    }
}

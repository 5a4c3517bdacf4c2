//! Managed resources with recorded state.
//!
//! The engine decides between create, update and no-op by comparing the
//! desired inputs against the record left by the previous successful run.
//! Records are only written after the remote call succeeded, so an aborted
//! run is recovered by simply running again.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{DeployError, Result};
use crate::graph::Deferred;
use crate::storage_keys::resource_record_key;

pub trait StateStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>>;
    fn save(&self, key: &str, value: &Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per record under a root directory.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    root: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(DeployError::state(format!("invalid record key '{key}'")));
            }
            path.push(segment);
        }
        path.set_extension("json");
        Ok(path)
    }
}

impl StateStore for JsonFileStateStore {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.record_path(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(DeployError::io("reading state", &path, error)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|error| DeployError::state(format!("corrupt record {key}: {error}")))
    }

    fn save(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.record_path(key)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)
            .map_err(|error| DeployError::io("creating state directory", parent, error))?;

        let body = serde_json::to_vec_pretty(value)
            .map_err(|error| DeployError::state(format!("serializing {key}: {error}")))?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|error| DeployError::io("creating temp file in", parent, error))?;
        temp.write_all(&body)
            .map_err(|error| DeployError::io("writing state", temp.path(), error))?;
        temp.persist(&path)
            .map_err(|error| DeployError::io("persisting state", &path, error.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.record_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(DeployError::io("removing state", &path, error)),
        }
    }
}

#[async_trait]
pub trait ManagedResource: Send + Sync {
    type Inputs: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static;
    type Outputs: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    const KIND: &'static str;

    async fn create(&self, inputs: &Self::Inputs) -> Result<Self::Outputs>;

    async fn update(
        &self,
        prior_inputs: &Self::Inputs,
        prior: &Self::Outputs,
        inputs: &Self::Inputs,
    ) -> Result<Self::Outputs>;

    async fn delete(&self, prior: &Self::Outputs) -> Result<()>;

    fn needs_update(&self, prior_inputs: &Self::Inputs, inputs: &Self::Inputs) -> bool {
        prior_inputs != inputs
    }

    /// Destroying a retained resource only forgets the record.
    fn retain_on_delete(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResourceRecord<I, O> {
    inputs: I,
    outputs: O,
}

#[derive(Clone)]
pub struct ResourceEngine {
    state: Arc<dyn StateStore>,
}

impl ResourceEngine {
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    fn load_record<R: ManagedResource>(
        &self,
        key: &str,
    ) -> Result<Option<ResourceRecord<R::Inputs, R::Outputs>>> {
        self.state
            .load(key)?
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|error| DeployError::state(format!("corrupt record {key}: {error}")))
            })
            .transpose()
    }

    /// Recorded outputs of `name`, if it was applied before.
    pub fn outputs<R: ManagedResource>(&self, name: &str) -> Result<Option<R::Outputs>> {
        let key = resource_record_key(R::KIND, name);
        Ok(self.load_record::<R>(&key)?.map(|record| record.outputs))
    }

    pub async fn apply<R: ManagedResource>(
        &self,
        name: &str,
        resource: &R,
        inputs: &R::Inputs,
    ) -> Result<R::Outputs> {
        let key = resource_record_key(R::KIND, name);
        let outputs = match self.load_record::<R>(&key)? {
            None => {
                info!(component = "engine", kind = R::KIND, name, "creating resource");
                resource.create(inputs).await?
            }
            Some(record) if !resource.needs_update(&record.inputs, inputs) => {
                debug!(component = "engine", kind = R::KIND, name, "resource unchanged");
                return Ok(record.outputs);
            }
            Some(record) => {
                info!(component = "engine", kind = R::KIND, name, "updating resource");
                resource
                    .update(&record.inputs, &record.outputs, inputs)
                    .await?
            }
        };

        let record = ResourceRecord {
            inputs: inputs.clone(),
            outputs: outputs.clone(),
        };
        let value = serde_json::to_value(&record)
            .map_err(|error| DeployError::state(format!("serializing {key}: {error}")))?;
        self.state.save(&key, &value)?;
        Ok(outputs)
    }

    pub async fn destroy<R: ManagedResource>(&self, name: &str, resource: &R) -> Result<()> {
        let key = resource_record_key(R::KIND, name);
        let Some(record) = self.load_record::<R>(&key)? else {
            debug!(component = "engine", kind = R::KIND, name, "nothing to destroy");
            return Ok(());
        };

        if resource.retain_on_delete() {
            info!(
                component = "engine",
                kind = R::KIND,
                name,
                "retaining remote object, forgetting record"
            );
        } else {
            info!(component = "engine", kind = R::KIND, name, "deleting resource");
            resource.delete(&record.outputs).await?;
        }
        self.state.remove(&key)
    }

    /// Applies `resource` once `inputs` resolves.
    pub fn managed<R: ManagedResource + 'static>(
        &self,
        name: impl Into<String>,
        resource: Arc<R>,
        inputs: &Deferred<R::Inputs>,
    ) -> Deferred<R::Outputs> {
        let engine = self.clone();
        let name = name.into();
        inputs.then(move |inputs| async move {
            engine.apply(&name, resource.as_ref(), &inputs).await
        })
    }
}

//! Wires the pipeline stages into one deferred deployment per function.
//!
//! ```text
//! build -> wrap -> package -> digest -> publish ----------+
//!             \                                           +-> reconcile
//!              +-> placeholder function -> settle --------+
//! ```
//!
//! Archiving and hashing run on the blocking pool behind a shared permit
//! budget, so independent functions package in parallel while each package is
//! produced strictly archive-then-digest.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::info;

use crate::build::BuildResult;
use crate::content_address::content_digest;
use crate::error::{DeployError, Result};
use crate::graph::Deferred;
use crate::handler_wrapper::{wrap_handler, InjectionSpec};
use crate::packager::package_directory;
use crate::placeholder::FunctionResource;
use crate::providers::{
    Architecture, ArtifactStore, ComputeProvider, FunctionConfig, FunctionIdentity,
    PublishedArtifact,
};
use crate::publisher::{ArtifactInputs, ArtifactResource};
use crate::reconciler::{
    CodeReconciler, CodeUpdateResource, ReconcileTarget, ReconcilerOptions, ReconciliationRecord,
};
use crate::resource::{ResourceEngine, StateStore};
use crate::retry::{RetryPolicy, WaitPolicy};
use crate::storage_keys::validate_logical_name;

pub const PACKAGE_FILE_NAME: &str = "code.zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Scratch directory for archives, one subdirectory per logical name.
    pub work_dir: PathBuf,
    pub region: String,
    pub retry: RetryPolicy,
    pub wait: WaitPolicy,
    pub packaging_concurrency: usize,
    pub detect_drift: bool,
}

impl PipelineOptions {
    pub fn new(work_dir: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            region: region.into(),
            retry: RetryPolicy::default(),
            wait: WaitPolicy::default(),
            packaging_concurrency: 4,
            detect_drift: false,
        }
    }

    pub fn package_path(&self, logical_name: &str) -> PathBuf {
        self.work_dir.join(logical_name).join(PACKAGE_FILE_NAME)
    }
}

/// A declared function; the handler comes from the build result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub logical_name: String,
    pub function_name: String,
    pub role: String,
    pub runtime: String,
    pub timeout_secs: u32,
    pub memory_mb: u32,
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub injection: InjectionSpec,
}

impl FunctionDefinition {
    pub fn function_config(&self, handler: &str) -> FunctionConfig {
        FunctionConfig {
            function_name: self.function_name.clone(),
            handler: handler.to_string(),
            role: self.role.clone(),
            runtime: self.runtime.clone(),
            timeout_secs: self.timeout_secs,
            memory_mb: self.memory_mb,
            architecture: self.architecture,
            environment: self.environment.clone(),
        }
    }
}

/// A packaged build output on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPackage {
    pub handler: String,
    pub archive: PathBuf,
    pub digest: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeployedFunction {
    pub logical_name: String,
    pub handler: String,
    pub function: FunctionIdentity,
    pub artifact: PublishedArtifact,
    pub reconciliation: ReconciliationRecord,
}

/// Wraps the handler, archives the output directory and hashes the archive.
///
/// Blocking; runs the same steps a deployment runs before publishing.
pub fn prepare_package(
    build: &BuildResult,
    injection: &InjectionSpec,
    destination: &Path,
) -> Result<LocalPackage> {
    let wrapped = wrap_handler(&build.handler_path, &build.output_directory, injection)?;
    package_wrapped(
        wrapped.handler_reference(),
        &build.output_directory,
        destination,
    )
}

fn package_wrapped(
    handler: String,
    output_directory: &Path,
    destination: &Path,
) -> Result<LocalPackage> {
    if resolves_inside(destination, output_directory)? {
        return Err(DeployError::configuration(format!(
            "package destination {} is inside the output directory {}",
            destination.display(),
            output_directory.display()
        )));
    }

    let archive = package_directory(output_directory, destination)?;
    let digest = content_digest(&archive.path)?;
    info!(
        component = "pipeline",
        archive = %archive.path.display(),
        entries = archive.entry_count,
        size_bytes = archive.size_bytes,
        digest = %digest,
        "packaged function code"
    );
    Ok(LocalPackage {
        handler,
        archive: archive.path,
        digest,
        entry_count: archive.entry_count,
    })
}

/// Compares resolved paths so symlinked or relative aliases of the output
/// directory are caught too.
fn resolves_inside(destination: &Path, output_directory: &Path) -> Result<bool> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .map_err(|error| DeployError::io("creating package directory", parent, error))?;
    let parent = fs::canonicalize(parent)
        .map_err(|error| DeployError::io("resolving package directory", parent, error))?;
    let output = fs::canonicalize(output_directory).map_err(|error| {
        DeployError::io("resolving output directory", output_directory, error)
    })?;
    Ok(parent.starts_with(output))
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| DeployError::task(error.to_string()))?
}

/// Deploys functions against explicitly passed store, provider and state
/// handles.
#[derive(Clone)]
pub struct FunctionPipeline {
    engine: ResourceEngine,
    artifacts: Arc<ArtifactResource>,
    functions: Arc<FunctionResource>,
    code: Arc<CodeUpdateResource>,
    store_location: String,
    options: Arc<PipelineOptions>,
    packaging: Arc<Semaphore>,
}

impl FunctionPipeline {
    pub fn new(
        state: Arc<dyn StateStore>,
        store: Arc<dyn ArtifactStore>,
        provider: Arc<dyn ComputeProvider>,
        options: PipelineOptions,
    ) -> Self {
        let reconciler = CodeReconciler::new(
            Arc::clone(&provider),
            ReconcilerOptions {
                retry: options.retry.clone(),
                wait: options.wait.clone(),
                detect_drift: options.detect_drift,
            },
        );
        Self {
            engine: ResourceEngine::new(state),
            store_location: store.location().to_string(),
            artifacts: Arc::new(ArtifactResource::new(store)),
            functions: Arc::new(FunctionResource::new(
                provider,
                options.retry.clone(),
                options.wait.clone(),
            )),
            code: Arc::new(CodeUpdateResource::new(reconciler)),
            packaging: Arc::new(Semaphore::new(options.packaging_concurrency.max(1))),
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Builds the deferred deployment of one function.
    ///
    /// Nothing runs until the returned value (or a value derived from it) is
    /// resolved. A failed `build` fails every stage before packaging starts.
    pub fn deploy(
        &self,
        definition: FunctionDefinition,
        build: Deferred<BuildResult>,
    ) -> Deferred<DeployedFunction> {
        if let Err(error) = validate_logical_name(&definition.logical_name) {
            return Deferred::failed(error);
        }
        let definition = Arc::new(definition);
        let logical_name = definition.logical_name.clone();

        let wrapped: Deferred<(String, PathBuf)> = {
            let definition = Arc::clone(&definition);
            build.then(move |build| async move {
                run_blocking(move || {
                    let wrapped = wrap_handler(
                        &build.handler_path,
                        &build.output_directory,
                        &definition.injection,
                    )?;
                    Ok((wrapped.handler_reference(), build.output_directory))
                })
                .await
            })
        };

        let packaged: Deferred<LocalPackage> = {
            let permits = Arc::clone(&self.packaging);
            let destination = self.options.package_path(&logical_name);
            wrapped.then(move |(handler, output_directory)| async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|error| DeployError::task(error.to_string()))?;
                run_blocking(move || package_wrapped(handler, &output_directory, &destination))
                    .await
            })
        };

        let artifact = {
            let name = logical_name.clone();
            let store_location = self.store_location.clone();
            let inputs = packaged.map(move |package| {
                Ok(ArtifactInputs {
                    logical_name: name,
                    digest: package.digest,
                    store_location,
                    archive_path: package.archive,
                })
            });
            self.engine
                .managed(logical_name.clone(), Arc::clone(&self.artifacts), &inputs)
        };

        let function = {
            let definition = Arc::clone(&definition);
            let config = wrapped.map(move |(handler, _)| Ok(definition.function_config(&handler)));
            self.engine
                .managed(logical_name.clone(), Arc::clone(&self.functions), &config)
        };

        let reconciliation = {
            let region = self.options.region.clone();
            let architecture = definition.architecture;
            let target =
                function
                    .combine(&artifact)
                    .combine(&packaged)
                    .map(move |((function, artifact), package)| {
                        Ok(ReconcileTarget {
                            function_name: function.function_name,
                            function_arn: function.function_arn,
                            last_modified_marker: function.last_modified,
                            region,
                            architecture,
                            store_key: artifact.store_key,
                            store_location: artifact.store_location,
                            digest: package.digest,
                        })
                    });
            self.engine
                .managed(logical_name.clone(), Arc::clone(&self.code), &target)
        };

        function
            .combine(&artifact)
            .combine(&wrapped)
            .combine(&reconciliation)
            .map(move |(((function, artifact), (handler, _)), reconciliation)| {
                info!(
                    component = "pipeline",
                    logical_name = %logical_name,
                    function_arn = %function.function_arn,
                    store_key = %artifact.store_key,
                    digest = %reconciliation.digest,
                    "function deployed"
                );
                Ok(DeployedFunction {
                    logical_name,
                    handler,
                    function,
                    artifact,
                    reconciliation,
                })
            })
    }

    /// Last successful reconciliation recorded for `logical_name`.
    pub fn recorded(&self, logical_name: &str) -> Result<Option<ReconciliationRecord>> {
        validate_logical_name(logical_name)?;
        self.engine.outputs::<CodeUpdateResource>(logical_name)
    }

    /// Forgets the reconciliation, deletes the function and releases the
    /// artifact, which stays in the store.
    pub async fn destroy(&self, logical_name: &str) -> Result<()> {
        validate_logical_name(logical_name)?;
        self.engine.destroy(logical_name, self.code.as_ref()).await?;
        self.engine
            .destroy(logical_name, self.functions.as_ref())
            .await?;
        self.engine
            .destroy(logical_name, self.artifacts.as_ref())
            .await?;
        info!(component = "pipeline", logical_name, "function destroyed");
        Ok(())
    }
}

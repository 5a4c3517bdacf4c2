#![allow(dead_code)]

pub mod provider;
pub mod store;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fn_deploy_core::build::BuildResult;
use fn_deploy_core::error::Result;
use fn_deploy_core::graph::Deferred;
use fn_deploy_core::handler_wrapper::InjectionSpec;
use fn_deploy_core::pipeline::{
    DeployedFunction, FunctionDefinition, FunctionPipeline, PipelineOptions,
};
use fn_deploy_core::providers::Architecture;
use fn_deploy_core::resource::MemoryStateStore;
use fn_deploy_core::retry::{RetryPolicy, WaitPolicy};
use tempfile::TempDir;

pub use provider::{CallLog, ScriptedComputeProvider};
pub use store::RecordingArtifactStore;

pub const REGION: &str = "eu-west-1";
pub const HANDLER: &str = "src/index.handler";

/// Retry and wait policies short enough for tests.
pub fn quick_options(work_dir: PathBuf) -> PipelineOptions {
    PipelineOptions {
        retry: RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        },
        wait: WaitPolicy {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(250),
        },
        ..PipelineOptions::new(work_dir, REGION)
    }
}

pub fn definition(logical_name: &str) -> FunctionDefinition {
    FunctionDefinition {
        logical_name: logical_name.to_string(),
        function_name: format!("{logical_name}-fn"),
        role: "arn:aws:iam::123456789012:role/fn-deploy".to_string(),
        runtime: "nodejs20.x".to_string(),
        timeout_secs: 20,
        memory_mb: 1024,
        architecture: Architecture::X86_64,
        environment: Default::default(),
        injection: InjectionSpec::default(),
    }
}

/// One scratch workspace plus the fakes a pipeline talks to.
///
/// State, store and provider outlive individual pipelines so a test can
/// model several runs of the deploy command.
pub struct Harness {
    pub dir: TempDir,
    pub state: Arc<MemoryStateStore>,
    pub store: Arc<RecordingArtifactStore>,
    pub provider: Arc<ScriptedComputeProvider>,
    pub options: PipelineOptions,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = quick_options(dir.path().join("work"));
        let harness = Self {
            state: Arc::new(MemoryStateStore::new()),
            store: Arc::new(RecordingArtifactStore::default()),
            provider: Arc::new(ScriptedComputeProvider::new(REGION)),
            options,
            dir,
        };
        harness.write_source("src/index.js", "exports.handler=()=>1");
        harness
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn write_source(&self, relative: &str, contents: &str) {
        let path = self.output_dir().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create source dir");
        }
        fs::write(path, contents).expect("write source");
    }

    pub fn build(&self) -> Deferred<BuildResult> {
        Deferred::ready(BuildResult {
            handler_path: HANDLER.to_string(),
            output_directory: self.output_dir(),
        })
    }

    pub fn pipeline_with(&self, options: PipelineOptions) -> FunctionPipeline {
        FunctionPipeline::new(
            self.state.clone(),
            self.store.clone(),
            self.provider.clone(),
            options,
        )
    }

    pub fn pipeline(&self) -> FunctionPipeline {
        self.pipeline_with(self.options.clone())
    }

    /// One full run of the deploy command.
    pub async fn deploy(&self, definition: FunctionDefinition) -> Result<DeployedFunction> {
        self.pipeline()
            .deploy(definition, self.build())
            .resolve()
            .await
    }
}

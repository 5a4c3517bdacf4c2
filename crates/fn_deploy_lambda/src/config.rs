//! Command line, function manifest and bundler output.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use fn_deploy_core::build::{BuildOutcome, BuildResult};
use fn_deploy_core::error::{DeployError, Result};
use fn_deploy_core::handler_wrapper::{link_binding_snippet, InjectionSpec};
use fn_deploy_core::pipeline::{FunctionDefinition, PipelineOptions};
use fn_deploy_core::providers::Architecture;
use fn_deploy_core::retry::{RetryPolicy, WaitPolicy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::telemetry::LogFormat;

pub const DEFAULT_TIMEOUT_SECS: u32 = 20;
pub const DEFAULT_MEMORY_MB: u32 = 1024;
pub const DEFAULT_WORK_DIR: &str = ".fn-deploy/work";
const MAX_TIMEOUT_SECS: u32 = 900;
const MEMORY_RANGE_MB: (u32, u32) = (128, 10_240);

#[derive(Debug, Parser)]
#[command(name = "fn_deploy", about = "Deploy serverless function artifacts")]
pub struct Cli {
    /// Directory holding recorded resource state.
    #[arg(
        long,
        env = "FN_DEPLOY_STATE_DIR",
        default_value = ".fn-deploy/state",
        global = true
    )]
    pub state_dir: PathBuf,
    #[arg(
        long,
        env = "FN_DEPLOY_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Pretty,
        global = true
    )]
    pub log_format: LogFormat,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Package, publish and reconcile one function.
    Deploy(DeployArgs),
    /// Delete a deployed function; its published artifacts are kept.
    Destroy(DestroyArgs),
    /// Wrap and package a build output locally and print its digest.
    Package(PackageArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ProviderArgs {
    #[arg(long, env = "FN_DEPLOY_BUCKET")]
    pub bucket: String,
    /// Falls back to the AWS SDK's region chain.
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct RetryArgs {
    #[arg(long, default_value_t = 5)]
    pub max_attempts: u32,
    #[arg(long, default_value_t = 200)]
    pub initial_backoff_ms: u64,
    #[arg(long, default_value_t = 5_000)]
    pub max_backoff_ms: u64,
    #[arg(long, default_value_t = 1_000)]
    pub poll_interval_ms: u64,
    #[arg(long, default_value_t = 300)]
    pub converge_timeout_secs: u64,
}

impl RetryArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
        }
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            timeout: Duration::from_secs(self.converge_timeout_secs),
        }
    }
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Function manifest (JSON).
    #[arg(long)]
    pub manifest: PathBuf,
    /// Bundler output (JSON): `{handlerPath, outputDirectory}` or `{errors}`.
    #[arg(long)]
    pub build_result: PathBuf,
    #[command(flatten)]
    pub provider: ProviderArgs,
    #[arg(long, default_value = DEFAULT_WORK_DIR)]
    pub work_dir: PathBuf,
    #[command(flatten)]
    pub retry: RetryArgs,
    /// Read the live function before skipping an unchanged deploy.
    #[arg(long)]
    pub detect_drift: bool,
}

impl DeployArgs {
    pub fn pipeline_options(&self, region: &str) -> PipelineOptions {
        PipelineOptions {
            retry: self.retry.retry_policy(),
            wait: self.retry.wait_policy(),
            detect_drift: self.detect_drift,
            ..PipelineOptions::new(&self.work_dir, region)
        }
    }
}

#[derive(Debug, Args)]
pub struct DestroyArgs {
    #[arg(long)]
    pub logical_name: String,
    #[command(flatten)]
    pub provider: ProviderArgs,
    #[command(flatten)]
    pub retry: RetryArgs,
}

#[derive(Debug, Args)]
pub struct PackageArgs {
    #[arg(long)]
    pub build_result: PathBuf,
    /// Manifest whose injections and links are applied before packaging.
    #[arg(long)]
    pub manifest: Option<PathBuf>,
    #[arg(long)]
    pub out: PathBuf,
}

fn default_timeout() -> u32 {
    DEFAULT_TIMEOUT_SECS
}

fn default_memory() -> u32 {
    DEFAULT_MEMORY_MB
}

/// Declared function as written by the user.
///
/// The handler is not part of the manifest; it always comes from the build.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FunctionManifest {
    pub logical_name: String,
    #[serde(default)]
    pub function_name: Option<String>,
    pub role: String,
    pub runtime: String,
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    #[serde(default = "default_memory")]
    pub memory_size: u32,
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub injections: Vec<String>,
    /// Linked resource properties exposed to the handler at module load.
    #[serde(default)]
    pub links: BTreeMap<String, Value>,
    #[serde(default)]
    pub streaming: bool,
}

impl FunctionManifest {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path, "function manifest")
    }

    pub fn injection_spec(&self) -> InjectionSpec {
        InjectionSpec {
            injections: self.injections.clone(),
            binding: link_binding_snippet(&self.links),
            streaming: self.streaming,
        }
    }

    pub fn into_definition(self) -> Result<FunctionDefinition> {
        if self.timeout == 0 || self.timeout > MAX_TIMEOUT_SECS {
            return Err(DeployError::configuration(format!(
                "timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds, got {}",
                self.timeout
            )));
        }
        let (min_memory, max_memory) = MEMORY_RANGE_MB;
        if !(min_memory..=max_memory).contains(&self.memory_size) {
            return Err(DeployError::configuration(format!(
                "memorySize must be between {min_memory} and {max_memory} MB, got {}",
                self.memory_size
            )));
        }
        if self.role.trim().is_empty() || self.runtime.trim().is_empty() {
            return Err(DeployError::configuration("role and runtime are required"));
        }

        let injection = self.injection_spec();
        Ok(FunctionDefinition {
            function_name: self
                .function_name
                .unwrap_or_else(|| self.logical_name.clone()),
            logical_name: self.logical_name,
            role: self.role,
            runtime: self.runtime,
            timeout_secs: self.timeout,
            memory_mb: self.memory_size,
            architecture: self.architecture,
            environment: self.environment,
            injection,
        })
    }
}

/// Reads the bundler's report. A relative output directory is resolved
/// against the report's own directory.
pub fn load_build_result(path: &Path) -> Result<BuildResult> {
    let outcome: BuildOutcome = read_json(path, "build result")?;
    let mut result = outcome.into_result()?;
    if result.output_directory.is_relative() {
        if let Some(parent) = path.parent() {
            result.output_directory = parent.join(&result.output_directory);
        }
    }
    Ok(result)
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|error| DeployError::io("reading", path, error))?;
    serde_json::from_str(&raw).map_err(|error| {
        DeployError::configuration(format!("invalid {what} {}: {error}", path.display()))
    })
}

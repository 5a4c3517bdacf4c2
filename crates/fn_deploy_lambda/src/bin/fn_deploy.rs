use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use clap::Parser;
use fn_deploy_core::error::{DeployError, Result};
use fn_deploy_core::graph::Deferred;
use fn_deploy_core::pipeline::{prepare_package, FunctionPipeline, PipelineOptions};
use fn_deploy_core::resource::JsonFileStateStore;
use fn_deploy_lambda::adapters::lambda_provider::LambdaComputeProvider;
use fn_deploy_lambda::adapters::s3_store::S3ArtifactStore;
use fn_deploy_lambda::config::{
    load_build_result, Cli, Command, DeployArgs, DestroyArgs, FunctionManifest, PackageArgs,
    ProviderArgs, DEFAULT_WORK_DIR,
};
use fn_deploy_lambda::telemetry::init_logging;
use serde_json::json;
use tracing::{error, info};

async fn load_sdk_config(provider: &ProviderArgs) -> Result<(SdkConfig, String)> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &provider.region {
        loader = loader.region(Region::new(region.clone()));
    }
    let sdk_config = loader.load().await;
    let region = sdk_config
        .region()
        .map(|region| region.to_string())
        .ok_or_else(|| DeployError::configuration("no AWS region configured"))?;
    Ok((sdk_config, region))
}

fn build_pipeline(
    state_dir: &Path,
    provider: &ProviderArgs,
    sdk_config: &SdkConfig,
    options: PipelineOptions,
) -> FunctionPipeline {
    let store = S3ArtifactStore::new(aws_sdk_s3::Client::new(sdk_config), &provider.bucket);
    let compute =
        LambdaComputeProvider::new(aws_sdk_lambda::Client::new(sdk_config), &options.region);
    FunctionPipeline::new(
        Arc::new(JsonFileStateStore::new(state_dir)),
        Arc::new(store),
        Arc::new(compute),
        options,
    )
}

async fn deploy(cli_state_dir: &Path, args: DeployArgs) -> Result<()> {
    let definition = FunctionManifest::load(&args.manifest)?.into_definition()?;
    let build = Deferred::ready(load_build_result(&args.build_result)?);
    let (sdk_config, region) = load_sdk_config(&args.provider).await?;
    let options = args.pipeline_options(&region);
    let pipeline = build_pipeline(cli_state_dir, &args.provider, &sdk_config, options);

    let deployed = pipeline.deploy(definition, build).resolve().await?;
    let summary = serde_json::to_string_pretty(&deployed)
        .map_err(|error| DeployError::state(format!("serializing deploy summary: {error}")))?;
    println!("{summary}");
    Ok(())
}

async fn destroy(cli_state_dir: &Path, args: DestroyArgs) -> Result<()> {
    let (sdk_config, region) = load_sdk_config(&args.provider).await?;
    let options = PipelineOptions {
        retry: args.retry.retry_policy(),
        wait: args.retry.wait_policy(),
        ..PipelineOptions::new(DEFAULT_WORK_DIR, region)
    };
    let pipeline = build_pipeline(cli_state_dir, &args.provider, &sdk_config, options);
    pipeline.destroy(&args.logical_name).await
}

async fn package(args: PackageArgs) -> Result<()> {
    let build = load_build_result(&args.build_result)?;
    let injection = match &args.manifest {
        Some(path) => FunctionManifest::load(path)?.injection_spec(),
        None => Default::default(),
    };
    let package = tokio::task::spawn_blocking(move || prepare_package(&build, &injection, &args.out))
        .await
        .map_err(|error| DeployError::task(error.to_string()))??;

    println!(
        "{}",
        json!({
            "handler": package.handler,
            "archive": package.archive,
            "digest": package.digest,
            "entries": package.entry_count,
        })
    );
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Deploy(args) => deploy(&cli.state_dir, args).await,
        Command::Destroy(args) => destroy(&cli.state_dir, args).await,
        Command::Package(args) => package(args).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(error) = init_logging(cli.log_format) {
        eprintln!("{error}");
        return ExitCode::FAILURE;
    }

    let command = match &cli.command {
        Command::Deploy(_) => "deploy",
        Command::Destroy(_) => "destroy",
        Command::Package(_) => "package",
    };
    match run(cli).await {
        Ok(()) => {
            info!(component = "fn_deploy", command, "done");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(
                component = "fn_deploy",
                command,
                retryable = error.is_retryable(),
                error = %error,
                "command failed"
            );
            ExitCode::FAILURE
        }
    }
}

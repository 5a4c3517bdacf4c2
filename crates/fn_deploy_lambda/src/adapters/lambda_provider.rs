use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{
    Architecture as LambdaArchitecture, Environment, FunctionCode, LastUpdateStatus, Runtime,
    State,
};
use fn_deploy_core::providers::{
    Architecture, CodeUpdate, ComputeProvider, FunctionConfig, FunctionIdentity, FunctionState,
    FunctionStatus, PublishedArtifact, UpdateStatus,
};
use fn_deploy_core::ProviderError;
use tracing::{debug, info};

use super::provider_error;

/// Compute provider backed by AWS Lambda in a single region.
pub struct LambdaComputeProvider {
    client: aws_sdk_lambda::Client,
    region: String,
}

impl LambdaComputeProvider {
    pub fn new(client: aws_sdk_lambda::Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }
}

fn lambda_architecture(architecture: Architecture) -> LambdaArchitecture {
    LambdaArchitecture::from(architecture.as_str())
}

fn environment(config: &FunctionConfig) -> Environment {
    let variables: HashMap<String, String> = config
        .environment
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Environment::builder().set_variables(Some(variables)).build()
}

fn as_i32(operation: &'static str, field: &str, value: u32) -> Result<i32, ProviderError> {
    i32::try_from(value)
        .map_err(|_| ProviderError::fatal(operation, format!("{field} {value} is out of range")))
}

fn identity(
    operation: &'static str,
    requested_name: &str,
    function_name: Option<&str>,
    function_arn: Option<&str>,
    last_modified: Option<&str>,
) -> Result<FunctionIdentity, ProviderError> {
    let function_arn = function_arn.ok_or_else(|| {
        ProviderError::fatal(operation, format!("response for {requested_name} has no ARN"))
    })?;
    let last_modified = last_modified.ok_or_else(|| {
        ProviderError::fatal(
            operation,
            format!("response for {requested_name} has no last-modified marker"),
        )
    })?;
    Ok(FunctionIdentity {
        function_name: function_name.unwrap_or(requested_name).to_string(),
        function_arn: function_arn.to_string(),
        last_modified: last_modified.to_string(),
    })
}

fn function_state(state: Option<&State>) -> FunctionState {
    match state {
        Some(State::Pending) => FunctionState::Pending,
        Some(State::Inactive) => FunctionState::Inactive,
        Some(State::Failed) => FunctionState::Failed,
        // Older functions report no state at all.
        _ => FunctionState::Active,
    }
}

fn update_status(status: Option<&LastUpdateStatus>) -> UpdateStatus {
    match status {
        Some(LastUpdateStatus::InProgress) => UpdateStatus::InProgress,
        Some(LastUpdateStatus::Failed) => UpdateStatus::Failed,
        _ => UpdateStatus::Successful,
    }
}

#[async_trait]
impl ComputeProvider for LambdaComputeProvider {
    fn region(&self) -> &str {
        &self.region
    }

    async fn create_function(
        &self,
        config: &FunctionConfig,
        placeholder_zip: &[u8],
    ) -> Result<FunctionIdentity, ProviderError> {
        const OPERATION: &str = "create_function";
        let output = self
            .client
            .create_function()
            .function_name(&config.function_name)
            .role(&config.role)
            .runtime(Runtime::from(config.runtime.as_str()))
            .handler(&config.handler)
            .timeout(as_i32(OPERATION, "timeout", config.timeout_secs)?)
            .memory_size(as_i32(OPERATION, "memory size", config.memory_mb)?)
            .architectures(lambda_architecture(config.architecture))
            .environment(environment(config))
            .code(
                FunctionCode::builder()
                    .zip_file(Blob::new(placeholder_zip.to_vec()))
                    .build(),
            )
            .publish(false)
            .send()
            .await
            .map_err(|error| provider_error(OPERATION, error))?;

        let created = identity(
            OPERATION,
            &config.function_name,
            output.function_name(),
            output.function_arn(),
            output.last_modified(),
        )?;
        info!(
            component = "lambda_provider",
            function_name = %created.function_name,
            function_arn = %created.function_arn,
            region = %self.region,
            "created function"
        );
        Ok(created)
    }

    async fn update_function_configuration(
        &self,
        config: &FunctionConfig,
    ) -> Result<FunctionIdentity, ProviderError> {
        const OPERATION: &str = "update_function_configuration";
        let output = self
            .client
            .update_function_configuration()
            .function_name(&config.function_name)
            .role(&config.role)
            .runtime(Runtime::from(config.runtime.as_str()))
            .handler(&config.handler)
            .timeout(as_i32(OPERATION, "timeout", config.timeout_secs)?)
            .memory_size(as_i32(OPERATION, "memory size", config.memory_mb)?)
            .environment(environment(config))
            .send()
            .await
            .map_err(|error| provider_error(OPERATION, error))?;

        identity(
            OPERATION,
            &config.function_name,
            output.function_name(),
            output.function_arn(),
            output.last_modified(),
        )
    }

    async fn update_function_code(
        &self,
        function_name: &str,
        artifact: &PublishedArtifact,
        architecture: Architecture,
    ) -> Result<CodeUpdate, ProviderError> {
        let output = self
            .client
            .update_function_code()
            .function_name(function_name)
            .s3_bucket(&artifact.store_location)
            .s3_key(&artifact.store_key)
            .architectures(lambda_architecture(architecture))
            .publish(false)
            .send()
            .await
            .map_err(|error| provider_error("update_function_code", error))?;

        debug!(
            component = "lambda_provider",
            function_name,
            store_key = %artifact.store_key,
            code_sha256 = output.code_sha256().unwrap_or_default(),
            "code update accepted"
        );
        Ok(CodeUpdate {
            last_modified: output.last_modified().map(str::to_string),
            code_sha256: output.code_sha256().map(str::to_string),
        })
    }

    async fn function_status(&self, function_name: &str) -> Result<FunctionStatus, ProviderError> {
        const OPERATION: &str = "get_function_configuration";
        let output = self
            .client
            .get_function_configuration()
            .function_name(function_name)
            .send()
            .await
            .map_err(|error| provider_error(OPERATION, error))?;

        let last_modified = output.last_modified().ok_or_else(|| {
            ProviderError::fatal(
                OPERATION,
                format!("response for {function_name} has no last-modified marker"),
            )
        })?;
        Ok(FunctionStatus {
            last_modified: last_modified.to_string(),
            state: function_state(output.state()),
            last_update: update_status(output.last_update_status()),
            reason: output
                .last_update_status_reason()
                .or(output.state_reason())
                .map(str::to_string),
        })
    }

    async fn delete_function(&self, function_name: &str) -> Result<(), ProviderError> {
        match self
            .client
            .delete_function()
            .function_name(function_name)
            .send()
            .await
        {
            Ok(_) => {}
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                debug!(
                    component = "lambda_provider",
                    function_name,
                    "function already gone"
                );
            }
            Err(error) => return Err(provider_error("delete_function", error)),
        }
        info!(component = "lambda_provider", function_name, "deleted function");
        Ok(())
    }
}

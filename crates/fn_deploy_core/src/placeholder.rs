//! Creates the function with a trivial inline body.
//!
//! Existence and configuration are managed here; the real code is pushed
//! afterwards by the reconciler. Only a name change replaces the function.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{DeployError, Result};
use crate::packager::archive_from_memory;
use crate::providers::{ComputeProvider, FunctionConfig, FunctionIdentity, FunctionStatus};
use crate::resource::ManagedResource;
use crate::retry::{poll_status, PollError, PollVerdict, RetryError, RetryPolicy, WaitPolicy};

pub const PLACEHOLDER_MODULE: &str = "index.mjs";
pub const PLACEHOLDER_SOURCE: &str =
    "export const handler = async () => \"Function code not deployed.\";\n";

/// Provider error code for a create that collides with an existing function.
const ALREADY_EXISTS_CODE: &str = "ResourceConflictException";

pub fn placeholder_archive() -> Result<Vec<u8>> {
    archive_from_memory(&[(PLACEHOLDER_MODULE, PLACEHOLDER_SOURCE.as_bytes())])
}

pub struct FunctionResource {
    provider: Arc<dyn ComputeProvider>,
    retry: RetryPolicy,
    wait: WaitPolicy,
}

impl FunctionResource {
    pub fn new(provider: Arc<dyn ComputeProvider>, retry: RetryPolicy, wait: WaitPolicy) -> Self {
        Self {
            provider,
            retry,
            wait,
        }
    }

    async fn create_with_placeholder(&self, config: &FunctionConfig) -> Result<FunctionIdentity> {
        let placeholder = placeholder_archive()?;
        let created = match self.provider.create_function(config, &placeholder).await {
            Ok(created) => created,
            // Left behind by a run that failed before recording it.
            Err(error) if error.code.as_deref() == Some(ALREADY_EXISTS_CODE) => {
                warn!(
                    component = "placeholder",
                    function_name = %config.function_name,
                    "function already exists, adopting it"
                );
                return self.reconfigure(config).await;
            }
            Err(error) => return Err(error.into()),
        };
        info!(
            component = "placeholder",
            function_name = %created.function_name,
            function_arn = %created.function_arn,
            "created function with placeholder code"
        );

        let settled = self.settle(&created.function_name).await?;
        Ok(FunctionIdentity {
            last_modified: settled.last_modified,
            ..created
        })
    }

    /// Applies `config` to an existing function once it is idle.
    async fn reconfigure(&self, config: &FunctionConfig) -> Result<FunctionIdentity> {
        self.settle(&config.function_name).await?;
        let updated = self.provider.update_function_configuration(config).await?;
        let settled = self.settle(&updated.function_name).await?;

        info!(
            component = "placeholder",
            function_name = %updated.function_name,
            last_modified = %settled.last_modified,
            "updated function configuration"
        );
        Ok(FunctionIdentity {
            last_modified: settled.last_modified,
            ..updated
        })
    }

    /// Waits until no creation or update is in flight for `function_name`.
    pub async fn settle(&self, function_name: &str) -> Result<FunctionStatus> {
        poll_status(
            self.provider.as_ref(),
            function_name,
            &self.retry,
            &self.wait,
            |status| {
                if status.has_failed() {
                    PollVerdict::Failed(
                        status
                            .reason
                            .clone()
                            .unwrap_or_else(|| "function entered a failed state".to_string()),
                    )
                } else if status.is_settled() {
                    PollVerdict::Done
                } else {
                    PollVerdict::Pending
                }
            },
        )
        .await
        .map_err(|error| settle_error(function_name, error))
    }
}

fn settle_error(function_name: &str, error: PollError) -> DeployError {
    match error {
        PollError::Retry(RetryError::Fatal(error)) => DeployError::Provider(error),
        PollError::Retry(RetryError::Exhausted { last, .. }) => DeployError::Provider(last),
        PollError::Failed(reason) => DeployError::Provider(crate::ProviderError::fatal(
            "settle_function",
            format!("{function_name}: {reason}"),
        )),
        PollError::TimedOut(waited) => DeployError::ConvergenceTimeout {
            resource: function_name.to_string(),
            waited,
        },
    }
}

#[async_trait]
impl ManagedResource for FunctionResource {
    type Inputs = FunctionConfig;
    type Outputs = FunctionIdentity;

    const KIND: &'static str = "function";

    async fn create(&self, inputs: &FunctionConfig) -> Result<FunctionIdentity> {
        self.create_with_placeholder(inputs).await
    }

    async fn update(
        &self,
        _prior_inputs: &FunctionConfig,
        prior: &FunctionIdentity,
        inputs: &FunctionConfig,
    ) -> Result<FunctionIdentity> {
        if prior.function_name != inputs.function_name {
            info!(
                component = "placeholder",
                old = %prior.function_name,
                new = %inputs.function_name,
                "function name changed, replacing"
            );
            let replacement = self.create_with_placeholder(inputs).await?;
            self.provider.delete_function(&prior.function_name).await?;
            return Ok(replacement);
        }

        self.reconfigure(inputs).await
    }

    async fn delete(&self, prior: &FunctionIdentity) -> Result<()> {
        self.provider.delete_function(&prior.function_name).await?;
        info!(
            component = "placeholder",
            function_name = %prior.function_name,
            "deleted function"
        );
        Ok(())
    }
}

//! SDK-backed implementations of the core provider traits.

pub mod lambda_provider;
pub mod s3_store;

use std::error::Error;
use std::fmt::Debug;

use aws_sdk_lambda::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use fn_deploy_core::ProviderError;

/// Maps an SDK failure onto the pipeline's transient/fatal split.
///
/// Timeouts, dispatch failures and unparseable responses are transient;
/// service errors are classified by their error code.
pub(crate) fn provider_error<E, R>(operation: &'static str, error: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&error).to_string();
    match &error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ProviderError::transient(operation, message)
        }
        _ => match error.code() {
            Some(code) => ProviderError::from_code(operation, code, message),
            None => ProviderError::fatal(operation, message),
        },
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// Output of the external bundler for one deployment attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub handler_path: String,
    pub output_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BuildOutcome {
    Built(BuildResult),
    Failed { errors: Vec<String> },
}

impl BuildOutcome {
    /// Turns a bundler failure into a fatal [`DeployError::Build`].
    pub fn into_result(self) -> Result<BuildResult> {
        match self {
            Self::Built(result) => {
                if result.handler_path.trim().is_empty() {
                    return Err(DeployError::configuration(
                        "bundler reported an empty handler path",
                    ));
                }
                Ok(result)
            }
            Self::Failed { errors } => Err(DeployError::Build {
                diagnostics: if errors.is_empty() {
                    vec!["bundler failed without diagnostics".to_string()]
                } else {
                    errors
                },
            }),
        }
    }
}

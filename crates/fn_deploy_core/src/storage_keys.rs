use crate::error::{DeployError, Result};

pub const ARTIFACT_EXTENSION: &str = "zip";

pub fn validate_logical_name(logical_name: &str) -> Result<()> {
    if logical_name.is_empty() {
        return Err(DeployError::configuration("logical name cannot be empty"));
    }
    if !logical_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DeployError::configuration(format!(
            "logical name '{logical_name}' may only contain ASCII letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

/// Content-addressed object key: `<logicalName>-code-<digest>.zip`.
pub fn artifact_object_key(logical_name: &str, digest: &str) -> String {
    format!("{logical_name}-code-{digest}.{ARTIFACT_EXTENSION}")
}

/// Key under which the state store records one managed resource.
pub fn resource_record_key(kind: &str, logical_name: &str) -> String {
    format!("{kind}/{logical_name}")
}

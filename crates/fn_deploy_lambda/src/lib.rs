//! AWS side of the function deployment pipeline.
//!
//! This crate owns the SDK-facing adapters (S3 artifact store, Lambda compute
//! provider), command-line and manifest configuration, and logging setup.
//! The pipeline itself lives in `fn_deploy_core` and never sees an SDK type.

pub mod adapters;
pub mod config;
pub mod telemetry;

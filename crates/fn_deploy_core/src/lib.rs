//! Function artifact deployment pipeline.
//!
//! This crate owns the deterministic parts of shipping a serverless function:
//! handler wrapping, packaging, content addressing, artifact publication and
//! the two-phase placeholder/reconcile resource pattern. It intentionally
//! excludes AWS SDK concerns; those live behind the [`providers`] traits and
//! are implemented in `fn_deploy_lambda`.

pub mod build;
pub mod content_address;
pub mod error;
pub mod graph;
pub mod handler_wrapper;
pub mod packager;
pub mod pipeline;
pub mod placeholder;
pub mod providers;
pub mod publisher;
pub mod reconciler;
pub mod resource;
pub mod retry;
pub mod storage_keys;

pub use error::{DeployError, ProviderError, ProviderErrorKind};

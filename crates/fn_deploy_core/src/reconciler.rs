//! Pushes the published artifact into an existing function and waits for the
//! provider to converge.
//!
//! `Pending -> Diffing -> (NoOp | Updating) -> Waiting -> (Converged | Failed)`
//!
//! The provider allows one mutation per function at a time, so this step only
//! runs once the function resource has settled, and it absorbs conflict and
//! throttling errors with bounded backoff.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{DeployError, Result};
use crate::providers::{Architecture, ComputeProvider, FunctionStatus, PublishedArtifact};
use crate::resource::ManagedResource;
use crate::retry::{
    poll_status, retry_transient, PollError, PollVerdict, RetryError, RetryPolicy, WaitPolicy,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileTarget {
    pub function_name: String,
    pub function_arn: String,
    pub last_modified_marker: String,
    pub region: String,
    pub architecture: Architecture,
    pub store_key: String,
    pub store_location: String,
    pub digest: String,
}

impl ReconcileTarget {
    fn artifact(&self) -> PublishedArtifact {
        PublishedArtifact {
            store_key: self.store_key.clone(),
            store_location: self.store_location.clone(),
        }
    }
}

/// Last code successfully applied to a function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationRecord {
    pub function_name: String,
    pub function_arn: String,
    pub region: String,
    pub architecture: Architecture,
    pub store_key: String,
    pub store_location: String,
    pub digest: String,
    /// Marker of the function this record was produced for.
    pub observed_marker: String,
    pub converged_last_modified: String,
    pub reconciled_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    Pending,
    Diffing,
    NoOp,
    Updating,
    Waiting,
    Converged,
    Failed,
}

impl ReconcilePhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Diffing => "diffing",
            Self::NoOp => "no_op",
            Self::Updating => "updating",
            Self::Waiting => "waiting",
            Self::Converged => "converged",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub record: ReconciliationRecord,
    pub phases: Vec<ReconcilePhase>,
    pub update_attempts: u32,
}

impl ReconcileOutcome {
    pub fn final_phase(&self) -> ReconcilePhase {
        self.phases
            .last()
            .copied()
            .unwrap_or(ReconcilePhase::Pending)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilerOptions {
    pub retry: RetryPolicy,
    pub wait: WaitPolicy,
    /// Read the live function before deciding on a no-op.
    pub detect_drift: bool,
}

struct PhaseTracker<'a> {
    function_name: &'a str,
    phases: Vec<ReconcilePhase>,
}

impl<'a> PhaseTracker<'a> {
    fn new(function_name: &'a str) -> Self {
        Self {
            function_name,
            phases: vec![ReconcilePhase::Pending],
        }
    }

    fn enter(&mut self, phase: ReconcilePhase) {
        debug!(
            component = "reconciler",
            function_name = self.function_name,
            phase = phase.as_str(),
            "reconcile phase"
        );
        self.phases.push(phase);
    }

    fn fail(&mut self, error: DeployError) -> DeployError {
        self.enter(ReconcilePhase::Failed);
        error!(
            component = "reconciler",
            function_name = self.function_name,
            error = %error,
            "reconciliation failed"
        );
        error
    }
}

pub struct CodeReconciler {
    provider: Arc<dyn ComputeProvider>,
    options: ReconcilerOptions,
}

impl CodeReconciler {
    pub fn new(provider: Arc<dyn ComputeProvider>, options: ReconcilerOptions) -> Self {
        Self { provider, options }
    }

    pub async fn reconcile(
        &self,
        prior: Option<&ReconciliationRecord>,
        target: &ReconcileTarget,
    ) -> Result<ReconcileOutcome> {
        let mut tracker = PhaseTracker::new(&target.function_name);

        if target.region != self.provider.region() {
            return Err(tracker.fail(DeployError::configuration(format!(
                "function {} targets region {} but the provider is bound to {}",
                target.function_name,
                target.region,
                self.provider.region()
            ))));
        }

        tracker.enter(ReconcilePhase::Diffing);
        let change = match prior {
            Some(record) => match describe_change(record, target) {
                Some(change) => Some(change),
                None if self.options.detect_drift => self.detect_drift(record, &mut tracker).await?,
                None => None,
            },
            None => Some("no previous reconciliation".to_string()),
        };

        let prior_marker = prior.map(|record| record.converged_last_modified.clone());
        let Some(change) = change else {
            tracker.enter(ReconcilePhase::NoOp);
            info!(
                component = "reconciler",
                function_name = %target.function_name,
                store_key = %target.store_key,
                "code already up to date"
            );
            return Ok(ReconcileOutcome {
                record: prior
                    .cloned()
                    .ok_or_else(|| DeployError::state("no-op without a prior record"))?,
                phases: tracker.phases,
                update_attempts: 0,
            });
        };

        tracker.enter(ReconcilePhase::Updating);
        info!(
            component = "reconciler",
            function_name = %target.function_name,
            digest = %target.digest,
            store_key = %target.store_key,
            reason = %change,
            "updating function code"
        );
        let artifact = target.artifact();
        let update = match retry_transient(&self.options.retry, "update_function_code", || {
            self.provider.update_function_code(
                &target.function_name,
                &artifact,
                target.architecture,
            )
        })
        .await
        {
            Ok(update) => update,
            Err(error) => return Err(tracker.fail(self.retry_failure(target, error))),
        };

        tracker.enter(ReconcilePhase::Waiting);
        let expected = update.value.last_modified.clone();
        let previous = [Some(target.last_modified_marker.clone()), prior_marker];
        let status = poll_status(
            self.provider.as_ref(),
            &target.function_name,
            &self.options.retry,
            &self.options.wait,
            |status| convergence_verdict(status, expected.as_deref(), &previous),
        )
        .await
        .map_err(|error| tracker.fail(self.wait_failure(target, update.attempts, error)))?;

        tracker.enter(ReconcilePhase::Converged);
        info!(
            component = "reconciler",
            function_name = %target.function_name,
            digest = %target.digest,
            attempts = update.attempts,
            last_modified = %status.last_modified,
            "function code converged"
        );

        Ok(ReconcileOutcome {
            record: ReconciliationRecord {
                function_name: target.function_name.clone(),
                function_arn: target.function_arn.clone(),
                region: target.region.clone(),
                architecture: target.architecture,
                store_key: target.store_key.clone(),
                store_location: target.store_location.clone(),
                digest: target.digest.clone(),
                observed_marker: target.last_modified_marker.clone(),
                converged_last_modified: status.last_modified,
                reconciled_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
            phases: tracker.phases,
            update_attempts: update.attempts,
        })
    }

    async fn detect_drift(
        &self,
        record: &ReconciliationRecord,
        tracker: &mut PhaseTracker<'_>,
    ) -> Result<Option<String>> {
        let status = retry_transient(&self.options.retry, "function_status", || {
            self.provider.function_status(&record.function_name)
        })
        .await
        .map_err(|error| {
            let error = match error {
                RetryError::Fatal(error) | RetryError::Exhausted { last: error, .. } => error,
            };
            tracker.fail(DeployError::Provider(error))
        })?
        .value;

        if status.last_modified == record.converged_last_modified {
            return Ok(None);
        }
        warn!(
            component = "reconciler",
            function_name = %record.function_name,
            recorded = %record.converged_last_modified,
            live = %status.last_modified,
            "function modified outside of reconciliation"
        );
        Ok(Some("live function drifted from the recorded state".to_string()))
    }

    fn retry_failure(&self, target: &ReconcileTarget, error: RetryError) -> DeployError {
        match error {
            RetryError::Fatal(error) => DeployError::Provider(error),
            RetryError::Exhausted { attempts, last } => DeployError::Reconciliation {
                resource: target.function_arn.clone(),
                digest: target.digest.clone(),
                attempts,
                reason: last.to_string(),
            },
        }
    }

    fn wait_failure(&self, target: &ReconcileTarget, attempts: u32, error: PollError) -> DeployError {
        match error {
            PollError::Retry(error) => self.retry_failure(target, error),
            PollError::Failed(reason) => DeployError::Reconciliation {
                resource: target.function_arn.clone(),
                digest: target.digest.clone(),
                attempts,
                reason,
            },
            PollError::TimedOut(waited) => DeployError::ConvergenceTimeout {
                resource: target.function_arn.clone(),
                waited,
            },
        }
    }
}

fn describe_change(record: &ReconciliationRecord, target: &ReconcileTarget) -> Option<String> {
    if record.function_arn != target.function_arn {
        Some(format!(
            "function identity changed from {}",
            record.function_arn
        ))
    } else if record.store_key != target.store_key || record.store_location != target.store_location
    {
        Some(format!("artifact changed from {}", record.store_key))
    } else if record.architecture != target.architecture {
        Some("architecture changed".to_string())
    } else if record.observed_marker != target.last_modified_marker {
        Some("function was modified since the last reconciliation".to_string())
    } else {
        None
    }
}

fn convergence_verdict(
    status: &FunctionStatus,
    expected: Option<&str>,
    previous: &[Option<String>],
) -> PollVerdict {
    if status.has_failed() {
        return PollVerdict::Failed(
            status
                .reason
                .clone()
                .unwrap_or_else(|| "code update failed".to_string()),
        );
    }
    if !status.is_settled() {
        return PollVerdict::Pending;
    }
    let reflects_update = match expected {
        // Markers are ISO-8601 in one format, so they order lexicographically.
        Some(expected) => status.last_modified.as_str() >= expected,
        None => !previous
            .iter()
            .flatten()
            .any(|marker| marker == &status.last_modified),
    };
    if reflects_update {
        PollVerdict::Done
    } else {
        PollVerdict::Pending
    }
}

/// Code reconciliation as a managed resource.
///
/// Every apply goes through [`CodeReconciler::reconcile`], which diffs the
/// target against the recorded state itself.
pub struct CodeUpdateResource {
    reconciler: CodeReconciler,
}

impl CodeUpdateResource {
    pub fn new(reconciler: CodeReconciler) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl ManagedResource for CodeUpdateResource {
    type Inputs = ReconcileTarget;
    type Outputs = ReconciliationRecord;

    const KIND: &'static str = "reconcile";

    async fn create(&self, inputs: &ReconcileTarget) -> Result<ReconciliationRecord> {
        Ok(self.reconciler.reconcile(None, inputs).await?.record)
    }

    async fn update(
        &self,
        _prior_inputs: &ReconcileTarget,
        prior: &ReconciliationRecord,
        inputs: &ReconcileTarget,
    ) -> Result<ReconciliationRecord> {
        Ok(self.reconciler.reconcile(Some(prior), inputs).await?.record)
    }

    async fn delete(&self, _prior: &ReconciliationRecord) -> Result<()> {
        Ok(())
    }

    fn needs_update(&self, _prior_inputs: &ReconcileTarget, _inputs: &ReconcileTarget) -> bool {
        true
    }
}

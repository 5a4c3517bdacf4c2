mod support;

use std::sync::Arc;

use fn_deploy_core::placeholder::FunctionResource;
use fn_deploy_core::providers::Architecture;
use fn_deploy_core::reconciler::{
    CodeReconciler, ReconcilePhase, ReconcileTarget, ReconcilerOptions,
};
use fn_deploy_core::resource::ManagedResource;
use fn_deploy_core::{DeployError, ProviderError};
use support::store::STORE_LOCATION;
use support::{definition, Harness, ScriptedComputeProvider, REGION};

fn conflict() -> ProviderError {
    ProviderError::from_code(
        "update_function_code",
        "ResourceConflictException",
        "The operation cannot be performed at this time. An update is in progress.",
    )
}

#[tokio::test]
async fn conflicts_within_budget_are_absorbed() {
    let harness = Harness::new();
    harness.provider.fail_next_code_updates([conflict(), conflict()]);

    let deployed = harness.deploy(definition("api")).await.expect("deploy");

    let calls = harness.provider.calls();
    assert_eq!(calls.code_update_attempts, 3);
    assert_eq!(calls.code_updates, 1);
    let live = harness.provider.function("api-fn").expect("function exists");
    assert_eq!(
        live.code.expect("code pushed").store_key,
        deployed.artifact.store_key
    );
}

#[tokio::test]
async fn exhausted_budget_names_the_function_and_digest() {
    let harness = Harness::new();
    let mut options = harness.options.clone();
    options.retry.max_attempts = 3;
    harness
        .provider
        .fail_next_code_updates((0..5).map(|_| conflict()));

    let error = harness
        .pipeline_with(options.clone())
        .deploy(definition("api"), harness.build())
        .resolve()
        .await
        .expect_err("budget should be exhausted");

    match &error {
        DeployError::Reconciliation {
            resource,
            digest,
            attempts,
            reason,
        } => {
            assert!(resource.ends_with(":function:api-fn"), "{resource}");
            assert_eq!(digest.len(), 64);
            assert_eq!(*attempts, 3);
            assert!(reason.contains("ResourceConflictException"), "{reason}");
        }
        other => panic!("expected reconciliation error, got {other:?}"),
    }
    assert!(error.is_retryable());
    assert!(harness
        .pipeline_with(options.clone())
        .recorded("api")
        .expect("read record")
        .is_none());

    // Two conflicts remain queued; the rerun absorbs them and converges.
    let deployed = harness
        .pipeline_with(options)
        .deploy(definition("api"), harness.build())
        .resolve()
        .await
        .expect("rerun converges");
    assert_eq!(deployed.reconciliation.digest.len(), 64);
    assert_eq!(harness.provider.calls().creates, 1);
}

#[tokio::test]
async fn fatal_provider_errors_are_not_retried() {
    let harness = Harness::new();
    harness.provider.fail_next_code_updates([ProviderError::from_code(
        "update_function_code",
        "AccessDeniedException",
        "not authorized to perform: lambda:UpdateFunctionCode",
    )]);

    let error = harness
        .deploy(definition("api"))
        .await
        .expect_err("fatal error surfaces");

    match error {
        DeployError::Provider(error) => {
            assert_eq!(error.code.as_deref(), Some("AccessDeniedException"));
            assert!(!error.is_transient());
        }
        other => panic!("expected provider error, got {other:?}"),
    }
    assert_eq!(harness.provider.calls().code_update_attempts, 1);
}

#[tokio::test]
async fn convergence_timeout_is_reported() {
    let harness = Harness::new();
    harness.provider.stall_code_updates();

    let error = harness
        .deploy(definition("api"))
        .await
        .expect_err("wait should time out");

    match &error {
        DeployError::ConvergenceTimeout { resource, waited } => {
            assert!(resource.ends_with(":function:api-fn"), "{resource}");
            assert!(*waited >= harness.options.wait.timeout);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(error.is_retryable());
}

#[tokio::test]
async fn rerun_adopts_function_left_by_failed_create() {
    let harness = Harness::new();
    harness.provider.stall_creates();

    let error = harness
        .deploy(definition("api"))
        .await
        .expect_err("create should not settle");
    match &error {
        DeployError::ConvergenceTimeout { resource, .. } => assert_eq!(resource, "api-fn"),
        other => panic!("expected timeout, got {other:?}"),
    }
    let orphan = harness.provider.function("api-fn").expect("function was created");
    assert!(orphan.code.is_none());

    harness.provider.settle_stalled();
    let deployed = harness.deploy(definition("api")).await.expect("rerun adopts");

    assert_eq!(deployed.function.function_arn, orphan.arn);
    let calls = harness.provider.calls();
    assert_eq!(calls.creates, 2);
    assert_eq!(calls.config_updates, 1);
    assert_eq!(calls.code_updates, 1);
    assert_eq!(harness.provider.function_names(), vec!["api-fn".to_string()]);
    let live = harness.provider.function("api-fn").expect("function exists");
    assert_eq!(
        live.code.expect("code pushed").store_key,
        deployed.artifact.store_key
    );

    harness.deploy(definition("api")).await.expect("third run");
    assert_eq!(harness.provider.calls().mutations(), calls.mutations());
}

#[tokio::test]
async fn failed_code_update_is_a_reconciliation_failure() {
    let harness = Harness::new();
    harness
        .provider
        .reject_code_updates("InvalidZipFileException: could not unzip");

    let error = harness
        .deploy(definition("api"))
        .await
        .expect_err("update should fail");

    match error {
        DeployError::Reconciliation {
            attempts, reason, ..
        } => {
            assert_eq!(attempts, 1);
            assert!(reason.contains("InvalidZipFileException"));
        }
        other => panic!("expected reconciliation error, got {other:?}"),
    }
}

#[tokio::test]
async fn drift_is_repaired_only_when_detection_is_enabled() {
    let harness = Harness::new();
    let deployed = harness.deploy(definition("api")).await.expect("deploy");
    harness.provider.modify_out_of_band("api-fn");

    harness.deploy(definition("api")).await.expect("redeploy");
    assert_eq!(harness.provider.calls().code_updates, 1);

    let mut options = harness.options.clone();
    options.detect_drift = true;
    harness
        .pipeline_with(options)
        .deploy(definition("api"), harness.build())
        .resolve()
        .await
        .expect("redeploy with drift detection");

    assert_eq!(harness.provider.calls().code_updates, 2);
    let live = harness.provider.function("api-fn").expect("function exists");
    assert_eq!(
        live.code.expect("code restored").store_key,
        deployed.artifact.store_key
    );
}

#[tokio::test]
async fn region_mismatch_is_a_configuration_error() {
    let harness = Harness::new();
    let mut options = harness.options.clone();
    options.region = "us-east-1".to_string();

    let error = harness
        .pipeline_with(options)
        .deploy(definition("api"), harness.build())
        .resolve()
        .await
        .expect_err("region mismatch");

    assert!(matches!(error, DeployError::Configuration { .. }));
    assert_eq!(harness.provider.calls().code_update_attempts, 0);
}

#[tokio::test]
async fn reconciler_walks_update_path_then_no_op_path() {
    let harness = Harness::new();
    let provider: Arc<ScriptedComputeProvider> = Arc::clone(&harness.provider);
    let functions = FunctionResource::new(
        provider.clone(),
        harness.options.retry.clone(),
        harness.options.wait.clone(),
    );
    let identity = functions
        .create(&definition("api").function_config("src/index.handler"))
        .await
        .expect("create placeholder");

    let reconciler = CodeReconciler::new(
        provider.clone(),
        ReconcilerOptions {
            retry: harness.options.retry.clone(),
            wait: harness.options.wait.clone(),
            detect_drift: false,
        },
    );
    let target = ReconcileTarget {
        function_name: identity.function_name.clone(),
        function_arn: identity.function_arn.clone(),
        last_modified_marker: identity.last_modified.clone(),
        region: REGION.to_string(),
        architecture: Architecture::Arm64,
        store_key: "api-code-abc.zip".to_string(),
        store_location: STORE_LOCATION.to_string(),
        digest: "abc".to_string(),
    };

    let first = reconciler.reconcile(None, &target).await.expect("reconcile");
    assert_eq!(
        first.phases,
        vec![
            ReconcilePhase::Pending,
            ReconcilePhase::Diffing,
            ReconcilePhase::Updating,
            ReconcilePhase::Waiting,
            ReconcilePhase::Converged,
        ]
    );
    assert_eq!(first.update_attempts, 1);
    assert_eq!(first.record.observed_marker, identity.last_modified);
    assert_eq!(
        provider.function("api-fn").expect("exists").architecture,
        Architecture::Arm64
    );

    let calls = provider.calls();
    let second = reconciler
        .reconcile(Some(&first.record), &target)
        .await
        .expect("reconcile again");
    assert_eq!(second.final_phase(), ReconcilePhase::NoOp);
    assert_eq!(second.update_attempts, 0);
    assert_eq!(second.record, first.record);
    assert_eq!(provider.calls(), calls);
}

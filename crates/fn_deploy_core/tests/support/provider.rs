use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use fn_deploy_core::providers::{
    Architecture, CodeUpdate, ComputeProvider, FunctionConfig, FunctionIdentity, FunctionState,
    FunctionStatus, PublishedArtifact, UpdateStatus,
};
use fn_deploy_core::ProviderError;

/// Provider calls seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallLog {
    pub creates: u32,
    pub config_updates: u32,
    pub code_update_attempts: u32,
    pub code_updates: u32,
    pub status_reads: u32,
    pub deletes: u32,
}

impl CallLog {
    /// Calls that could have changed the remote function.
    pub fn mutations(&self) -> u32 {
        self.creates + self.config_updates + self.code_update_attempts + self.deletes
    }
}

#[derive(Debug, Clone)]
pub struct LiveFunction {
    pub config: FunctionConfig,
    pub arn: String,
    pub last_modified: String,
    /// `None` while the placeholder body is deployed.
    pub code: Option<PublishedArtifact>,
    pub architecture: Architecture,
    creating: bool,
    pending_reads: u32,
}

#[derive(Default)]
struct ProviderState {
    clock: u32,
    functions: BTreeMap<String, LiveFunction>,
    code_update_failures: VecDeque<ProviderError>,
    calls: CallLog,
    settle_reads: u32,
    stall_creates: bool,
    stall_code_updates: bool,
    fail_code_updates_with: Option<String>,
}

impl ProviderState {
    fn tick(&mut self) -> String {
        self.clock += 1;
        format!(
            "2026-01-01T{:02}:{:02}:{:02}.000+0000",
            self.clock / 3600,
            (self.clock / 60) % 60,
            self.clock % 60
        )
    }
}

/// Single-writer compute provider model.
///
/// Every mutation leaves the function busy for `settle_reads` status reads;
/// a mutation issued while busy fails with `ResourceConflictException`.
pub struct ScriptedComputeProvider {
    region: String,
    state: Mutex<ProviderState>,
}

impl ScriptedComputeProvider {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            state: Mutex::new(ProviderState {
                settle_reads: 2,
                ..ProviderState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().expect("poisoned mutex")
    }

    pub fn calls(&self) -> CallLog {
        self.lock().calls
    }

    pub fn function(&self, function_name: &str) -> Option<LiveFunction> {
        self.lock().functions.get(function_name).cloned()
    }

    pub fn function_names(&self) -> Vec<String> {
        self.lock().functions.keys().cloned().collect()
    }

    /// Queues errors returned by the next code update calls, in order.
    pub fn fail_next_code_updates(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.lock().code_update_failures.extend(errors);
    }

    /// Created functions stay `Pending` until [`Self::settle_stalled`].
    pub fn stall_creates(&self) {
        self.lock().stall_creates = true;
    }

    /// Lets every stalled function finish and stops stalling new ones.
    pub fn settle_stalled(&self) {
        let mut state = self.lock();
        state.stall_creates = false;
        state.stall_code_updates = false;
        for function in state.functions.values_mut() {
            if function.pending_reads == u32::MAX {
                function.pending_reads = 0;
            }
        }
    }

    /// Code updates are accepted but never finish applying.
    pub fn stall_code_updates(&self) {
        self.lock().stall_code_updates = true;
    }

    /// Code updates are accepted and then reported as failed.
    pub fn reject_code_updates(&self, reason: &str) {
        self.lock().fail_code_updates_with = Some(reason.to_string());
    }

    /// Modifies the function behind the pipeline's back.
    pub fn modify_out_of_band(&self, function_name: &str) {
        let mut state = self.lock();
        let marker = state.tick();
        if let Some(function) = state.functions.get_mut(function_name) {
            function.last_modified = marker;
            function.code = None;
        }
    }

    fn identity(function: &LiveFunction) -> FunctionIdentity {
        FunctionIdentity {
            function_name: function.config.function_name.clone(),
            function_arn: function.arn.clone(),
            last_modified: function.last_modified.clone(),
        }
    }
}

fn conflict(operation: &'static str, function_name: &str) -> ProviderError {
    ProviderError::from_code(
        operation,
        "ResourceConflictException",
        format!("An update is in progress for resource: {function_name}"),
    )
}

fn not_found(operation: &'static str, function_name: &str) -> ProviderError {
    ProviderError::from_code(
        operation,
        "ResourceNotFoundException",
        format!("Function not found: {function_name}"),
    )
}

#[async_trait]
impl ComputeProvider for ScriptedComputeProvider {
    fn region(&self) -> &str {
        &self.region
    }

    async fn create_function(
        &self,
        config: &FunctionConfig,
        placeholder_zip: &[u8],
    ) -> Result<FunctionIdentity, ProviderError> {
        let mut state = self.lock();
        state.calls.creates += 1;
        if placeholder_zip.is_empty() {
            return Err(ProviderError::fatal("create_function", "empty code package"));
        }
        if state.functions.contains_key(&config.function_name) {
            return Err(ProviderError::from_code(
                "create_function",
                "ResourceConflictException",
                format!("Function already exist: {}", config.function_name),
            ));
        }
        let pending_reads = if state.stall_creates {
            u32::MAX
        } else {
            state.settle_reads
        };

        let function = LiveFunction {
            config: config.clone(),
            arn: format!(
                "arn:aws:lambda:{}:123456789012:function:{}",
                self.region, config.function_name
            ),
            last_modified: state.tick(),
            code: None,
            architecture: config.architecture,
            creating: true,
            pending_reads,
        };
        let identity = Self::identity(&function);
        state
            .functions
            .insert(config.function_name.clone(), function);
        Ok(identity)
    }

    async fn update_function_configuration(
        &self,
        config: &FunctionConfig,
    ) -> Result<FunctionIdentity, ProviderError> {
        let mut state = self.lock();
        state.calls.config_updates += 1;
        let marker = state.tick();
        let settle_reads = state.settle_reads;
        let function = state
            .functions
            .get_mut(&config.function_name)
            .ok_or_else(|| not_found("update_function_configuration", &config.function_name))?;
        if function.pending_reads > 0 {
            return Err(conflict(
                "update_function_configuration",
                &config.function_name,
            ));
        }

        function.config = config.clone();
        function.last_modified = marker;
        function.pending_reads = settle_reads;
        Ok(Self::identity(function))
    }

    async fn update_function_code(
        &self,
        function_name: &str,
        artifact: &PublishedArtifact,
        architecture: Architecture,
    ) -> Result<CodeUpdate, ProviderError> {
        let mut state = self.lock();
        state.calls.code_update_attempts += 1;
        if let Some(error) = state.code_update_failures.pop_front() {
            return Err(error);
        }
        let marker = state.tick();
        let pending_reads = if state.stall_code_updates {
            u32::MAX
        } else {
            state.settle_reads
        };
        let function = state
            .functions
            .get_mut(function_name)
            .ok_or_else(|| not_found("update_function_code", function_name))?;
        if function.pending_reads > 0 {
            return Err(conflict("update_function_code", function_name));
        }

        function.code = Some(artifact.clone());
        function.architecture = architecture;
        function.last_modified = marker.clone();
        function.pending_reads = pending_reads;
        state.calls.code_updates += 1;
        Ok(CodeUpdate {
            last_modified: Some(marker),
            code_sha256: None,
        })
    }

    async fn function_status(&self, function_name: &str) -> Result<FunctionStatus, ProviderError> {
        let mut state = self.lock();
        state.calls.status_reads += 1;
        let rejected = state.fail_code_updates_with.clone();
        let function = state
            .functions
            .get_mut(function_name)
            .ok_or_else(|| not_found("function_status", function_name))?;

        let busy = function.pending_reads > 0;
        if busy && function.pending_reads != u32::MAX {
            function.pending_reads -= 1;
        }
        let (lifecycle, last_update, reason) = match (busy, function.creating) {
            (true, true) => (FunctionState::Pending, UpdateStatus::Successful, None),
            (true, false) => (FunctionState::Active, UpdateStatus::InProgress, None),
            (false, _) => match (&rejected, &function.code) {
                (Some(reason), Some(_)) => {
                    (FunctionState::Active, UpdateStatus::Failed, Some(reason.clone()))
                }
                _ => (FunctionState::Active, UpdateStatus::Successful, None),
            },
        };
        if !busy {
            function.creating = false;
        }

        Ok(FunctionStatus {
            last_modified: function.last_modified.clone(),
            state: lifecycle,
            last_update,
            reason,
        })
    }

    async fn delete_function(&self, function_name: &str) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.calls.deletes += 1;
        state.functions.remove(function_name);
        Ok(())
    }
}

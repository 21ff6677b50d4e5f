use crate::config::TamperConfig;
use crate::mutation::{MutationPoint, MutationResult};
use crate::parallel::tasks::{
    DryRunMutantExecutionTask, MutantExecutionTask, OriginalRun, OriginalTestExecutionTask,
};
use crate::parallel::{TaskError, TaskExecutor};
use crate::runner::TestRunner;
use crate::sandbox::{Sandbox, sandbox_for};
use crate::toolchain::ObjectFiles;
use crate::unit_test::Test;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Drives the original test run and the mutant runs with the configured
/// worker pools and sandbox.
pub struct MutationEngine {
    config: TamperConfig,
    runner: Box<dyn TestRunner>,
    sandbox: Arc<dyn Sandbox>,
}

impl MutationEngine {
    pub fn new(config: TamperConfig, runner: impl TestRunner + 'static) -> Self {
        let config = config.normalize();
        let sandbox = sandbox_for(config.execution.sandbox);
        Self {
            config,
            runner: Box::new(runner),
            sandbox,
        }
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn config(&self) -> &TamperConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &dyn Sandbox {
        self.sandbox.as_ref()
    }

    /// Runs every test against the unmutated program, with every function in
    /// `function_names` reached through its trampoline.
    pub fn run_original_tests(
        &self,
        tests: &[Arc<dyn Test>],
        objects: &ObjectFiles,
        function_names: &[String],
    ) -> Result<Vec<OriginalRun>, TaskError> {
        let function_names: Arc<[String]> = function_names.into();
        let workers = self.config.parallelization.test_execution_workers;
        let tasks = (0..workers)
            .map(|_| {
                OriginalTestExecutionTask::new(
                    self.runner.as_ref(),
                    self.sandbox.as_ref(),
                    Arc::clone(objects),
                    Arc::clone(&function_names),
                    self.config.execution.test_timeout(),
                )
            })
            .collect();

        let mut runs = Vec::with_capacity(tests.len());
        TaskExecutor::new("Running original tests", tests, tasks)
            .with_progress(self.config.execution.show_progress)
            .execute(&mut runs)?;
        Ok(runs)
    }

    /// Runs every reachable test of every mutation point with the point's
    /// mutant active, or only walks the pairs in dry-run mode.
    pub fn run_mutants(
        &self,
        points: &[Arc<MutationPoint>],
        objects: &ObjectFiles,
        mutated_function_names: &[String],
    ) -> Result<Vec<MutationResult>, TaskError> {
        let mut results = Vec::new();
        if points.is_empty() {
            info!("No mutants to run");
            return Ok(results);
        }

        let execution = &self.config.execution;
        let workers = self.config.parallelization.mutant_execution_workers;
        if execution.dry_run {
            let tasks = (0..workers)
                .map(|_| DryRunMutantExecutionTask::new(execution.timeout_policy()))
                .collect();
            TaskExecutor::new("Running mutants (dry run)", points, tasks)
                .with_progress(execution.show_progress)
                .execute(&mut results)?;
        } else {
            let function_names: Arc<[String]> = mutated_function_names.into();
            let tasks = (0..workers)
                .map(|_| {
                    MutantExecutionTask::new(
                        self.runner.as_ref(),
                        self.sandbox.as_ref(),
                        Arc::clone(objects),
                        Arc::clone(&function_names),
                        execution.fail_fast,
                        execution.timeout_policy(),
                    )
                })
                .collect();
            TaskExecutor::new("Running mutants", points, tasks)
                .with_progress(execution.show_progress)
                .execute(&mut results)?;
        }
        Ok(results)
    }
}

/// Tests that passed against the original program, carrying their baselines.
/// Anything else cannot tell a mutant apart from the original and is dropped.
pub fn passing_tests(runs: &[OriginalRun]) -> Vec<Arc<dyn Test>> {
    runs.iter()
        .filter_map(|run| {
            if run.result.status.is_passed() {
                Some(run.baselined_test())
            } else {
                warn!(
                    test = %run.test.id(),
                    status = ?run.result.status,
                    "Test does not pass on the original program, excluding it"
                );
                None
            }
        })
        .collect()
}

/// Distinct functions of `points`, in first-seen order.
pub fn mutated_function_names(points: &[Arc<MutationPoint>]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    points
        .iter()
        .map(|point| point.function())
        .filter(|function| seen.insert(*function))
        .map(ToString::to_string)
        .collect()
}

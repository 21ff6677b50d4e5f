use super::LoadedImage;
use crate::config::TimeoutPolicy;
use crate::execution::{ExecutionResult, ExecutionStatus};
use crate::mutation::{MutationPoint, MutationResult};
use crate::parallel::{Progress, Task, TaskError};
use crate::runner::TestRunner;
use crate::sandbox::Sandbox;
use crate::toolchain::ObjectFiles;
use std::sync::Arc;
use tracing::debug;

/// Runs every reachable test of every mutation point in a shard with the
/// point's mutant swapped in.
///
/// The program is linked once, on the first shard, and reused for every
/// point after that: activating a mutant only rewrites its trampoline slot.
pub struct MutantExecutionTask<'a> {
    runner: &'a dyn TestRunner,
    sandbox: &'a dyn Sandbox,
    objects: ObjectFiles,
    function_names: Arc<[String]>,
    fail_fast: bool,
    timeouts: TimeoutPolicy,
    image: Option<LoadedImage>,
}

impl<'a> MutantExecutionTask<'a> {
    /// `objects` holds the original program and the compiled mutants;
    /// `function_names` the unmangled originals that get a trampoline.
    pub fn new(
        runner: &'a dyn TestRunner,
        sandbox: &'a dyn Sandbox,
        objects: ObjectFiles,
        function_names: Arc<[String]>,
        fail_fast: bool,
        timeouts: TimeoutPolicy,
    ) -> Self {
        Self {
            runner,
            sandbox,
            objects,
            function_names,
            fail_fast,
            timeouts,
            image: None,
        }
    }

    fn run_shard(
        &self,
        image: &LoadedImage,
        shard: &[Arc<MutationPoint>],
        storage: &mut Vec<MutationResult>,
        progress: &Progress,
    ) -> Result<(), TaskError> {
        let mangler = self.runner.mangler();

        for point in shard {
            let trampoline = image
                .trampolines
                .find_trampoline(&mangler.name_with_prefix(&point.trampoline_name()))?;
            let mutant_symbol = mangler.name_with_prefix(&point.mutated_function_name());
            let mutant = image.jit.get_symbol(&mutant_symbol).ok_or_else(|| {
                TaskError::UnresolvedMutant {
                    symbol: mutant_symbol.clone(),
                    mutation_point: point.unique_id().to_string(),
                }
            })?;

            debug!(
                mutation_point = %point.unique_id(),
                trampoline = %trampoline.name(),
                %mutant,
                tests = point.reachable_tests().len(),
                "Activating mutant"
            );
            let _activation = trampoline.activate(mutant);

            let mut killed = false;
            for reachable in point.reachable_tests() {
                let result = if self.fail_fast && killed {
                    ExecutionResult::fail_fast()
                } else {
                    let timeout = self
                        .timeouts
                        .timeout_for(reachable.test.baseline().running_time);
                    let test = reachable.test.as_ref();
                    let jit = &image.jit;
                    self.sandbox
                        .run(&mut || self.runner.run_test(test, jit), timeout)
                };
                if result.status == ExecutionStatus::Invalid {
                    return Err(TaskError::SandboxFailed {
                        mutation_point: point.unique_id().to_string(),
                        test: reachable.test.id().to_string(),
                        stderr: result.stderr,
                    });
                }

                killed |= !result.status.is_passed();
                storage.push(MutationResult::new(
                    result,
                    Arc::clone(point),
                    reachable.distance,
                    Arc::clone(&reachable.test),
                ));
            }

            progress.increment();
        }
        Ok(())
    }
}

impl Task for MutantExecutionTask<'_> {
    type Input = Arc<MutationPoint>;
    type Output = MutationResult;

    fn run(
        &mut self,
        shard: &[Arc<MutationPoint>],
        storage: &mut Vec<MutationResult>,
        progress: &Progress,
    ) -> Result<(), TaskError> {
        let image = match self.image.take() {
            Some(image) => image,
            None => LoadedImage::load(self.runner, &self.objects, &self.function_names)?,
        };
        let outcome = self.run_shard(&image, shard, storage, progress);
        self.image = Some(image);
        outcome
    }
}

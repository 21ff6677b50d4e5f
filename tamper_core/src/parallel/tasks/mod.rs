//! Task implementations driven by [`super::TaskExecutor`].

mod dry_run;
mod mutant_execution;

pub use dry_run::DryRunMutantExecutionTask;
pub use mutant_execution::MutantExecutionTask;
pub use original_test::{OriginalRun, OriginalTestExecutionTask};

use super::TaskError;
use crate::runner::TestRunner;
use crate::toolchain::{JitEngine, ObjectFile};
use crate::trampoline::TrampolineTable;
use std::sync::Arc;
use tracing::debug;

/// A program image owned by one task, with every trampoline pointing at its
/// original function.
struct LoadedImage {
    jit: JitEngine,
    trampolines: Arc<TrampolineTable>,
}

impl LoadedImage {
    fn load(
        runner: &dyn TestRunner,
        objects: &[ObjectFile],
        function_names: &[String],
    ) -> Result<Self, TaskError> {
        let trampolines = TrampolineTable::new(function_names, runner.mangler());
        let mut jit = JitEngine::new();
        runner.load_program(objects, &trampolines, &mut jit)?;
        trampolines.fixup_original_functions(&jit)?;
        debug!(
            objects = objects.len(),
            trampolines = trampolines.len(),
            "Loaded program image for task"
        );
        Ok(Self { jit, trampolines })
    }
}

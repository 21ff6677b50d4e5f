//! Sharded parallel execution of mutation-testing work.

mod executor;
mod progress;
pub mod tasks;

pub use executor::{Task, TaskExecutor, shard_bounds};
pub use progress::Progress;

use crate::toolchain::LinkError;
use crate::trampoline::TrampolineError;
use thiserror::Error;

/// Errors that abandon a task, and with it the whole `execute` call.
///
/// Anything that goes wrong inside a sandboxed test run is not an error: it
/// is recorded as the status of that run.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("failed to link program: {0}")]
    Link(#[from] LinkError),
    #[error(transparent)]
    Trampoline(#[from] TrampolineError),
    #[error("mutated function `{symbol}` for mutation point `{mutation_point}` is not in the loaded program")]
    UnresolvedMutant {
        symbol: String,
        mutation_point: String,
    },
    #[error("sandbox could not run test `{test}` for mutation point `{mutation_point}`: {stderr}")]
    SandboxFailed {
        mutation_point: String,
        test: String,
        stderr: String,
    },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),
    #[error("no task instances were supplied for {0} input items")]
    NoWorkers(usize),
}

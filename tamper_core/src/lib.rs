pub mod call_tree;
pub mod config;
pub mod engine;
pub mod execution;
pub mod mutation;
pub mod parallel;
pub mod report;
pub mod runner;
pub mod sandbox;
pub mod toolchain;
pub mod trampoline;

pub use call_tree::{CallRecorder, CallTree, DynamicCallTree, Testee, reachable_tests};
pub use config::{SandboxKind, TamperConfig, TimeoutPolicy};
pub use engine::{MutationEngine, mutated_function_names, passing_tests};
pub use execution::{ExecutionResult, ExecutionStatus};
pub use mutation::{
    MutationPoint, MutationPointAddress, MutationResult, MutatorKind, ReachableTest,
    SourceLocation,
};
pub use parallel::tasks::OriginalRun;
pub use parallel::{Task, TaskError, TaskExecutor};
pub use report::{MutantStatus, RunSummary};
pub use runner::{SimpleTestRunner, TestRunner};
pub use sandbox::{NullSandbox, Sandbox, sandbox_for};
#[cfg(unix)]
pub use sandbox::ForkSandbox;
pub use trampoline::{TrampolineError, TrampolineTable};
pub use unit_test::{SimpleTest, Test};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of running a single test once, either against the original
/// program or with a mutant active.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    /// No meaningful outcome was produced, e.g. no program was loaded or the
    /// sandbox itself could not be set up.
    #[default]
    Invalid,
    Failed,
    Passed,
    /// The sandbox deadline expired before the test finished.
    Timedout,
    /// The test panicked, faulted, was killed by a signal or exited abnormally.
    Crashed,
    /// Skipped because an earlier test already killed the same mutant.
    FailFast,
    /// Produced by the dry-run pipeline without executing anything.
    DryRun,
}

impl ExecutionStatus {
    pub fn is_passed(self) -> bool {
        self == ExecutionStatus::Passed
    }
}

/// Status, wall-clock running time and captured output of one test run.
///
/// Results are created fresh for every run and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub running_time: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn new(status: ExecutionStatus, running_time: Duration) -> Self {
        Self {
            status,
            running_time,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Result recorded for a test that was skipped under fail-fast.
    pub fn fail_fast() -> Self {
        Self::new(ExecutionStatus::FailFast, Duration::ZERO)
    }

    pub fn dry_run(running_time: Duration) -> Self {
        Self::new(ExecutionStatus::DryRun, running_time)
    }

    pub fn with_output(mut self, stdout: String, stderr: String) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_result_is_invalid_and_empty() {
        let result = ExecutionResult::default();
        assert_eq!(result.status, ExecutionStatus::Invalid);
        assert_eq!(result.running_time, Duration::ZERO);
        assert!(result.stdout.is_empty());
        assert!(result.stderr.is_empty());
    }

    #[test]
    fn fail_fast_result_has_zero_running_time() {
        let result = ExecutionResult::fail_fast();
        assert_eq!(result.status, ExecutionStatus::FailFast);
        assert_eq!(result.running_time, Duration::ZERO);
    }

    #[test]
    fn status_survives_bincode_encoding() {
        let config = bincode::config::standard();
        for status in [
            ExecutionStatus::Passed,
            ExecutionStatus::Failed,
            ExecutionStatus::Crashed,
        ] {
            let bytes = bincode::encode_to_vec(status, config).expect("encode status");
            let (decoded, _len): (ExecutionStatus, usize) =
                bincode::decode_from_slice(&bytes, config).expect("decode status");
            assert_eq!(decoded, status);
        }
    }
}

use crate::config::TimeoutPolicy;
use crate::execution::ExecutionResult;
use crate::mutation::{MutationPoint, MutationResult};
use crate::parallel::{Progress, Task, TaskError};
use std::sync::Arc;

/// Walks the same (point, test) pairs as a real run without loading or
/// executing anything. Each result carries the timeout the real run would
/// have used.
#[derive(Debug, Clone, Copy)]
pub struct DryRunMutantExecutionTask {
    timeouts: TimeoutPolicy,
}

impl DryRunMutantExecutionTask {
    pub fn new(timeouts: TimeoutPolicy) -> Self {
        Self { timeouts }
    }
}

impl Task for DryRunMutantExecutionTask {
    type Input = Arc<MutationPoint>;
    type Output = MutationResult;

    fn run(
        &mut self,
        shard: &[Arc<MutationPoint>],
        storage: &mut Vec<MutationResult>,
        progress: &Progress,
    ) -> Result<(), TaskError> {
        for point in shard {
            for reachable in point.reachable_tests() {
                let timeout = self
                    .timeouts
                    .timeout_for(reachable.test.baseline().running_time);
                storage.push(MutationResult::new(
                    ExecutionResult::dry_run(timeout),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use crate::mutation::{MutationPointAddress, MutatorKind};
    use crate::parallel::TaskExecutor;
    use crate::unit_test::{SimpleTest, Test};
    use std::time::Duration;

    fn test_with_baseline(name: &str, ms: u64) -> Arc<dyn Test> {
        Arc::new(SimpleTest::new(name, name).with_baseline(ExecutionResult::new(
            ExecutionStatus::Passed,
            Duration::from_millis(ms),
        )))
    }

    #[test]
    fn reports_the_timeout_each_run_would_get() {
        let points: Vec<Arc<MutationPoint>> = (0..5)
            .map(|i| {
                Arc::new(
                    MutationPoint::new(
                        "m.bc",
                        "f",
                        MutationPointAddress::new(0, 0, i),
                        MutatorKind::NegateCondition,
                        "icmp",
                    )
                    .with_reachable_test(test_with_baseline("fast", 1), 1)
                    .with_reachable_test(test_with_baseline("slow", 20), 2),
                )
            })
            .collect();

        let tasks = (0..2)
            .map(|_| DryRunMutantExecutionTask::new(TimeoutPolicy::default()))
            .collect();
        let mut results = Vec::new();
        TaskExecutor::new("dry run", &points, tasks)
            .execute(&mut results)
            .expect("dry run");

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.result().status == ExecutionStatus::DryRun));
        let times: Vec<Duration> = results[..2].iter().map(|r| r.result().running_time).collect();
        assert_eq!(
            times,
            vec![Duration::from_millis(30), Duration::from_millis(200)]
        );
        assert_eq!(results[9].mutation_point().unique_id(), "negate_mutator:m.bc:0_0_4");
    }
}

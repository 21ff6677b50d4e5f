use crate::execution::ExecutionStatus;
use crate::mutation::MutationResult;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutantStatus {
    Killed,
    Survived,
    /// No test produced a verdict, e.g. only dry-run results were recorded.
    NotExecuted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestOutcome {
    pub test: String,
    pub distance: u32,
    pub status: ExecutionStatus,
    pub running_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MutantOutcome {
    pub id: String,
    pub module: String,
    pub function: String,
    pub mutator: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub status: MutantStatus,
    pub tests: Vec<TestOutcome>,
}

/// Per-mutant verdicts of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunSummary {
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub not_executed: usize,
    /// Killed mutants as a percentage of executed ones.
    pub score: f64,
    pub mutants: Vec<MutantOutcome>,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl RunSummary {
    /// Groups results by mutation point, in the order points first appear.
    /// A mutant is killed when any of its tests failed, crashed or timed out.
    pub fn from_results(results: &[MutationResult]) -> Self {
        let mut mutants: Vec<MutantOutcome> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for result in results {
            let point = result.mutation_point();
            let outcome = TestOutcome {
                test: result.test().id().to_string(),
                distance: result.distance(),
                status: result.result().status,
                running_time_ms: millis(result.result().running_time),
            };
            match index.get(point.unique_id()) {
                Some(&i) => mutants[i].tests.push(outcome),
                None => {
                    index.insert(point.unique_id(), mutants.len());
                    mutants.push(MutantOutcome {
                        id: point.unique_id().to_string(),
                        module: point.module().to_string(),
                        function: point.function().to_string(),
                        mutator: point.mutator().id().to_string(),
                        description: point.mutator().description().to_string(),
                        location: point.source_location().map(ToString::to_string),
                        status: MutantStatus::NotExecuted,
                        tests: vec![outcome],
                    });
                }
            }
        }

        for mutant in &mut mutants {
            mutant.status = verdict(&mutant.tests);
        }

        let count = |status: MutantStatus| mutants.iter().filter(|m| m.status == status).count();
        let killed = count(MutantStatus::Killed);
        let survived = count(MutantStatus::Survived);
        let not_executed = count(MutantStatus::NotExecuted);
        let executed = killed + survived;
        let score = if executed == 0 {
            0.0
        } else {
            killed as f64 * 100.0 / executed as f64
        };

        Self {
            total: mutants.len(),
            killed,
            survived,
            not_executed,
            score,
            mutants,
        }
    }

    pub fn survivors(&self) -> impl Iterator<Item = &MutantOutcome> {
        self.mutants
            .iter()
            .filter(|m| m.status == MutantStatus::Survived)
    }
}

fn verdict(tests: &[TestOutcome]) -> MutantStatus {
    let kills = |status: ExecutionStatus| {
        matches!(
            status,
            ExecutionStatus::Failed
                | ExecutionStatus::Crashed
                | ExecutionStatus::Timedout
                | ExecutionStatus::FailFast
        )
    };
    if tests.iter().any(|t| kills(t.status)) {
        MutantStatus::Killed
    } else if tests.iter().any(|t| t.status.is_passed()) {
        MutantStatus::Survived
    } else {
        MutantStatus::NotExecuted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionResult;
    use crate::mutation::{MutationPoint, MutationPointAddress, MutatorKind, SourceLocation};
    use crate::unit_test::{SimpleTest, Test};
    use std::sync::Arc;

    fn point(i: usize) -> Arc<MutationPoint> {
        Arc::new(
            MutationPoint::new(
                "m.bc",
                "f",
                MutationPointAddress::new(0, 0, i),
                MutatorKind::MathSub,
                "sub",
            )
            .with_source_location(SourceLocation {
                file: "m.c".to_string(),
                line: 10 + i as u32,
                column: 3,
            }),
        )
    }

    fn result(point: &Arc<MutationPoint>, test: &str, status: ExecutionStatus) -> MutationResult {
        let test: Arc<dyn Test> = Arc::new(SimpleTest::new(test, test));
        MutationResult::new(
            ExecutionResult::new(status, Duration::from_millis(4)),
            Arc::clone(point),
            1,
            test,
        )
    }

    #[test]
    fn any_non_passing_test_kills_the_mutant() {
        let (a, b, c) = (point(0), point(1), point(2));
        let results = vec![
            result(&a, "t1", ExecutionStatus::Passed),
            result(&b, "t1", ExecutionStatus::Passed),
            result(&a, "t2", ExecutionStatus::Timedout),
            result(&b, "t2", ExecutionStatus::Passed),
            result(&c, "t1", ExecutionStatus::Crashed),
            result(&c, "t2", ExecutionStatus::FailFast),
        ];

        let summary = RunSummary::from_results(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.killed, 2);
        assert_eq!(summary.survived, 1);
        assert!((summary.score - 200.0 / 3.0).abs() < 1e-9);

        let ids: Vec<&str> = summary.mutants.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "math_sub_mutator:m.bc:0_0_0",
                "math_sub_mutator:m.bc:0_0_1",
                "math_sub_mutator:m.bc:0_0_2"
            ]
        );
        let survivors: Vec<&str> = summary.survivors().map(|m| m.id.as_str()).collect();
        assert_eq!(survivors, vec!["math_sub_mutator:m.bc:0_0_1"]);
        assert_eq!(summary.mutants[1].location.as_deref(), Some("m.c:11:3"));
        assert_eq!(summary.mutants[0].tests.len(), 2);
    }

    #[test]
    fn dry_run_results_are_not_verdicts() {
        let a = point(0);
        let summary = RunSummary::from_results(&[
            result(&a, "t1", ExecutionStatus::DryRun),
            result(&a, "t2", ExecutionStatus::DryRun),
        ]);
        assert_eq!(summary.not_executed, 1);
        assert_eq!(summary.killed + summary.survived, 0);
        assert_eq!(summary.score, 0.0);
    }

    #[test]
    fn invalid_runs_never_count_as_kills() {
        let (a, b) = (point(0), point(1));
        let summary = RunSummary::from_results(&[
            result(&a, "t1", ExecutionStatus::Invalid),
            result(&b, "t1", ExecutionStatus::Passed),
            result(&b, "t2", ExecutionStatus::Invalid),
        ]);
        assert_eq!(summary.mutants[0].status, MutantStatus::NotExecuted);
        assert_eq!(summary.mutants[1].status, MutantStatus::Survived);
        assert_eq!(summary.killed, 0);
        assert_eq!(summary.score, 0.0);
    }

    #[test]
    fn empty_run_has_zero_score() {
        let summary = RunSummary::from_results(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.score, 0.0);
    }

    #[test]
    fn serializes_with_kebab_case_keys() {
        let a = point(0);
        let summary = RunSummary::from_results(&[result(&a, "t1", ExecutionStatus::Failed)]);
        let json = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(json["killed"], 1);
        assert_eq!(json["not-executed"], 0);
        assert_eq!(json["mutants"][0]["status"], "killed");
        assert_eq!(json["mutants"][0]["description"], "Replaces - with +");
        assert_eq!(json["mutants"][0]["tests"][0]["status"], "failed");
        assert_eq!(json["mutants"][0]["tests"][0]["running-time-ms"], 4);
    }
}

use crate::execution::ExecutionResult;
use crate::trampoline::trampoline_name;
use crate::unit_test::Test;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of the mutation operator that produced a mutation point.
///
/// Resolved once during discovery; the execution pipeline only ever looks at
/// the precomputed names derived from a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutatorKind {
    MathAdd,
    MathSub,
    MathMul,
    MathDiv,
    NegateCondition,
    ConditionalsBoundary,
    ReplaceAssignment,
    ReplaceCall,
    RemoveVoidCall,
    AndOrReplacement,
    ScalarValue,
}

impl MutatorKind {
    pub fn id(self) -> &'static str {
        match self {
            MutatorKind::MathAdd => "math_add_mutator",
            MutatorKind::MathSub => "math_sub_mutator",
            MutatorKind::MathMul => "math_mul_mutator",
            MutatorKind::MathDiv => "math_div_mutator",
            MutatorKind::NegateCondition => "negate_mutator",
            MutatorKind::ConditionalsBoundary => "conditionals_boundary_mutator",
            MutatorKind::ReplaceAssignment => "replace_assignment_mutator",
            MutatorKind::ReplaceCall => "replace_call_mutator",
            MutatorKind::RemoveVoidCall => "remove_void_function_mutator",
            MutatorKind::AndOrReplacement => "and_or_replacement_mutator",
            MutatorKind::ScalarValue => "scalar_value_mutator",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            MutatorKind::MathAdd => "Replaces + with -",
            MutatorKind::MathSub => "Replaces - with +",
            MutatorKind::MathMul => "Replaces * with /",
            MutatorKind::MathDiv => "Replaces / with *",
            MutatorKind::NegateCondition => "Negates a conditional",
            MutatorKind::ConditionalsBoundary => "Moves a comparison boundary (< to <=, > to >=)",
            MutatorKind::ReplaceAssignment => "Replaces an assigned value with a constant",
            MutatorKind::ReplaceCall => "Replaces a call with a constant",
            MutatorKind::RemoveVoidCall => "Removes a call to a function returning void",
            MutatorKind::AndOrReplacement => "Swaps && and ||",
            MutatorKind::ScalarValue => "Replaces a scalar constant",
        }
    }
}

impl fmt::Display for MutatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Structural position of an instruction, stable across recompiles of the
/// same module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationPointAddress {
    pub function_index: usize,
    pub basic_block_index: usize,
    pub instruction_index: usize,
}

impl MutationPointAddress {
    pub fn new(function_index: usize, basic_block_index: usize, instruction_index: usize) -> Self {
        Self {
            function_index,
            basic_block_index,
            instruction_index,
        }
    }

    pub fn identifier(&self) -> String {
        format!(
            "{}_{}_{}",
            self.function_index, self.basic_block_index, self.instruction_index
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A test that reaches a mutation point, `distance` call hops away from the
/// test's entry point.
#[derive(Debug, Clone)]
pub struct ReachableTest {
    pub test: Arc<dyn Test>,
    pub distance: u32,
}

/// One candidate mutation. Built once by discovery, then shared read-only.
#[derive(Debug, Clone)]
pub struct MutationPoint {
    module: String,
    function: String,
    address: MutationPointAddress,
    mutator: MutatorKind,
    original_value: String,
    source_location: Option<SourceLocation>,
    unique_id: String,
    reachable_tests: Vec<ReachableTest>,
}

impl MutationPoint {
    pub fn new(
        module: impl Into<String>,
        function: impl Into<String>,
        address: MutationPointAddress,
        mutator: MutatorKind,
        original_value: impl Into<String>,
    ) -> Self {
        let module = module.into();
        let unique_id = format!("{}:{}:{}", mutator.id(), module, address.identifier());
        Self {
            module,
            function: function.into(),
            address,
            mutator,
            original_value: original_value.into(),
            source_location: None,
            unique_id,
            reachable_tests: Vec::new(),
        }
    }

    pub fn with_source_location(mut self, location: SourceLocation) -> Self {
        self.source_location = Some(location);
        self
    }

    pub fn with_reachable_test(mut self, test: Arc<dyn Test>, distance: u32) -> Self {
        self.reachable_tests.push(ReachableTest { test, distance });
        self
    }

    pub fn with_reachable_tests(mut self, tests: impl IntoIterator<Item = ReachableTest>) -> Self {
        self.reachable_tests.extend(tests);
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Unmangled name of the original function containing the instruction.
    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn address(&self) -> MutationPointAddress {
        self.address
    }

    pub fn mutator(&self) -> MutatorKind {
        self.mutator
    }

    pub fn original_value(&self) -> &str {
        &self.original_value
    }

    pub fn source_location(&self) -> Option<&SourceLocation> {
        self.source_location.as_ref()
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn reachable_tests(&self) -> &[ReachableTest] {
        &self.reachable_tests
    }

    /// Unmangled name of the function body compiled with this mutation
    /// applied. Function and module are length-prefixed, so no two points
    /// of a program can map to the same name.
    pub fn mutated_function_name(&self) -> String {
        format!(
            "_tamper_{}{}_{}{}_{}_{}",
            self.function.len(),
            self.function,
            self.module.len(),
            self.module,
            self.mutator.id(),
            self.address.identifier()
        )
    }

    /// Unmangled name of the slot through which callers reach the function.
    pub fn trampoline_name(&self) -> String {
        trampoline_name(&self.function)
    }
}

/// Outcome of one test while one mutation was active.
#[derive(Debug, Clone)]
pub struct MutationResult {
    result: ExecutionResult,
    mutation_point: Arc<MutationPoint>,
    distance: u32,
    test: Arc<dyn Test>,
}

impl MutationResult {
    pub fn new(
        result: ExecutionResult,
        mutation_point: Arc<MutationPoint>,
        distance: u32,
        test: Arc<dyn Test>,
    ) -> Self {
        Self {
            result,
            mutation_point,
            distance,
            test,
        }
    }

    pub fn result(&self) -> &ExecutionResult {
        &self.result
    }

    pub fn mutation_point(&self) -> &Arc<MutationPoint> {
        &self.mutation_point
    }

    pub fn distance(&self) -> u32 {
        self.distance
    }

    pub fn test(&self) -> &Arc<dyn Test> {
        &self.test
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_test::SimpleTest;

    fn point(module: &str, function: &str, mutator: MutatorKind) -> MutationPoint {
        MutationPoint::new(
            module,
            function,
            MutationPointAddress::new(2, 0, 5),
            mutator,
            "%add = add i32 %a, %b",
        )
    }

    #[test]
    fn derived_names_follow_the_address() {
        let p = point("lib/math.bc", "sum", MutatorKind::MathAdd);
        assert_eq!(p.unique_id(), "math_add_mutator:lib/math.bc:2_0_5");
        assert_eq!(
            p.mutated_function_name(),
            "_tamper_3sum_11lib/math.bc_math_add_mutator_2_0_5"
        );
        assert_eq!(p.trampoline_name(), "_sum_trampoline");
    }

    #[test]
    fn same_function_in_different_modules_gets_distinct_mutants() {
        let a = point("a.bc", "sum", MutatorKind::MathAdd);
        let b = point("b.bc", "sum", MutatorKind::MathAdd);
        assert_ne!(a.unique_id(), b.unique_id());
        assert_ne!(a.mutated_function_name(), b.mutated_function_name());
        assert_eq!(a.trampoline_name(), b.trampoline_name());
    }

    #[test]
    fn underscores_in_names_cannot_collide() {
        let a = point("x_y", "f", MutatorKind::MathAdd);
        let b = point("y", "f_x", MutatorKind::MathAdd);
        let c = point("x.y", "f", MutatorKind::MathAdd);
        assert_ne!(a.mutated_function_name(), b.mutated_function_name());
        assert_ne!(a.mutated_function_name(), c.mutated_function_name());
    }

    #[test]
    fn different_mutators_at_one_address_are_distinct() {
        let add = point("m.bc", "f", MutatorKind::MathAdd);
        let neg = point("m.bc", "f", MutatorKind::NegateCondition);
        assert_ne!(add.unique_id(), neg.unique_id());
        assert_ne!(add.mutated_function_name(), neg.mutated_function_name());
    }

    #[test]
    fn reachable_tests_keep_insertion_order() {
        let first: Arc<dyn Test> = Arc::new(SimpleTest::new("first", "test_first"));
        let second: Arc<dyn Test> = Arc::new(SimpleTest::new("second", "test_second"));
        let p = point("m.bc", "f", MutatorKind::ScalarValue)
            .with_reachable_test(first, 1)
            .with_reachable_test(second, 3)
            .with_source_location(SourceLocation {
                file: "m.c".to_string(),
                line: 4,
                column: 9,
            });

        let ids: Vec<(&str, u32)> = p
            .reachable_tests()
            .iter()
            .map(|r| (r.test.id(), r.distance))
            .collect();
        assert_eq!(ids, vec![("first", 1), ("second", 3)]);
        assert_eq!(
            p.source_location().map(ToString::to_string),
            Some("m.c:4:9".to_string())
        );
    }

    #[test]
    fn mutator_ids_are_unique() {
        let all = [
            MutatorKind::MathAdd,
            MutatorKind::MathSub,
            MutatorKind::MathMul,
            MutatorKind::MathDiv,
            MutatorKind::NegateCondition,
            MutatorKind::ConditionalsBoundary,
            MutatorKind::ReplaceAssignment,
            MutatorKind::ReplaceCall,
            MutatorKind::RemoveVoidCall,
            MutatorKind::AndOrReplacement,
            MutatorKind::ScalarValue,
        ];
        let ids: std::collections::HashSet<&str> = all.iter().map(|m| m.id()).collect();
        assert_eq!(ids.len(), all.len());
    }
}

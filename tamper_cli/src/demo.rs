//! A small built-in program to mutate: a handful of arithmetic functions,
//! their tests and one precompiled mutant per mutation point.
//!
//! Every function reports entry and exit through the
//! `tamper_enter_function` / `tamper_leave_function` runtime hooks, which
//! feed the dynamic call tree during discovery.

use anyhow::anyhow;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tamper_core::call_tree::{CallRecorder, DynamicCallTree, Testee, reachable_tests};
use tamper_core::toolchain::{
    Fault, HostSymbols, JitEngine, LoadedProgram, Mangler, ObjectFile, ObjectFiles,
};
use tamper_core::{
    MutationPoint, MutationPointAddress, MutatorKind, SimpleTest, SimpleTestRunner, SourceLocation,
    Test, TestRunner, TrampolineTable,
};
use tracing::debug;

const MODULE: &str = "arith.bc";
const SOURCE: &str = "arith.c";
const ENTER_FUNCTION: &str = "tamper_enter_function";
const LEAVE_FUNCTION: &str = "tamper_leave_function";
/// Deepest call distance at which a function still counts as reached.
const MAX_DISTANCE: u32 = 128;

/// Instrumented functions; function `FUNCTIONS[i]` has call tree index `i + 1`.
const FUNCTIONS: [&str; 9] = [
    "test_sum",
    "test_max",
    "test_count_down",
    "test_div",
    "sum",
    "max",
    "count_down",
    "decrement",
    "checked_div",
];

/// Functions reached through trampolines.
const TRAMPOLINED: [&str; 5] = ["sum", "max", "count_down", "decrement", "checked_div"];

fn index_of(function: &str) -> i64 {
    FUNCTIONS
        .iter()
        .position(|f| *f == function)
        .map_or(0, |i| i as i64 + 1)
}

fn trampoline(function: &str) -> String {
    tamper_core::trampoline::trampoline_name(function)
}

fn instrumented<F>(
    function: &'static str,
    body: F,
) -> impl Fn(&LoadedProgram, &[i64]) -> Result<i64, Fault> + Send + Sync + 'static
where
    F: Fn(&LoadedProgram, &[i64]) -> Result<i64, Fault> + Send + Sync + 'static,
{
    let index = index_of(function);
    move |program: &LoadedProgram, args: &[i64]| {
        program.call(ENTER_FUNCTION, &[index])?;
        let result = body(program, args);
        program.call(LEAVE_FUNCTION, &[index])?;
        result
    }
}

fn count_down(program: &LoadedProgram, start: i64, step: bool) -> Result<i64, Fault> {
    let mut n = start;
    let mut steps = 0;
    while n > 0 {
        if step {
            n = program.call(&trampoline("decrement"), &[n])?;
        }
        steps += 1;
    }
    Ok(steps)
}

fn program_object() -> ObjectFile {
    ObjectFile::new("arith.o")
        .define("sum", instrumented("sum", |_, a| Ok(a[0] + a[1])))
        .define(
            "max",
            instrumented("max", |_, a| Ok(if a[0] > a[1] { a[0] } else { a[1] })),
        )
        .define(
            "count_down",
            instrumented("count_down", |p, a| count_down(p, a[0], true)),
        )
        .define("decrement", instrumented("decrement", |_, a| Ok(a[0] - 1)))
        .define(
            "checked_div",
            instrumented("checked_div", |_, a| Ok(if a[1] == 0 { 0 } else { a[0] / a[1] })),
        )
        .reference(trampoline("decrement"))
        .reference(ENTER_FUNCTION)
        .reference(LEAVE_FUNCTION)
}

fn call(program: &LoadedProgram, function: &str, args: &[i64]) -> Result<i64, Fault> {
    program.call(&trampoline(function), args)
}

fn expect(checks: &[bool]) -> i64 {
    i64::from(!checks.iter().all(|ok| *ok))
}

fn tests_object() -> ObjectFile {
    let mut object = ObjectFile::new("arith_tests.o")
        .define(
            "test_sum",
            instrumented("test_sum", |p, _| {
                Ok(expect(&[call(p, "sum", &[2, 3])? == 5]))
            }),
        )
        .define(
            "test_max",
            instrumented("test_max", |p, _| {
                Ok(expect(&[
                    call(p, "max", &[3, 7])? == 7,
                    call(p, "max", &[4, 4])? == 4,
                ]))
            }),
        )
        .define(
            "test_count_down",
            instrumented("test_count_down", |p, _| {
                Ok(expect(&[call(p, "count_down", &[3])? == 3]))
            }),
        )
        .define(
            "test_div",
            instrumented("test_div", |p, _| {
                Ok(expect(&[
                    call(p, "checked_div", &[8, 2])? == 4,
                    call(p, "checked_div", &[1, 0])? == 0,
                ]))
            }),
        );
    for function in ["sum", "max", "count_down", "checked_div"] {
        object = object.reference(trampoline(function));
    }
    object.reference(ENTER_FUNCTION).reference(LEAVE_FUNCTION)
}

/// How long the spinning mutant runs before giving up on its own, so that
/// runs without process isolation still terminate.
const SPIN_LIMIT: Duration = Duration::from_millis(200);

struct MutantSpec {
    function: &'static str,
    address: MutationPointAddress,
    mutator: MutatorKind,
    original: &'static str,
    line: u32,
    column: u32,
}

fn mutant_specs() -> Vec<MutantSpec> {
    vec![
        MutantSpec {
            function: "sum",
            address: MutationPointAddress::new(0, 0, 2),
            mutator: MutatorKind::MathAdd,
            original: "%add = add nsw i64 %a, %b",
            line: 3,
            column: 14,
        },
        MutantSpec {
            function: "max",
            address: MutationPointAddress::new(1, 0, 1),
            mutator: MutatorKind::ConditionalsBoundary,
            original: "%cmp = icmp sgt i64 %a, %b",
            line: 7,
            column: 12,
        },
        MutantSpec {
            function: "max",
            address: MutationPointAddress::new(1, 0, 1),
            mutator: MutatorKind::NegateCondition,
            original: "%cmp = icmp sgt i64 %a, %b",
            line: 7,
            column: 12,
        },
        MutantSpec {
            function: "count_down",
            address: MutationPointAddress::new(2, 1, 0),
            mutator: MutatorKind::RemoveVoidCall,
            original: "%dec = call i64 @decrement(i64 %n)",
            line: 13,
            column: 9,
        },
        MutantSpec {
            function: "decrement",
            address: MutationPointAddress::new(3, 0, 0),
            mutator: MutatorKind::ScalarValue,
            original: "%sub = sub nsw i64 %n, 1",
            line: 19,
            column: 14,
        },
        MutantSpec {
            function: "checked_div",
            address: MutationPointAddress::new(4, 0, 1),
            mutator: MutatorKind::NegateCondition,
            original: "%iszero = icmp eq i64 %b, 0",
            line: 23,
            column: 9,
        },
    ]
}

fn mutants_object(points: &[MutationPoint]) -> ObjectFile {
    let mut object = ObjectFile::new("arith_mutants.o")
        .reference(trampoline("decrement"))
        .reference(ENTER_FUNCTION)
        .reference(LEAVE_FUNCTION);
    for point in points {
        let name = point.mutated_function_name();
        object = match (point.function(), point.mutator()) {
            ("sum", _) => object.define(name, instrumented("sum", |_, a| Ok(a[0] - a[1]))),
            ("max", MutatorKind::ConditionalsBoundary) => object.define(
                name,
                instrumented("max", |_, a| Ok(if a[0] >= a[1] { a[0] } else { a[1] })),
            ),
            ("max", _) => object.define(
                name,
                instrumented("max", |_, a| Ok(if a[0] <= a[1] { a[0] } else { a[1] })),
            ),
            ("count_down", _) => object.define(
                name,
                instrumented("count_down", |p, a| {
                    let start = Instant::now();
                    while start.elapsed() < SPIN_LIMIT {
                        std::hint::spin_loop();
                    }
                    count_down(p, a[0].min(0), false)
                }),
            ),
            ("decrement", _) => {
                object.define(name, instrumented("decrement", |_, a| Ok(a[0] - 2)))
            }
            // Divides by zero exactly when the original guards against it.
            _ => object.define(
                name,
                instrumented("checked_div", |_, a| {
                    Ok(if a[1] != 0 { 0 } else { a[0] / a[1] })
                }),
            ),
        };
    }
    object
}

/// The demo program with its tests and mutation points, before discovery has
/// attached reachable tests to the points.
pub struct DemoProgram {
    pub objects: ObjectFiles,
    pub tests: Vec<Arc<dyn Test>>,
    pub function_names: Vec<String>,
    points: Vec<MutationPoint>,
}

impl DemoProgram {
    pub fn build() -> Self {
        let points: Vec<MutationPoint> = mutant_specs()
            .into_iter()
            .map(|spec| {
                MutationPoint::new(MODULE, spec.function, spec.address, spec.mutator, spec.original)
                    .with_source_location(SourceLocation {
                        file: SOURCE.to_string(),
                        line: spec.line,
                        column: spec.column,
                    })
            })
            .collect();

        let objects: ObjectFiles =
            vec![program_object(), tests_object(), mutants_object(&points)].into();
        let tests: Vec<Arc<dyn Test>> = FUNCTIONS
            .iter()
            .filter_map(|f| f.strip_prefix("test_").map(|name| (name, *f)))
            .map(|(name, entry)| Arc::new(SimpleTest::new(name, entry)) as Arc<dyn Test>)
            .collect();

        Self {
            objects,
            tests,
            function_names: TRAMPOLINED.iter().map(|f| f.to_string()).collect(),
            points,
        }
    }

    /// Runner used for the sandboxed runs; the instrumentation hooks do nothing.
    pub fn runner() -> SimpleTestRunner {
        let hooks = HostSymbols::new()
            .with(ENTER_FUNCTION, |_, _| Ok(0))
            .with(LEAVE_FUNCTION, |_, _| Ok(0));
        SimpleTestRunner::new(hooks, HostSymbols::new()).with_mangler(Mangler::new(None))
    }

    /// Runs each test in-process with call recording on and collects the
    /// functions it reaches.
    pub fn discover_testees(&self, tests: &[Arc<dyn Test>]) -> anyhow::Result<Vec<Testee>> {
        let recorder = Arc::new(Mutex::new(CallRecorder::new(FUNCTIONS.len())));
        let enter = Arc::clone(&recorder);
        let leave = Arc::clone(&recorder);
        let hooks = HostSymbols::new()
            .with(ENTER_FUNCTION, move |_, args| {
                let mut recorder = enter
                    .lock()
                    .map_err(|_| Fault::Abort("call recorder poisoned".to_string()))?;
                recorder.enter_function(u32::try_from(args[0]).unwrap_or(0));
                Ok(0)
            })
            .with(LEAVE_FUNCTION, move |_, args| {
                let mut recorder = leave
                    .lock()
                    .map_err(|_| Fault::Abort("call recorder poisoned".to_string()))?;
                recorder.leave_function(u32::try_from(args[0]).unwrap_or(0));
                Ok(0)
            });
        let runner =
            SimpleTestRunner::new(hooks, HostSymbols::new()).with_mangler(Mangler::new(None));

        let trampolines = TrampolineTable::new(&self.function_names, runner.mangler());
        let mut jit = JitEngine::new();
        runner.load_program(&self.objects, &trampolines, &mut jit)?;
        trampolines.fixup_original_functions(&jit)?;

        let functions: Vec<String> = FUNCTIONS.iter().map(|f| f.to_string()).collect();
        let mut testees = Vec::new();
        for test in tests {
            recorder
                .lock()
                .map_err(|_| anyhow!("call recorder poisoned"))?
                .reset();
            runner.run_test(test.as_ref(), &jit);
            let mapping = recorder
                .lock()
                .map_err(|_| anyhow!("call recorder poisoned"))?
                .mapping()
                .to_vec();

            let tree = DynamicCallTree::build(&mapping, &functions);
            let subtrees = tree.test_subtrees(&[test.entry_point()]);
            let found = tree.testees(&subtrees, test, MAX_DISTANCE, |_| false);
            debug!(test = %test.id(), testees = found.len(), "Discovered testees");
            testees.extend(found);
        }
        Ok(testees)
    }

    /// Mutation points with the tests that reach them attached.
    pub fn mutation_points(&self, testees: &[Testee]) -> Vec<Arc<MutationPoint>> {
        self.points
            .iter()
            .map(|point| {
                let reachable = reachable_tests(point.function(), testees);
                Arc::new(point.clone().with_reachable_tests(reachable))
            })
            .collect()
    }
}

use crate::execution::ExecutionStatus;
use crate::toolchain::{
    HostSymbols, JitEngine, LinkError, Mangler, NativeResolver, ObjectFile, TrampolineResolver,
};
use crate::trampoline::TrampolineTable;
use crate::unit_test::Test;
use std::sync::Arc;
use tracing::debug;

/// Loads programs and runs tests for one test framework.
pub trait TestRunner: Send + Sync {
    /// Links `objects` into `jit`, binding trampoline references to the slots
    /// of `trampolines`. The slots are left untouched; fixing them up to the
    /// original functions is the caller's job.
    fn load_program(
        &self,
        objects: &[ObjectFile],
        trampolines: &Arc<TrampolineTable>,
        jit: &mut JitEngine,
    ) -> Result<(), LinkError>;

    /// Runs `test` against the image currently loaded in `jit`.
    fn run_test(&self, test: &dyn Test, jit: &JitEngine) -> ExecutionStatus;

    fn mangler(&self) -> &Mangler;
}

/// Runner for [`crate::unit_test::SimpleTest`]-style tests. References not
/// satisfied by the objects go to the runtime overrides, then to the host.
#[derive(Debug, Clone)]
pub struct SimpleTestRunner {
    overrides: Arc<HostSymbols>,
    process: Arc<HostSymbols>,
    mangler: Mangler,
}

impl Default for SimpleTestRunner {
    fn default() -> Self {
        Self::new(HostSymbols::new(), HostSymbols::new())
    }
}

impl SimpleTestRunner {
    pub fn new(overrides: HostSymbols, process: HostSymbols) -> Self {
        Self {
            overrides: Arc::new(overrides),
            process: Arc::new(process),
            mangler: Mangler::host(),
        }
    }

    pub fn with_mangler(mut self, mangler: Mangler) -> Self {
        self.mangler = mangler;
        self
    }
}

impl TestRunner for SimpleTestRunner {
    fn load_program(
        &self,
        objects: &[ObjectFile],
        trampolines: &Arc<TrampolineTable>,
        jit: &mut JitEngine,
    ) -> Result<(), LinkError> {
        let native = NativeResolver::new(Arc::clone(&self.overrides), Arc::clone(&self.process));
        let resolver = TrampolineResolver::new(trampolines, &native);
        let program = jit.add_object_files(objects, &resolver)?;
        if !program.unresolved_symbols().is_empty() {
            debug!(
                unresolved = ?program.unresolved_symbols(),
                "Program loaded with unresolved references"
            );
        }
        Ok(())
    }

    fn run_test(&self, test: &dyn Test, jit: &JitEngine) -> ExecutionStatus {
        match jit.program() {
            Some(program) => test.run(program),
            None => ExecutionStatus::Invalid,
        }
    }

    fn mangler(&self) -> &Mangler {
        &self.mangler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_test::SimpleTest;

    fn runner() -> SimpleTestRunner {
        SimpleTestRunner::new(
            HostSymbols::new().with("abs", |_, args| Ok(args[0].abs())),
            HostSymbols::new()
                .with("abs", |_, _| Ok(-1))
                .with("exit_code", |_, _| Ok(0)),
        )
        .with_mangler(Mangler::new(None))
    }

    fn objects() -> Vec<ObjectFile> {
        vec![
            ObjectFile::new("lib.o")
                .define("distance", |program, args| {
                    program.call("abs", &[args[0] - args[1]])
                })
                .reference("abs"),
            ObjectFile::new("tests.o")
                .define("test_distance", |program, _| {
                    let d = program.call("_distance_trampoline", &[2, 7])?;
                    let code = program.call("exit_code", &[])?;
                    Ok(if d == 5 { code } else { 1 })
                })
                .reference("_distance_trampoline")
                .reference("exit_code"),
        ]
    }

    #[test]
    fn running_without_a_program_is_invalid() {
        let jit = JitEngine::new();
        let test = SimpleTest::new("t", "test_distance");
        assert_eq!(runner().run_test(&test, &jit), ExecutionStatus::Invalid);
    }

    #[test]
    fn overrides_win_over_host_symbols() {
        let runner = runner();
        let table = TrampolineTable::new(&["distance".to_string()], runner.mangler());
        let mut jit = JitEngine::new();
        runner
            .load_program(&objects(), &table, &mut jit)
            .expect("program links");
        table
            .fixup_original_functions(&jit)
            .expect("originals resolve");

        let test = SimpleTest::new("distance", "test_distance");
        assert_eq!(runner.run_test(&test, &jit), ExecutionStatus::Passed);
    }

    #[test]
    fn unfixed_trampolines_crash_the_test() {
        let runner = runner();
        let table = TrampolineTable::new(&["distance".to_string()], runner.mangler());
        let mut jit = JitEngine::new();
        runner
            .load_program(&objects(), &table, &mut jit)
            .expect("program links");

        let test = SimpleTest::new("distance", "test_distance");
        assert_eq!(runner.run_test(&test, &jit), ExecutionStatus::Crashed);
    }

    #[test]
    fn duplicate_definitions_fail_the_load() {
        let runner = runner();
        let table = TrampolineTable::new(&[], runner.mangler());
        let mut jit = JitEngine::new();
        let mut objects = objects();
        objects.push(ObjectFile::new("again.o").define("distance", |_, _| Ok(0)));

        let err = runner
            .load_program(&objects, &table, &mut jit)
            .expect_err("duplicate symbol");
        assert!(matches!(err, LinkError::DuplicateSymbol { ref symbol, .. } if symbol == "distance"));
    }
}

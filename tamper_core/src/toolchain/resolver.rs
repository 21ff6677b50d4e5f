use crate::toolchain::jit::LoadedProgram;
use crate::toolchain::object::{Fault, NativeFunction};
use crate::trampoline::{SlotRef, TrampolineTable};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a resolver hands back for a reference no object defines.
pub enum ResolvedSymbol {
    Function(NativeFunction),
    Trampoline(SlotRef),
}

/// Policy deciding which symbols outside the provided objects may satisfy a
/// link. Returning `None` leaves the reference unresolved.
pub trait SymbolResolver {
    fn find_symbol(&self, name: &str) -> Option<ResolvedSymbol>;
}

/// Functions living outside the loaded objects, keyed by mangled name.
#[derive(Clone, Default)]
pub struct HostSymbols {
    functions: HashMap<String, NativeFunction>,
}

impl HostSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&LoadedProgram, &[i64]) -> Result<i64, Fault> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(body));
        self
    }

    pub fn get(&self, name: &str) -> Option<NativeFunction> {
        self.functions.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for HostSymbols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("HostSymbols").field("functions", &names).finish()
    }
}

/// Only the provided objects may satisfy a link.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalResolver;

impl SymbolResolver for LocalResolver {
    fn find_symbol(&self, _name: &str) -> Option<ResolvedSymbol> {
        None
    }
}

/// Resolves against runtime-support overrides first, then against symbols
/// exported by the host process.
#[derive(Debug, Clone)]
pub struct NativeResolver {
    overrides: Arc<HostSymbols>,
    process: Arc<HostSymbols>,
}

impl NativeResolver {
    pub fn new(overrides: Arc<HostSymbols>, process: Arc<HostSymbols>) -> Self {
        Self { overrides, process }
    }
}

impl SymbolResolver for NativeResolver {
    fn find_symbol(&self, name: &str) -> Option<ResolvedSymbol> {
        // Overrides go first, otherwise the host's own runtime takes over.
        self.overrides
            .get(name)
            .or_else(|| self.process.get(name))
            .map(ResolvedSymbol::Function)
    }
}

/// Resolves trampoline names to the slots of a [`TrampolineTable`] and
/// delegates everything else.
pub struct TrampolineResolver<'a> {
    trampolines: &'a Arc<TrampolineTable>,
    fallback: &'a dyn SymbolResolver,
}

impl<'a> TrampolineResolver<'a> {
    pub fn new(trampolines: &'a Arc<TrampolineTable>, fallback: &'a dyn SymbolResolver) -> Self {
        Self {
            trampolines,
            fallback,
        }
    }
}

impl SymbolResolver for TrampolineResolver<'_> {
    fn find_symbol(&self, name: &str) -> Option<ResolvedSymbol> {
        match TrampolineTable::slot_ref(self.trampolines, name) {
            Some(slot) => Some(ResolvedSymbol::Trampoline(slot)),
            None => self.fallback.find_symbol(name),
        }
    }
}

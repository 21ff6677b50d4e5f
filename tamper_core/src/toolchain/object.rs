use crate::toolchain::jit::LoadedProgram;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A fault raised by code running inside a loaded program.
///
/// This is the simulated counterpart of a native crash: calling through an
/// unresolved symbol or an empty trampoline, jumping to a bogus address, or
/// an explicit abort.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("call to unresolved symbol `{0}`")]
    UnresolvedSymbol(String),
    #[error("trampoline `{0}` has no target")]
    EmptyTrampoline(String),
    #[error("invalid call target {0:#x}")]
    InvalidAddress(u64),
    #[error("abort: {0}")]
    Abort(String),
}

/// Machine code of a single function. Receives the program it was linked
/// into so that it can call other symbols, including trampolines.
pub type NativeFunction = Arc<dyn Fn(&LoadedProgram, &[i64]) -> Result<i64, Fault> + Send + Sync>;

/// Read-only compiled code shared between all tasks of a run.
pub type ObjectFiles = Arc<[ObjectFile]>;

#[derive(Clone)]
pub struct FunctionDefinition {
    pub symbol: String,
    pub body: NativeFunction,
}

impl fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("symbol", &self.symbol)
            .finish_non_exhaustive()
    }
}

/// A linkable unit: the functions it defines plus the symbols it references
/// but does not define. Symbol names are expected to be mangled already.
#[derive(Debug, Clone, Default)]
pub struct ObjectFile {
    name: String,
    definitions: Vec<FunctionDefinition>,
    references: Vec<String>,
}

impl ObjectFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definitions: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn define<F>(mut self, symbol: impl Into<String>, body: F) -> Self
    where
        F: Fn(&LoadedProgram, &[i64]) -> Result<i64, Fault> + Send + Sync + 'static,
    {
        self.definitions.push(FunctionDefinition {
            symbol: symbol.into(),
            body: Arc::new(body),
        });
        self
    }

    /// Records an undefined reference that the loader has to resolve.
    pub fn reference(mut self, symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        if !self.references.contains(&symbol) {
            self.references.push(symbol);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definitions(&self) -> &[FunctionDefinition] {
        &self.definitions
    }

    pub fn undefined_symbols(&self) -> &[String] {
        &self.references
    }

    pub fn defines(&self, symbol: &str) -> bool {
        self.definitions.iter().any(|d| d.symbol == symbol)
    }
}

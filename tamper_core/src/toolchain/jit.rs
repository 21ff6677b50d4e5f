use crate::toolchain::object::{Fault, NativeFunction, ObjectFile};
use crate::toolchain::resolver::{ResolvedSymbol, SymbolResolver};
use crate::trampoline::SlotRef;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use thiserror::Error;
use tracing::debug;

/// First address handed out by the loader. Addresses below it are never valid.
const IMAGE_BASE: u64 = 0x1000;
/// Distance between two consecutive function entry points.
const FUNCTION_ALIGNMENT: u64 = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("symbol `{symbol}` is defined by both `{first}` and `{second}`")]
    DuplicateSymbol {
        symbol: String,
        first: String,
        second: String,
    },
}

/// Entry point of a function inside a loaded image. Never zero, so a zeroed
/// trampoline slot is always distinguishable from a valid target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(NonZeroU64);

impl Address {
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Address)
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }

    fn for_index(index: usize) -> Self {
        let raw = IMAGE_BASE + index as u64 * FUNCTION_ALIGNMENT;
        // IMAGE_BASE is non-zero, so is every address derived from it.
        Address(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    fn index(self) -> Option<usize> {
        let offset = self.raw().checked_sub(IMAGE_BASE)?;
        if offset % FUNCTION_ALIGNMENT != 0 {
            return None;
        }
        usize::try_from(offset / FUNCTION_ALIGNMENT).ok()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.raw())
    }
}

/// What a name in the symbol table of a loaded image refers to.
#[derive(Debug, Clone)]
pub enum Symbol {
    Function(Address),
    /// An indirection slot; calls through it go to whatever the slot holds.
    Trampoline(SlotRef),
}

/// An executable in-memory image produced by [`JitEngine::add_object_files`].
pub struct LoadedProgram {
    functions: Vec<NativeFunction>,
    symbols: HashMap<String, Symbol>,
    unresolved: Vec<String>,
}

impl LoadedProgram {
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn function_address(&self, name: &str) -> Option<Address> {
        match self.symbols.get(name)? {
            Symbol::Function(address) => Some(*address),
            Symbol::Trampoline(_) => None,
        }
    }

    /// References that no object and no resolver could satisfy.
    pub fn unresolved_symbols(&self) -> &[String] {
        &self.unresolved
    }

    /// Calls `name`. Calls through a trampoline symbol are indirect and land
    /// on the address the slot currently holds.
    pub fn call(&self, name: &str, args: &[i64]) -> Result<i64, Fault> {
        match self.symbols.get(name) {
            Some(Symbol::Function(address)) => self.call_address(*address, args),
            Some(Symbol::Trampoline(slot)) => {
                let target = slot
                    .target()
                    .ok_or_else(|| Fault::EmptyTrampoline(name.to_string()))?;
                self.call_address(target, args)
            }
            None => Err(Fault::UnresolvedSymbol(name.to_string())),
        }
    }

    pub fn call_address(&self, address: Address, args: &[i64]) -> Result<i64, Fault> {
        let function = address
            .index()
            .and_then(|index| self.functions.get(index))
            .ok_or(Fault::InvalidAddress(address.raw()))?;
        function(self, args)
    }

    fn push_function(&mut self, body: NativeFunction) -> Address {
        let address = Address::for_index(self.functions.len());
        self.functions.push(body);
        address
    }
}

impl fmt::Debug for LoadedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedProgram")
            .field("functions", &self.functions.len())
            .field("symbols", &self.symbols.len())
            .field("unresolved", &self.unresolved)
            .finish()
    }
}

/// Links object files into a [`LoadedProgram`] and answers symbol queries.
///
/// Every task owns its own engine; images are never shared between tasks.
#[derive(Debug, Default)]
pub struct JitEngine {
    program: Option<LoadedProgram>,
}

impl JitEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links `objects` into a fresh image, replacing any previously loaded one.
    ///
    /// References not defined by any object are looked up through `resolver`.
    /// A reference the resolver cannot satisfy does not fail the link: it is
    /// left out of the symbol table and reported by
    /// [`LoadedProgram::unresolved_symbols`].
    pub fn add_object_files(
        &mut self,
        objects: &[ObjectFile],
        resolver: &dyn SymbolResolver,
    ) -> Result<&LoadedProgram, LinkError> {
        self.program = None;

        let mut program = LoadedProgram {
            functions: Vec::new(),
            symbols: HashMap::new(),
            unresolved: Vec::new(),
        };
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for object in objects {
            for definition in object.definitions() {
                if let Some(first) = owners.insert(&definition.symbol, object.name()) {
                    return Err(LinkError::DuplicateSymbol {
                        symbol: definition.symbol.clone(),
                        first: first.to_string(),
                        second: object.name().to_string(),
                    });
                }
                let address = program.push_function(definition.body.clone());
                program
                    .symbols
                    .insert(definition.symbol.clone(), Symbol::Function(address));
            }
        }

        for object in objects {
            for reference in object.undefined_symbols() {
                if program.symbols.contains_key(reference)
                    || program.unresolved.contains(reference)
                {
                    continue;
                }
                match resolver.find_symbol(reference) {
                    Some(ResolvedSymbol::Function(body)) => {
                        let address = program.push_function(body);
                        program
                            .symbols
                            .insert(reference.clone(), Symbol::Function(address));
                    }
                    Some(ResolvedSymbol::Trampoline(slot)) => {
                        program
                            .symbols
                            .insert(reference.clone(), Symbol::Trampoline(slot));
                    }
                    None => program.unresolved.push(reference.clone()),
                }
            }
        }

        debug!(
            objects = objects.len(),
            functions = program.functions.len(),
            unresolved = program.unresolved.len(),
            "Linked program image"
        );

        Ok(self.program.insert(program))
    }

    /// Address of a function symbol in the current image, `None` when nothing
    /// is loaded or the name is unknown.
    pub fn get_symbol(&self, name: &str) -> Option<Address> {
        self.program.as_ref()?.function_address(name)
    }

    pub fn program(&self) -> Option<&LoadedProgram> {
        self.program.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::resolver::{HostSymbols, LocalResolver, NativeResolver};
    use std::sync::Arc;

    fn math_object() -> ObjectFile {
        ObjectFile::new("math.o")
            .define("add", |_, args| Ok(args[0] + args[1]))
            .define("twice_add", |program, args| {
                let once = program.call("add", args)?;
                Ok(once * 2)
            })
    }

    #[test]
    fn defined_functions_get_distinct_aligned_addresses() {
        let mut jit = JitEngine::new();
        jit.add_object_files(&[math_object()], &LocalResolver)
            .expect("link math object");

        let add = jit.get_symbol("add").expect("add is defined");
        let twice = jit.get_symbol("twice_add").expect("twice_add is defined");
        assert_ne!(add, twice);
        assert_eq!(add.raw() % FUNCTION_ALIGNMENT, 0);
        assert!(add.raw() >= IMAGE_BASE);
    }

    #[test]
    fn calls_resolve_between_functions_of_the_image() {
        let mut jit = JitEngine::new();
        let program = jit
            .add_object_files(&[math_object()], &LocalResolver)
            .expect("link math object");
        assert_eq!(program.call("twice_add", &[2, 3]), Ok(10));
        assert!(matches!(program.symbol("add"), Some(Symbol::Function(_))));
        assert!(program.symbol("sub").is_none());
    }

    #[test]
    fn unresolved_references_are_reported_not_fatal() {
        let object = ObjectFile::new("io.o")
            .define("log_twice", |program, args| program.call("puts", args))
            .reference("puts");
        let mut jit = JitEngine::new();
        let program = jit
            .add_object_files(&[object], &LocalResolver)
            .expect("unresolved references do not fail the link");

        assert_eq!(program.unresolved_symbols(), ["puts".to_string()]);
        assert!(jit.get_symbol("puts").is_none());
        assert_eq!(
            jit.program().map(|p| p.call("log_twice", &[1])),
            Some(Err(Fault::UnresolvedSymbol("puts".to_string())))
        );
    }

    #[test]
    fn resolver_supplies_host_functions() {
        let object = ObjectFile::new("io.o")
            .define("answer", |program, _| program.call("host_answer", &[]))
            .reference("host_answer");
        let process = HostSymbols::new().with("host_answer", |_, _| Ok(42));
        let overrides = HostSymbols::new();
        let resolver = NativeResolver::new(Arc::new(overrides), Arc::new(process));

        let mut jit = JitEngine::new();
        let program = jit
            .add_object_files(&[object], &resolver)
            .expect("link with host symbols");
        assert_eq!(program.call("answer", &[]), Ok(42));
        assert!(program.unresolved_symbols().is_empty());
    }

    #[test]
    fn duplicate_definitions_fail_the_link() {
        let first = ObjectFile::new("a.o").define("f", |_, _| Ok(1));
        let second = ObjectFile::new("b.o").define("f", |_, _| Ok(2));
        let mut jit = JitEngine::new();

        let err = jit
            .add_object_files(&[first, second], &LocalResolver)
            .expect_err("duplicate symbol must be rejected");
        assert_eq!(
            err,
            LinkError::DuplicateSymbol {
                symbol: "f".to_string(),
                first: "a.o".to_string(),
                second: "b.o".to_string(),
            }
        );
        assert!(jit.program().is_none());
    }

    #[test]
    fn loading_replaces_the_previous_image() {
        let mut jit = JitEngine::new();
        jit.add_object_files(&[math_object()], &LocalResolver)
            .expect("first link");
        let other = ObjectFile::new("other.o").define("other", |_, _| Ok(0));
        jit.add_object_files(&[other], &LocalResolver)
            .expect("second link");

        assert!(jit.get_symbol("add").is_none());
        assert!(jit.get_symbol("other").is_some());
    }

    #[test]
    fn invalid_addresses_fault_instead_of_calling() {
        let mut jit = JitEngine::new();
        let program = jit
            .add_object_files(&[math_object()], &LocalResolver)
            .expect("link math object");
        let bogus = Address::from_raw(IMAGE_BASE + 3).expect("non-zero");
        assert_eq!(
            program.call_address(bogus, &[]),
            Err(Fault::InvalidAddress(IMAGE_BASE + 3))
        );
        let past_end = Address::from_raw(IMAGE_BASE + 100 * FUNCTION_ALIGNMENT).expect("non-zero");
        assert!(program.call_address(past_end, &[]).is_err());
    }
}

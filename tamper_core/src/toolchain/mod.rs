//! Linking compiled objects into an executable image and resolving symbols.

pub mod jit;
pub mod mangler;
pub mod object;
pub mod resolver;

pub use jit::{Address, JitEngine, LinkError, LoadedProgram, Symbol};
pub use mangler::Mangler;
pub use object::{Fault, FunctionDefinition, NativeFunction, ObjectFile, ObjectFiles};
pub use resolver::{
    HostSymbols, LocalResolver, NativeResolver, ResolvedSymbol, SymbolResolver,
    TrampolineResolver,
};

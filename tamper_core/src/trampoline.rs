//! Indirection slots through which rewritten call sites reach either the
//! original implementation of a function or one of its mutants.
//!
//! Slots are plain machine words. Loads and stores are relaxed: the table
//! relies on its owning task to be the only writer, and on the task never
//! activating more than one mutant at a time.

use crate::toolchain::{Address, JitEngine, Mangler};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrampolineError {
    #[error("trampoline `{0}` was never registered")]
    Unregistered(String),
    #[error("original function `{function}` of trampoline `{trampoline}` is not in the loaded program")]
    UnresolvedOriginal { function: String, trampoline: String },
}

/// Unmangled name of the slot that dispatches calls to `function`.
pub fn trampoline_name(function: &str) -> String {
    format!("_{function}_trampoline")
}

struct TrampolineEntry {
    trampoline: String,
    original: String,
    slot: AtomicU64,
    /// Address written by the fixup, zero until then.
    fixup: AtomicU64,
}

/// One slot per original function that participates in any mutation.
pub struct TrampolineTable {
    entries: Vec<TrampolineEntry>,
    index: HashMap<String, usize>,
}

impl TrampolineTable {
    /// Registers a slot for every distinct name in `function_names`. Both the
    /// trampoline names and the original symbols are mangled with `mangler`.
    pub fn new(function_names: &[String], mangler: &Mangler) -> Arc<Self> {
        let mut entries = Vec::with_capacity(function_names.len());
        let mut index = HashMap::with_capacity(function_names.len());

        for function in function_names {
            let trampoline = mangler.name_with_prefix(&trampoline_name(function));
            if index.contains_key(&trampoline) {
                continue;
            }
            index.insert(trampoline.clone(), entries.len());
            entries.push(TrampolineEntry {
                trampoline,
                original: mangler.name_with_prefix(function),
                slot: AtomicU64::new(0),
                fixup: AtomicU64::new(0),
            });
        }

        Arc::new(Self { entries, index })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn trampoline_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.trampoline.as_str())
    }

    /// Points every slot at the original function in the loaded image and
    /// remembers that address as the value to restore to.
    pub fn fixup_original_functions(&self, jit: &JitEngine) -> Result<(), TrampolineError> {
        for entry in &self.entries {
            let address = jit.get_symbol(&entry.original).ok_or_else(|| {
                TrampolineError::UnresolvedOriginal {
                    function: entry.original.clone(),
                    trampoline: entry.trampoline.clone(),
                }
            })?;
            entry.fixup.store(address.raw(), Ordering::Relaxed);
            entry.slot.store(address.raw(), Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn find_trampoline(&self, name: &str) -> Result<Trampoline<'_>, TrampolineError> {
        self.index
            .get(name)
            .map(|&i| Trampoline {
                entry: &self.entries[i],
            })
            .ok_or_else(|| TrampolineError::Unregistered(name.to_string()))
    }

    /// Owned handle to a slot, used by the loader to bind references.
    pub fn slot_ref(table: &Arc<Self>, name: &str) -> Option<SlotRef> {
        table.index.get(name).map(|&index| SlotRef {
            table: Arc::clone(table),
            index,
        })
    }
}

impl fmt::Debug for TrampolineTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| {
                (
                    &entry.trampoline,
                    &entry.original,
                    entry.slot.load(Ordering::Relaxed),
                )
            }))
            .finish()
    }
}

/// Borrowed view of a single slot.
#[derive(Clone, Copy)]
pub struct Trampoline<'a> {
    entry: &'a TrampolineEntry,
}

impl<'a> Trampoline<'a> {
    pub fn name(&self) -> &'a str {
        &self.entry.trampoline
    }

    pub fn target(&self) -> Option<Address> {
        Address::from_raw(self.entry.slot.load(Ordering::Relaxed))
    }

    pub fn set_target(&self, address: Address) {
        self.entry.slot.store(address.raw(), Ordering::Relaxed);
    }

    /// True when the slot holds the address written by the fixup.
    pub fn holds_original(&self) -> bool {
        let fixup = self.entry.fixup.load(Ordering::Relaxed);
        fixup != 0 && self.entry.slot.load(Ordering::Relaxed) == fixup
    }

    /// Redirects the slot to `mutant` until the returned guard is dropped.
    pub fn activate(&self, mutant: Address) -> Activation<'a> {
        let previous = self.entry.slot.swap(mutant.raw(), Ordering::Relaxed);
        Activation {
            entry: self.entry,
            previous,
        }
    }
}

/// Restores a slot to the value it held before activation, on every exit
/// path including unwinding.
pub struct Activation<'a> {
    entry: &'a TrampolineEntry,
    previous: u64,
}

impl Activation<'_> {
    pub fn previous_target(&self) -> Option<Address> {
        Address::from_raw(self.previous)
    }
}

impl Drop for Activation<'_> {
    fn drop(&mut self) {
        self.entry.slot.store(self.previous, Ordering::Relaxed);
    }
}

/// Slot handle owned by a loaded image.
#[derive(Clone)]
pub struct SlotRef {
    table: Arc<TrampolineTable>,
    index: usize,
}

impl SlotRef {
    pub fn name(&self) -> &str {
        &self.table.entries[self.index].trampoline
    }

    pub fn target(&self) -> Option<Address> {
        Address::from_raw(self.table.entries[self.index].slot.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRef")
            .field("name", &self.name())
            .field("target", &self.target())
            .finish()
    }
}

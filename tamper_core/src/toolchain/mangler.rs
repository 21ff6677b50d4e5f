/// Marks a name that must be emitted verbatim, without the global prefix.
const VERBATIM_MARKER: char = '\u{1}';

/// Turns IR-level names into the symbol names found in object files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mangler {
    global_prefix: Option<char>,
}

impl Mangler {
    pub fn new(global_prefix: Option<char>) -> Self {
        Self { global_prefix }
    }

    /// Mangler matching the object format of the host: Mach-O prefixes every
    /// global with `_`, ELF and COFF (x86_64) do not.
    pub fn host() -> Self {
        if cfg!(target_vendor = "apple") {
            Self::new(Some('_'))
        } else {
            Self::new(None)
        }
    }

    pub fn name_with_prefix(&self, name: &str) -> String {
        if let Some(verbatim) = name.strip_prefix(VERBATIM_MARKER) {
            return verbatim.to_string();
        }
        match self.global_prefix {
            Some(prefix) => {
                let mut mangled = String::with_capacity(name.len() + 1);
                mangled.push(prefix);
                mangled.push_str(name);
                mangled
            }
            None => name.to_string(),
        }
    }
}

impl Default for Mangler {
    fn default() -> Self {
        Self::host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_prepended() {
        let mangler = Mangler::new(Some('_'));
        assert_eq!(mangler.name_with_prefix("main"), "_main");
        assert_eq!(mangler.name_with_prefix("_ZN3foo3barEv"), "__ZN3foo3barEv");
    }

    #[test]
    fn no_prefix_keeps_name() {
        let mangler = Mangler::new(None);
        assert_eq!(mangler.name_with_prefix("main"), "main");
    }

    #[test]
    fn verbatim_marker_is_stripped_and_prefix_skipped() {
        let mangler = Mangler::new(Some('_'));
        assert_eq!(mangler.name_with_prefix("\u{1}exact"), "exact");
    }
}

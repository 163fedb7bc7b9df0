//! Name interning for identifiers that flow through bytecode.
//!
//! Class, function, variable, and member names are interned once at load
//! time and referenced by [`StringId`] afterwards, so bytecode operands and
//! lookup tables compare ids instead of cloning strings. Identifier lookup
//! in this language is case-insensitive, so names are folded to ASCII
//! lowercase before interning; string *literals* keep their exact bytes and
//! live in the per-function constant pool, not here.

use ahash::AHashMap;

/// Index into the interner's storage.
///
/// `u32` keeps bytecode operands and table keys small; four billion unique
/// names is far beyond any loadable program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    /// Reconstructs a `StringId` from a bytecode operand.
    ///
    /// The caller is responsible for ensuring the index is valid for the
    /// interner the bytecode was compiled against.
    #[inline]
    #[must_use]
    pub fn from_index(index: u16) -> Self {
        Self(u32::from(index))
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the operand form, panicking if the table outgrew u16.
    #[inline]
    #[must_use]
    pub fn operand(self) -> u16 {
        u16::try_from(self.0).expect("intern table exceeds u16 operand space")
    }
}

/// Interner mapping case-folded identifier names to [`StringId`]s.
///
/// Populated during parsing and compilation; the world owns it afterwards
/// and the VM only reads it (error messages, dynamic-name building).
#[derive(Debug, Default)]
pub struct Interns {
    strings: Vec<Box<str>>,
    lookup: AHashMap<Box<str>, StringId>,
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns an identifier, folding it to ASCII lowercase first.
    pub fn name(&mut self, name: &str) -> StringId {
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.exact(&name.to_ascii_lowercase())
        } else {
            self.exact(name)
        }
    }

    /// Interns a string exactly as given.
    pub fn exact(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("intern table overflow"));
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, id);
        id
    }

    /// Looks up an already-interned identifier without inserting.
    #[must_use]
    pub fn get_name(&self, name: &str) -> Option<StringId> {
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.lookup.get(name.to_ascii_lowercase().as_str()).copied()
        } else {
            self.lookup.get(name).copied()
        }
    }

    /// Returns the interned text for an id.
    ///
    /// # Panics
    /// Panics if the id did not come from this interner.
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Number of interned entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_fold_case() {
        let mut interns = Interns::new();
        let a = interns.name("Inicializar");
        let b = interns.name("INICIALIZAR");
        let c = interns.name("inicializar");
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(interns.get(a), "inicializar");
    }

    #[test]
    fn exact_preserves_case() {
        let mut interns = Interns::new();
        let a = interns.exact("Olá");
        let b = interns.exact("olá");
        assert_ne!(a, b);
        assert_eq!(interns.get(a), "Olá");
    }

    #[test]
    fn lookup_without_insert() {
        let mut interns = Interns::new();
        assert_eq!(interns.get_name("aotick"), None);
        let id = interns.name("aotick");
        assert_eq!(interns.get_name("AoTick"), Some(id));
    }
}

use rustc_hash::FxHashMap;

/// Deduplicates identifier strings and hands out compact ids.
///
/// Class, function and field names repeat heavily across a module; interning
/// keeps the IR nodes at a fixed size and makes name comparison an integer
/// comparison.
#[derive(Debug, Default)]
pub struct StringInterner {
    ids: FxHashMap<String, StringId>,
    strings: Vec<String>,
}

/// Id of an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning the existing id if it was seen before.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.ids.insert(s.to_string(), id);
        id
    }

    /// Resolve an id back to its string. Panics on an id from another interner.
    pub fn resolve(&self, id: StringId) -> &str {
        &self.strings[id.0 as usize]
    }

    pub fn try_resolve(&self, id: StringId) -> Option<&str> {
        self.strings.get(id.0 as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl StringId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let mut interner = StringInterner::new();
        let a = interner.intern("makeSound");
        let b = interner.intern("speak");
        let c = interner.intern("makeSound");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
        assert_eq!(interner.resolve(a), "makeSound");
    }

    #[test]
    fn test_try_resolve_unknown_id() {
        let mut interner = StringInterner::new();
        let id = interner.intern("x");
        assert_eq!(interner.try_resolve(id), Some("x"));

        let other = StringInterner::new();
        assert_eq!(other.try_resolve(id), None);
    }
}

//! Session-wide citation numbering for export.

use std::collections::HashMap;

use serde::Serialize;

use docent_core::Chunk;

/// Stable reference numbers, assigned in first-use order across a session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceRegistry {
    ids: HashMap<String, usize>,
    references: Vec<Chunk>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register cited chunks in order. Already-registered chunks keep their
    /// number. Returns the number of every cited chunk, in input order.
    pub fn register(&mut self, cited: &[Chunk]) -> Vec<usize> {
        cited
            .iter()
            .map(|chunk| {
                if let Some(&n) = self.ids.get(&chunk.id) {
                    return n;
                }
                self.references.push(chunk.clone());
                let n = self.references.len();
                self.ids.insert(chunk.id.clone(), n);
                n
            })
            .collect()
    }

    pub fn number(&self, chunk_id: &str) -> Option<usize> {
        self.ids.get(chunk_id).copied()
    }

    /// Registered chunks; reference `n` is at index `n - 1`.
    pub fn references(&self) -> &[Chunk] {
        &self.references
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.references.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_follow_first_use() {
        let mut registry = ReferenceRegistry::new();
        let a = Chunk::new("a", "alpha");
        let b = Chunk::new("b", "beta");
        let c = Chunk::new("c", "gamma");

        assert_eq!(registry.register(&[b.clone(), a.clone()]), vec![1, 2]);
        assert_eq!(registry.register(&[c.clone(), b.clone()]), vec![3, 1]);
        assert_eq!(registry.number("a"), Some(2));
        let ids: Vec<&str> = registry.references().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = ReferenceRegistry::new();
        let a = Chunk::new("a", "alpha");
        registry.register(&[a.clone()]);
        registry.register(&[a.clone(), a.clone()]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.number("a"), Some(1));
    }

    #[test]
    fn test_clear() {
        let mut registry = ReferenceRegistry::new();
        registry.register(&[Chunk::new("a", "alpha")]);
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.number("a"), None);
    }
}

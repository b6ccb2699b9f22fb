//! String interning for the integer-only cell universe.
//!
//! Varchar cells are modeled as integers; the interner keeps the two-way
//! mapping so literals hash deterministically during encoding and model
//! values decode back to text. Strings that parse as integers intern to that
//! integer, which keeps `'42' = 42` comparisons meaningful in the model.

use std::collections::{BTreeMap, HashMap};

use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug, Default, Clone)]
pub struct StringInterner {
    by_string: HashMap<String, i64>,
    by_hash: BTreeMap<i64, String>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> i64 {
        if let Some(h) = self.by_string.get(s) {
            return *h;
        }
        let h = match s.parse::<i64>() {
            Ok(n) => n,
            Err(_) => xxh3_64(s.as_bytes()) as i64,
        };
        self.by_string.insert(s.to_string(), h);
        self.by_hash.entry(h).or_insert_with(|| s.to_string());
        h
    }

    pub fn lookup(&self, hash: i64) -> Option<&str> {
        self.by_hash.get(&hash).map(String::as_str)
    }

    /// Decodes a model value into text, inventing a deterministic fresh
    /// string for hashes the encoding never produced (the solver is free to
    /// pick any integer for an unconstrained varchar cell).
    pub fn decode(&self, hash: i64) -> String {
        match self.lookup(hash) {
            Some(s) => s.to_string(),
            None => format!("s{hash}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_hash_to_themselves() {
        let mut interner = StringInterner::new();
        assert_eq!(interner.intern("42"), 42);
        assert_eq!(interner.intern("-7"), -7);
        assert_eq!(interner.decode(42), "42");
    }

    #[test]
    fn interning_is_stable_and_reversible() {
        let mut interner = StringInterner::new();
        let a = interner.intern("show");
        let b = interner.intern("answer");
        assert_eq!(interner.intern("show"), a);
        assert_ne!(a, b);
        assert_eq!(interner.decode(a), "show");
        assert_eq!(interner.decode(b), "answer");
    }

    #[test]
    fn unknown_hashes_decode_to_fresh_strings() {
        let interner = StringInterner::new();
        assert_eq!(interner.decode(12345), "s12345");
    }
}

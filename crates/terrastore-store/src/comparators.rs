//! Named key comparators for range queries.
//!
//! Range queries carry a comparator *name* on the wire; the executing node
//! resolves it against this registry. An unknown name silently falls back to
//! the default lexicographical order, matching the query service contract.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// A total order over keys.
pub type KeyComparator = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

pub const LEXICOGRAPHICAL_ASC: &str = "lexicographical-asc";
pub const LEXICOGRAPHICAL_DESC: &str = "lexicographical-desc";
pub const NUMERIC_ASC: &str = "numeric-asc";

/// Registry of named comparators with a lexicographical default.
#[derive(Clone)]
pub struct Comparators {
    comparators: HashMap<String, KeyComparator>,
    default: KeyComparator,
}

impl Comparators {
    pub fn new() -> Self {
        let default: KeyComparator = Arc::new(|a: &str, b: &str| a.cmp(b));
        let mut comparators: HashMap<String, KeyComparator> = HashMap::new();
        comparators.insert(LEXICOGRAPHICAL_ASC.to_string(), default.clone());
        comparators.insert(
            LEXICOGRAPHICAL_DESC.to_string(),
            Arc::new(|a: &str, b: &str| b.cmp(a)),
        );
        comparators.insert(NUMERIC_ASC.to_string(), Arc::new(numeric_compare));
        Self {
            comparators,
            default,
        }
    }

    /// Resolves a comparator by name, falling back to the default order.
    pub fn resolve(&self, name: &str) -> KeyComparator {
        self.comparators
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn default_comparator(&self) -> KeyComparator {
        self.default.clone()
    }
}

impl Default for Comparators {
    fn default() -> Self {
        Self::new()
    }
}

fn numeric_compare(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        // Non-numeric keys sort after numeric ones, between themselves lexicographically.
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_lexicographical() {
        let comparators = Comparators::new();
        let cmp = comparators.resolve("no-such-comparator");
        assert_eq!(cmp("a", "b"), Ordering::Less);
        assert_eq!(cmp("b", "a"), Ordering::Greater);
        assert_eq!(cmp("a", "a"), Ordering::Equal);
    }

    #[test]
    fn test_descending() {
        let comparators = Comparators::new();
        let cmp = comparators.resolve(LEXICOGRAPHICAL_DESC);
        assert_eq!(cmp("a", "b"), Ordering::Greater);
    }

    #[test]
    fn test_numeric() {
        let comparators = Comparators::new();
        let cmp = comparators.resolve(NUMERIC_ASC);
        assert_eq!(cmp("2", "10"), Ordering::Less);
        assert_eq!(cmp("10", "2"), Ordering::Greater);
        // Lexicographically "10" < "2"; numeric order must disagree.
        assert_ne!(cmp("10", "2"), "10".cmp("2"));
    }

    #[test]
    fn test_numeric_mixed_keys() {
        let comparators = Comparators::new();
        let cmp = comparators.resolve(NUMERIC_ASC);
        assert_eq!(cmp("5", "abc"), Ordering::Less);
        assert_eq!(cmp("abc", "5"), Ordering::Greater);
        assert_eq!(cmp("abc", "abd"), Ordering::Less);
    }
}

//! Tag and dependency indexes plus glob-pattern compilation.
//!
//! The index is a hint for bulk cleanup, not a source of truth for
//! single-key reads: membership may reference keys that no tier holds
//! anymore, and such orphans are dropped lazily when an invalidation
//! consumes the tag rather than eagerly on every delete.

use cachemesh_core::{CacheError, CacheResult};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct IndexInner {
    tag_to_keys: HashMap<String, HashSet<String>>,
    /// Inverse of `tag_to_keys`, kept for O(1) cleanup on delete.
    key_to_tags: HashMap<String, HashSet<String>>,
    key_to_deps: HashMap<String, HashSet<String>>,
    pattern_registry: HashMap<String, Regex>,
}

/// Tag→keys and key→dependency membership, plus named compiled globs.
#[derive(Debug, Default)]
pub struct InvalidationIndex {
    inner: Mutex<IndexInner>,
}

impl InvalidationIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records that `key` belongs to each of `tags`.
    pub fn add_tag_membership(&self, key: &str, tags: &HashSet<String>) {
        if tags.is_empty() {
            return;
        }
        let mut inner = self.lock();
        for tag in tags {
            inner
                .tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        inner
            .key_to_tags
            .entry(key.to_string())
            .or_default()
            .extend(tags.iter().cloned());
    }

    /// Records the keys `key` depends on.
    ///
    /// Cascade logic is left to callers; the index only remembers the
    /// relationship. Cross-instance visibility is handled by the
    /// orchestrator mirroring these sets into the distributed tier.
    pub fn add_dependencies(&self, key: &str, deps: &HashSet<String>) {
        if deps.is_empty() {
            return;
        }
        self.lock()
            .key_to_deps
            .entry(key.to_string())
            .or_default()
            .extend(deps.iter().cloned());
    }

    /// Dependencies recorded for `key`.
    #[must_use]
    pub fn dependencies_of(&self, key: &str) -> HashSet<String> {
        self.lock().key_to_deps.get(key).cloned().unwrap_or_default()
    }

    /// Keys currently recorded under `tag`.
    #[must_use]
    pub fn members_of(&self, tag: &str) -> Vec<String> {
        self.lock()
            .tag_to_keys
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Consumes a tag: returns its members and clears the membership,
    /// including the inverse index entries.
    pub fn take_tag(&self, tag: &str) -> Vec<String> {
        let mut inner = self.lock();
        let keys: Vec<String> = match inner.tag_to_keys.remove(tag) {
            Some(keys) => keys.into_iter().collect(),
            None => return Vec::new(),
        };
        for key in &keys {
            let now_empty = match inner.key_to_tags.get_mut(key) {
                Some(tags) => {
                    tags.remove(tag);
                    tags.is_empty()
                }
                None => false,
            };
            if now_empty {
                inner.key_to_tags.remove(key);
            }
        }
        keys
    }

    /// Removes `key` from every tag set it belongs to, dropping tag sets
    /// that become empty, and forgets its dependencies.
    pub fn cleanup(&self, key: &str) {
        let mut inner = self.lock();
        if let Some(tags) = inner.key_to_tags.remove(key) {
            for tag in tags {
                let now_empty = match inner.tag_to_keys.get_mut(&tag) {
                    Some(keys) => {
                        keys.remove(key);
                        keys.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    inner.tag_to_keys.remove(&tag);
                }
            }
        }
        inner.key_to_deps.remove(key);
    }

    /// Compiles and registers a named glob for reuse.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Configuration` for an uncompilable pattern.
    pub fn register_pattern(&self, name: &str, glob: &str) -> CacheResult<()> {
        let regex = compile_glob(glob)?;
        self.lock()
            .pattern_registry
            .insert(name.to_string(), regex);
        Ok(())
    }

    /// Looks up a previously registered pattern.
    #[must_use]
    pub fn registered_pattern(&self, name: &str) -> Option<Regex> {
        self.lock().pattern_registry.get(name).cloned()
    }

    /// Number of tags currently indexed.
    #[must_use]
    pub fn tag_count(&self) -> usize {
        self.lock().tag_to_keys.len()
    }

    /// Empties all membership and the pattern registry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.tag_to_keys.clear();
        inner.key_to_tags.clear();
        inner.key_to_deps.clear();
        inner.pattern_registry.clear();
    }
}

/// Converts a glob (`*` matches any run, `?` matches one character) into
/// an anchored regular expression.
///
/// # Errors
///
/// Returns `CacheError::Configuration` if the resulting expression does
/// not compile, which only happens for pathological inputs.
pub fn compile_glob(glob: &str) -> CacheResult<Regex> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            _ => pattern.push_str(&regex::escape(&ch.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
        .map_err(|e| CacheError::configuration(format!("invalid glob pattern '{glob}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tag_membership_round_trip() {
        let index = InvalidationIndex::new();
        index.add_tag_membership("user:1", &tags(&["user", "profile"]));
        index.add_tag_membership("user:2", &tags(&["user"]));

        let mut members = index.members_of("user");
        members.sort();
        assert_eq!(members, vec!["user:1", "user:2"]);
        assert_eq!(index.members_of("profile"), vec!["user:1"]);
        assert!(index.members_of("absent").is_empty());
    }

    #[test]
    fn test_take_tag_clears_membership_and_inverse() {
        let index = InvalidationIndex::new();
        index.add_tag_membership("k1", &tags(&["a", "b"]));
        index.add_tag_membership("k2", &tags(&["a"]));

        let mut taken = index.take_tag("a");
        taken.sort();
        assert_eq!(taken, vec!["k1", "k2"]);
        assert!(index.members_of("a").is_empty());

        // k1 still belongs to b.
        assert_eq!(index.members_of("b"), vec!["k1"]);
        assert!(index.take_tag("a").is_empty());
    }

    #[test]
    fn test_cleanup_drops_empty_tag_sets() {
        let index = InvalidationIndex::new();
        index.add_tag_membership("k1", &tags(&["solo"]));
        index.add_tag_membership("k2", &tags(&["shared"]));
        index.add_tag_membership("k1", &tags(&["shared"]));
        assert_eq!(index.tag_count(), 2);

        index.cleanup("k1");
        assert_eq!(index.tag_count(), 1);
        assert_eq!(index.members_of("shared"), vec!["k2"]);
    }

    #[test]
    fn test_dependencies() {
        let index = InvalidationIndex::new();
        index.add_dependencies("order:9", &tags(&["user:1", "product:5"]));
        assert_eq!(index.dependencies_of("order:9").len(), 2);

        index.cleanup("order:9");
        assert!(index.dependencies_of("order:9").is_empty());
    }

    #[test]
    fn test_glob_compilation() {
        let re = compile_glob("user:*").unwrap();
        assert!(re.is_match("user:42"));
        assert!(re.is_match("user:"));
        assert!(!re.is_match("session:42"));
        assert!(!re.is_match("xuser:42"));

        let re = compile_glob("item:?").unwrap();
        assert!(re.is_match("item:1"));
        assert!(!re.is_match("item:12"));

        // Regex metacharacters in the glob are literal.
        let re = compile_glob("price[usd]:*").unwrap();
        assert!(re.is_match("price[usd]:100"));
        assert!(!re.is_match("priceu:100"));
    }

    #[test]
    fn test_pattern_registry() {
        let index = InvalidationIndex::new();
        index.register_pattern("users", "user:*").unwrap();
        let re = index.registered_pattern("users").unwrap();
        assert!(re.is_match("user:7"));
        assert!(index.registered_pattern("absent").is_none());
    }

    #[test]
    fn test_clear() {
        let index = InvalidationIndex::new();
        index.add_tag_membership("k", &tags(&["t"]));
        index.register_pattern("p", "x*").unwrap();
        index.clear();
        assert_eq!(index.tag_count(), 0);
        assert!(index.registered_pattern("p").is_none());
    }
}

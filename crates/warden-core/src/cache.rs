//! The two caches the enforcer keeps (spec.md §4.5.3, §4.7.4, §9):
//!
//! - [`MatcherCache`] — compiled [`crate::matcher::Matcher`] ASTs keyed by
//!   raw matcher text, so `m`/`m2`/... are parsed once per distinct string,
//!   not once per `enforce` call.
//! - [`DecisionCache`] — an LRU of final decisions keyed by `(ptype,
//!   request)`, invalidated wholesale on any policy mutation or
//!   `load_policy`/`clear_policy` (spec.md §4.7.4: correctness over hit
//!   rate, no per-rule invalidation tracking).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::RwLock;

use lru::LruCache;

use crate::matcher::Matcher;

/// Caches compiled matchers by their raw source text.
///
/// Unlike [`DecisionCache`] this never needs invalidating: a given matcher
/// string always compiles to the same AST, so entries live for the life of
/// the cache.
#[derive(Default)]
pub struct MatcherCache {
    entries: RwLock<HashMap<String, std::sync::Arc<Matcher>>>,
}

impl MatcherCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached compiled matcher for `raw`, compiling and caching
    /// it first if this is the first time this text has been seen.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::error::MatcherError::Parse`] from compilation.
    pub fn get_or_compile(&self, raw: &str) -> Result<std::sync::Arc<Matcher>, crate::error::MatcherError> {
        if let Some(m) = read(&self.entries).get(raw) {
            tracing::debug!(matcher = raw, "matcher cache hit");
            return Ok(std::sync::Arc::clone(m));
        }
        tracing::debug!(matcher = raw, "matcher cache miss");
        let compiled = std::sync::Arc::new(Matcher::compile(raw)?);
        write(&self.entries).insert(raw.to_owned(), std::sync::Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn clear(&self) {
        write(&self.entries).clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MatcherCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatcherCache").field("len", &self.len()).finish()
    }
}

/// The key a decision is cached under: the ptype enforced against plus the
/// request's field values in order.
pub type DecisionKey = (String, Vec<String>);

/// A bounded LRU of `enforce` outcomes.
///
/// `None` capacity disables the cache outright (spec.md's default is
/// disabled; callers opt in via `EnforcerOptions::decision_cache_capacity`).
pub struct DecisionCache {
    inner: RwLock<LruCache<DecisionKey, bool>>,
}

impl DecisionCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: RwLock::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &DecisionKey) -> Option<bool> {
        let hit = write(&self.inner).get(key).copied();
        if hit.is_some() {
            tracing::debug!(?key, "decision cache hit");
        } else {
            tracing::debug!(?key, "decision cache miss");
        }
        hit
    }

    pub fn put(&self, key: DecisionKey, decision: bool) {
        write(&self.inner).put(key, decision);
    }

    /// Drop every cached decision. Called on any mutation, `load_policy`,
    /// or `clear_policy` (spec.md §4.7.4) since a single invalidated
    /// decision can't be distinguished cheaply from the rest.
    pub fn clear(&self) {
        write(&self.inner).clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionCache").field("len", &self.len()).finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn matcher_cache_reuses_compiled_ast() {
        let cache = MatcherCache::new();
        let a = cache.get_or_compile("r.sub == p.sub").unwrap();
        let b = cache.get_or_compile("r.sub == p.sub").unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn matcher_cache_propagates_compile_errors() {
        let cache = MatcherCache::new();
        assert!(cache.get_or_compile("r.sub ==").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn decision_cache_hits_after_put() {
        let cache = DecisionCache::new(NonZeroUsize::new(4).unwrap());
        let key = ("p".to_owned(), vec!["alice".to_owned(), "data1".to_owned(), "read".to_owned()]);
        assert_eq!(cache.get(&key), None);
        cache.put(key.clone(), true);
        assert_eq!(cache.get(&key), Some(true));
    }

    #[test]
    fn decision_cache_clear_drops_everything() {
        let cache = DecisionCache::new(NonZeroUsize::new(4).unwrap());
        let key = ("p".to_owned(), vec!["alice".to_owned()]);
        cache.put(key.clone(), true);
        cache.clear();
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn decision_cache_evicts_least_recently_used() {
        let cache = DecisionCache::new(NonZeroUsize::new(1).unwrap());
        let key_a = ("p".to_owned(), vec!["a".to_owned()]);
        let key_b = ("p".to_owned(), vec!["b".to_owned()]);
        cache.put(key_a.clone(), true);
        cache.put(key_b.clone(), false);
        assert_eq!(cache.get(&key_a), None);
        assert_eq!(cache.get(&key_b), Some(false));
    }
}

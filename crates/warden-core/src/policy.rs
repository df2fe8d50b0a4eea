//! The policy store (spec.md §3.2, §4.2).
//!
//! Rules are kept per ptype (`"p"`, `"p2"`, `"g"`, ...) as an ordered
//! `Vec<Rule>` — order matters for explanation and for `priority` effect
//! modes — with a parallel `HashSet` so membership checks used by `add`'s
//! "ex" (no duplicates) semantics stay O(1) instead of O(n).
//!
//! State lives behind a [`std::sync::RwLock`], not an async one: every
//! operation here is pure in-memory bookkeeping, so there's nothing to
//! `.await` on. The only suspension point in the whole engine is the
//! adapter call at the edge of [`crate::enforcer::Enforcer`] (spec.md §5).
//! Keeping the store synchronous is what lets [`crate::matcher`] call into
//! [`crate::rbac::RoleManager`] mid-evaluation without async recursion.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::info;
use warden_storage::PolicySet;

use crate::error::StoreError;

/// A single stored rule: a row of string fields in definition order.
pub type Rule = Vec<String>;

#[derive(Debug, Default)]
struct PtypeRules {
    rules: Vec<Rule>,
    index: HashSet<Rule>,
}

/// Holds every policy and grouping rule, keyed by ptype.
pub struct PolicyStore {
    ptypes: RwLock<HashMap<String, PtypeRules>>,
    /// Logical field name -> positional index, per ptype (spec.md §4.2's
    /// field index). Populated from the model's field list at load time and
    /// overridable via [`PolicyStore::set_field_index`].
    field_index: RwLock<HashMap<String, HashMap<String, usize>>>,
}

impl PolicyStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ptypes: RwLock::new(HashMap::new()),
            field_index: RwLock::new(HashMap::new()),
        }
    }

    /// Build a store from a [`PolicySet`] loaded by an adapter.
    #[must_use]
    pub fn from_policy_set(set: &PolicySet) -> Self {
        let mut map: HashMap<String, PtypeRules> = HashMap::new();
        for (ptype, rules) in set.policies.iter().chain(set.grouping.iter()) {
            let entry = map.entry(ptype.clone()).or_default();
            for rule in rules {
                if entry.index.insert(rule.clone()) {
                    entry.rules.push(rule.clone());
                }
            }
        }
        Self {
            ptypes: RwLock::new(map),
            field_index: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot the full store back into a [`PolicySet`] shape for
    /// `save_policy`. `policy_ptypes`/`grouping_ptypes` say which loaded
    /// ptype belongs in which section.
    #[must_use]
    pub fn to_policy_set(&self, policy_ptypes: &[String], grouping_ptypes: &[String]) -> PolicySet {
        let guard = self.ptypes.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut set = PolicySet::default();
        for ptype in policy_ptypes {
            if let Some(p) = guard.get(ptype) {
                set.policies.insert(ptype.clone(), p.rules.clone());
            }
        }
        for ptype in grouping_ptypes {
            if let Some(p) = guard.get(ptype) {
                set.grouping.insert(ptype.clone(), p.rules.clone());
            }
        }
        set
    }

    /// Every rule stored under `ptype`, in insertion order.
    #[must_use]
    pub fn get(&self, ptype: &str) -> Vec<Rule> {
        self.read().get(ptype).map(|p| p.rules.clone()).unwrap_or_default()
    }

    /// Rules under `ptype` whose fields starting at `field_index` match
    /// `field_values` (an empty string in `field_values` is a wildcard for
    /// that position, per spec.md §4.2).
    #[must_use]
    pub fn get_filtered(&self, ptype: &str, field_index: usize, field_values: &[String]) -> Vec<Rule> {
        let guard = self.read();
        let Some(p) = guard.get(ptype) else {
            return Vec::new();
        };
        p.rules.iter().filter(|r| rule_matches(r, field_index, field_values)).cloned().collect()
    }

    /// Rules under `ptype` for which `predicate` returns true.
    #[must_use]
    pub fn get_by_matcher(&self, ptype: &str, predicate: impl Fn(&[String]) -> bool) -> Vec<Rule> {
        let guard = self.read();
        let Some(p) = guard.get(ptype) else {
            return Vec::new();
        };
        p.rules.iter().filter(|r| predicate(r)).cloned().collect()
    }

    /// Whether `rule` is present under `ptype`.
    #[must_use]
    pub fn has(&self, ptype: &str, rule: &[String]) -> bool {
        self.read().get(ptype).is_some_and(|p| p.index.contains(rule))
    }

    /// Override the positional index for `field_name` on `ptype` (spec.md
    /// §4.2's field index, e.g. `"sub"` -> `0`). Used to locate fields like
    /// `priority` without hardcoding their position.
    pub fn set_field_index(&self, ptype: &str, field_name: &str, index: usize) {
        let mut guard = self.field_index.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.entry(ptype.to_owned()).or_default().insert(field_name.to_owned(), index);
    }

    /// The positional index registered for `field_name` on `ptype`, if any.
    #[must_use]
    pub fn field_index(&self, ptype: &str, field_name: &str) -> Option<usize> {
        let guard = self.field_index.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.get(ptype)?.get(field_name).copied()
    }

    /// Add a single rule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicatePolicy`] if `rule` is already present.
    pub fn add(&self, ptype: &str, rule: Rule) -> Result<(), StoreError> {
        let mut guard = self.write();
        let entry = guard.entry(ptype.to_owned()).or_default();
        if !entry.index.insert(rule.clone()) {
            return Err(StoreError::DuplicatePolicy {
                ptype: ptype.to_owned(),
                rule,
            });
        }
        entry.rules.push(rule.clone());
        info!(ptype, ?rule, "policy added");
        Ok(())
    }

    /// Add many rules atomically: either every rule is new and all are
    /// added, or none are (spec.md §4.2's "ex" batch semantics).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicatePolicy`] naming the first rule that's
    /// already present, without adding any of `rules`.
    pub fn add_many(&self, ptype: &str, rules: Vec<Rule>) -> Result<(), StoreError> {
        let mut guard = self.write();
        let entry = guard.entry(ptype.to_owned()).or_default();
        for rule in &rules {
            if entry.index.contains(rule) {
                return Err(StoreError::DuplicatePolicy {
                    ptype: ptype.to_owned(),
                    rule: rule.clone(),
                });
            }
        }
        for rule in rules {
            entry.index.insert(rule.clone());
            entry.rules.push(rule);
        }
        info!(ptype, "policies added in batch");
        Ok(())
    }

    /// Add many rules, silently skipping any already present (spec.md
    /// §4.2's "ex" batch mode). Returns the count actually added.
    pub fn add_many_ex(&self, ptype: &str, rules: Vec<Rule>) -> usize {
        let mut guard = self.write();
        let entry = guard.entry(ptype.to_owned()).or_default();
        let mut added = 0;
        for rule in rules {
            if entry.index.insert(rule.clone()) {
                entry.rules.push(rule);
                added += 1;
            }
        }
        info!(ptype, added, "policies added in batch (ex mode)");
        added
    }

    /// Remove a single rule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PolicyNotFound`] if `rule` isn't present.
    pub fn remove(&self, ptype: &str, rule: &[String]) -> Result<(), StoreError> {
        let mut guard = self.write();
        let entry = guard.get_mut(ptype).ok_or_else(|| StoreError::PolicyNotFound {
            ptype: ptype.to_owned(),
            rule: rule.to_vec(),
        })?;
        if !entry.index.remove(rule) {
            return Err(StoreError::PolicyNotFound {
                ptype: ptype.to_owned(),
                rule: rule.to_vec(),
            });
        }
        entry.rules.retain(|r| r != rule);
        info!(ptype, ?rule, "policy removed");
        Ok(())
    }

    /// Remove many rules. Rules that aren't present are silently skipped
    /// (mirrors `BatchAdapter::remove_policies`' best-effort contract).
    pub fn remove_many(&self, ptype: &str, rules: &[Rule]) {
        let mut guard = self.write();
        let Some(entry) = guard.get_mut(ptype) else {
            return;
        };
        for rule in rules {
            entry.index.remove(rule);
        }
        entry.rules.retain(|r| !rules.contains(r));
    }

    /// Remove and return every rule under `ptype` matching `field_values`
    /// at `field_index` (see [`PolicyStore::get_filtered`]).
    pub fn remove_filtered(&self, ptype: &str, field_index: usize, field_values: &[String]) -> Vec<Rule> {
        let mut guard = self.write();
        let Some(entry) = guard.get_mut(ptype) else {
            return Vec::new();
        };
        let (removed, kept): (Vec<Rule>, Vec<Rule>) =
            entry.rules.drain(..).partition(|r| rule_matches(r, field_index, field_values));
        for rule in &removed {
            entry.index.remove(rule);
        }
        entry.rules = kept;
        if !removed.is_empty() {
            info!(ptype, removed = removed.len(), "policies removed by filter");
        }
        removed
    }

    /// Remove every rule matching `field_values` at `field_index` and
    /// insert `new_rules` in their place. Returns the removed rules
    /// (spec.md §4.2).
    pub fn update_filtered(
        &self,
        ptype: &str,
        new_rules: Vec<Rule>,
        field_index: usize,
        field_values: &[String],
    ) -> Vec<Rule> {
        let removed = self.remove_filtered(ptype, field_index, field_values);
        let mut guard = self.write();
        let entry = guard.entry(ptype.to_owned()).or_default();
        for rule in new_rules {
            if entry.index.insert(rule.clone()) {
                entry.rules.push(rule);
            }
        }
        removed
    }

    /// Replace `old` with `new` in place, preserving position.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PolicyNotFound`] if `old` isn't present, or
    /// [`StoreError::DuplicatePolicy`] if `new` already is (and isn't
    /// `old` itself).
    pub fn update(&self, ptype: &str, old: &[String], new: Rule) -> Result<(), StoreError> {
        let mut guard = self.write();
        let entry = guard.get_mut(ptype).ok_or_else(|| StoreError::PolicyNotFound {
            ptype: ptype.to_owned(),
            rule: old.to_vec(),
        })?;
        if new != old && entry.index.contains(&new) {
            return Err(StoreError::DuplicatePolicy {
                ptype: ptype.to_owned(),
                rule: new,
            });
        }
        let Some(pos) = entry.rules.iter().position(|r| r == old) else {
            return Err(StoreError::PolicyNotFound {
                ptype: ptype.to_owned(),
                rule: old.to_vec(),
            });
        };
        entry.index.remove(old);
        entry.index.insert(new.clone());
        entry.rules[pos] = new;
        Ok(())
    }

    /// Drop every rule under `ptype`.
    pub fn clear_ptype(&self, ptype: &str) {
        self.write().remove(ptype);
    }

    /// Drop every rule under every ptype.
    pub fn clear_all(&self) {
        self.write().clear();
    }

    /// Every ptype that currently holds at least one rule.
    #[must_use]
    pub fn ptypes(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, PtypeRules>> {
        self.ptypes.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, PtypeRules>> {
        self.ptypes.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore").finish_non_exhaustive()
    }
}

fn rule_matches(rule: &[String], field_index: usize, field_values: &[String]) -> bool {
    field_values.iter().enumerate().all(|(offset, expected)| {
        expected.is_empty() || rule.get(field_index + offset).is_some_and(|actual| actual == expected)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rule(fields: &[&str]) -> Rule {
        fields.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn add_then_has_and_get() {
        let store = PolicyStore::new();
        store.add("p", rule(&["alice", "data1", "read"])).unwrap();
        assert!(store.has("p", &rule(&["alice", "data1", "read"])));
        assert_eq!(store.get("p"), vec![rule(&["alice", "data1", "read"])]);
    }

    #[test]
    fn add_duplicate_is_rejected() {
        let store = PolicyStore::new();
        store.add("p", rule(&["alice", "data1", "read"])).unwrap();
        let err = store.add("p", rule(&["alice", "data1", "read"])).unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePolicy { .. }));
    }

    #[test]
    fn add_many_is_all_or_nothing() {
        let store = PolicyStore::new();
        store.add("p", rule(&["alice", "data1", "read"])).unwrap();
        let err = store
            .add_many("p", vec![rule(&["bob", "data2", "read"]), rule(&["alice", "data1", "read"])])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePolicy { .. }));
        assert!(!store.has("p", &rule(&["bob", "data2", "read"])));
    }

    #[test]
    fn remove_missing_rule_errors() {
        let store = PolicyStore::new();
        let err = store.remove("p", &rule(&["alice", "data1", "read"])).unwrap_err();
        assert!(matches!(err, StoreError::PolicyNotFound { .. }));
    }

    #[test]
    fn remove_filtered_by_field_index() {
        let store = PolicyStore::new();
        store.add("p", rule(&["alice", "data1", "read"])).unwrap();
        store.add("p", rule(&["alice", "data2", "write"])).unwrap();
        store.add("p", rule(&["bob", "data1", "read"])).unwrap();

        let removed = store.remove_filtered("p", 0, &["alice".into(), String::new(), String::new()]);
        assert_eq!(removed.len(), 2);
        assert_eq!(store.get("p"), vec![rule(&["bob", "data1", "read"])]);
    }

    #[test]
    fn update_preserves_position() {
        let store = PolicyStore::new();
        store.add("p", rule(&["alice", "data1", "read"])).unwrap();
        store.add("p", rule(&["bob", "data1", "read"])).unwrap();
        store
            .update("p", &rule(&["alice", "data1", "read"]), rule(&["alice", "data1", "write"]))
            .unwrap();
        assert_eq!(
            store.get("p"),
            vec![rule(&["alice", "data1", "write"]), rule(&["bob", "data1", "read"])]
        );
    }

    #[test]
    fn add_many_ex_skips_duplicates_and_counts_added() {
        let store = PolicyStore::new();
        store.add("p", rule(&["alice", "data1", "read"])).unwrap();
        let added = store.add_many_ex(
            "p",
            vec![rule(&["bob", "data2", "read"]), rule(&["alice", "data1", "read"])],
        );
        assert_eq!(added, 1);
        assert!(store.has("p", &rule(&["bob", "data2", "read"])));
        assert!(store.has("p", &rule(&["alice", "data1", "read"])));
    }

    #[test]
    fn get_by_matcher_filters_with_predicate() {
        let store = PolicyStore::new();
        store.add("p", rule(&["alice", "data1", "read"])).unwrap();
        store.add("p", rule(&["bob", "data2", "write"])).unwrap();
        let writes = store.get_by_matcher("p", |r| r.get(2).is_some_and(|act| act == "write"));
        assert_eq!(writes, vec![rule(&["bob", "data2", "write"])]);
    }

    #[test]
    fn set_and_read_field_index() {
        let store = PolicyStore::new();
        store.set_field_index("p", "priority", 0);
        assert_eq!(store.field_index("p", "priority"), Some(0));
        assert_eq!(store.field_index("p", "sub"), None);
    }

    #[test]
    fn update_filtered_replaces_matching_rules() {
        let store = PolicyStore::new();
        store.add("p", rule(&["alice", "data1", "read"])).unwrap();
        store.add("p", rule(&["bob", "data1", "read"])).unwrap();
        let removed =
            store.update_filtered("p", vec![rule(&["carol", "data1", "read"])], 0, &["alice".into()]);
        assert_eq!(removed, vec![rule(&["alice", "data1", "read"])]);
        assert_eq!(store.get("p"), vec![rule(&["bob", "data1", "read"]), rule(&["carol", "data1", "read"])]);
    }

    #[test]
    fn from_policy_set_round_trips_through_to_policy_set() {
        let mut set = PolicySet::default();
        set.policies.insert("p".to_owned(), vec![rule(&["alice", "data1", "read"])]);
        set.grouping.insert("g".to_owned(), vec![rule(&["alice", "admin"])]);

        let store = PolicyStore::from_policy_set(&set);
        let round_tripped = store.to_policy_set(&["p".to_owned()], &["g".to_owned()]);
        assert_eq!(round_tripped.policies.get("p"), set.policies.get("p"));
        assert_eq!(round_tripped.grouping.get("g"), set.grouping.get("g"));
    }
}

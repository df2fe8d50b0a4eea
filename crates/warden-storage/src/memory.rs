//! In-memory adapter for testing and no-persistence use cases.
//!
//! Stores all rules in a [`PolicySet`] behind a `RwLock`. Nothing survives
//! process exit. Use this for unit tests and for callers who build their
//! policy set entirely in memory (the `Enforcer::new_with_options` default
//! when no adapter is configured uses this).

use std::sync::RwLock;

use tracing::debug;

use crate::{
    Adapter, AdapterError, BatchAdapter, ModelPtypes, PolicySet, Rule, Section, UpdateAdapter,
};

/// An in-memory [`Adapter`] backed by a plain [`PolicySet`].
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    state: RwLock<PolicySet>,
}

impl MemoryAdapter {
    /// Create an empty in-memory adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(PolicySet::new()),
        }
    }

    /// Create an in-memory adapter pre-seeded with `policies`.
    #[must_use]
    pub fn with_policies(policies: PolicySet) -> Self {
        Self {
            state: RwLock::new(policies),
        }
    }

    fn section_map<'a>(
        state: &'a mut PolicySet,
        sec: Section,
    ) -> &'a mut std::collections::HashMap<String, Vec<Rule>> {
        match sec {
            Section::Policy => &mut state.policies,
            Section::Grouping => &mut state.grouping,
        }
    }
}

#[async_trait::async_trait]
impl Adapter for MemoryAdapter {
    async fn load_policy(&self, _model: &dyn ModelPtypes) -> Result<PolicySet, AdapterError> {
        let state = self.state.read().map_err(|_| AdapterError::Load {
            reason: "memory adapter lock poisoned".to_owned(),
        })?;
        Ok(state.clone())
    }

    async fn save_policy(&self, policies: &PolicySet) -> Result<(), AdapterError> {
        let mut state = self.state.write().map_err(|_| AdapterError::Save {
            reason: "memory adapter lock poisoned".to_owned(),
        })?;
        *state = policies.clone();
        debug!(
            policy_ptypes = state.policies.len(),
            grouping_ptypes = state.grouping.len(),
            "memory adapter: policy set saved"
        );
        Ok(())
    }

    async fn add_policy(
        &self,
        sec: Section,
        ptype: &str,
        rule: &[String],
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().map_err(|_| AdapterError::Add {
            sec: sec.to_string(),
            ptype: ptype.to_owned(),
            reason: "memory adapter lock poisoned".to_owned(),
        })?;
        Self::section_map(&mut state, sec)
            .entry(ptype.to_owned())
            .or_default()
            .push(rule.to_vec());
        Ok(())
    }

    async fn remove_policy(
        &self,
        sec: Section,
        ptype: &str,
        rule: &[String],
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().map_err(|_| AdapterError::Remove {
            sec: sec.to_string(),
            ptype: ptype.to_owned(),
            reason: "memory adapter lock poisoned".to_owned(),
        })?;
        if let Some(rules) = Self::section_map(&mut state, sec).get_mut(ptype) {
            rules.retain(|r| r != rule);
        }
        Ok(())
    }

    async fn remove_filtered_policy(
        &self,
        sec: Section,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Rule>, AdapterError> {
        let mut state = self.state.write().map_err(|_| AdapterError::Remove {
            sec: sec.to_string(),
            ptype: ptype.to_owned(),
            reason: "memory adapter lock poisoned".to_owned(),
        })?;
        let mut removed = Vec::new();
        if let Some(rules) = Self::section_map(&mut state, sec).get_mut(ptype) {
            rules.retain(|rule| {
                let matches = field_values.iter().enumerate().all(|(i, v)| {
                    v.is_empty() || rule.get(field_index + i).is_some_and(|f| f == v)
                });
                if matches {
                    removed.push(rule.clone());
                }
                !matches
            });
        }
        Ok(removed)
    }

    fn as_batch(&self) -> Option<&dyn BatchAdapter> {
        Some(self)
    }

    fn as_update(&self) -> Option<&dyn UpdateAdapter> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl BatchAdapter for MemoryAdapter {
    async fn add_policies(
        &self,
        sec: Section,
        ptype: &str,
        rules: &[Rule],
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().map_err(|_| AdapterError::Add {
            sec: sec.to_string(),
            ptype: ptype.to_owned(),
            reason: "memory adapter lock poisoned".to_owned(),
        })?;
        let entry = Self::section_map(&mut state, sec)
            .entry(ptype.to_owned())
            .or_default();
        entry.extend(rules.iter().cloned());
        Ok(())
    }

    async fn remove_policies(
        &self,
        sec: Section,
        ptype: &str,
        rules: &[Rule],
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().map_err(|_| AdapterError::Remove {
            sec: sec.to_string(),
            ptype: ptype.to_owned(),
            reason: "memory adapter lock poisoned".to_owned(),
        })?;
        if let Some(existing) = Self::section_map(&mut state, sec).get_mut(ptype) {
            existing.retain(|r| !rules.contains(r));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl UpdateAdapter for MemoryAdapter {
    async fn update_policy(
        &self,
        sec: Section,
        ptype: &str,
        old: &[String],
        new: &[String],
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().map_err(|_| AdapterError::Update {
            sec: sec.to_string(),
            ptype: ptype.to_owned(),
            reason: "memory adapter lock poisoned".to_owned(),
        })?;
        let rules = Self::section_map(&mut state, sec)
            .entry(ptype.to_owned())
            .or_default();
        let pos = rules
            .iter()
            .position(|r| r == old)
            .ok_or_else(|| AdapterError::Update {
                sec: sec.to_string(),
                ptype: ptype.to_owned(),
                reason: "rule not found".to_owned(),
            })?;
        rules[pos] = new.to_vec();
        Ok(())
    }

    async fn update_policies(
        &self,
        sec: Section,
        ptype: &str,
        olds: &[Rule],
        news: &[Rule],
    ) -> Result<(), AdapterError> {
        for (old, new) in olds.iter().zip(news.iter()) {
            self.update_policy(sec, ptype, old, new).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoPtypes;
    impl ModelPtypes for NoPtypes {
        fn policy_ptypes(&self) -> Vec<String> {
            vec![]
        }
        fn grouping_ptypes(&self) -> Vec<String> {
            vec![]
        }
    }

    #[tokio::test]
    async fn add_then_load_roundtrips() {
        let adapter = MemoryAdapter::new();
        adapter
            .add_policy(
                Section::Policy,
                "p",
                &["alice".to_owned(), "data1".to_owned(), "read".to_owned()],
            )
            .await
            .unwrap();

        let set = adapter.load_policy(&NoPtypes).await.unwrap();
        assert_eq!(set.policies["p"].len(), 1);
    }

    #[tokio::test]
    async fn remove_policy_deletes_exact_match() {
        let adapter = MemoryAdapter::new();
        let rule = vec!["alice".to_owned(), "data1".to_owned(), "read".to_owned()];
        adapter.add_policy(Section::Policy, "p", &rule).await.unwrap();
        adapter.remove_policy(Section::Policy, "p", &rule).await.unwrap();

        let set = adapter.load_policy(&NoPtypes).await.unwrap();
        assert!(set.policies["p"].is_empty());
    }

    #[tokio::test]
    async fn remove_filtered_policy_matches_wildcard_empty_string() {
        let adapter = MemoryAdapter::new();
        adapter
            .add_policy(
                Section::Policy,
                "p",
                &["alice".to_owned(), "data1".to_owned(), "read".to_owned()],
            )
            .await
            .unwrap();
        adapter
            .add_policy(
                Section::Policy,
                "p",
                &["bob".to_owned(), "data2".to_owned(), "write".to_owned()],
            )
            .await
            .unwrap();

        let removed = adapter
            .remove_filtered_policy(Section::Policy, "p", 1, &["data1".to_owned(), "".to_owned()])
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0][0], "alice");

        let set = adapter.load_policy(&NoPtypes).await.unwrap();
        assert_eq!(set.policies["p"].len(), 1);
        assert_eq!(set.policies["p"][0][0], "bob");
    }

    #[tokio::test]
    async fn save_policy_replaces_whole_set() {
        let adapter = MemoryAdapter::new();
        adapter
            .add_policy(Section::Policy, "p", &["a".to_owned(), "b".to_owned()])
            .await
            .unwrap();

        let mut fresh = PolicySet::new();
        fresh
            .policies
            .insert("p".to_owned(), vec![vec!["x".to_owned(), "y".to_owned()]]);
        adapter.save_policy(&fresh).await.unwrap();

        let set = adapter.load_policy(&NoPtypes).await.unwrap();
        assert_eq!(set.policies["p"], vec![vec!["x".to_owned(), "y".to_owned()]]);
    }

    #[tokio::test]
    async fn update_policy_preserves_position() {
        let adapter = MemoryAdapter::new();
        adapter
            .add_policy(Section::Policy, "p", &["a".to_owned(), "1".to_owned()])
            .await
            .unwrap();
        adapter
            .add_policy(Section::Policy, "p", &["b".to_owned(), "2".to_owned()])
            .await
            .unwrap();

        let update: &dyn UpdateAdapter = adapter.as_update().unwrap();
        update
            .update_policy(
                Section::Policy,
                "p",
                &["a".to_owned(), "1".to_owned()],
                &["a".to_owned(), "99".to_owned()],
            )
            .await
            .unwrap();

        let set = adapter.load_policy(&NoPtypes).await.unwrap();
        assert_eq!(set.policies["p"][0], vec!["a".to_owned(), "99".to_owned()]);
        assert_eq!(set.policies["p"][1], vec!["b".to_owned(), "2".to_owned()]);
    }

    #[tokio::test]
    async fn update_policy_missing_old_fails() {
        let adapter = MemoryAdapter::new();
        let update: &dyn UpdateAdapter = adapter.as_update().unwrap();
        let result = update
            .update_policy(
                Section::Policy,
                "p",
                &["nope".to_owned()],
                &["new".to_owned()],
            )
            .await;
        assert!(result.is_err());
    }
}

//! The enforcer (spec.md §3.5, §4.7): the runtime aggregate that owns a
//! [`Model`], a [`PolicyStore`], one [`RoleManager`] per grouping ptype, a
//! [`FunctionMap`], the mutation flags, and the optional adapter/watcher/
//! dispatcher/caches, and that ties them together into `enforce` and the
//! mutation API.
//!
//! `enforce` and its variants never touch the adapter — they're pure
//! in-memory reads and stay synchronous. Only `load_policy`, `save_policy`,
//! and the non-`_self` mutation methods are `async`, since those are the
//! only operations that may call into [`warden_storage::Adapter`] (spec.md
//! §5's "adapter I/O as the sole suspension point").

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};
use warden_storage::{Adapter, Section};

use crate::cache::{DecisionCache, MatcherCache};
use crate::effect::{self, Effect, RuleOutcome};
use crate::error::{EnforcerError, ModelError};
use crate::function::FunctionMap;
use crate::matcher::{evaluate, EvalContext};
use crate::model::Model;
use crate::policy::{PolicyStore, Rule};
use crate::rbac::RoleManager;
use crate::value::Value;
use crate::watcher::{Dispatcher, Watcher};

/// Mutation and behavior flags owned by the [`Enforcer`] (spec.md §3.5).
#[derive(Debug, Clone, Copy)]
pub struct EnforcerOptions {
    /// When false, `enforce*` returns `true` unconditionally without
    /// evaluating anything (spec.md §7 `Disabled`).
    pub enabled: bool,
    /// Persist mutations to the configured adapter as they happen.
    pub auto_save: bool,
    /// Mirror grouping-ptype mutations into the matching [`RoleManager`].
    pub auto_build_role_links: bool,
    /// Call the configured [`Watcher`] after a mutation.
    pub auto_notify_watcher: bool,
    /// Call the configured [`Dispatcher`] after a mutation.
    pub auto_notify_dispatcher: bool,
    /// Treat a request field that parses as a JSON object/array as a
    /// [`Value::Json`] instead of a plain string, enabling nested
    /// `r.field.subfield` access in matchers.
    pub accept_json_request: bool,
    /// Capacity of the decision cache; `None` disables it.
    pub decision_cache_capacity: Option<NonZeroUsize>,
}

impl Default for EnforcerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_save: true,
            auto_build_role_links: true,
            auto_notify_watcher: true,
            auto_notify_dispatcher: true,
            accept_json_request: false,
            decision_cache_capacity: None,
        }
    }
}

/// The enforcer's lifecycle state (spec.md §4.7.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcerState {
    Unloaded,
    Ready,
    Mutating,
    Cleared,
}

/// The runtime aggregate that answers authorization questions.
pub struct Enforcer {
    model: Model,
    store: PolicyStore,
    role_managers: HashMap<String, RoleManager>,
    functions: RwLock<FunctionMap>,
    options: RwLock<EnforcerOptions>,
    state: RwLock<EnforcerState>,
    adapter: Option<Arc<dyn Adapter>>,
    watcher: Option<Arc<dyn Watcher>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    matcher_cache: MatcherCache,
    decision_cache: RwLock<Option<DecisionCache>>,
    /// Serializes mutations so two concurrent mutators can't interleave
    /// their store + role-manager writes (spec.md §5's linearizability
    /// requirement for mutation).
    mutation_lock: tokio::sync::Mutex<()>,
}

impl Enforcer {
    /// Build an enforcer from a parsed model, with no adapter and default
    /// options, and no policy loaded (state `Unloaded`).
    #[must_use]
    pub fn new(model: Model) -> Self {
        let role_managers = build_role_managers(&model);
        Self {
            model,
            store: PolicyStore::new(),
            role_managers,
            functions: RwLock::new(FunctionMap::with_builtins()),
            options: RwLock::new(EnforcerOptions::default()),
            state: RwLock::new(EnforcerState::Unloaded),
            adapter: None,
            watcher: None,
            dispatcher: None,
            matcher_cache: MatcherCache::new(),
            decision_cache: RwLock::new(None),
            mutation_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Build an enforcer from model configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`EnforcerError`] if the model text fails to parse or
    /// validate.
    pub fn from_model_text(text: &str) -> Result<Self, EnforcerError> {
        Ok(Self::new(Model::from_str(text).map_err(ModelError::from)?))
    }

    /// Attach an adapter, watcher, and/or dispatcher. Any can be omitted.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    #[must_use]
    pub fn with_watcher(mut self, watcher: Arc<dyn Watcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    #[must_use]
    pub fn with_options(self, options: EnforcerOptions) -> Self {
        self.set_options(options);
        self
    }

    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    #[must_use]
    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    #[must_use]
    pub fn role_manager(&self, ptype: &str) -> Option<&RoleManager> {
        self.role_managers.get(ptype)
    }

    #[must_use]
    pub fn options(&self) -> EnforcerOptions {
        *read(&self.options)
    }

    pub fn set_options(&self, options: EnforcerOptions) {
        if let Some(capacity) = options.decision_cache_capacity {
            *write(&self.decision_cache) = Some(DecisionCache::new(capacity));
        } else {
            *write(&self.decision_cache) = None;
        }
        *write(&self.options) = options;
    }

    pub fn set_enabled(&self, enabled: bool) {
        write(&self.options).enabled = enabled;
    }

    #[must_use]
    pub fn state(&self) -> EnforcerState {
        *read(&self.state)
    }

    /// Register or override a matcher-callable function (spec.md §5: "the
    /// function map is immutable after enforcer start except via explicit
    /// `add_function`").
    pub fn add_function<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        write(&self.functions).register(name, f);
    }

    // ---- Load / save / clear (state machine, spec.md §4.7.5) ----------

    /// Reload the policy store (and role graph, if `auto_build_role_links`)
    /// from the configured adapter. A no-op if no adapter is configured.
    ///
    /// # Errors
    ///
    /// Returns [`EnforcerError::Adapter`] if the adapter load fails.
    pub async fn load_policy(&self) -> Result<(), EnforcerError> {
        let _guard = self.mutation_lock.lock().await;
        let Some(adapter) = &self.adapter else {
            *write(&self.state) = EnforcerState::Ready;
            return Ok(());
        };
        let set = adapter.load_policy(&self.model).await?;
        let fresh = PolicyStore::from_policy_set(&set);
        self.store.clear_all();
        for ptype in fresh.ptypes() {
            let _ = self.store.add_many(&ptype, fresh.get(&ptype));
        }
        if self.options().auto_build_role_links {
            self.rebuild_role_links();
        }
        self.invalidate_decision_cache();
        *write(&self.state) = EnforcerState::Ready;
        info!("policy loaded from adapter");
        Ok(())
    }

    /// Persist the current policy store to the configured adapter. A no-op
    /// if no adapter is configured.
    ///
    /// # Errors
    ///
    /// Returns [`EnforcerError::Adapter`] if the adapter save fails.
    pub async fn save_policy(&self) -> Result<(), EnforcerError> {
        let Some(adapter) = &self.adapter else {
            return Ok(());
        };
        let set = self.store.to_policy_set(
            &self.model.policy_defs().iter().map(|d| d.key.clone()).collect::<Vec<_>>(),
            &self.model.role_defs().iter().map(|d| d.key.clone()).collect::<Vec<_>>(),
        );
        adapter.save_policy(&set).await?;
        Ok(())
    }

    /// Empty the policy store and every role graph in memory. The adapter
    /// is not touched (spec.md §4.7.5).
    pub fn clear_policy(&self) {
        self.store.clear_all();
        for rm in self.role_managers.values() {
            rm.clear();
        }
        self.invalidate_decision_cache();
        *write(&self.state) = EnforcerState::Cleared;
    }

    /// Rebuild every role graph from scratch from the current grouping
    /// rules (spec.md §3.4's `build_role_links`).
    pub fn rebuild_role_links(&self) {
        for role_def in self.model.role_defs() {
            let Some(rm) = self.role_managers.get(&role_def.key) else {
                continue;
            };
            rm.clear();
            for rule in self.store.get(&role_def.key) {
                add_grouping_edge(rm, role_def.has_domain(), &rule);
            }
        }
    }

    fn invalidate_decision_cache(&self) {
        if let Some(cache) = read(&self.decision_cache).as_ref() {
            cache.clear();
        }
    }

    // ---- Enforcement (spec.md §4.7.1) ---------------------------------

    /// `enforce(request)`: the combined allow/deny decision for `request`
    /// against the default policy ptype `p`.
    ///
    /// # Errors
    ///
    /// Returns [`EnforcerError`] for a model/arity mismatch or a matcher
    /// compile failure. A per-rule evaluation failure is contained: the
    /// rule is treated as not-matched (spec.md §7).
    pub fn enforce(&self, request: &[String]) -> Result<bool, EnforcerError> {
        Ok(self.enforce_ex(request)?.0)
    }

    /// As [`Enforcer::enforce`], plus the rule tuples that decided the
    /// outcome.
    ///
    /// # Errors
    ///
    /// See [`Enforcer::enforce`].
    pub fn enforce_ex(&self, request: &[String]) -> Result<(bool, Vec<Rule>), EnforcerError> {
        self.enforce_ptype("p", request, None)
    }

    /// `enforce_with_matcher`: evaluate an ad-hoc matcher (compiled but not
    /// cached) instead of the model's own.
    ///
    /// # Errors
    ///
    /// See [`Enforcer::enforce`], plus a [`crate::error::MatcherError::Parse`]
    /// if `matcher_text` fails to compile.
    pub fn enforce_with_matcher(&self, matcher_text: &str, request: &[String]) -> Result<bool, EnforcerError> {
        Ok(self.enforce_ex_with_matcher(matcher_text, request)?.0)
    }

    /// As [`Enforcer::enforce_with_matcher`], plus deciding rules.
    ///
    /// # Errors
    ///
    /// See [`Enforcer::enforce_with_matcher`].
    pub fn enforce_ex_with_matcher(
        &self,
        matcher_text: &str,
        request: &[String],
    ) -> Result<(bool, Vec<Rule>), EnforcerError> {
        self.enforce_ptype("p", request, Some(matcher_text))
    }

    /// Evaluate every request in `requests` against `enforce`.
    ///
    /// Per spec.md §4.7.1, evaluation MAY proceed in parallel since every
    /// request reads the same immutable snapshot; this implementation
    /// evaluates sequentially, which is observably identical and avoids
    /// pulling in a data-parallelism crate the rest of the stack doesn't
    /// use.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered, in request order.
    pub fn batch_enforce(&self, requests: &[Vec<String>]) -> Result<Vec<bool>, EnforcerError> {
        requests.iter().map(|r| self.enforce(r)).collect()
    }

    /// As [`Enforcer::batch_enforce`], plus deciding rules per request.
    ///
    /// # Errors
    ///
    /// See [`Enforcer::batch_enforce`].
    pub fn batch_enforce_ex(&self, requests: &[Vec<String>]) -> Result<Vec<(bool, Vec<Rule>)>, EnforcerError> {
        requests.iter().map(|r| self.enforce_ex(r)).collect()
    }

    fn enforce_ptype(
        &self,
        ptype: &str,
        request: &[String],
        ad_hoc_matcher: Option<&str>,
    ) -> Result<(bool, Vec<Rule>), EnforcerError> {
        if !self.options().enabled {
            return Ok((true, Vec::new()));
        }

        let request_def = self
            .model
            .request_def("r")
            .ok_or_else(|| ModelError::MissingAssertion("request_definition (r)".into()))?;
        let policy_def =
            self.model.policy_def(ptype).ok_or_else(|| ModelError::UnknownPtype { ptype: ptype.to_owned() })?;
        if request.len() != request_def.tokens.len() {
            return Err(ModelError::ArityMismatch {
                ptype: request_def.key.clone(),
                expected: request_def.tokens.len(),
                actual: request.len(),
            }
            .into());
        }

        let cache_key = (ptype.to_owned(), request.to_vec());
        if ad_hoc_matcher.is_none() {
            if let Some(cache) = read(&self.decision_cache).as_ref() {
                if let Some(cached) = cache.get(&cache_key) {
                    return Ok((cached, Vec::new()));
                }
            }
        }

        let effect_key = paired_effect_key(ptype);
        let effect_def = self
            .model
            .effect_def(&effect_key)
            .ok_or_else(|| ModelError::UnknownPtype { ptype: effect_key.clone() })?;

        let matcher = match ad_hoc_matcher {
            Some(text) => Arc::new(crate::matcher::Matcher::compile(text)?),
            None => {
                let matcher_key = paired_matcher_key(ptype);
                let matcher_def = self
                    .model
                    .matcher_def(&matcher_key)
                    .ok_or_else(|| ModelError::UnknownPtype { ptype: matcher_key.clone() })?;
                self.matcher_cache.get_or_compile(&matcher_def.raw)?
            }
        };

        let accept_json = self.options().accept_json_request;
        let request_bindings = bind_fields(&request_def.tokens, request, "r", accept_json);
        let functions = read(&self.functions);
        let role_manager_refs: HashMap<String, &RoleManager> =
            self.role_managers.iter().map(|(k, v)| (k.clone(), v)).collect();

        let mut rules = self.store.get(ptype);
        let used_virtual_rule = rules.is_empty();
        if used_virtual_rule {
            rules.push(vec![String::new(); policy_def.arity()]);
        }

        let mut outcomes = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            if rule.len() != policy_def.arity() {
                return Err(ModelError::ArityMismatch {
                    ptype: ptype.to_owned(),
                    expected: policy_def.arity(),
                    actual: rule.len(),
                }
                .into());
            }
            let mut bindings = request_bindings.clone();
            bindings.extend(bind_fields(&policy_def.tokens, rule, ptype, false));
            let ctx = EvalContext {
                bindings: &bindings,
                functions: &functions,
                role_managers: &role_manager_refs,
            };
            let matched = match evaluate(matcher.ast(), &ctx).and_then(|v| {
                v.as_bool().map_err(|reason| crate::error::MatcherError::TypeError { reason })
            }) {
                Ok(matched) => matched,
                Err(error) => {
                    warn!(ptype, rule_index = index, %error, "matcher evaluation failed; rule treated as not matched");
                    false
                }
            };
            let eft = policy_def.eft_index.map_or(Effect::Allow, |i| Effect::from_field(&rule[i]));
            let priority = policy_def.priority_index.and_then(|i| rule[i].parse::<i64>().ok());
            outcomes.push(RuleOutcome { matched, eft, priority });
        }

        let decision = effect::combine(effect_def.mode, &outcomes);
        let deciding_rules: Vec<Rule> =
            if used_virtual_rule { Vec::new() } else { decision.deciding_rules.iter().map(|&i| rules[i].clone()).collect() };

        if ad_hoc_matcher.is_none() {
            if let Some(cache) = read(&self.decision_cache).as_ref() {
                cache.put(cache_key, decision.allowed);
            }
        }

        Ok((decision.allowed, deciding_rules))
    }

    // ---- Mutation primitives (spec.md §4.7.2) -------------------------

    /// Add `rule` under `ptype` without touching the adapter, watcher, or
    /// dispatcher (the "Self-" family, spec.md §4.7.2).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError::DuplicatePolicy`] if `rule` is
    /// already present.
    pub fn add_policy_self(&self, ptype: &str, rule: Rule) -> Result<(), EnforcerError> {
        self.store.add(ptype, rule.clone())?;
        self.mirror_add(ptype, &rule);
        self.invalidate_decision_cache();
        Ok(())
    }

    /// Add `rule` under `ptype`, persisting and notifying per the
    /// configured flags.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError::DuplicatePolicy`] or, on adapter
    /// failure, [`EnforcerError::Adapter`] (the store mutation is reverted
    /// first).
    pub async fn add_policy(&self, ptype: &str, rule: Rule) -> Result<(), EnforcerError> {
        let _guard = self.mutation_lock.lock().await;
        *write(&self.state) = EnforcerState::Mutating;
        let result = self.add_policy_locked(ptype, rule).await;
        *write(&self.state) = EnforcerState::Ready;
        result
    }

    async fn add_policy_locked(&self, ptype: &str, rule: Rule) -> Result<(), EnforcerError> {
        self.store.add(ptype, rule.clone())?;
        self.mirror_add(ptype, &rule);
        if self.options().auto_save {
            if let Some(adapter) = &self.adapter {
                if let Err(error) = adapter.add_policy(self.section_of(ptype), ptype, &rule).await {
                    let _ = self.store.remove(ptype, &rule);
                    self.mirror_remove(ptype, &rule);
                    return Err(error.into());
                }
            }
        }
        self.notify_add(ptype, std::slice::from_ref(&rule)).await;
        self.invalidate_decision_cache();
        Ok(())
    }

    /// Batch form of [`Enforcer::add_policy_self`]: all-or-nothing.
    ///
    /// # Errors
    ///
    /// See [`PolicyStore::add_many`].
    pub fn add_policies_self(&self, ptype: &str, rules: Vec<Rule>) -> Result<(), EnforcerError> {
        self.store.add_many(ptype, rules.clone())?;
        for rule in &rules {
            self.mirror_add(ptype, rule);
        }
        self.invalidate_decision_cache();
        Ok(())
    }

    /// Batch form of [`Enforcer::add_policy`].
    ///
    /// # Errors
    ///
    /// See [`Enforcer::add_policy`].
    pub async fn add_policies(&self, ptype: &str, rules: Vec<Rule>) -> Result<(), EnforcerError> {
        let _guard = self.mutation_lock.lock().await;
        *write(&self.state) = EnforcerState::Mutating;
        let result = async {
            self.store.add_many(ptype, rules.clone())?;
            for rule in &rules {
                self.mirror_add(ptype, rule);
            }
            if self.options().auto_save {
                if let Some(adapter) = &self.adapter {
                    let sec = self.section_of(ptype);
                    let added = match adapter.as_batch() {
                        Some(batch) => batch.add_policies(sec, ptype, &rules).await,
                        None => {
                            let mut result = Ok(());
                            for rule in &rules {
                                if let Err(e) = adapter.add_policy(sec, ptype, rule).await {
                                    result = Err(e);
                                    break;
                                }
                            }
                            result
                        }
                    };
                    if let Err(error) = added {
                        for rule in &rules {
                            let _ = self.store.remove(ptype, rule);
                            self.mirror_remove(ptype, rule);
                        }
                        return Err(error.into());
                    }
                }
            }
            self.notify_add(ptype, &rules).await;
            self.invalidate_decision_cache();
            Ok(())
        }
        .await;
        *write(&self.state) = EnforcerState::Ready;
        result
    }

    /// Batch form of [`Enforcer::add_policy_self`] that skips duplicates
    /// instead of rejecting the whole batch (spec.md §4.2's "ex" mode).
    /// Returns the count actually added.
    pub fn add_policies_ex_self(&self, ptype: &str, rules: Vec<Rule>) -> usize {
        let before = self.store.get(ptype);
        let added_count = self.store.add_many_ex(ptype, rules.clone());
        for rule in rules.iter().filter(|r| !before.contains(r)) {
            self.mirror_add(ptype, rule);
        }
        self.invalidate_decision_cache();
        added_count
    }

    /// Batch form of [`Enforcer::add_policy`] that skips duplicates instead
    /// of rejecting the whole batch. Only the rules actually added are
    /// persisted and notified.
    ///
    /// # Errors
    ///
    /// See [`Enforcer::add_policy`].
    pub async fn add_policies_ex(&self, ptype: &str, rules: Vec<Rule>) -> Result<usize, EnforcerError> {
        let _guard = self.mutation_lock.lock().await;
        *write(&self.state) = EnforcerState::Mutating;
        let result = async {
            let before = self.store.get(ptype);
            let added_count = self.store.add_many_ex(ptype, rules.clone());
            let added: Vec<Rule> = rules.into_iter().filter(|r| !before.contains(r)).collect();
            for rule in &added {
                self.mirror_add(ptype, rule);
            }
            if self.options().auto_save {
                if let Some(adapter) = &self.adapter {
                    let sec = self.section_of(ptype);
                    let result = match adapter.as_batch() {
                        Some(batch) => batch.add_policies(sec, ptype, &added).await,
                        None => {
                            let mut result = Ok(());
                            for rule in &added {
                                if let Err(e) = adapter.add_policy(sec, ptype, rule).await {
                                    result = Err(e);
                                    break;
                                }
                            }
                            result
                        }
                    };
                    if let Err(error) = result {
                        for rule in &added {
                            let _ = self.store.remove(ptype, rule);
                            self.mirror_remove(ptype, rule);
                        }
                        return Err(error.into());
                    }
                }
            }
            self.notify_add(ptype, &added).await;
            self.invalidate_decision_cache();
            Ok(added_count)
        }
        .await;
        *write(&self.state) = EnforcerState::Ready;
        result
    }

    /// Remove `rule` under `ptype` without touching the adapter, watcher,
    /// or dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError::PolicyNotFound`] if absent.
    pub fn remove_policy_self(&self, ptype: &str, rule: &[String]) -> Result<(), EnforcerError> {
        self.store.remove(ptype, rule)?;
        self.mirror_remove(ptype, rule);
        self.invalidate_decision_cache();
        Ok(())
    }

    /// Remove `rule` under `ptype`, persisting and notifying.
    ///
    /// # Errors
    ///
    /// See [`Enforcer::remove_policy_self`] and [`Enforcer::add_policy`].
    pub async fn remove_policy(&self, ptype: &str, rule: Rule) -> Result<(), EnforcerError> {
        let _guard = self.mutation_lock.lock().await;
        *write(&self.state) = EnforcerState::Mutating;
        let result = async {
            self.store.remove(ptype, &rule)?;
            self.mirror_remove(ptype, &rule);
            if self.options().auto_save {
                if let Some(adapter) = &self.adapter {
                    if let Err(error) = adapter.remove_policy(self.section_of(ptype), ptype, &rule).await {
                        let _ = self.store.add(ptype, rule.clone());
                        self.mirror_add(ptype, &rule);
                        return Err(error.into());
                    }
                }
            }
            self.notify_watcher().await;
            if self.options().auto_notify_dispatcher {
                if let Some(d) = &self.dispatcher {
                    d.remove_policies(ptype, std::slice::from_ref(&rule)).await;
                }
            }
            self.invalidate_decision_cache();
            Ok(())
        }
        .await;
        *write(&self.state) = EnforcerState::Ready;
        result
    }

    /// Remove every rule under `ptype` matching `field_values` at
    /// `field_index`, without touching the adapter/watcher/dispatcher.
    #[must_use]
    pub fn remove_filtered_policy_self(&self, ptype: &str, field_index: usize, field_values: &[String]) -> Vec<Rule> {
        let removed = self.store.remove_filtered(ptype, field_index, field_values);
        for rule in &removed {
            self.mirror_remove(ptype, rule);
        }
        self.invalidate_decision_cache();
        removed
    }

    /// Remove every rule under `ptype` matching `field_values` at
    /// `field_index`, persisting and notifying. Returns the removed rules.
    ///
    /// # Errors
    ///
    /// On adapter failure, the store mutation is reverted and
    /// [`EnforcerError::Adapter`] is returned.
    pub async fn remove_filtered_policy(
        &self,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Rule>, EnforcerError> {
        let _guard = self.mutation_lock.lock().await;
        *write(&self.state) = EnforcerState::Mutating;
        let result = async {
            let removed = self.store.remove_filtered(ptype, field_index, field_values);
            for rule in &removed {
                self.mirror_remove(ptype, rule);
            }
            if self.options().auto_save {
                if let Some(adapter) = &self.adapter {
                    let sec = self.section_of(ptype);
                    if let Err(error) = adapter.remove_filtered_policy(sec, ptype, field_index, field_values).await {
                        for rule in &removed {
                            let _ = self.store.add(ptype, rule.clone());
                            self.mirror_add(ptype, rule);
                        }
                        return Err(error.into());
                    }
                }
            }
            self.notify_watcher().await;
            if self.options().auto_notify_dispatcher {
                if let Some(d) = &self.dispatcher {
                    d.remove_policies(ptype, &removed).await;
                }
            }
            self.invalidate_decision_cache();
            Ok(removed)
        }
        .await;
        *write(&self.state) = EnforcerState::Ready;
        result
    }

    /// Replace `old` with `new` under `ptype`, without touching the
    /// adapter/watcher/dispatcher.
    ///
    /// # Errors
    ///
    /// See [`PolicyStore::update`].
    pub fn update_policy_self(&self, ptype: &str, old: &[String], new: Rule) -> Result<(), EnforcerError> {
        self.store.update(ptype, old, new.clone())?;
        self.mirror_remove(ptype, old);
        self.mirror_add(ptype, &new);
        self.invalidate_decision_cache();
        Ok(())
    }

    /// Replace `old` with `new` under `ptype`, persisting and notifying.
    ///
    /// # Errors
    ///
    /// See [`Enforcer::update_policy_self`] and [`Enforcer::add_policy`].
    pub async fn update_policy(&self, ptype: &str, old: Rule, new: Rule) -> Result<(), EnforcerError> {
        let _guard = self.mutation_lock.lock().await;
        *write(&self.state) = EnforcerState::Mutating;
        let result = async {
            self.store.update(ptype, &old, new.clone())?;
            self.mirror_remove(ptype, &old);
            self.mirror_add(ptype, &new);
            if self.options().auto_save {
                if let Some(adapter) = &self.adapter {
                    let sec = self.section_of(ptype);
                    let outcome = match adapter.as_update() {
                        Some(update) => update.update_policy(sec, ptype, &old, &new).await,
                        None => adapter
                            .remove_policy(sec, ptype, &old)
                            .await
                            .and(adapter.add_policy(sec, ptype, &new).await),
                    };
                    if let Err(error) = outcome {
                        let _ = self.store.update(ptype, &new, old.clone());
                        self.mirror_remove(ptype, &new);
                        self.mirror_add(ptype, &old);
                        return Err(error.into());
                    }
                }
            }
            self.notify_watcher().await;
            self.invalidate_decision_cache();
            Ok(())
        }
        .await;
        *write(&self.state) = EnforcerState::Ready;
        result
    }

    fn section_of(&self, ptype: &str) -> Section {
        if self.model.role_def(ptype).is_some() {
            Section::Grouping
        } else {
            Section::Policy
        }
    }

    fn mirror_add(&self, ptype: &str, rule: &[String]) {
        if !self.options().auto_build_role_links {
            return;
        }
        let Some(role_def) = self.model.role_def(ptype) else {
            return;
        };
        let Some(rm) = self.role_managers.get(ptype) else {
            return;
        };
        add_grouping_edge(rm, role_def.has_domain(), rule);
    }

    fn mirror_remove(&self, ptype: &str, rule: &[String]) {
        if !self.options().auto_build_role_links {
            return;
        }
        let Some(role_def) = self.model.role_def(ptype) else {
            return;
        };
        let Some(rm) = self.role_managers.get(ptype) else {
            return;
        };
        remove_grouping_edge(rm, role_def.has_domain(), rule);
    }

    async fn notify_watcher(&self) {
        if self.options().auto_notify_watcher {
            if let Some(w) = &self.watcher {
                w.update().await;
            }
        }
    }

    async fn notify_add(&self, ptype: &str, rules: &[Rule]) {
        if self.options().auto_notify_watcher {
            if let Some(w) = &self.watcher {
                for rule in rules {
                    w.update_for_add_policy(ptype, rule).await;
                }
            }
        }
        if self.options().auto_notify_dispatcher {
            if let Some(d) = &self.dispatcher {
                d.add_policies(ptype, rules).await;
            }
        }
    }

    // ---- RBAC convenience API (spec.md §4.7.3) -------------------------

    fn default_grouping_ptype(&self) -> Option<&str> {
        self.model.role_defs().first().map(|d| d.key.as_str())
    }

    /// `add_role_for_user(u, r [, d])`.
    ///
    /// # Errors
    ///
    /// Returns [`EnforcerError`] if no grouping definition exists, or if
    /// the domain form is used against a 2-arity grouping definition.
    pub async fn add_role_for_user(&self, user: &str, role: &str, domain: Option<&str>) -> Result<(), EnforcerError> {
        let ptype = self.grouping_ptype_for(domain)?;
        let rule = grouping_rule(user, role, domain);
        self.add_policy(&ptype, rule).await
    }

    /// `get_roles_for_user(u [, d])`.
    #[must_use]
    pub fn get_roles_for_user(&self, user: &str, domain: Option<&str>) -> Vec<String> {
        let Some(ptype) = self.default_grouping_ptype() else {
            return Vec::new();
        };
        let Some(rm) = self.role_managers.get(ptype) else {
            return Vec::new();
        };
        rm.get_roles(user, domain.unwrap_or(""))
    }

    /// `has_role_for_user(u, r [, d])`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RoleGraphError::MaxHierarchyExceeded`] if
    /// traversal exceeds the configured bound.
    pub fn has_role_for_user(&self, user: &str, role: &str, domain: Option<&str>) -> Result<bool, EnforcerError> {
        let Some(ptype) = self.default_grouping_ptype() else {
            return Ok(false);
        };
        let Some(rm) = self.role_managers.get(ptype) else {
            return Ok(false);
        };
        Ok(rm.has_link(user, role, domain.unwrap_or(""))?)
    }

    /// `delete_roles_for_user(u [, d])`: remove every grouping rule whose
    /// subject is `user`.
    pub fn delete_roles_for_user(&self, user: &str, domain: Option<&str>) {
        let Some(ptype) = self.default_grouping_ptype().map(str::to_owned) else {
            return;
        };
        let field_values: Vec<String> = match domain {
            Some(d) => vec![user.to_owned(), String::new(), d.to_owned()],
            None => vec![user.to_owned()],
        };
        self.remove_filtered_policy_self(&ptype, 0, &field_values);
    }

    /// `delete_user(u)`: remove every policy and grouping rule whose first
    /// field is `user`, and prune the role graph.
    pub fn delete_user(&self, user: &str) {
        for policy_def in self.model.policy_defs() {
            self.remove_filtered_policy_self(&policy_def.key, 0, &[user.to_owned()]);
        }
        for role_def in self.model.role_defs() {
            self.remove_filtered_policy_self(&role_def.key, 0, &[user.to_owned()]);
        }
    }

    /// `delete_role(r)`: remove every grouping rule naming `role`, and
    /// every policy rule whose subject equals `role`.
    pub fn delete_role(&self, role: &str) {
        for role_def in self.model.role_defs() {
            self.remove_filtered_policy_self(&role_def.key, 1, &[role.to_owned()]);
        }
        for policy_def in self.model.policy_defs() {
            self.remove_filtered_policy_self(&policy_def.key, 0, &[role.to_owned()]);
        }
    }

    /// `add_permission_for_user(u, permission)`: add policy rule
    /// `[u, ...permission]`.
    ///
    /// # Errors
    ///
    /// See [`Enforcer::add_policy`].
    pub async fn add_permission_for_user(&self, user: &str, permission: &[String]) -> Result<(), EnforcerError> {
        let mut rule = vec![user.to_owned()];
        rule.extend_from_slice(permission);
        self.add_policy("p", rule).await
    }

    /// `has_permission_for_user(u, permission)`.
    #[must_use]
    pub fn has_permission_for_user(&self, user: &str, permission: &[String]) -> bool {
        let mut rule = vec![user.to_owned()];
        rule.extend_from_slice(permission);
        self.store.has("p", &rule)
    }

    /// `get_permissions_for_user(u [, d])`: direct "p" rules whose subject
    /// is `user`, with the domain field stripped per spec.md §9's
    /// tie-break ("strip iff the rule's last field equals the requested
    /// domain").
    #[must_use]
    pub fn get_permissions_for_user(&self, user: &str, domain: Option<&str>) -> Vec<Rule> {
        self.store
            .get_filtered("p", 0, &[user.to_owned()])
            .into_iter()
            .map(|mut rule| {
                if let Some(d) = domain {
                    if rule.last().is_some_and(|last| last == d) {
                        rule.pop();
                    }
                }
                rule
            })
            .collect()
    }

    /// `get_implicit_roles_for_user(u [, d])`.
    #[must_use]
    pub fn get_implicit_roles_for_user(&self, user: &str, domain: Option<&str>) -> Vec<String> {
        let Some(ptype) = self.default_grouping_ptype() else {
            return Vec::new();
        };
        let Some(rm) = self.role_managers.get(ptype) else {
            return Vec::new();
        };
        rm.get_implicit_roles(user, domain.unwrap_or(""))
    }

    /// `get_implicit_permissions_for_user(u [, d])`: direct permissions for
    /// `u`, unioned with direct permissions for every implicit role.
    #[must_use]
    pub fn get_implicit_permissions_for_user(&self, user: &str, domain: Option<&str>) -> Vec<Rule> {
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for subject in std::iter::once(user.to_owned()).chain(self.get_implicit_roles_for_user(user, domain)) {
            for rule in self.get_permissions_for_user(&subject, domain) {
                if seen.insert(rule.clone()) {
                    result.push(rule);
                }
            }
        }
        result
    }

    /// `get_implicit_users_for_permission(permission)`: every user that can
    /// reach `permission`'s subject transitively through the role graph.
    #[must_use]
    pub fn get_implicit_users_for_permission(&self, permission: &[String]) -> Vec<String> {
        let Some(subject) = permission.first() else {
            return Vec::new();
        };
        let Some(ptype) = self.default_grouping_ptype() else {
            return vec![subject.clone()];
        };
        let Some(rm) = self.role_managers.get(ptype) else {
            return vec![subject.clone()];
        };
        let mut users = rm.get_implicit_users(subject, "");
        users.push(subject.clone());
        users
    }

    /// `has_policy(p, rule)`: thin wrapper over [`PolicyStore::has`].
    #[must_use]
    pub fn has_policy(&self, ptype: &str, rule: &[String]) -> bool {
        self.store.has(ptype, rule)
    }

    /// `has_grouping_policy(g, rule)`: thin wrapper over [`PolicyStore::has`],
    /// named separately so callers don't need to know which ptype string
    /// their grouping rules live under.
    #[must_use]
    pub fn has_grouping_policy(&self, ptype: &str, rule: &[String]) -> bool {
        self.store.has(ptype, rule)
    }

    /// Distinct values at a named field of `ptype`'s request/policy
    /// definition, in first-seen order across `store.get(ptype)`.
    fn distinct_field(&self, ptype: &str, field_name: &str) -> Vec<String> {
        let Some(policy_def) = self.model.policy_def(ptype) else {
            return Vec::new();
        };
        let Some(index) = policy_def.tokens.iter().position(|t| t == field_name) else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for rule in self.store.get(ptype) {
            if let Some(value) = rule.get(index) {
                if seen.insert(value.clone()) {
                    result.push(value.clone());
                }
            }
        }
        result
    }

    /// `get_all_subjects()`: every distinct `sub` value across the default
    /// policy ptype's rules.
    #[must_use]
    pub fn get_all_subjects(&self) -> Vec<String> {
        self.distinct_field("p", "sub")
    }

    /// `get_all_objects()`: every distinct `obj` value across the default
    /// policy ptype's rules.
    #[must_use]
    pub fn get_all_objects(&self) -> Vec<String> {
        self.distinct_field("p", "obj")
    }

    /// `get_all_actions()`: every distinct `act` value across the default
    /// policy ptype's rules.
    #[must_use]
    pub fn get_all_actions(&self) -> Vec<String> {
        self.distinct_field("p", "act")
    }

    /// `get_all_roles()`: every distinct value in the second field of the
    /// default grouping ptype's rules (the "role" side of `user, role[,
    /// domain]`).
    #[must_use]
    pub fn get_all_roles(&self) -> Vec<String> {
        let Some(ptype) = self.default_grouping_ptype() else {
            return Vec::new();
        };
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for rule in self.store.get(ptype) {
            if let Some(role) = rule.get(1) {
                if seen.insert(role.clone()) {
                    result.push(role.clone());
                }
            }
        }
        result
    }

    fn grouping_ptype_for(&self, domain: Option<&str>) -> Result<String, EnforcerError> {
        let ptype = self
            .default_grouping_ptype()
            .ok_or_else(|| ModelError::MissingAssertion("role_definition (g)".into()))?
            .to_owned();
        if domain.is_some() {
            let has_domain = self.model.role_def(&ptype).is_some_and(crate::model::RoleDef::has_domain);
            if !has_domain {
                let arity = self.model.role_def(&ptype).map_or(0, |d| d.tokens.len());
                return Err(ModelError::NoDomain { ptype: ptype.clone(), arity }.into());
            }
        }
        Ok(ptype)
    }
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer").field("state", &self.state()).finish_non_exhaustive()
    }
}

fn grouping_rule(user: &str, role: &str, domain: Option<&str>) -> Rule {
    match domain {
        Some(d) => vec![user.to_owned(), role.to_owned(), d.to_owned()],
        None => vec![user.to_owned(), role.to_owned()],
    }
}

fn add_grouping_edge(rm: &RoleManager, has_domain: bool, rule: &[String]) {
    if has_domain && rule.len() >= 3 {
        rm.add_link(&rule[0], &rule[1], &rule[2]);
    } else if rule.len() >= 2 {
        rm.add_link(&rule[0], &rule[1], "");
    }
}

fn remove_grouping_edge(rm: &RoleManager, has_domain: bool, rule: &[String]) {
    if has_domain && rule.len() >= 3 {
        rm.delete_link(&rule[0], &rule[1], &rule[2]);
    } else if rule.len() >= 2 {
        rm.delete_link(&rule[0], &rule[1], "");
    }
}

fn build_role_managers(model: &Model) -> HashMap<String, RoleManager> {
    model.role_defs().iter().map(|role_def| (role_def.key.clone(), RoleManager::new())).collect()
}

/// `e` pairs with `p`, `e2` with `p2`: mirrors [`crate::model`]'s own
/// pairing convention.
fn paired_effect_key(ptype: &str) -> String {
    let suffix = ptype.strip_prefix('p').unwrap_or(ptype);
    format!("e{suffix}")
}

/// `m` pairs with `p`, `m2` with `p2`.
fn paired_matcher_key(ptype: &str) -> String {
    let suffix = ptype.strip_prefix('p').unwrap_or(ptype);
    format!("m{suffix}")
}

fn bind_fields(names: &[String], values: &[String], prefix: &str, accept_json: bool) -> HashMap<String, Value> {
    names
        .iter()
        .zip(values)
        .map(|(name, value)| {
            let v = if accept_json {
                serde_json::from_str::<serde_json::Value>(value)
                    .ok()
                    .filter(serde_json::Value::is_object)
                    .map_or_else(|| Value::Str(value.clone()), Value::Json)
            } else {
                Value::Str(value.clone())
            };
            (format!("{prefix}.{name}"), v)
        })
        .collect()
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

    const BASIC_ACL: &str = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";

    fn rule(fields: &[&str]) -> Rule {
        fields.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn basic_acl_scenario_s1() {
        let enforcer = Enforcer::from_model_text(BASIC_ACL).unwrap();
        enforcer.add_policy_self("p", rule(&["alice", "data1", "read"])).unwrap();
        enforcer.add_policy_self("p", rule(&["bob", "data2", "write"])).unwrap();

        assert!(enforcer.enforce(&rule(&["alice", "data1", "read"])).unwrap());
        assert!(!enforcer.enforce(&rule(&["alice", "data1", "write"])).unwrap());
        assert!(enforcer.enforce(&rule(&["bob", "data2", "write"])).unwrap());
        assert!(!enforcer.enforce(&rule(&["bob", "data1", "read"])).unwrap());
    }

    #[test]
    fn introspection_helpers_collect_distinct_fields() {
        let enforcer = Enforcer::from_model_text(BASIC_ACL).unwrap();
        enforcer.add_policy_self("p", rule(&["alice", "data1", "read"])).unwrap();
        enforcer.add_policy_self("p", rule(&["bob", "data2", "write"])).unwrap();
        enforcer.add_policy_self("p", rule(&["alice", "data2", "write"])).unwrap();

        assert_eq!(enforcer.get_all_subjects(), vec!["alice".to_owned(), "bob".to_owned()]);
        assert_eq!(enforcer.get_all_objects(), vec!["data1".to_owned(), "data2".to_owned()]);
        assert_eq!(enforcer.get_all_actions(), vec!["read".to_owned(), "write".to_owned()]);
        assert!(enforcer.has_policy("p", &rule(&["alice", "data1", "read"])));
        assert!(!enforcer.has_policy("p", &rule(&["carol", "data1", "read"])));
    }

    #[test]
    fn disabled_enforcer_always_allows() {
        let enforcer = Enforcer::from_model_text(BASIC_ACL).unwrap();
        enforcer.set_enabled(false);
        assert!(enforcer.enforce(&rule(&["nobody", "nothing", "nothing"])).unwrap());
    }

    #[tokio::test]
    async fn add_policy_persists_through_adapter() {
        let adapter: Arc<dyn Adapter> = Arc::new(warden_storage::MemoryAdapter::new());
        let enforcer = Enforcer::from_model_text(BASIC_ACL).unwrap().with_adapter(Arc::clone(&adapter));
        enforcer.add_policy("p", rule(&["alice", "data1", "read"])).await.unwrap();

        let loaded = adapter.load_policy(enforcer.model()).await.unwrap();
        assert_eq!(loaded.policies["p"], vec![rule(&["alice", "data1", "read"])]);
    }

    #[test]
    fn rbac_with_inheritance_scenario_s2() {
        const MODEL: &str = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[role_definition]
g = _, _
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
";
        let enforcer = Enforcer::from_model_text(MODEL).unwrap();
        enforcer.add_policy_self("g", rule(&["alice", "admin"])).unwrap();
        enforcer.add_policy_self("p", rule(&["admin", "data1", "read"])).unwrap();

        assert!(enforcer.enforce(&rule(&["alice", "data1", "read"])).unwrap());
        assert!(!enforcer.enforce(&rule(&["bob", "data1", "read"])).unwrap());
        assert_eq!(enforcer.get_implicit_roles_for_user("alice", None), vec!["admin".to_owned()]);
        assert_eq!(enforcer.get_all_roles(), vec!["admin".to_owned()]);
        assert!(enforcer.has_grouping_policy("g", &rule(&["alice", "admin"])));
    }

    #[test]
    fn deny_override_scenario_s4() {
        const MODEL: &str = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act, eft
[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))
[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";
        let enforcer = Enforcer::from_model_text(MODEL).unwrap();
        enforcer.add_policy_self("p", rule(&["alice", "data", "read", "allow"])).unwrap();
        enforcer.add_policy_self("p", rule(&["alice", "data", "read", "deny"])).unwrap();

        assert!(!enforcer.enforce(&rule(&["alice", "data", "read"])).unwrap());
    }

    #[test]
    fn priority_scenario_s5() {
        const MODEL: &str = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = priority, sub, obj, act, eft
[policy_effect]
e = priority(p.eft) || deny
[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";
        let enforcer = Enforcer::from_model_text(MODEL).unwrap();
        enforcer.add_policy_self("p", rule(&["1", "alice", "data", "read", "allow"])).unwrap();
        enforcer.add_policy_self("p", rule(&["2", "alice", "data", "read", "deny"])).unwrap();
        assert!(enforcer.enforce(&rule(&["alice", "data", "read"])).unwrap());

        let swapped = Enforcer::from_model_text(MODEL).unwrap();
        swapped.add_policy_self("p", rule(&["2", "alice", "data", "read", "deny"])).unwrap();
        swapped.add_policy_self("p", rule(&["1", "alice", "data", "read", "allow"])).unwrap();
        assert!(!swapped.enforce(&rule(&["alice", "data", "read"])).unwrap());
    }

    #[test]
    fn key_match_and_role_scenario_s6() {
        const MODEL: &str = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[role_definition]
g = _, _
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act
";
        let enforcer = Enforcer::from_model_text(MODEL).unwrap();
        enforcer.add_policy_self("g", rule(&["alice", "admin"])).unwrap();
        enforcer.add_policy_self("p", rule(&["admin", "/api/*", "GET"])).unwrap();

        assert!(enforcer.enforce(&rule(&["alice", "/api/users", "GET"])).unwrap());
        assert!(!enforcer.enforce(&rule(&["alice", "/api/users", "POST"])).unwrap());
    }

    #[test]
    fn empty_policy_store_uses_virtual_rule() {
        let enforcer = Enforcer::from_model_text(BASIC_ACL).unwrap();
        assert!(!enforcer.enforce(&rule(&["alice", "data1", "read"])).unwrap());
    }

    #[test]
    fn batch_enforce_matches_single_enforce() {
        let enforcer = Enforcer::from_model_text(BASIC_ACL).unwrap();
        enforcer.add_policy_self("p", rule(&["alice", "data1", "read"])).unwrap();
        let requests = vec![rule(&["alice", "data1", "read"]), rule(&["bob", "data1", "read"])];
        let batch = enforcer.batch_enforce(&requests).unwrap();
        for (req, result) in requests.iter().zip(&batch) {
            assert_eq!(enforcer.enforce(req).unwrap(), *result);
        }
    }

    #[test]
    fn remove_policy_self_drops_rule() {
        let enforcer = Enforcer::from_model_text(BASIC_ACL).unwrap();
        enforcer.add_policy_self("p", rule(&["alice", "data1", "read"])).unwrap();
        enforcer.remove_policy_self("p", &rule(&["alice", "data1", "read"])).unwrap();
        assert!(!enforcer.enforce(&rule(&["alice", "data1", "read"])).unwrap());
    }

    #[test]
    fn delete_user_prunes_policy_and_role_rules() {
        const MODEL: &str = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[role_definition]
g = _, _
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
";
        let enforcer = Enforcer::from_model_text(MODEL).unwrap();
        enforcer.add_policy_self("g", rule(&["alice", "admin"])).unwrap();
        enforcer.add_policy_self("p", rule(&["alice", "data1", "read"])).unwrap();
        enforcer.delete_user("alice");
        assert!(enforcer.store().get("p").is_empty());
        assert!(enforcer.get_roles_for_user("alice", None).is_empty());
    }

    #[test]
    fn decision_cache_is_invalidated_on_mutation() {
        let enforcer = Enforcer::from_model_text(BASIC_ACL)
            .unwrap()
            .with_options(EnforcerOptions {
                decision_cache_capacity: NonZeroUsize::new(8),
                ..EnforcerOptions::default()
            });
        assert!(!enforcer.enforce(&rule(&["alice", "data1", "read"])).unwrap());
        enforcer.add_policy_self("p", rule(&["alice", "data1", "read"])).unwrap();
        assert!(enforcer.enforce(&rule(&["alice", "data1", "read"])).unwrap());
    }

    #[test]
    fn add_policies_ex_self_skips_duplicates() {
        let enforcer = Enforcer::from_model_text(BASIC_ACL).unwrap();
        enforcer.add_policy_self("p", rule(&["alice", "data1", "read"])).unwrap();
        let added = enforcer.add_policies_ex_self(
            "p",
            vec![rule(&["bob", "data2", "write"]), rule(&["alice", "data1", "read"])],
        );
        assert_eq!(added, 1);
        assert!(enforcer.has_policy("p", &rule(&["bob", "data2", "write"])));
    }

    #[tokio::test]
    async fn add_policies_ex_persists_only_newly_added_rules() {
        let adapter: Arc<dyn Adapter> = Arc::new(warden_storage::MemoryAdapter::new());
        let enforcer = Enforcer::from_model_text(BASIC_ACL).unwrap().with_adapter(Arc::clone(&adapter));
        enforcer.add_policy("p", rule(&["alice", "data1", "read"])).await.unwrap();

        let added = enforcer
            .add_policies_ex(
                "p",
                vec![rule(&["bob", "data2", "write"]), rule(&["alice", "data1", "read"])],
            )
            .await
            .unwrap();
        assert_eq!(added, 1);

        let loaded = adapter.load_policy(enforcer.model()).await.unwrap();
        let mut policies = loaded.policies["p"].clone();
        policies.sort();
        assert_eq!(
            policies,
            vec![rule(&["alice", "data1", "read"]), rule(&["bob", "data2", "write"])]
        );
    }

    #[tokio::test]
    async fn remove_filtered_policy_persists_through_adapter() {
        let adapter: Arc<dyn Adapter> = Arc::new(warden_storage::MemoryAdapter::new());
        let enforcer = Enforcer::from_model_text(BASIC_ACL).unwrap().with_adapter(Arc::clone(&adapter));
        enforcer.add_policy("p", rule(&["alice", "data1", "read"])).await.unwrap();
        enforcer.add_policy("p", rule(&["alice", "data2", "write"])).await.unwrap();

        let removed = enforcer.remove_filtered_policy("p", 0, &["alice".to_owned()]).await.unwrap();
        assert_eq!(removed.len(), 2);

        let loaded = adapter.load_policy(enforcer.model()).await.unwrap();
        assert!(loaded.policies.get("p").is_none_or(Vec::is_empty));
        assert!(!enforcer.enforce(&rule(&["alice", "data1", "read"])).unwrap());
    }
}

//! Adapter abstraction for `warden`.
//!
//! This crate defines the [`Adapter`] trait — the only way the authorization
//! core talks to a persistence backend. It knows nothing about models,
//! matchers, or role graphs; it moves policy rule tuples in and out of
//! storage and nothing else.
//!
//! Everything beyond "load the rules, save the rules" is an optional
//! capability, expressed as a separate trait an adapter can additionally
//! implement ([`FilteredAdapter`], [`BatchAdapter`], [`UpdateAdapter`],
//! [`ContextAdapter`]). [`Adapter`] exposes `as_*` accessors so a caller can
//! query which capabilities a given adapter has without downcasting through
//! `dyn Any`.
//!
//! [`MemoryAdapter`] is the reference implementation: a plain in-memory store
//! used by `warden-core`'s own test suite and by callers who don't need
//! persistence at all.

mod error;
mod memory;

use std::collections::HashMap;
use std::time::Instant;

pub use error::AdapterError;
pub use memory::MemoryAdapter;

/// A policy-type discriminator (`p`, `p2`, `g`, `g2`, ...).
pub type Ptype = String;

/// An ordered tuple of strings — one policy or grouping rule.
pub type Rule = Vec<String>;

/// The policy section a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// A plain policy rule (`p`, `p2`, ...).
    Policy,
    /// A grouping / role-assignment rule (`g`, `g2`, ...).
    Grouping,
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Section::Policy => write!(f, "p"),
            Section::Grouping => write!(f, "g"),
        }
    }
}

/// The minimal view of a `Model` an adapter needs: which ptypes exist in
/// each section. `warden-core::Model` implements this; defining it here
/// (rather than depending on `warden-core`) keeps the storage layer free of
/// any dependency on the matcher/model crate.
pub trait ModelPtypes: Send + Sync {
    /// Policy-section ptypes declared by the model (`p`, `p2`, ...).
    fn policy_ptypes(&self) -> Vec<Ptype>;
    /// Grouping-section ptypes declared by the model (`g`, `g2`, ...).
    fn grouping_ptypes(&self) -> Vec<Ptype>;
}

/// The full set of rules for every ptype in both sections, as loaded from
/// or about to be written to an adapter.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    /// Policy-section rules, keyed by ptype.
    pub policies: HashMap<Ptype, Vec<Rule>>,
    /// Grouping-section rules, keyed by ptype.
    pub grouping: HashMap<Ptype, Vec<Rule>>,
}

impl PolicySet {
    /// An empty policy set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// A pluggable persistence backend for policy and grouping rules.
///
/// Only [`load_policy`](Adapter::load_policy) and
/// [`save_policy`](Adapter::save_policy) are mandatory (spec.md §6.2);
/// everything else is an optional capability an adapter advertises by
/// overriding the relevant `as_*` accessor.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Load every rule for every ptype declared by `model`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Load`] if the backend is unreachable or the
    /// stored data is malformed.
    async fn load_policy(&self, model: &dyn ModelPtypes) -> Result<PolicySet, AdapterError>;

    /// Persist the given policy set, replacing whatever was previously
    /// stored.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Save`] if the backend write fails.
    async fn save_policy(&self, policies: &PolicySet) -> Result<(), AdapterError>;

    /// Incrementally add one rule, or an error if the adapter can't apply it
    /// out-of-band from [`save_policy`](Adapter::save_policy).
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Add`] if the write fails.
    async fn add_policy(&self, sec: Section, ptype: &str, rule: &[String]) -> Result<(), AdapterError>;

    /// Incrementally remove one rule.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Remove`] if the write fails.
    async fn remove_policy(&self, sec: Section, ptype: &str, rule: &[String]) -> Result<(), AdapterError>;

    /// Remove all rules matching a field filter (spec.md §4.2
    /// `remove_filtered`). `field_values[i]` is matched against
    /// `rule[field_index + i]`; an empty string matches any value.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Remove`] if the write fails.
    async fn remove_filtered_policy(
        &self,
        sec: Section,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> Result<Vec<Rule>, AdapterError>;

    /// Whether this adapter was constructed with a load filter already
    /// applied (spec.md §6.2 `is_filtered`). Most adapters are unfiltered.
    fn is_filtered(&self) -> bool {
        false
    }

    /// This adapter's [`FilteredAdapter`] capability, if it has one.
    fn as_filtered(&self) -> Option<&dyn FilteredAdapter> {
        None
    }

    /// This adapter's [`BatchAdapter`] capability, if it has one.
    fn as_batch(&self) -> Option<&dyn BatchAdapter> {
        None
    }

    /// This adapter's [`UpdateAdapter`] capability, if it has one.
    fn as_update(&self) -> Option<&dyn UpdateAdapter> {
        None
    }

    /// This adapter's [`ContextAdapter`] capability, if it has one.
    fn as_context(&self) -> Option<&dyn ContextAdapter> {
        None
    }
}

/// An opaque per-ptype filter expression, interpreted by the adapter. Each
/// entry is matched positionally the way `remove_filtered` interprets
/// `field_values` — an empty string is a wildcard.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Filter rows for the policy section, keyed by ptype.
    pub p: HashMap<Ptype, Vec<String>>,
    /// Filter rows for the grouping section, keyed by ptype.
    pub g: HashMap<Ptype, Vec<String>>,
}

/// Adapters that can load only a subset of the stored rules.
#[async_trait::async_trait]
pub trait FilteredAdapter: Send + Sync {
    /// Load only rules matching `filter`, replacing any previously loaded
    /// policy set.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Load`] or [`AdapterError::InvalidFilter`].
    async fn load_filtered_policy(
        &self,
        model: &dyn ModelPtypes,
        filter: &Filter,
    ) -> Result<PolicySet, AdapterError>;

    /// Load rules matching `filter` and merge them into whatever is already
    /// loaded, rather than replacing it.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Load`] or [`AdapterError::InvalidFilter`].
    async fn load_incremental_filtered_policy(
        &self,
        model: &dyn ModelPtypes,
        filter: &Filter,
    ) -> Result<PolicySet, AdapterError>;
}

/// Adapters that can apply multi-rule mutations atomically in one round
/// trip, rather than one `add_policy`/`remove_policy` call per rule.
#[async_trait::async_trait]
pub trait BatchAdapter: Send + Sync {
    /// Add every rule in `rules`, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Add`] if any rule fails to apply.
    async fn add_policies(&self, sec: Section, ptype: &str, rules: &[Rule]) -> Result<(), AdapterError>;

    /// Remove every rule in `rules`, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Remove`] if any rule fails to apply.
    async fn remove_policies(&self, sec: Section, ptype: &str, rules: &[Rule]) -> Result<(), AdapterError>;
}

/// Adapters that can apply an in-place rule replacement without a
/// remove-then-add round trip.
#[async_trait::async_trait]
pub trait UpdateAdapter: Send + Sync {
    /// Replace `old` with `new` in place, preserving position.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Update`] if `old` is not present or the write
    /// fails.
    async fn update_policy(
        &self,
        sec: Section,
        ptype: &str,
        old: &[String],
        new: &[String],
    ) -> Result<(), AdapterError>;

    /// Replace each `olds[i]` with `news[i]`, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Update`] if any pair fails to apply.
    async fn update_policies(
        &self,
        sec: Section,
        ptype: &str,
        olds: &[Rule],
        news: &[Rule],
    ) -> Result<(), AdapterError>;
}

/// Adapters that support an explicit deadline on load, for callers that want
/// to bound blocking I/O (spec.md §5 "Cancellation & timeouts").
#[async_trait::async_trait]
pub trait ContextAdapter: Send + Sync {
    /// Load the full policy set, failing if `deadline` passes first.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Load`] on backend failure or timeout.
    async fn load_policy_with_deadline(
        &self,
        model: &dyn ModelPtypes,
        deadline: Instant,
    ) -> Result<PolicySet, AdapterError>;
}

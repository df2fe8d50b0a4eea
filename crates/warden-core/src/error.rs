//! Error types for `warden-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. This mirrors the reference codebase's one-enum-per-subsystem
//! convention: every fallible area of the engine gets its own
//! `thiserror`-derived type, and the top-level [`EnforcerError`] composes
//! them with `#[from]`.

/// Errors from parsing model configuration text.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading the model file failed.
    #[error("failed to read model file '{path}': {reason}")]
    Io { path: String, reason: String },

    /// The same key appeared twice in one section.
    #[error("duplicate key '{key}' in section [{section}]")]
    DuplicateKey { section: String, key: String },

    /// A `[section]` header that isn't one of the five recognized sections.
    #[error("unknown section '[{section}]'")]
    UnknownSection { section: String },

    /// A line outside any section, or a `key = value` line with no `=`.
    #[error("malformed line {line_no}: '{text}'")]
    MalformedLine { line_no: usize, text: String },

    /// A comma-separated token list contained an invalid identifier.
    #[error("invalid token name '{name}' in key '{key}' (must match [a-zA-Z_][a-zA-Z0-9_]*)")]
    InvalidTokenName { key: String, name: String },
}

/// Errors from semantic validation of a parsed [`crate::model::Model`].
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The underlying configuration text failed to parse.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A required section/key is absent (e.g. no `[request_definition] r`).
    #[error("missing required model assertion: {0}")]
    MissingAssertion(String),

    /// A matcher or effect expression references a name no definition
    /// introduces.
    #[error("unknown identifier '{name}' referenced in '{expr}'")]
    UnknownIdentifier { expr: String, name: String },

    /// A policy or grouping rule's arity doesn't match its definition.
    #[error("rule for ptype '{ptype}' has {actual} fields, expected {expected}")]
    ArityMismatch {
        ptype: String,
        expected: usize,
        actual: usize,
    },

    /// The `e` expression isn't one of the five closed-set effect modes.
    #[error("unsupported policy effect expression: '{expr}'")]
    UnsupportedEffect { expr: String },

    /// A priority-based effect mode was configured but the policy
    /// definition has no `priority` field.
    #[error("priority effect mode requires a 'priority' field in policy definition '{ptype}'")]
    MissingPriorityField { ptype: String },

    /// A grouping (`g`, `g2`, ...) definition has an arity other than 2 or 3.
    #[error("grouping definition '{ptype}' must have arity 2 or 3, got {arity}")]
    InvalidRoleArity { ptype: String, arity: usize },

    /// A `*_in_domain` call was made against a 2-arity grouping definition.
    #[error(
        "domain-scoped operation requires a 3-arity grouping definition '{ptype}', got arity {arity}"
    )]
    NoDomain { ptype: String, arity: usize },

    /// The referenced ptype has no definition in the model at all.
    #[error("no such ptype: '{ptype}'")]
    UnknownPtype { ptype: String },
}

/// Errors from policy store mutations (spec.md §4.2, §7).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `remove`/`update` targeted a rule that isn't present.
    #[error("policy not found in ptype '{ptype}': {rule:?}")]
    PolicyNotFound { ptype: String, rule: Vec<String> },

    /// `add` targeted a rule that's already present.
    #[error("duplicate policy in ptype '{ptype}': {rule:?}")]
    DuplicatePolicy { ptype: String, rule: Vec<String> },
}

/// Errors from the role manager (spec.md §4.3, §7).
#[derive(Debug, thiserror::Error)]
pub enum RoleGraphError {
    /// `has_link` traversal exceeded `max_hierarchy_level`.
    #[error("role hierarchy depth exceeded max_hierarchy_level={max}")]
    MaxHierarchyExceeded { max: usize },

    /// No role manager is registered for the requested grouping ptype.
    #[error("no role manager registered for ptype '{ptype}'")]
    UnknownPtype { ptype: String },
}

/// Errors from matcher compilation or evaluation (spec.md §4.5, §7).
///
/// During `enforce`, evaluation errors are caught at rule granularity (the
/// rule is treated as not-matched, see [`crate::enforcer`]); this type is
/// what gets logged and surfaced in the explanation structure, not
/// propagated as a hard failure of the whole call. A [`MatcherError::Parse`]
/// raised while compiling the matcher itself (not evaluating against a
/// rule) IS fatal and is surfaced directly.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    /// The matcher text failed to parse.
    #[error("matcher parse error: {reason}")]
    Parse { reason: String },

    /// An identifier in the matcher has no binding (should be caught at
    /// parse/model-validation time; this is the runtime-evaluation
    /// fallback).
    #[error("unknown identifier '{name}' in matcher expression")]
    UnknownIdentifier { name: String },

    /// A called function has no entry in the function map.
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    /// An operator was applied to operands of the wrong type.
    #[error("type error: {reason}")]
    TypeError { reason: String },

    /// Evaluation against a specific rule failed (e.g. a function call
    /// returned an unexpected shape, division by zero, index out of range).
    #[error("matcher evaluation failed for rule #{rule_index}: {reason}")]
    Evaluation { rule_index: usize, reason: String },
}

/// The top-level error type returned by fallible [`crate::enforcer::Enforcer`]
/// operations. Composes every subsystem error plus the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum EnforcerError {
    /// Model configuration failed to parse.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The model failed semantic validation.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A policy store mutation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A role manager operation failed.
    #[error(transparent)]
    RoleGraph(#[from] RoleGraphError),

    /// The matcher failed to compile (not a per-rule evaluation failure).
    #[error(transparent)]
    Matcher(#[from] MatcherError),

    /// The configured adapter returned an error.
    #[error(transparent)]
    Adapter(#[from] warden_storage::AdapterError),
}

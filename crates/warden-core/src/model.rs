//! The typed, validated model (spec.md §3.1, §4.1).
//!
//! [`Model`] is what [`crate::config::RawConfig`] becomes once every
//! section has been given meaning: request/policy/role definitions turned
//! into token lists, the policy effect decoded into a closed [`EffectMode`],
//! and every cross-reference (matcher → definition, effect → priority
//! field) checked up front so later stages never have to handle "the model
//! itself is broken" as a runtime case.

use std::collections::HashSet;

use regex::Regex;

use crate::config::RawConfig;
use crate::error::{ConfigError, ModelError};

/// `r`/`r2`/... — the shape of an enforcement request.
#[derive(Debug, Clone)]
pub struct RequestDef {
    pub key: String,
    pub tokens: Vec<String>,
}

/// `p`/`p2`/... — the shape of a stored policy rule, with an optional
/// trailing `eft` field (spec.md §3.1: "a policy definition MAY declare a
/// trailing `eft` field").
#[derive(Debug, Clone)]
pub struct PolicyDef {
    pub key: String,
    pub tokens: Vec<String>,
    pub eft_index: Option<usize>,
    pub priority_index: Option<usize>,
}

impl PolicyDef {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.tokens.len()
    }
}

/// `g`/`g2`/... — a grouping (role) definition, arity 2 (`_, _`) or 3
/// (`_, _, _`, domain-scoped).
#[derive(Debug, Clone)]
pub struct RoleDef {
    pub key: String,
    pub tokens: Vec<String>,
}

impl RoleDef {
    #[must_use]
    pub fn has_domain(&self) -> bool {
        self.tokens.len() == 3
    }
}

/// The five closed-set policy effect modes (spec.md §3.1, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectMode {
    /// `some(where (p.eft == allow))`
    AllowOverride,
    /// `!some(where (p.eft == deny))`
    DenyOverride,
    /// `some(where (p.eft == allow)) && !some(where (p.eft == deny))`
    AllowAndDeny,
    /// `priority(p.eft) || deny`
    Priority,
    /// `subjectPriority(p.eft) || deny`
    SubjectPriority,
}

impl EffectMode {
    fn from_expr(expr: &str) -> Option<Self> {
        match expr {
            "some(where (p.eft == allow))" => Some(Self::AllowOverride),
            "!some(where (p.eft == deny))" => Some(Self::DenyOverride),
            "some(where (p.eft == allow)) && !some(where (p.eft == deny))" => Some(Self::AllowAndDeny),
            "priority(p.eft) || deny" => Some(Self::Priority),
            "subjectPriority(p.eft) || deny" => Some(Self::SubjectPriority),
            _ => None,
        }
    }

    #[must_use]
    pub fn requires_priority_field(self) -> bool {
        matches!(self, Self::Priority | Self::SubjectPriority)
    }
}

/// `e`/`e2`/... — a decoded policy effect assertion.
#[derive(Debug, Clone)]
pub struct EffectDef {
    pub key: String,
    pub mode: EffectMode,
    pub raw: String,
}

/// `m`/`m2`/... — a matcher's raw expression text (parsed lazily, see
/// [`crate::matcher`]).
#[derive(Debug, Clone)]
pub struct MatcherDef {
    pub key: String,
    pub raw: String,
}

/// A fully parsed and validated authorization model.
#[derive(Debug, Clone)]
pub struct Model {
    request_defs: Vec<RequestDef>,
    policy_defs: Vec<PolicyDef>,
    role_defs: Vec<RoleDef>,
    effect_defs: Vec<EffectDef>,
    matcher_defs: Vec<MatcherDef>,
}

impl Model {
    /// Parse and validate model configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] if the text is syntactically malformed, a
    /// required assertion is missing, an arity or identifier check fails,
    /// or a priority effect mode lacks a `priority` field.
    pub fn from_str(text: &str) -> Result<Self, ModelError> {
        let raw = RawConfig::parse(text)?;
        Self::from_raw(&raw)
    }

    /// Read model configuration from a file and parse/validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Config`] wrapping [`ConfigError::Io`] if the
    /// file can't be read, or any error [`Model::from_str`] can return.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::from_str(&text)
    }

    /// Build and validate a model from an already-parsed [`RawConfig`].
    ///
    /// # Errors
    ///
    /// See [`Model::from_str`].
    pub fn from_raw(raw: &RawConfig) -> Result<Self, ModelError> {
        let request_defs = raw
            .entries_in("request_definition")
            .into_iter()
            .map(|(key, value)| {
                Ok(RequestDef {
                    key: key.to_owned(),
                    tokens: parse_tokens(key, value)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        if request_defs.is_empty() {
            return Err(ModelError::MissingAssertion("request_definition (r)".into()));
        }

        let policy_defs = raw
            .entries_in("policy_definition")
            .into_iter()
            .map(|(key, value)| {
                let tokens = parse_tokens(key, value)?;
                let eft_index = tokens.iter().position(|t| t == "eft");
                let priority_index = tokens.iter().position(|t| t == "priority");
                Ok(PolicyDef {
                    key: key.to_owned(),
                    tokens,
                    eft_index,
                    priority_index,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        if policy_defs.is_empty() {
            return Err(ModelError::MissingAssertion("policy_definition (p)".into()));
        }

        let role_defs = raw
            .entries_in("role_definition")
            .into_iter()
            .map(|(key, value)| {
                let tokens = parse_tokens(key, value)?;
                Ok(RoleDef {
                    key: key.to_owned(),
                    tokens,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        for role_def in &role_defs {
            let arity = role_def.tokens.len();
            if arity != 2 && arity != 3 {
                return Err(ModelError::InvalidRoleArity {
                    ptype: role_def.key.clone(),
                    arity,
                });
            }
        }

        let effect_defs = raw
            .entries_in("policy_effect")
            .into_iter()
            .map(|(key, value)| {
                let mode = EffectMode::from_expr(value).ok_or_else(|| ModelError::UnsupportedEffect {
                    expr: value.to_owned(),
                })?;
                Ok(EffectDef {
                    key: key.to_owned(),
                    mode,
                    raw: value.to_owned(),
                })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;
        if effect_defs.is_empty() {
            return Err(ModelError::MissingAssertion("policy_effect (e)".into()));
        }

        let matcher_defs = raw
            .entries_in("matchers")
            .into_iter()
            .map(|(key, value)| MatcherDef {
                key: key.to_owned(),
                raw: value.to_owned(),
            })
            .collect::<Vec<_>>();
        if matcher_defs.is_empty() {
            return Err(ModelError::MissingAssertion("matchers (m)".into()));
        }

        let model = Self {
            request_defs,
            policy_defs,
            role_defs,
            effect_defs,
            matcher_defs,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), ModelError> {
        for effect in &self.effect_defs {
            if !effect.mode.requires_priority_field() {
                continue;
            }
            let policy_key = paired_policy_key(&effect.key);
            let policy_def = self
                .policy_def(&policy_key)
                .ok_or_else(|| ModelError::UnknownPtype { ptype: policy_key.clone() })?;
            if policy_def.priority_index.is_none() {
                return Err(ModelError::MissingPriorityField { ptype: policy_key });
            }
        }

        // Matchers and effects may reference `r.field`/`p.field`-shaped
        // identifiers; every `r*`/`p*` prefix used must name a real
        // definition. Function calls (`g(...)`, `keyMatch(...)`, ...) are
        // resolved lazily against the function map at compile time instead,
        // since the model has no notion of what functions exist.
        let Ok(ref_re) = Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\.[a-zA-Z_][a-zA-Z0-9_]*\b") else {
            return Err(ModelError::MissingAssertion("internal: identifier regex".into()));
        };
        let known_prefixes: HashSet<&str> = self
            .request_defs
            .iter()
            .map(|d| d.key.as_str())
            .chain(self.policy_defs.iter().map(|d| d.key.as_str()))
            .collect();

        for matcher in &self.matcher_defs {
            for cap in ref_re.captures_iter(&matcher.raw) {
                let prefix = &cap[1];
                if (prefix.starts_with('r') || prefix.starts_with('p')) && !known_prefixes.contains(prefix) {
                    return Err(ModelError::UnknownIdentifier {
                        expr: matcher.raw.clone(),
                        name: prefix.to_owned(),
                    });
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn request_def(&self, key: &str) -> Option<&RequestDef> {
        self.request_defs.iter().find(|d| d.key == key)
    }

    #[must_use]
    pub fn policy_def(&self, key: &str) -> Option<&PolicyDef> {
        self.policy_defs.iter().find(|d| d.key == key)
    }

    #[must_use]
    pub fn role_def(&self, key: &str) -> Option<&RoleDef> {
        self.role_defs.iter().find(|d| d.key == key)
    }

    #[must_use]
    pub fn effect_def(&self, key: &str) -> Option<&EffectDef> {
        self.effect_defs.iter().find(|d| d.key == key)
    }

    #[must_use]
    pub fn matcher_def(&self, key: &str) -> Option<&MatcherDef> {
        self.matcher_defs.iter().find(|d| d.key == key)
    }

    #[must_use]
    pub fn request_defs(&self) -> &[RequestDef] {
        &self.request_defs
    }

    #[must_use]
    pub fn policy_defs(&self) -> &[PolicyDef] {
        &self.policy_defs
    }

    #[must_use]
    pub fn role_defs(&self) -> &[RoleDef] {
        &self.role_defs
    }

    #[must_use]
    pub fn effect_defs(&self) -> &[EffectDef] {
        &self.effect_defs
    }

    #[must_use]
    pub fn matcher_defs(&self) -> &[MatcherDef] {
        &self.matcher_defs
    }
}

impl warden_storage::ModelPtypes for Model {
    fn policy_ptypes(&self) -> Vec<String> {
        self.policy_defs.iter().map(|d| d.key.clone()).collect()
    }

    fn grouping_ptypes(&self) -> Vec<String> {
        self.role_defs.iter().map(|d| d.key.clone()).collect()
    }
}

/// `e` pairs with `p`, `e2` with `p2`, and so on.
fn paired_policy_key(effect_key: &str) -> String {
    let suffix = effect_key.strip_prefix('e').unwrap_or(effect_key);
    format!("p{suffix}")
}

fn parse_tokens(key: &str, value: &str) -> Result<Vec<String>, ConfigError> {
    let Ok(ident_re) = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$") else {
        return Err(ConfigError::MalformedLine { line_no: 0, text: key.to_owned() });
    };
    value
        .split(',')
        .map(str::trim)
        .map(|tok| {
            if ident_re.is_match(tok) {
                Ok(tok.to_owned())
            } else {
                Err(ConfigError::InvalidTokenName {
                    key: key.to_owned(),
                    name: tok.to_owned(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
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

    const RBAC_WITH_DOMAINS: &str = r"
[request_definition]
r = sub, dom, obj, act
[policy_definition]
p = sub, dom, obj, act
[role_definition]
g = _, _, _
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && r.obj == p.obj && r.act == p.act
";

    #[test]
    fn basic_acl_model_parses() {
        let model = Model::from_str(BASIC_ACL).unwrap();
        assert_eq!(model.policy_def("p").unwrap().arity(), 3);
        assert_eq!(model.effect_def("e").unwrap().mode, EffectMode::AllowOverride);
    }

    #[test]
    fn rbac_with_domains_model_parses() {
        let model = Model::from_str(RBAC_WITH_DOMAINS).unwrap();
        assert!(model.role_def("g").unwrap().has_domain());
    }

    #[test]
    fn priority_effect_without_priority_field_is_rejected() {
        let text = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[policy_effect]
e = priority(p.eft) || deny
[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";
        let err = Model::from_str(text).unwrap_err();
        assert!(matches!(err, ModelError::MissingPriorityField { .. }));
    }

    #[test]
    fn priority_effect_with_priority_field_parses() {
        let text = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act, priority
[policy_effect]
e = priority(p.eft) || deny
[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";
        let model = Model::from_str(text).unwrap();
        assert_eq!(model.effect_def("e").unwrap().mode, EffectMode::Priority);
    }

    #[test]
    fn role_definition_with_bad_arity_is_rejected() {
        let text = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[role_definition]
g = _
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = r.sub == p.sub
";
        let err = Model::from_str(text).unwrap_err();
        assert!(matches!(err, ModelError::InvalidRoleArity { .. }));
    }

    #[test]
    fn matcher_referencing_unknown_ptype_is_rejected() {
        let text = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = r.sub == p2.sub
";
        let err = Model::from_str(text).unwrap_err();
        assert!(matches!(err, ModelError::UnknownIdentifier { .. }));
    }

    #[test]
    fn unsupported_effect_expression_is_rejected() {
        let text = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[policy_effect]
e = some(where (p.eft == maybe))
[matchers]
m = r.sub == p.sub
";
        let err = Model::from_str(text).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedEffect { .. }));
    }

    #[test]
    fn invalid_token_name_surfaces_as_config_error() {
        let text = "[request_definition]\nr = sub, 1obj, act\n";
        let err = Model::from_str(text).unwrap_err();
        assert!(matches!(err, ModelError::Config(ConfigError::InvalidTokenName { .. })));
    }

    #[test]
    fn from_file_reads_and_parses_model_text() {
        let path = std::env::temp_dir().join("warden_model_from_file_test.conf");
        std::fs::write(&path, BASIC_ACL).unwrap();
        let model = Model::from_file(&path).unwrap();
        assert_eq!(model.policy_def("p").unwrap().arity(), 3);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn from_file_missing_path_surfaces_as_io_error() {
        let err = Model::from_file("/nonexistent/path/to/a/model.conf").unwrap_err();
        assert!(matches!(err, ModelError::Config(ConfigError::Io { .. })));
    }
}

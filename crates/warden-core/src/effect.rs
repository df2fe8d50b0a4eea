//! The effect combiner (spec.md §4.6): reduces per-rule matcher results to
//! one final decision according to the policy's closed-set effect mode.

use crate::model::EffectMode;

/// The outcome of evaluating a matcher against one stored policy rule.
#[derive(Debug, Clone, Copy)]
pub struct RuleOutcome {
    pub matched: bool,
    pub eft: Effect,
    /// The rule's `priority` field, parsed as an integer, when the policy
    /// definition carries one. Required to exist for `priority`/
    /// `subjectPriority` effect modes (checked at model validation time) but
    /// not consulted by the combiner itself — store order decides.
    pub priority: Option<i64>,
}

/// The `p.eft` field of a policy rule: `allow` unless a rule explicitly
/// says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    #[must_use]
    pub fn from_field(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("deny") {
            Effect::Deny
        } else {
            Effect::Allow
        }
    }
}

/// The combiner's verdict: the decision plus which rule indices decided it
/// (spec.md §4.6's "explanation mode").
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub deciding_rules: Vec<usize>,
}

/// Reduce `outcomes` (in policy-store order) to a final decision per `mode`.
///
/// Indices in `outcomes` correspond 1:1 to the rule's position in the
/// policy store; this is what `deciding_rules` reports back.
#[must_use]
pub fn combine(mode: EffectMode, outcomes: &[RuleOutcome]) -> Decision {
    match mode {
        EffectMode::AllowOverride => allow_override(outcomes),
        EffectMode::DenyOverride => deny_override(outcomes),
        EffectMode::AllowAndDeny => allow_and_deny(outcomes),
        EffectMode::Priority => priority(outcomes),
        EffectMode::SubjectPriority => priority(outcomes),
    }
}

/// `some(where (p.eft == allow))`: true the moment any matched rule allows.
fn allow_override(outcomes: &[RuleOutcome]) -> Decision {
    for (i, o) in outcomes.iter().enumerate() {
        if o.matched && o.eft == Effect::Allow {
            return Decision {
                allowed: true,
                deciding_rules: vec![i],
            };
        }
    }
    Decision {
        allowed: false,
        deciding_rules: Vec::new(),
    }
}

/// `!some(where (p.eft == deny))`: true unless some matched rule denies.
fn deny_override(outcomes: &[RuleOutcome]) -> Decision {
    for (i, o) in outcomes.iter().enumerate() {
        if o.matched && o.eft == Effect::Deny {
            return Decision {
                allowed: false,
                deciding_rules: vec![i],
            };
        }
    }
    Decision {
        allowed: true,
        deciding_rules: Vec::new(),
    }
}

/// `some(where (p.eft == allow)) && !some(where (p.eft == deny))`: at least
/// one allow, and no deny at all. A single deny always wins.
fn allow_and_deny(outcomes: &[RuleOutcome]) -> Decision {
    let mut allow_index = None;
    for (i, o) in outcomes.iter().enumerate() {
        if !o.matched {
            continue;
        }
        if o.eft == Effect::Deny {
            return Decision {
                allowed: false,
                deciding_rules: vec![i],
            };
        }
        if allow_index.is_none() {
            allow_index = Some(i);
        }
    }
    match allow_index {
        Some(i) => Decision {
            allowed: true,
            deciding_rules: vec![i],
        },
        None => Decision {
            allowed: false,
            deciding_rules: Vec::new(),
        },
    }
}

/// `priority(p.eft) || deny` and `subjectPriority(p.eft) || deny`: rules
/// are evaluated in store order; the first matched rule's `eft` wins; no
/// matched rule means deny (spec.md §4.6). The `priority` field is
/// required to exist on the policy definition (checked at model
/// validation time) but does not itself reorder rules — store order is
/// the only thing that decides among matches, which is what makes
/// reordering otherwise-identical rules change the outcome (spec.md §8
/// scenario S5).
fn priority(outcomes: &[RuleOutcome]) -> Decision {
    for (i, o) in outcomes.iter().enumerate() {
        if o.matched {
            return Decision {
                allowed: o.eft == Effect::Allow,
                deciding_rules: vec![i],
            };
        }
    }
    Decision {
        allowed: false,
        deciding_rules: Vec::new(),
    }
}

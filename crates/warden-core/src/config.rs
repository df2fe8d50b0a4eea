//! The INI-like model configuration parser (spec.md §4.1, §6.1).
//!
//! This module only turns text into a [`RawConfig`] — an ordered list of
//! `(section, [(key, value)])` pairs with syntax already validated. Giving
//! that structure *meaning* (arity checks, matcher parsing, effect mode
//! decoding) is [`crate::model::Model`]'s job; keeping the two separate
//! matches spec.md's own split between "parser contract" (§4.1) and "model"
//! (§3.1).

use crate::error::ConfigError;

/// Section names the parser recognizes, exactly as spec.md §6.1 lists them.
const RECOGNIZED_SECTIONS: &[&str] = &[
    "request_definition",
    "policy_definition",
    "role_definition",
    "policy_effect",
    "matchers",
];

/// One `[section]` block with its `key = value` lines, in source order.
#[derive(Debug, Clone)]
pub struct RawSection {
    /// The section header, e.g. `"request_definition"`.
    pub name: String,
    /// `(key, value)` pairs in the order they appeared.
    pub entries: Vec<(String, String)>,
}

/// The whole parsed file/text block, before semantic interpretation.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    /// Sections in source order. A section name may repeat across separate
    /// `[header]` blocks in principle, but `Model` treats that as if the
    /// entries had been written under one block.
    pub sections: Vec<RawSection>,
}

impl RawConfig {
    /// All `(key, value)` entries across every block named `section`.
    #[must_use]
    pub fn entries_in(&self, section: &str) -> Vec<(&str, &str)> {
        self.sections
            .iter()
            .filter(|s| s.name == section)
            .flat_map(|s| s.entries.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .collect()
    }

    /// Parse model configuration text per spec.md §6.1.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSection`], [`ConfigError::MalformedLine`],
    /// or [`ConfigError::DuplicateKey`] on any syntax violation.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut sections: Vec<RawSection> = Vec::new();
        let mut current: Option<usize> = None;

        for (offset, raw_line) in text.lines().enumerate() {
            let line_no = offset + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            if let Some(stripped) = line.strip_prefix('[') {
                let name = stripped.strip_suffix(']').ok_or_else(|| ConfigError::MalformedLine {
                    line_no,
                    text: line.to_owned(),
                })?;
                let name = name.trim().to_owned();
                if !RECOGNIZED_SECTIONS.contains(&name.as_str()) {
                    return Err(ConfigError::UnknownSection { section: name });
                }
                sections.push(RawSection {
                    name,
                    entries: Vec::new(),
                });
                current = Some(sections.len() - 1);
                continue;
            }

            let Some(eq_pos) = line.find('=') else {
                return Err(ConfigError::MalformedLine {
                    line_no,
                    text: line.to_owned(),
                });
            };
            let key = line[..eq_pos].trim().to_owned();
            let value = line[eq_pos + 1..].trim().to_owned();
            if key.is_empty() {
                return Err(ConfigError::MalformedLine {
                    line_no,
                    text: line.to_owned(),
                });
            }

            let Some(idx) = current else {
                return Err(ConfigError::MalformedLine {
                    line_no,
                    text: line.to_owned(),
                });
            };
            let section_name = sections[idx].name.clone();
            if sections
                .iter()
                .filter(|s| s.name == section_name)
                .any(|s| s.entries.iter().any(|(k, _)| k == &key))
            {
                return Err(ConfigError::DuplicateKey {
                    section: section_name,
                    key,
                });
            }
            sections[idx].entries.push((key, value));
        }

        Ok(Self { sections })
    }
}

/// Strip a trailing `# comment`. Line continuation via trailing `\` is not
/// supported (spec.md §4.1).
fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_acl_model() {
        let text = r"
[request_definition]
r = sub, obj, act
[policy_definition]
p = sub, obj, act
[policy_effect]
e = some(where (p.eft == allow))
[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
";
        let cfg = RawConfig::parse(text).unwrap();
        assert_eq!(cfg.entries_in("request_definition"), vec![("r", "sub, obj, act")]);
        assert_eq!(
            cfg.entries_in("matchers"),
            vec![("m", "r.sub == p.sub && r.obj == p.obj && r.act == p.act")]
        );
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "\n# a full-line comment\n[request_definition]\nr = sub, obj, act # trailing comment\n\n";
        let cfg = RawConfig::parse(text).unwrap();
        assert_eq!(cfg.entries_in("request_definition"), vec![("r", "sub, obj, act")]);
    }

    #[test]
    fn duplicate_key_in_section_is_rejected() {
        let text = "[request_definition]\nr = sub, obj\nr = sub, obj, act\n";
        let err = RawConfig::parse(text).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKey { .. }));
    }

    #[test]
    fn unknown_section_is_rejected() {
        let text = "[not_a_real_section]\nr = sub\n";
        let err = RawConfig::parse(text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSection { .. }));
    }

    #[test]
    fn line_without_equals_outside_section_is_malformed() {
        let text = "just some text\n";
        let err = RawConfig::parse(text).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedLine { .. }));
    }

    #[test]
    fn key_with_no_section_is_malformed() {
        let text = "r = sub, obj\n[request_definition]\n";
        let err = RawConfig::parse(text).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedLine { .. }));
    }

    #[test]
    fn distinct_keys_like_p_and_p2_both_survive() {
        let text = "[policy_definition]\np = sub, obj, act\np2 = sub, obj\n";
        let cfg = RawConfig::parse(text).unwrap();
        assert_eq!(cfg.entries_in("policy_definition").len(), 2);
    }

    #[test]
    fn repeated_section_headers_accumulate() {
        let text = "[matchers]\nm = true\n[matchers]\nm2 = false\n";
        let cfg = RawConfig::parse(text).unwrap();
        assert_eq!(cfg.entries_in("matchers").len(), 2);
    }

    #[test]
    fn duplicate_key_across_repeated_section_headers_is_rejected() {
        let text = "[matchers]\nm = true\n[matchers]\nm = false\n";
        let err = RawConfig::parse(text).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKey { .. }));
    }
}

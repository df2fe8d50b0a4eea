//! The built-in function library matchers can call (spec.md §4.4).
//!
//! Every function here is total: malformed input (an unparsable CIDR, a
//! regex that fails to compile, a `*`-free pattern) degrades to `false` or
//! `""` rather than panicking or raising an error. A bad pattern in one
//! policy row must never take down enforcement for every other row.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::value::Value;

/// A registered built-in or user function. Boxed as `Arc` so the map can be
/// cloned cheaply when an [`crate::enforcer::Enforcer`] is built from a
/// shared base configuration.
pub type BuiltinFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// The set of named functions a matcher expression can call.
#[derive(Clone)]
pub struct FunctionMap {
    functions: HashMap<String, BuiltinFn>,
}

impl FunctionMap {
    /// A function map with every spec.md §4.4 built-in registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut map = Self {
            functions: HashMap::new(),
        };
        map.register("keyMatch", |args| Value::Bool(key_match(&arg_str(args, 0), &arg_str(args, 1))));
        map.register("keyMatch2", |args| Value::Bool(key_match2(&arg_str(args, 0), &arg_str(args, 1))));
        map.register("keyMatch3", |args| Value::Bool(key_match3(&arg_str(args, 0), &arg_str(args, 1))));
        map.register("keyMatch4", |args| Value::Bool(key_match4(&arg_str(args, 0), &arg_str(args, 1))));
        map.register("keyMatch5", |args| Value::Bool(key_match5(&arg_str(args, 0), &arg_str(args, 1))));
        map.register("regexMatch", |args| Value::Bool(regex_match(&arg_str(args, 0), &arg_str(args, 1))));
        map.register("globMatch", |args| Value::Bool(glob_match(&arg_str(args, 0), &arg_str(args, 1))));
        map.register("ipMatch", |args| Value::Bool(ip_match(&arg_str(args, 0), &arg_str(args, 1))));
        map.register("keyGet", |args| Value::Str(key_get(&arg_str(args, 0), &arg_str(args, 1))));
        map.register("keyGet2", |args| {
            Value::Str(key_get2(&arg_str(args, 0), &arg_str(args, 1), &arg_str(args, 2)))
        });
        map.register("keyGet3", |args| {
            Value::Str(key_get3(&arg_str(args, 0), &arg_str(args, 1), &arg_str(args, 2)))
        });
        map.register("timeMatch", |args| Value::Bool(time_match(args)));
        map
    }

    /// Register or override a function by name (spec.md §4.4: "callers may
    /// register additional functions, or shadow a built-in").
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.functions.insert(name.to_owned(), Arc::new(f));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BuiltinFn> {
        self.functions.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl Default for FunctionMap {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for FunctionMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionMap")
            .field("registered", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn arg_str(args: &[Value], index: usize) -> String {
    args.get(index).map(Value::as_str_lossy).unwrap_or_default()
}

/// `key2` may end with a single trailing `*` wildcard; everything before it
/// must match `key1` verbatim.
#[must_use]
pub fn key_match(key1: &str, key2: &str) -> bool {
    match key2.find('*') {
        None => key1 == key2,
        Some(i) => {
            if key1.len() > i {
                key1[..i] == key2[..i]
            } else {
                key1 == key2[..i]
            }
        }
    }
}

/// Like [`key_match`], but `key2` may also contain `:param` path segments
/// that match any single non-`/` segment of `key1`.
#[must_use]
pub fn key_match2(key1: &str, key2: &str) -> bool {
    let key2 = key2.replace("/*", "/.*");
    let Ok(param_re) = Regex::new(r":[^/]+") else {
        return false;
    };
    let key2 = param_re.replace_all(&key2, "[^/]+");
    regex_match(key1, &format!("^{key2}$"))
}

/// Like [`key_match2`], but path parameters use `{param}` syntax.
#[must_use]
pub fn key_match3(key1: &str, key2: &str) -> bool {
    let key2 = key2.replace("/*", "/.*");
    let Ok(param_re) = Regex::new(r"\{[^/]+?\}") else {
        return false;
    };
    let key2 = param_re.replace_all(&key2, "[^/]+?");
    regex_match(key1, &format!("^{key2}$"))
}

/// Like [`key_match3`], but two occurrences of the same `{param}` name must
/// bind the same value within one match.
#[must_use]
pub fn key_match4(key1: &str, key2: &str) -> bool {
    let key2 = key2.replace("/*", "/.*");
    let Ok(param_re) = Regex::new(r"\{([^/]+?)\}") else {
        return false;
    };

    let mut names = Vec::new();
    let pattern = param_re.replace_all(&key2, |caps: &regex::Captures<'_>| {
        names.push(caps[1].to_owned());
        "([^/]+?)".to_owned()
    });
    let Ok(re) = Regex::new(&format!("^{pattern}$")) else {
        return false;
    };
    let Some(caps) = re.captures(key1) else {
        return false;
    };

    let mut bound: HashMap<&str, &str> = HashMap::new();
    for (i, name) in names.iter().enumerate() {
        let Some(value) = caps.get(i + 1).map(|m| m.as_str()) else {
            return false;
        };
        match bound.get(name.as_str()) {
            Some(existing) if *existing != value => return false,
            _ => {
                bound.insert(name, value);
            }
        }
    }
    true
}

/// Like [`key_match3`], but query strings (`?...`) are stripped from `key1`
/// before matching.
#[must_use]
pub fn key_match5(key1: &str, key2: &str) -> bool {
    let key1 = key1.split('?').next().unwrap_or(key1);
    key_match3(key1, key2)
}

/// Whether `key2`, compiled as a regular expression, matches anywhere in
/// `key1`. An unparsable pattern is a non-match, never an error.
#[must_use]
pub fn regex_match(key1: &str, key2: &str) -> bool {
    Regex::new(key2).is_ok_and(|re| re.is_match(key1))
}

/// Shell-style glob matching, `key2` as the pattern and `key1` as the
/// candidate.
#[must_use]
pub fn glob_match(key1: &str, key2: &str) -> bool {
    glob_match::glob_match(key2, key1)
}

/// Whether the IP address `key1` falls inside the network `key2` (plain
/// address or CIDR), for either IPv4 or IPv6.
#[must_use]
pub fn ip_match(key1: &str, key2: &str) -> bool {
    let Ok(addr) = key1.parse::<std::net::IpAddr>() else {
        return false;
    };
    if let Ok(network) = key2.parse::<ipnetwork::IpNetwork>() {
        return network.contains(addr);
    }
    key2.parse::<std::net::IpAddr>().is_ok_and(|other| other == addr)
}

/// The suffix of `key1` past the wildcard `*` in `key2`, or `""` when
/// `key2` has no wildcard or `key1` doesn't match the prefix.
#[must_use]
pub fn key_get(key1: &str, key2: &str) -> String {
    match key2.find('*') {
        Some(i) if key1.len() >= i && key1[..i] == key2[..i] => key1[i..].to_owned(),
        _ => String::new(),
    }
}

/// The value bound to `:path_var` (or the wildcard segment for `path_var ==
/// "*"`) the first time `key2` (`:param` syntax) matches `key1`.
#[must_use]
pub fn key_get2(key1: &str, key2: &str, path_var: &str) -> String {
    let key2 = key2.replace("/*", "/.*");
    let Ok(param_re) = Regex::new(r":([^/]+)") else {
        return String::new();
    };
    key_get_named(key1, &key2, &param_re, path_var)
}

/// Like [`key_get2`], but `key2` uses `{param}` syntax.
#[must_use]
pub fn key_get3(key1: &str, key2: &str, path_var: &str) -> String {
    let key2 = key2.replace("/*", "/.*");
    let Ok(param_re) = Regex::new(r"\{([^/]+?)\}") else {
        return String::new();
    };
    key_get_named(key1, &key2, &param_re, path_var)
}

fn key_get_named(key1: &str, key2: &str, param_re: &Regex, path_var: &str) -> String {
    let mut names = Vec::new();
    let pattern = param_re.replace_all(key2, |caps: &regex::Captures<'_>| {
        names.push(caps[1].to_owned());
        "([^/]+?)".to_owned()
    });
    let Ok(re) = Regex::new(&format!("^{pattern}$")) else {
        return String::new();
    };
    let Some(caps) = re.captures(key1) else {
        return String::new();
    };
    names
        .iter()
        .position(|n| n == path_var)
        .and_then(|i| caps.get(i + 1))
        .map(|m| m.as_str().to_owned())
        .unwrap_or_default()
}

/// `timeMatch(current, start, end)`: whether `current` falls in `[start,
/// end]` inclusive, all RFC 3339 timestamps. With two arguments, an
/// equality check between both parsed timestamps.
fn time_match(args: &[Value]) -> bool {
    let parse = |v: &Value| chrono::DateTime::parse_from_rfc3339(&v.as_str_lossy()).ok();
    match args {
        [current, start, end] => match (parse(current), parse(start), parse(end)) {
            (Some(c), Some(s), Some(e)) => s <= c && c <= e,
            _ => false,
        },
        [a, b] => match (parse(a), parse(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_match_matches_prefix_with_wildcard() {
        assert!(key_match("/foo/bar", "/foo/*"));
        assert!(!key_match("/baz/bar", "/foo/*"));
    }

    #[test]
    fn key_match2_matches_named_segment() {
        assert!(key_match2("/alice/123", "/:user/123"));
        assert!(!key_match2("/alice/124", "/:user/123"));
    }

    #[test]
    fn key_match3_matches_brace_segment() {
        assert!(key_match3("/books/1", "/books/{id}"));
    }

    #[test]
    fn key_match4_requires_repeated_param_to_agree() {
        assert!(key_match4("/books/1/1", "/books/{id}/{id}"));
        assert!(!key_match4("/books/1/2", "/books/{id}/{id}"));
    }

    #[test]
    fn key_match5_strips_query_string() {
        assert!(key_match5("/books/1?x=2", "/books/{id}"));
    }

    #[test]
    fn regex_match_handles_bad_pattern_as_false() {
        assert!(!regex_match("abc", "("));
    }

    #[test]
    fn glob_match_matches_star() {
        assert!(glob_match("/data/report.csv", "/data/*.csv"));
    }

    #[test]
    fn ip_match_checks_cidr_containment() {
        assert!(ip_match("192.168.1.50", "192.168.1.0/24"));
        assert!(!ip_match("10.0.0.1", "192.168.1.0/24"));
    }

    #[test]
    fn ip_match_handles_garbage_as_false() {
        assert!(!ip_match("not-an-ip", "192.168.1.0/24"));
    }

    #[test]
    fn key_get_returns_wildcard_suffix() {
        assert_eq!(key_get("/foo/bar", "/foo/*"), "bar");
        assert_eq!(key_get("/foo/bar", "/foo"), "");
    }

    #[test]
    fn key_get2_returns_named_value() {
        assert_eq!(key_get2("/alice/123", "/:user/:id", "user"), "alice");
        assert_eq!(key_get2("/alice/123", "/:user/:id", "id"), "123");
    }

    #[test]
    fn time_match_checks_inclusive_range() {
        let args = vec![
            Value::Str("2026-06-15T00:00:00Z".into()),
            Value::Str("2026-01-01T00:00:00Z".into()),
            Value::Str("2026-12-31T23:59:59Z".into()),
        ];
        assert!(time_match(&args));
    }

    #[test]
    fn function_map_allows_overriding_a_builtin() {
        let mut map = FunctionMap::with_builtins();
        map.register("keyMatch", |_| Value::Bool(true));
        let f = map.get("keyMatch").unwrap();
        assert_eq!(f(&[Value::Str("anything".into()), Value::Str("else".into())]), Value::Bool(true));
    }
}

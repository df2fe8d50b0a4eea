//! The role manager (spec.md §3.3, §4.3): a directed graph of "has role"
//! edges keyed by `(name, domain)`, with transitive reachability bounded by
//! `max_hierarchy_level` so a cyclic or adversarial policy set can't put
//! `has_link` into an unbounded walk.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::RoleGraphError;
use crate::function::FunctionMap;
use crate::value::Value;

/// The domain used for edges added through the 2-arity (non-domain) API.
const GLOBAL_DOMAIN: &str = "";

/// A name-matching predicate, e.g. for `g2`-style pattern roles where
/// `"book_group"` should match any name `keyMatch2` accepts.
pub type MatchingFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

#[derive(Clone)]
struct ConditionalEdge {
    to: String,
    condition: Option<(String, Vec<String>)>,
}

#[derive(Default)]
struct Domain {
    /// `name -> edges to roles it directly holds`.
    out: HashMap<String, Vec<ConditionalEdge>>,
    /// `role -> names that directly hold it`, maintained alongside `out`.
    in_: HashMap<String, HashSet<String>>,
}

/// Default bound on transitive role-hierarchy depth (spec.md §4.3).
pub const DEFAULT_MAX_HIERARCHY_LEVEL: usize = 10;

/// The role graph for one grouping ptype (`g`, `g2`, ...).
pub struct RoleManager {
    max_hierarchy_level: usize,
    domains: RwLock<HashMap<String, Domain>>,
    matching_fn: RwLock<Option<MatchingFn>>,
    domain_matching_fn: RwLock<Option<MatchingFn>>,
}

impl RoleManager {
    /// A role manager with the default hierarchy bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_hierarchy_level(DEFAULT_MAX_HIERARCHY_LEVEL)
    }

    #[must_use]
    pub fn with_max_hierarchy_level(max_hierarchy_level: usize) -> Self {
        Self {
            max_hierarchy_level,
            domains: RwLock::new(HashMap::new()),
            matching_fn: RwLock::new(None),
            domain_matching_fn: RwLock::new(None),
        }
    }

    /// Install a name-matching function used when resolving `name1`/`name2`
    /// arguments to `has_link` against graph nodes (spec.md §4.3).
    pub fn set_matching_func(&self, f: MatchingFn) {
        *lock_write(&self.matching_fn) = Some(f);
    }

    /// Install a domain-matching function, analogous to
    /// [`RoleManager::set_matching_func`] but applied to the `domain`
    /// argument.
    pub fn set_domain_matching_func(&self, f: MatchingFn) {
        *lock_write(&self.domain_matching_fn) = Some(f);
    }

    /// Add the edge `name1 -> name2` ("name1 has role name2") in `domain`.
    pub fn add_link(&self, name1: &str, name2: &str, domain: &str) {
        self.add_link_with_condition(name1, name2, domain, None);
    }

    /// Like [`RoleManager::add_link`], but the edge only counts during
    /// [`RoleManager::has_link_with_functions`] traversal when
    /// `condition(params...)` evaluates truthy.
    pub fn add_link_with_condition(
        &self,
        name1: &str,
        name2: &str,
        domain: &str,
        condition: Option<(String, Vec<String>)>,
    ) {
        let mut guard = lock_write(&self.domains);
        let d = guard.entry(domain.to_owned()).or_default();
        let edges = d.out.entry(name1.to_owned()).or_default();
        if !edges.iter().any(|e| e.to == name2) {
            edges.push(ConditionalEdge {
                to: name2.to_owned(),
                condition,
            });
        }
        d.in_.entry(name2.to_owned()).or_default().insert(name1.to_owned());
    }

    /// Remove the edge `name1 -> name2` in `domain`, if present.
    pub fn delete_link(&self, name1: &str, name2: &str, domain: &str) {
        let mut guard = lock_write(&self.domains);
        if let Some(d) = guard.get_mut(domain) {
            if let Some(edges) = d.out.get_mut(name1) {
                edges.retain(|e| e.to != name2);
            }
            if let Some(in_set) = d.in_.get_mut(name2) {
                in_set.remove(name1);
            }
        }
    }

    /// Whether `name1` transitively has role `name2` in `domain`
    /// (`""` for the non-domain graph).
    ///
    /// # Errors
    ///
    /// Returns [`RoleGraphError::MaxHierarchyExceeded`] if traversal would
    /// exceed `max_hierarchy_level`.
    pub fn has_link(&self, name1: &str, name2: &str, domain: &str) -> Result<bool, RoleGraphError> {
        self.has_link_with_functions(name1, name2, domain, None)
    }

    /// Like [`RoleManager::has_link`], but conditional edges are only
    /// followed when `functions` is provided and their condition evaluates
    /// truthy.
    ///
    /// # Errors
    ///
    /// See [`RoleManager::has_link`].
    pub fn has_link_with_functions(
        &self,
        name1: &str,
        name2: &str,
        domain: &str,
        functions: Option<&FunctionMap>,
    ) -> Result<bool, RoleGraphError> {
        if name1 == name2 {
            return Ok(true);
        }
        let guard = lock_read(&self.domains);
        let matching_fn = lock_read(&self.matching_fn);
        let domain_matching_fn = lock_read(&self.domain_matching_fn);

        let domains_to_search: Vec<&str> = if let Some(df) = domain_matching_fn.as_ref() {
            guard.keys().filter(|d| df(domain, d)).map(String::as_str).collect()
        } else {
            vec![domain]
        };

        let mut visited: HashSet<(String, String)> = HashSet::new();
        for d in domains_to_search {
            let Some(g) = guard.get(d) else { continue };
            if dfs_has_link(
                g,
                name1,
                name2,
                0,
                self.max_hierarchy_level,
                matching_fn.as_deref(),
                functions,
                &mut visited,
            )? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Names that `name` directly holds as a role, in `domain`.
    #[must_use]
    pub fn get_roles(&self, name: &str, domain: &str) -> Vec<String> {
        lock_read(&self.domains)
            .get(domain)
            .and_then(|d| d.out.get(name))
            .map(|edges| edges.iter().map(|e| e.to.clone()).collect())
            .unwrap_or_default()
    }

    /// Names that directly hold `name` as a role, in `domain`.
    #[must_use]
    pub fn get_users(&self, name: &str, domain: &str) -> Vec<String> {
        lock_read(&self.domains)
            .get(domain)
            .and_then(|d| d.in_.get(name))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every role `name` transitively holds in `domain`, bounded by
    /// `max_hierarchy_level`.
    #[must_use]
    pub fn get_implicit_roles(&self, name: &str, domain: &str) -> Vec<String> {
        let guard = lock_read(&self.domains);
        let Some(g) = guard.get(domain) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut frontier = vec![name.to_owned()];
        let mut depth = 0;
        while !frontier.is_empty() && depth < self.max_hierarchy_level {
            let mut next = Vec::new();
            for current in &frontier {
                let Some(edges) = g.out.get(current) else { continue };
                for edge in edges {
                    if seen.insert(edge.to.clone()) {
                        next.push(edge.to.clone());
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        seen.into_iter().collect()
    }

    /// Every name that transitively holds `name` as a role in `domain`.
    #[must_use]
    pub fn get_implicit_users(&self, name: &str, domain: &str) -> Vec<String> {
        let guard = lock_read(&self.domains);
        let Some(g) = guard.get(domain) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut frontier = vec![name.to_owned()];
        let mut depth = 0;
        while !frontier.is_empty() && depth < self.max_hierarchy_level {
            let mut next = Vec::new();
            for current in &frontier {
                let Some(in_set) = g.in_.get(current) else { continue };
                for user in in_set {
                    if seen.insert(user.clone()) {
                        next.push(user.clone());
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        seen.into_iter().collect()
    }

    /// Drop every edge in every domain.
    pub fn clear(&self) {
        lock_write(&self.domains).clear();
    }
}

impl Default for RoleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleManager")
            .field("max_hierarchy_level", &self.max_hierarchy_level)
            .finish_non_exhaustive()
    }
}

fn lock_read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn lock_write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[allow(clippy::too_many_arguments)]
fn dfs_has_link(
    g: &Domain,
    current: &str,
    target: &str,
    depth: usize,
    max_depth: usize,
    matching_fn: Option<&MatchingFn>,
    functions: Option<&FunctionMap>,
    visited: &mut HashSet<(String, String)>,
) -> Result<bool, RoleGraphError> {
    if depth >= max_depth {
        return Err(RoleGraphError::MaxHierarchyExceeded { max: max_depth });
    }
    for (node, edges) in source_nodes(g, current, matching_fn) {
        for edge in edges {
            let matches_target = edge.to == target || matching_fn.is_some_and(|f| f(&edge.to, target));
            let condition_holds = edge_condition_holds(edge, functions);
            if !condition_holds {
                continue;
            }
            if matches_target {
                return Ok(true);
            }
            let key = (node.clone(), edge.to.clone());
            if !visited.insert(key) {
                continue;
            }
            if dfs_has_link(g, &edge.to, target, depth + 1, max_depth, matching_fn, functions, visited)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Out-edges reachable from `current`: its own exact entry plus, when
/// `matching_fn` is set, every other node whose name `current` matches as a
/// pattern (spec.md §3.4: a matching function may treat either side of a
/// link as a pattern, not only the destination).
fn source_nodes<'g>(
    g: &'g Domain,
    current: &str,
    matching_fn: Option<&MatchingFn>,
) -> Vec<(String, &'g [ConditionalEdge])> {
    let mut nodes = Vec::new();
    if let Some(edges) = g.out.get(current) {
        nodes.push((current.to_owned(), edges.as_slice()));
    }
    if let Some(f) = matching_fn {
        for (name, edges) in &g.out {
            if name != current && f(current, name) {
                nodes.push((name.clone(), edges.as_slice()));
            }
        }
    }
    nodes
}

fn edge_condition_holds(edge: &ConditionalEdge, functions: Option<&FunctionMap>) -> bool {
    let Some((fn_name, params)) = &edge.condition else {
        return true;
    };
    let Some(functions) = functions else {
        return false;
    };
    let Some(f) = functions.get(fn_name) else {
        return false;
    };
    let args: Vec<Value> = params.iter().map(|p| Value::Str(p.clone())).collect();
    f(&args).as_bool().unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn direct_link_is_found() {
        let rm = RoleManager::new();
        rm.add_link("alice", "admin", GLOBAL_DOMAIN);
        assert!(rm.has_link("alice", "admin", GLOBAL_DOMAIN).unwrap());
    }

    #[test]
    fn transitive_link_is_found() {
        let rm = RoleManager::new();
        rm.add_link("alice", "writer", GLOBAL_DOMAIN);
        rm.add_link("writer", "reader", GLOBAL_DOMAIN);
        assert!(rm.has_link("alice", "reader", GLOBAL_DOMAIN).unwrap());
    }

    #[test]
    fn unrelated_names_have_no_link() {
        let rm = RoleManager::new();
        rm.add_link("alice", "writer", GLOBAL_DOMAIN);
        assert!(!rm.has_link("alice", "admin", GLOBAL_DOMAIN).unwrap());
    }

    #[test]
    fn delete_link_removes_edge() {
        let rm = RoleManager::new();
        rm.add_link("alice", "admin", GLOBAL_DOMAIN);
        rm.delete_link("alice", "admin", GLOBAL_DOMAIN);
        assert!(!rm.has_link("alice", "admin", GLOBAL_DOMAIN).unwrap());
    }

    #[test]
    fn cyclic_graph_does_not_hang() {
        let rm = RoleManager::new();
        rm.add_link("a", "b", GLOBAL_DOMAIN);
        rm.add_link("b", "a", GLOBAL_DOMAIN);
        assert!(rm.has_link("a", "b", GLOBAL_DOMAIN).unwrap());
        assert!(!rm.has_link("a", "z", GLOBAL_DOMAIN).unwrap());
    }

    #[test]
    fn deep_chain_beyond_max_hierarchy_errors() {
        let rm = RoleManager::with_max_hierarchy_level(3);
        rm.add_link("l0", "l1", GLOBAL_DOMAIN);
        rm.add_link("l1", "l2", GLOBAL_DOMAIN);
        rm.add_link("l2", "l3", GLOBAL_DOMAIN);
        rm.add_link("l3", "l4", GLOBAL_DOMAIN);
        let err = rm.has_link("l0", "l4", GLOBAL_DOMAIN).unwrap_err();
        assert!(matches!(err, RoleGraphError::MaxHierarchyExceeded { .. }));
    }

    #[test]
    fn domains_are_isolated() {
        let rm = RoleManager::new();
        rm.add_link("alice", "admin", "tenant1");
        assert!(rm.has_link("alice", "admin", "tenant1").unwrap());
        assert!(!rm.has_link("alice", "admin", "tenant2").unwrap());
    }

    #[test]
    fn get_roles_and_get_users_are_symmetric() {
        let rm = RoleManager::new();
        rm.add_link("alice", "admin", GLOBAL_DOMAIN);
        rm.add_link("bob", "admin", GLOBAL_DOMAIN);
        assert_eq!(rm.get_roles("alice", GLOBAL_DOMAIN), vec!["admin".to_owned()]);
        let mut users = rm.get_users("admin", GLOBAL_DOMAIN);
        users.sort();
        assert_eq!(users, vec!["alice".to_owned(), "bob".to_owned()]);
    }

    #[test]
    fn get_implicit_roles_collects_whole_chain() {
        let rm = RoleManager::new();
        rm.add_link("alice", "writer", GLOBAL_DOMAIN);
        rm.add_link("writer", "reader", GLOBAL_DOMAIN);
        let mut roles = rm.get_implicit_roles("alice", GLOBAL_DOMAIN);
        roles.sort();
        assert_eq!(roles, vec!["reader".to_owned(), "writer".to_owned()]);
    }

    #[test]
    fn conditional_edge_only_counts_when_condition_holds() {
        let rm = RoleManager::new();
        rm.add_link_with_condition("alice", "admin", GLOBAL_DOMAIN, Some(("always_false".to_owned(), vec![])));
        let mut functions = FunctionMap::with_builtins();
        functions.register("always_false", |_| Value::Bool(false));
        assert!(!rm.has_link_with_functions("alice", "admin", GLOBAL_DOMAIN, Some(&functions)).unwrap());

        let mut functions_true = FunctionMap::with_builtins();
        functions_true.register("always_false", |_| Value::Bool(true));
        assert!(rm
            .has_link_with_functions("alice", "admin", GLOBAL_DOMAIN, Some(&functions_true))
            .unwrap());
    }

    #[test]
    fn clear_drops_every_edge() {
        let rm = RoleManager::new();
        rm.add_link("alice", "admin", GLOBAL_DOMAIN);
        rm.clear();
        assert!(!rm.has_link("alice", "admin", GLOBAL_DOMAIN).unwrap());
    }

    #[test]
    fn matching_fn_applies_to_the_traversal_source_too() {
        let rm = RoleManager::new();
        rm.add_link("book_group", "reader", GLOBAL_DOMAIN);
        rm.set_matching_func(Arc::new(|name, pattern| {
            pattern == "book_group" && name.starts_with("book_")
        }));
        assert!(rm.has_link("book_123", "reader", GLOBAL_DOMAIN).unwrap());
        assert!(!rm.has_link("movie_123", "reader", GLOBAL_DOMAIN).unwrap());
    }
}

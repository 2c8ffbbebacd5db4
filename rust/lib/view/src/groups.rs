//! Access-group expressions.
//!
//! A `groups="a,b,!c"` attribute admits users in `a` or `b` but never users
//! in `c`. Nested nodes intersect their ancestors' groups, and the same field
//! may appear several times under different groups, so visibility is kept as
//! a disjunction of terms, each term a set of required groups and a set of
//! forbidden groups. Implied groups are folded in eagerly: a term's required
//! set is closed under implication and its forbidden set holds every group
//! that implies a forbidden one. Subsumption between expressions is then
//! exact (see [`GroupGraph::le`]).

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Term {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl Term {
    fn is_contradictory(&self) -> bool {
        !self.include.is_disjoint(&self.exclude)
    }

    fn subsumes(&self, other: &Term) -> bool {
        self.include.is_subset(&other.include) && self.exclude.is_subset(&other.exclude)
    }

    fn and(&self, other: &Term) -> Term {
        Term {
            include: self.include.union(&other.include).cloned().collect(),
            exclude: self.exclude.union(&other.exclude).cloned().collect(),
        }
    }
}

/// A set of users described by group membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupsExpr {
    terms: Vec<Term>,
}

impl GroupsExpr {
    /// Every user.
    pub fn universe() -> Self {
        Self {
            terms: vec![Term::default()],
        }
    }

    /// No user at all.
    pub fn nobody() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn is_nobody(&self) -> bool {
        self.terms.is_empty()
    }

    /// Syntactically everyone; [`GroupGraph::is_universe`] is exact.
    pub fn is_trivial_universe(&self) -> bool {
        self.terms.iter().any(|t| t.include.is_empty() && t.exclude.is_empty())
    }

    fn from_terms(terms: Vec<Term>) -> Self {
        let mut terms: Vec<Term> = terms.into_iter().filter(|t| !t.is_contradictory()).collect();
        terms.sort();
        terms.dedup();
        let kept: Vec<Term> = terms
            .iter()
            .filter(|t| !terms.iter().any(|o| o != *t && o.subsumes(t)))
            .cloned()
            .collect();
        Self { terms: kept }
    }

    pub fn and(&self, other: &GroupsExpr) -> GroupsExpr {
        let mut terms = Vec::with_capacity(self.terms.len() * other.terms.len());
        for a in &self.terms {
            for b in &other.terms {
                terms.push(a.and(b));
            }
        }
        Self::from_terms(terms)
    }

    pub fn or(&self, other: &GroupsExpr) -> GroupsExpr {
        Self::from_terms(self.terms.iter().chain(&other.terms).cloned().collect())
    }

    /// Whether a user whose implication-closed groups are `groups` belongs to the set.
    pub fn admits(&self, groups: &BTreeSet<String>) -> bool {
        self.terms.iter().any(|t| {
            t.include.is_subset(groups) && t.exclude.is_disjoint(groups)
        })
    }
}

/// The group implication graph, with both transitive directions precomputed.
#[derive(Debug, Clone, Default)]
pub struct GroupGraph {
    /// Group → groups it implies, itself included.
    down: BTreeMap<String, BTreeSet<String>>,
    /// Group → groups implying it, itself included.
    up: BTreeMap<String, BTreeSet<String>>,
}

impl GroupGraph {
    pub fn new<'a, I>(groups: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (id, implied) in groups {
            let entry = edges.entry(id.to_string()).or_default();
            entry.extend(implied.iter().cloned());
            for target in implied {
                edges.entry(target.clone()).or_default();
            }
        }

        let mut down = BTreeMap::new();
        for id in edges.keys() {
            let mut seen = BTreeSet::new();
            let mut stack = vec![id.clone()];
            while let Some(cur) = stack.pop() {
                if !seen.insert(cur.clone()) {
                    continue;
                }
                if let Some(next) = edges.get(&cur) {
                    stack.extend(next.iter().cloned());
                }
            }
            down.insert(id.clone(), seen);
        }

        let mut up: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (id, implied) in &down {
            for target in implied {
                up.entry(target.clone()).or_default().insert(id.clone());
            }
        }

        Self { down, up }
    }

    pub fn contains(&self, group: &str) -> bool {
        self.down.contains_key(group)
    }

    fn implied(&self, group: &str) -> BTreeSet<String> {
        self.down
            .get(group)
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([group.to_string()]))
    }

    fn implying(&self, group: &str) -> BTreeSet<String> {
        self.up
            .get(group)
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([group.to_string()]))
    }

    /// Implication closure of a user's direct groups.
    pub fn user_groups(&self, direct: &BTreeSet<String>) -> BTreeSet<String> {
        direct.iter().flat_map(|g| self.implied(g)).collect()
    }

    /// Parse a `groups` attribute value.
    pub fn parse(&self, spec: &str) -> GroupsExpr {
        let mut include = Vec::new();
        let mut exclude = BTreeSet::new();
        for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.strip_prefix('!') {
                Some(neg) => exclude.extend(self.implying(neg.trim())),
                None => include.push(item),
            }
        }
        if include.is_empty() {
            return GroupsExpr::from_terms(vec![Term {
                include: BTreeSet::new(),
                exclude,
            }]);
        }
        GroupsExpr::from_terms(
            include
                .into_iter()
                .map(|g| Term {
                    include: self.implied(g),
                    exclude: exclude.clone(),
                })
                .collect(),
        )
    }

    /// Group names in `spec` this graph does not know.
    pub fn unknown<'s>(&self, spec: &'s str) -> Vec<&'s str> {
        spec.split(',')
            .map(|s| s.trim().trim_start_matches('!').trim())
            .filter(|s| !s.is_empty() && !self.contains(s))
            .collect()
    }

    /// Whether every user in `a` is also in `b`.
    pub fn le(&self, a: &GroupsExpr, b: &GroupsExpr) -> bool {
        a.terms.iter().all(|t| self.covered(t, &b.terms))
    }

    pub fn is_universe(&self, e: &GroupsExpr) -> bool {
        self.le(&GroupsExpr::universe(), e)
    }

    fn covered(&self, term: &Term, by: &[Term]) -> bool {
        if term.is_contradictory() || by.iter().any(|o| o.subsumes(term)) {
            return true;
        }
        // Case split on a group the term leaves undecided.
        let undecided = by
            .iter()
            .flat_map(|o| o.include.iter().chain(o.exclude.iter()))
            .find(|g| !term.include.contains(*g) && !term.exclude.contains(*g));
        let Some(group) = undecided else {
            return false;
        };
        let mut member = term.clone();
        member.include.extend(self.implied(group));
        let mut outsider = term.clone();
        outsider.exclude.extend(self.implying(group));
        self.covered(&member, by) && self.covered(&outsider, by)
    }

    /// Canonical text form, stored in `__groups_key__`.
    ///
    /// Terms are joined with ` | ` and literals with ` & `; forbidden groups
    /// carry a `!`. Implied groups are left out, [`Self::parse_key`] restores
    /// them. `*` is the empty term and `!*` the empty set.
    pub fn key(&self, e: &GroupsExpr) -> String {
        if e.is_nobody() {
            return "!*".to_string();
        }
        let terms: Vec<String> = e
            .terms
            .iter()
            .map(|t| {
                let include = t
                    .include
                    .iter()
                    .filter(|g| {
                        !t.include
                            .iter()
                            .any(|o| o != *g && self.implied(o).contains(*g))
                    })
                    .cloned();
                let exclude = t
                    .exclude
                    .iter()
                    .filter(|g| {
                        !t.exclude
                            .iter()
                            .any(|o| o != *g && self.implied(g).contains(o))
                    })
                    .map(|g| format!("!{g}"));
                let literals: Vec<String> = include.chain(exclude).collect();
                if literals.is_empty() {
                    "*".to_string()
                } else {
                    literals.join(" & ")
                }
            })
            .collect();
        terms.join(" | ")
    }

    pub fn parse_key(&self, key: &str) -> GroupsExpr {
        let key = key.trim();
        if key == "!*" {
            return GroupsExpr::nobody();
        }
        let terms = key
            .split(" | ")
            .map(|term| {
                let mut t = Term::default();
                for lit in term.split(" & ").map(str::trim) {
                    if lit == "*" || lit.is_empty() {
                        continue;
                    }
                    match lit.strip_prefix('!') {
                        Some(neg) => t.exclude.extend(self.implying(neg)),
                        None => t.include.extend(self.implied(lit)),
                    }
                }
                t
            })
            .collect();
        GroupsExpr::from_terms(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> GroupGraph {
        let user = vec![];
        let manager = vec!["base.group_user".to_string()];
        let portal = vec![];
        GroupGraph::new([
            ("base.group_user", user.as_slice()),
            ("base.group_system", manager.as_slice()),
            ("base.group_portal", portal.as_slice()),
        ])
    }

    #[test]
    fn implied_groups_are_subsumed() {
        let g = graph();
        let system = g.parse("base.group_system");
        let user = g.parse("base.group_user");
        assert!(g.le(&system, &user));
        assert!(!g.le(&user, &system));
    }

    #[test]
    fn negation_excludes_implying_groups() {
        let g = graph();
        let not_user = g.parse("!base.group_user");
        let groups = g.user_groups(&BTreeSet::from(["base.group_system".to_string()]));
        assert!(!not_user.admits(&groups));
        assert!(not_user.admits(&BTreeSet::new()));
    }

    #[test]
    fn case_split_proves_coverage() {
        let g = graph();
        let either = g.parse("base.group_portal").or(&g.parse("!base.group_portal"));
        assert!(g.is_universe(&either));
        assert!(!g.is_universe(&g.parse("base.group_portal")));
    }

    #[test]
    fn mixed_attribute_reads_as_conjunction_of_negations() {
        let g = graph();
        let e = g.parse("base.group_user,base.group_portal,!base.group_system");
        let system = g.user_groups(&BTreeSet::from(["base.group_system".to_string()]));
        let portal = g.user_groups(&BTreeSet::from(["base.group_portal".to_string()]));
        assert!(!e.admits(&system));
        assert!(e.admits(&portal));
    }

    #[test]
    fn intersection_can_be_empty() {
        let g = graph();
        let e = g.parse("base.group_user").and(&g.parse("!base.group_user"));
        assert!(e.is_nobody());
        assert_eq!(g.key(&e), "!*");
    }

    #[test]
    fn keys_round_trip() {
        let g = graph();
        for spec in ["base.group_system", "!base.group_user", "base.group_user,base.group_portal,!base.group_system"] {
            let e = g.parse(spec);
            assert_eq!(g.parse_key(&g.key(&e)), e, "{spec}");
        }
        assert_eq!(g.key(&g.parse("base.group_system")), "base.group_system");
        assert_eq!(g.key(&GroupsExpr::universe()), "*");
    }

    #[test]
    fn unknown_groups_are_reported() {
        let g = graph();
        assert_eq!(g.unknown("base.group_user,!nope.group"), vec!["nope.group"]);
    }
}

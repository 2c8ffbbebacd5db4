use std::collections::{BTreeMap, BTreeSet};

use openerp_arch::NodeId;

use crate::groups::{GroupGraph, GroupsExpr};

/// One place where an expression needs a field's value.
#[derive(Debug, Clone)]
pub(crate) struct FieldUse {
    pub groups: GroupsExpr,
    pub attr: String,
    pub expr: String,
    pub line: usize,
    pub validate: bool,
}

/// Names seen and names needed within one (sub)view.
#[derive(Debug)]
pub(crate) struct NameManager {
    pub model: String,
    pub parent: Option<usize>,
    /// Root of the (sub)view; missing fields are appended there.
    pub root: NodeId,
    pub view_type: String,
    /// Field name → groups of each occurrence.
    pub available_fields: BTreeMap<String, Vec<GroupsExpr>>,
    /// Names and ids of any node, for `<label for>`.
    pub available_names: BTreeSet<String>,
    pub mandatory_fields: BTreeMap<String, Vec<FieldUse>>,
    /// `for` targets of validated labels, with their line.
    pub labels: Vec<(String, usize)>,
}

impl NameManager {
    pub fn new(model: &str, parent: Option<usize>, root: NodeId, view_type: &str) -> Self {
        Self {
            model: model.to_string(),
            parent,
            root,
            view_type: view_type.to_string(),
            available_fields: BTreeMap::new(),
            available_names: BTreeSet::new(),
            mandatory_fields: BTreeMap::new(),
            labels: Vec::new(),
        }
    }

    pub fn has_field(&mut self, name: &str, groups: GroupsExpr) {
        self.available_fields
            .entry(name.to_string())
            .or_default()
            .push(groups);
        self.available_names.insert(name.to_string());
    }

    pub fn has_name(&mut self, name: &str) {
        self.available_names.insert(name.to_string());
    }

    pub fn must_have_field(&mut self, name: &str, usage: FieldUse) {
        self.mandatory_fields
            .entry(name.to_string())
            .or_default()
            .push(usage);
    }

    /// Users who can see at least one occurrence of `name`.
    pub fn available_groups(&self, name: &str) -> GroupsExpr {
        self.available_fields
            .get(name)
            .into_iter()
            .flatten()
            .fold(GroupsExpr::nobody(), |acc, g| acc.or(g))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.view_type.as_str(), "list" | "tree")
    }
}

/// Users who can see at least one of `uses`.
pub(crate) fn use_groups(uses: &[FieldUse]) -> GroupsExpr {
    uses.iter()
        .fold(GroupsExpr::nobody(), |acc, u| acc.or(&u.groups))
}

/// `a | b` written with keys, or `everyone` for the universe.
pub(crate) fn describe(graph: &GroupGraph, groups: &GroupsExpr) -> String {
    if graph.is_universe(groups) {
        "everyone".to_string()
    } else {
        graph.key(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_is_the_union_of_occurrences() {
        let empty: Vec<String> = Vec::new();
        let graph = GroupGraph::new([("g.a", empty.as_slice()), ("g.b", empty.as_slice())]);
        let root = openerp_arch::Arch::new("form").root();
        let mut manager = NameManager::new("m", None, root, "form");
        assert!(manager.available_groups("x").is_nobody());
        manager.has_field("x", graph.parse("g.a"));
        manager.has_field("x", graph.parse("!g.a"));
        assert!(graph.is_universe(&manager.available_groups("x")));
        assert!(manager.available_names.contains("x"));
    }
}

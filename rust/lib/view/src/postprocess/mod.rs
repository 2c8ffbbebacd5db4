//! Postprocessing of combined architectures.
//!
//! One depth-first pass over the tree, driven by an explicit stack of
//! frames carrying what flows down: the name manager of the enclosing
//! (sub)view, the groups that can see the node, whether the node is
//! editable and whether it must be validated. Tag-specific work lives in
//! small handlers looked up by tag (see [`tags`]).
//!
//! The pass is user independent. Group restrictions are folded into
//! `__groups_key__` markers and CRUD checks into `model_access_rights`
//! markers; [`crate::access::apply_user_access`] resolves both for one user.

mod checks;
mod names;
mod tags;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use openerp_arch::{Arch, NodeId};
use tracing::warn;

use crate::combine::VALIDATE_ATTR;
use crate::error::{ViewError, ViewErrorContext};
use crate::groups::{GroupGraph, GroupsExpr};
use crate::registry::{FieldInfo, Registry};

use names::{describe, use_groups, NameManager};

/// Marker holding the canonical groups of a node, see [`GroupGraph::key`].
pub const GROUPS_KEY_ATTR: &str = "__groups_key__";

/// Marker naming the model whose CRUD rights gate a node.
pub const ACCESS_RIGHTS_ATTR: &str = "model_access_rights";

/// Tags that open a nested view inside a relational field.
const SUBVIEW_TAGS: &[&str] = &["form", "list", "tree", "kanban", "graph", "calendar"];

/// View roots whose create/edit/delete buttons follow access rights.
const ACCESS_ROOTS: &[&str] = &["form", "list", "tree", "kanban", "calendar", "activity"];

#[derive(Debug, Clone, Default)]
pub struct PostprocessOptions {
    /// Report access inconsistencies as errors even outside validation.
    pub strict: bool,
    /// Context attached to every error, usually the combined view.
    pub context: ViewErrorContext,
}

#[derive(Debug, Clone)]
pub struct Postprocessed {
    pub arch: Arch,
    /// Model → fields the client has to read to render the view.
    pub fields: BTreeMap<String, BTreeSet<String>>,
    /// Model → field → users who can see at least one occurrence.
    pub field_groups: BTreeMap<String, BTreeMap<String, GroupsExpr>>,
    /// Non fatal findings, also logged.
    pub warnings: Vec<String>,
}

impl Postprocessed {
    /// An architecture with nothing to fetch, e.g. a QWeb template.
    pub fn bare(arch: Arch) -> Self {
        Self {
            arch,
            fields: BTreeMap::new(),
            field_groups: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// `fields` restricted to what a user with the implication-closed
    /// `groups` can see.
    pub fn visible_fields(&self, groups: &BTreeSet<String>) -> BTreeMap<String, BTreeSet<String>> {
        let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (model, names) in &self.fields {
            let visible = names.iter().filter(|name| {
                self.field_groups
                    .get(model)
                    .and_then(|g| g.get(*name))
                    .map_or(true, |g| g.admits(groups))
            });
            out.entry(model.clone()).or_default().extend(visible.cloned());
        }
        out
    }
}

/// State inherited from the parent node.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub node: NodeId,
    pub manager: usize,
    pub groups: GroupsExpr,
    pub editable: bool,
    pub validate: bool,
    /// Inside QWeb templates, where attributes are not view expressions.
    pub qweb: bool,
}

pub(crate) type TagFn = fn(&mut Walk<'_, '_>, &Frame) -> Result<(), ViewError>;

pub struct Postprocessor<'r> {
    registry: &'r Registry,
    groups: GroupGraph,
    postprocessors: HashMap<&'static str, TagFn>,
    validators: HashMap<&'static str, TagFn>,
}

impl<'r> Postprocessor<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            groups: registry.group_graph(),
            postprocessors: tags::postprocessors(),
            validators: tags::validators(),
        }
    }

    pub fn group_graph(&self) -> &GroupGraph {
        &self.groups
    }

    /// Postprocess `arch`, a combined architecture of a view on `model`.
    pub fn run(
        &self,
        arch: Arch,
        model: &str,
        opts: &PostprocessOptions,
    ) -> Result<Postprocessed, ViewError> {
        let mut walk = Walk {
            pp: self,
            opts,
            arch,
            managers: Vec::new(),
            warnings: Vec::new(),
        };
        let root = walk.arch.root();
        let top = walk.new_manager(model, None, root);
        let mut stack = vec![Frame {
            node: root,
            manager: top,
            groups: GroupsExpr::universe(),
            editable: true,
            validate: false,
            qweb: false,
        }];
        while let Some(frame) = stack.pop() {
            let frame = walk.visit(frame)?;
            let children: Vec<NodeId> = walk.arch.element_children(frame.node).collect();
            for child in children.into_iter().rev() {
                let manager = match walk.subview_model(&frame, child) {
                    Some(comodel) => walk.new_manager(&comodel, Some(frame.manager), child),
                    None => frame.manager,
                };
                stack.push(Frame {
                    node: child,
                    manager,
                    ..frame.clone()
                });
            }
        }
        walk.finish()
    }
}

pub(crate) struct Walk<'p, 'r> {
    pp: &'p Postprocessor<'r>,
    opts: &'p PostprocessOptions,
    pub arch: Arch,
    managers: Vec<NameManager>,
    warnings: Vec<String>,
}

impl<'p, 'r> Walk<'p, 'r> {
    pub fn registry(&self) -> &'r Registry {
        self.pp.registry
    }

    pub fn graph(&self) -> &GroupGraph {
        &self.pp.groups
    }

    pub fn manager(&self, idx: usize) -> &NameManager {
        &self.managers[idx]
    }

    pub fn manager_mut(&mut self, idx: usize) -> &mut NameManager {
        &mut self.managers[idx]
    }

    /// Field `name` of the model of manager `idx`.
    pub fn field(&self, idx: usize, name: &str) -> Option<&'r FieldInfo> {
        self.pp.registry.field(&self.managers[idx].model, name)
    }

    pub fn error(&self, line: usize, message: impl Into<String>) -> ViewError {
        let mut ctx = self.opts.context.clone();
        ctx.line = Some(line);
        ViewError::invalid(message, ctx)
    }

    pub fn node_error(&self, node: NodeId, message: impl Into<String>) -> ViewError {
        self.error(self.arch.line(node), message)
    }

    pub fn warn(&mut self, line: usize, message: impl Into<String>) {
        let message = message.into();
        let ctx = &self.opts.context;
        warn!(
            view = ?ctx.view_id,
            name = ?ctx.name,
            xml_id = ?ctx.xml_id,
            model = ?ctx.model,
            line,
            "{message}"
        );
        self.warnings.push(format!("{message} (line {line})"));
    }

    fn new_manager(&mut self, model: &str, parent: Option<usize>, root: NodeId) -> usize {
        let view_type = self.arch.tag(root).to_string();
        if ACCESS_ROOTS.contains(&view_type.as_str()) {
            self.arch.set(root, ACCESS_RIGHTS_ATTR, model);
        }
        self.managers
            .push(NameManager::new(model, parent, root, &view_type));
        self.managers.len() - 1
    }

    /// Comodel of the nested view rooted at `child`, if it opens one.
    fn subview_model(&self, frame: &Frame, child: NodeId) -> Option<String> {
        let parent_tag = self.arch.tag(frame.node);
        let child_tag = self.arch.tag(child);
        let name = if parent_tag == "field" && SUBVIEW_TAGS.contains(&child_tag) {
            self.arch.get(frame.node, "name")?
        } else if child_tag == "groupby" {
            self.arch.get(child, "name")?
        } else {
            return None;
        };
        let field = self.field(frame.manager, name)?;
        if field.is_relational() {
            field.relation.clone()
        } else {
            None
        }
    }

    /// Whether a node allows edition, given that its parent does.
    fn editable_node(&self, frame: &Frame, tag: &str) -> bool {
        let node = frame.node;
        let is_root = self.managers[frame.manager].root == node;
        match tag {
            "form" if is_root => true,
            "list" | "tree" if is_root => {
                self.arch.has_attr(node, "editable") || self.arch.has_attr(node, "multi_edit")
            }
            _ if is_root => false,
            "field" => match self.arch.get(node, "name") {
                Some(name) if self.field(frame.manager, name).is_some() => {
                    !matches!(self.arch.get(node, "readonly"), Some("1" | "True"))
                }
                _ => true,
            },
            _ => true,
        }
    }

    /// Process one node and return the state its children inherit.
    fn visit(&mut self, mut frame: Frame) -> Result<Frame, ViewError> {
        let node = frame.node;
        let tag = self.arch.tag(node).to_string();
        if self.arch.remove_attr(node, VALIDATE_ATTR).is_some() {
            frame.validate = true;
        }
        if tag == "templates" {
            frame.qweb = true;
        }

        let mut restricted = false;
        if let Some(spec) = self.arch.remove_attr(node, "groups") {
            if frame.validate {
                for unknown in self.graph().unknown(&spec) {
                    let message = format!("The group {unknown} defined in view does not exist!");
                    self.warn(self.arch.line(node), message);
                }
            }
            frame.groups = frame.groups.and(&self.graph().parse(&spec));
            restricted = true;
        }
        if tag == "field" && !frame.qweb {
            let field_groups = self
                .arch
                .get(node, "name")
                .and_then(|name| self.field(frame.manager, name))
                .and_then(|field| field.groups.as_deref());
            if let Some(spec) = field_groups {
                frame.groups = frame.groups.and(&self.graph().parse(spec));
                restricted = true;
            }
        }
        if restricted {
            let key = self.graph().key(&frame.groups);
            self.arch.set(node, GROUPS_KEY_ATTR, key);
        }

        frame.editable = frame.editable && self.editable_node(&frame, &tag);

        for attr in ["name", "id"] {
            if let Some(value) = self.arch.get(node, attr).map(str::to_string) {
                self.managers[frame.manager].has_name(&value);
            }
        }

        if frame.qweb {
            if frame.validate {
                checks::accessibility(self, node);
            }
            return Ok(frame);
        }

        if let Some(handler) = self.pp.postprocessors.get(tag.as_str()) {
            handler(self, &frame)?;
        }
        if frame.validate {
            if let Some(validator) = self.pp.validators.get(tag.as_str()) {
                validator(self, &frame)?;
            }
            checks::validate_attributes(self, &frame)?;
        }
        checks::collect_expressions(self, &frame)?;
        Ok(frame)
    }

    /// Resolve what the managers still need, innermost (sub)views first.
    fn finish(mut self) -> Result<Postprocessed, ViewError> {
        for idx in (0..self.managers.len()).rev() {
            self.check_mandatory_fields(idx)?;
            self.check_labels(idx)?;
        }

        let mut fields: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut field_groups: BTreeMap<String, BTreeMap<String, GroupsExpr>> = BTreeMap::new();
        for manager in &self.managers {
            let names = fields.entry(manager.model.clone()).or_default();
            let groups = field_groups.entry(manager.model.clone()).or_default();
            for name in manager.available_fields.keys() {
                if self.pp.registry.field(&manager.model, name).is_none() {
                    continue;
                }
                names.insert(name.clone());
                let seen = manager.available_groups(name);
                let merged = match groups.get(name) {
                    Some(prev) => prev.or(&seen),
                    None => seen,
                };
                groups.insert(name.clone(), merged);
            }
        }
        Ok(Postprocessed {
            arch: self.arch,
            fields,
            field_groups,
            warnings: self.warnings,
        })
    }

    fn check_mandatory_fields(&mut self, idx: usize) -> Result<(), ViewError> {
        let mandatory = std::mem::take(&mut self.managers[idx].mandatory_fields);
        let model = self.managers[idx].model.clone();
        for (name, uses) in mandatory {
            let Some(field) = self.pp.registry.field(&model, &name) else {
                let first = &uses[0];
                let message = format!(
                    "Field \"{name}\" does not exist in model \"{model}\" (used in {}=\"{}\")",
                    first.attr, first.expr
                );
                match uses.iter().find(|u| u.validate) {
                    Some(u) => return Err(self.error(u.line, message)),
                    None => {
                        self.warn(first.line, message);
                        continue;
                    }
                }
            };

            let field_groups = match &field.groups {
                Some(spec) => self.graph().parse(spec),
                None => GroupsExpr::universe(),
            };
            if let Some(u) = uses.iter().find(|u| !self.graph().le(&u.groups, &field_groups)) {
                let message = format!(
                    "Field \"{name}\" is restricted to groups {} but is used in {}=\"{}\" \
                     which is visible to {}: users of these groups cannot read the field",
                    describe(self.graph(), &field_groups),
                    u.attr,
                    u.expr,
                    describe(self.graph(), &u.groups),
                );
                if u.validate || self.opts.strict {
                    return Err(self.error(u.line, message));
                }
                self.warn(u.line, message);
            }

            let needed = use_groups(&uses);
            let available = self.managers[idx].available_groups(&name);
            if self.graph().le(&needed, &available) {
                continue;
            }
            let groups = needed.and(&field_groups);
            if groups.is_nobody() {
                continue;
            }
            self.add_hidden_field(idx, &name, &groups);
            self.managers[idx].has_field(&name, groups);
        }
        Ok(())
    }

    /// `<field name="x" invisible="True" readonly="True"/>` at the end of the (sub)view.
    fn add_hidden_field(&mut self, idx: usize, name: &str, groups: &GroupsExpr) {
        let root = self.managers[idx].root;
        let hidden = if self.managers[idx].is_list() {
            "column_invisible"
        } else {
            "invisible"
        };
        let node = self.arch.create_element("field");
        self.arch.set(node, "name", name);
        self.arch.set(node, hidden, "True");
        self.arch.set(node, "readonly", "True");
        if !self.graph().is_universe(groups) {
            let key = self.graph().key(groups);
            self.arch.set(node, GROUPS_KEY_ATTR, key);
        }
        self.arch.append(root, node);
    }

    fn check_labels(&mut self, idx: usize) -> Result<(), ViewError> {
        let labels = std::mem::take(&mut self.managers[idx].labels);
        for (target, line) in labels {
            if !self.managers[idx].available_names.contains(&target) {
                return Err(self.error(
                    line,
                    format!(
                        "Name or id '{target}' in <label for=\"...\"> must be present in view but is missing."
                    ),
                ));
            }
        }
        Ok(())
    }
}

//! Combining a view with the views that inherit from it.
//!
//! The combined architecture starts from the top of the `inherit_id` chain
//! and folds inheriting views in a queue: extensions are applied depth
//! first, primary views are deferred until every extension of the level has
//! been applied, so a primary child sees its parent fully extended.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use openerp_arch::{Arch, NodeId};
use tracing::{debug, warn};

use crate::error::{InheritError, ViewError, ViewErrorContext};
use crate::inherit::{apply_inheritance_specs_with, ApplyOptions};
use crate::record::{View, ViewId, ViewMode};

/// Attribute carrying the validation marker through combination.
pub const VALIDATE_ATTR: &str = "__validate__";

/// Attributes holding user-visible, translatable text.
pub const TRANSLATED_ATTRS: &[&str] = &[
    "string",
    "add-label",
    "help",
    "sum",
    "avg",
    "confirm",
    "placeholder",
    "alt",
    "title",
    "aria-label",
    "aria-keyshortcuts",
    "aria-placeholder",
    "aria-roledescription",
    "aria-valuetext",
    "value_label",
    "data-tooltip",
    "data-editor-message",
    "label",
];

/// Which parts of the combined architecture get validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Validation {
    #[default]
    None,
    Full,
    /// Only what the given views contribute.
    Partial(BTreeSet<ViewId>),
}

impl Validation {
    fn covers(&self, id: ViewId) -> bool {
        match self {
            Validation::None => false,
            Validation::Full => true,
            Validation::Partial(ids) => ids.contains(&id),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CombineOptions {
    /// While modules load, only views of loaded modules take part.
    pub loaded_modules: Option<BTreeSet<String>>,
    /// Views taking part even when inactive or not yet loaded.
    pub force: BTreeSet<ViewId>,
    pub validation: Validation,
    /// Tag the root and every inserted element with the view it comes
    /// from (`data-oe-id`, `data-oe-xpath`, ...), for in-place editing.
    pub inherit_branding: bool,
}

impl CombineOptions {
    fn admits(&self, view: &View) -> bool {
        if self.force.contains(&view.id) {
            return true;
        }
        if !view.active {
            return false;
        }
        match &self.loaded_modules {
            Some(loaded) => view.module.as_ref().is_some_and(|m| loaded.contains(m)),
            None => true,
        }
    }
}

/// Index of a set of views by id and by parent.
pub struct ViewGraph<'a> {
    views: BTreeMap<ViewId, &'a View>,
    children: BTreeMap<ViewId, Vec<&'a View>>,
}

impl<'a> ViewGraph<'a> {
    pub fn new<I>(views: I) -> Self
    where
        I: IntoIterator<Item = &'a View>,
    {
        let views: BTreeMap<ViewId, &View> = views.into_iter().map(|v| (v.id, v)).collect();
        let mut children: BTreeMap<ViewId, Vec<&View>> = BTreeMap::new();
        for &view in views.values() {
            if let Some(parent) = view.inherit_id {
                children.entry(parent).or_default().push(view);
            }
        }
        for list in children.values_mut() {
            list.sort_by_key(|v| v.sort_key());
        }
        Self { views, children }
    }

    pub fn get(&self, id: ViewId) -> Option<&'a View> {
        self.views.get(&id).copied()
    }

    /// Direct children, ordered by `(priority, id)`.
    pub fn children(&self, id: ViewId) -> &[&'a View] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// The view and its ancestors, nearest first.
    pub fn ancestry(&self, id: ViewId) -> Result<Vec<&'a View>, ViewError> {
        let mut chain: Vec<&View> = Vec::new();
        let mut seen = BTreeSet::new();
        let mut cur = Some(id);
        while let Some(cur_id) = cur {
            if !seen.insert(cur_id) {
                let view = self.get(id).ok_or(ViewError::NotFound(id))?;
                return Err(ViewError::invalid(
                    "You cannot create recursive inherited views.",
                    self.context(view),
                ));
            }
            let view = self.get(cur_id).ok_or(ViewError::NotFound(cur_id))?;
            chain.push(view);
            cur = view.inherit_id;
        }
        Ok(chain)
    }

    /// Whether following parents from `id` comes back to a visited view.
    pub fn has_cycle(&self, id: ViewId) -> bool {
        let mut seen = BTreeSet::new();
        let mut cur = Some(id);
        while let Some(cur_id) = cur {
            if !seen.insert(cur_id) {
                return true;
            }
            cur = self.get(cur_id).and_then(|v| v.inherit_id);
        }
        false
    }

    /// Error context naming `view`.
    pub fn context(&self, view: &View) -> ViewErrorContext {
        ViewErrorContext {
            view_id: Some(view.id),
            name: Some(view.name.clone()),
            xml_id: view.xml_id.clone(),
            model: Some(view.model.clone()),
            parent: view
                .inherit_id
                .map(|p| self.get(p).map_or_else(|| p.to_string(), |v| v.display_name())),
            ..Default::default()
        }
    }

    /// The chain plus the extensions inheriting from it, grouped by parent.
    /// An extension only joins when it targets the same model as its parent.
    fn hierarchy(
        &self,
        chain: &[&'a View],
        opts: &CombineOptions,
    ) -> BTreeMap<ViewId, Vec<&'a View>> {
        let mut included: BTreeMap<ViewId, &View> = chain.iter().map(|v| (v.id, *v)).collect();
        let mut stack: Vec<&View> = chain.to_vec();
        while let Some(parent) = stack.pop() {
            for &child in self.children(parent.id) {
                if child.mode == ViewMode::Extension
                    && child.model == parent.model
                    && opts.admits(child)
                    && !included.contains_key(&child.id)
                {
                    included.insert(child.id, child);
                    stack.push(child);
                }
            }
        }
        let mut views: Vec<&View> = included.into_values().collect();
        views.sort_by_key(|v| v.sort_key());
        let mut out: BTreeMap<ViewId, Vec<&View>> = BTreeMap::new();
        for view in views {
            if let Some(parent) = view.inherit_id {
                out.entry(parent).or_default().push(view);
            }
        }
        out
    }

    /// Combined architecture of view `id`.
    pub fn combined_arch(&self, id: ViewId, opts: &CombineOptions) -> Result<Arch, ViewError> {
        let chain = self.ancestry(id)?;
        let Some(root) = chain.last().copied() else {
            return Err(ViewError::NotFound(id));
        };
        let hierarchy = self.hierarchy(&chain, opts);
        // Validating the root view means validating everything.
        let full = opts.validation.covers(root.id);

        let mut arch = self.parse(root)?;
        if opts.inherit_branding {
            let top = arch.root();
            arch.set(top, "data-oe-model", "ir.ui.view");
            arch.set(top, "data-oe-id", root.id.to_string());
            arch.set(top, "data-oe-field", "arch");
        }
        let apply_opts = ApplyOptions {
            inherit_branding: opts.inherit_branding,
        };
        let mut queue: VecDeque<&View> = VecDeque::new();
        let mut first: Vec<&View> = hierarchy.get(&root.id).cloned().unwrap_or_default();
        first.sort_by_key(|v| v.mode);
        queue.extend(first);

        while let Some(view) = queue.pop_front() {
            let mut specs = self.parse(view)?;
            if opts.inherit_branding {
                inherit_branding(&mut specs, view.id);
            }
            let reshapes = !full && opts.validation.covers(view.id) && flag_specs(&mut specs);
            debug!(view = view.id, parent = ?view.inherit_id, "applying inheriting view");
            apply_inheritance_specs_with(&mut arch, &specs, &apply_opts).map_err(|err| {
                let mut ctx = self.context(view);
                ctx.line = Some(err.line());
                ViewError::invalid(err.to_string(), ctx)
            })?;
            if reshapes {
                let top = arch.root();
                arch.set(top, VALIDATE_ATTR, "1");
            }
            for child in hierarchy.get(&view.id).into_iter().flatten().rev() {
                match child.mode {
                    ViewMode::Primary => queue.push_back(*child),
                    ViewMode::Extension => queue.push_front(*child),
                }
            }
        }

        if full {
            let root_node = arch.root();
            arch.set(root_node, VALIDATE_ATTR, "1");
        }
        Ok(arch)
    }

    fn parse(&self, view: &View) -> Result<Arch, ViewError> {
        Arch::parse(&view.arch).map_err(|err| {
            let message = err.to_string();
            let ctx = ViewErrorContext {
                line: ViewErrorContext::from(err).line,
                ..self.context(view)
            };
            ViewError::invalid(message, ctx)
        })
    }
}

/// Mark what an inheriting view contributes for partial validation:
/// inserted elements, and the targets of attribute changes.
///
/// Returns `true` when a spec replaces a node. The whole combined
/// architecture must then be validated, since the replacement may have
/// reshaped anything around it.
pub fn flag_specs(specs: &mut Arch) -> bool {
    let root = specs.root();
    for node in specs.descendants(root) {
        if !specs.is_element(node) {
            continue;
        }
        match specs.get(node, "position") {
            Some("after" | "before" | "inside") => {
                let inserted: Vec<_> = specs
                    .element_children(node)
                    .filter(|c| !specs.has_attr(*c, "position"))
                    .collect();
                for child in inserted {
                    specs.set(child, VALIDATE_ATTR, "1");
                }
            }
            Some("replace") => return true,
            Some("attributes") => {
                let attr = specs.create_element("attribute");
                specs.set(attr, "name", VALIDATE_ATTR);
                specs.set_text(attr, Some("1".to_string()));
                specs.append(node, attr);
            }
            _ => {}
        }
    }
    false
}

/// Brand the elements `view` inserts with where they come from.
///
/// Spec nodes (`data`, `xpath`, anything with a `position`) are walked
/// through; the first element below them is content and gets the
/// `data-oe-*` attributes, its own descendants are left alone.
/// `t-field` elements only get their path.
pub fn inherit_branding(specs: &mut Arch, view: ViewId) {
    fn walk(specs: &mut Arch, node: NodeId, view: ViewId) {
        let children: Vec<_> = specs.element_children(node).collect();
        for child in children {
            let path = specs.path(child);
            let tag = specs.tag(child);
            if tag == "data" || tag == "xpath" || specs.has_attr(child, "position") {
                walk(specs, child, view);
            } else if specs.has_attr(child, "t-field") {
                specs.set(child, "data-oe-xpath", path);
                walk(specs, child, view);
            } else {
                specs.set(child, "data-oe-id", view.to_string());
                specs.set(child, "data-oe-xpath", path);
                specs.set(child, "data-oe-model", "ir.ui.view");
                specs.set(child, "data-oe-field", "arch");
            }
        }
    }
    let root = specs.root();
    walk(specs, root, view);
}

// ── Selector checks ───────────────────────────────────────────────────

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// First `@attr` of `expr` naming a translated attribute.
fn translated_in_xpath(expr: &str) -> Option<&'static str> {
    expr.match_indices('@').find_map(|(i, _)| {
        let rest = &expr[i + 1..];
        TRANSLATED_ATTRS.iter().copied().find(|attr| {
            rest.strip_prefix(attr)
                .is_some_and(|after| !after.chars().next().is_some_and(is_word_char))
        })
    })
}

/// `@class = ...`, `... = @class` or `contains(@class, ...)`.
fn selects_on_class(expr: &str) -> bool {
    expr.match_indices("@class").any(|(i, _)| {
        let after = expr[i + "@class".len()..].trim_start();
        let before = expr[..i].trim_end();
        after.starts_with('=')
            || before.ends_with('=')
            || expr[..i].ends_with("contains(")
    })
}

/// Reject inheritance specs that select nodes through translated text,
/// which differs from one language to another.
pub fn check_selectors(view: &View, specs: &Arch) -> Result<(), InheritError> {
    for node in specs.descendants(specs.root()) {
        if !specs.is_element(node) || !specs.has_attr(node, "position") {
            continue;
        }
        let line = specs.line(node);
        if specs.tag(node) == "xpath" {
            let expr = specs.get(node, "expr").unwrap_or_default();
            if let Some(attribute) = translated_in_xpath(expr) {
                return Err(InheritError::TranslatedSelector {
                    attribute: attribute.to_string(),
                    line,
                });
            }
            if selects_on_class(expr) {
                warn!(
                    view = view.id,
                    name = %view.name,
                    xml_id = ?view.xml_id,
                    "error-prone use of @class in view: use hasclass(*classes) to filter elements by their classes"
                );
            }
        } else if let Some(attribute) = TRANSLATED_ATTRS
            .iter()
            .find(|attr| specs.get(node, attr).is_some_and(|v| !v.is_empty()))
        {
            return Err(InheritError::TranslatedSelector {
                attribute: attribute.to_string(),
                line,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewView;

    fn after(model: &str, parent: ViewId, tag: &str) -> NewView {
        NewView::new(tag, model, format!(r#"<xpath expr="//a1" position="after"><{tag}/></xpath>"#))
            .inherit(parent)
    }

    /// a1 ← a2 (5), a3, a4 (primary); a3 ← b1 (model b) ← b2;
    /// a1 ← c1 (primary, model c) ← c2 (5) ← c3 (10); b1 ← d1 (primary, model a).
    fn fixture() -> Vec<View> {
        vec![
            NewView::new("a1", "a", "<qweb><a1/></qweb>").into_view(1),
            after("a", 1, "a2").priority(5).into_view(2),
            after("a", 1, "a3").into_view(3),
            after("a", 1, "a4").mode(ViewMode::Primary).into_view(4),
            after("b", 3, "b1").into_view(5),
            after("b", 5, "b2").into_view(6),
            after("c", 1, "c1").mode(ViewMode::Primary).into_view(7),
            after("c", 7, "c2").priority(5).into_view(8),
            after("c", 8, "c3").priority(10).into_view(9),
            after("a", 5, "d1").mode(ViewMode::Primary).into_view(10),
        ]
    }

    fn combined(views: &[View], id: ViewId) -> String {
        let graph = ViewGraph::new(views);
        graph
            .combined_arch(id, &CombineOptions::default())
            .unwrap()
            .to_xml()
    }

    fn order(tags: &[&str]) -> String {
        let inner: String = tags.iter().map(|t| format!("<{t}/>")).collect();
        format!("<qweb>{inner}</qweb>")
    }

    #[test]
    fn root_view_gets_its_extensions() {
        let views = fixture();
        assert_eq!(combined(&views, 1), order(&["a1", "a3", "a2"]));
        assert_eq!(combined(&views, 3), order(&["a1", "a3", "a2"]));
    }

    #[test]
    fn primary_child_applies_after_extensions() {
        let views = fixture();
        assert_eq!(combined(&views, 4), order(&["a1", "a4", "a3", "a2"]));
    }

    #[test]
    fn primary_on_other_model_takes_its_own_extensions() {
        let views = fixture();
        assert_eq!(
            combined(&views, 8),
            order(&["a1", "c3", "c2", "c1", "a3", "a2"])
        );
    }

    #[test]
    fn primary_deep_in_the_tree() {
        let views = fixture();
        assert_eq!(
            combined(&views, 10),
            order(&["a1", "d1", "b2", "b1", "a3", "a2"])
        );
    }

    #[test]
    fn later_priorities_end_up_closer_to_the_target() {
        let views = vec![
            NewView::new("base", "m", r#"<root><item order="1"/></root>"#).into_view(1),
            NewView::new("p5", "m", r#"<xpath expr="//item[@order='1']" position="after"><item order="2"/></xpath>"#)
                .inherit(1)
                .priority(5)
                .into_view(2),
            NewView::new("p10", "m", r#"<xpath expr="//item[@order='1']" position="after"><item order="3"/></xpath>"#)
                .inherit(1)
                .priority(10)
                .into_view(3),
        ];
        assert_eq!(
            combined(&views, 1),
            r#"<root><item order="1"/><item order="3"/><item order="2"/></root>"#
        );
    }

    #[test]
    fn inactive_views_are_skipped_unless_forced() {
        let mut views = fixture();
        views[2].active = false;
        assert_eq!(combined(&views, 1), order(&["a1", "a2"]));

        let graph = ViewGraph::new(&views);
        let opts = CombineOptions {
            force: BTreeSet::from([3]),
            ..Default::default()
        };
        let arch = graph.combined_arch(1, &opts).unwrap();
        assert_eq!(arch.to_xml(), order(&["a1", "a3", "a2"]));
    }

    #[test]
    fn loaded_modules_filter_inheriting_views() {
        let mut views = fixture();
        for v in views.iter_mut() {
            v.module = Some(if v.id == 2 { "late" } else { "base" }.to_string());
        }
        let graph = ViewGraph::new(&views);
        let opts = CombineOptions {
            loaded_modules: Some(BTreeSet::from(["base".to_string()])),
            ..Default::default()
        };
        let arch = graph.combined_arch(1, &opts).unwrap();
        assert_eq!(arch.to_xml(), order(&["a1", "a3"]));
    }

    #[test]
    fn cycles_are_reported() {
        let mut views = fixture();
        views[0].inherit_id = Some(3);
        let graph = ViewGraph::new(&views);
        assert!(graph.has_cycle(3));
        let err = graph.combined_arch(3, &CombineOptions::default()).unwrap_err();
        assert!(err.message().contains("recursive"));
    }

    #[test]
    fn apply_errors_carry_view_context() {
        let views = vec![
            NewView::new("base", "m", "<form/>").into_view(1),
            NewView::new("ext", "m", "<data>\n<field name=\"x\" position=\"after\"/>\n</data>")
                .inherit(1)
                .xml_id("mod.ext")
                .into_view(2),
        ];
        let graph = ViewGraph::new(&views);
        let err = graph.combined_arch(1, &CombineOptions::default()).unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.view_id, Some(2));
        assert_eq!(ctx.xml_id.as_deref(), Some("mod.ext"));
        assert_eq!(ctx.line, Some(2));
        assert!(err.to_string().contains("cannot be located in parent view"));
    }

    #[test]
    fn partial_validation_flags_contributions() {
        let views = vec![
            NewView::new("base", "m", r#"<form><field name="a"/></form>"#).into_view(1),
            NewView::new(
                "ext",
                "m",
                r#"<data><field name="a" position="after"><field name="b"/></field><field name="a" position="attributes"><attribute name="string">A</attribute></field></data>"#,
            )
            .inherit(1)
            .into_view(2),
        ];
        let graph = ViewGraph::new(&views);
        let opts = CombineOptions {
            validation: Validation::Partial(BTreeSet::from([2])),
            ..Default::default()
        };
        let arch = graph.combined_arch(1, &opts).unwrap();
        assert_eq!(
            arch.to_xml(),
            r#"<form><field name="a" string="A" __validate__="1"/><field name="b" __validate__="1"/></form>"#
        );

        let opts = CombineOptions {
            validation: Validation::Full,
            ..Default::default()
        };
        let arch = graph.combined_arch(1, &opts).unwrap();
        assert_eq!(arch.get(arch.root(), VALIDATE_ATTR), Some("1"));
        assert!(!arch.to_xml().contains(r#"<field name="b" __validate__"#));
    }

    #[test]
    fn replacing_specs_validate_everything() {
        let views = vec![
            NewView::new(
                "base",
                "m",
                r#"<form><notebook><page name="p"/></notebook><group name="g"/></form>"#,
            )
            .into_view(1),
            NewView::new(
                "ext",
                "m",
                r#"<group name="g" position="replace"><page name="p" position="move"/></group>"#,
            )
            .inherit(1)
            .into_view(2),
        ];
        let graph = ViewGraph::new(&views);
        let opts = CombineOptions {
            validation: Validation::Partial(BTreeSet::from([2])),
            ..Default::default()
        };
        let arch = graph.combined_arch(1, &opts).unwrap();
        assert_eq!(
            arch.to_xml(),
            r#"<form __validate__="1"><notebook/><page name="p"/></form>"#
        );

        // Not validated when another view is the one being checked.
        let opts = CombineOptions {
            validation: Validation::Partial(BTreeSet::from([3])),
            ..Default::default()
        };
        let arch = graph.combined_arch(1, &opts).unwrap();
        assert_eq!(arch.get(arch.root(), VALIDATE_ATTR), None);
    }

    #[test]
    fn combining_is_deterministic() {
        let views = fixture();
        for view in &views {
            assert_eq!(combined(&views, view.id), combined(&views, view.id));
        }

        let views = vec![
            NewView::new("base", "m", "<form>\n    <field name=\"a\"/> tail\n</form>").into_view(1),
            NewView::new(
                "ext",
                "m",
                "<data>\n    <field name=\"a\" position=\"before\">\n        <b/> x\n    </field>\n    <field name=\"a\" position=\"replace\"><i>$0</i></field>\n</data>",
            )
            .inherit(1)
            .into_view(2),
        ];
        let first = combined(&views, 1);
        assert_eq!(first, combined(&views, 1));
        assert_eq!(first.matches("tail").count(), 1);
    }

    #[test]
    fn branding_tags_inserted_elements() {
        let views = vec![
            NewView::new("base", "m", r#"<form><field name="a"/></form>"#).into_view(1),
            NewView::new(
                "ext",
                "m",
                r#"<data><field name="a" position="after"><div><span/></div><field name="b" t-field="x"/></field><xpath expr="//field[@name='a']" position="before"><p/></xpath></data>"#,
            )
            .inherit(1)
            .into_view(2),
        ];
        let graph = ViewGraph::new(&views);
        let opts = CombineOptions {
            inherit_branding: true,
            ..Default::default()
        };
        let arch = graph.combined_arch(1, &opts).unwrap();
        assert_eq!(
            arch.to_xml(),
            concat!(
                r#"<form data-oe-model="ir.ui.view" data-oe-id="1" data-oe-field="arch">"#,
                r#"<p data-oe-id="2" data-oe-xpath="/data/xpath/p" data-oe-model="ir.ui.view" data-oe-field="arch"/>"#,
                r#"<field name="a"/>"#,
                r#"<div data-oe-id="2" data-oe-xpath="/data/field/div" data-oe-model="ir.ui.view" data-oe-field="arch"><span/></div>"#,
                r#"<field name="b" t-field="x" data-oe-xpath="/data/field/field"/>"#,
                r#"</form>"#,
            )
        );
        // Off by default.
        assert!(!combined(&views, 1).contains("data-oe-"));
    }

    #[test]
    fn translated_selectors_are_rejected() {
        let view = NewView::new("v", "m", "").into_view(1);
        let specs = Arch::parse(r#"<xpath expr="//field[@string='Name']" position="after"/>"#).unwrap();
        assert_eq!(
            check_selectors(&view, &specs),
            Err(InheritError::TranslatedSelector {
                attribute: "string".into(),
                line: 1
            })
        );
        let specs = Arch::parse(r#"<data><group help="x" position="inside"/></data>"#).unwrap();
        assert!(check_selectors(&view, &specs).is_err());
        let specs = Arch::parse(r#"<xpath expr="//field[@stringy='x']" position="after"/>"#).unwrap();
        assert!(check_selectors(&view, &specs).is_ok());
        assert!(selects_on_class("//div[@class='o_x']"));
        assert!(selects_on_class("//div[contains(@class, 'x')]"));
        assert!(!selects_on_class("//div[hasclass('x')]"));
    }
}

//! Per-tag handlers. Postprocessors always run; validators only run on
//! nodes marked for validation.

use std::collections::HashMap;

use crate::error::ViewError;
use crate::registry::FieldType;

use super::{Frame, TagFn, Walk, ACCESS_RIGHTS_ATTR};

pub(super) fn postprocessors() -> HashMap<&'static str, TagFn> {
    HashMap::from([
        ("field", postprocess_field as TagFn),
        ("groupby", postprocess_groupby as TagFn),
    ])
}

pub(super) fn validators() -> HashMap<&'static str, TagFn> {
    HashMap::from([
        ("field", validate_field as TagFn),
        ("groupby", validate_groupby as TagFn),
        ("label", validate_label as TagFn),
        ("button", validate_button as TagFn),
        ("page", validate_page as TagFn),
        ("list", validate_list as TagFn),
        ("tree", validate_list as TagFn),
        ("graph", validate_graph as TagFn),
        ("search", validate_search as TagFn),
    ])
}

// ── field ──

fn postprocess_field(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    let node = frame.node;
    let Some(name) = walk.arch.get(node, "name").map(str::to_string) else {
        return Ok(());
    };
    let Some(field) = walk.field(frame.manager, &name) else {
        let model = &walk.manager(frame.manager).model;
        let message = format!("Field \"{name}\" does not exist in model \"{model}\"");
        if frame.validate {
            return Err(walk.node_error(node, message));
        }
        walk.warn(walk.arch.line(node), message);
        return Ok(());
    };

    walk.manager_mut(frame.manager)
        .has_field(&name, frame.groups.clone());

    if frame.editable
        && matches!(field.field_type, FieldType::Many2one | FieldType::Many2many)
    {
        if let Some(comodel) = &field.relation {
            walk.arch.set(node, ACCESS_RIGHTS_ATTR, comodel.as_str());
        }
    }
    if field.readonly && !walk.arch.has_attr(node, "readonly") {
        walk.arch.set(node, "readonly", "True");
    }
    if field.required && !walk.arch.has_attr(node, "required") {
        walk.arch.set(node, "required", "True");
    }
    Ok(())
}

fn validate_field(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    if !walk.arch.has_attr(frame.node, "name") {
        return Err(walk.node_error(
            frame.node,
            "Field tag must have a \"name\" attribute defined",
        ));
    }
    Ok(())
}

// ── groupby ──

/// Manager of the list holding a `<groupby>`: the groupby opens a nested
/// view on the comodel when its field is relational.
fn groupby_owner(walk: &Walk<'_, '_>, frame: &Frame) -> usize {
    let manager = walk.manager(frame.manager);
    match manager.parent {
        Some(parent) if manager.root == frame.node => parent,
        _ => frame.manager,
    }
}

fn postprocess_groupby(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    let owner = groupby_owner(walk, frame);
    if let Some(name) = walk.arch.get(frame.node, "name").map(str::to_string) {
        if walk.field(owner, &name).is_some() {
            walk.manager_mut(owner).has_field(&name, frame.groups.clone());
        }
    }
    Ok(())
}

fn validate_groupby(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    let owner = groupby_owner(walk, frame);
    let name = walk.arch.get(frame.node, "name").unwrap_or_default();
    match walk.field(owner, name) {
        None => {
            let model = &walk.manager(owner).model;
            Err(walk.node_error(
                frame.node,
                format!("Field '{name}' found in 'groupby' node does not exist in model {model}"),
            ))
        }
        Some(field) if field.field_type != FieldType::Many2one => Err(walk.node_error(
            frame.node,
            format!(
                "Field '{name}' found in 'groupby' node can only be of type many2one, found {:?}",
                field.field_type
            ),
        )),
        Some(_) => Ok(()),
    }
}

// ── label / button / page ──

fn validate_label(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    match walk.arch.get(frame.node, "for").map(str::to_string) {
        Some(target) => {
            let line = walk.arch.line(frame.node);
            walk.manager_mut(frame.manager).labels.push((target, line));
            Ok(())
        }
        None => Err(walk.node_error(
            frame.node,
            "Label tag must contain a \"for\". To match label style without corresponding \
             field or button, use 'class=\"o_form_label\"'.",
        )),
    }
}

fn validate_button(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    let node = frame.node;
    if let Some(special) = walk.arch.get(node, "special") {
        if !matches!(special, "cancel" | "save" | "add") {
            return Err(walk.node_error(node, format!("Invalid special '{special}' in button")));
        }
        return Ok(());
    }
    match walk.arch.get(node, "type") {
        None | Some("edit") => Ok(()),
        Some(_) if !walk.arch.get(node, "name").is_some_and(|n| !n.is_empty()) => {
            Err(walk.node_error(node, "Button must have a name"))
        }
        Some(_) => Ok(()),
    }
}

fn validate_page(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    let parent = walk.arch.parent(frame.node);
    if parent.map(|p| walk.arch.tag(p)) != Some("notebook") {
        return Err(walk.node_error(frame.node, "Page direct ancestor must be notebook"));
    }
    Ok(())
}

// ── view roots ──

const LIST_CHILDREN: &[&str] = &["field", "button", "control", "groupby", "widget", "header"];

fn validate_list(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    let wrong = walk
        .arch
        .element_children(frame.node)
        .find(|c| !LIST_CHILDREN.contains(&walk.arch.tag(*c)));
    if let Some(child) = wrong {
        let message = format!(
            "List child can only have one of {} tag (not {})",
            LIST_CHILDREN.join(", "),
            walk.arch.tag(child)
        );
        return Err(walk.node_error(child, message));
    }
    Ok(())
}

fn validate_graph(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    let wrong = walk
        .arch
        .element_children(frame.node)
        .find(|c| walk.arch.tag(*c) != "field");
    if let Some(child) = wrong {
        let message = format!(
            "A <graph> can only contains <field> nodes, found a <{}>",
            walk.arch.tag(child)
        );
        return Err(walk.node_error(child, message));
    }
    Ok(())
}

fn validate_search(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    let node = frame.node;
    let panels = walk
        .arch
        .element_children(node)
        .filter(|c| walk.arch.tag(*c) == "searchpanel")
        .count();
    if panels > 1 {
        return Err(walk.node_error(node, "Search tag can only contain one search panel"));
    }
    if walk.arch.iter_tag(node, "field").is_empty() {
        walk.warn(walk.arch.line(node), "Search tag requires at least one field element");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use openerp_arch::Arch;

    use crate::combine::VALIDATE_ATTR;
    use crate::postprocess::{PostprocessOptions, Postprocessor};
    use crate::registry::{FieldInfo, FieldType, Registry};

    fn validate(arch: &str) -> Result<Vec<String>, String> {
        let mut reg = Registry::new();
        reg.add_model(
            "m",
            [
                FieldInfo::new("name", FieldType::Char),
                FieldInfo::new("partner_id", FieldType::Many2one).relation("p"),
            ],
        );
        reg.add_model("p", [FieldInfo::new("name", FieldType::Char)]);
        let mut arch = Arch::parse(arch).unwrap();
        let root = arch.root();
        arch.set(root, VALIDATE_ATTR, "1");
        Postprocessor::new(&reg)
            .run(arch, "m", &PostprocessOptions::default())
            .map(|out| out.warnings)
            .map_err(|err| err.message())
    }

    #[test]
    fn pages_live_in_notebooks() {
        assert!(validate("<form><notebook><page/></notebook></form>").is_ok());
        assert_eq!(
            validate("<form><page/></form>").unwrap_err(),
            "Page direct ancestor must be notebook"
        );
    }

    #[test]
    fn list_children() {
        assert!(validate(r#"<list><field name="name"/><button name="x" type="object"/></list>"#).is_ok());
        let err = validate(r#"<list><div/></list>"#).unwrap_err();
        assert!(err.ends_with("(not div)"), "{err}");
    }

    #[test]
    fn graph_children() {
        assert!(validate(r#"<graph><field name="name"/></graph>"#).is_ok());
        assert!(validate(r#"<graph><group/></graph>"#).is_err());
    }

    #[test]
    fn buttons() {
        assert!(validate(r#"<form><button special="cancel"/></form>"#).is_ok());
        assert_eq!(
            validate(r#"<form><button special="close"/></form>"#).unwrap_err(),
            "Invalid special 'close' in button"
        );
        assert_eq!(
            validate(r#"<form><button type="object"/></form>"#).unwrap_err(),
            "Button must have a name"
        );
    }

    #[test]
    fn search_views() {
        let warnings = validate("<search><filter name=\"f\"/></search>").unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(validate(r#"<search><field name="name"/><searchpanel/><searchpanel/></search>"#).is_err());
    }

    #[test]
    fn groupby_nodes() {
        assert!(validate(r#"<list><field name="name"/><groupby name="partner_id"><field name="name"/></groupby></list>"#).is_ok());
        let err = validate(r#"<list><groupby name="name"/></list>"#).unwrap_err();
        assert!(err.contains("can only be of type many2one"), "{err}");
    }
}

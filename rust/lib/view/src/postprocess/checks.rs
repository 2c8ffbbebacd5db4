//! Attribute-level checks shared by every tag.

use openerp_arch::NodeId;

use crate::error::ViewError;
use crate::expr::{context_group_by, domain_field_paths, expression_field_names};

use super::names::FieldUse;
use super::{Frame, Walk};

/// Attributes whose value is evaluated against the record.
const EXPRESSION_ATTRS: &[&str] = &[
    "invisible",
    "column_invisible",
    "readonly",
    "required",
    "context",
    "domain",
];

fn is_expression_attr(tag: &str, attr: &str) -> bool {
    match attr {
        "domain" => tag == "field",
        _ => EXPRESSION_ATTRS.contains(&attr) || attr.starts_with("decoration-"),
    }
}

/// Record the fields that expressions on the node depend on.
pub(super) fn collect_expressions(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    let node = frame.node;
    if walk.manager(frame.manager).view_type == "search" {
        return Ok(());
    }
    let tag = walk.arch.tag(node).to_string();
    let line = walk.arch.line(node);
    let attrs = walk.arch.attrs(node).to_vec();
    for (attr, value) in attrs {
        if !is_expression_attr(&tag, &attr) {
            continue;
        }
        let names = match expression_field_names(&value) {
            Ok(names) => names,
            Err(err) => {
                let message = format!("Invalid expression in {attr}=\"{value}\": {err}");
                if frame.validate {
                    return Err(walk.error(line, message));
                }
                walk.warn(line, message);
                continue;
            }
        };
        for name in names {
            let usage = FieldUse {
                groups: frame.groups.clone(),
                attr: attr.clone(),
                expr: value.clone(),
                line,
                validate: frame.validate,
            };
            match name.strip_prefix("parent.") {
                Some(parent_name) => {
                    // Top-level views may be embedded anywhere; nothing to check.
                    if let Some(parent) = walk.manager(frame.manager).parent {
                        walk.manager_mut(parent).must_have_field(parent_name, usage);
                    }
                }
                None => walk.manager_mut(frame.manager).must_have_field(&name, usage),
            }
        }
    }
    Ok(())
}

/// Checks of individual attributes, on validated nodes only.
pub(super) fn validate_attributes(walk: &mut Walk<'_, '_>, frame: &Frame) -> Result<(), ViewError> {
    let node = frame.node;
    let line = walk.arch.line(node);
    let attrs = walk.arch.attrs(node).to_vec();
    for (attr, value) in &attrs {
        match attr.as_str() {
            "col" | "colspan" => {
                if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
                    return Err(walk.error(
                        line,
                        format!("\"{attr}\" value must be an integer ({value})"),
                    ));
                }
            }
            "group" => walk.warn(line, "Attribute 'group' is not valid, did you mean 'groups'?"),
            "domain" if walk.arch.tag(node) == "field" => check_field_domain(walk, frame, value)?,
            "context" => check_group_by(walk, frame, value)?,
            _ => {}
        }
    }
    accessibility(walk, node);
    Ok(())
}

fn check_field_domain(walk: &Walk<'_, '_>, frame: &Frame, domain: &str) -> Result<(), ViewError> {
    let node = frame.node;
    let Some(name) = walk.arch.get(node, "name") else {
        return Ok(());
    };
    let Some(field) = walk.field(frame.manager, name) else {
        return Ok(());
    };
    let Some(comodel) = field.relation.as_deref().filter(|_| field.is_relational()) else {
        return Err(walk.node_error(
            node,
            format!("Domain on non-relational field \"{name}\" makes no sense (domain:{domain})"),
        ));
    };
    let registry = walk.registry();
    if !registry.has_model(comodel) {
        return Ok(());
    }
    let paths = domain_field_paths(domain)
        .map_err(|err| walk.node_error(node, format!("Invalid domain format {domain}: {err}")))?;
    for path in paths {
        let mut model = comodel;
        for segment in path.split('.') {
            let Some(target) = registry.field(model, segment) else {
                return Err(walk.node_error(
                    node,
                    format!(
                        "Unknown field \"{model}.{segment}\" in domain of <field name=\"{name}\"> ({domain})"
                    ),
                ));
            };
            match &target.relation {
                Some(next) if registry.has_model(next) => model = next,
                _ => break,
            }
        }
    }
    Ok(())
}

fn check_group_by(walk: &Walk<'_, '_>, frame: &Frame, context: &str) -> Result<(), ViewError> {
    let node = frame.node;
    let values = context_group_by(context)
        .map_err(|err| walk.node_error(node, format!("Invalid context {context}: {err}")))?;
    for value in values {
        let name = value.split(':').next().unwrap_or_default();
        if walk.field(frame.manager, name).is_none() {
            return Err(walk.node_error(
                node,
                format!("Unknown field \"{name}\" in \"group_by\" value in context=\"{context}\""),
            ));
        }
    }
    Ok(())
}

// ── accessibility ──

/// Whether `node`, an ancestor or a descendant carries a title, or the
/// subtree has text.
fn has_label(walk: &Walk<'_, '_>, node: NodeId) -> bool {
    let arch = &walk.arch;
    let labelled = |n: NodeId| arch.has_attr(n, "title") || arch.has_attr(n, "aria-label");
    arch.descendants(node).into_iter().any(labelled)
        || arch.ancestors(node).into_iter().any(labelled)
        || !arch.string_value(node).trim().is_empty()
}

/// Markup conventions the web client relies on for assistive technology.
/// Findings are warnings, never errors.
pub(super) fn accessibility(walk: &mut Walk<'_, '_>, node: NodeId) {
    let arch = &walk.arch;
    let tag = arch.tag(node);
    let classes: Vec<&str> = arch
        .get(node, "class")
        .map(|c| c.split_whitespace().collect())
        .unwrap_or_default();
    let has_class = |c: &str| classes.contains(&c);
    let role = arch.get(node, "role").unwrap_or_default();
    let mut findings: Vec<String> = Vec::new();

    if tag == "img" && !arch.has_attr(node, "alt") {
        findings.push("<img> tag must contain an alt attribute".to_string());
    }
    if has_class("btn") && !matches!(tag, "button" | "input") && role != "button" {
        findings.push(format!(
            "A simulated button <{tag} class=\"btn\"> must have role=\"button\""
        ));
    }
    if has_class("dropdown-menu") && role != "menu" {
        findings.push("A dropdown menu must have role=\"menu\"".to_string());
    }
    if has_class("progress-bar") && (role != "progressbar" || !arch.has_attr(node, "aria-valuenow")) {
        findings.push(
            "A progress bar must have role=\"progressbar\" and an aria-valuenow attribute".to_string(),
        );
    }
    if has_class("modal") && role != "dialog" {
        findings.push("A modal must have role=\"dialog\"".to_string());
    }
    for (class, expected) in [
        ("modal-header", "header"),
        ("modal-body", "main"),
        ("modal-footer", "footer"),
    ] {
        if has_class(class) && tag != expected {
            findings.push(format!("A {class} must be a <{expected}> element, found <{tag}>"));
        }
    }
    if has_class("tab-pane") && role != "tabpanel" {
        findings.push("A tab pane must have role=\"tabpanel\"".to_string());
    }
    if has_class("nav-tabs") && role != "tablist" {
        findings.push("A tab list must have role=\"tablist\"".to_string());
    }
    if has_class("alert")
        && classes.iter().any(|c| c.starts_with("alert-"))
        && !matches!(role, "alert" | "alertdialog" | "status")
    {
        findings.push(
            "An alert must have role=\"alert\", role=\"alertdialog\" or role=\"status\"".to_string(),
        );
    }
    if let Some(icon) = classes.iter().find(|c| c.starts_with("fa-")) {
        if has_class("fa") && !has_label(walk, node) {
            findings.push(format!(
                "A <{tag}> with fa class ({icon}) must have title in its tag, parents, descendants or have text"
            ));
        }
    }
    if matches!(role, "none" | "presentation")
        && (arch.has_attr(node, "aria-label") || arch.has_attr(node, "tabindex"))
    {
        findings.push(format!(
            "An element with role=\"{role}\" must not be labelled or focusable"
        ));
    }
    let toggle = arch
        .get(node, "data-toggle")
        .or_else(|| arch.get(node, "data-bs-toggle"));
    if toggle == Some("tab") && (role != "tab" || !arch.has_attr(node, "aria-controls")) {
        findings.push(
            "A tab link (data-toggle=\"tab\") must have role=\"tab\" and aria-controls".to_string(),
        );
    }

    let line = arch.line(node);
    for finding in findings {
        walk.warn(line, finding);
    }
}

#[cfg(test)]
mod tests {
    use openerp_arch::Arch;

    use crate::combine::VALIDATE_ATTR;
    use crate::postprocess::{PostprocessOptions, Postprocessor};
    use crate::registry::{FieldInfo, FieldType, Registry};

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.add_model(
            "m",
            [
                FieldInfo::new("name", FieldType::Char),
                FieldInfo::new("date", FieldType::Date),
                FieldInfo::new("partner_id", FieldType::Many2one).relation("p"),
            ],
        );
        reg.add_model(
            "p",
            [
                FieldInfo::new("name", FieldType::Char),
                FieldInfo::new("parent_id", FieldType::Many2one).relation("p"),
            ],
        );
        reg
    }

    fn validate(arch: &str) -> Result<Vec<String>, String> {
        let reg = registry();
        let mut arch = Arch::parse(arch).unwrap();
        let root = arch.root();
        arch.set(root, VALIDATE_ATTR, "1");
        Postprocessor::new(&reg)
            .run(arch, "m", &PostprocessOptions::default())
            .map(|out| out.warnings)
            .map_err(|err| err.message())
    }

    #[test]
    fn colspan_must_be_numeric() {
        assert!(validate(r#"<form><group col="2"/></form>"#).is_ok());
        assert_eq!(
            validate(r#"<form><group colspan="two"/></form>"#).unwrap_err(),
            "\"colspan\" value must be an integer (two)"
        );
    }

    #[test]
    fn field_domains() {
        assert!(validate(r#"<form><field name="partner_id" domain="[('parent_id.name', '=', name)]"/></form>"#).is_ok());
        let err = validate(r#"<form><field name="name" domain="[]"/></form>"#).unwrap_err();
        assert!(err.starts_with("Domain on non-relational field \"name\""));
        let err = validate(r#"<form><field name="partner_id" domain="[('nope', '=', 1)]"/></form>"#)
            .unwrap_err();
        assert!(err.starts_with("Unknown field \"p.nope\""), "{err}");
    }

    #[test]
    fn group_by_in_context() {
        assert!(validate(r#"<search><field name="name"/><filter name="d" context="{'group_by': 'date:month'}"/></search>"#).is_ok());
        let err = validate(r#"<search><field name="name"/><filter name="d" context="{'group_by': 'nope'}"/></search>"#)
            .unwrap_err();
        assert!(err.starts_with("Unknown field \"nope\""));
    }

    #[test]
    fn accessibility_findings_are_warnings() {
        let warnings = validate(
            r#"<form><img src="x"/><a class="btn">Go</a><div class="dropdown-menu"/><i class="fa fa-check"/><span class="fa fa-user" title="User"/></form>"#,
        )
        .unwrap();
        assert_eq!(warnings.len(), 4, "{warnings:?}");
        assert!(warnings[0].starts_with("<img> tag must contain an alt attribute"));
    }

    #[test]
    fn group_attribute_typo() {
        let warnings = validate(r#"<form><field name="name" group="base.group_user"/></form>"#).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("did you mean 'groups'"));
    }

    #[test]
    fn broken_expressions() {
        let err = validate(r#"<form><field name="name" invisible="(name"/></form>"#).unwrap_err();
        assert!(err.starts_with("Invalid expression in invisible"));
    }
}

//! Folding an extension's spec nodes onto a parent architecture.
//!
//! Every spec designates a node of the parent (see [`crate::locate`]) and a
//! `position` telling what to do there. The parent is mutated in place; the
//! caller hands over a private copy when the original must survive.
//!
//! Text is the delicate part: a node's `tail` is the text that follows it,
//! so whenever nodes are inserted or removed the surrounding text runs are
//! re-stitched so that nothing is lost and indentation stays plausible.

use std::collections::{HashSet, VecDeque};

use openerp_arch::{Arch, NodeId};

use crate::error::InheritError;
use crate::locate::locate_node;

/// Attributes holding python expressions: `add`/`remove` on them edit a
/// boolean expression instead of a token list.
const PYTHON_ATTRIBUTES: &[&str] = &[
    "readonly",
    "required",
    "invisible",
    "column_invisible",
    "t-if",
    "t-elif",
];

fn is_python_attribute(name: &str) -> bool {
    PYTHON_ATTRIBUTES.contains(&name) || name.starts_with("decoration-")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Mark the first element replacing a node with
    /// `meta-oe-xpath-replacing="<replaced tag>"`.
    pub inherit_branding: bool,
}

/// Apply every spec of `specs` to `arch`.
///
/// `specs` is the whole extension architecture: its root is either a single
/// spec or a `<data>` wrapper whose children are specs (nested `<data>` is
/// unwrapped too, after its siblings).
pub fn apply_inheritance_specs(arch: &mut Arch, specs: &Arch) -> Result<(), InheritError> {
    apply_inheritance_specs_with(arch, specs, &ApplyOptions::default())
}

pub fn apply_inheritance_specs_with(
    arch: &mut Arch,
    specs: &Arch,
    opts: &ApplyOptions,
) -> Result<(), InheritError> {
    let root = arch.import(specs, specs.root());
    apply_spec_tree(arch, root, opts)
}

/// Same as [`apply_inheritance_specs_with`] for a spec tree already
/// imported into `arch` (and detached from its root).
pub fn apply_spec_tree(
    arch: &mut Arch,
    spec_root: NodeId,
    opts: &ApplyOptions,
) -> Result<(), InheritError> {
    let mut queue = VecDeque::from([spec_root]);
    while let Some(spec) = queue.pop_front() {
        if !arch.is_element(spec) {
            continue;
        }
        if arch.tag(spec) == "data" {
            queue.extend(arch.children(spec).iter().copied());
            continue;
        }
        let Some(node) = locate_node(arch, spec)? else {
            return Err(not_located(arch, spec));
        };
        let position = arch.get(spec, "position").unwrap_or("inside").to_string();
        match position.as_str() {
            "replace" => replace(arch, spec, node, opts)?,
            "attributes" => apply_attributes(arch, spec, node)?,
            "inside" => {
                let sentinel = arch.create_element("sentinel");
                arch.append(node, sentinel);
                add_stripped_items_before(arch, sentinel, spec, None)?;
                arch.remove_keep_tail(sentinel);
            }
            "after" => {
                if node == arch.root() {
                    return Err(InheritError::RootSibling {
                        position,
                        line: arch.line(spec),
                    });
                }
                // The sentinel takes over the tail so new nodes land between
                // the target and the text that followed it.
                let sentinel = arch.create_element("sentinel");
                arch.add_next(node, sentinel);
                let tail = arch.tail(node).map(str::to_string);
                arch.set_tail(sentinel, tail);
                arch.set_tail(node, None);
                add_stripped_items_before(arch, sentinel, spec, None)?;
                arch.remove_keep_tail(sentinel);
            }
            "before" => {
                if node == arch.root() {
                    return Err(InheritError::RootSibling {
                        position,
                        line: arch.line(spec),
                    });
                }
                add_stripped_items_before(arch, node, spec, None)?;
            }
            _ => {
                return Err(InheritError::InvalidPosition {
                    position,
                    line: arch.line(spec),
                })
            }
        }
    }
    Ok(())
}

/// `<tag a="v">` for error messages, without the `position` attribute.
fn spec_label(arch: &Arch, spec: NodeId) -> String {
    let mut label = format!("<{}", arch.tag(spec));
    for (k, v) in arch.attrs(spec) {
        if k != "position" {
            label.push_str(&format!(" {k}=\"{}\"", html_escape(v)));
        }
    }
    label.push('>');
    label
}

fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn not_located(arch: &Arch, spec: NodeId) -> InheritError {
    InheritError::NotLocated {
        tag: spec_label(arch, spec),
        line: arch.line(spec),
    }
}

fn is_move(arch: &Arch, node: NodeId) -> bool {
    arch.is_element(node) && arch.get(node, "position") == Some("move")
}

/// Detach the node designated by a `position="move"` spec.
fn extract(arch: &mut Arch, spec: NodeId) -> Result<NodeId, InheritError> {
    if !arch.children(spec).is_empty() {
        return Err(InheritError::InvalidMove {
            spec: arch.node_to_xml(spec),
            line: arch.line(spec),
        });
    }
    match locate_node(arch, spec)? {
        Some(node) if node != arch.root() => {
            arch.remove_keep_tail(node);
            Ok(node)
        }
        _ => Err(not_located(arch, spec)),
    }
}

/// The trailing `\n` + indentation of `text`, if any.
fn trailing_indent(text: Option<&str>) -> String {
    let Some(text) = text else {
        return String::new();
    };
    match text.rfind('\n') {
        Some(pos) if text[pos + 1..].chars().all(|c| c == ' ' || c == '\t') => {
            text[pos..].to_string()
        }
        _ => String::new(),
    }
}

/// Insert the content of `spec` (text and children) right before `node`.
///
/// The text preceding `node` loses its trailing whitespace to the spec's
/// own text, and that whitespace is given back after the last inserted
/// child, so inserted blocks take the place of the original indentation.
/// `replacing` names the tag of a replaced node, recorded on the first
/// inserted element.
fn add_stripped_items_before(
    arch: &mut Arch,
    node: NodeId,
    spec: NodeId,
    mut replacing: Option<String>,
) -> Result<(), InheritError> {
    let Some(parent) = arch.parent(node) else {
        return Err(InheritError::RootSibling {
            position: "before".to_string(),
            line: arch.line(spec),
        });
    };
    let spec_text = arch.text(spec).map(str::to_string);
    let text = spec_text.clone().unwrap_or_default();

    let prev = arch.previous(node);
    let before_text = match prev {
        None => {
            let current = arch.text(parent).map(str::to_string);
            let before = trailing_indent(current.as_deref());
            let merged = current.unwrap_or_default().trim_end().to_string() + &text;
            let merged = if merged.is_empty() {
                spec_text.as_ref().map(|_| String::new())
            } else {
                Some(merged)
            };
            arch.set_text(parent, merged);
            before
        }
        Some(prev) => {
            let current = arch.tail(prev).map(str::to_string);
            let before = trailing_indent(current.as_deref());
            let merged = current.unwrap_or_default().trim_end().to_string() + &text;
            arch.set_tail(prev, Some(merged));
            before
        }
    };

    let children = arch.children(spec).to_vec();
    match children.last() {
        Some(last) => {
            let tail = arch.tail(*last).unwrap_or_default().trim_end().to_string() + &before_text;
            arch.set_tail(*last, Some(tail));
        }
        None => arch.add_text_before(node, Some(&before_text)),
    }

    for child in children {
        let child = if is_move(arch, child) {
            let tail = arch.tail(child).map(str::to_string);
            let moved = extract(arch, child)?;
            if !arch.is_attached(node) {
                return Err(InheritError::InvalidMove {
                    spec: arch.node_to_xml(child),
                    line: arch.line(child),
                });
            }
            arch.set_tail(moved, tail);
            moved
        } else {
            child
        };
        if arch.is_element(child) {
            if let Some(tag) = replacing.take() {
                arch.set(child, "meta-oe-xpath-replacing", tag);
            }
        }
        arch.add_previous(node, child);
    }
    Ok(())
}

/// Spec descendants standing for the replaced content.
fn placeholders(arch: &Arch, spec: NodeId) -> Vec<NodeId> {
    arch.descendants(spec)
        .into_iter()
        .skip(1)
        .filter(|n| arch.is_element(*n) && arch.text(*n) == Some("$0"))
        .collect()
}

fn replace(
    arch: &mut Arch,
    spec: NodeId,
    node: NodeId,
    opts: &ApplyOptions,
) -> Result<(), InheritError> {
    let mode = arch.get(spec, "mode").unwrap_or("outer").to_string();
    match mode.as_str() {
        "outer" => {
            for loc in placeholders(arch, spec) {
                arch.set_text(loc, Some(String::new()));
                let copy = arch.deep_copy(node);
                // The original stays in the document with its tail.
                arch.set_tail(copy, None);
                arch.append(loc, copy);
            }
            if node == arch.root() {
                replace_root(arch, spec, node)
            } else {
                let replacing = opts.inherit_branding.then(|| arch.tag(node).to_string());
                add_stripped_items_before(arch, node, spec, replacing)?;
                arch.remove_keep_tail(node);
                Ok(())
            }
        }
        "inner" => {
            let original: Vec<NodeId> = arch.children(node).to_vec();
            let original_text = arch.text(node).map(str::to_string);
            for loc in placeholders(arch, spec) {
                arch.set_text(loc, Some(original_text.clone().unwrap_or_default()));
                for child in &original {
                    let copy = arch.deep_copy(*child);
                    arch.append(loc, copy);
                }
            }
            arch.clear_children(node);
            for child in arch.children(spec).to_vec() {
                if is_move(arch, child) {
                    let tail = arch.tail(child).map(str::to_string);
                    let moved = extract(arch, child)?;
                    if !arch.is_attached(node) {
                        return Err(InheritError::InvalidMove {
                            spec: arch.node_to_xml(child),
                            line: arch.line(child),
                        });
                    }
                    arch.set_tail(moved, tail);
                    arch.append(node, moved);
                } else {
                    arch.append(node, child);
                }
            }
            let text = arch.text(spec).map(str::to_string);
            arch.set_text(node, text);
            Ok(())
        }
        _ => Err(InheritError::InvalidMode {
            mode,
            line: arch.line(spec),
        }),
    }
}

/// The first element of the spec becomes the new root. A comment right
/// before it is kept as the root's first child.
fn replace_root(arch: &mut Arch, spec: NodeId, root: NodeId) -> Result<(), InheritError> {
    let mut comment = None;
    let mut content = None;
    for child in arch.children(spec) {
        if arch.is_element(*child) {
            content = Some(*child);
            break;
        }
        comment = Some(*child);
    }
    let Some(content) = content else {
        return Err(InheritError::InvalidRootReplace {
            spec: arch.node_to_xml(spec),
            line: arch.line(spec),
        });
    };
    let t_name = arch.get(root, "t-name").map(str::to_string);
    arch.set_root(content);
    if let Some(t_name) = t_name {
        arch.set(content, "t-name", t_name);
    }
    if let Some(comment) = comment {
        let text = arch.text(content).map(str::to_string);
        arch.set_text(content, None);
        arch.set_tail(comment, text);
        arch.insert(content, 0, comment);
    }
    Ok(())
}

// ── position="attributes" ─────────────────────────────────────────────

fn apply_attributes(arch: &mut Arch, spec: NodeId, node: NodeId) -> Result<(), InheritError> {
    let children: Vec<NodeId> = arch.element_children(spec).collect();
    for child in children {
        let line = arch.line(child);
        if arch.tag(child) != "attribute" {
            return Err(InheritError::InvalidAttributes {
                message: format!(
                    "Invalid node {} in an attributes specification, only <attribute> is allowed",
                    arch.start_tag(child)
                ),
                line,
            });
        }
        let unknown: Vec<&str> = arch
            .attrs(child)
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| {
                !matches!(*k, "name" | "add" | "remove" | "separator") && !k.starts_with("data-oe-")
            })
            .collect();
        if !unknown.is_empty() {
            return Err(InheritError::InvalidAttributes {
                message: format!(
                    "Invalid attributes {} in element <attribute>",
                    unknown.join(", ")
                ),
                line,
            });
        }
        let Some(name) = arch.get(child, "name").map(str::to_string) else {
            return Err(InheritError::InvalidAttributes {
                message: "Element <attribute> requires a name".to_string(),
                line,
            });
        };

        let add = arch.get(child, "add").unwrap_or_default();
        let remove = arch.get(child, "remove").unwrap_or_default();
        let value = if !add.is_empty() || !remove.is_empty() {
            if arch.text(child).is_some_and(|t| !t.is_empty()) {
                return Err(InheritError::InvalidAttributes {
                    message: "Element <attribute> with 'add' or 'remove' cannot contain text"
                        .to_string(),
                    line,
                });
            }
            let current = arch.get(node, &name).unwrap_or_default();
            let separator = arch.get(child, "separator");
            if is_python_attribute(&name) {
                let Some(separator) = separator.map(str::trim).filter(|s| matches!(*s, "and" | "or"))
                else {
                    return Err(InheritError::InvalidSeparator {
                        separator: separator.unwrap_or_default().to_string(),
                        attribute: name,
                        line,
                    });
                };
                merge_expression(current, add, remove, separator)
            } else {
                merge_tokens(current, add, remove, separator)
            }
        } else {
            arch.text(child).unwrap_or_default().to_string()
        };

        if value.is_empty() {
            arch.remove_attr(node, &name);
        } else {
            arch.set(node, &name, value);
        }
    }
    Ok(())
}

/// `((remove))` with any number of balanced-or-not wrapping parentheses.
fn is_wrapped(value: &str, remove: &str) -> bool {
    let open = value.len() - value.trim_start_matches('(').len();
    (0..=open).any(|k| {
        value[k..]
            .strip_prefix(remove)
            .is_some_and(|rest| rest.chars().all(|c| c == ')'))
    })
}

/// First occurrence of `pattern` in `value` standing for a whole operand.
/// A `leading` pattern starts with the operand, which must not continue an
/// identifier or call on its left; otherwise the operand ends the pattern
/// and must not be continued on its right.
fn find_operand(value: &str, pattern: &str, leading: bool) -> Option<usize> {
    let is_boundary = |c: Option<char>, paren: char| {
        c.map_or(true, |c| c.is_whitespace() || c == paren)
    };
    value.match_indices(pattern).map(|(i, _)| i).find(|&i| {
        if leading {
            is_boundary(value[..i].chars().next_back(), '(')
        } else {
            is_boundary(value[i + pattern.len()..].chars().next(), ')')
        }
    })
}

/// Edit a boolean python expression: drop one `remove` operand, then
/// conjoin/disjoin `add`.
fn merge_expression(current: &str, add: &str, remove: &str, separator: &str) -> String {
    let mut value = current.to_string();
    if !remove.is_empty() {
        if is_wrapped(&value, remove) {
            value.clear();
        } else {
            // Operand first, then operand last; parenthesised forms first.
            let patterns = [
                (format!("({remove}) {separator} "), true),
                (format!(" {separator} ({remove})"), false),
                (format!("{remove} {separator} "), true),
                (format!(" {separator} {remove}"), false),
            ];
            for (pattern, leading) in &patterns {
                if let Some(idx) = find_operand(&value, pattern, *leading) {
                    value.replace_range(idx..idx + pattern.len(), "");
                    break;
                }
            }
        }
    }
    if !add.is_empty() {
        value = if value.is_empty() {
            add.to_string()
        } else {
            format!("({value}) {separator} ({add})")
        };
    }
    value
}

/// Edit a delimited token list: drop `remove` tokens, append `add` tokens.
/// A separator of a single space splits on any whitespace.
fn merge_tokens(current: &str, add: &str, remove: &str, separator: Option<&str>) -> String {
    let separator = match separator {
        None => Some(","),
        Some(" ") => None,
        Some(s) => Some(s),
    };
    let split = |s: &str| -> Vec<String> {
        match separator {
            Some(sep) => s.split(sep).map(|t| t.trim().to_string()).collect(),
            None => s.split_whitespace().map(str::to_string).collect(),
        }
    };
    let removed: HashSet<String> = split(remove).into_iter().collect();
    let tokens: Vec<String> = split(current)
        .into_iter()
        .filter(|t| !t.is_empty() && !removed.contains(t))
        .chain(split(add).into_iter().filter(|t| !t.is_empty()))
        .collect();
    tokens.join(separator.unwrap_or(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(base: &str, spec: &str) -> Result<String, InheritError> {
        let mut arch = Arch::parse(base).unwrap();
        let specs = Arch::parse(spec).unwrap();
        apply_inheritance_specs(&mut arch, &specs)?;
        Ok(arch.to_xml())
    }

    #[test]
    fn replace_field() {
        let out = apply(
            r#"<form string="Title"><field name="target"/></form>"#,
            r#"<field name="target" position="replace"><field name="replacement"/></field>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form string="Title"><field name="replacement"/></form>"#);
    }

    #[test]
    fn empty_spec_list_is_identity() {
        let base = "<form>\n  <field name=\"a\"/>\n</form>";
        assert_eq!(apply(base, "<data/>").unwrap(), base);
    }

    #[test]
    fn inside_after_before_keep_text() {
        let base = r#"<form string="F"><div/></form>"#;
        assert_eq!(
            apply(base, r#"<div position="inside">a<p/>b<p/>c</div>"#).unwrap(),
            r#"<form string="F"><div>a<p/>b<p/>c</div></form>"#
        );
        assert_eq!(
            apply(base, r#"<div position="after">a<p/>b<p/>c</div>"#).unwrap(),
            r#"<form string="F"><div/>a<p/>b<p/>c</form>"#
        );
        assert_eq!(
            apply(base, r#"<div position="before">a<p/>b<p/>c</div>"#).unwrap(),
            r#"<form string="F">a<p/>b<p/>c<div/></form>"#
        );
    }

    #[test]
    fn insertion_reuses_indentation() {
        let base = "<form>\n    <field name=\"a\"/>\n</form>";
        let spec = "<field name=\"a\" position=\"after\">\n    <field name=\"b\"/>\n</field>";
        assert_eq!(
            apply(base, spec).unwrap(),
            "<form>\n    <field name=\"a\"/>\n    <field name=\"b\"/>\n</form>"
        );
    }

    #[test]
    fn data_wrapper_is_unwrapped() {
        let out = apply(
            r#"<form><field name="a"/></form>"#,
            r#"<data><field name="a" position="after"><field name="b"/></field><xpath expr="//field[@name='b']" position="attributes"><attribute name="string">B</attribute></xpath></data>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><field name="a"/><field name="b" string="B"/></form>"#);
    }

    #[test]
    fn placeholder_wraps_the_target() {
        let out = apply(
            r#"<form><field name="a"/></form>"#,
            r#"<field name="a" position="replace"><div class="wrap">$0</div></field>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><div class="wrap"><field name="a"/></div></form>"#);
    }

    #[test]
    fn placeholder_copy_leaves_the_tail_in_place() {
        let out = apply(
            "<form><field name=\"a\"/> text </form>",
            r#"<field name="a" position="replace"><div>$0</div></field>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><div><field name="a"/></div> text </form>"#);

        let out = apply(
            "<form><b/>x<field name=\"a\"/>y</form>",
            r#"<field name="a" position="replace"><p>$0</p><i>$0</i></field>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            r#"<form><b/>x<p><field name="a"/></p><i><field name="a"/></i>y</form>"#
        );
    }

    #[test]
    fn inner_replace_with_text() {
        let out = apply(
            "<form><group>old<field name=\"a\"/>x</group>y</form>",
            r#"<xpath expr="//group" position="replace" mode="inner">new<field name="b"/>z</xpath>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><group>new<field name="b"/>z</group>y</form>"#);
    }

    #[test]
    fn inner_replace_cannot_move_an_ancestor() {
        let err = apply(
            r#"<form><group name="g"><div><field name="a"/></div></group></form>"#,
            r#"<xpath expr="//div" position="replace" mode="inner"><group name="g" position="move"/></xpath>"#,
        )
        .unwrap_err();
        assert!(matches!(err, InheritError::InvalidMove { .. }));
    }

    #[test]
    fn branding_marks_the_replacing_element() {
        let mut arch = Arch::parse(r#"<form><field name="a"/></form>"#).unwrap();
        let specs = Arch::parse(
            r#"<field name="a" position="replace"><!-- c --><div/><span/></field>"#,
        )
        .unwrap();
        let opts = ApplyOptions {
            inherit_branding: true,
        };
        apply_inheritance_specs_with(&mut arch, &specs, &opts).unwrap();
        assert_eq!(
            arch.to_xml(),
            r#"<form><!-- c --><div meta-oe-xpath-replacing="field"/><span/></form>"#
        );
    }

    #[test]
    fn inner_replace_keeps_the_node() {
        let out = apply(
            r#"<form><group string="G"><field name="a"/>x</group></form>"#,
            r#"<xpath expr="//group" position="replace" mode="inner"><field name="b"/></xpath>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><group string="G"><field name="b"/></group></form>"#);

        let out = apply(
            r#"<form><group><field name="a"/></group></form>"#,
            r#"<xpath expr="//group" position="replace" mode="inner"><div>$0</div></xpath>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><group><div><field name="a"/></div></group></form>"#);
    }

    #[test]
    fn replacing_the_root_keeps_t_name() {
        let out = apply(
            r#"<t t-name="tmpl"><div/></t>"#,
            r#"<xpath expr="." position="replace"><!-- new --><section/></xpath>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<section t-name="tmpl"><!-- new --></section>"#);
    }

    #[test]
    fn invalid_mode_and_position() {
        assert!(matches!(
            apply("<form><div/></form>", r#"<xpath expr="//div" position="replace" mode="both"/>"#),
            Err(InheritError::InvalidMode { .. })
        ));
        assert!(matches!(
            apply("<form><div/></form>", r#"<div position="around"/>"#),
            Err(InheritError::InvalidPosition { .. })
        ));
    }

    #[test]
    fn unlocated_spec_names_the_element() {
        let err = apply(
            "<form/>",
            r#"<field name="nope" position="after"><field name="x"/></field>"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Element '<field name="nope">' cannot be located in parent view"#
        );
    }

    #[test]
    fn unlocated_spec_label_is_escaped() {
        let err = apply(
            "<form/>",
            r#"<xpath expr="//field[@name='a' and @x&lt;1]" position="after"/>"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Element '<xpath expr="//field[@name=&#39;a&#39; and @x&lt;1]">' cannot be located in parent view"#
        );
    }

    #[test]
    fn move_nodes() {
        let out = apply(
            r#"<form><field name="a"/><field name="b"/><field name="target"/></form>"#,
            r#"<field name="target" position="after"><field name="a" position="move"/></field>"#,
        )
        .unwrap();
        assert_eq!(
            out,
            r#"<form><field name="b"/><field name="target"/><field name="a"/></form>"#
        );
    }

    #[test]
    fn move_keeps_spec_tail() {
        let out = apply(
            "<form><field name=\"a\"/> tail-a <field name=\"target\"/></form>",
            "<field name=\"target\" position=\"before\"><field name=\"a\" position=\"move\"/> moved </field>",
        )
        .unwrap();
        assert_eq!(
            out,
            "<form> tail-a<field name=\"a\"/> moved<field name=\"target\"/></form>"
        );
    }

    #[test]
    fn invalid_moves() {
        assert!(matches!(
            apply(
                r#"<form><field name="a"/></form>"#,
                r#"<field name="a" position="after"><field name="nope" position="move"/></field>"#,
            ),
            Err(InheritError::NotLocated { .. })
        ));
        assert!(matches!(
            apply(
                r#"<form><field name="a"/><field name="b"/></form>"#,
                r#"<field name="a" position="after"><field name="b" position="move"><x/></field></field>"#,
            ),
            Err(InheritError::InvalidMove { .. })
        ));
        // Moving an ancestor of the insertion point.
        assert!(matches!(
            apply(
                r#"<form><group name="g"><field name="a"/></group></form>"#,
                r#"<field name="a" position="before"><group name="g" position="move"/></field>"#,
            ),
            Err(InheritError::InvalidMove { .. })
        ));
    }

    #[test]
    fn removed_target_cannot_be_located_again() {
        let err = apply(
            r#"<form><field name="a"/><field name="b"/></form>"#,
            r#"<data><field name="a" position="replace"><field name="b" position="move"/></field><field name="a" position="after"><field name="c"/></field></data>"#,
        )
        .unwrap_err();
        assert!(matches!(err, InheritError::NotLocated { .. }));
    }

    #[test]
    fn attributes_set_and_delete() {
        let out = apply(
            r#"<form><field name="a" string="A" help="h"/></form>"#,
            r#"<field name="a" position="attributes"><attribute name="string">New</attribute><attribute name="help"/></field>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><field name="a" string="New"/></form>"#);
    }

    #[test]
    fn attributes_token_lists() {
        let out = apply(
            r#"<form><div class="Y Z"/></form>"#,
            r#"<div position="attributes"><attribute name="class" add="X" remove="Y" separator=" "/></div>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><div class="Z X"/></form>"#);

        let out = apply(
            r#"<form><div class="bob tata lolo"/></form>"#,
            r#"<div position="attributes"><attribute name="class" add="bibi and co" remove="tata" separator=" "/></div>"#,
        )
        .unwrap();
        assert_eq!(out, r#"<form><div class="bob lolo bibi and co"/></form>"#);

        assert_eq!(merge_tokens("a,b", "c", "a", None), "b,c");
        assert_eq!(merge_tokens("a", "", "a", None), "");
    }

    #[test]
    fn attributes_python_expressions() {
        assert_eq!(merge_expression("a", "b", "", "or"), "(a) or (b)");
        assert_eq!(merge_expression("", "b", "", "and"), "b");
        assert_eq!(merge_expression("((a))", "", "a", "or"), "");
        assert_eq!(merge_expression("(a) or (b)", "", "a", "or"), "(b)");
        assert_eq!(merge_expression("x and y", "z", "y", "and"), "(x) and (z)");
    }

    #[test]
    fn expression_removal_matches_whole_operands() {
        assert_eq!(merge_expression("ba and c", "", "a", "and"), "ba and c");
        assert_eq!(merge_expression("c and ab", "", "a", "and"), "c and ab");
        assert_eq!(merge_expression("f(a) and c", "", "a", "and"), "f(a) and c");
        assert_eq!(merge_expression("ba and a", "", "a", "and"), "ba");
        assert_eq!(merge_expression("x or a or y", "", "a", "or"), "x or y");
        assert_eq!(merge_expression("(x and a) or y", "", "a", "and"), "(x) or y");

        let err = apply(
            r#"<form><field name="a" invisible="x"/></form>"#,
            r#"<field name="a" position="attributes"><attribute name="invisible" add="y" separator=","/></field>"#,
        )
        .unwrap_err();
        assert!(matches!(err, InheritError::InvalidSeparator { .. }));
    }

    #[test]
    fn attributes_reject_bad_children() {
        assert!(matches!(
            apply(
                r#"<form><field name="a"/></form>"#,
                r#"<field name="a" position="attributes"><field name="b"/></field>"#,
            ),
            Err(InheritError::InvalidAttributes { .. })
        ));
        assert!(matches!(
            apply(
                r#"<form><field name="a"/></form>"#,
                r#"<field name="a" position="attributes"><attribute name="x" other="1"/></field>"#,
            ),
            Err(InheritError::InvalidAttributes { .. })
        ));
        assert!(matches!(
            apply(
                r#"<form><field name="a"/></form>"#,
                r#"<field name="a" position="attributes"><attribute name="class" add="x">t</attribute></field>"#,
            ),
            Err(InheritError::InvalidAttributes { .. })
        ));
    }

    #[test]
    fn siblings_of_the_root_are_rejected() {
        assert!(matches!(
            apply("<form/>", r#"<form position="after"><div/></form>"#),
            Err(InheritError::RootSibling { .. })
        ));
    }
}

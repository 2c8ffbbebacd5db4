//! XPath 1.0 subset evaluated directly over an [`Arch`].
//!
//! Covers what inheritance specs use in practice: location paths with all
//! axes except `namespace`, predicates, unions, filter expressions, the
//! usual string/boolean/number functions and the `hasclass()` extension.

mod eval;
mod lexer;
mod parser;

use crate::error::XPathError;
use crate::tree::{Arch, NodeId};
use eval::{Evaluator, Value, XNode};
use parser::Expr;

/// A compiled XPath expression.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn compile(source: &str) -> Result<XPath, XPathError> {
        let expr = parser::parse(source)?;
        Ok(XPath {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Elements selected with `context` as the context node, in document order.
    pub fn select(&self, arch: &Arch, context: NodeId) -> Result<Vec<NodeId>, XPathError> {
        let evaluator = Evaluator::new(arch);
        match evaluator.evaluate(&self.expr, XNode::Node(context))? {
            Value::Nodes(nodes) => Ok(nodes
                .into_iter()
                .filter_map(|n| match n {
                    XNode::Node(id) if arch.is_element(id) => Some(id),
                    _ => None,
                })
                .collect()),
            _ => Err(XPathError::NotANodeSet),
        }
    }

    pub fn select_first(&self, arch: &Arch, context: NodeId) -> Result<Option<NodeId>, XPathError> {
        Ok(self.select(arch, context)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Arch {
        Arch::parse(
            r#"<form string="F">
  <sheet>
    <div class="oe_title main"><h1><field name="name"/></h1></div>
    <group name="g1"><field name="a"/><field name="b"/></group>
    <group name="g2"><field name="c"/></group>
    <notebook>
      <page name="p1"><span>Hello</span></page>
      <page name="p2"/>
    </notebook>
  </sheet>
</form>"#,
        )
        .unwrap()
    }

    fn names(arch: &Arch, expr: &str) -> Vec<String> {
        XPath::compile(expr)
            .unwrap()
            .select(arch, arch.root())
            .unwrap()
            .into_iter()
            .map(|n| {
                arch.get(n, "name")
                    .map(str::to_string)
                    .unwrap_or_else(|| arch.tag(n).to_string())
            })
            .collect()
    }

    #[test]
    fn descendant_with_attribute_predicate() {
        let arch = sample();
        assert_eq!(names(&arch, "//field[@name='b']"), vec!["b"]);
        assert_eq!(names(&arch, "//field"), vec!["name", "a", "b", "c"]);
    }

    #[test]
    fn positional_predicates() {
        let arch = sample();
        assert_eq!(names(&arch, "//group/field[1]"), vec!["a", "c"]);
        assert_eq!(names(&arch, "(//group/field)[1]"), vec!["a"]);
        assert_eq!(names(&arch, "//group[@name='g1']/field[last()]"), vec!["b"]);
        assert_eq!(names(&arch, "(//group)[2]"), vec!["g2"]);
    }

    #[test]
    fn relative_and_absolute_paths() {
        let arch = sample();
        assert_eq!(names(&arch, "."), vec!["form"]);
        assert_eq!(names(&arch, "/form/sheet"), vec!["sheet"]);
        assert_eq!(names(&arch, "sheet/group"), vec!["g1", "g2"]);
        assert_eq!(names(&arch, "//field[@name='a']/.."), vec!["g1"]);
    }

    #[test]
    fn sibling_and_ancestor_axes() {
        let arch = sample();
        assert_eq!(
            names(&arch, "//page[@name='p1']/following-sibling::page"),
            vec!["p2"]
        );
        assert_eq!(
            names(&arch, "//group[@name='g2']/preceding-sibling::*[1]"),
            vec!["g1"]
        );
        assert_eq!(
            names(&arch, "//field[@name='name']/ancestor::div"),
            vec!["div"]
        );
        assert_eq!(
            names(&arch, "//field[@name='c']/preceding::field[1]"),
            vec!["b"]
        );
        assert_eq!(names(&arch, "//field[@name='b']/following::field"), vec!["c"]);
    }

    #[test]
    fn functions_and_text() {
        let arch = sample();
        assert_eq!(names(&arch, "//div[hasclass('oe_title')]"), vec!["div"]);
        assert!(names(&arch, "//div[hasclass('oe_title', 'missing')]").is_empty());
        assert_eq!(names(&arch, "//span[text()='Hello']"), vec!["span"]);
        assert_eq!(
            names(&arch, "//page[contains(normalize-space(.), 'Hell')]"),
            vec!["p1"]
        );
        assert_eq!(
            names(&arch, "//group[count(field) > 1]"),
            vec!["g1"]
        );
        assert_eq!(
            names(&arch, "//field[starts-with(@name, 'n') or @name='c']"),
            vec!["name", "c"]
        );
        assert_eq!(names(&arch, "//*[not(*) and name()='page']"), vec!["p2"]);
    }

    #[test]
    fn unions_are_in_document_order() {
        let arch = sample();
        assert_eq!(
            names(&arch, "//field[@name='c'] | //field[@name='a']"),
            vec!["a", "c"]
        );
    }

    #[test]
    fn non_node_results_are_rejected() {
        let arch = sample();
        let xp = XPath::compile("count(//field)").unwrap();
        assert_eq!(xp.select(&arch, arch.root()), Err(XPathError::NotANodeSet));
    }
}

use openerp_arch::{Arch, NodeId, XPath};

use crate::error::InheritError;

/// Find the node of `arch` that `spec` designates.
///
/// `spec` lives in the same arena but is not attached under the root, so it
/// can never match itself. Only the first match is returned.
pub fn locate_node(arch: &Arch, spec: NodeId) -> Result<Option<NodeId>, InheritError> {
    let root = arch.root();
    match arch.tag(spec) {
        "xpath" => {
            let expr = arch.get(spec, "expr").unwrap_or_default();
            let xpath = XPath::compile(expr).map_err(|source| InheritError::XPath {
                expr: expr.to_string(),
                line: arch.line(spec),
                source,
            })?;
            xpath
                .select_first(arch, root)
                .map_err(|source| InheritError::XPath {
                    expr: expr.to_string(),
                    line: arch.line(spec),
                    source,
                })
        }
        "field" => {
            let name = arch.get(spec, "name");
            Ok(arch
                .iter_tag(root, "field")
                .into_iter()
                .find(|node| arch.get(*node, "name") == name))
        }
        tag => {
            let wanted: Vec<(&str, &str)> = arch
                .attrs(spec)
                .iter()
                .filter(|(k, _)| k != "position" && k != "version")
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            let found = arch.iter_tag(root, tag).into_iter().find(|node| {
                wanted
                    .iter()
                    .all(|(k, v)| arch.get(*node, k) == Some(*v))
            });
            // A versioned spec only applies to a root of the same version.
            if found.is_some() {
                if let Some(version) = arch.get(spec, "version") {
                    if arch.get(root, "version") != Some(version) {
                        return Ok(None);
                    }
                }
            }
            Ok(found)
        }
    }
}

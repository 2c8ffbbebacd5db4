//! Per-user pass over a postprocessed architecture.
//!
//! Postprocessing is user independent and its output is cached. What
//! depends on the user is resolved here: nodes whose `__groups_key__` does
//! not admit the user are pruned, and `model_access_rights` markers become
//! concrete `create`/`edit`/`delete` and `can_create`/`can_write` flags.

use openerp_arch::{Arch, NodeId};
use tracing::debug;

use crate::groups::GroupGraph;
use crate::postprocess::{ACCESS_RIGHTS_ATTR, GROUPS_KEY_ATTR};
use crate::registry::{Operation, Registry, User};

pub fn apply_user_access(arch: &mut Arch, user: &User, registry: &Registry, graph: &GroupGraph) {
    let groups = graph.user_groups(&user.groups);
    let root = arch.root();
    let mut pruned = 0usize;
    let mut wrappers = Vec::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if let Some(key) = arch.remove_attr(node, GROUPS_KEY_ATTR) {
            if node != root && !graph.parse_key(&key).admits(&groups) {
                arch.remove_keep_tail(node);
                pruned += 1;
                continue;
            }
            if node != root && arch.tag(node) == "t" && arch.attrs(node).is_empty() {
                wrappers.push(node);
            }
        }
        if let Some(model) = arch.remove_attr(node, ACCESS_RIGHTS_ATTR) {
            apply_rights(arch, node, &model, |op| {
                registry.check_access(&groups, &model, op)
            });
        }
        let children: Vec<NodeId> = arch.element_children(node).collect();
        stack.extend(children.into_iter().rev());
    }

    // Innermost first, so outer wrappers see their final content.
    for node in wrappers.into_iter().rev() {
        unwrap(arch, node);
    }
    debug!(user = %user.login, pruned, "applied user access");
}

fn apply_rights(arch: &mut Arch, node: NodeId, model: &str, allowed: impl Fn(Operation) -> bool) {
    if arch.tag(node) == "field" {
        arch.set(node, "can_create", flag(allowed(Operation::Create)));
        arch.set(node, "can_write", flag(allowed(Operation::Write)));
        return;
    }
    for (attr, op) in [
        ("create", Operation::Create),
        ("delete", Operation::Unlink),
        ("edit", Operation::Write),
    ] {
        if !arch.has_attr(node, attr) && !allowed(op) {
            debug!(model, attr, "access right denied");
            arch.set(node, attr, "False");
        }
    }
}

fn flag(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Replace `node` by its content.
fn unwrap(arch: &mut Arch, node: NodeId) {
    let text = arch.text(node).map(str::to_string);
    arch.add_text_before(node, text.as_deref());
    for child in arch.children(node).to_vec() {
        arch.add_previous(node, child);
    }
    arch.remove_keep_tail(node);
}

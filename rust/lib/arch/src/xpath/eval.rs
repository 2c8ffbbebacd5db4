use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::parser::{ArithOp, Axis, CmpOp, Expr, Func, NodeTest, Step};
use crate::error::XPathError;
use crate::tree::{Arch, NodeId, NodeKind};

/// A node of the XPath data model. Attributes and text runs are not arena
/// nodes, so they are addressed through their owning element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum XNode {
    Doc,
    /// Element, comment or processing instruction.
    Node(NodeId),
    Attr(NodeId, usize),
    /// `false`: the element's leading text, `true`: the node's tail.
    Text(NodeId, bool),
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    Nodes(Vec<XNode>),
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Clone, Copy)]
struct Focus {
    node: XNode,
    pos: usize,
    size: usize,
}

pub(crate) struct Evaluator<'a> {
    arch: &'a Arch,
    order: OnceCell<HashMap<XNode, usize>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(arch: &'a Arch) -> Self {
        Self {
            arch,
            order: OnceCell::new(),
        }
    }

    pub fn evaluate(&self, expr: &Expr, context: XNode) -> Result<Value, XPathError> {
        self.eval(
            expr,
            Focus {
                node: context,
                pos: 1,
                size: 1,
            },
        )
    }

    // ── document order ─────────────────────────────────────────────

    fn order(&self) -> &HashMap<XNode, usize> {
        self.order.get_or_init(|| {
            let mut all = Vec::new();
            all.push(XNode::Doc);
            self.collect_preorder(XNode::Node(self.arch.root()), &mut all);
            all.into_iter().enumerate().map(|(i, n)| (n, i)).collect()
        })
    }

    fn collect_preorder(&self, node: XNode, out: &mut Vec<XNode>) {
        out.push(node);
        if let XNode::Node(id) = node {
            for i in 0..self.arch.attrs(id).len() {
                out.push(XNode::Attr(id, i));
            }
        }
        for child in self.children_of(node) {
            self.collect_preorder(child, out);
        }
    }

    fn rank(&self, node: &XNode) -> usize {
        self.order().get(node).copied().unwrap_or(usize::MAX)
    }

    fn sort_unique(&self, nodes: &mut Vec<XNode>) {
        if nodes.len() > 1 {
            nodes.sort_by_key(|n| self.rank(n));
            nodes.dedup();
        }
    }

    // ── tree navigation ────────────────────────────────────────────

    fn children_of(&self, node: XNode) -> Vec<XNode> {
        let arch = self.arch;
        match node {
            XNode::Doc => vec![XNode::Node(arch.root())],
            XNode::Node(id) if arch.is_element(id) => {
                let mut out = Vec::new();
                if arch.text(id).is_some_and(|t| !t.is_empty()) {
                    out.push(XNode::Text(id, false));
                }
                for child in arch.children(id) {
                    out.push(XNode::Node(*child));
                    if arch.tail(*child).is_some_and(|t| !t.is_empty()) {
                        out.push(XNode::Text(*child, true));
                    }
                }
                out
            }
            _ => Vec::new(),
        }
    }

    fn parent_of(&self, node: XNode) -> Option<XNode> {
        let arch = self.arch;
        match node {
            XNode::Doc => None,
            XNode::Node(id) => match arch.parent(id) {
                Some(p) => Some(XNode::Node(p)),
                None if id == arch.root() => Some(XNode::Doc),
                None => None,
            },
            XNode::Attr(id, _) | XNode::Text(id, false) => Some(XNode::Node(id)),
            XNode::Text(id, true) => arch.parent(id).map(XNode::Node),
        }
    }

    fn descendants_of(&self, node: XNode, out: &mut Vec<XNode>) {
        for child in self.children_of(node) {
            out.push(child);
            self.descendants_of(child, out);
        }
    }

    fn is_ancestor(&self, ancestor: XNode, node: XNode) -> bool {
        let mut cur = self.parent_of(node);
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.parent_of(p);
        }
        false
    }

    /// Nodes along `axis`, in axis order (reverse axes closest first).
    fn axis_nodes(&self, node: XNode, axis: Axis) -> Vec<XNode> {
        match axis {
            Axis::Child => self.children_of(node),
            Axis::Descendant => {
                let mut out = Vec::new();
                self.descendants_of(node, &mut out);
                out
            }
            Axis::DescendantOrSelf => {
                let mut out = vec![node];
                self.descendants_of(node, &mut out);
                out
            }
            Axis::SelfAxis => vec![node],
            Axis::Parent => self.parent_of(node).into_iter().collect(),
            Axis::Ancestor | Axis::AncestorOrSelf => {
                let mut out = Vec::new();
                if axis == Axis::AncestorOrSelf {
                    out.push(node);
                }
                let mut cur = self.parent_of(node);
                while let Some(p) = cur {
                    out.push(p);
                    cur = self.parent_of(p);
                }
                out
            }
            Axis::FollowingSibling | Axis::PrecedingSibling => {
                if matches!(node, XNode::Attr(..) | XNode::Doc) {
                    return Vec::new();
                }
                let Some(parent) = self.parent_of(node) else {
                    return Vec::new();
                };
                let siblings = self.children_of(parent);
                let Some(idx) = siblings.iter().position(|s| *s == node) else {
                    return Vec::new();
                };
                if axis == Axis::FollowingSibling {
                    siblings[idx + 1..].to_vec()
                } else {
                    siblings[..idx].iter().rev().copied().collect()
                }
            }
            Axis::Following | Axis::Preceding => {
                let me = self.rank(&node);
                let mut all: Vec<(XNode, usize)> = self
                    .order()
                    .iter()
                    .filter(|(n, _)| !matches!(n, XNode::Attr(..) | XNode::Doc))
                    .map(|(n, r)| (*n, *r))
                    .collect();
                all.sort_by_key(|(_, r)| *r);
                if axis == Axis::Following {
                    all.into_iter()
                        .filter(|(n, r)| *r > me && !self.is_ancestor(node, *n))
                        .map(|(n, _)| n)
                        .collect()
                } else {
                    all.into_iter()
                        .rev()
                        .filter(|(n, r)| *r < me && !self.is_ancestor(*n, node))
                        .map(|(n, _)| n)
                        .collect()
                }
            }
            Axis::Attribute => match node {
                XNode::Node(id) if self.arch.is_element(id) => (0..self.arch.attrs(id).len())
                    .map(|i| XNode::Attr(id, i))
                    .collect(),
                _ => Vec::new(),
            },
        }
    }

    fn test_matches(&self, node: XNode, axis: Axis, test: &NodeTest) -> bool {
        let arch = self.arch;
        match test {
            NodeTest::Node => true,
            NodeTest::Text => matches!(node, XNode::Text(..)),
            NodeTest::Comment => {
                matches!(node, XNode::Node(id) if arch.kind(id) == NodeKind::Comment)
            }
            NodeTest::Any => match node {
                XNode::Attr(..) => axis == Axis::Attribute,
                XNode::Node(id) => axis != Axis::Attribute && arch.is_element(id),
                _ => false,
            },
            NodeTest::Name(name) => match node {
                XNode::Attr(id, i) => {
                    axis == Axis::Attribute && arch.attrs(id)[i].0 == *name
                }
                XNode::Node(id) => {
                    axis != Axis::Attribute && arch.is_element(id) && arch.tag(id) == name
                }
                _ => false,
            },
        }
    }

    // ── string values ──────────────────────────────────────────────

    fn node_string(&self, node: XNode) -> String {
        let arch = self.arch;
        match node {
            XNode::Doc => arch.string_value(arch.root()),
            XNode::Node(id) => arch.string_value(id),
            XNode::Attr(id, i) => arch.attrs(id)[i].1.clone(),
            XNode::Text(id, false) => arch.text(id).unwrap_or_default().to_string(),
            XNode::Text(id, true) => arch.tail(id).unwrap_or_default().to_string(),
        }
    }

    fn node_name(&self, node: XNode) -> String {
        match node {
            XNode::Node(id) if self.arch.kind(id) != NodeKind::Comment => {
                self.arch.tag(id).to_string()
            }
            XNode::Attr(id, i) => self.arch.attrs(id)[i].0.clone(),
            _ => String::new(),
        }
    }

    fn to_string(&self, value: &Value) -> String {
        match value {
            Value::Nodes(nodes) => nodes
                .first()
                .map(|n| self.node_string(*n))
                .unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => number_to_string(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn to_number(&self, value: &Value) -> f64 {
        match value {
            Value::Num(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            other => string_to_number(&self.to_string(other)),
        }
    }

    fn to_bool(value: &Value) -> bool {
        match value {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    // ── evaluation ─────────────────────────────────────────────────

    fn eval(&self, expr: &Expr, focus: Focus) -> Result<Value, XPathError> {
        Ok(match expr {
            Expr::Or(l, r) => Value::Bool(
                Self::to_bool(&self.eval(l, focus)?) || Self::to_bool(&self.eval(r, focus)?),
            ),
            Expr::And(l, r) => Value::Bool(
                Self::to_bool(&self.eval(l, focus)?) && Self::to_bool(&self.eval(r, focus)?),
            ),
            Expr::Compare(op, l, r) => {
                let l = self.eval(l, focus)?;
                let r = self.eval(r, focus)?;
                Value::Bool(self.compare(*op, &l, &r))
            }
            Expr::Arith(op, l, r) => {
                let a = self.to_number(&self.eval(l, focus)?);
                let b = self.to_number(&self.eval(r, focus)?);
                Value::Num(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                    ArithOp::Mod => a % b,
                })
            }
            Expr::Neg(inner) => Value::Num(-self.to_number(&self.eval(inner, focus)?)),
            Expr::Union(l, r) => {
                let (Value::Nodes(mut a), Value::Nodes(b)) =
                    (self.eval(l, focus)?, self.eval(r, focus)?)
                else {
                    return Err(XPathError::NotANodeSet);
                };
                a.extend(b);
                self.sort_unique(&mut a);
                Value::Nodes(a)
            }
            Expr::Literal(s) => Value::Str(s.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Call(func, args) => self.call(*func, args, focus)?,
            Expr::Path { absolute, steps } => {
                let start = if *absolute { XNode::Doc } else { focus.node };
                Value::Nodes(self.apply_steps(vec![start], steps)?)
            }
            Expr::Filter {
                base,
                predicates,
                steps,
            } => {
                let Value::Nodes(mut nodes) = self.eval(base, focus)? else {
                    return Err(XPathError::NotANodeSet);
                };
                self.sort_unique(&mut nodes);
                for pred in predicates {
                    nodes = self.filter(nodes, pred)?;
                }
                Value::Nodes(self.apply_steps(nodes, steps)?)
            }
        })
    }

    fn apply_steps(&self, mut nodes: Vec<XNode>, steps: &[Step]) -> Result<Vec<XNode>, XPathError> {
        for step in steps {
            let mut next = Vec::new();
            for node in &nodes {
                let mut found: Vec<XNode> = self
                    .axis_nodes(*node, step.axis)
                    .into_iter()
                    .filter(|n| self.test_matches(*n, step.axis, &step.test))
                    .collect();
                for pred in &step.predicates {
                    found = self.filter(found, pred)?;
                }
                next.extend(found);
            }
            self.sort_unique(&mut next);
            nodes = next;
        }
        Ok(nodes)
    }

    fn filter(&self, nodes: Vec<XNode>, pred: &Expr) -> Result<Vec<XNode>, XPathError> {
        let size = nodes.len();
        let mut out = Vec::new();
        for (i, node) in nodes.into_iter().enumerate() {
            let focus = Focus {
                node,
                pos: i + 1,
                size,
            };
            let keep = match self.eval(pred, focus)? {
                Value::Num(n) => n == (i + 1) as f64,
                other => Self::to_bool(&other),
            };
            if keep {
                out.push(node);
            }
        }
        Ok(out)
    }

    fn compare(&self, op: CmpOp, l: &Value, r: &Value) -> bool {
        match (l, r) {
            (Value::Nodes(a), Value::Nodes(b)) => a.iter().any(|x| {
                let xs = self.node_string(*x);
                b.iter()
                    .any(|y| self.compare_atoms(op, &Value::Str(xs.clone()), &Value::Str(self.node_string(*y))))
            }),
            (Value::Nodes(nodes), other) => self.compare_nodes(op, nodes, other, false),
            (other, Value::Nodes(nodes)) => self.compare_nodes(op, nodes, other, true),
            _ => self.compare_atoms(op, l, r),
        }
    }

    fn compare_nodes(&self, op: CmpOp, nodes: &[XNode], other: &Value, flipped: bool) -> bool {
        if let Value::Bool(_) = other {
            let set = Value::Bool(!nodes.is_empty());
            return if flipped {
                self.compare_atoms(op, other, &set)
            } else {
                self.compare_atoms(op, &set, other)
            };
        }
        nodes.iter().any(|n| {
            let atom = match other {
                Value::Num(_) => Value::Num(string_to_number(&self.node_string(*n))),
                _ => Value::Str(self.node_string(*n)),
            };
            if flipped {
                self.compare_atoms(op, other, &atom)
            } else {
                self.compare_atoms(op, &atom, other)
            }
        })
    }

    fn compare_atoms(&self, op: CmpOp, l: &Value, r: &Value) -> bool {
        match op {
            CmpOp::Eq | CmpOp::Neq => {
                let equal = match (l, r) {
                    (Value::Bool(_), _) | (_, Value::Bool(_)) => Self::to_bool(l) == Self::to_bool(r),
                    (Value::Num(_), _) | (_, Value::Num(_)) => self.to_number(l) == self.to_number(r),
                    _ => self.to_string(l) == self.to_string(r),
                };
                equal == (op == CmpOp::Eq)
            }
            _ => {
                let a = self.to_number(l);
                let b = self.to_number(r);
                match a.partial_cmp(&b) {
                    None => false,
                    Some(ord) => match op {
                        CmpOp::Lt => ord == Ordering::Less,
                        CmpOp::Le => ord != Ordering::Greater,
                        CmpOp::Gt => ord == Ordering::Greater,
                        _ => ord != Ordering::Less,
                    },
                }
            }
        }
    }

    fn call(&self, func: Func, args: &[Expr], focus: Focus) -> Result<Value, XPathError> {
        let arg = |i: usize| self.eval(&args[i], focus);
        let string_arg = |i: usize| -> Result<String, XPathError> {
            match args.get(i) {
                Some(_) => Ok(self.to_string(&arg(i)?)),
                None => Ok(self.node_string(focus.node)),
            }
        };
        let first_node = |i: usize| -> Result<Option<XNode>, XPathError> {
            match args.get(i) {
                None => Ok(Some(focus.node)),
                Some(_) => match arg(i)? {
                    Value::Nodes(nodes) => Ok(nodes.first().copied()),
                    _ => Err(XPathError::NotANodeSet),
                },
            }
        };
        Ok(match func {
            Func::Last => Value::Num(focus.size as f64),
            Func::Position => Value::Num(focus.pos as f64),
            Func::Count => match arg(0)? {
                Value::Nodes(nodes) => Value::Num(nodes.len() as f64),
                _ => return Err(XPathError::NotANodeSet),
            },
            Func::Not => Value::Bool(!Self::to_bool(&arg(0)?)),
            Func::True => Value::Bool(true),
            Func::False => Value::Bool(false),
            Func::Boolean => Value::Bool(Self::to_bool(&arg(0)?)),
            Func::String => Value::Str(string_arg(0)?),
            Func::Number => match args.first() {
                Some(_) => Value::Num(self.to_number(&arg(0)?)),
                None => Value::Num(string_to_number(&self.node_string(focus.node))),
            },
            Func::Concat => {
                let mut out = String::new();
                for i in 0..args.len() {
                    out.push_str(&string_arg(i)?);
                }
                Value::Str(out)
            }
            Func::Contains => Value::Bool(string_arg(0)?.contains(string_arg(1)?.as_str())),
            Func::StartsWith => Value::Bool(string_arg(0)?.starts_with(string_arg(1)?.as_str())),
            Func::NormalizeSpace => Value::Str(
                string_arg(0)?
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Func::StringLength => Value::Num(string_arg(0)?.chars().count() as f64),
            Func::Name => Value::Str(first_node(0)?.map(|n| self.node_name(n)).unwrap_or_default()),
            Func::LocalName => Value::Str(
                first_node(0)?
                    .map(|n| {
                        let name = self.node_name(n);
                        match name.rsplit_once(':') {
                            Some((_, local)) => local.to_string(),
                            None => name,
                        }
                    })
                    .unwrap_or_default(),
            ),
            Func::HasClass => {
                let classes: Vec<&str> = match focus.node {
                    XNode::Node(id) => self
                        .arch
                        .get(id, "class")
                        .unwrap_or_default()
                        .split_whitespace()
                        .collect(),
                    _ => Vec::new(),
                };
                let mut all = true;
                for i in 0..args.len() {
                    let wanted = string_arg(i)?;
                    all &= classes.iter().any(|c| *c == wanted);
                }
                Value::Bool(all)
            }
        })
    }
}

fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    let body = t.strip_prefix('-').unwrap_or(t);
    let valid = !body.is_empty()
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.chars().filter(|c| *c == '.').count() <= 1
        && body != ".";
    if valid {
        t.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

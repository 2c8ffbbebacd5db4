//! Arena-backed XML tree.
//!
//! Text follows the lxml model: an element's leading text lives in `text`,
//! and the text that follows an element (up to its next sibling) lives in
//! that element's `tail`. Every removal path has to re-home the tail, see
//! [`Arch::remove_keep_tail`].

/// Index of a node inside an [`Arch`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Comment,
    ProcessingInstruction,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    /// Element tag, or processing-instruction target.
    tag: String,
    attrs: Vec<(String, String)>,
    /// Leading text for elements, content for comments and PIs.
    text: Option<String>,
    tail: Option<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    line: usize,
}

impl Node {
    fn new(kind: NodeKind, tag: &str) -> Self {
        Self {
            kind,
            tag: tag.to_string(),
            attrs: Vec::new(),
            text: None,
            tail: None,
            parent: None,
            children: Vec::new(),
            line: 0,
        }
    }
}

/// An XML architecture: an arena of nodes plus the id of the root element.
///
/// Detached nodes stay allocated but are unreachable from the root, so
/// anything that walks the tree from [`Arch::root`] never sees them.
#[derive(Debug, Clone)]
pub struct Arch {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Arch {
    /// Create a tree with a single empty root element.
    pub fn new(root_tag: &str) -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Element, root_tag)],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Make `id` the new root. It is detached from its parent first; its tail is dropped.
    pub fn set_root(&mut self, id: NodeId) {
        self.detach(id);
        self.node_mut(id).tail = None;
        self.root = id;
    }

    /// Number of allocated nodes, reachable or not.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    // ── node data ──────────────────────────────────────────────────

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.node(id).kind == NodeKind::Element
    }

    pub fn tag(&self, id: NodeId) -> &str {
        &self.node(id).tag
    }

    pub fn set_tag(&mut self, id: NodeId, tag: &str) {
        self.node_mut(id).tag = tag.to_string();
    }

    /// 1-based source line, 0 for nodes built programmatically.
    pub fn line(&self, id: NodeId) -> usize {
        self.node(id).line
    }

    pub fn set_line(&mut self, id: NodeId, line: usize) {
        self.node_mut(id).line = line;
    }

    pub fn get(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.get(id, name).is_some()
    }

    /// Set an attribute, keeping its position if it already exists.
    pub fn set(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        let value = value.into();
        let attrs = &mut self.node_mut(id).attrs;
        match attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        let attrs = &mut self.node_mut(id).attrs;
        let pos = attrs.iter().position(|(k, _)| k == name)?;
        Some(attrs.remove(pos).1)
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        &self.node(id).attrs
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.node(id).text.as_deref()
    }

    pub fn set_text(&mut self, id: NodeId, text: Option<String>) {
        self.node_mut(id).text = text;
    }

    pub fn tail(&self, id: NodeId) -> Option<&str> {
        self.node(id).tail.as_deref()
    }

    pub fn set_tail(&mut self, id: NodeId, tail: Option<String>) {
        self.node_mut(id).tail = tail;
    }

    // ── navigation ─────────────────────────────────────────────────

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// All children, comments and processing instructions included.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(move |c| self.is_element(*c))
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    pub fn previous(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let idx = self.index_in_parent(id)?;
        if idx == 0 {
            None
        } else {
            Some(self.children(parent)[idx - 1])
        }
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let idx = self.index_in_parent(id)?;
        self.children(parent).get(idx + 1).copied()
    }

    /// Whether `id` is reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = id;
        loop {
            if cur == self.root {
                return true;
            }
            match self.parent(cur) {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            out.push(p);
            cur = self.parent(p);
        }
        out
    }

    /// Preorder walk of the subtree rooted at `id`, `id` included.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            for child in self.children(cur).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Preorder walk restricted to elements with the given tag (lxml `iter(tag)`).
    pub fn iter_tag(&self, id: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|n| self.is_element(*n) && self.tag(*n) == tag)
            .collect()
    }

    /// Absolute path of element `id` from the top of its tree, lxml
    /// `getpath` style: `/form/group[2]/field`. A step is indexed only
    /// when a sibling shares its tag.
    pub fn path(&self, id: NodeId) -> String {
        let mut steps = Vec::new();
        let mut cur = id;
        loop {
            let tag = self.tag(cur);
            let step = match self.parent(cur) {
                Some(parent) => {
                    let same: Vec<NodeId> = self
                        .element_children(parent)
                        .filter(|c| self.tag(*c) == tag)
                        .collect();
                    if same.len() > 1 {
                        let pos = same.iter().position(|c| *c == cur).unwrap_or(0) + 1;
                        format!("{tag}[{pos}]")
                    } else {
                        tag.to_string()
                    }
                }
                None => tag.to_string(),
            };
            steps.push(step);
            match self.parent(cur) {
                Some(parent) => cur = parent,
                None => break,
            }
        }
        steps.reverse();
        format!("/{}", steps.join("/"))
    }

    /// Concatenated text of the subtree (XPath string-value).
    pub fn string_value(&self, id: NodeId) -> String {
        let mut out = String::new();
        if !self.is_element(id) {
            if let Some(t) = self.text(id) {
                out.push_str(t);
            }
            return out;
        }
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        if let Some(t) = self.text(id) {
            out.push_str(t);
        }
        for child in self.children(id) {
            if self.is_element(*child) {
                self.collect_text(*child, out);
            }
            if let Some(t) = self.tail(*child) {
                out.push_str(t);
            }
        }
    }

    // ── construction ───────────────────────────────────────────────

    /// Allocate a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(Node::new(NodeKind::Element, tag))
    }

    /// Allocate a detached comment.
    pub fn create_comment(&mut self, content: &str) -> NodeId {
        let mut node = Node::new(NodeKind::Comment, "");
        node.text = Some(content.to_string());
        self.alloc(node)
    }

    /// Allocate a detached processing instruction.
    pub fn create_pi(&mut self, target: &str, content: Option<String>) -> NodeId {
        let mut node = Node::new(NodeKind::ProcessingInstruction, target);
        node.text = content;
        self.alloc(node)
    }

    /// Deep copy of a subtree (tail included), detached.
    pub fn deep_copy(&mut self, id: NodeId) -> NodeId {
        let mut copy = self.node(id).clone();
        copy.parent = None;
        let children = std::mem::take(&mut copy.children);
        let new_id = self.alloc(copy);
        for child in children {
            let child_copy = self.deep_copy(child);
            self.node_mut(child_copy).parent = Some(new_id);
            self.node_mut(new_id).children.push(child_copy);
        }
        new_id
    }

    /// Copy a subtree of another arena into this one, detached.
    pub fn import(&mut self, other: &Arch, id: NodeId) -> NodeId {
        let mut copy = other.node(id).clone();
        copy.parent = None;
        copy.children = Vec::new();
        let new_id = self.alloc(copy);
        for child in other.children(id) {
            let child_copy = self.import(other, *child);
            self.node_mut(child_copy).parent = Some(new_id);
            self.node_mut(new_id).children.push(child_copy);
        }
        new_id
    }

    /// Extract a subtree into a fresh arena whose root is the copy of `id`.
    pub fn extract(&self, id: NodeId) -> Arch {
        let mut out = Arch {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        let root = out.import(self, id);
        out.node_mut(root).tail = None;
        out.root = root;
        out
    }

    // ── mutation ───────────────────────────────────────────────────

    /// Unlink `id` from its parent. The tail travels with the node.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            self.node_mut(parent).children.retain(|c| *c != id);
            self.node_mut(id).parent = None;
        }
    }

    /// Append `child` as the last child of `parent`, detaching it first.
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    /// Insert `child` at position `index` among `parent`'s children.
    pub fn insert(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        self.node_mut(child).parent = Some(parent);
        let children = &mut self.node_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
    }

    /// Insert `new` right before `node`. Tails are left untouched.
    pub fn add_previous(&mut self, node: NodeId, new: NodeId) {
        self.detach(new);
        if let Some(parent) = self.parent(node) {
            let idx = self.index_in_parent(node).unwrap_or(0);
            self.insert(parent, idx, new);
        }
    }

    /// Insert `new` right after `node`. Tails are left untouched.
    pub fn add_next(&mut self, node: NodeId, new: NodeId) {
        self.detach(new);
        if let Some(parent) = self.parent(node) {
            let idx = self.index_in_parent(node).map(|i| i + 1).unwrap_or(0);
            self.insert(parent, idx, new);
        }
    }

    /// Append `text` to whatever text precedes `node`: the previous
    /// sibling's tail, or the parent's leading text (right-stripped first).
    pub fn add_text_before(&mut self, node: NodeId, text: Option<&str>) {
        let Some(text) = text else {
            return;
        };
        if let Some(prev) = self.previous(node) {
            let tail = self.node(prev).tail.clone().unwrap_or_default();
            self.node_mut(prev).tail = Some(tail + text);
        } else if let Some(parent) = self.parent(node) {
            let lead = self.node(parent).text.clone().unwrap_or_default();
            self.node_mut(parent).text = Some(lead.trim_end().to_string() + text);
        }
    }

    /// Remove `node` from the tree while keeping its tail in the document.
    pub fn remove_keep_tail(&mut self, node: NodeId) {
        let tail = self.node_mut(node).tail.take();
        self.add_text_before(node, tail.as_deref());
        self.detach(node);
    }

    /// Remove all children and the leading text of `id`.
    pub fn clear_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.node_mut(id).children);
        for child in children {
            self.node_mut(child).parent = None;
        }
        self.node_mut(id).text = None;
    }
}

//! [`Arch`] → XML text, in the shape lxml's `tostring` produces.

use crate::tree::{Arch, NodeId, NodeKind};

impl Arch {
    /// Serialize the whole tree.
    pub fn to_xml(&self) -> String {
        self.node_to_xml(self.root())
    }

    /// Serialize one node and its subtree, without its tail.
    pub fn node_to_xml(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    /// Opening tag only, e.g. `<field name="x">`, used in error messages.
    pub fn start_tag(&self, id: NodeId) -> String {
        let mut out = String::new();
        out.push('<');
        out.push_str(self.tag(id));
        self.write_attrs(id, &mut out);
        out.push('>');
        out
    }

    fn write_attrs(&self, id: NodeId, out: &mut String) {
        for (k, v) in self.attrs(id) {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            escape_attr(v, out);
            out.push('"');
        }
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            NodeKind::Comment => {
                out.push_str("<!--");
                out.push_str(self.text(id).unwrap_or_default());
                out.push_str("-->");
            }
            NodeKind::ProcessingInstruction => {
                out.push_str("<?");
                out.push_str(self.tag(id));
                if let Some(content) = self.text(id) {
                    out.push(' ');
                    out.push_str(content);
                }
                out.push_str("?>");
            }
            NodeKind::Element => {
                out.push('<');
                out.push_str(self.tag(id));
                self.write_attrs(id, out);
                let children = self.children(id);
                if children.is_empty() && self.text(id).is_none() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                if let Some(text) = self.text(id) {
                    escape_text(text, out);
                }
                for child in children {
                    self.write_node(*child, out);
                    if let Some(tail) = self.tail(*child) {
                        escape_text(tail, out);
                    }
                }
                out.push_str("</");
                out.push_str(self.tag(id));
                out.push('>');
            }
        }
    }
}

fn escape_text(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#9;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

//! OpenERP view architecture trees.
//!
//! A view architecture is an XML document held in an arena ([`Arch`]):
//! nodes are addressed by [`NodeId`] and carry explicit parent/child
//! indices, so nodes can be detached, moved and re-inserted while the
//! inheritance engine rewrites the tree.
//!
//! ```ignore
//! let arch = Arch::parse(r#"<form><field name="name"/></form>"#)?;
//! let found = XPath::compile("//field[@name='name']")?.select(&arch, arch.root())?;
//! ```

pub mod error;
pub mod parse;
pub mod tree;
pub mod write;
pub mod xpath;

pub use error::{XPathError, XmlError};
pub use parse::ParseOptions;
pub use tree::{Arch, NodeId, NodeKind};
pub use xpath::XPath;

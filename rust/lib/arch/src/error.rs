use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum XmlError {
    #[error("XML syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("document has no root element")]
    NoRoot,

    #[error("document has more than one root element (line {line})")]
    MultipleRoots { line: usize },

    #[error("text outside the root element (line {line})")]
    TextOutsideRoot { line: usize },

    #[error("element <{tag}> opened at line {line} is never closed")]
    Unclosed { tag: String, line: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum XPathError {
    #[error("invalid xpath {expr:?}: {message} (at offset {offset})")]
    Syntax {
        expr: String,
        offset: usize,
        message: String,
    },

    #[error("unknown xpath function {0}()")]
    UnknownFunction(String),

    #[error("xpath function {name}() expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("xpath expression does not select elements")]
    NotANodeSet,

    #[error("unsupported xpath construct: {0}")]
    Unsupported(String),
}

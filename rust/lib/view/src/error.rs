use std::fmt;

use openerp_arch::{XPathError, XmlError};
use thiserror::Error;

use crate::record::ViewId;

// ── Structural errors ───────────────────────────────────────────────
//
// Raised while folding extension specs onto a parent architecture. They
// carry the spec line so the service can point at the offending node.

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InheritError {
    #[error("Element '{tag}' cannot be located in parent view")]
    NotLocated { tag: String, line: usize },

    #[error("Invalid position attribute: '{position}'")]
    InvalidPosition { position: String, line: usize },

    #[error("Invalid mode attribute: '{mode}'")]
    InvalidMode { mode: String, line: usize },

    #[error("Invalid specification for moved nodes: {spec}")]
    InvalidMove { spec: String, line: usize },

    #[error("{message}")]
    InvalidAttributes { message: String, line: usize },

    #[error("Invalid separator {separator:?} for python expression {attribute:?}; valid values are 'and' and 'or'")]
    InvalidSeparator {
        separator: String,
        attribute: String,
        line: usize,
    },

    #[error("Invalid replacement of the root node: {spec}")]
    InvalidRootReplace { spec: String, line: usize },

    #[error("Cannot insert nodes {position} the root node")]
    RootSibling { position: String, line: usize },

    #[error("View inheritance may not use attribute '{attribute}' as a selector.")]
    TranslatedSelector { attribute: String, line: usize },

    #[error("Invalid XPath {expr:?}: {source}")]
    XPath {
        expr: String,
        line: usize,
        #[source]
        source: XPathError,
    },
}

impl InheritError {
    pub fn line(&self) -> usize {
        match self {
            InheritError::NotLocated { line, .. }
            | InheritError::InvalidPosition { line, .. }
            | InheritError::InvalidMode { line, .. }
            | InheritError::InvalidMove { line, .. }
            | InheritError::InvalidAttributes { line, .. }
            | InheritError::InvalidSeparator { line, .. }
            | InheritError::InvalidRootReplace { line, .. }
            | InheritError::RootSibling { line, .. }
            | InheritError::TranslatedSelector { line, .. }
            | InheritError::XPath { line, .. } => *line,
        }
    }
}

// ── Expression errors ───────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("unbalanced {0:?} in expression")]
    Unbalanced(char),

    #[error("unterminated string in expression")]
    UnterminatedString,

    #[error("unexpected character {0:?} in expression")]
    UnexpectedChar(char),
}

// ── Storage errors ──────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

// ── View errors ─────────────────────────────────────────────────────

/// Where a view error happened, rendered under the message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewErrorContext {
    pub view_id: Option<ViewId>,
    pub name: Option<String>,
    pub xml_id: Option<String>,
    pub model: Option<String>,
    pub parent: Option<String>,
    pub file: Option<String>,
    pub line: Option<usize>,
}

impl fmt::Display for ViewErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut entry = |f: &mut fmt::Formatter<'_>, key: &str, value: &dyn fmt::Display| {
            let sep = if first { "" } else { ", " };
            first = false;
            write!(f, "{sep}{key}: {value}")
        };
        if let Some(v) = &self.file {
            entry(f, "file", v)?;
        }
        if let Some(v) = &self.line {
            entry(f, "line", v)?;
        }
        if let Some(v) = &self.name {
            entry(f, "name", v)?;
        }
        if let Some(v) = &self.view_id {
            entry(f, "view", v)?;
        }
        if let Some(v) = &self.model {
            entry(f, "view.model", v)?;
        }
        if let Some(v) = &self.parent {
            entry(f, "view.parent", v)?;
        }
        if let Some(v) = &self.xml_id {
            entry(f, "xmlid", v)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ViewError {
    /// User-facing validation failure tied to a view.
    #[error("{message}\n\nView error context:\n{context}")]
    Invalid {
        message: String,
        context: Box<ViewErrorContext>,
    },

    #[error("view {0} not found")]
    NotFound(ViewId),

    #[error("view {0} is still inherited by other views")]
    HasChildren(ViewId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ViewError {
    pub fn invalid(message: impl Into<String>, context: ViewErrorContext) -> Self {
        ViewError::Invalid {
            message: message.into(),
            context: Box::new(context),
        }
    }

    /// The bare message, without the context block.
    pub fn message(&self) -> String {
        match self {
            ViewError::Invalid { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn context(&self) -> Option<&ViewErrorContext> {
        match self {
            ViewError::Invalid { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<XmlError> for ViewErrorContext {
    fn from(err: XmlError) -> Self {
        let line = match err {
            XmlError::Syntax { line, .. }
            | XmlError::MultipleRoots { line }
            | XmlError::TextOutsideRoot { line }
            | XmlError::Unclosed { line, .. } => Some(line),
            XmlError::NoRoot => None,
        };
        ViewErrorContext {
            line,
            ..Default::default()
        }
    }
}

// ── Configuration errors ────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid config {path}: {message}")]
    Parse { path: String, message: String },
}

// ── Module loading errors ───────────────────────────────────────────

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("io error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid manifest {path}: {message}")]
    Manifest { path: String, message: String },

    #[error("invalid data file {path}: {message}")]
    Data { path: String, message: String },

    #[error("module {module} depends on unknown module {dependency}")]
    MissingDependency { module: String, dependency: String },

    #[error("circular module dependencies involving {0}")]
    CircularDependency(String),

    #[error("unresolved reference {reference} in {path}")]
    UnresolvedRef { path: String, reference: String },

    #[error("module {module}: {source}")]
    View {
        module: String,
        #[source]
        source: ViewError,
    },
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type ViewId = u64;

pub const DEFAULT_PRIORITY: i32 = 16;

/// How a view with a parent takes part in combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Folded into its parent's combined architecture.
    Extension,
    /// Starts a combination of its own.
    Primary,
}

impl ViewMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewMode::Extension => "extension",
            ViewMode::Primary => "primary",
        }
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extension" => Ok(ViewMode::Extension),
            "primary" => Ok(ViewMode::Primary),
            other => Err(format!("invalid view mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    List,
    Form,
    Graph,
    Pivot,
    Calendar,
    Kanban,
    Search,
    Activity,
    Qweb,
}

impl ViewType {
    pub const ALL: [ViewType; 9] = [
        ViewType::List,
        ViewType::Form,
        ViewType::Graph,
        ViewType::Pivot,
        ViewType::Calendar,
        ViewType::Kanban,
        ViewType::Search,
        ViewType::Activity,
        ViewType::Qweb,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ViewType::List => "list",
            ViewType::Form => "form",
            ViewType::Graph => "graph",
            ViewType::Pivot => "pivot",
            ViewType::Calendar => "calendar",
            ViewType::Kanban => "kanban",
            ViewType::Search => "search",
            ViewType::Activity => "activity",
            ViewType::Qweb => "qweb",
        }
    }

    /// View type implied by an architecture's root tag.
    pub fn from_root_tag(tag: &str) -> Option<ViewType> {
        match tag {
            "tree" | "list" => Some(ViewType::List),
            "t" => Some(ViewType::Qweb),
            other => other.parse().ok(),
        }
    }

    /// Whether `tag` is one of the root tags a view of this type may use.
    pub fn accepts_root(self, tag: &str) -> bool {
        ViewType::from_root_tag(tag) == Some(self)
    }
}

impl FromStr for ViewType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "tree" {
            return Ok(ViewType::List);
        }
        ViewType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("invalid view type {s:?}"))
    }
}

impl fmt::Display for ViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub id: ViewId,
    pub name: String,
    pub model: String,
    /// Architecture source text.
    pub arch: String,
    pub inherit_id: Option<ViewId>,
    pub mode: ViewMode,
    pub priority: i32,
    pub active: bool,
    pub xml_id: Option<String>,
    /// Module that defined the view, `None` for custom views.
    pub module: Option<String>,
    pub view_type: Option<ViewType>,
}

impl View {
    pub fn display_name(&self) -> String {
        match &self.xml_id {
            Some(xml_id) => format!("{} ({xml_id})", self.name),
            None => self.name.clone(),
        }
    }

    /// `(priority, id)`, the combination order of sibling views.
    pub fn sort_key(&self) -> (i32, ViewId) {
        (self.priority, self.id)
    }
}

/// Values for a view to be created; unset fields take their defaults.
#[derive(Debug, Clone, Default)]
pub struct NewView {
    pub name: String,
    pub model: String,
    pub arch: String,
    pub inherit_id: Option<ViewId>,
    pub mode: Option<ViewMode>,
    pub priority: Option<i32>,
    pub active: Option<bool>,
    pub xml_id: Option<String>,
    pub module: Option<String>,
    pub view_type: Option<ViewType>,
}

impl NewView {
    pub fn new(name: impl Into<String>, model: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            arch: arch.into(),
            ..Default::default()
        }
    }

    pub fn inherit(mut self, parent: ViewId) -> Self {
        self.inherit_id = Some(parent);
        self
    }

    pub fn mode(mut self, mode: ViewMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn xml_id(mut self, xml_id: impl Into<String>) -> Self {
        self.xml_id = Some(xml_id.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn view_type(mut self, view_type: ViewType) -> Self {
        self.view_type = Some(view_type);
        self
    }

    /// Materialize with defaults: extension when a parent is set, priority 16, active.
    pub fn into_view(self, id: ViewId) -> View {
        let mode = self.mode.unwrap_or(if self.inherit_id.is_some() {
            ViewMode::Extension
        } else {
            ViewMode::Primary
        });
        View {
            id,
            name: self.name,
            model: self.model,
            arch: self.arch,
            inherit_id: self.inherit_id,
            mode,
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            active: self.active.unwrap_or(true),
            xml_id: self.xml_id,
            module: self.module,
            view_type: self.view_type,
        }
    }
}

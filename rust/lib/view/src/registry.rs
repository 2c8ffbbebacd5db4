//! Model, group and access metadata the view engine consults.
//!
//! This is the engine's view of the ORM: which fields a model has, which
//! groups exist and what they imply, and which groups may read or write a
//! model. Module manifests populate it (see [`crate::module`]).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::groups::GroupGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Char,
    Text,
    Html,
    Integer,
    Float,
    Monetary,
    Boolean,
    Date,
    Datetime,
    Selection,
    Binary,
    Json,
    Properties,
    Reference,
    Many2one,
    One2many,
    Many2many,
}

impl FieldType {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            FieldType::Many2one | FieldType::One2many | FieldType::Many2many
        )
    }

    pub fn is_x2many(self) -> bool {
        matches!(self, FieldType::One2many | FieldType::Many2many)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Comodel of relational fields.
    #[serde(default)]
    pub relation: Option<String>,
    /// `groups` restriction, same syntax as the view attribute.
    #[serde(default)]
    pub groups: Option<String>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub string: Option<String>,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            relation: None,
            groups: None,
            readonly: false,
            required: false,
            string: None,
        }
    }

    pub fn relation(mut self, comodel: impl Into<String>) -> Self {
        self.relation = Some(comodel.into());
        self
    }

    pub fn groups(mut self, groups: impl Into<String>) -> Self {
        self.groups = Some(groups.into());
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_relational(&self) -> bool {
        self.field_type.is_relational()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Fully qualified xml id, e.g. `base.group_user`.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Groups whose members this group's members also are.
    #[serde(default)]
    pub implied: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Create,
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRule {
    pub model: String,
    /// `None` grants every user.
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub perm_read: bool,
    #[serde(default)]
    pub perm_write: bool,
    #[serde(default)]
    pub perm_create: bool,
    #[serde(default)]
    pub perm_unlink: bool,
}

impl AccessRule {
    fn allows(&self, op: Operation) -> bool {
        match op {
            Operation::Read => self.perm_read,
            Operation::Write => self.perm_write,
            Operation::Create => self.perm_create,
            Operation::Unlink => self.perm_unlink,
        }
    }
}

/// A user as seen by view rendering: a login and the groups assigned to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub login: String,
    pub groups: BTreeSet<String>,
}

impl User {
    pub fn new<I, S>(login: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            login: login.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: BTreeMap<String, BTreeMap<String, FieldInfo>>,
    groups: BTreeMap<String, GroupInfo>,
    access: Vec<AccessRule>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a model or extend an existing one with more fields.
    /// Every model gets `id` and `display_name`.
    pub fn add_model<I>(&mut self, name: &str, fields: I)
    where
        I: IntoIterator<Item = FieldInfo>,
    {
        let entry = self.models.entry(name.to_string()).or_insert_with(|| {
            let mut base = BTreeMap::new();
            base.insert(
                "id".to_string(),
                FieldInfo::new("id", FieldType::Integer).readonly(),
            );
            base.insert(
                "display_name".to_string(),
                FieldInfo::new("display_name", FieldType::Char).readonly(),
            );
            base
        });
        for field in fields {
            entry.insert(field.name.clone(), field);
        }
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn field(&self, model: &str, name: &str) -> Option<&FieldInfo> {
        self.models.get(model)?.get(name)
    }

    pub fn fields(&self, model: &str) -> Option<&BTreeMap<String, FieldInfo>> {
        self.models.get(model)
    }

    pub fn add_group(&mut self, group: GroupInfo) {
        match self.groups.get_mut(&group.id) {
            Some(existing) => {
                for implied in group.implied {
                    if !existing.implied.contains(&implied) {
                        existing.implied.push(implied);
                    }
                }
                if group.name.is_some() {
                    existing.name = group.name;
                }
            }
            None => {
                self.groups.insert(group.id.clone(), group);
            }
        }
    }

    pub fn has_group(&self, id: &str) -> bool {
        self.groups.contains_key(id)
    }

    pub fn group_graph(&self) -> GroupGraph {
        GroupGraph::new(
            self.groups
                .values()
                .map(|g| (g.id.as_str(), g.implied.as_slice())),
        )
    }

    pub fn add_access(&mut self, rule: AccessRule) {
        self.access.push(rule);
    }

    /// Whether a user holding `groups` (implication-closed) may perform `op` on `model`.
    pub fn check_access(&self, groups: &BTreeSet<String>, model: &str, op: Operation) -> bool {
        self.access.iter().any(|rule| {
            rule.model == model
                && rule.allows(op)
                && rule.group.as_ref().map_or(true, |g| groups.contains(g))
        })
    }
}

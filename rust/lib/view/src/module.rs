//! Loading views from module directories.
//!
//! ```text
//! data-dir/
//! ├── base/__manifest__.toml
//! ├── base/views/partner.xml
//! └── sale/__manifest__.toml        depends = ["base"]
//! ```
//!
//! Modules load in dependency order. Each module first extends the model
//! registry with its manifest, then creates or updates the views of its
//! data files without validating them. Once the module is done, the views
//! it touched are validated against the views of loaded modules only.
//! Views without xml id are validated after every module.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use openerp_arch::{Arch, NodeId, ParseOptions};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::record::{NewView, ViewId, ViewMode, ViewType};
use crate::registry::{AccessRule, FieldInfo, GroupInfo, Registry};
use crate::service::{ViewService, ViewUpdate};

pub const MANIFEST_FILE: &str = "__manifest__.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub depends: Vec<String>,
    /// Data files, relative to the module directory, in load order.
    #[serde(default)]
    pub data: Vec<String>,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub groups: Vec<GroupInfo>,
    #[serde(default)]
    pub access: Vec<AccessRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
}

#[derive(Debug, Clone)]
pub struct Module {
    /// Directory name, the prefix of the module's xml ids.
    pub name: String,
    pub path: PathBuf,
    pub manifest: Manifest,
}

impl Module {
    /// Add the module's models, groups and access rules to `registry`.
    pub fn register(&self, registry: &mut Registry) {
        for model in &self.manifest.models {
            registry.add_model(&model.name, model.fields.iter().cloned());
        }
        for group in &self.manifest.groups {
            registry.add_group(group.clone());
        }
        for rule in &self.manifest.access {
            registry.add_access(rule.clone());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Modules in load order.
    pub modules: Vec<String>,
    pub created: usize,
    pub updated: usize,
    pub warnings: Vec<String>,
}

fn io_error(path: &Path, e: std::io::Error) -> LoadError {
    LoadError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

/// Every sub-directory of `data_dir` holding a manifest.
pub fn discover(data_dir: &Path) -> Result<BTreeMap<String, Module>, LoadError> {
    let mut modules = BTreeMap::new();
    if !data_dir.is_dir() {
        debug!("data dir {:?} does not exist, no modules", data_dir);
        return Ok(modules);
    }
    let entries = fs::read_dir(data_dir).map_err(|e| io_error(data_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_error(data_dir, e))?;
        let path = entry.path();
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let src = fs::read_to_string(&manifest_path).map_err(|e| io_error(&manifest_path, e))?;
        let manifest: Manifest = toml::from_str(&src).map_err(|e| LoadError::Manifest {
            path: manifest_path.display().to_string(),
            message: e.to_string(),
        })?;
        modules.insert(name.clone(), Module { name, path, manifest });
    }
    debug!("discovered {} modules in {:?}", modules.len(), data_dir);
    Ok(modules)
}

/// Module names, dependencies first; ties broken by name.
pub fn load_order(modules: &BTreeMap<String, Module>) -> Result<Vec<String>, LoadError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        modules: &BTreeMap<String, Module>,
        marks: &mut BTreeMap<String, Mark>,
        order: &mut Vec<String>,
    ) -> Result<(), LoadError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(LoadError::CircularDependency(name.to_string())),
            None => {}
        }
        marks.insert(name.to_string(), Mark::Visiting);
        if let Some(module) = modules.get(name) {
            for dep in &module.manifest.depends {
                if !modules.contains_key(dep) {
                    return Err(LoadError::MissingDependency {
                        module: name.to_string(),
                        dependency: dep.clone(),
                    });
                }
                visit(dep, modules, marks, order)?;
            }
        }
        marks.insert(name.to_string(), Mark::Done);
        order.push(name.to_string());
        Ok(())
    }

    let mut marks = BTreeMap::new();
    let mut order = Vec::new();
    for name in modules.keys() {
        visit(name, modules, &mut marks, &mut order)?;
    }
    Ok(order)
}

// ── Data files ──

/// A `<record model="ir.ui.view">` as written in a data file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewRecord {
    /// Fully qualified xml id.
    pub xml_id: String,
    pub name: Option<String>,
    pub model: Option<String>,
    /// Fully qualified xml id of the parent.
    pub inherit_ref: Option<String>,
    pub priority: Option<i32>,
    pub mode: Option<ViewMode>,
    pub active: Option<bool>,
    pub view_type: Option<ViewType>,
    pub arch: Option<String>,
    pub line: usize,
}

fn qualify(module: &str, xml_id: &str) -> String {
    if xml_id.contains('.') {
        xml_id.to_string()
    } else {
        format!("{module}.{xml_id}")
    }
}

fn parse_eval_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "True" | "1" | "true" => Some(true),
        "False" | "0" | "false" => Some(false),
        _ => None,
    }
}

/// Text value of a record `<field>`: its `eval`, else its text.
fn field_value(doc: &Arch, node: NodeId) -> String {
    doc.get(node, "eval")
        .map(str::to_string)
        .unwrap_or_else(|| doc.string_value(node).trim().to_string())
}

/// Serialized `arch` field: the single root, or several roots in `<data>`.
fn arch_value(doc: &Arch, node: NodeId) -> Option<String> {
    let roots: Vec<NodeId> = doc.element_children(node).collect();
    match roots.as_slice() {
        [] => None,
        [root] => Some(doc.node_to_xml(*root)),
        many => Some(format!(
            "<data>{}</data>",
            many.iter().map(|n| doc.node_to_xml(*n)).collect::<String>()
        )),
    }
}

/// View records of one data file, in document order.
pub fn parse_data_file(module: &str, path: &Path, src: &str) -> Result<Vec<ViewRecord>, LoadError> {
    let data_error = |message: String| LoadError::Data {
        path: path.display().to_string(),
        message,
    };
    let doc = Arch::parse_with(
        src,
        ParseOptions {
            remove_blank_text: true,
        },
    )
    .map_err(|e| data_error(e.to_string()))?;

    let mut records = Vec::new();
    for node in doc.iter_tag(doc.root(), "record") {
        if doc.get(node, "model") != Some("ir.ui.view") {
            continue;
        }
        let line = doc.line(node);
        let Some(id) = doc.get(node, "id") else {
            return Err(data_error(format!("line {line}: view record without id")));
        };
        let mut record = ViewRecord {
            xml_id: qualify(module, id),
            line,
            ..Default::default()
        };
        for field in doc.element_children(node).filter(|n| doc.tag(*n) == "field") {
            let name = doc.get(field, "name").unwrap_or_default();
            let field_line = doc.line(field);
            match name {
                "name" => record.name = Some(field_value(&doc, field)),
                "model" => record.model = Some(field_value(&doc, field)),
                "inherit_id" => {
                    record.inherit_ref = doc.get(field, "ref").map(|r| qualify(module, r));
                }
                "priority" => {
                    let value = field_value(&doc, field);
                    let priority = value.parse().map_err(|_| {
                        data_error(format!("line {field_line}: invalid priority {value:?}"))
                    })?;
                    record.priority = Some(priority);
                }
                "mode" => {
                    let value = field_value(&doc, field);
                    let mode = value
                        .parse()
                        .map_err(|e: String| data_error(format!("line {field_line}: {e}")))?;
                    record.mode = Some(mode);
                }
                "active" => {
                    let value = field_value(&doc, field);
                    record.active = Some(parse_eval_bool(&value).ok_or_else(|| {
                        data_error(format!("line {field_line}: invalid active value {value:?}"))
                    })?);
                }
                "type" => {
                    let value = field_value(&doc, field);
                    let view_type = value
                        .parse()
                        .map_err(|e: String| data_error(format!("line {field_line}: {e}")))?;
                    record.view_type = Some(view_type);
                }
                "arch" | "arch_base" | "arch_db" => record.arch = arch_value(&doc, field),
                other => debug!(field = other, xml_id = %record.xml_id, "ignored view field"),
            }
        }
        records.push(record);
    }
    Ok(records)
}

// ── Loading ──

/// Load every module under `data_dir` into `service`.
pub fn load_modules(data_dir: &Path, service: &mut ViewService) -> Result<LoadReport, LoadError> {
    let modules = discover(data_dir)?;
    let order = load_order(&modules)?;
    let mut report = LoadReport::default();
    let mut loaded = BTreeSet::new();

    for name in &order {
        let Some(module) = modules.get(name) else {
            continue;
        };
        let touched = load_module(module, service, &mut report)?;
        loaded.insert(name.clone());
        for id in touched {
            let warnings = service
                .validate(id, Some(&loaded))
                .map_err(|source| LoadError::View {
                    module: name.clone(),
                    source,
                })?;
            report.warnings.extend(warnings);
        }
        info!(module = %name, "module loaded");
        report.modules.push(name.clone());
    }

    let custom: Vec<ViewId> = service
        .views()
        .map_err(|source| LoadError::View {
            module: String::new(),
            source,
        })?
        .into_iter()
        .filter(|v| v.xml_id.is_none())
        .map(|v| v.id)
        .collect();
    for id in custom {
        let warnings = service.validate(id, None).map_err(|source| LoadError::View {
            module: "custom".to_string(),
            source,
        })?;
        report.warnings.extend(warnings);
    }
    Ok(report)
}

/// Register the module and write its views; returns the ids it touched.
fn load_module(
    module: &Module,
    service: &mut ViewService,
    report: &mut LoadReport,
) -> Result<Vec<ViewId>, LoadError> {
    let mut registry = service.registry().clone();
    module.register(&mut registry);
    service.set_registry(registry);

    let view_error = |source| LoadError::View {
        module: module.name.clone(),
        source,
    };
    let mut touched = Vec::new();
    for file in &module.manifest.data {
        let path = module.path.join(file);
        let src = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        for record in parse_data_file(&module.name, &path, &src)? {
            let inherit_id = match &record.inherit_ref {
                Some(reference) => Some(
                    service
                        .find_by_xml_id(reference)
                        .map_err(view_error)?
                        .ok_or_else(|| LoadError::UnresolvedRef {
                            path: path.display().to_string(),
                            reference: reference.clone(),
                        })?
                        .id,
                ),
                None => None,
            };
            let existing = service.find_by_xml_id(&record.xml_id).map_err(view_error)?;
            let id = match existing {
                Some(view) => {
                    let update = ViewUpdate {
                        name: record.name,
                        arch: record.arch,
                        inherit_id: Some(inherit_id),
                        mode: record.mode,
                        priority: record.priority,
                        active: record.active,
                    };
                    service.write_unchecked(view.id, update).map_err(view_error)?;
                    report.updated += 1;
                    view.id
                }
                None => {
                    let Some(model) = record.model.clone() else {
                        return Err(LoadError::Data {
                            path: path.display().to_string(),
                            message: format!("line {}: view {} has no model", record.line, record.xml_id),
                        });
                    };
                    let mut new = NewView::new(
                        record.name.clone().unwrap_or_else(|| record.xml_id.clone()),
                        model,
                        record.arch.clone().unwrap_or_default(),
                    )
                    .xml_id(record.xml_id.clone())
                    .module(module.name.clone());
                    new.inherit_id = inherit_id;
                    new.mode = record.mode;
                    new.priority = record.priority;
                    new.active = record.active;
                    new.view_type = record.view_type;
                    let view = service.create_unchecked(new).map_err(view_error)?;
                    report.created += 1;
                    view.id
                }
            };
            touched.push(id);
        }
    }
    if touched.is_empty() && !module.manifest.data.is_empty() {
        warn!(module = %module.name, "data files define no view");
    }
    Ok(touched)
}

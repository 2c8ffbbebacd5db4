//! The view service: constrained CRUD over a [`ViewStore`], combination,
//! validation and rendering.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use openerp_arch::Arch;
use tracing::{debug, info};

use crate::access::apply_user_access;
use crate::cache::{ArchCache, CacheKey};
use crate::combine::{check_selectors, CombineOptions, Validation, ViewGraph};
use crate::config::EngineConfig;
use crate::error::{ViewError, ViewErrorContext};
use crate::postprocess::{PostprocessOptions, Postprocessed, Postprocessor};
use crate::record::{NewView, View, ViewId, ViewMode, ViewType};
use crate::registry::{Registry, User};
use crate::store::{RedbViewStore, ViewStore};

/// Changes to apply to a stored view; `None` leaves a value untouched.
#[derive(Debug, Clone, Default)]
pub struct ViewUpdate {
    pub name: Option<String>,
    pub arch: Option<String>,
    /// `Some(None)` detaches the view from its parent.
    pub inherit_id: Option<Option<ViewId>>,
    pub mode: Option<ViewMode>,
    pub priority: Option<i32>,
    pub active: Option<bool>,
}

impl ViewUpdate {
    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn inherit(mut self, parent: Option<ViewId>) -> Self {
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

    fn apply(self, view: &mut View) {
        if let Some(name) = self.name {
            view.name = name;
        }
        if let Some(arch) = self.arch {
            view.arch = arch;
        }
        if let Some(parent) = self.inherit_id {
            view.inherit_id = parent;
            if self.mode.is_none() {
                view.mode = if parent.is_some() {
                    ViewMode::Extension
                } else {
                    ViewMode::Primary
                };
            }
        }
        if let Some(mode) = self.mode {
            view.mode = mode;
        }
        if let Some(priority) = self.priority {
            view.priority = priority;
        }
        if let Some(active) = self.active {
            view.active = active;
        }
    }
}

/// A view ready for one user.
#[derive(Debug, Clone)]
pub struct RenderedView {
    pub id: ViewId,
    pub model: String,
    pub view_type: Option<ViewType>,
    pub arch: Arch,
    /// Model → fields the client has to read.
    pub fields: BTreeMap<String, BTreeSet<String>>,
    pub warnings: Vec<String>,
}

/// View service: owns the store, the model registry and the arch cache.
pub struct ViewService {
    store: Box<dyn ViewStore>,
    registry: Registry,
    cache: ArchCache,
    strict: bool,
}

impl ViewService {
    pub fn new(store: Box<dyn ViewStore>, registry: Registry) -> Self {
        Self {
            store,
            registry,
            cache: ArchCache::new(),
            strict: false,
        }
    }

    /// Open the redb store named by `config`.
    pub fn open(config: &EngineConfig, registry: Registry) -> Result<Self, ViewError> {
        let store = RedbViewStore::open(&config.resolve_db_path())?;
        let cache = if config.cache {
            ArchCache::new()
        } else {
            ArchCache::disabled()
        };
        Ok(Self::new(Box::new(store), registry)
            .with_cache(cache)
            .strict(config.strict))
    }

    pub fn with_cache(mut self, cache: ArchCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Replace the model registry; postprocessed results depend on it.
    pub fn set_registry(&mut self, registry: Registry) {
        self.registry = registry;
        self.views_changed();
    }

    pub fn cache(&self) -> &ArchCache {
        &self.cache
    }

    fn views_changed(&self) {
        self.cache.clear();
    }

    // ── Reading ──

    pub fn view(&self, id: ViewId) -> Result<View, ViewError> {
        self.store.get(id)?.ok_or(ViewError::NotFound(id))
    }

    pub fn views(&self) -> Result<Vec<View>, ViewError> {
        Ok(self.store.list()?)
    }

    pub fn find_by_xml_id(&self, xml_id: &str) -> Result<Option<View>, ViewError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .find(|v| v.xml_id.as_deref() == Some(xml_id)))
    }

    /// The active primary root view of `model` with the lowest `(priority, id)`.
    pub fn default_view(
        &self,
        model: &str,
        view_type: ViewType,
    ) -> Result<Option<View>, ViewError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|v| {
                v.model == model
                    && v.mode == ViewMode::Primary
                    && v.inherit_id.is_none()
                    && v.active
                    && v.view_type == Some(view_type)
            })
            .min_by_key(View::sort_key))
    }

    pub fn combined_arch(&self, id: ViewId) -> Result<Arch, ViewError> {
        let views = self.store.list()?;
        ViewGraph::new(&views).combined_arch(id, &CombineOptions::default())
    }

    /// Combined, postprocessed architecture of view `id` as seen by `user`.
    pub fn get_view(&self, id: ViewId, user: &User) -> Result<RenderedView, ViewError> {
        let views = self.store.list()?;
        let graph = ViewGraph::new(&views);
        let view = graph.get(id).ok_or(ViewError::NotFound(id))?;
        let key = CacheKey::new(id, if self.strict { "strict" } else { "" });
        let processed: Arc<Postprocessed> = self.cache.get_or_try_insert(key, || {
            let arch = graph.combined_arch(id, &CombineOptions::default())?;
            if view.view_type == Some(ViewType::Qweb) {
                return Ok(Postprocessed::bare(arch));
            }
            let opts = PostprocessOptions {
                strict: self.strict,
                context: graph.context(view),
            };
            Postprocessor::new(&self.registry).run(arch, &view.model, &opts)
        })?;

        let mut arch = processed.arch.clone();
        let group_graph = self.registry.group_graph();
        if view.view_type != Some(ViewType::Qweb) {
            apply_user_access(&mut arch, user, &self.registry, &group_graph);
        }
        let fields = processed.visible_fields(&group_graph.user_groups(&user.groups));
        Ok(RenderedView {
            id,
            model: view.model.clone(),
            view_type: view.view_type,
            arch,
            fields,
            warnings: processed.warnings.clone(),
        })
    }

    // ── Validation ──

    /// Validate view `id` within the architecture it contributes to.
    ///
    /// A root view is validated entirely; a view with a parent only for the
    /// nodes it contributes. With `loaded`, only views of those modules take
    /// part besides `id` itself. Returns the non fatal findings.
    pub fn validate(
        &self,
        id: ViewId,
        loaded: Option<&BTreeSet<String>>,
    ) -> Result<Vec<String>, ViewError> {
        let views = self.store.list()?;
        let graph = ViewGraph::new(&views);
        let view = graph.get(id).ok_or(ViewError::NotFound(id))?;
        let validation = match view.inherit_id {
            None => Validation::Full,
            Some(_) => Validation::Partial(BTreeSet::from([id])),
        };
        let opts = CombineOptions {
            loaded_modules: loaded.cloned(),
            force: BTreeSet::from([id]),
            validation,
            inherit_branding: false,
        };
        let arch = graph.combined_arch(id, &opts)?;
        if view.view_type == Some(ViewType::Qweb) {
            return Ok(Vec::new());
        }
        let pp_opts = PostprocessOptions {
            strict: self.strict,
            context: graph.context(view),
        };
        let out = Postprocessor::new(&self.registry).run(arch, &view.model, &pp_opts)?;
        debug!(view = id, warnings = out.warnings.len(), "view validated");
        Ok(out.warnings)
    }

    // ── Writing ──

    /// Create a view and validate it; nothing is stored when validation fails.
    pub fn create(&self, new: NewView) -> Result<View, ViewError> {
        self.create_view(new, true)
    }

    /// Create a view checking only its record constraints. Used while
    /// loading modules, where validation happens once a module is done.
    pub fn create_unchecked(&self, new: NewView) -> Result<View, ViewError> {
        self.create_view(new, false)
    }

    fn create_view(&self, new: NewView, validate: bool) -> Result<View, ViewError> {
        let id = self.store.next_id()?;
        let views = self.store.list()?;
        let explicit_type = new.view_type;
        let view = self.check_record(new.into_view(id), explicit_type, &views)?;
        self.store.put(&view)?;
        self.views_changed();
        if validate {
            if let Err(err) = self.validate(id, None) {
                self.store.delete(id)?;
                self.views_changed();
                return Err(err);
            }
        }
        info!(view = id, name = %view.name, model = %view.model, "view created");
        Ok(view)
    }

    /// Update a view and validate it; the previous record is restored when
    /// validation fails.
    pub fn write(&self, id: ViewId, update: ViewUpdate) -> Result<View, ViewError> {
        self.write_view(id, update, true)
    }

    pub fn write_unchecked(&self, id: ViewId, update: ViewUpdate) -> Result<View, ViewError> {
        self.write_view(id, update, false)
    }

    fn write_view(&self, id: ViewId, update: ViewUpdate, validate: bool) -> Result<View, ViewError> {
        let old = self.view(id)?;
        let mut view = old.clone();
        update.apply(&mut view);
        let views = self.store.list()?;
        // The root decides the type again when the arch or the parent changed.
        let explicit_type = old.view_type.filter(|_| old.inherit_id.is_none());
        let view = self.check_record(view, explicit_type, &views)?;
        self.store.put(&view)?;
        self.views_changed();
        if validate {
            if let Err(err) = self.validate(id, None) {
                self.store.put(&old)?;
                self.views_changed();
                return Err(err);
            }
        }
        info!(view = id, name = %view.name, "view updated");
        Ok(view)
    }

    /// Toggle an optional view on or off.
    pub fn set_active(&self, id: ViewId, active: bool) -> Result<View, ViewError> {
        self.write(id, ViewUpdate::default().active(active))
    }

    /// Delete a view nothing inherits from.
    pub fn unlink(&self, id: ViewId) -> Result<(), ViewError> {
        self.view(id)?;
        if self.store.list()?.iter().any(|v| v.inherit_id == Some(id)) {
            return Err(ViewError::HasChildren(id));
        }
        self.store.delete(id)?;
        self.views_changed();
        info!(view = id, "view deleted");
        Ok(())
    }

    /// Delete a view and every view inheriting from it, directly or not.
    /// Returns the deleted ids, descendants first.
    pub fn unlink_cascade(&self, id: ViewId) -> Result<Vec<ViewId>, ViewError> {
        self.view(id)?;
        let views = self.store.list()?;
        let graph = ViewGraph::new(&views);
        let mut order = vec![id];
        let mut i = 0;
        while i < order.len() {
            order.extend(graph.children(order[i]).iter().map(|v| v.id));
            i += 1;
        }
        order.reverse();
        for view_id in &order {
            self.store.delete(*view_id)?;
        }
        self.views_changed();
        info!(view = id, deleted = order.len(), "view deleted with its descendants");
        Ok(order)
    }

    /// Record level constraints; returns the view with its type resolved.
    fn check_record(
        &self,
        mut view: View,
        explicit_type: Option<ViewType>,
        others: &[View],
    ) -> Result<View, ViewError> {
        let graph = ViewGraph::new(others.iter().filter(|v| v.id != view.id).chain([&view]));
        let ctx = graph.context(&view);

        if view.mode == ViewMode::Extension && view.inherit_id.is_none() {
            return Err(ViewError::invalid(
                "Invalid inheritance mode: if the mode is 'extension', the view must extend an other view",
                ctx,
            ));
        }
        let parent = match view.inherit_id {
            Some(parent_id) => Some(graph.get(parent_id).ok_or(ViewError::NotFound(parent_id))?),
            None => None,
        };
        if graph.has_cycle(view.id) {
            return Err(ViewError::invalid(
                "You cannot create recursive inherited views.",
                ctx,
            ));
        }

        let arch = Arch::parse(&view.arch).map_err(|err| {
            let message = format!("Invalid view architecture: {err}");
            let line = ViewErrorContext::from(err).line;
            ViewError::invalid(message, ViewErrorContext { line, ..ctx.clone() })
        })?;

        let view_type = match parent {
            Some(parent) => {
                check_selectors(&view, &arch).map_err(|err| {
                    let line = Some(err.line());
                    ViewError::invalid(err.to_string(), ViewErrorContext { line, ..ctx.clone() })
                })?;
                parent.view_type
            }
            None => {
                let tag = arch.tag(arch.root());
                match explicit_type {
                    Some(ViewType::Qweb) => Some(ViewType::Qweb),
                    Some(explicit) if !explicit.accepts_root(tag) => {
                        return Err(ViewError::invalid(
                            format!("Invalid view type '{explicit}' for a view whose root is <{tag}>"),
                            ctx,
                        ));
                    }
                    Some(explicit) => Some(explicit),
                    None => Some(ViewType::from_root_tag(tag).ok_or_else(|| {
                        ViewError::invalid(
                            format!("Invalid view architecture: <{tag}> is not a view root"),
                            ctx.clone(),
                        )
                    })?),
                }
            }
        };
        view.view_type = view_type;
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FieldInfo, FieldType, GroupInfo};
    use crate::store::MemoryViewStore;

    fn registry() -> Registry {
        let mut reg = Registry::new();
        reg.add_group(GroupInfo {
            id: "base.group_system".into(),
            name: None,
            implied: vec![],
        });
        reg.add_model(
            "res.partner",
            [
                FieldInfo::new("name", FieldType::Char),
                FieldInfo::new("email", FieldType::Char),
                FieldInfo::new("vat", FieldType::Char).groups("base.group_system"),
            ],
        );
        reg
    }

    fn service() -> ViewService {
        ViewService::new(Box::new(MemoryViewStore::new()), registry())
    }

    fn base(svc: &ViewService) -> View {
        svc.create(NewView::new("partner.form", "res.partner", r#"<form><field name="name"/></form>"#))
            .unwrap()
    }

    #[test]
    fn types_and_modes_are_derived() {
        let svc = service();
        let form = base(&svc);
        assert_eq!(form.view_type, Some(ViewType::Form));
        assert_eq!(form.mode, ViewMode::Primary);

        let ext = svc
            .create(
                NewView::new("ext", "res.partner", r#"<field name="name" position="after"><field name="email"/></field>"#)
                    .inherit(form.id),
            )
            .unwrap();
        assert_eq!(ext.mode, ViewMode::Extension);
        assert_eq!(ext.view_type, Some(ViewType::Form));

        let err = svc
            .create(NewView::new("bad", "res.partner", "<form/>").view_type(ViewType::List))
            .unwrap_err();
        assert!(err.message().starts_with("Invalid view type 'list'"));

        let err = svc
            .create(NewView::new("orphan", "res.partner", "<data/>").mode(ViewMode::Extension))
            .unwrap_err();
        assert!(err.message().starts_with("Invalid inheritance mode"));
    }

    #[test]
    fn failed_validation_stores_nothing() {
        let svc = service();
        let form = base(&svc);
        let err = svc
            .create(
                NewView::new("ext", "res.partner", r#"<field name="ghost" position="after"/>"#)
                    .inherit(form.id),
            )
            .unwrap_err();
        assert!(err.message().contains("cannot be located"));
        assert_eq!(svc.views().unwrap().len(), 1);

        let err = svc
            .create(NewView::new("broken", "res.partner", "<form><field name=\"x\"/></form>"))
            .unwrap_err();
        assert!(err.message().contains("does not exist"));
        assert_eq!(svc.views().unwrap().len(), 1);
    }

    #[test]
    fn replacing_extensions_validate_the_whole_view() {
        let svc = service();
        let form = svc
            .create(NewView::new(
                "partner.form",
                "res.partner",
                r#"<form><notebook><page name="p"/></notebook><group name="g"/></form>"#,
            ))
            .unwrap();
        let err = svc
            .create(
                NewView::new(
                    "ext",
                    "res.partner",
                    r#"<group name="g" position="replace"><page name="p" position="move"/></group>"#,
                )
                .inherit(form.id),
            )
            .unwrap_err();
        assert_eq!(err.message(), "Page direct ancestor must be notebook");
        assert_eq!(svc.views().unwrap().len(), 1);
    }

    #[test]
    fn writes_roll_back() {
        let svc = service();
        let form = base(&svc);
        let err = svc
            .write(form.id, ViewUpdate::default().arch("<form><page/></form>"))
            .unwrap_err();
        assert_eq!(err.message(), "Page direct ancestor must be notebook");
        assert_eq!(svc.view(form.id).unwrap().arch, form.arch);

        let err = svc
            .write(form.id, ViewUpdate::default().inherit(Some(form.id)))
            .unwrap_err();
        assert!(err.message().contains("recursive"));
    }

    #[test]
    fn translated_selectors_are_refused() {
        let svc = service();
        let form = base(&svc);
        let err = svc
            .create(
                NewView::new("ext", "res.partner", r#"<xpath expr="//field[@string='Name']" position="after"/>"#)
                    .inherit(form.id),
            )
            .unwrap_err();
        assert!(err.message().contains("'string' as a selector"));
    }

    #[test]
    fn unlink_requires_no_children() {
        let svc = service();
        let form = base(&svc);
        let ext = svc
            .create(NewView::new("ext", "res.partner", "<data/>").inherit(form.id))
            .unwrap();
        assert!(matches!(svc.unlink(form.id), Err(ViewError::HasChildren(_))));
        assert_eq!(svc.unlink_cascade(form.id).unwrap(), vec![ext.id, form.id]);
        assert!(svc.views().unwrap().is_empty());
    }

    #[test]
    fn optional_views_toggle() {
        let svc = service();
        let form = base(&svc);
        let ext = svc
            .create(
                NewView::new("ext", "res.partner", r#"<field name="name" position="after"><field name="email"/></field>"#)
                    .inherit(form.id),
            )
            .unwrap();
        let with = svc.combined_arch(form.id).unwrap().to_xml();
        assert!(with.contains("email"));

        svc.set_active(ext.id, false).unwrap();
        assert!(!svc.combined_arch(form.id).unwrap().to_xml().contains("email"));
    }

    #[test]
    fn default_view_prefers_lowest_priority() {
        let svc = service();
        base(&svc);
        let preferred = svc
            .create(NewView::new("p2", "res.partner", r#"<form><field name="email"/></form>"#).priority(5))
            .unwrap();
        svc.create(NewView::new("list", "res.partner", r#"<list><field name="name"/></list>"#))
            .unwrap();
        let found = svc.default_view("res.partner", ViewType::Form).unwrap().unwrap();
        assert_eq!(found.id, preferred.id);
        assert!(svc.default_view("res.partner", ViewType::Kanban).unwrap().is_none());
    }

    #[test]
    fn rendering_is_cached_and_per_user() {
        let svc = service();
        let form = svc
            .create(NewView::new(
                "f",
                "res.partner",
                r#"<form><field name="name"/><field name="vat"/></form>"#,
            ))
            .unwrap();
        let admin = User::new("admin", ["base.group_system"]);
        let demo = User::new("demo", Vec::<String>::new());

        let out = svc.get_view(form.id, &admin).unwrap();
        assert!(out.arch.to_xml().contains("vat"));
        assert!(out.fields["res.partner"].contains("vat"));
        assert_eq!(svc.cache().len(), 1);

        let out = svc.get_view(form.id, &demo).unwrap();
        assert!(!out.arch.to_xml().contains("vat"));
        assert!(out.fields["res.partner"].contains("name"));
        assert!(!out.fields["res.partner"].contains("vat"));
        assert_eq!(svc.cache().len(), 1);

        svc.create(NewView::new("ext", "res.partner", "<data/>").inherit(form.id))
            .unwrap();
        assert!(svc.cache().is_empty());
    }
}

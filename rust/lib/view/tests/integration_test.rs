//! End-to-end: modules on disk → redb store → combined and rendered views.

use std::fs;
use std::path::Path;

use openerp_view::*;

const BASE_MANIFEST: &str = r#"
name = "Base"
data = ["views/partner.xml"]

[[groups]]
id = "base.group_user"

[[groups]]
id = "base.group_system"
implied = ["base.group_user"]

[[models]]
name = "res.partner"

[[models.fields]]
name = "name"
type = "char"

[[models.fields]]
name = "vat"
type = "char"
groups = "base.group_system"

[[access]]
model = "res.partner"
group = "base.group_user"
perm_read = true
perm_write = true
"#;

const BASE_VIEWS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<odoo>
    <record id="view_partner_form" model="ir.ui.view">
        <field name="name">res.partner.form</field>
        <field name="model">res.partner</field>
        <field name="arch" type="xml">
            <form string="Partner">
                <sheet>
                    <field name="name"/>
                    <field name="vat" groups="base.group_system"/>
                </sheet>
            </form>
        </field>
    </record>
</odoo>
"#;

const SALE_MANIFEST: &str = r#"
name = "Sales"
depends = ["base"]
data = ["views/partner.xml"]

[[models]]
name = "res.partner"

[[models.fields]]
name = "sale_count"
type = "integer"
"#;

const SALE_VIEWS: &str = r#"<odoo>
    <record id="view_partner_form_sale" model="ir.ui.view">
        <field name="name">res.partner.form.sale</field>
        <field name="model">res.partner</field>
        <field name="inherit_id" ref="base.view_partner_form"/>
        <field name="arch" type="xml">
            <field name="name" position="after">
                <field name="sale_count" invisible="not name"/>
            </field>
        </field>
    </record>
</odoo>
"#;

fn write_module(root: &Path, name: &str, manifest: &str, views: &str) {
    let dir = root.join(name);
    fs::create_dir_all(dir.join("views")).unwrap();
    fs::write(dir.join("__manifest__.toml"), manifest).unwrap();
    fs::write(dir.join("views/partner.xml"), views).unwrap();
}

fn open(config: &EngineConfig) -> ViewService {
    ViewService::open(config, Registry::new()).unwrap()
}

#[test]
fn modules_load_and_render_per_user() {
    let dir = tempfile::tempdir().unwrap();
    let modules = dir.path().join("addons");
    write_module(&modules, "base", BASE_MANIFEST, BASE_VIEWS);
    write_module(&modules, "sale", SALE_MANIFEST, SALE_VIEWS);
    let config = EngineConfig {
        data_dir: Some(modules.clone()),
        db_path: Some(dir.path().join("views.redb")),
        ..Default::default()
    };

    let mut service = open(&config);
    let report = load_modules(&modules, &mut service).unwrap();
    assert_eq!(report.modules, vec!["base", "sale"]);
    assert_eq!(report.created, 2);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    let form = service
        .find_by_xml_id("base.view_partner_form")
        .unwrap()
        .unwrap();
    assert_eq!(form.view_type, Some(ViewType::Form));
    assert_eq!(form.module.as_deref(), Some("base"));

    let user = User::new("demo", ["base.group_user"]);
    let rendered = service.get_view(form.id, &user).unwrap();
    assert_eq!(
        rendered.arch.to_xml(),
        r#"<form string="Partner" create="False" delete="False"><sheet><field name="name"/><field name="sale_count" invisible="not name"/></sheet></form>"#
    );
    assert!(rendered.fields["res.partner"].contains("sale_count"));
    assert!(!rendered.fields["res.partner"].contains("vat"));

    let admin = User::new("admin", ["base.group_system"]);
    let rendered = service.get_view(form.id, &admin).unwrap();
    assert!(rendered.arch.to_xml().contains(r#"<field name="vat"/>"#));
    assert!(rendered.fields["res.partner"].contains("vat"));

    let default = service.default_view("res.partner", ViewType::Form).unwrap();
    assert_eq!(default.map(|v| v.id), Some(form.id));
}

#[test]
fn reloading_updates_and_defers_validation() {
    let dir = tempfile::tempdir().unwrap();
    let modules = dir.path().join("addons");
    write_module(&modules, "base", BASE_MANIFEST, BASE_VIEWS);
    write_module(&modules, "sale", SALE_MANIFEST, SALE_VIEWS);
    let config = EngineConfig {
        db_path: Some(dir.path().join("views.redb")),
        ..Default::default()
    };

    {
        let mut service = open(&config);
        load_modules(&modules, &mut service).unwrap();
    }

    // The store already holds the sale extension, whose field is unknown
    // while base loads: base must be validated without it.
    let mut service = open(&config);
    let report = load_modules(&modules, &mut service).unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 2);
    assert_eq!(service.views().unwrap().len(), 2);
}

#[test]
fn broken_views_name_their_module() {
    let dir = tempfile::tempdir().unwrap();
    let modules = dir.path();
    write_module(modules, "base", BASE_MANIFEST, BASE_VIEWS);
    write_module(
        modules,
        "sale",
        SALE_MANIFEST,
        &SALE_VIEWS.replace(r#"<field name="name" position="after">"#, r#"<field name="ghost" position="after">"#),
    );
    let mut service = ViewService::new(Box::new(MemoryViewStore::new()), Registry::new());
    let err = load_modules(modules, &mut service).unwrap_err();
    match err {
        LoadError::View { module, source } => {
            assert_eq!(module, "sale");
            assert!(source.message().contains("cannot be located"));
            assert_eq!(
                source.context().and_then(|c| c.xml_id.clone()).as_deref(),
                Some("sale.view_partner_form_sale")
            );
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn unresolved_parent_reference() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "sale", &SALE_MANIFEST.replace("depends = [\"base\"]", ""), SALE_VIEWS);
    let mut service = ViewService::new(Box::new(MemoryViewStore::new()), Registry::new());
    assert!(matches!(
        load_modules(dir.path(), &mut service),
        Err(LoadError::UnresolvedRef { .. })
    ));
}

fn service_with(fields: &[&str]) -> ViewService {
    let mut registry = Registry::new();
    registry.add_model(
        "m",
        fields.iter().map(|f| FieldInfo::new(*f, FieldType::Char)),
    );
    ViewService::new(Box::new(MemoryViewStore::new()), registry)
}

#[test]
fn replace_end_to_end() {
    let service = service_with(&["target", "replacement"]);
    let base = service
        .create(NewView::new("base", "m", r#"<form string="Title"><field name="target"/></form>"#))
        .unwrap();
    service
        .create(
            NewView::new(
                "ext",
                "m",
                r#"<field name="target" position="replace"><field name="replacement"/></field>"#,
            )
            .inherit(base.id),
        )
        .unwrap();
    let combined = service.combined_arch(base.id).unwrap().to_xml();
    assert_eq!(combined, r#"<form string="Title"><field name="replacement"/></form>"#);
    // No write in between: same bytes.
    assert_eq!(service.combined_arch(base.id).unwrap().to_xml(), combined);
}

#[test]
fn primary_children_see_extended_parents() {
    let service = service_with(&["a", "b", "c"]);
    let base = service
        .create(NewView::new("base", "m", r#"<form><field name="a"/></form>"#))
        .unwrap();
    let primary = service
        .create(
            NewView::new("copy", "m", r#"<field name="b" position="after"><field name="c"/></field>"#)
                .inherit(base.id)
                .mode(ViewMode::Primary)
                .priority(1),
        )
        .unwrap_err();
    // `b` only exists once the extension below is installed.
    assert!(primary.message().contains("cannot be located"));

    service
        .create(
            NewView::new("ext", "m", r#"<field name="a" position="after"><field name="b"/></field>"#)
                .inherit(base.id),
        )
        .unwrap();
    let primary = service
        .create(
            NewView::new("copy", "m", r#"<field name="b" position="after"><field name="c"/></field>"#)
                .inherit(base.id)
                .mode(ViewMode::Primary)
                .priority(1),
        )
        .unwrap();
    assert_eq!(
        service.combined_arch(primary.id).unwrap().to_xml(),
        r#"<form><field name="a"/><field name="b"/><field name="c"/></form>"#
    );
    assert_eq!(
        service.combined_arch(base.id).unwrap().to_xml(),
        r#"<form><field name="a"/><field name="b"/></form>"#
    );
}

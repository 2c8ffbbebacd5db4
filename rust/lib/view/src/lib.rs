//! OpenERP view engine.
//!
//! Views are XML architectures stored as records. A view either stands on
//! its own (primary) or inherits from another one, rewriting its parent's
//! tree through inheritance specs:
//!
//! ```xml
//! <xpath expr="//field[@name='name']" position="after">
//!     <field name="email"/>
//! </xpath>
//! ```
//!
//! Reading a view walks to the top of its `inherit_id` chain, folds every
//! inheriting view into one combined architecture ([`combine`]), then
//! postprocesses it against the model registry ([`postprocess`]) and
//! finally prunes it for one user ([`access`]). [`ViewService`] ties these
//! together over a [`ViewStore`]; [`module`] loads views from module
//! directories.

pub mod access;
pub mod cache;
pub mod combine;
pub mod config;
pub mod error;
pub mod expr;
pub mod groups;
pub mod inherit;
pub mod locate;
pub mod module;
pub mod postprocess;
pub mod record;
pub mod registry;
pub mod service;
pub mod store;

pub use cache::{ArchCache, CacheKey};
pub use combine::{CombineOptions, Validation, ViewGraph};
pub use config::EngineConfig;
pub use error::{ConfigError, InheritError, LoadError, StoreError, ViewError, ViewErrorContext};
pub use groups::{GroupGraph, GroupsExpr};
pub use inherit::{apply_inheritance_specs, apply_inheritance_specs_with, ApplyOptions};
pub use locate::locate_node;
pub use module::{load_modules, LoadReport};
pub use postprocess::{PostprocessOptions, Postprocessed, Postprocessor};
pub use record::{NewView, View, ViewId, ViewMode, ViewType, DEFAULT_PRIORITY};
pub use registry::{AccessRule, FieldInfo, FieldType, GroupInfo, Operation, Registry, User};
pub use service::{RenderedView, ViewService, ViewUpdate};
pub use store::{MemoryViewStore, RedbViewStore, ViewStore};

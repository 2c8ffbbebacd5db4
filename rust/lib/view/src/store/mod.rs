//! Persistence of view records.

mod memory;
mod redb;

pub use self::memory::MemoryViewStore;
pub use self::redb::RedbViewStore;

use crate::error::StoreError;
use crate::record::{View, ViewId};

/// Storage of view records keyed by id.
///
/// Stores only hold records; every constraint is checked by the
/// [`ViewService`](crate::service::ViewService) before writing.
pub trait ViewStore: Send + Sync {
    fn get(&self, id: ViewId) -> Result<Option<View>, StoreError>;

    /// Insert or replace the record with `view.id`.
    fn put(&self, view: &View) -> Result<(), StoreError>;

    /// Delete a record. Deleting a missing id is not an error.
    fn delete(&self, id: ViewId) -> Result<(), StoreError>;

    /// All records, ordered by id.
    fn list(&self) -> Result<Vec<View>, StoreError>;

    /// An id no stored record uses, greater than every stored id.
    fn next_id(&self) -> Result<ViewId, StoreError>;
}

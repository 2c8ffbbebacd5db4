use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::record::{View, ViewId};

use super::ViewStore;

const TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("views");

fn storage(e: impl ToString) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// RedbViewStore keeps view records as JSON in a redb database.
pub struct RedbViewStore {
    db: Arc<Database>,
}

impl RedbViewStore {
    /// Open or create a redb database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(storage)?;

        // Create the table up front so readers never miss it.
        let write_txn = db.begin_write().map_err(storage)?;
        {
            let _table = write_txn.open_table(TABLE).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;

        Ok(Self { db: Arc::new(db) })
    }
}

fn decode(bytes: &[u8]) -> Result<View, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl ViewStore for RedbViewStore {
    fn get(&self, id: ViewId) -> Result<Option<View>, StoreError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(TABLE).map_err(storage)?;
        match table.get(id).map_err(storage)? {
            Some(value) => decode(value.value()).map(Some),
            None => Ok(None),
        }
    }

    fn put(&self, view: &View) -> Result<(), StoreError> {
        let json =
            serde_json::to_vec(view).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let mut table = write_txn.open_table(TABLE).map_err(storage)?;
            table.insert(view.id, json.as_slice()).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;
        Ok(())
    }

    fn delete(&self, id: ViewId) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(storage)?;
        {
            let mut table = write_txn.open_table(TABLE).map_err(storage)?;
            table.remove(id).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<View>, StoreError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(TABLE).map_err(storage)?;
        let mut views = Vec::new();
        for entry in table.iter().map_err(storage)? {
            let (_, value) = entry.map_err(storage)?;
            views.push(decode(value.value())?);
        }
        Ok(views)
    }

    fn next_id(&self) -> Result<ViewId, StoreError> {
        let read_txn = self.db.begin_read().map_err(storage)?;
        let table = read_txn.open_table(TABLE).map_err(storage)?;
        let last = table.last().map_err(storage)?;
        Ok(last.map_or(1, |(key, _)| key.value() + 1))
    }
}

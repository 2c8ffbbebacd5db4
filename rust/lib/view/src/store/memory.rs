use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::error::StoreError;
use crate::record::{View, ViewId};

use super::ViewStore;

/// ViewStore kept in memory, for tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct MemoryViewStore {
    views: RwLock<BTreeMap<ViewId, View>>,
}

impl MemoryViewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewStore for MemoryViewStore {
    fn get(&self, id: ViewId) -> Result<Option<View>, StoreError> {
        let views = self.views.read().unwrap_or_else(PoisonError::into_inner);
        Ok(views.get(&id).cloned())
    }

    fn put(&self, view: &View) -> Result<(), StoreError> {
        let mut views = self.views.write().unwrap_or_else(PoisonError::into_inner);
        views.insert(view.id, view.clone());
        Ok(())
    }

    fn delete(&self, id: ViewId) -> Result<(), StoreError> {
        let mut views = self.views.write().unwrap_or_else(PoisonError::into_inner);
        views.remove(&id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<View>, StoreError> {
        let views = self.views.read().unwrap_or_else(PoisonError::into_inner);
        Ok(views.values().cloned().collect())
    }

    fn next_id(&self) -> Result<ViewId, StoreError> {
        let views = self.views.read().unwrap_or_else(PoisonError::into_inner);
        Ok(views.keys().next_back().map_or(1, |id| id + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewView;

    #[test]
    fn ids_grow_past_the_largest() {
        let store = MemoryViewStore::new();
        assert_eq!(store.next_id().unwrap(), 1);
        store.put(&NewView::new("a", "m", "<form/>").into_view(7)).unwrap();
        assert_eq!(store.next_id().unwrap(), 8);
        store.delete(7).unwrap();
        store.delete(7).unwrap();
        assert!(store.get(7).unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }
}

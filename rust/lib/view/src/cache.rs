use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::postprocess::Postprocessed;
use crate::record::ViewId;

/// What a cached architecture depends on besides the view records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub view_id: ViewId,
    /// Rendering options the result was computed with.
    pub context: String,
}

impl CacheKey {
    pub fn new(view_id: ViewId, context: impl Into<String>) -> Self {
        Self {
            view_id,
            context: context.into(),
        }
    }
}

/// In-memory cache of user independent postprocessed architectures.
///
/// Any change to any view may change the combination of others, so the
/// cache is only ever cleared as a whole.
#[derive(Debug)]
pub struct ArchCache {
    enabled: bool,
    entries: RwLock<HashMap<CacheKey, Arc<Postprocessed>>>,
}

impl Default for ArchCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchCache {
    pub fn new() -> Self {
        Self {
            enabled: true,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Postprocessed>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    /// Store `value` and hand it back shared.
    pub fn insert(&self, key: CacheKey, value: Postprocessed) -> Arc<Postprocessed> {
        let value = Arc::new(value);
        if self.enabled {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.insert(key, Arc::clone(&value));
        }
        value
    }

    /// Cached value for `key`, computing and storing it on a miss.
    pub fn get_or_try_insert<E>(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<Postprocessed, E>,
    ) -> Result<Arc<Postprocessed>, E> {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        debug!(view = key.view_id, context = %key.context, "arch cache miss");
        Ok(self.insert(key, compute()?))
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.is_empty() {
            debug!(entries = entries.len(), "arch cache cleared");
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openerp_arch::Arch;

    fn value(xml: &str) -> Postprocessed {
        Postprocessed::bare(Arch::parse(xml).unwrap())
    }

    #[test]
    fn computes_once_until_cleared() {
        let cache = ArchCache::new();
        let key = CacheKey::new(1, "");
        let mut calls = 0;
        for _ in 0..2 {
            let out = cache
                .get_or_try_insert::<()>(key.clone(), || {
                    calls += 1;
                    Ok(value("<form/>"))
                })
                .unwrap();
            assert_eq!(out.arch.to_xml(), "<form/>");
        }
        assert_eq!(calls, 1);
        assert!(cache.get(&CacheKey::new(1, "strict")).is_none());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let cache = ArchCache::disabled();
        cache.insert(CacheKey::new(1, ""), value("<form/>"));
        assert!(cache.is_empty());
    }
}

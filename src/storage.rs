use crate::error::StorageError;
use crate::query::TagFilter;
use crate::series::Series;
use crate::types::{Item, Timestamp, GAUGE};
use rayon::prelude::*;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// Type alias for one series, shared between the registry and in-flight requests.
pub(crate) type SharedSeries = Arc<RwLock<Series>>;

/// Series of one tenant, keyed by metric id.
type TenantSeries = HashMap<String, SharedSeries>;

/// Tenant registry: tenant name -> metric id -> series.
///
/// Lock order is always registry first, then series. Request paths only hold the registry lock
/// long enough to clone a series handle; the sweeper holds the registry write lock while it
/// retires a series so no new handle to it can be handed out concurrently.
#[derive(Debug)]
pub struct TenantRegistry {
    tenants: RwLock<HashMap<String, TenantSeries>>,
    capacity: usize,
}

impl TenantRegistry {
    /// Creates an empty registry whose series all hold `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Returns the series for `(tenant, id)`, creating the tenant and series if absent.
    /// The flag is true when the series was created by this call.
    pub fn get_or_create(&self, tenant: &str, id: &str) -> Result<(SharedSeries, bool), StorageError> {
        {
            let guard = self.tenants.read()?;
            if let Some(series) = guard.get(tenant).and_then(|t| t.get(id)) {
                return Ok((Arc::clone(series), false));
            }
        }

        let mut guard = self.tenants.write()?;
        let tenant_series = guard.entry(tenant.to_string()).or_default();
        match tenant_series.entry(id.to_string()) {
            Entry::Occupied(e) => Ok((Arc::clone(e.get()), false)),
            Entry::Vacant(e) => {
                let series = Arc::new(RwLock::new(Series::new(self.capacity)));
                e.insert(Arc::clone(&series));
                Ok((series, true))
            }
        }
    }

    /// Retrieves a handle to an existing series.
    pub fn get(&self, tenant: &str, id: &str) -> Result<Option<SharedSeries>, StorageError> {
        let guard = self.tenants.read()?;
        Ok(guard.get(tenant).and_then(|t| t.get(id)).cloned())
    }

    /// All tenant names, sorted.
    pub fn tenant_ids(&self) -> Result<Vec<String>, StorageError> {
        let guard = self.tenants.read()?;
        let mut ids: Vec<String> = guard.keys().cloned().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Number of series across all tenants.
    pub fn series_count(&self) -> Result<usize, StorageError> {
        let guard = self.tenants.read()?;
        Ok(guard.values().map(HashMap::len).sum())
    }

    /// Lists the series of `tenant` whose tags pass `filter`, sorted by id.
    ///
    /// The registry read lock is held for the whole listing, so no series is created or removed
    /// while it runs; each series is read under its own read lock.
    pub fn list_items(&self, tenant: &str, filter: &TagFilter) -> Result<Vec<Item>, StorageError> {
        let guard = self.tenants.read()?;
        let tenant_series = match guard.get(tenant) {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };

        let listed: Vec<Option<Item>> = tenant_series
            .par_iter()
            .map(|(id, series)| -> Result<Option<Item>, StorageError> {
                let series_guard = series.read()?;
                if !filter.matches(series_guard.tags()) {
                    return Ok(None);
                }
                Ok(Some(Item {
                    id: id.clone(),
                    kind: GAUGE.to_string(),
                    tags: series_guard.tags().clone(),
                    last_values: series_guard.last_value().into_iter().collect(),
                }))
            })
            .collect::<Result<_, _>>()?;

        let mut items: Vec<Item> = listed.into_iter().flatten().collect();
        items.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    /// Keys of every series whose newest point is older than `cutoff`.
    pub fn expired_candidates(&self, cutoff: Timestamp) -> Result<Vec<(String, String)>, StorageError> {
        let guard = self.tenants.read()?;
        let mut out = Vec::new();
        for (tenant, tenant_series) in guard.iter() {
            for (id, series) in tenant_series {
                if series.read()?.is_expired(cutoff) {
                    out.push((tenant.clone(), id.clone()));
                }
            }
        }
        Ok(out)
    }

    /// Removes one series if it is still expired. Returns whether it was removed.
    ///
    /// Expiry is re-checked under the registry write lock; a removed series is retired so that
    /// writers still holding its handle re-resolve it.
    pub fn remove_if_expired(&self, tenant: &str, id: &str, cutoff: Timestamp) -> Result<bool, StorageError> {
        let mut guard = self.tenants.write()?;
        let tenant_series = match guard.get_mut(tenant) {
            Some(t) => t,
            None => return Ok(false),
        };
        let series = match tenant_series.get(id) {
            Some(s) => Arc::clone(s),
            None => return Ok(false),
        };

        let mut series_guard = series.write()?;
        if !series_guard.is_expired(cutoff) {
            return Ok(false);
        }
        series_guard.retire();
        drop(series_guard);

        tenant_series.remove(id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SlotIndex;
    use crate::types::{DataPoint, TagSet};
    use std::thread;
    use std::time::Duration;

    fn create_tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn index() -> SlotIndex {
        SlotIndex::new(Duration::from_secs(30), Duration::from_secs(300)).unwrap()
    }

    #[test]
    fn test_get_or_create_is_lazy_and_idempotent() {
        let registry = TenantRegistry::new(index().capacity());
        assert!(registry.get("t", "cpu").unwrap().is_none());

        let (first, created) = registry.get_or_create("t", "cpu").unwrap();
        assert!(created);
        assert_eq!(first.read().unwrap().capacity(), 10);

        let (second, created) = registry.get_or_create("t", "cpu").unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.series_count().unwrap(), 1);
    }

    #[test]
    fn test_tenant_ids_sorted() {
        let registry = TenantRegistry::new(4);
        for tenant in ["zeta", "alpha", "_ops"] {
            registry.get_or_create(tenant, "m").unwrap();
        }
        assert_eq!(registry.tenant_ids().unwrap(), vec!["_ops", "alpha", "zeta"]);
    }

    #[test]
    fn test_list_items_filters_and_reports_last_value() {
        let idx = index();
        let registry = TenantRegistry::new(idx.capacity());

        let (cpu, _) = registry.get_or_create("t", "cpu").unwrap();
        {
            let mut g = cpu.write().unwrap();
            g.merge_tags(&create_tags(&[("host", "a"), ("units", "pct")]));
            g.write(&idx, DataPoint::new(1_000, 0.5));
            g.write(&idx, DataPoint::new(31_000, 0.7));
        }
        let (mem, _) = registry.get_or_create("t", "mem").unwrap();
        mem.write().unwrap().merge_tags(&create_tags(&[("host", "b")]));

        let all = registry.list_items("t", &TagFilter::new(&TagSet::new())).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "cpu");
        assert_eq!(all[0].kind, GAUGE);
        assert_eq!(all[0].last_values, vec![DataPoint::new(31_000, 0.7)]);
        assert_eq!(all[1].id, "mem");
        assert!(all[1].last_values.is_empty());

        let host_a = registry
            .list_items("t", &TagFilter::new(&create_tags(&[("host", "a")])))
            .unwrap();
        assert_eq!(host_a.len(), 1);
        assert_eq!(host_a[0].id, "cpu");

        assert!(registry
            .list_items("missing", &TagFilter::new(&TagSet::new()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_remove_if_expired_rechecks_and_retires() {
        let idx = index();
        let registry = TenantRegistry::new(idx.capacity());

        let (old, _) = registry.get_or_create("t", "old").unwrap();
        old.write().unwrap().write(&idx, DataPoint::new(1_000, 1.0));
        let (fresh, _) = registry.get_or_create("t", "fresh").unwrap();
        fresh.write().unwrap().write(&idx, DataPoint::new(900_000, 1.0));

        let candidates = registry.expired_candidates(500_000).unwrap();
        assert_eq!(candidates, vec![("t".to_string(), "old".to_string())]);

        // A fresh point arriving after selection keeps the series alive.
        old.write().unwrap().write(&idx, DataPoint::new(600_000, 2.0));
        assert!(!registry.remove_if_expired("t", "old", 500_000).unwrap());

        assert!(registry.remove_if_expired("t", "old", 700_000).unwrap());
        assert!(old.read().unwrap().is_retired());
        assert!(registry.get("t", "old").unwrap().is_none());
        assert!(!registry.remove_if_expired("t", "old", 700_000).unwrap());

        // The tenant itself is kept.
        assert_eq!(registry.tenant_ids().unwrap(), vec!["t"]);
    }

    #[test]
    fn test_concurrent_get_or_create_single_winner() {
        let registry = Arc::new(TenantRegistry::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create("t", "shared").unwrap().1)
            })
            .collect();

        let created: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(created, 1);
        assert_eq!(registry.series_count().unwrap(), 1);
    }
}

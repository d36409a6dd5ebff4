//! External boundaries: the read-only price store and a keyed repository.
//!
//! The engine never owns storage. Callers hand in a `PriceStore`; components
//! that need keyed scratch state (open trades) take a `Repository`.

use anyhow::Result;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::data::{history_fingerprint, load_csv, PriceBar};
use crate::logging::{self, obj, v_str, Domain, Level};
use serde_json::json;

pub trait PriceStore: Send + Sync {
    /// Ascending bars with `from <= ts <= to`.
    fn candles(&self, symbol: &str, from: u64, to: u64, timeframe: &str) -> Result<Vec<PriceBar>>;
}

/// Holds full histories keyed by (symbol, timeframe).
#[derive(Debug, Default, Clone)]
pub struct InMemoryPriceStore {
    series: HashMap<(String, String), Arc<[PriceBar]>>,
}

impl InMemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, timeframe: &str, mut bars: Vec<PriceBar>) {
        bars.sort_by_key(|b| b.ts);
        self.series
            .insert((symbol.to_string(), timeframe.to_string()), bars.into());
    }
}

impl PriceStore for InMemoryPriceStore {
    fn candles(&self, symbol: &str, from: u64, to: u64, timeframe: &str) -> Result<Vec<PriceBar>> {
        let key = (symbol.to_string(), timeframe.to_string());
        let Some(bars) = self.series.get(&key) else {
            return Ok(Vec::new());
        };
        let start = bars.partition_point(|b| b.ts < from);
        let end = bars.partition_point(|b| b.ts <= to).max(start);
        Ok(bars[start..end].to_vec())
    }
}

/// Load one CSV per path; the symbol is the file stem.
pub fn load_csv_store(paths: &[PathBuf], timeframe: &str) -> Result<(Vec<String>, InMemoryPriceStore)> {
    let mut store = InMemoryPriceStore::new();
    let mut symbols = Vec::with_capacity(paths.len());
    for path in paths {
        let symbol = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow::anyhow!("cannot derive symbol from {}", path.display()))?
            .to_string();
        let bars = load_csv(path, &symbol, timeframe)?;
        if bars.is_empty() {
            anyhow::bail!("{}: no parseable rows", path.display());
        }
        logging::log(
            Level::Info,
            Domain::System,
            "history_loaded",
            obj(&[
                ("symbol", v_str(&symbol)),
                ("bars", json!(bars.len())),
                ("fingerprint", v_str(&history_fingerprint(&bars))),
            ]),
        );
        store.insert(&symbol, timeframe, bars);
        symbols.push(symbol);
    }
    Ok((symbols, store))
}

type CacheKey = (String, u64, u64, String);

/// Memoizes requests against an inner store. Historical bars are immutable,
/// so entries never expire within the lifetime of the cache.
pub struct CachedPriceStore<S> {
    inner: S,
    cache: Mutex<HashMap<CacheKey, Arc<[PriceBar]>>>,
}

impl<S: PriceStore> CachedPriceStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A panic while the lock was held leaves the map intact, so a poisoned
    /// lock is recovered rather than bypassed.
    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<[PriceBar]>>> {
        self.cache.lock().unwrap_or_else(|poisoned| {
            logging::log(
                Level::Warn,
                Domain::System,
                "cache_lock_recovered",
                obj(&[("entries", json!(poisoned.get_ref().len()))]),
            );
            self.cache.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Shared read-only handle, loaded at most once per distinct request.
    pub fn shared(&self, symbol: &str, from: u64, to: u64, timeframe: &str) -> Result<Arc<[PriceBar]>> {
        let key = (symbol.to_string(), from, to, timeframe.to_string());
        if let Some(hit) = self.entries().get(&key) {
            return Ok(Arc::clone(hit));
        }
        let bars: Arc<[PriceBar]> = self.inner.candles(symbol, from, to, timeframe)?.into();
        self.entries().insert(key, Arc::clone(&bars));
        Ok(bars)
    }

    pub fn cached_entries(&self) -> usize {
        self.entries().len()
    }
}

impl<S: PriceStore> PriceStore for CachedPriceStore<S> {
    fn candles(&self, symbol: &str, from: u64, to: u64, timeframe: &str) -> Result<Vec<PriceBar>> {
        Ok(self.shared(symbol, from, to, timeframe)?.to_vec())
    }
}

/// Keyed get/put/delete capability.
pub trait Repository<K, V> {
    fn get(&self, key: &K) -> Option<V>;
    fn put(&mut self, key: K, value: V);
    fn delete(&mut self, key: &K) -> Option<V>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryRepository<K, V> {
    items: HashMap<K, V>,
}

impl<K, V> Default for InMemoryRepository<K, V> {
    fn default() -> Self {
        Self { items: HashMap::new() }
    }
}

impl<K, V> InMemoryRepository<K, V> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Eq + Hash, V: Clone> Repository<K, V> for InMemoryRepository<K, V> {
    fn get(&self, key: &K) -> Option<V> {
        self.items.get(key).cloned()
    }

    fn put(&mut self, key: K, value: V) {
        self.items.insert(key, value);
    }

    fn delete(&mut self, key: &K) -> Option<V> {
        self.items.remove(key)
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bars() -> Vec<PriceBar> {
        (0..10).map(|i| PriceBar::flat("SPX", i * 100, 100.0 + i as f64)).collect()
    }

    #[test]
    fn test_in_memory_store_range_is_inclusive() {
        let mut store = InMemoryPriceStore::new();
        store.insert("SPX", "1d", bars());
        let out = store.candles("SPX", 200, 500, "1d").unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].ts, 200);
        assert_eq!(out[3].ts, 500);
        assert!(store.candles("NDX", 0, 1000, "1d").unwrap().is_empty());
    }

    struct CountingStore {
        inner: InMemoryPriceStore,
        calls: AtomicUsize,
    }

    impl PriceStore for CountingStore {
        fn candles(&self, symbol: &str, from: u64, to: u64, timeframe: &str) -> Result<Vec<PriceBar>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.candles(symbol, from, to, timeframe)
        }
    }

    #[test]
    fn test_cached_store_hits_inner_once() {
        let mut inner = InMemoryPriceStore::new();
        inner.insert("SPX", "1d", bars());
        let cached = CachedPriceStore::new(CountingStore { inner, calls: AtomicUsize::new(0) });
        let a = cached.candles("SPX", 0, 900, "1d").unwrap();
        let b = cached.candles("SPX", 0, 900, "1d").unwrap();
        assert_eq!(a, b);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.cached_entries(), 1);
    }

    #[test]
    fn test_cached_store_survives_poisoned_lock() {
        let mut inner = InMemoryPriceStore::new();
        inner.insert("SPX", "1d", bars());
        let cached = CachedPriceStore::new(CountingStore { inner, calls: AtomicUsize::new(0) });
        cached.candles("SPX", 0, 900, "1d").unwrap();

        let crashed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cached.cache.lock().unwrap();
            panic!("worker died holding the cache");
        }));
        assert!(crashed.is_err());
        assert!(cached.cache.is_poisoned());

        assert_eq!(cached.candles("SPX", 0, 900, "1d").unwrap().len(), 10);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.cached_entries(), 1);
        assert!(!cached.cache.is_poisoned());
    }

    #[test]
    fn test_repository_put_get_delete() {
        let mut repo: InMemoryRepository<String, u32> = InMemoryRepository::new();
        assert!(repo.is_empty());
        repo.put("a".to_string(), 1);
        assert_eq!(repo.get(&"a".to_string()), Some(1));
        assert_eq!(repo.delete(&"a".to_string()), Some(1));
        assert_eq!(repo.get(&"a".to_string()), None);
    }
}

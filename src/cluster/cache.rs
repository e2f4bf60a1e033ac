use super::params::ClusterParams;
use super::summary::ClustersResponse;
use super::summary::Memberships;
use crate::CLUSTER_CACHE_CAPACITY;
use crate::CLUSTER_CACHE_TTL_SECS;
use crate::query::Filter;
use lru::LruCache;
use sha1::Digest;
use sha1::Sha1;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

/// cache key: canonical (sorted) include/exclude tuples plus the parameter
/// struct. identical queries with reordered tokens share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub params: ClusterParams,
}

impl ClusterKey {
    pub fn new(filter: &Filter, params: &ClusterParams) -> Self {
        let (include, exclude) = filter.canonical();
        Self {
            include,
            exclude,
            params: *params,
        }
    }

    /// deterministic run id: SHA-1 hex over the canonical JSON serialization
    /// of the key, exposed so clients can correlate playbook requests with
    /// cluster runs
    pub fn run_id(&self) -> String {
        let canonical = serde_json::json!({
            "include": self.include,
            "exclude": self.exclude,
            "params": self.params,
        });
        let mut hasher = Sha1::new();
        hasher.update(canonical.to_string().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

struct Entry {
    at: Instant,
    report: ClustersResponse,
    members: Arc<Memberships>,
}

/// thread-safe LRU with TTL expiry. the report and its membership bitmaps
/// live in one entry, so eviction always removes both together. one lock
/// covers lookup, insertion, and eviction; computation happens outside it.
pub struct ClusterCache {
    inner: Mutex<LruCache<ClusterKey, Entry>>,
    ttl: Duration,
}

impl Default for ClusterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(CLUSTER_CACHE_CAPACITY).expect("nonzero capacity"),
            )),
            ttl: Duration::from_secs(CLUSTER_CACHE_TTL_SECS),
        }
    }

    pub fn get(&self, key: &ClusterKey) -> Option<(ClustersResponse, Arc<Memberships>)> {
        let mut cache = self.inner.lock().expect("cluster cache lock");
        let expired = match cache.get(key) {
            None => return None,
            Some(entry) => entry.at.elapsed() > self.ttl,
        };
        if expired {
            cache.pop(key);
            return None;
        }
        let entry = cache.get(key).expect("entry just observed");
        let mut report = entry.report.clone();
        report.cached = true;
        Some((report, Arc::clone(&entry.members)))
    }

    pub fn put(&self, key: ClusterKey, report: ClustersResponse, members: Arc<Memberships>) {
        let mut cache = self.inner.lock().expect("cluster cache lock");
        cache.put(
            key,
            Entry {
                at: Instant::now(),
                report,
                members,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_ignores_token_order() {
        let params = ClusterParams::default();
        let a = ClusterKey::new(&Filter::parse("U:B,U:A,-T:X"), &params);
        let b = ClusterKey::new(&Filter::parse("U:A,-T:X,U:B"), &params);
        assert_eq!(a, b);
        assert_eq!(a.run_id(), b.run_id());
        assert_eq!(a.run_id().len(), 40);
    }

    #[test]
    fn run_id_depends_on_params() {
        let filter = Filter::parse("U:A");
        let a = ClusterKey::new(&filter, &ClusterParams::default());
        let b = ClusterKey::new(
            &filter,
            &ClusterParams {
                n_clusters: 8,
                ..ClusterParams::default()
            },
        );
        assert_ne!(a.run_id(), b.run_id());
    }
}

use super::filters::ItemFilters;
use crate::cluster::ClusterCache;
use crate::cluster::ClusterParams;
use crate::cluster::cache::ClusterKey;
use crate::cluster::summary;
use crate::cluster::summary::ClustersResponse;
use crate::cluster::summary::Memberships;
use crate::causal::necessity;
use crate::causal::necessity::NecessityOptions;
use crate::causal::necessity::NecessityResponse;
use crate::engine::Engine;
use crate::engine::engine::EngineStats;
use crate::error::Error;
use crate::playbook;
use crate::playbook::PlaybookOptions;
use crate::playbook::PlaybookResponse;
use crate::query::Filter;
use crate::query::SearchIndex;
use crate::query::builds;
use crate::query::builds::BuildOptions;
use crate::query::builds::BuildsResponse;
use crate::query::graph;
use crate::query::graph::GraphOptions;
use crate::query::graph::GraphResponse;
use crate::query::search::SearchHit;
use crate::query::unit_items;
use crate::query::unit_items::UnitItemsOptions;
use crate::query::unit_items::UnitItemsResponse;
use std::sync::Arc;

/// the process-local query surface. wraps the immutable engine with the only
/// mutable query-time state: the cluster result cache (internally locked)
/// and two precomputed read-only indexes.
pub struct Api {
    engine: Arc<Engine>,
    clusters: ClusterCache,
    search: SearchIndex,
    filters: ItemFilters,
}

impl From<Arc<Engine>> for Api {
    fn from(engine: Arc<Engine>) -> Self {
        let search = SearchIndex::new(&engine);
        let filters = ItemFilters::new(&engine);
        Self {
            engine,
            clusters: ClusterCache::new(),
            search,
            filters,
        }
    }
}

impl Api {
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    pub fn search(&self, q: &str) -> Vec<SearchHit> {
        self.search.search(q)
    }

    pub fn search_index(&self) -> Vec<SearchHit> {
        self.search.all()
    }

    pub fn item_filters(&self) -> &ItemFilters {
        &self.filters
    }

    pub fn graph(&self, filter: &Filter, opts: &GraphOptions) -> GraphResponse {
        graph::graph(&self.engine, filter, opts)
    }

    pub fn clusters(&self, filter: &Filter, params: &ClusterParams) -> ClustersResponse {
        self.clusters_with_members(filter, params).0
    }

    /// cache-through cluster computation. the report and the membership
    /// bitmaps live in one paired entry; misses compute outside the lock.
    fn clusters_with_members(
        &self,
        filter: &Filter,
        params: &ClusterParams,
    ) -> (ClustersResponse, Arc<Memberships>) {
        let key = ClusterKey::new(filter, params);
        if let Some(hit) = self.clusters.get(&key) {
            return hit;
        }
        let run_id = key.run_id();
        let (report, members) = summary::compute(&self.engine, filter, params, run_id);
        let members = Arc::new(members);
        self.clusters.put(key, report.clone(), Arc::clone(&members));
        (report, members)
    }

    pub fn cluster_playbook(
        &self,
        filter: &Filter,
        params: &ClusterParams,
        cluster_id: usize,
        opts: &PlaybookOptions,
    ) -> PlaybookResponse {
        let key = ClusterKey::new(filter, params);
        let run_id = key.run_id();
        let (_, members) = self.clusters_with_members(filter, params);
        let mut response = match members.of(cluster_id) {
            Some(bitmap) => playbook::report::playbook(&self.engine, bitmap, opts),
            None => {
                let empty = roaring::RoaringBitmap::new();
                let mut r = playbook::report::playbook(&self.engine, &empty, opts);
                r.warning = Some(
                    "Cluster not found for these filters (it may be below the minimum size)."
                        .to_string(),
                );
                r
            }
        };
        response.cluster_id = Some(cluster_id);
        response.run_id = Some(run_id);
        response
    }

    /// an arbitrary filter treated as a cluster
    pub fn token_playbook(&self, filter: &Filter, opts: &PlaybookOptions) -> PlaybookResponse {
        let members = self.engine.filter(&filter.include, &filter.exclude);
        playbook::report::playbook(&self.engine, &members, opts)
    }

    pub fn unit_items(
        &self,
        unit: &str,
        filter: &Filter,
        opts: &UnitItemsOptions,
    ) -> Result<UnitItemsResponse, Error> {
        unit_items::unit_items(&self.engine, unit, filter, opts)
    }

    pub fn unit_build(
        &self,
        unit: &str,
        filter: &Filter,
        opts: &BuildOptions,
    ) -> Result<BuildsResponse, Error> {
        builds::unit_build(&self.engine, unit, filter, opts)
    }

    pub fn item_necessity(
        &self,
        unit: &str,
        item: &str,
        filter: &Filter,
        opts: &NecessityOptions,
    ) -> Result<NecessityResponse, Error> {
        necessity::item_necessity(&self.engine, unit, item, filter, opts)
    }
}

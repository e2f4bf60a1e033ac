use crate::causal::Outcome;
use crate::causal::necessity::NecessityOptions;
use crate::cluster::ClusterParams;
use crate::error::Error;
use crate::playbook::PlaybookOptions;
use crate::query::builds::BuildOptions;
use crate::query::graph::GraphOptions;
use crate::query::graph::SortMode;
use crate::query::unit_items::ItemSort;
use crate::query::unit_items::UnitItemsOptions;
use crate::tokens::ItemType;
use crate::tokens::Namespace;
use serde::Deserialize;
use std::collections::HashSet;

/// comma-separated item types; no recognized entry means no filtering
pub fn parse_item_types(csv: &str) -> Option<HashSet<ItemType>> {
    let parsed: HashSet<ItemType> = csv
        .split(',')
        .filter_map(|t| ItemType::try_from(t).ok())
        .collect();
    if parsed.is_empty() { None } else { Some(parsed) }
}

/// comma-separated set prefixes, case-insensitive, trailing underscores
/// trimmed. empty means prefixed set items stay hidden.
pub fn parse_item_prefixes(csv: &str) -> HashSet<String> {
    csv.split(',')
        .map(|t| t.trim().trim_end_matches('_').to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn parse_namespaces(csv: &str) -> HashSet<Namespace> {
    csv.split(',')
        .filter_map(|t| Namespace::try_from(t).ok())
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct GraphQuery {
    #[serde(default)]
    pub tokens: String,
    #[serde(default = "ten")]
    pub min_sample: u64,
    #[serde(default = "fifteen")]
    pub top_k: usize,
    #[serde(default = "default_types")]
    pub types: String,
    #[serde(default)]
    pub sort_mode: String,
    #[serde(default)]
    pub item_types: String,
    #[serde(default)]
    pub item_prefixes: String,
}

impl GraphQuery {
    pub fn options(&self) -> Result<GraphOptions, Error> {
        Ok(GraphOptions {
            min_sample: self.min_sample,
            top_k: self.top_k,
            types: parse_namespaces(&self.types),
            sort: SortMode::try_from(self.sort_mode.as_str()).map_err(Error::InvalidRequest)?,
            item_types: parse_item_types(&self.item_types),
            item_prefixes: parse_item_prefixes(&self.item_prefixes),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ClustersQuery {
    #[serde(default)]
    pub tokens: String,
    #[serde(default = "fifteen")]
    pub n_clusters: usize,
    #[serde(default = "truthy")]
    pub use_units: bool,
    #[serde(default = "truthy")]
    pub use_traits: bool,
    #[serde(default)]
    pub use_items: bool,
    #[serde(default)]
    pub use_equipped: bool,
    #[serde(default)]
    pub include_star_units: bool,
    #[serde(default)]
    pub include_tier_traits: bool,
    #[serde(default = "hundred")]
    pub min_token_freq: u32,
    #[serde(default = "fifty")]
    pub min_cluster_size: u64,
    #[serde(default = "ten_usize")]
    pub top_k_tokens: usize,
    #[serde(default = "seed")]
    pub random_state: u64,
}

impl ClustersQuery {
    pub fn params(&self) -> Result<ClusterParams, Error> {
        if !(2..=50).contains(&self.n_clusters) {
            return Err(Error::InvalidRequest(format!(
                "n_clusters must be within 2..=50, got {}",
                self.n_clusters
            )));
        }
        Ok(ClusterParams {
            n_clusters: self.n_clusters,
            use_units: self.use_units,
            use_traits: self.use_traits,
            use_items: self.use_items,
            use_equipped: self.use_equipped,
            include_star_units: self.include_star_units,
            include_tier_traits: self.include_tier_traits,
            min_token_freq: self.min_token_freq.max(1),
            min_cluster_size: self.min_cluster_size.max(1),
            top_k_tokens: self.top_k_tokens.clamp(1, 30),
            random_state: self.random_state,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ClusterPlaybookQuery {
    #[serde(default)]
    pub tokens: String,
    pub cluster_id: usize,
    #[serde(default = "fifteen")]
    pub n_clusters: usize,
    #[serde(default = "truthy")]
    pub use_units: bool,
    #[serde(default = "truthy")]
    pub use_traits: bool,
    #[serde(default)]
    pub use_items: bool,
    #[serde(default)]
    pub use_equipped: bool,
    #[serde(default)]
    pub include_star_units: bool,
    #[serde(default)]
    pub include_tier_traits: bool,
    #[serde(default = "hundred")]
    pub min_token_freq: u32,
    #[serde(default = "fifty")]
    pub min_cluster_size: u64,
    #[serde(default = "ten_usize")]
    pub top_k_tokens: usize,
    #[serde(default = "seed")]
    pub random_state: u64,
    #[serde(default = "thirty")]
    pub min_with: u64,
    #[serde(default = "thirty")]
    pub min_without: u64,
    #[serde(default = "twelve")]
    pub max_drivers: usize,
    #[serde(default = "twelve")]
    pub max_killers: usize,
}

impl ClusterPlaybookQuery {
    pub fn params(&self) -> Result<ClusterParams, Error> {
        if !(2..=50).contains(&self.n_clusters) {
            return Err(Error::InvalidRequest(format!(
                "n_clusters must be within 2..=50, got {}",
                self.n_clusters
            )));
        }
        Ok(ClusterParams {
            n_clusters: self.n_clusters,
            use_units: self.use_units,
            use_traits: self.use_traits,
            use_items: self.use_items,
            use_equipped: self.use_equipped,
            include_star_units: self.include_star_units,
            include_tier_traits: self.include_tier_traits,
            min_token_freq: self.min_token_freq.max(1),
            min_cluster_size: self.min_cluster_size.max(1),
            top_k_tokens: self.top_k_tokens.clamp(1, 30),
            random_state: self.random_state,
        })
    }

    pub fn playbook(&self) -> PlaybookOptions {
        PlaybookOptions {
            min_with: self.min_with.max(1),
            min_without: self.min_without.max(1),
            max_drivers: self.max_drivers.clamp(1, 50),
            max_killers: self.max_killers.clamp(1, 50),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenPlaybookQuery {
    #[serde(default)]
    pub tokens: String,
    #[serde(default = "thirty")]
    pub min_with: u64,
    #[serde(default = "thirty")]
    pub min_without: u64,
    #[serde(default = "twelve")]
    pub max_drivers: usize,
    #[serde(default = "twelve")]
    pub max_killers: usize,
}

impl TokenPlaybookQuery {
    pub fn playbook(&self) -> PlaybookOptions {
        PlaybookOptions {
            min_with: self.min_with.max(1),
            min_without: self.min_without.max(1),
            max_drivers: self.max_drivers.clamp(1, 50),
            max_killers: self.max_killers.clamp(1, 50),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UnitItemsQuery {
    pub unit: String,
    #[serde(default)]
    pub tokens: String,
    #[serde(default = "thirty")]
    pub min_sample: u64,
    #[serde(default)]
    pub top_k: usize,
    #[serde(default)]
    pub sort_mode: String,
    #[serde(default)]
    pub item_types: String,
    #[serde(default)]
    pub item_prefixes: String,
}

impl UnitItemsQuery {
    pub fn options(&self) -> Result<UnitItemsOptions, Error> {
        Ok(UnitItemsOptions {
            min_sample: self.min_sample,
            top_k: self.top_k,
            sort: ItemSort::try_from(self.sort_mode.as_str()).map_err(Error::InvalidRequest)?,
            item_types: parse_item_types(&self.item_types),
            item_prefixes: parse_item_prefixes(&self.item_prefixes),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UnitBuildQuery {
    pub unit: String,
    #[serde(default)]
    pub tokens: String,
    #[serde(default = "ten")]
    pub min_sample: u64,
    #[serde(default = "three")]
    pub slots: usize,
    #[serde(default)]
    pub item_types: String,
    #[serde(default)]
    pub item_prefixes: String,
}

impl UnitBuildQuery {
    pub fn options(&self) -> BuildOptions {
        BuildOptions {
            min_sample: self.min_sample,
            slots: self.slots.clamp(1, 3),
            item_types: parse_item_types(&self.item_types),
            item_prefixes: parse_item_prefixes(&self.item_prefixes),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NecessityQuery {
    pub unit: String,
    pub item: String,
    #[serde(default)]
    pub tokens: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default = "two")]
    pub n_splits: usize,
    #[serde(default = "max_rows")]
    pub max_rows: usize,
    #[serde(default = "twentyfive")]
    pub min_token_freq: u32,
    #[serde(default = "trim_low")]
    pub overlap_min: f64,
    #[serde(default = "trim_high")]
    pub overlap_max: f64,
    #[serde(default)]
    pub by_cluster: bool,
    #[serde(default = "eight")]
    pub n_clusters: usize,
}

impl NecessityQuery {
    pub fn options(&self) -> Result<NecessityOptions, Error> {
        let outcome = if self.outcome.trim().is_empty() {
            Outcome::Top4
        } else {
            Outcome::try_from(self.outcome.as_str()).map_err(Error::InvalidRequest)?
        };
        Ok(NecessityOptions {
            outcome,
            n_splits: self.n_splits.clamp(2, 5),
            max_rows: self.max_rows.clamp(1_000, 500_000),
            min_token_freq: self.min_token_freq.clamp(1, 10_000),
            overlap_min: self.overlap_min.clamp(0.0, 0.49),
            overlap_max: self.overlap_max.clamp(0.51, 1.0),
            by_cluster: self.by_cluster,
            n_clusters: self.n_clusters.clamp(2, 20),
        })
    }
}

fn ten() -> u64 {
    10
}
fn ten_usize() -> usize {
    10
}
fn fifteen() -> usize {
    15
}
fn thirty() -> u64 {
    30
}
fn fifty() -> u64 {
    50
}
fn hundred() -> u32 {
    100
}
fn twelve() -> usize {
    12
}
fn two() -> usize {
    2
}
fn three() -> usize {
    3
}
fn eight() -> usize {
    8
}
fn twentyfive() -> u32 {
    25
}
fn seed() -> u64 {
    42
}
fn truthy() -> bool {
    true
}
fn max_rows() -> usize {
    crate::AIPW_MAX_ROWS
}
fn trim_low() -> f64 {
    crate::AIPW_TRIM_LOW
}
fn trim_high() -> f64 {
    crate::AIPW_TRIM_HIGH
}
fn default_types() -> String {
    "unit,item,trait".to_string()
}

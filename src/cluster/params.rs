use super::features::FeatureParams;
use serde::Deserialize;
use serde::Serialize;

/// clustering knobs, all integral so the struct can key the result cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterParams {
    pub n_clusters: usize,
    pub use_units: bool,
    pub use_traits: bool,
    pub use_items: bool,
    pub use_equipped: bool,
    /// off by default: star-unit variants fragment cluster signatures
    pub include_star_units: bool,
    /// off by default: tier-trait variants fragment cluster signatures
    pub include_tier_traits: bool,
    pub min_token_freq: u32,
    pub min_cluster_size: u64,
    pub top_k_tokens: usize,
    pub random_state: u64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            n_clusters: 15,
            use_units: true,
            use_traits: true,
            use_items: false,
            use_equipped: false,
            include_star_units: false,
            include_tier_traits: false,
            min_token_freq: 100,
            min_cluster_size: 50,
            top_k_tokens: 10,
            random_state: 42,
        }
    }
}

impl ClusterParams {
    pub fn features(&self) -> FeatureParams {
        FeatureParams {
            use_units: self.use_units,
            use_traits: self.use_traits,
            use_items: self.use_items,
            use_equipped: self.use_equipped,
            include_star_units: self.include_star_units,
            include_tier_traits: self.include_tier_traits,
            min_token_freq: self.min_token_freq,
        }
    }
}

use crate::TokenId;
use crate::engine::Engine;
use crate::tokens::Namespace;
use std::collections::HashSet;

/// which token namespaces feed a feature matrix. star-unit and tier-trait
/// variants are excluded by default to keep signatures stable; the frequency
/// floor keeps the feature space consistent across queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureParams {
    pub use_units: bool,
    pub use_traits: bool,
    pub use_items: bool,
    pub use_equipped: bool,
    pub include_star_units: bool,
    pub include_tier_traits: bool,
    pub min_token_freq: u32,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            use_units: true,
            use_traits: true,
            use_items: true,
            use_equipped: false,
            include_star_units: false,
            include_tier_traits: true,
            min_token_freq: 1,
        }
    }
}

/// all tokens from the enabled namespaces whose global count clears the
/// frequency floor, in id order
pub fn select_feature_tokens(
    engine: &Engine,
    params: &FeatureParams,
    exclude: &HashSet<&str>,
) -> Vec<TokenId> {
    let mut features = Vec::new();
    let qualified = |token: &str| token[2..].contains(':');

    if params.use_units {
        for (id, token) in engine.tokens_in(Namespace::Unit) {
            if qualified(token) && !params.include_star_units {
                continue;
            }
            features.push((id, token));
        }
    }
    if params.use_traits {
        for (id, token) in engine.tokens_in(Namespace::Trait) {
            if qualified(token) && !params.include_tier_traits {
                continue;
            }
            features.push((id, token));
        }
    }
    if params.use_items {
        features.extend(engine.tokens_in(Namespace::Item));
    }
    if params.use_equipped {
        features.extend(engine.tokens_in(Namespace::Equipped));
    }

    features
        .into_iter()
        .filter(|(_, token)| !exclude.contains(token))
        .filter(|(id, _)| engine.stats_by_id(*id).count >= params.min_token_freq)
        .map(|(id, _)| id)
        .collect()
}

use super::filter::Filter;
use super::graph::BaseStats;
use super::round_to;
use crate::causal::NecessityView;
use crate::causal::Outcome;
use crate::causal::necessity::view_from_cache;
use crate::causal::strata::Strata;
use crate::engine::Engine;
use crate::error::Error;
use crate::tokens::ItemType;
use crate::tokens::Token;
use crate::tokens::items::item_prefix;
use serde::Serialize;
use std::collections::HashSet;

/// ordering for the per-unit item list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemSort {
    /// best shrunk delta first (most negative improves placement most)
    #[default]
    Helpful,
    /// worst shrunk delta first
    Harmful,
    /// |delta| descending
    Impact,
    /// causal ΔTop4, strongest first
    Necessity,
}

impl TryFrom<&str> for ItemSort {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "helpful" => Ok(Self::Helpful),
            "harmful" => Ok(Self::Harmful),
            "impact" => Ok(Self::Impact),
            "necessity" => Ok(Self::Necessity),
            other => Err(format!("unknown sort mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitItemsOptions {
    pub min_sample: u64,
    pub top_k: usize,
    pub sort: ItemSort,
    pub item_types: Option<HashSet<ItemType>>,
    pub item_prefixes: HashSet<String>,
}

impl Default for UnitItemsOptions {
    fn default() -> Self {
        Self {
            min_sample: 30,
            top_k: 0,
            sort: ItemSort::Helpful,
            item_types: None,
            item_prefixes: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemScore {
    pub item: String,
    pub token: String,
    pub delta: f64,
    pub avg_placement: f64,
    pub n: u64,
    pub pct_of_base: f64,
    pub raw_delta: f64,
    pub raw_avg_placement: f64,
    pub item_type: &'static str,
    pub item_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub necessity: Option<NecessityView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitItemsResponse {
    pub unit: String,
    pub filters: Vec<String>,
    pub base: BaseStats,
    pub items: Vec<ItemScore>,
}

/// empirical-Bayes shrinkage toward the base mean, damping small samples
pub fn shrink_avg(avg: f64, n: u64, prior_mean: f64, prior_weight: f64) -> f64 {
    if n == 0 {
        return prior_mean;
    }
    (avg * n as f64 + prior_mean * prior_weight) / (n as f64 + prior_weight)
}

/// items equippable on a unit, ranked by their effect when equipped on this
/// specific unit. the `E:unit|item` tokens track actual item-on-unit
/// performance, not mere co-occurrence.
pub fn unit_items(
    engine: &Engine,
    unit: &str,
    filter: &Filter,
    opts: &UnitItemsOptions,
) -> Result<UnitItemsResponse, Error> {
    let unit_token = format!("U:{}", unit);
    if engine.vocab().id(&unit_token).is_none() {
        return Err(Error::UnknownToken(unit_token));
    }

    let mut include = vec![unit_token.clone()];
    include.extend(filter.include.iter().cloned());
    let base = engine.filter(&include, &filter.exclude);
    let n_base = base.len();

    if n_base == 0 {
        return Ok(UnitItemsResponse {
            unit: unit.to_string(),
            filters: filter.tokens(),
            base: BaseStats {
                n: 0,
                avg_placement: crate::UNIFORM_PLACEMENT,
            },
            items: vec![],
        });
    }
    let avg_base = engine.avg_placement(&base);

    // items the caller already pinned on this unit are not recommendations.
    // a global I:Item filter is deliberately not treated as "already present"
    // since it may sit on another unit.
    let existing: HashSet<&str> = filter
        .include
        .iter()
        .filter_map(|t| match Token::try_from(t.as_str()) {
            Ok(Token::Equipped(u, _)) | Ok(Token::EquippedCount(u, _, _)) if u == unit => {
                Some(&t[t.find('|')? + 1..])
            }
            _ => None,
        })
        .map(|item| item.split(':').next().unwrap_or(item))
        .collect();

    let prior_weight = (opts.min_sample as f64 * 2.0).clamp(25.0, 200.0);

    let mut results = Vec::new();
    let equipped: Vec<(crate::TokenId, String)> = engine
        .equipped_on(unit)
        .map(|(id, t)| (id, t.to_string()))
        .collect();
    for (token_id, token) in equipped {
        let Ok(parsed) = Token::try_from(token.as_str()) else {
            continue;
        };
        let (display_item, base_item) = match &parsed {
            Token::Equipped(_, i) => (i.clone(), i.as_str()),
            Token::EquippedCount(_, i, c) => (format!("{}:{}", i, c), i.as_str()),
            _ => continue,
        };
        if existing.contains(base_item) {
            continue;
        }
        let item_type = ItemType::of(base_item);
        if let Some(allowed) = &opts.item_types {
            if !allowed.contains(&item_type) {
                continue;
            }
        }
        let prefix = item_prefix(base_item);
        if let Some(p) = prefix {
            if !opts.item_prefixes.contains(&p.to_ascii_lowercase()) {
                continue;
            }
        }

        let with = &base & &engine.stats_by_id(token_id).bitmap;
        let n_with = with.len();
        if n_with < opts.min_sample {
            continue;
        }
        let avg_with = engine.avg_placement(&with);
        let avg_adj = shrink_avg(avg_with, n_with, avg_base, prior_weight);

        results.push((
            token_id,
            ItemScore {
                item: display_item,
                token,
                delta: round_to(avg_adj - avg_base, 3),
                avg_placement: round_to(avg_adj, 3),
                n: n_with,
                pct_of_base: round_to(n_with as f64 / n_base as f64 * 100.0, 1),
                raw_delta: round_to(avg_with - avg_base, 3),
                raw_avg_placement: round_to(avg_with, 3),
                item_type: item_type.key(),
                item_prefix: prefix.map(String::from),
                necessity: None,
            },
        ));
    }

    match opts.sort {
        ItemSort::Helpful => results.sort_by(|a, b| a.1.delta.total_cmp(&b.1.delta)),
        ItemSort::Harmful => results.sort_by(|a, b| b.1.delta.total_cmp(&a.1.delta)),
        ItemSort::Impact => {
            results.sort_by(|a, b| b.1.delta.abs().total_cmp(&a.1.delta.abs()))
        }
        ItemSort::Necessity => {
            attach_necessity(engine, &base, filter, opts, &mut results);
            results.sort_by(|a, b| necessity_rank(&a.1).partial_cmp(&necessity_rank(&b.1)).unwrap());
        }
    }

    let mut items: Vec<ItemScore> = results.into_iter().map(|(_, score)| score).collect();
    if opts.top_k > 0 {
        items.truncate(opts.top_k);
    }

    Ok(UnitItemsResponse {
        unit: unit.to_string(),
        filters: filter.tokens(),
        base: BaseStats {
            n: n_base,
            avg_placement: round_to(avg_base, 3),
        },
        items,
    })
}

/// necessity values come from the precomputed cache in the default context
/// (outcome top4, no filters, matching scope); any other context uses the
/// stratified fast path so list ranking stays interactive
fn attach_necessity(
    engine: &Engine,
    base: &roaring::RoaringBitmap,
    filter: &Filter,
    opts: &UnitItemsOptions,
    results: &mut [(crate::TokenId, ItemScore)],
) {
    if filter.is_empty() && engine.necessity().ready() {
        for (token_id, score) in results.iter_mut() {
            score.necessity = view_from_cache(engine, *token_id);
        }
        return;
    }
    let min_token_freq = 50u32.max(opts.min_sample as u32);
    let Some(strata) = Strata::fit(engine, base, Outcome::Top4, min_token_freq, 42) else {
        return;
    };
    for (token_id, score) in results.iter_mut() {
        score.necessity = strata.estimate(engine, *token_id, Outcome::Top4);
    }
}

/// missing estimates sink to the bottom; then strongest effect, cleanest
/// overlap, largest usable sample
fn necessity_rank(score: &ItemScore) -> (u8, f64, f64, i64) {
    match &score.necessity {
        None => (1, 0.0, 1.0, 0),
        Some(view) => (
            0,
            -view.tau,
            view.frac_trimmed.unwrap_or(1.0),
            -(view.n_used as i64),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrinkage_pulls_small_samples_to_prior() {
        let shrunk = shrink_avg(1.0, 5, 4.5, 100.0);
        assert!(shrunk > 4.0, "n=5 should stay near the prior, got {}", shrunk);
        let confident = shrink_avg(1.0, 10_000, 4.5, 100.0);
        assert!(confident < 1.1, "n=10000 should dominate, got {}", confident);
    }

    #[test]
    fn shrinkage_of_empty_is_prior() {
        assert_eq!(shrink_avg(2.0, 0, 4.5, 50.0), 4.5);
    }
}

use super::filter::Filter;
use super::graph::BaseStats;
use super::round_to;
use super::unit_items::shrink_avg;
use crate::engine::Engine;
use crate::error::Error;
use crate::tokens::ItemType;
use crate::tokens::Token;
use crate::tokens::items::item_prefix;
use roaring::RoaringBitmap;
use serde::Serialize;
use std::collections::HashSet;

const BEAM_WIDTH: usize = 40;
const MAX_BUILDS: usize = 25;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub min_sample: u64,
    /// item slots to fill, 1..=3
    pub slots: usize,
    pub item_types: Option<HashSet<ItemType>>,
    pub item_prefixes: HashSet<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            min_sample: 10,
            slots: 3,
            item_types: None,
            item_prefixes: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildItem {
    pub item: String,
    pub token: String,
    pub delta: f64,
    pub avg_placement: f64,
    pub n: u64,
    pub item_type: &'static str,
    pub item_prefix: Option<String>,
    pub slot: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub items: Vec<BuildItem>,
    pub final_avg: f64,
    pub final_n: u64,
    pub total_delta: f64,
    pub num_items: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildsResponse {
    pub unit: String,
    pub filters: Vec<String>,
    pub base: BaseStats,
    pub builds: Vec<Build>,
}

struct State {
    items: Vec<BuildItem>,
    bitmap: RoaringBitmap,
    n: u64,
    avg: f64,
    score: f64,
    used: HashSet<String>,
}

/// beam-searched item builds for a unit. combinations are scored with
/// small-sample shrinkage so rare three-item lines don't dominate on noise,
/// which also captures item interactions a greedy one-at-a-time pick misses.
pub fn unit_build(
    engine: &Engine,
    unit: &str,
    filter: &Filter,
    opts: &BuildOptions,
) -> Result<BuildsResponse, Error> {
    let unit_token = format!("U:{}", unit);
    if engine.vocab().id(&unit_token).is_none() {
        return Err(Error::UnknownToken(unit_token));
    }
    let slots = opts.slots.clamp(1, 3);

    let mut include = vec![unit_token.clone()];
    include.extend(filter.include.iter().cloned());
    let base = engine.filter(&include, &filter.exclude);
    let n_base = base.len();
    let avg_base = engine.avg_placement(&base);

    let respond = |builds: Vec<Build>| BuildsResponse {
        unit: unit.to_string(),
        filters: filter.tokens(),
        base: BaseStats {
            n: n_base,
            avg_placement: round_to(avg_base, 3),
        },
        builds,
    };

    if n_base < opts.min_sample {
        return Ok(respond(vec![]));
    }

    // items already pinned on this unit through filters occupy slots
    let mut locked: Vec<String> = Vec::new();
    for t in &filter.include {
        if let Ok(Token::Equipped(u, i)) = Token::try_from(t.as_str()) {
            if u == unit && !locked.contains(&i) {
                locked.push(i);
            }
        }
    }
    locked.truncate(slots);
    let locked_set: HashSet<String> = locked.iter().cloned().collect();
    let remaining = slots - locked.len();

    let locked_items: Vec<BuildItem> = locked
        .iter()
        .map(|item| BuildItem {
            item: item.clone(),
            token: format!("E:{}|{}", unit, item),
            delta: 0.0,
            avg_placement: round_to(avg_base, 3),
            n: n_base,
            item_type: ItemType::of(item).key(),
            item_prefix: item_prefix(item).map(String::from),
            slot: 0,
        })
        .collect();

    if remaining == 0 {
        return Ok(respond(vec![finish(locked_items, avg_base, n_base, avg_base)]));
    }

    // candidate pool: plain equipped tokens with enough sample under the
    // current filters, after the item masks
    struct Candidate {
        item: String,
        token: String,
        bitmap: RoaringBitmap,
        item_type: ItemType,
        prefix: Option<String>,
    }
    let mut candidates = Vec::new();
    let equipped: Vec<(crate::TokenId, String)> = engine
        .equipped_on(unit)
        .map(|(id, t)| (id, t.to_string()))
        .collect();
    for (token_id, token) in equipped {
        let Ok(Token::Equipped(_, item)) = Token::try_from(token.as_str()) else {
            continue;
        };
        if locked_set.contains(&item) {
            continue;
        }
        let item_type = ItemType::of(&item);
        if let Some(allowed) = &opts.item_types {
            if !allowed.contains(&item_type) {
                continue;
            }
        }
        let prefix = item_prefix(&item).map(String::from);
        if let Some(p) = &prefix {
            if !opts.item_prefixes.contains(&p.to_ascii_lowercase()) {
                continue;
            }
        }
        let bitmap = engine.stats_by_id(token_id).bitmap.clone();
        if (&base & &bitmap).len() < opts.min_sample {
            continue;
        }
        candidates.push(Candidate {
            item,
            token,
            bitmap,
            item_type,
            prefix,
        });
    }

    if candidates.is_empty() {
        let builds = if locked_items.is_empty() {
            vec![]
        } else {
            vec![finish(locked_items, avg_base, n_base, avg_base)]
        };
        return Ok(respond(builds));
    }

    let prior_weight = (n_base as f64 * 0.05).clamp(25.0, 200.0);
    let mut beam = vec![State {
        items: locked_items,
        bitmap: base.clone(),
        n: n_base,
        avg: avg_base,
        score: shrink_avg(avg_base, n_base, avg_base, prior_weight),
        used: locked_set,
    }];

    for _ in 0..remaining {
        let mut next: Vec<State> = Vec::new();
        for state in &beam {
            for cand in &candidates {
                if state.used.contains(&cand.item) {
                    continue;
                }
                let with = &state.bitmap & &cand.bitmap;
                let n_with = with.len();
                if n_with < opts.min_sample {
                    continue;
                }
                let avg_with = engine.avg_placement(&with);
                let mut items = state.items.clone();
                items.push(BuildItem {
                    item: cand.item.clone(),
                    token: cand.token.clone(),
                    delta: round_to(avg_with - state.avg, 3),
                    avg_placement: round_to(avg_with, 3),
                    n: n_with,
                    item_type: cand.item_type.key(),
                    item_prefix: cand.prefix.clone(),
                    slot: 0,
                });
                let mut used = state.used.clone();
                used.insert(cand.item.clone());
                next.push(State {
                    items,
                    bitmap: with,
                    n: n_with,
                    avg: avg_with,
                    score: shrink_avg(avg_with, n_with, avg_base, prior_weight),
                    used,
                });
            }
        }
        if next.is_empty() {
            break;
        }
        // lower (better) shrunk score first, then raw avg, then sample size
        next.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then(a.avg.total_cmp(&b.avg))
                .then(b.n.cmp(&a.n))
        });
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut pruned = Vec::new();
        for state in next {
            let mut key: Vec<String> = state.items.iter().map(|i| i.item.clone()).collect();
            key.sort();
            if seen.insert(key) {
                pruned.push(state);
                if pruned.len() >= BEAM_WIDTH {
                    break;
                }
            }
        }
        beam = pruned;
    }

    let mut builds: Vec<(f64, Build)> = beam
        .into_iter()
        .filter(|state| !state.items.is_empty())
        .map(|state| {
            (
                state.score,
                finish(state.items, state.avg, state.n, avg_base),
            )
        })
        .collect();
    builds.sort_by(|(sa, a), (sb, b)| {
        b.num_items
            .cmp(&a.num_items)
            .then(a.final_avg.total_cmp(&b.final_avg))
            .then(b.final_n.cmp(&a.final_n))
            .then(sa.total_cmp(sb))
    });
    builds.truncate(MAX_BUILDS);
    Ok(respond(builds.into_iter().map(|(_, b)| b).collect()))
}

fn finish(mut items: Vec<BuildItem>, avg: f64, n: u64, avg_base: f64) -> Build {
    for (slot, item) in items.iter_mut().enumerate() {
        item.slot = slot + 1;
    }
    Build {
        num_items: items.len(),
        items,
        final_avg: round_to(avg, 3),
        final_n: n,
        total_delta: round_to(avg - avg_base, 3),
    }
}

use crate::engine::Engine;
use crate::query::round_to;
use crate::tokens::Namespace;
use roaring::RoaringBitmap;
use serde::Serialize;

/// how many seed tokens per namespace feed candidate expansion
const SEED_UNITS: usize = 8;
const SEED_TRAITS: usize = 6;
const SEED_ITEMS: usize = 8;
/// units whose full `E:unit|*` pool is expanded
const EQUIPPED_UNITS: usize = 4;
/// minimum in-cluster share for a seed token
const SEED_MIN_PCT: f64 = 0.10;
/// comp-view limits
const COMP_TRAITS: usize = 5;
const COMP_ITEMS: usize = 5;
const COMP_HOLDERS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct PlaybookOptions {
    pub min_with: u64,
    pub min_without: u64,
    pub max_drivers: usize,
    pub max_killers: usize,
}

impl Default for PlaybookOptions {
    fn default() -> Self {
        Self {
            min_with: 30,
            min_without: 30,
            max_drivers: 12,
            max_killers: 12,
        }
    }
}

/// per-side outcome rates, after shrinkage where noted
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SideRates {
    pub n: u64,
    pub win_rate: f64,
    pub top4_rate: f64,
    pub eighth_rate: f64,
    pub avg_placement: f64,
}

/// the within-cluster effect of holding one attribute
#[derive(Debug, Clone, Serialize)]
pub struct TokenEffect {
    pub token: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub n_with: u64,
    pub n_without: u64,
    pub pct_in_cluster: f64,
    pub delta_win: f64,
    pub delta_top4: f64,
    pub delta_eighth: f64,
    pub delta_avg: f64,
    pub with: SideRates,
    pub without: SideRates,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierShare {
    pub tier: u8,
    pub label: String,
    pub pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraitTiers {
    pub token: String,
    pub label: String,
    pub pct_any: f64,
    pub tiers: Vec<TierShare>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Holder {
    pub unit: String,
    pub token: String,
    pub pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemHolders {
    pub token: String,
    pub label: String,
    pub pct: f64,
    pub holders: Vec<Holder>,
}

/// "what does this comp actually run": active tier distribution per top
/// trait, best holders per top item
#[derive(Debug, Clone, Serialize)]
pub struct CompView {
    pub traits: Vec<TraitTiers>,
    pub items: Vec<ItemHolders>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStats {
    pub n: u64,
    pub avg_placement: f64,
    pub win_rate: f64,
    pub top4_rate: f64,
    pub eighth_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybookResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub cluster: ClusterStats,
    pub drivers: Vec<TokenEffect>,
    pub killers: Vec<TokenEffect>,
    pub comp: CompView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

struct Raw {
    n: u64,
    win: f64,
    top4: f64,
    eighth: f64,
    avg: f64,
}

impl Raw {
    fn of(engine: &Engine, bitmap: &RoaringBitmap) -> Self {
        let hist = engine.histogram(bitmap);
        let n: u32 = hist.iter().sum();
        if n == 0 {
            return Self {
                n: 0,
                win: 0.0,
                top4: 0.0,
                eighth: 0.0,
                avg: crate::UNIFORM_PLACEMENT,
            };
        }
        let nf = n as f64;
        Self {
            n: n as u64,
            win: hist[0] as f64 / nf,
            top4: hist[..4].iter().sum::<u32>() as f64 / nf,
            eighth: hist[7] as f64 / nf,
            avg: engine.avg_placement(bitmap),
        }
    }

    fn shrunk(&self, prior: &Raw, weight: f64) -> SideRates {
        let blend = |rate: f64, prior_rate: f64| {
            (rate * self.n as f64 + prior_rate * weight) / (self.n as f64 + weight)
        };
        SideRates {
            n: self.n,
            win_rate: round_to(blend(self.win, prior.win), 6),
            top4_rate: round_to(blend(self.top4, prior.top4), 6),
            eighth_rate: round_to(blend(self.eighth, prior.eighth), 6),
            avg_placement: round_to(blend(self.avg, prior.avg), 4),
        }
    }
}

/// rank candidate attributes by their within-cluster effect on win / top4 /
/// average placement, with empirical-Bayes shrinkage toward the cluster rate
/// so thin splits don't produce fake certainty
pub fn playbook(
    engine: &Engine,
    members: &RoaringBitmap,
    opts: &PlaybookOptions,
) -> PlaybookResponse {
    let cluster = Raw::of(engine, members);
    let stats = ClusterStats {
        n: cluster.n,
        avg_placement: round_to(cluster.avg, 4),
        win_rate: round_to(cluster.win, 6),
        top4_rate: round_to(cluster.top4, 6),
        eighth_rate: round_to(cluster.eighth, 6),
    };
    let mut response = PlaybookResponse {
        cluster_id: None,
        run_id: None,
        cluster: stats,
        drivers: vec![],
        killers: vec![],
        comp: CompView {
            traits: vec![],
            items: vec![],
        },
        warning: None,
    };
    if cluster.n == 0 {
        response.warning = Some("No matches for the current filters.".to_string());
        return response;
    }

    let seeds = seed_tokens(engine, members, cluster.n);
    let candidates = expand_candidates(engine, &seeds);

    // prior weight scales with cluster size, bounded so neither extreme wins
    let weight = (cluster.n as f64 / 16.0).clamp(25.0, 200.0);

    let mut effects: Vec<TokenEffect> = Vec::new();
    for token in candidates {
        let Some(stats) = engine.stats_of(&token) else {
            continue;
        };
        let with_bm = members & &stats.bitmap;
        let n_with = with_bm.len();
        let n_without = cluster.n - n_with;
        if n_with < opts.min_with || n_without < opts.min_without {
            continue;
        }
        let without_bm = members - &stats.bitmap;
        let with = Raw::of(engine, &with_bm);
        let without = Raw::of(engine, &without_bm);
        let with_adj = with.shrunk(&cluster, weight);
        let without_adj = without.shrunk(&cluster, weight);
        let kind = Namespace::of(&token).map(|ns| ns.name()).unwrap_or("unknown");
        effects.push(TokenEffect {
            label: engine.label(&token).to_string(),
            kind,
            token,
            n_with,
            n_without,
            pct_in_cluster: round_to(n_with as f64 / cluster.n as f64, 6),
            delta_win: round_to(with_adj.win_rate - without_adj.win_rate, 6),
            delta_top4: round_to(with_adj.top4_rate - without_adj.top4_rate, 6),
            delta_eighth: round_to(with_adj.eighth_rate - without_adj.eighth_rate, 6),
            delta_avg: round_to(with_adj.avg_placement - without_adj.avg_placement, 4),
            with: with_adj,
            without: without_adj,
        });
    }

    let mut drivers = effects.clone();
    drivers.sort_by(|a, b| {
        b.delta_win
            .total_cmp(&a.delta_win)
            .then(b.delta_top4.total_cmp(&a.delta_top4))
            .then(a.delta_avg.total_cmp(&b.delta_avg))
    });
    drivers.truncate(opts.max_drivers);

    let mut killers = effects;
    killers.sort_by(|a, b| {
        a.delta_win
            .total_cmp(&b.delta_win)
            .then(a.delta_top4.total_cmp(&b.delta_top4))
            .then(b.delta_avg.total_cmp(&a.delta_avg))
    });
    killers.truncate(opts.max_killers);

    response.drivers = drivers;
    response.killers = killers;
    response.comp = comp_view(engine, members, cluster.n, &seeds);
    response
}

struct Seeds {
    units: Vec<String>,
    traits: Vec<String>,
    items: Vec<String>,
}

/// the cluster's most common base tokens per namespace, the nucleus that
/// candidate expansion grows from
fn seed_tokens(engine: &Engine, members: &RoaringBitmap, n: u64) -> Seeds {
    let top = |ns: Namespace, base_only: bool, k: usize| -> Vec<String> {
        let mut shares: Vec<(String, f64)> = engine
            .tokens_in(ns)
            .filter(|(_, t)| !base_only || !t[2..].contains(':'))
            .map(|(id, t)| {
                let pct = (members & &engine.stats_by_id(id).bitmap).len() as f64 / n as f64;
                (t.to_string(), pct)
            })
            .filter(|(_, pct)| *pct >= SEED_MIN_PCT)
            .collect();
        shares.sort_by(|a, b| b.1.total_cmp(&a.1));
        shares.into_iter().take(k).map(|(t, _)| t).collect()
    };
    Seeds {
        units: top(Namespace::Unit, true, SEED_UNITS),
        traits: top(Namespace::Trait, true, SEED_TRAITS),
        items: top(Namespace::Item, false, SEED_ITEMS),
    }
}

/// seeds, their starred / tiered variants, and the equipped pool of the top
/// few units
fn expand_candidates(engine: &Engine, seeds: &Seeds) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |t: String| {
        if !out.contains(&t) {
            out.push(t);
        }
    };
    for unit in &seeds.units {
        push(unit.clone());
        for star in 1..=6 {
            let token = format!("{}:{}", unit, star);
            if engine.vocab().id(&token).is_some() {
                push(token);
            }
        }
    }
    for unit in seeds.units.iter().take(EQUIPPED_UNITS) {
        let tokens: Vec<String> = engine
            .equipped_on(&unit[2..])
            .map(|(_, t)| t.to_string())
            .collect();
        for token in tokens {
            push(token);
        }
    }
    for name in &seeds.traits {
        push(name.clone());
        for tier in 2..=9 {
            let token = format!("{}:{}", name, tier);
            if engine.vocab().id(&token).is_some() {
                push(token);
            }
        }
    }
    for item in &seeds.items {
        push(item.clone());
    }
    out
}

/// active tier distribution per top trait (from inclusive-tier tokens via
/// P(tier = k) = P(tier >= k) - P(tier >= k+1)) and best holders per top item
fn comp_view(engine: &Engine, members: &RoaringBitmap, n: u64, seeds: &Seeds) -> CompView {
    let pct_of = |token: &str| -> f64 {
        engine
            .stats_of(token)
            .map(|s| (members & &s.bitmap).len() as f64 / n as f64)
            .unwrap_or(0.0)
    };

    let mut traits = Vec::new();
    for token in seeds.traits.iter().take(COMP_TRAITS) {
        let pct_any = pct_of(token);
        let mut tiers = Vec::new();
        // tier 1 share is "active but below tier 2"
        let mut inclusive: Vec<(u8, f64)> = vec![(1, pct_any)];
        for tier in 2..=9u8 {
            let tiered = format!("{}:{}", token, tier);
            if engine.vocab().id(&tiered).is_some() {
                inclusive.push((tier, pct_of(&tiered)));
            }
        }
        for window in 0..inclusive.len() {
            let (tier, at_least) = inclusive[window];
            let above = inclusive.get(window + 1).map(|&(_, p)| p).unwrap_or(0.0);
            let exact = (at_least - above).max(0.0);
            if exact > 0.01 {
                let label_token = if tier == 1 {
                    token.clone()
                } else {
                    format!("{}:{}", token, tier)
                };
                tiers.push(TierShare {
                    tier,
                    label: engine.label(&label_token).to_string(),
                    pct: round_to(exact, 6),
                });
            }
        }
        traits.push(TraitTiers {
            token: token.clone(),
            label: engine.label(token).to_string(),
            pct_any: round_to(pct_any, 6),
            tiers,
        });
    }

    let mut items = Vec::new();
    for token in seeds.items.iter().take(COMP_ITEMS) {
        let item = &token[2..];
        let marker = format!("|{}", item);
        let mut holders: Vec<Holder> = engine
            .tokens_in(Namespace::Equipped)
            .filter(|(_, t)| t.ends_with(&marker))
            .map(|(id, t)| {
                let pct = (members & &engine.stats_by_id(id).bitmap).len() as f64 / n as f64;
                let unit = t[2..].split('|').next().unwrap_or_default().to_string();
                Holder {
                    unit,
                    token: t.to_string(),
                    pct: round_to(pct, 6),
                }
            })
            .filter(|h| h.pct > 0.0)
            .collect();
        holders.sort_by(|a, b| b.pct.total_cmp(&a.pct));
        holders.truncate(COMP_HOLDERS);
        items.push(ItemHolders {
            token: token.clone(),
            label: engine.label(token).to_string(),
            pct: round_to(pct_of(token), 6),
            holders,
        });
    }

    CompView { traits, items }
}

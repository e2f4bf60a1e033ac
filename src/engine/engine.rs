use super::arrays::Proxies;
use super::necessity::NecessityCache;
use super::stats::TokenStats;
use crate::PmId;
use crate::TokenId;
use crate::UNIFORM_PLACEMENT;
use crate::tokens::Namespace;
use crate::tokens::Vocab;
use roaring::RoaringBitmap;
use serde::Serialize;

/// the read-only indexed store. built once from ingested rows, written to a
/// snapshot, then loaded back for querying. every field is immutable after
/// load, so reader threads traverse it concurrently without locks.
#[derive(Debug, Clone)]
pub struct Engine {
    pub(crate) vocab: Vocab,
    pub(crate) tokens: Vec<TokenStats>,
    pub(crate) placements: Vec<i8>,
    pub(crate) proxies: Proxies,
    pub(crate) all_players: RoaringBitmap,
    pub(crate) total_matches: u64,
    pub(crate) necessity: NecessityCache,
}

/// one scored candidate edge
#[derive(Debug, Clone, Serialize)]
pub struct Scored {
    pub token: String,
    pub delta: f64,
    pub avg_with: f64,
    pub avg_base: f64,
    pub n_with: u64,
    pub n_base: u64,
}

/// cheap summary counts
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_matches: u64,
    pub total_tokens: usize,
    pub unit_tokens: usize,
    pub item_tokens: usize,
    pub equipped_tokens: usize,
    pub trait_tokens: usize,
    pub placements_size_mb: f64,
}

/// placement-derived rates of a sub-population
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Rates {
    pub win_rate: f64,
    pub top4_rate: f64,
    pub bot4_rate: f64,
    pub eighth_rate: f64,
}

impl Rates {
    pub fn from_hist(hist: &[u32; 8]) -> Self {
        let n: u32 = hist.iter().sum();
        if n == 0 {
            return Self::default();
        }
        let n = n as f64;
        Self {
            win_rate: hist[0] as f64 / n,
            top4_rate: hist[..4].iter().sum::<u32>() as f64 / n,
            bot4_rate: hist[4..].iter().sum::<u32>() as f64 / n,
            eighth_rate: hist[7] as f64 / n,
        }
    }
}

// accessors
impl Engine {
    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }
    /// build-time label enrichment only; token ids never change
    pub fn vocab_mut(&mut self) -> &mut Vocab {
        &mut self.vocab
    }
    pub fn proxies(&self) -> &Proxies {
        &self.proxies
    }
    pub fn necessity(&self) -> &NecessityCache {
        &self.necessity
    }
    /// build-time precompute only; read-only once serving
    pub fn necessity_mut(&mut self) -> &mut NecessityCache {
        &mut self.necessity
    }
    pub fn all_players(&self) -> &RoaringBitmap {
        &self.all_players
    }
    pub fn total_matches(&self) -> u64 {
        self.total_matches
    }
    pub fn n_place(&self) -> usize {
        self.placements.len()
    }
    pub fn placement(&self, pm: PmId) -> i8 {
        self.placements[pm as usize]
    }
    pub fn stats_by_id(&self, id: TokenId) -> &TokenStats {
        &self.tokens[id]
    }
    pub fn stats_of(&self, token: &str) -> Option<&TokenStats> {
        self.vocab.id(token).map(|id| &self.tokens[id])
    }
    pub fn count(&self, token: &str) -> u32 {
        self.stats_of(token).map(|s| s.count).unwrap_or(0)
    }
    pub fn label<'a>(&'a self, token: &'a str) -> &'a str {
        match self.vocab.id(token) {
            Some(id) => self.vocab.label(id),
            None => token,
        }
    }
}

// set algebra over token membership
impl Engine {
    /// intersection of the given tokens' bitmaps. empty input yields a copy
    /// of the all-players identity; any unknown token yields the empty set.
    pub fn intersect<S: AsRef<str>>(&self, tokens: &[S]) -> RoaringBitmap {
        if tokens.is_empty() {
            return self.all_players.clone();
        }
        let mut bitmaps = Vec::with_capacity(tokens.len());
        for token in tokens {
            match self.stats_of(token.as_ref()) {
                Some(stats) => bitmaps.push(&stats.bitmap),
                None => return RoaringBitmap::new(),
            }
        }
        bitmaps.sort_by_key(|b| b.len());
        let mut result = bitmaps[0].clone();
        for bitmap in &bitmaps[1..] {
            result &= *bitmap;
            if result.is_empty() {
                break;
            }
        }
        result
    }

    /// `intersect(include) - union(exclude)`. unknown exclude tokens are
    /// silently ignored; unknown include tokens reduce the result to empty.
    pub fn filter<S: AsRef<str>>(&self, include: &[S], exclude: &[S]) -> RoaringBitmap {
        let mut base = self.intersect(include);
        if base.is_empty() || exclude.is_empty() {
            return base;
        }
        for token in exclude {
            if let Some(stats) = self.stats_of(token.as_ref()) {
                base -= &stats.bitmap;
            }
        }
        base
    }

    pub fn avg_placement(&self, bitmap: &RoaringBitmap) -> f64 {
        if bitmap.is_empty() {
            return UNIFORM_PLACEMENT;
        }
        let sum: i64 = bitmap
            .iter()
            .map(|pm| self.placements[pm as usize] as i64)
            .sum();
        sum as f64 / bitmap.len() as f64
    }

    pub fn histogram(&self, bitmap: &RoaringBitmap) -> [u32; 8] {
        let mut hist = [0u32; 8];
        for pm in bitmap.iter() {
            let p = self.placements[pm as usize];
            if (1..=8).contains(&p) {
                hist[(p - 1) as usize] += 1;
            }
        }
        hist
    }

    pub fn rates(&self, bitmap: &RoaringBitmap) -> Rates {
        Rates::from_hist(&self.histogram(bitmap))
    }

    /// delta in average placement for every candidate against the base set,
    /// skipping candidates below the sample floor
    pub fn score_candidates<S: AsRef<str>>(
        &self,
        base: &RoaringBitmap,
        candidates: &[S],
        min_sample: u64,
    ) -> Vec<Scored> {
        if base.is_empty() {
            return vec![];
        }
        let n_base = base.len();
        let avg_base = self.avg_placement(base);
        let mut scored = Vec::new();
        for token in candidates {
            let Some(stats) = self.stats_of(token.as_ref()) else {
                continue;
            };
            let with = base & &stats.bitmap;
            let n_with = with.len();
            if n_with < min_sample {
                continue;
            }
            let avg_with = self.avg_placement(&with);
            scored.push(Scored {
                token: token.as_ref().to_string(),
                delta: avg_with - avg_base,
                avg_with,
                avg_base,
                n_with,
                n_base,
            });
        }
        scored
    }

    pub fn stats(&self) -> EngineStats {
        let count = |ns: Namespace| {
            self.vocab
                .iter()
                .filter(|(_, t)| t.starts_with(ns.prefix()))
                .count()
        };
        EngineStats {
            total_matches: self.total_matches,
            total_tokens: self.vocab.len(),
            unit_tokens: count(Namespace::Unit),
            item_tokens: count(Namespace::Item),
            equipped_tokens: count(Namespace::Equipped),
            trait_tokens: count(Namespace::Trait),
            placements_size_mb: self.placements.len() as f64 / 1024.0 / 1024.0,
        }
    }
}

// token enumeration helpers
impl Engine {
    /// every token in a namespace, in id order
    pub fn tokens_in(&self, ns: Namespace) -> impl Iterator<Item = (TokenId, &str)> {
        self.vocab
            .iter()
            .filter(move |(_, t)| t.starts_with(ns.prefix()))
    }

    /// base (unqualified) tokens of a namespace: no star, tier, or copy count
    pub fn base_tokens_in(&self, ns: Namespace) -> impl Iterator<Item = (TokenId, &str)> {
        self.tokens_in(ns)
            .filter(|(_, t)| !t[2..].contains(':'))
    }

    /// equipped tokens for one unit, `E:{unit}|*`
    pub fn equipped_on<'a>(&'a self, unit: &str) -> impl Iterator<Item = (TokenId, &'a str)> {
        let prefix = format!("E:{}|", unit);
        self.vocab
            .iter()
            .filter(move |(_, t)| t.starts_with(&prefix))
    }

    /// union of `U:{unit}:{s}` for s in min_star..=6
    pub fn star_union(&self, unit: &str, min_star: u8) -> RoaringBitmap {
        let mut union = RoaringBitmap::new();
        for star in min_star..=6 {
            if let Some(stats) = self.stats_of(&format!("U:{}:{}", unit, star)) {
                union |= &stats.bitmap;
            }
        }
        union
    }
}

use super::kmeans::KMeans;
use super::matrix::FeatureMatrix;
use super::params::ClusterParams;
use crate::engine::Engine;
use crate::engine::engine::Rates;
use crate::query::Filter;
use crate::query::round_to;
use roaring::RoaringBitmap;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;

/// one feature's share inside a cluster versus the base
#[derive(Debug, Clone, Serialize)]
pub struct TokenShare {
    pub token: String,
    pub label: String,
    pub pct: f64,
    pub base_pct: f64,
    pub lift: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub size: u64,
    pub share: f64,
    pub avg_placement: f64,
    pub delta_vs_base: f64,
    pub placement_hist: [u32; 8],
    #[serde(flatten)]
    pub rates: Rates,
    pub defining_units: Vec<TokenShare>,
    pub top_units: Vec<TokenShare>,
    pub top_traits: Vec<TokenShare>,
    pub top_items: Vec<TokenShare>,
    pub signature_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BaseSummary {
    pub n: u64,
    pub avg_placement: f64,
    pub placement_hist: [u32; 8],
    #[serde(flatten)]
    pub rates: Rates,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub features_requested: usize,
    pub features_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inertia: Option<f64>,
    pub compute_ms: u64,
    pub run_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClustersResponse {
    pub cached: bool,
    pub tokens: Vec<String>,
    pub base: BaseSummary,
    pub params: ClusterParams,
    pub clusters: Vec<ClusterSummary>,
    pub meta: ClusterMeta,
}

/// per-cluster membership bitmaps, kept beside the cached report so playbook
/// queries can reuse the assignment without re-fitting
#[derive(Debug, Default)]
pub struct Memberships(pub Vec<(usize, RoaringBitmap)>);

impl Memberships {
    pub fn of(&self, cluster_id: usize) -> Option<&RoaringBitmap> {
        self.0
            .iter()
            .find(|(id, _)| *id == cluster_id)
            .map(|(_, bm)| bm)
    }
}

// signature limits per namespace
const SIGNATURE_UNITS: usize = 4;
const SIGNATURE_TRAITS: usize = 3;
const SIGNATURE_ITEMS: usize = 3;
const SIGNATURE_MIN_FREQ: f64 = 0.2;

// defining-unit thresholds
const DEFINING_BASE_FREQ: f64 = 0.01;
const DEFINING_CLUSTER_FREQ: f64 = 0.3;
const DEFINING_LIFT: f64 = 2.0;
const DEFINING_LIMIT: usize = 5;

/// partition the filtered base into comp archetypes and summarize each one
pub fn compute(
    engine: &Engine,
    filter: &Filter,
    params: &ClusterParams,
    run_id: String,
) -> (ClustersResponse, Memberships) {
    let clock = Instant::now();
    let (include, exclude) = filter.canonical();
    let base = engine.filter(&include, &exclude);
    let n_base = base.len();

    let base_hist = engine.histogram(&base);
    let mut response = ClustersResponse {
        cached: false,
        tokens: filter.tokens(),
        base: BaseSummary {
            n: n_base,
            avg_placement: round_to(engine.avg_placement(&base), 4),
            placement_hist: base_hist,
            rates: Rates::from_hist(&base_hist),
        },
        params: *params,
        clusters: vec![],
        meta: ClusterMeta {
            run_id,
            ..ClusterMeta::default()
        },
    };

    if n_base == 0 {
        response.meta.warning = Some("No matches for the current filters.".to_string());
        return (response, Memberships::default());
    }
    if n_base < (params.min_cluster_size * 2).max(params.n_clusters as u64 * 3) {
        response.meta.warning = Some(
            "Sample too small to cluster reliably. Try fewer filters or a smaller min cluster size."
                .to_string(),
        );
        return (response, Memberships::default());
    }

    let features =
        super::features::select_feature_tokens(engine, &params.features(), &HashSet::new());
    let matrix = FeatureMatrix::build(engine, &base, &features);
    response.meta.features_requested = features.len();
    response.meta.features_used = matrix.n_cols();

    if matrix.n_cols() < 2 {
        response.meta.warning = Some(
            "Not enough features in this sample (after filtering). Lower min token freq or broaden the sample."
                .to_string(),
        );
        return (response, Memberships::default());
    }

    let fit = KMeans::fit(&matrix, params.n_clusters, params.random_state);
    response.meta.inertia = Some(round_to(fit.inertia, 6));

    let sizes = fit.sizes();
    let base_avg = engine.avg_placement(&base);
    let n_features = matrix.n_cols();

    // counts of each feature per cluster, accumulated from the per-feature
    // row lists rather than by rescanning rows
    let mut per_cluster_counts = vec![vec![0u32; n_features]; fit.k()];
    for (col, rows) in matrix.rows_by_feature.iter().enumerate() {
        for &row in rows {
            per_cluster_counts[fit.labels[row as usize] as usize][col] += 1;
        }
    }

    let mut memberships = Memberships::default();
    let mut clusters = Vec::new();
    for c in 0..fit.k() {
        let size = sizes[c] as u64;
        if size < params.min_cluster_size {
            continue;
        }
        let members: RoaringBitmap = fit
            .labels
            .iter()
            .enumerate()
            .filter(|&(_, &label)| label as usize == c)
            .map(|(row, _)| matrix.base_ids[row])
            .collect();

        let hist = engine.histogram(&members);
        let avg = engine.avg_placement(&members);

        let cluster_freq: Vec<f64> = per_cluster_counts[c]
            .iter()
            .map(|&n| n as f64 / size as f64)
            .collect();
        let base_freq: Vec<f64> = matrix
            .base_counts
            .iter()
            .map(|&n| n as f64 / n_base as f64)
            .collect();
        let lift: Vec<f64> = cluster_freq
            .iter()
            .zip(&base_freq)
            .map(|(&cf, &bf)| if bf > 0.0 { cf / bf } else { 0.0 })
            .collect();

        let share_of = |col: usize| TokenShare {
            token: engine.vocab().token(matrix.kept[col]).to_string(),
            label: engine.vocab().label(matrix.kept[col]).to_string(),
            pct: round_to(cluster_freq[col], 6),
            base_pct: round_to(base_freq[col], 6),
            lift: if base_freq[col] > 0.0 {
                Some(round_to(lift[col], 6))
            } else {
                None
            },
        };

        let top_tokens = |prefix: &str| -> Vec<TokenShare> {
            let mut cols: Vec<usize> = (0..n_features)
                .filter(|&col| engine.vocab().token(matrix.kept[col]).starts_with(prefix))
                .collect();
            cols.sort_by(|&a, &b| cluster_freq[b].total_cmp(&cluster_freq[a]));
            cols.into_iter()
                .take(params.top_k_tokens)
                .map(&share_of)
                .collect()
        };

        let mut defining: Vec<usize> = (0..n_features)
            .filter(|&col| engine.vocab().token(matrix.kept[col]).starts_with("U:"))
            .filter(|&col| base_freq[col] > DEFINING_BASE_FREQ)
            .filter(|&col| cluster_freq[col] > DEFINING_CLUSTER_FREQ)
            .filter(|&col| lift[col] > DEFINING_LIFT)
            .collect();
        defining.sort_by(|&a, &b| lift[b].total_cmp(&lift[a]));
        defining.truncate(DEFINING_LIMIT);

        clusters.push(ClusterSummary {
            cluster_id: c,
            size,
            share: round_to(size as f64 / n_base as f64, 6),
            avg_placement: round_to(avg, 4),
            delta_vs_base: round_to(avg - base_avg, 4),
            placement_hist: hist,
            rates: Rates::from_hist(&hist),
            defining_units: defining.into_iter().map(&share_of).collect(),
            top_units: top_tokens("U:"),
            top_traits: top_tokens("T:"),
            top_items: top_tokens("I:"),
            signature_tokens: signature(engine, &matrix, &cluster_freq, &base_freq),
        });
        memberships.0.push((c, members));
    }

    clusters.sort_by(|a, b| {
        a.avg_placement
            .total_cmp(&b.avg_placement)
            .then(b.size.cmp(&a.size))
    });
    response.clusters = clusters;
    response.meta.compute_ms = clock.elapsed().as_millis() as u64;
    (response, memberships)
}

/// concise "what is this comp?" tokens: per namespace, the top scorers by
/// freq * log2(lift), subject to a minimum in-cluster frequency
pub fn signature(
    engine: &Engine,
    matrix: &FeatureMatrix,
    cluster_freq: &[f64],
    base_freq: &[f64],
) -> Vec<String> {
    let eps = 1e-9;
    let score: Vec<f64> = cluster_freq
        .iter()
        .zip(base_freq)
        .map(|(&cf, &bf)| cf * (cf / bf.max(eps)).max(1.0).log2())
        .collect();

    let pick = |prefix: &str, k: usize| -> Vec<String> {
        let mut cols: Vec<usize> = (0..matrix.n_cols())
            .filter(|&col| engine.vocab().token(matrix.kept[col]).starts_with(prefix))
            .collect();
        cols.sort_by(|&a, &b| score[b].total_cmp(&score[a]));
        cols.into_iter()
            .filter(|&col| cluster_freq[col] >= SIGNATURE_MIN_FREQ)
            .take(k)
            .map(|col| engine.vocab().token(matrix.kept[col]).to_string())
            .collect()
    };

    let mut tokens = pick("U:", SIGNATURE_UNITS);
    tokens.extend(pick("T:", SIGNATURE_TRAITS));
    tokens.extend(pick("I:", SIGNATURE_ITEMS));

    let mut seen = HashSet::new();
    tokens.retain(|t| seen.insert(t.clone()));
    tokens
}

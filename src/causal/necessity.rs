use super::aipw;
use super::aipw::AipwConfig;
use super::aipw::AipwFit;
use super::aipw::Overlap;
use super::design;
use super::design::Design;
use super::outcome::Outcome;
use super::outcome::OutcomeKind;
use crate::AIPW_MAX_ROWS;
use crate::AIPW_PRECOMPUTE_CLIP_EPS;
use crate::NECESSITY_MIN_GROUP;
use crate::NECESSITY_MIN_TOKEN_FREQ;
use crate::NECESSITY_SPLITS;
use crate::SCOPE_STAR2_MIN_ROWS;
use crate::SCOPE_STAR2_SHARE;
use crate::TokenId;
use crate::cluster::FeatureMatrix;
use crate::cluster::FeatureParams;
use crate::cluster::features::select_feature_tokens;
use crate::engine::Engine;
use crate::engine::necessity::StoredNecessity;
use crate::error::Error;
use crate::query::Filter;
use crate::query::round_to;
use crate::tokens::Token;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use roaring::RoaringBitmap;
use serde::Serialize;
use std::collections::HashSet;

/// the client-facing shape of one necessity estimate, shared by the cached,
/// on-demand, and stratified paths
#[derive(Debug, Clone, Serialize)]
pub struct NecessityView {
    pub method: &'static str,
    pub outcome: &'static str,
    pub tau: f64,
    pub ci95_low: Option<f64>,
    pub ci95_high: Option<f64>,
    pub se: Option<f64>,
    pub p_value: Option<f64>,
    pub raw_tau: Option<f64>,
    pub n_treated: u64,
    pub n_control: u64,
    pub n_used: u64,
    pub frac_trimmed: Option<f64>,
    pub e_p01: Option<f64>,
    pub e_p50: Option<f64>,
    pub e_p99: Option<f64>,
    pub risk_ratio: Option<f64>,
    pub e_value: Option<f64>,
    pub scope_min_star: Option<u8>,
    pub warnings: Vec<String>,
}

/// standard warning policy for overlap diagnostics
pub fn overlap_warnings(frac_trimmed: f64, e_p01: f64, e_p99: f64) -> Vec<String> {
    let mut warnings = Vec::new();
    if frac_trimmed > 0.5 {
        warnings
            .push("Low overlap: large fraction of samples trimmed by propensity bounds.".to_string());
    }
    if e_p01 < 0.02 || e_p99 > 0.98 {
        warnings.push(
            "Positivity warning: propensity is near 0/1 in parts of X (effect may be unstable)."
                .to_string(),
        );
    }
    warnings
}

/// the feature pool for necessity models: base units plus base and tiered
/// traits; never items or equipped tokens, which would leak the treatment
pub fn necessity_features(min_token_freq: u32) -> FeatureParams {
    FeatureParams {
        use_units: true,
        use_traits: true,
        use_items: false,
        use_equipped: false,
        include_star_units: false,
        include_tier_traits: true,
        min_token_freq,
    }
}

/// restrict a unit's base to 2-star-plus boards when those dominate the
/// sample. returns the chosen minimum star scope and the (possibly
/// restricted) base.
pub fn auto_scope(engine: &Engine, unit: &str, base: &RoaringBitmap) -> (u8, RoaringBitmap) {
    let star2 = engine.star_union(unit, 2);
    if star2.is_empty() || base.is_empty() {
        return (1, base.clone());
    }
    let n_all = base.len();
    let scoped = base & &star2;
    let n_scoped = scoped.len();
    if n_scoped as usize >= SCOPE_STAR2_MIN_ROWS
        && n_scoped as f64 / n_all as f64 >= SCOPE_STAR2_SHARE
    {
        (2, scoped)
    } else {
        (1, base.clone())
    }
}

/// a cached estimate, shaped for responses
pub fn view_from_cache(engine: &Engine, token_id: TokenId) -> Option<NecessityView> {
    let stored = engine.necessity().get(token_id)?;
    let rr = risk_ratio_from_raw(stored.tau as f64, stored.raw_tau as f64);
    Some(NecessityView {
        method: "aipw",
        outcome: Outcome::Top4.name(),
        tau: round_to(stored.tau as f64, 6),
        ci95_low: finite(stored.ci95_low as f64),
        ci95_high: finite(stored.ci95_high as f64),
        se: finite(stored.se as f64),
        p_value: None,
        raw_tau: finite(stored.raw_tau as f64),
        n_treated: stored.n_treated.max(0) as u64,
        n_control: stored.n_control.max(0) as u64,
        n_used: stored.n_used.max(0) as u64,
        frac_trimmed: finite(stored.frac_trimmed as f64),
        e_p01: finite(stored.e_p01 as f64),
        e_p50: None,
        e_p99: finite(stored.e_p99 as f64),
        risk_ratio: rr,
        e_value: rr.and_then(aipw::e_value).map(|v| round_to(v, 6)),
        scope_min_star: Some(stored.scope_min_star).filter(|&s| s > 0),
        warnings: overlap_warnings(
            stored.frac_trimmed as f64,
            stored.e_p01 as f64,
            stored.e_p99 as f64,
        ),
    })
}

// the risk ratio is not stored in the cache; nothing to derive it from
fn risk_ratio_from_raw(_tau: f64, _raw_tau: f64) -> Option<f64> {
    None
}

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then(|| round_to(x, 6))
}

/// build-time job: fit the AIPW for every `E:unit|item` whose treated and
/// control groups clear the floor, under the unit's auto-scope, and store the
/// estimates into the per-token arrays. units fan out across the thread pool.
pub fn precompute(engine: &mut Engine) {
    let pool = select_feature_tokens(
        engine,
        &necessity_features(NECESSITY_MIN_TOKEN_FREQ),
        &HashSet::new(),
    );
    let mut units: Vec<(TokenId, String)> = engine
        .base_tokens_in(crate::tokens::Namespace::Unit)
        .map(|(id, t)| (id, t.to_string()))
        .collect();
    units.sort_by(|a, b| a.1.cmp(&b.1));

    log::info!("{:<32}{} units", "precomputing necessity cache", units.len());
    let progress = crate::progress(units.len());
    let shared: &Engine = engine;
    let results: Vec<(TokenId, StoredNecessity)> = units
        .par_iter()
        .flat_map(|(unit_id, unit_token)| {
            let stored = precompute_unit(shared, *unit_id, unit_token, &pool);
            progress.inc(1);
            stored
        })
        .collect();
    progress.finish_and_clear();

    log::info!("{:<32}{} estimates", "necessity cache populated", results.len());
    for (token_id, stored) in results {
        engine.necessity.set(token_id, stored);
    }
}

fn precompute_unit(
    engine: &Engine,
    unit_id: TokenId,
    unit_token: &str,
    pool: &[TokenId],
) -> Vec<(TokenId, StoredNecessity)> {
    let unit = &unit_token[2..];
    let base_full = engine.stats_by_id(unit_id).bitmap.clone();
    if base_full.is_empty() {
        return vec![];
    }
    let (scope_min_star, base_full) = auto_scope(engine, unit, &base_full);
    let n_base_full = base_full.len();
    if (n_base_full as usize) < 500.max(NECESSITY_MIN_GROUP * 3) {
        return vec![];
    }

    let base_model = design::subsample(&base_full, AIPW_MAX_ROWS, 42);
    let features: Vec<TokenId> = pool.iter().copied().filter(|&id| id != unit_id).collect();
    let matrix = FeatureMatrix::build(engine, &base_model, &features);
    let y = design::outcome_vector(engine, &matrix, Outcome::Top4);
    let x = Design::new(engine, matrix, Some(unit));

    let cfg = AipwConfig {
        n_splits: NECESSITY_SPLITS,
        seed: 42,
        clip_eps: AIPW_PRECOMPUTE_CLIP_EPS,
        ..AipwConfig::default()
    };

    let equipped: Vec<TokenId> = engine
        .equipped_on(unit)
        .filter(|(_, t)| matches!(Token::try_from(*t), Ok(Token::Equipped(..))))
        .map(|(id, _)| id)
        .collect();

    let mut out = Vec::new();
    for eq_id in equipped {
        let eq_bitmap = &engine.stats_by_id(eq_id).bitmap;
        let treated_full = &base_full & eq_bitmap;
        let n_treated_full = treated_full.len();
        let n_control_full = n_base_full - n_treated_full;
        if (n_treated_full as usize) < NECESSITY_MIN_GROUP
            || (n_control_full as usize) < NECESSITY_MIN_GROUP
        {
            continue;
        }

        let t = design::treatment_vector(&x.sparse, eq_bitmap);
        let n_treated_model = t.iter().filter(|&&v| v == 1).count();
        let n_control_model = t.len() - n_treated_model;
        if n_treated_model < NECESSITY_MIN_GROUP || n_control_model < NECESSITY_MIN_GROUP {
            continue;
        }

        let raw_tau = raw_difference(&t, &y);
        let Ok(fit) = aipw::aipw_ate(&x, &t, &y, OutcomeKind::Binary, &cfg) else {
            continue;
        };
        let est = fit.estimate;
        out.push((
            eq_id,
            StoredNecessity {
                tau: est.tau as f32,
                ci95_low: est.ci95_low as f32,
                ci95_high: est.ci95_high as f32,
                se: est.se as f32,
                raw_tau: raw_tau as f32,
                frac_trimmed: est.overlap.frac_trimmed as f32,
                e_p01: est.overlap.e_p01 as f32,
                e_p99: est.overlap.e_p99 as f32,
                n_treated: n_treated_full as i32,
                n_control: n_control_full as i32,
                n_used: est.overlap.n_used as i32,
                scope_min_star,
            },
        ));
    }
    out
}

/// naive treated-minus-control difference in means
pub fn raw_difference(t: &[u8], y: &[f32]) -> f64 {
    let (mut s1, mut n1, mut s0, mut n0) = (0f64, 0usize, 0f64, 0usize);
    for (&ti, &yi) in t.iter().zip(y) {
        if ti == 1 {
            s1 += yi as f64;
            n1 += 1;
        } else {
            s0 += yi as f64;
            n0 += 1;
        }
    }
    if n1 == 0 || n0 == 0 {
        return f64::NAN;
    }
    s1 / n1 as f64 - s0 / n0 as f64
}

// ---------------------------------------------------------------------------
// full on-demand estimate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct NecessityOptions {
    pub outcome: Outcome,
    pub n_splits: usize,
    pub max_rows: usize,
    pub min_token_freq: u32,
    pub overlap_min: f64,
    pub overlap_max: f64,
    pub by_cluster: bool,
    pub n_clusters: usize,
}

impl Default for NecessityOptions {
    fn default() -> Self {
        Self {
            outcome: Outcome::Top4,
            n_splits: 2,
            max_rows: AIPW_MAX_ROWS,
            min_token_freq: 25,
            overlap_min: crate::AIPW_TRIM_LOW,
            overlap_max: crate::AIPW_TRIM_HIGH,
            by_cluster: false,
            n_clusters: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupRates {
    pub avg_placement: f64,
    pub top4_rate: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreatmentSummary {
    pub token: String,
    pub n_treated: u64,
    pub n_control: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treated: Option<GroupRates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<GroupRates>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectView {
    pub method: &'static str,
    pub outcome: &'static str,
    pub kind: &'static str,
    pub tau: f64,
    pub ci95_low: Option<f64>,
    pub ci95_high: Option<f64>,
    pub se: Option<f64>,
    pub p_value: Option<f64>,
    pub raw_tau: f64,
    pub y1: f64,
    pub y0: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverlapView {
    pub n_used: u64,
    pub frac_trimmed: f64,
    pub e_min: f64,
    pub e_p01: f64,
    pub e_p50: f64,
    pub e_p99: f64,
    pub e_max: f64,
    pub bounds: [f64; 2],
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureCounts {
    pub n_rows_modeled: u64,
    pub n_token_features: usize,
    pub n_proxy_features: usize,
    pub min_token_freq: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sensitivity {
    pub risk_ratio: Option<f64>,
    pub e_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CateCluster {
    pub cluster_id: usize,
    pub size: u64,
    pub n_used: u64,
    pub share: f64,
    pub tau: f64,
    pub se: Option<f64>,
    pub ci95_low: Option<f64>,
    pub ci95_high: Option<f64>,
    pub e_p10: f64,
    pub e_p50: f64,
    pub e_p90: f64,
    pub signature_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NecessityResponse {
    pub unit: String,
    pub item: String,
    pub filters: Vec<String>,
    pub base: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_min_star: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatment: Option<TreatmentSummary>,
    pub effect: Option<EffectView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlap: Option<OverlapView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<Sensitivity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cate_by_cluster: Option<Vec<CateCluster>>,
}

/// full AIPW estimate of equipping `item` on `unit` within a filter context.
/// overlap failures and small samples come back as responses with
/// `effect: null` and diagnostics, never as errors.
pub fn item_necessity(
    engine: &Engine,
    unit: &str,
    item: &str,
    filter: &Filter,
    opts: &NecessityOptions,
) -> Result<NecessityResponse, Error> {
    let unit_token = format!("U:{}", unit);
    let eq_token = format!("E:{}|{}", unit, item);
    let item_token = format!("I:{}", item);

    if engine.vocab().id(&unit_token).is_none() {
        return Err(Error::UnknownToken(unit_token));
    }
    let Some(eq_id) = engine.vocab().id(&eq_token) else {
        return Err(Error::UnknownToken(eq_token));
    };

    let mut respond = NecessityResponse {
        unit: unit.to_string(),
        item: item.to_string(),
        filters: filter.tokens(),
        base: serde_json::json!({ "n": 0 }),
        scope_min_star: None,
        treatment: None,
        effect: None,
        overlap: None,
        features: None,
        sensitivity: None,
        warning: None,
        warnings: vec![],
        cate_by_cluster: None,
    };

    let mut include = vec![unit_token.clone()];
    include.extend(filter.include.iter().cloned());
    let base = engine.filter(&include, &filter.exclude);

    // auto-scope unless the caller already filtered the unit's stars
    let star_prefix = format!("U:{}:", unit);
    let caller_scoped = filter.include.iter().any(|t| t.starts_with(&star_prefix));
    let (scope_min_star, base) = if caller_scoped {
        (1, base)
    } else {
        auto_scope(engine, unit, &base)
    };
    respond.scope_min_star = Some(scope_min_star);

    let n_base = base.len();
    if n_base == 0 {
        respond.warning = Some("No matches for the current filters.".to_string());
        return Ok(respond);
    }

    let treated_full = &base & &engine.stats_by_id(eq_id).bitmap;
    let n_treated = treated_full.len();
    let n_control = n_base - n_treated;
    respond.base = serde_json::json!({ "n": n_base });
    respond.treatment = Some(TreatmentSummary {
        token: eq_token.clone(),
        n_treated,
        n_control,
        treated: None,
        control: None,
    });
    if n_treated < 50 || n_control < 50 {
        respond.warning =
            Some("Insufficient overlap/sample size for a reliable causal estimate.".to_string());
        return Ok(respond);
    }

    let base_model = design::stratified_subsample(&base, &treated_full, opts.max_rows, 42);
    let exclude: HashSet<&str> = [unit_token.as_str(), eq_token.as_str(), item_token.as_str()]
        .into_iter()
        .collect();
    let features = select_feature_tokens(engine, &necessity_features(opts.min_token_freq), &exclude);
    let matrix = FeatureMatrix::build(engine, &base_model, &features);
    let n_token_features = matrix.n_cols();
    let y = design::outcome_vector(engine, &matrix, opts.outcome);
    let t = design::treatment_vector(&matrix, &treated_full);
    let x = Design::new(engine, matrix, Some(unit));

    let rates_of = |mask: Option<u8>| -> GroupRates {
        let rows: Vec<usize> = (0..x.n_rows())
            .filter(|&i| mask.map(|m| t[i] == m).unwrap_or(true))
            .collect();
        let placements: Vec<f64> = rows
            .iter()
            .map(|&i| engine.placement(x.sparse.base_ids[i]) as f64)
            .collect();
        let n = placements.len().max(1) as f64;
        GroupRates {
            avg_placement: round_to(placements.iter().sum::<f64>() / n, 6),
            top4_rate: round_to(
                placements.iter().filter(|&&p| p <= 4.0).count() as f64 / n,
                6,
            ),
            win_rate: round_to(
                placements.iter().filter(|&&p| p == 1.0).count() as f64 / n,
                6,
            ),
        }
    };
    let base_rates = rates_of(None);
    respond.base = serde_json::json!({
        "n": n_base,
        "avg_placement": base_rates.avg_placement,
        "top4_rate": base_rates.top4_rate,
        "win_rate": base_rates.win_rate,
    });
    respond.treatment = Some(TreatmentSummary {
        token: eq_token.clone(),
        n_treated,
        n_control,
        treated: Some(rates_of(Some(1))),
        control: Some(rates_of(Some(0))),
    });
    respond.features = Some(FeatureCounts {
        n_rows_modeled: x.n_rows() as u64,
        n_token_features,
        n_proxy_features: x.n_dense(),
        min_token_freq: opts.min_token_freq,
    });

    let cfg = AipwConfig {
        n_splits: opts.n_splits,
        seed: 42,
        clip_eps: AIPW_PRECOMPUTE_CLIP_EPS,
        trim_low: opts.overlap_min,
        trim_high: opts.overlap_max,
    };
    let kind = opts.outcome.kind();
    let raw_tau = raw_difference(&t, &y);

    let fit = match aipw::aipw_ate(&x, &t, &y, kind, &cfg) {
        Ok(fit) => fit,
        Err(overlap) => {
            respond.warning = Some(
                "Insufficient propensity overlap after trimming; effect is not reliably identifiable in this context."
                    .to_string(),
            );
            respond.overlap = Some(overlap_view(&overlap, opts));
            return Ok(respond);
        }
    };

    let est = fit.estimate;
    respond.effect = Some(EffectView {
        method: "aipw",
        outcome: opts.outcome.name(),
        kind: match kind {
            OutcomeKind::Binary => "binary",
            OutcomeKind::Continuous => "continuous",
        },
        tau: round_to(est.tau, 6),
        ci95_low: finite(est.ci95_low),
        ci95_high: finite(est.ci95_high),
        se: finite(est.se),
        p_value: est.p_value.map(|p| round_to(p, 6)),
        raw_tau: round_to(raw_tau, 6),
        y1: round_to(est.y1, 6),
        y0: round_to(est.y0, 6),
    });
    respond.overlap = Some(overlap_view(&est.overlap, opts));
    respond.warnings = overlap_warnings(
        est.overlap.frac_trimmed,
        est.overlap.e_p01,
        est.overlap.e_p99,
    );
    if kind == OutcomeKind::Binary && est.y0 > 0.0 && est.y0.is_finite() && est.y1.is_finite() {
        let rr = est.y1 / est.y0;
        respond.sensitivity = Some(Sensitivity {
            risk_ratio: finite(rr),
            e_value: aipw::e_value(rr).map(|v| round_to(v, 6)),
        });
    }

    if opts.by_cluster && x.n_rows() >= 2_000 && n_token_features >= 10 {
        respond.cate_by_cluster = Some(cate_by_cluster(engine, &x, &fit, opts.n_clusters));
    }
    Ok(respond)
}

fn overlap_view(overlap: &Overlap, opts: &NecessityOptions) -> OverlapView {
    OverlapView {
        n_used: overlap.n_used as u64,
        frac_trimmed: round_to(overlap.frac_trimmed, 6),
        e_min: round_to(overlap.e_min, 6),
        e_p01: round_to(overlap.e_p01, 6),
        e_p50: round_to(overlap.e_p50, 6),
        e_p99: round_to(overlap.e_p99, 6),
        e_max: round_to(overlap.e_max, 6),
        bounds: [opts.overlap_min, opts.overlap_max],
    }
}

/// coarse CATE map: cluster the token block into archetypes and summarize
/// the influence values within each
fn cate_by_cluster(
    engine: &Engine,
    x: &Design,
    fit: &AipwFit,
    n_clusters: usize,
) -> Vec<CateCluster> {
    use crate::cluster::KMeans;
    let n = x.n_rows();
    let kmeans = KMeans::fit(&x.sparse, n_clusters, 42);
    let sizes = kmeans.sizes();
    let base_freq: Vec<f64> = x
        .sparse
        .base_counts
        .iter()
        .map(|&c| c as f64 / n as f64)
        .collect();

    let mut out = Vec::new();
    for c in 0..kmeans.k() {
        let size = sizes[c] as u64;
        if size < 250 {
            continue;
        }
        let in_c: Vec<usize> = (0..n)
            .filter(|&i| kmeans.labels[i] as usize == c)
            .collect();
        let used_c: Vec<usize> = in_c.iter().copied().filter(|&i| fit.used[i]).collect();
        if used_c.len() < 200 {
            continue;
        }

        let phi_c: Vec<f64> = used_c.iter().map(|&i| fit.phi[i]).collect();
        let tau = phi_c.iter().sum::<f64>() / phi_c.len() as f64;
        let se = aipw::stdev(&phi_c) / (phi_c.len() as f64).sqrt();
        let mut e_c: Vec<f64> = in_c.iter().map(|&i| fit.e[i]).collect();
        e_c.sort_by(f64::total_cmp);

        let mut cluster_counts = vec![0u32; x.sparse.n_cols()];
        for (col, rows) in x.sparse.rows_by_feature.iter().enumerate() {
            cluster_counts[col] = rows
                .iter()
                .filter(|&&row| kmeans.labels[row as usize] as usize == c)
                .count() as u32;
        }
        let cluster_freq: Vec<f64> = cluster_counts
            .iter()
            .map(|&v| v as f64 / size as f64)
            .collect();

        out.push(CateCluster {
            cluster_id: c,
            size,
            n_used: used_c.len() as u64,
            share: round_to(size as f64 / n as f64, 6),
            tau: round_to(tau, 6),
            se: finite(se),
            ci95_low: finite(tau - 1.96 * se),
            ci95_high: finite(tau + 1.96 * se),
            e_p10: round_to(aipw::quantile(&e_c, 0.10), 6),
            e_p50: round_to(aipw::quantile(&e_c, 0.50), 6),
            e_p90: round_to(aipw::quantile(&e_c, 0.90), 6),
            signature_tokens: crate::cluster::summary::signature(
                engine,
                &x.sparse,
                &cluster_freq,
                &base_freq,
            ),
        });
    }
    out.sort_by(|a, b| b.size.cmp(&a.size).then(a.tau.abs().total_cmp(&b.tau.abs())));
    out.truncate(12);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_difference_is_group_mean_gap() {
        let t = vec![1, 1, 0, 0];
        let y = vec![1.0, 0.0, 0.0, 0.0];
        assert!((raw_difference(&t, &y) - 0.5).abs() < 1e-12);
    }
}

use super::aipw;
use super::design;
use super::necessity::NecessityView;
use super::necessity::necessity_features;
use super::necessity::overlap_warnings;
use super::outcome::Outcome;
use crate::AIPW_MAX_ROWS;
use crate::AIPW_TRIM_HIGH;
use crate::AIPW_TRIM_LOW;
use crate::AIPW_USED_MIN_GROUP;
use crate::STRATA_MAX_CLUSTERS;
use crate::STRATA_MIN_CLUSTER_GROUP;
use crate::STRATA_ROWS_PER_CLUSTER;
use crate::TokenId;
use crate::cluster::FeatureMatrix;
use crate::cluster::KMeans;
use crate::cluster::features::select_feature_tokens;
use crate::engine::Engine;
use crate::query::round_to;
use roaring::RoaringBitmap;
use std::collections::HashSet;

/// cluster-adjusted fast approximation for ranking many treatments in one
/// filtered context. instead of a model per item, the base is stratified
/// into comp archetypes once; each candidate's effect is the size-weighted
/// mean of within-stratum treated/control differences, with per-stratum
/// group floors and treated-share bounds standing in for propensity
/// trimming. the identifiability gate and warning policy match the full
/// estimator.
pub struct Strata {
    matrix: FeatureMatrix,
    /// per stratum: row indices
    members: Vec<Vec<u32>>,
    /// outcome values aligned to matrix rows
    y: Vec<f32>,
}

impl Strata {
    /// None when the base is too small to stratify
    pub fn fit(
        engine: &Engine,
        base: &RoaringBitmap,
        outcome: Outcome,
        min_token_freq: u32,
        seed: u64,
    ) -> Option<Self> {
        let base_model = design::subsample(base, AIPW_MAX_ROWS, seed);
        let n = base_model.len() as usize;
        let k = STRATA_MAX_CLUSTERS.min(n / STRATA_ROWS_PER_CLUSTER);
        if k < 2 {
            return None;
        }
        let features = select_feature_tokens(
            engine,
            &necessity_features(min_token_freq),
            &HashSet::new(),
        );
        let matrix = FeatureMatrix::build(engine, &base_model, &features);
        if matrix.n_cols() < 2 {
            return None;
        }
        let fit = KMeans::fit(&matrix, k, seed);
        let mut members = vec![Vec::new(); fit.k()];
        for (row, &label) in fit.labels.iter().enumerate() {
            members[label as usize].push(row as u32);
        }
        let y = design::outcome_vector(engine, &matrix, outcome);
        Some(Self { matrix, members, y })
    }

    pub fn n_rows(&self) -> usize {
        self.matrix.n_rows()
    }

    /// stratified estimate for one treatment token, or None when the gate
    /// refuses a point estimate
    pub fn estimate(&self, engine: &Engine, treatment: TokenId, outcome: Outcome) -> Option<NecessityView> {
        let n = self.n_rows();
        let treated_rows: Vec<u32> = {
            let bitmap = &engine.stats_by_id(treatment).bitmap;
            let mut rows: Vec<u32> = Vec::new();
            let base: &[crate::PmId] = &self.matrix.base_ids;
            for pm in bitmap.iter() {
                if let Ok(row) = base.binary_search(&pm) {
                    rows.push(row as u32);
                }
            }
            rows
        };
        let mut treated_mask = vec![false; n];
        for &row in &treated_rows {
            treated_mask[row as usize] = true;
        }

        // per-stratum treated/control moments
        struct Stratum {
            size: f64,
            n1: usize,
            n0: usize,
            m1: f64,
            m0: f64,
            v1: f64,
            v0: f64,
            e: f64,
        }
        let mut strata: Vec<Stratum> = Vec::new();
        for rows in &self.members {
            let (mut s1, mut q1, mut n1) = (0f64, 0f64, 0usize);
            let (mut s0, mut q0, mut n0) = (0f64, 0f64, 0usize);
            for &row in rows {
                let yi = self.y[row as usize] as f64;
                if treated_mask[row as usize] {
                    s1 += yi;
                    q1 += yi * yi;
                    n1 += 1;
                } else {
                    s0 += yi;
                    q0 += yi * yi;
                    n0 += 1;
                }
            }
            if n1 == 0 && n0 == 0 {
                continue;
            }
            let m1 = if n1 > 0 { s1 / n1 as f64 } else { 0.0 };
            let m0 = if n0 > 0 { s0 / n0 as f64 } else { 0.0 };
            let v1 = if n1 > 1 {
                (q1 - s1 * s1 / n1 as f64) / (n1 - 1) as f64
            } else {
                0.0
            };
            let v0 = if n0 > 1 {
                (q0 - s0 * s0 / n0 as f64) / (n0 - 1) as f64
            } else {
                0.0
            };
            strata.push(Stratum {
                size: (n1 + n0) as f64,
                n1,
                n0,
                m1,
                m0,
                v1,
                v0,
                e: n1 as f64 / (n1 + n0) as f64,
            });
        }

        let qualifying: Vec<&Stratum> = strata
            .iter()
            .filter(|s| s.n1 >= STRATA_MIN_CLUSTER_GROUP && s.n0 >= STRATA_MIN_CLUSTER_GROUP)
            .filter(|s| s.e >= AIPW_TRIM_LOW && s.e <= AIPW_TRIM_HIGH)
            .collect();
        if qualifying.is_empty() {
            return None;
        }

        let weight: f64 = qualifying.iter().map(|s| s.size).sum();
        let n_used: usize = qualifying.iter().map(|s| s.n1 + s.n0).sum();
        let n_treated_used: usize = qualifying.iter().map(|s| s.n1).sum();
        let n_control_used: usize = qualifying.iter().map(|s| s.n0).sum();

        // same identifiability gate as the full estimator
        if n_used < 200.max((0.05 * n as f64) as usize)
            || n_treated_used < AIPW_USED_MIN_GROUP
            || n_control_used < AIPW_USED_MIN_GROUP
        {
            return None;
        }

        let tau: f64 = qualifying
            .iter()
            .map(|s| s.size * (s.m1 - s.m0))
            .sum::<f64>()
            / weight;
        let var: f64 = qualifying
            .iter()
            .map(|s| s.size * s.size * (s.v1 / s.n1 as f64 + s.v0 / s.n0 as f64))
            .sum::<f64>()
            / (weight * weight);
        let se = var.sqrt();
        let frac_trimmed = 1.0 - n_used as f64 / n as f64;

        // weighted propensity quantiles over qualifying strata
        let mut spread: Vec<(f64, f64)> = qualifying.iter().map(|s| (s.e, s.size)).collect();
        spread.sort_by(|a, b| a.0.total_cmp(&b.0));
        let e_q = |q: f64| -> f64 {
            let target = q * weight;
            let mut cumulative = 0.0;
            for &(e, w) in &spread {
                cumulative += w;
                if cumulative >= target {
                    return e;
                }
            }
            spread.last().map(|&(e, _)| e).unwrap_or(f64::NAN)
        };
        let (e_p01, e_p50, e_p99) = (e_q(0.01), e_q(0.50), e_q(0.99));

        let raw_tau = {
            let (mut s1, mut n1, mut s0, mut n0) = (0f64, 0usize, 0f64, 0usize);
            for row in 0..n {
                let yi = self.y[row] as f64;
                if treated_mask[row] {
                    s1 += yi;
                    n1 += 1;
                } else {
                    s0 += yi;
                    n0 += 1;
                }
            }
            if n1 > 0 && n0 > 0 {
                Some(round_to(s1 / n1 as f64 - s0 / n0 as f64, 6))
            } else {
                None
            }
        };

        Some(NecessityView {
            method: "stratified",
            outcome: outcome.name(),
            tau: round_to(tau, 6),
            ci95_low: Some(round_to(tau - 1.96 * se, 6)),
            ci95_high: Some(round_to(tau + 1.96 * se, 6)),
            se: Some(round_to(se, 6)),
            p_value: if se > 0.0 {
                Some(round_to(aipw::two_sided_p(tau / se), 6))
            } else {
                None
            },
            raw_tau,
            n_treated: treated_rows.len() as u64,
            n_control: (n - treated_rows.len()) as u64,
            n_used: n_used as u64,
            frac_trimmed: Some(round_to(frac_trimmed, 6)),
            e_p01: Some(round_to(e_p01, 6)),
            e_p50: Some(round_to(e_p50, 6)),
            e_p99: Some(round_to(e_p99, 6)),
            risk_ratio: None,
            e_value: None,
            scope_min_star: None,
            warnings: overlap_warnings(frac_trimmed, e_p01, e_p99),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Builder;
    use crate::engine::row::PlayerMatchRow;
    use crate::engine::row::UnitRow;

    /// a population with a genuine within-stratum top-4 effect for an item
    fn effectful_engine(n: usize) -> Engine {
        let mut builder = Builder::new();
        for i in 0..n {
            let comp = if i % 2 == 0 { ["A", "B"] } else { ["C", "D"] };
            let treated = i % 4 < 2;
            // treated boards place two spots better on average
            let placement = if treated { (i % 4 + 1) as i8 } else { (i % 4 + 4) as i8 };
            let items: Vec<String> = if treated {
                vec!["Deathblade".to_string()]
            } else {
                vec![]
            };
            builder.witness(&PlayerMatchRow {
                placement,
                units: comp
                    .iter()
                    .enumerate()
                    .map(|(slot, u)| UnitRow {
                        name: u.to_string(),
                        tier: 1,
                        rarity: 0,
                        items: if slot == 0 { items.clone() } else { vec![] },
                    })
                    .collect(),
                traits: vec![],
            });
        }
        builder.seal()
    }

    #[test]
    fn positive_effect_is_detected() {
        let engine = effectful_engine(4_000);
        let strata = Strata::fit(
            &engine,
            engine.all_players(),
            Outcome::Top4,
            1,
            42,
        )
        .expect("large enough base");
        let item = engine.vocab().id("I:Deathblade").unwrap();
        let view = strata
            .estimate(&engine, item, Outcome::Top4)
            .expect("identifiable");
        assert!(view.tau > 0.1, "tau = {}", view.tau);
        assert!(view.n_used > 0);
    }

    #[test]
    fn tiny_base_refuses_to_stratify() {
        let engine = effectful_engine(100);
        assert!(Strata::fit(&engine, engine.all_players(), Outcome::Top4, 1, 42).is_none());
    }
}

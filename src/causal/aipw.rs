use super::design::Design;
use super::learner::Model;
use super::learner::Sgd;
use super::outcome::OutcomeKind;
use crate::AIPW_CLIP_EPS;
use crate::AIPW_FOLD_MIN_GROUP;
use crate::AIPW_TRIM_HIGH;
use crate::AIPW_TRIM_LOW;
use crate::AIPW_USED_MIN_GROUP;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct AipwConfig {
    pub n_splits: usize,
    pub seed: u64,
    pub clip_eps: f64,
    pub trim_low: f64,
    pub trim_high: f64,
}

impl Default for AipwConfig {
    fn default() -> Self {
        Self {
            n_splits: 2,
            seed: 42,
            clip_eps: AIPW_CLIP_EPS,
            trim_low: AIPW_TRIM_LOW,
            trim_high: AIPW_TRIM_HIGH,
        }
    }
}

/// overlap diagnostics. returned with every estimate, and alone when the
/// effect is not identifiable after trimming.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Overlap {
    pub n: usize,
    pub n_used: usize,
    pub n_treated_used: usize,
    pub n_control_used: usize,
    pub trim_low: f64,
    pub trim_high: f64,
    pub e_min: f64,
    pub e_p01: f64,
    pub e_p50: f64,
    pub e_p99: f64,
    pub e_max: f64,
    pub frac_trimmed: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AipwEstimate {
    pub tau: f64,
    pub se: f64,
    pub ci95_low: f64,
    pub ci95_high: f64,
    pub p_value: Option<f64>,
    pub y1: f64,
    pub y0: f64,
    pub n: usize,
    pub n_treated: usize,
    pub n_control: usize,
    #[serde(flatten)]
    pub overlap: Overlap,
}

/// the full fit: point estimate plus per-row influence values, propensities,
/// and the trimmed-in mask, for downstream CATE summaries
#[derive(Debug, Clone)]
pub struct AipwFit {
    pub estimate: AipwEstimate,
    pub phi: Vec<f64>,
    pub e: Vec<f64>,
    pub used: Vec<bool>,
}

/// doubly-robust ATE with K-fold cross-fitting.
///
/// per held-out fold, a propensity model e(X) and outcome models mu1/mu0 are
/// fit on the remaining folds; predictions are clipped, trimmed by the
/// propensity bounds, and combined through the influence function
///   phi = (mu1 - mu0) + T(y - mu1)/e - (1 - T)(y - mu0)/(1 - e).
/// an identifiability gate refuses a point estimate when trimming leaves too
/// little of either group.
pub fn aipw_ate(
    x: &Design,
    t: &[u8],
    y: &[f32],
    kind: OutcomeKind,
    cfg: &AipwConfig,
) -> Result<AipwFit, Overlap> {
    let n = y.len();
    assert!(n == t.len() && n == x.n_rows());
    assert!(n > 0, "empty sample");

    let n_treated = t.iter().filter(|&&v| v == 1).count();
    let n_control = n - n_treated;
    assert!(
        n_treated > 0 && n_control > 0,
        "need both treated and control samples"
    );

    let n_splits = cfg.n_splits.clamp(2, 5.min(n));
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    order.shuffle(&mut rng);

    let mut e_hat = vec![0f64; n];
    let mut mu1_hat = vec![0f64; n];
    let mut mu0_hat = vec![0f64; n];

    let fold_size = n.div_ceil(n_splits);
    let mut fold_of = vec![0usize; n];
    for (fold, chunk) in order.chunks(fold_size).enumerate() {
        for &i in chunk {
            fold_of[i] = fold;
        }
    }
    for fold in 0..order.chunks(fold_size).len() {
        let test: Vec<usize> = (0..n).filter(|&i| fold_of[i] == fold).collect();
        let train: Vec<usize> = (0..n).filter(|&i| fold_of[i] != fold).collect();
        let test = &test[..];
        let seed = cfg.seed.wrapping_add(fold as u64);

        // propensity e(X) = P(T = 1 | X)
        let t_train: Vec<f32> = train.iter().map(|&i| t[i] as f32).collect();
        if t_train.iter().all(|&v| v == t_train[0]) {
            let mean = mean_of(&t_train);
            for &i in test {
                e_hat[i] = mean;
            }
        } else {
            let targets: Vec<f32> = (0..n).map(|i| t[i] as f32).collect();
            let model = Sgd::fit(x, &train, &targets, Model::Logistic, seed);
            for &i in test {
                e_hat[i] = model.predict(x, i);
            }
        }

        // outcome models mu1(X), mu0(X), with group-mean fallbacks when a
        // fold's group is tiny or its outcome is degenerate
        let treated_train: Vec<usize> = train.iter().copied().filter(|&i| t[i] == 1).collect();
        let control_train: Vec<usize> = train.iter().copied().filter(|&i| t[i] == 0).collect();
        fit_outcome(x, y, kind, &treated_train, &train, test, seed, &mut mu1_hat);
        fit_outcome(x, y, kind, &control_train, &train, test, seed, &mut mu0_hat);
    }

    // clip propensities away from 0/1 so no weight explodes
    for e in e_hat.iter_mut() {
        *e = e.clamp(cfg.clip_eps, 1.0 - cfg.clip_eps);
    }
    if kind == OutcomeKind::Binary {
        for mu in mu1_hat.iter_mut().chain(mu0_hat.iter_mut()) {
            *mu = mu.clamp(0.0, 1.0);
        }
    }

    let mut sorted = e_hat.clone();
    sorted.sort_by(f64::total_cmp);
    let overlap_of = |used: &[bool]| {
        let n_used = used.iter().filter(|&&u| u).count();
        let n_treated_used = (0..n).filter(|&i| used[i] && t[i] == 1).count();
        Overlap {
            n,
            n_used,
            n_treated_used,
            n_control_used: n_used - n_treated_used,
            trim_low: cfg.trim_low,
            trim_high: cfg.trim_high,
            e_min: sorted[0],
            e_p01: quantile(&sorted, 0.01),
            e_p50: quantile(&sorted, 0.50),
            e_p99: quantile(&sorted, 0.99),
            e_max: sorted[n - 1],
            frac_trimmed: 1.0 - n_used as f64 / n as f64,
        }
    };

    let used: Vec<bool> = e_hat
        .iter()
        .map(|&e| e >= cfg.trim_low && e <= cfg.trim_high)
        .collect();
    let overlap = overlap_of(&used);

    // identifiability gate: trimming away most of the sample means the effect
    // is not estimable in this feature space, and clipped propensities would
    // make any fallback wildly unstable
    let min_used = 200usize.max((0.05 * n as f64) as usize);
    if overlap.n_used < min_used
        || overlap.n_treated_used < AIPW_USED_MIN_GROUP
        || overlap.n_control_used < AIPW_USED_MIN_GROUP
    {
        return Err(overlap);
    }

    let mut phi = vec![0f64; n];
    let mut y1 = vec![0f64; n];
    let mut y0 = vec![0f64; n];
    for i in 0..n {
        let ti = t[i] as f64;
        let yi = y[i] as f64;
        y1[i] = mu1_hat[i] + ti * (yi - mu1_hat[i]) / e_hat[i];
        y0[i] = mu0_hat[i] + (1.0 - ti) * (yi - mu0_hat[i]) / (1.0 - e_hat[i]);
        phi[i] = (mu1_hat[i] - mu0_hat[i]) + ti * (yi - mu1_hat[i]) / e_hat[i]
            - (1.0 - ti) * (yi - mu0_hat[i]) / (1.0 - e_hat[i]);
    }

    let n_used = overlap.n_used;
    let tau = (0..n)
        .filter(|&i| used[i])
        .map(|i| y1[i] - y0[i])
        .sum::<f64>()
        / n_used as f64;
    let se = if n_used > 1 {
        let phi_used: Vec<f64> = (0..n).filter(|&i| used[i]).map(|i| phi[i]).collect();
        stdev(&phi_used) / (n_used as f64).sqrt()
    } else {
        f64::NAN
    };
    let p_value = if se.is_finite() && se > 0.0 {
        Some(two_sided_p(tau / se))
    } else {
        None
    };

    let estimate = AipwEstimate {
        tau,
        se,
        ci95_low: tau - 1.96 * se,
        ci95_high: tau + 1.96 * se,
        p_value,
        y1: (0..n).filter(|&i| used[i]).map(|i| y1[i]).sum::<f64>() / n_used as f64,
        y0: (0..n).filter(|&i| used[i]).map(|i| y0[i]).sum::<f64>() / n_used as f64,
        n,
        n_treated,
        n_control,
        overlap,
    };
    Ok(AipwFit {
        estimate,
        phi,
        e: e_hat,
        used,
    })
}

#[allow(clippy::too_many_arguments)]
fn fit_outcome(
    x: &Design,
    y: &[f32],
    kind: OutcomeKind,
    group: &[usize],
    train: &[usize],
    test: &[usize],
    seed: u64,
    out: &mut [f64],
) {
    let degenerate = kind == OutcomeKind::Binary && {
        let first = group.first().map(|&i| y[i]);
        group.iter().all(|&i| Some(y[i]) == first)
    };
    if group.len() < AIPW_FOLD_MIN_GROUP || degenerate {
        let fallback = if group.is_empty() {
            mean_of(&train.iter().map(|&i| y[i]).collect::<Vec<f32>>())
        } else {
            mean_of(&group.iter().map(|&i| y[i]).collect::<Vec<f32>>())
        };
        for &i in test {
            out[i] = fallback;
        }
        return;
    }
    let model = match kind {
        OutcomeKind::Binary => Model::Logistic,
        OutcomeKind::Continuous => Model::Linear,
    };
    let fitted = Sgd::fit(x, group, y, model, seed);
    for &i in test {
        out[i] = fitted.predict(x, i);
    }
}

fn mean_of(xs: &[f32]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().map(|&x| x as f64).sum::<f64>() / xs.len() as f64
}

/// sample standard deviation, ddof = 1
pub fn stdev(xs: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = xs.iter().sum::<f64>() / n as f64;
    let var = xs.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// linearly interpolated quantile over an ascending-sorted slice
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

/// two-sided p-value under N(0,1) via an erfc approximation
/// (Abramowitz & Stegun 7.1.26, |error| < 1.5e-7)
pub fn two_sided_p(z: f64) -> f64 {
    let x = z.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592 + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    let erfc = poly * (-x * x).exp();
    erfc.clamp(0.0, 1.0)
}

/// VanderWeele-Ding E-value for a risk ratio; protective effects are
/// inverted first. None for non-positive or non-finite ratios.
pub fn e_value(rr: f64) -> Option<f64> {
    if !rr.is_finite() || rr <= 0.0 {
        return None;
    }
    let rr = if rr < 1.0 { 1.0 / rr } else { rr };
    if rr <= 1.0 {
        return Some(1.0);
    }
    Some(rr + (rr * (rr - 1.0)).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantiles_interpolate() {
        let xs = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&xs, 0.0), 0.0);
        assert_eq!(quantile(&xs, 0.5), 2.0);
        assert_eq!(quantile(&xs, 1.0), 4.0);
        assert!((quantile(&xs, 0.25) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stdev_matches_ddof_one() {
        let xs = vec![1.0, 2.0, 3.0, 4.0];
        let expected = (5.0f64 / 3.0).sqrt();
        assert!((stdev(&xs) - expected).abs() < 1e-12);
    }

    #[test]
    fn p_values_are_sane() {
        assert!((two_sided_p(0.0) - 1.0).abs() < 1e-6);
        assert!((two_sided_p(1.96) - 0.05).abs() < 1e-3);
        assert!(two_sided_p(5.0) < 1e-5);
    }

    #[test]
    fn e_values() {
        assert_eq!(e_value(-1.0), None);
        assert_eq!(e_value(1.0), Some(1.0));
        let rr = 2.0;
        assert!((e_value(rr).unwrap() - (2.0 + 2.0f64.sqrt())).abs() < 1e-12);
        // protective effects invert first
        assert_eq!(e_value(0.5), e_value(2.0));
    }
}

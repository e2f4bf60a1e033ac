use crate::PmId;
use crate::cluster::FeatureMatrix;
use crate::engine::Engine;
use crate::engine::Proxies;
use crate::tokens::ItemType;
use crate::tokens::Token;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use roaring::RoaringBitmap;

/// the AIPW design matrix: the sparse 0/1 token block horizontally
/// concatenated with the dense board-strength proxies. the three item-count
/// proxies are rest-of-board totals when a target unit is given, so the
/// covariates cannot mechanically encode the treatment.
#[derive(Debug, Clone)]
pub struct Design {
    pub sparse: FeatureMatrix,
    /// row-major, n_rows x Proxies::WIDTH
    dense: Vec<f32>,
    /// per-column max-abs over the dense block, for scale-invariant learners
    scale: [f32; Proxies::WIDTH],
}

impl Design {
    pub fn new(engine: &Engine, sparse: FeatureMatrix, rest_of_board_unit: Option<&str>) -> Self {
        let n = sparse.n_rows();
        let mut dense = Vec::with_capacity(n * Proxies::WIDTH);
        for &pm in &sparse.base_ids {
            dense.extend_from_slice(&engine.proxies().features(pm));
        }

        if let Some(unit) = rest_of_board_unit {
            let mut on_unit = vec![[0f32; 3]; n];
            let base: RoaringBitmap = sparse.base_ids.iter().copied().collect();
            let equipped: Vec<(crate::TokenId, String)> = engine
                .equipped_on(unit)
                .map(|(id, t)| (id, t.to_string()))
                .collect();
            for (id, token) in equipped {
                let Ok(parsed) = Token::try_from(token.as_str()) else {
                    continue;
                };
                let item = parsed.item().unwrap_or_default();
                let completed = ItemType::of(item) != ItemType::Component;
                for pm in (&base & &engine.stats_by_id(id).bitmap).iter() {
                    let Some(row) = sparse.row_of(pm) else {
                        continue;
                    };
                    on_unit[row][0] += 1.0;
                    if completed {
                        on_unit[row][2] += 1.0;
                    } else {
                        on_unit[row][1] += 1.0;
                    }
                }
            }
            for (row, counts) in on_unit.iter().enumerate() {
                let at = row * Proxies::WIDTH;
                dense[at] = (dense[at] - counts[0]).max(0.0);
                dense[at + 1] = (dense[at + 1] - counts[1]).max(0.0);
                dense[at + 2] = (dense[at + 2] - counts[2]).max(0.0);
            }
        }

        let mut scale = [1f32; Proxies::WIDTH];
        for row in 0..n {
            for col in 0..Proxies::WIDTH {
                scale[col] = scale[col].max(dense[row * Proxies::WIDTH + col].abs());
            }
        }

        Self {
            sparse,
            dense,
            scale,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.sparse.n_rows()
    }

    pub fn n_sparse(&self) -> usize {
        self.sparse.n_cols()
    }

    pub fn n_dense(&self) -> usize {
        Proxies::WIDTH
    }

    /// active sparse columns of one row
    pub fn sparse_row(&self, i: usize) -> &[u32] {
        self.sparse.row(i)
    }

    /// max-abs-scaled dense features of one row
    pub fn dense_row(&self, i: usize) -> [f32; Proxies::WIDTH] {
        let mut out = [0f32; Proxies::WIDTH];
        for col in 0..Proxies::WIDTH {
            out[col] = self.dense[i * Proxies::WIDTH + col] / self.scale[col];
        }
        out
    }
}

/// seeded uniform subsample of a bitmap down to at most max_rows ids
pub fn subsample(base: &RoaringBitmap, max_rows: usize, seed: u64) -> RoaringBitmap {
    let n = base.len() as usize;
    if n <= max_rows {
        return base.clone();
    }
    let ids: Vec<PmId> = base.iter().collect();
    let mut rng = StdRng::seed_from_u64(seed);
    sample(&mut rng, n, max_rows)
        .into_iter()
        .map(|i| ids[i])
        .collect()
}

/// seeded subsample that keeps both treatment groups represented: each group
/// keeps at least min(5000, max_rows / 10) rows (or everything it has), the
/// remainder is filled proportionally from the larger group
pub fn stratified_subsample(
    base: &RoaringBitmap,
    treated: &RoaringBitmap,
    max_rows: usize,
    seed: u64,
) -> RoaringBitmap {
    let n = base.len() as usize;
    if n <= max_rows {
        return base.clone();
    }
    let treated_ids: Vec<PmId> = (base & treated).iter().collect();
    let control_ids: Vec<PmId> = (base - treated).iter().collect();

    let floor = 5_000.min(max_rows / 10);
    let proportional = (max_rows as f64 * treated_ids.len() as f64 / n as f64).round() as usize;
    let mut want_treated = treated_ids.len().min(floor.max(proportional));
    let mut want_control = control_ids.len().min(max_rows.saturating_sub(want_treated));
    let remaining = max_rows.saturating_sub(want_treated + want_control);
    if remaining > 0 {
        if treated_ids.len() - want_treated > control_ids.len() - want_control {
            want_treated = treated_ids.len().min(want_treated + remaining);
        } else {
            want_control = control_ids.len().min(want_control + remaining);
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked: Vec<PmId> = sample(&mut rng, treated_ids.len(), want_treated)
        .into_iter()
        .map(|i| treated_ids[i])
        .collect();
    picked.extend(
        sample(&mut rng, control_ids.len(), want_control)
            .into_iter()
            .map(|i| control_ids[i]),
    );
    picked.sort_unstable();
    picked.into_iter().collect()
}

/// treatment vector aligned to the sparse matrix rows
pub fn treatment_vector(matrix: &FeatureMatrix, treated: &RoaringBitmap) -> Vec<u8> {
    let mut t = vec![0u8; matrix.n_rows()];
    for pm in treated.iter() {
        if let Some(row) = matrix.row_of(pm) {
            t[row] = 1;
        }
    }
    t
}

/// outcome vector aligned to the sparse matrix rows
pub fn outcome_vector(
    engine: &Engine,
    matrix: &FeatureMatrix,
    outcome: crate::causal::Outcome,
) -> Vec<f32> {
    matrix
        .base_ids
        .iter()
        .map(|&pm| outcome.transform(engine.placement(pm)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsample_is_bounded_and_seeded() {
        let base: RoaringBitmap = (0..10_000).collect();
        let a = subsample(&base, 1_000, 42);
        let b = subsample(&base, 1_000, 42);
        assert_eq!(a.len(), 1_000);
        assert_eq!(a, b);
        assert!(a.is_subset(&base));
    }

    #[test]
    fn stratified_subsample_keeps_minority_group() {
        let base: RoaringBitmap = (0..100_000).collect();
        let treated: RoaringBitmap = (0..600).collect();
        let picked = stratified_subsample(&base, &treated, 10_000, 42);
        assert_eq!(picked.len(), 10_000);
        // the minority group survives whole rather than proportionally
        assert_eq!((&picked & &treated).len(), 600);
    }
}

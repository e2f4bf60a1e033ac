use super::matrix::FeatureMatrix;
use crate::KMEANS_BATCH_SIZE;
use crate::KMEANS_MAX_BATCHES;
use crate::KMEANS_N_INIT;
use crate::KMEANS_REASSIGNMENT_RATIO;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

/// minibatch k-means over binary sparse rows, plain euclidean geometry.
/// runs a few independent seeded inits and keeps the lowest-inertia fit,
/// with starving centers periodically reseeded from random rows.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub labels: Vec<u32>,
    pub centers: Vec<Vec<f32>>,
    pub inertia: f64,
}

impl KMeans {
    pub fn fit(x: &FeatureMatrix, k: usize, seed: u64) -> Self {
        let n = x.n_rows();
        let k = k.min(n).max(1);
        let mut best: Option<KMeans> = None;
        for init in 0..KMEANS_N_INIT {
            let run = Self::once(x, k, seed.wrapping_add(init as u64));
            if best.as_ref().map(|b| run.inertia < b.inertia).unwrap_or(true) {
                best = Some(run);
            }
        }
        best.expect("at least one init")
    }

    fn once(x: &FeatureMatrix, k: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = x.n_rows();
        let m = x.n_cols();

        let mut centers: Vec<Vec<f32>> = sample(&mut rng, n, k)
            .into_iter()
            .map(|row| densify(x, row, m))
            .collect();
        let mut counts = vec![1.0f64; k];

        let batch_size = KMEANS_BATCH_SIZE.min(n);
        for step in 1..=KMEANS_MAX_BATCHES {
            let batch = sample(&mut rng, n, batch_size);
            let norms = center_norms(&centers);
            let assigned: Vec<(usize, usize)> = batch
                .into_iter()
                .map(|row| (row, nearest(x, row, &centers, &norms).0))
                .collect();
            for (row, center) in assigned {
                counts[center] += 1.0;
                let eta = (1.0 / counts[center]) as f32;
                let center = &mut centers[center];
                for v in center.iter_mut() {
                    *v *= 1.0 - eta;
                }
                for &col in x.row(row) {
                    center[col as usize] += eta;
                }
            }
            // occasionally reseed centers that stopped attracting points
            if step % 10 == 0 {
                let ceiling = counts.iter().cloned().fold(0.0f64, f64::max);
                let floor = ceiling * KMEANS_REASSIGNMENT_RATIO;
                for j in 0..k {
                    if counts[j] < floor {
                        let row = sample(&mut rng, n, 1).index(0);
                        centers[j] = densify(x, row, m);
                        counts[j] = 1.0;
                    }
                }
            }
        }

        let norms = center_norms(&centers);
        let mut labels = Vec::with_capacity(n);
        let mut inertia = 0.0f64;
        for row in 0..n {
            let (center, dist2) = nearest(x, row, &centers, &norms);
            labels.push(center as u32);
            inertia += dist2 as f64;
        }
        Self {
            labels,
            centers,
            inertia,
        }
    }

    pub fn k(&self) -> usize {
        self.centers.len()
    }

    /// cluster sizes indexed by label
    pub fn sizes(&self) -> Vec<u32> {
        let mut sizes = vec![0u32; self.k()];
        for &label in &self.labels {
            sizes[label as usize] += 1;
        }
        sizes
    }
}

fn densify(x: &FeatureMatrix, row: usize, m: usize) -> Vec<f32> {
    let mut dense = vec![0.0f32; m];
    for &col in x.row(row) {
        dense[col as usize] = 1.0;
    }
    dense
}

fn center_norms(centers: &[Vec<f32>]) -> Vec<f32> {
    centers
        .iter()
        .map(|c| c.iter().map(|v| v * v).sum())
        .collect()
}

/// nearest center by squared euclidean distance. for a 0/1 row,
/// d2 = nnz + ||c||^2 - 2 * sum(c[active])
fn nearest(x: &FeatureMatrix, row: usize, centers: &[Vec<f32>], norms: &[f32]) -> (usize, f32) {
    let active = x.row(row);
    let nnz = active.len() as f32;
    centers
        .iter()
        .enumerate()
        .map(|(j, center)| {
            let dot: f32 = active.iter().map(|&col| center[col as usize]).sum();
            (j, nnz + norms[j] - 2.0 * dot)
        })
        .min_by(|(_, d1), (_, d2)| d1.total_cmp(d2))
        .expect("k >= 1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Builder;
    use crate::engine::Engine;
    use crate::engine::row::PlayerMatchRow;
    use crate::engine::row::UnitRow;

    /// two obviously separable populations: boards of {A,B} and boards of {C,D}
    fn bimodal_engine(per_side: usize) -> Engine {
        let mut builder = Builder::new();
        for i in 0..per_side * 2 {
            let units = if i % 2 == 0 { ["A", "B"] } else { ["C", "D"] };
            builder.witness(&PlayerMatchRow {
                placement: (i % 8 + 1) as i8,
                units: units
                    .iter()
                    .map(|u| UnitRow {
                        name: u.to_string(),
                        tier: 1,
                        rarity: 0,
                        items: vec![],
                    })
                    .collect(),
                traits: vec![],
            });
        }
        builder.seal()
    }

    fn matrix_of(engine: &Engine) -> FeatureMatrix {
        let features: Vec<_> = ["U:A", "U:B", "U:C", "U:D"]
            .iter()
            .map(|t| engine.vocab().id(t).unwrap())
            .collect();
        FeatureMatrix::build(engine, engine.all_players(), &features)
    }

    #[test]
    fn separable_populations_split_cleanly() {
        let engine = bimodal_engine(100);
        let x = matrix_of(&engine);
        let fit = KMeans::fit(&x, 2, 42);
        assert_eq!(fit.labels.len(), 200);
        // all even rows share a label, all odd rows share the other
        let even = fit.labels[0];
        let odd = fit.labels[1];
        assert_ne!(even, odd);
        assert!(fit.labels.iter().step_by(2).all(|&l| l == even));
        assert!(fit.labels.iter().skip(1).step_by(2).all(|&l| l == odd));
    }

    #[test]
    fn fit_is_deterministic_under_seed() {
        let engine = bimodal_engine(50);
        let x = matrix_of(&engine);
        let a = KMeans::fit(&x, 3, 7);
        let b = KMeans::fit(&x, 3, 7);
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.inertia, b.inertia);
    }

    #[test]
    fn sizes_sum_to_rows() {
        let engine = bimodal_engine(60);
        let x = matrix_of(&engine);
        let fit = KMeans::fit(&x, 4, 1);
        assert_eq!(fit.sizes().iter().sum::<u32>() as usize, x.n_rows());
    }
}

use super::design::Design;
use crate::engine::Proxies;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

const ALPHA: f64 = 1e-4;
const TOLERANCE: f64 = 1e-3;
const MAX_EPOCHS: usize = 30;
const NO_CHANGE_EPOCHS: usize = 2;
const T0: f64 = 1e5;

/// shallow scale-invariant learners over the sparse+dense design:
/// L2-penalized SGD, logistic for probabilities and binary outcomes,
/// least-squares for continuous outcomes. the sparse block is 0/1 so
/// max-abs scaling reduces to the dense columns (handled by the design).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Logistic,
    Linear,
}

#[derive(Debug, Clone)]
pub struct Sgd {
    model: Model,
    w_sparse: Vec<f32>,
    w_dense: [f32; Proxies::WIDTH],
    bias: f32,
}

impl Sgd {
    /// fit on the given training rows; `y` is aligned to the full design
    pub fn fit(design: &Design, rows: &[usize], y: &[f32], model: Model, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut w_sparse = vec![0f32; design.n_sparse()];
        let mut w_dense = [0f32; Proxies::WIDTH];
        let mut bias = 0f32;
        let mut wscale = 1f64;

        let mut order: Vec<usize> = rows.to_vec();
        let mut t = 0usize;
        let mut best = f64::INFINITY;
        let mut strikes = 0usize;

        for _ in 0..MAX_EPOCHS {
            order.shuffle(&mut rng);
            let mut loss = 0f64;
            for &row in &order {
                let eta = 1.0 / (ALPHA * (t as f64 + T0));
                t += 1;

                let active = design.sparse_row(row);
                let dense = design.dense_row(row);
                let mut z = bias as f64;
                let mut raw = 0f64;
                for &col in active {
                    raw += w_sparse[col as usize] as f64;
                }
                for (col, &x) in dense.iter().enumerate() {
                    raw += w_dense[col] as f64 * x as f64;
                }
                z += wscale * raw;

                let target = y[row] as f64;
                let g = match model {
                    Model::Logistic => {
                        let p = sigmoid(z);
                        loss += logloss(target, p);
                        target - p
                    }
                    Model::Linear => {
                        loss += 0.5 * (target - z) * (target - z);
                        target - z
                    }
                };

                wscale *= 1.0 - eta * ALPHA;
                let step = (eta * g / wscale) as f32;
                for &col in active {
                    w_sparse[col as usize] += step;
                }
                for (col, &x) in dense.iter().enumerate() {
                    w_dense[col] += step * x;
                }
                bias += (eta * g) as f32;

                if wscale < 1e-9 {
                    rescale(&mut w_sparse, &mut w_dense, &mut wscale);
                }
            }

            let loss = loss / order.len().max(1) as f64;
            if loss > best - TOLERANCE {
                strikes += 1;
                if strikes >= NO_CHANGE_EPOCHS {
                    break;
                }
            } else {
                strikes = 0;
            }
            best = best.min(loss);
        }

        for w in w_sparse.iter_mut() {
            *w = (*w as f64 * wscale) as f32;
        }
        for w in w_dense.iter_mut() {
            *w = (*w as f64 * wscale) as f32;
        }
        Self {
            model,
            w_sparse,
            w_dense,
            bias,
        }
    }

    /// probability for the logistic model, raw response for the linear one
    pub fn predict(&self, design: &Design, row: usize) -> f64 {
        let mut z = self.bias as f64;
        for &col in design.sparse_row(row) {
            z += self.w_sparse[col as usize] as f64;
        }
        for (col, &x) in design.dense_row(row).iter().enumerate() {
            z += self.w_dense[col] as f64 * x as f64;
        }
        match self.model {
            Model::Logistic => sigmoid(z),
            Model::Linear => z,
        }
    }
}

fn rescale(w_sparse: &mut [f32], w_dense: &mut [f32; Proxies::WIDTH], wscale: &mut f64) {
    for w in w_sparse.iter_mut() {
        *w = (*w as f64 * *wscale) as f32;
    }
    for w in w_dense.iter_mut() {
        *w = (*w as f64 * *wscale) as f32;
    }
    *wscale = 1.0;
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn logloss(y: f64, p: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::FeatureMatrix;
    use crate::engine::Builder;
    use crate::engine::row::PlayerMatchRow;
    use crate::engine::row::UnitRow;

    /// boards with unit A place top-4, boards with unit B place bottom-4
    fn separable_design(n: usize) -> (Design, Vec<f32>) {
        let mut builder = Builder::new();
        for i in 0..n {
            let (unit, placement) = if i % 2 == 0 { ("A", 2) } else { ("B", 7) };
            builder.witness(&PlayerMatchRow {
                placement,
                units: vec![UnitRow {
                    name: unit.to_string(),
                    tier: 1,
                    rarity: 0,
                    items: vec![],
                }],
                traits: vec![],
            });
        }
        let engine = builder.seal();
        let features = vec![
            engine.vocab().id("U:A").unwrap(),
            engine.vocab().id("U:B").unwrap(),
        ];
        let matrix = FeatureMatrix::build(&engine, engine.all_players(), &features);
        let y: Vec<f32> = matrix
            .base_ids
            .iter()
            .map(|&pm| (engine.placement(pm) <= 4) as u8 as f32)
            .collect();
        (Design::new(&engine, matrix, None), y)
    }

    #[test]
    fn logistic_separates_labels() {
        let (design, y) = separable_design(400);
        let rows: Vec<usize> = (0..design.n_rows()).collect();
        let model = Sgd::fit(&design, &rows, &y, Model::Logistic, 42);
        for row in 0..design.n_rows() {
            let p = model.predict(&design, row);
            if y[row] > 0.5 {
                assert!(p > 0.6, "treated row {} got p={}", row, p);
            } else {
                assert!(p < 0.4, "control row {} got p={}", row, p);
            }
        }
    }

    #[test]
    fn linear_recovers_group_means() {
        let (design, _) = separable_design(400);
        let rows: Vec<usize> = (0..design.n_rows()).collect();
        let y: Vec<f32> = (0..design.n_rows())
            .map(|row| if row % 2 == 0 { 2.0 } else { 7.0 })
            .collect();
        let model = Sgd::fit(&design, &rows, &y, Model::Linear, 42);
        let a = model.predict(&design, 0);
        let b = model.predict(&design, 1);
        assert!((a - 2.0).abs() < 0.5, "predicted {}", a);
        assert!((b - 7.0).abs() < 0.5, "predicted {}", b);
    }
}

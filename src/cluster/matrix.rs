use crate::PmId;
use crate::TokenId;
use crate::engine::Engine;
use roaring::RoaringBitmap;

/// binary sparse feature matrix over a base set. rows are the base pm-ids in
/// ascending order; columns are the kept feature tokens (features with zero
/// presence in the base are dropped). values are implicitly 1.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// sorted ascending; row i corresponds to base_ids[i]
    pub base_ids: Vec<PmId>,
    /// column -> token id
    pub kept: Vec<TokenId>,
    /// column -> number of base rows containing the feature
    pub base_counts: Vec<u32>,
    /// column -> sorted row indices containing the feature
    pub rows_by_feature: Vec<Vec<u32>>,
    /// CSR over rows: indptr[i]..indptr[i+1] indexes into indices
    indptr: Vec<u32>,
    indices: Vec<u32>,
}

impl FeatureMatrix {
    pub fn build(engine: &Engine, base: &RoaringBitmap, features: &[TokenId]) -> Self {
        let base_ids: Vec<PmId> = base.iter().collect();
        let n_rows = base_ids.len();

        let mut kept = Vec::new();
        let mut base_counts = Vec::new();
        let mut rows_by_feature: Vec<Vec<u32>> = Vec::new();

        for &feature in features {
            let present = base & &engine.stats_by_id(feature).bitmap;
            if present.is_empty() {
                continue;
            }
            let rows: Vec<u32> = present
                .iter()
                .map(|pm| {
                    base_ids
                        .binary_search(&pm)
                        .expect("intersection ids are in the base") as u32
                })
                .collect();
            kept.push(feature);
            base_counts.push(rows.len() as u32);
            rows_by_feature.push(rows);
        }

        // transpose the per-feature row lists into CSR over rows
        let mut counts = vec![0u32; n_rows];
        for rows in &rows_by_feature {
            for &row in rows {
                counts[row as usize] += 1;
            }
        }
        let mut indptr = Vec::with_capacity(n_rows + 1);
        indptr.push(0u32);
        for &c in &counts {
            indptr.push(indptr.last().unwrap() + c);
        }
        let mut cursor: Vec<u32> = indptr[..n_rows].to_vec();
        let mut indices = vec![0u32; *indptr.last().unwrap() as usize];
        for (col, rows) in rows_by_feature.iter().enumerate() {
            for &row in rows {
                let at = cursor[row as usize];
                indices[at as usize] = col as u32;
                cursor[row as usize] += 1;
            }
        }

        Self {
            base_ids,
            kept,
            base_counts,
            rows_by_feature,
            indptr,
            indices,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.base_ids.len()
    }

    pub fn n_cols(&self) -> usize {
        self.kept.len()
    }

    /// column indices of the features present in one row
    pub fn row(&self, i: usize) -> &[u32] {
        let lo = self.indptr[i] as usize;
        let hi = self.indptr[i + 1] as usize;
        &self.indices[lo..hi]
    }

    /// row index of a pm-id within the base, if present
    pub fn row_of(&self, pm: PmId) -> Option<usize> {
        self.base_ids.binary_search(&pm).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Builder;
    use crate::engine::row::PlayerMatchRow;
    use crate::engine::row::UnitRow;

    fn engine_of(boards: &[(i8, &[&str])]) -> Engine {
        let mut builder = Builder::new();
        for (placement, units) in boards {
            builder.witness(&PlayerMatchRow {
                placement: *placement,
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

    #[test]
    fn rows_align_with_base_order() {
        let engine = engine_of(&[
            (1, &["A", "B"]),
            (2, &["A"]),
            (3, &["B", "C"]),
            (4, &["C"]),
        ]);
        let base = engine.all_players().clone();
        let features = vec![
            engine.vocab().id("U:A").unwrap(),
            engine.vocab().id("U:B").unwrap(),
            engine.vocab().id("U:C").unwrap(),
        ];
        let matrix = FeatureMatrix::build(&engine, &base, &features);
        assert_eq!(matrix.n_rows(), 4);
        assert_eq!(matrix.n_cols(), 3);
        assert_eq!(matrix.base_counts, vec![2, 2, 2]);
        assert_eq!(matrix.row(0), &[0, 1]);
        assert_eq!(matrix.row(1), &[0]);
        assert_eq!(matrix.row(2), &[1, 2]);
        assert_eq!(matrix.row(3), &[2]);
    }

    #[test]
    fn absent_features_are_dropped() {
        let engine = engine_of(&[(1, &["A"]), (2, &["A", "B"])]);
        let base = engine.stats_of("U:A").unwrap().bitmap.clone();
        let only_first = {
            let mut bm = RoaringBitmap::new();
            bm.insert(0);
            bm
        };
        let base = base & only_first;
        let features = vec![
            engine.vocab().id("U:A").unwrap(),
            engine.vocab().id("U:B").unwrap(),
        ];
        let matrix = FeatureMatrix::build(&engine, &base, &features);
        assert_eq!(matrix.n_cols(), 1);
        assert_eq!(matrix.kept, vec![engine.vocab().id("U:A").unwrap()]);
    }
}

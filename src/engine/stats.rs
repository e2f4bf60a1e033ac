use crate::UNIFORM_PLACEMENT;
use roaring::RoaringBitmap;

/// precomputed per-token aggregates. count duplicates the bitmap cardinality
/// so the average never touches the bitmap.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TokenStats {
    pub bitmap: RoaringBitmap,
    pub placement_sum: i64,
    pub count: u32,
}

impl TokenStats {
    pub fn avg_placement(&self) -> f64 {
        if self.count > 0 {
            self.placement_sum as f64 / self.count as f64
        } else {
            UNIFORM_PLACEMENT
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_average_is_uniform_prior() {
        assert_eq!(TokenStats::default().avg_placement(), UNIFORM_PLACEMENT);
    }

    #[test]
    fn average_is_sum_over_count() {
        let stats = TokenStats {
            bitmap: (0..4).collect(),
            placement_sum: 10,
            count: 4,
        };
        assert_eq!(stats.avg_placement(), 2.5);
    }
}

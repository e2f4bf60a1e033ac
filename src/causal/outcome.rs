use crate::Placement;

/// outcome transform applied to raw placements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    /// binary: placed 4th or better
    #[default]
    Top4,
    /// binary: placed 1st
    Win,
    /// continuous: placement itself, lower is better
    Placement,
    /// continuous: 8 - placement, higher is better
    RankScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Binary,
    Continuous,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Top4 | Self::Win => OutcomeKind::Binary,
            Self::Placement | Self::RankScore => OutcomeKind::Continuous,
        }
    }

    pub fn transform(&self, p: Placement) -> f32 {
        match self {
            Self::Top4 => (p <= 4) as u8 as f32,
            Self::Win => (p == 1) as u8 as f32,
            Self::Placement => p as f32,
            Self::RankScore => (8 - p) as f32,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Top4 => "top4",
            Self::Win => "win",
            Self::Placement => "placement",
            Self::RankScore => "rank_score",
        }
    }
}

impl TryFrom<&str> for Outcome {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top4" | "top_4" | "topfour" => Ok(Self::Top4),
            "win" | "first" | "1st" => Ok(Self::Win),
            "" | "placement" => Ok(Self::Placement),
            "rank_score" | "rankscore" | "score" => Ok(Self::RankScore),
            other => Err(format!("unknown outcome: {}", other)),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transforms() {
        assert_eq!(Outcome::Top4.transform(4), 1.0);
        assert_eq!(Outcome::Top4.transform(5), 0.0);
        assert_eq!(Outcome::Win.transform(1), 1.0);
        assert_eq!(Outcome::Win.transform(2), 0.0);
        assert_eq!(Outcome::Placement.transform(3), 3.0);
        assert_eq!(Outcome::RankScore.transform(1), 7.0);
        assert_eq!(Outcome::RankScore.transform(8), 0.0);
    }

    #[test]
    fn kinds() {
        assert_eq!(Outcome::Top4.kind(), OutcomeKind::Binary);
        assert_eq!(Outcome::Placement.kind(), OutcomeKind::Continuous);
    }
}

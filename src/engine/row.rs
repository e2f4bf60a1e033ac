use serde::Deserialize;
use serde::Serialize;

/// one player's result within one match, as handed over by the ingestion
/// pipeline. the scraper and its relational store live outside this crate;
/// the builder only consumes finished rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerMatchRow {
    pub placement: i8,
    #[serde(default)]
    pub units: Vec<UnitRow>,
    #[serde(default)]
    pub traits: Vec<TraitRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRow {
    pub name: String,
    /// star level, 1..6
    #[serde(default = "one")]
    pub tier: u8,
    /// 0-based cost tier as reported by the API
    #[serde(default)]
    pub rarity: i32,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitRow {
    pub name: String,
    /// active tier index as reported by the API, 1-based
    #[serde(default = "one")]
    pub tier: u8,
    /// units contributing to the trait, used to infer breakpoint labels
    #[serde(default)]
    pub num_units: Option<u32>,
}

fn one() -> u8 {
    1
}

/// the nine craftable components, stable across sets
pub const COMPONENT_ITEMS: &[&str] = &[
    "BFSword",
    "ChainVest",
    "GiantsBelt",
    "NeedlesslyLargeRod",
    "NegatronCloak",
    "RecurveBow",
    "SparringGloves",
    "Spatula",
    "TearOfTheGoddess",
];

/// item taxonomy used for candidate filtering and feature engineering
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ItemType {
    Component,
    Full,
    Artifact,
    Emblem,
    Radiant,
}

impl ItemType {
    pub const fn all() -> &'static [Self] {
        &[
            Self::Component,
            Self::Full,
            Self::Artifact,
            Self::Emblem,
            Self::Radiant,
        ]
    }

    pub const fn key(&self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Full => "full",
            Self::Artifact => "artifact",
            Self::Emblem => "emblem",
            Self::Radiant => "radiant",
        }
    }

    /// best-effort categorization from the cleaned item id
    pub fn of(name: &str) -> Self {
        if COMPONENT_ITEMS.contains(&name) {
            return Self::Component;
        }
        // set-generated items keep a namespace prefix even after cleaning
        if (name.starts_with("TFT") || name.starts_with("Set")) && name.contains('_') {
            return Self::Artifact;
        }
        if name.starts_with("Artifact_") || name.contains("Item_Ornn") {
            return Self::Artifact;
        }
        if name.ends_with("EmblemItem") || name.starts_with("TFT_Item_Emblem_") {
            return Self::Emblem;
        }
        if name.ends_with("Radiant") {
            return Self::Radiant;
        }
        Self::Full
    }
}

impl TryFrom<&str> for ItemType {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "component" | "components" | "comp" => Ok(Self::Component),
            "full" | "fullitem" | "full_item" | "full-item" | "completed" | "complete" => {
                Ok(Self::Full)
            }
            "artifact" | "artifacts" => Ok(Self::Artifact),
            "emblem" | "emblems" => Ok(Self::Emblem),
            "radiant" | "radiantitem" | "radiant_item" | "radiant-item" => Ok(Self::Radiant),
            other => Err(format!("unknown item type: {}", other)),
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// the "set prefix" of a full item that follows a Name_Pattern id,
/// e.g. Bilgewater_CaptainsBrew -> Bilgewater. None for every other type.
pub fn item_prefix(name: &str) -> Option<&str> {
    if ItemType::of(name) != ItemType::Full {
        return None;
    }
    let (prefix, _) = name.split_once('_')?;
    if prefix.is_empty() {
        return None;
    }
    let upper = prefix.to_ascii_uppercase();
    if upper.starts_with("TFT") || upper.starts_with("SET") {
        return None;
    }
    Some(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_are_components() {
        for name in COMPONENT_ITEMS {
            assert_eq!(ItemType::of(name), ItemType::Component);
        }
    }

    #[test]
    fn taxonomy_clauses() {
        assert_eq!(ItemType::of("InfinityEdge"), ItemType::Full);
        assert_eq!(ItemType::of("Artifact_Fishbones"), ItemType::Artifact);
        assert_eq!(ItemType::of("TFT5_Item_OrnnDeathsDefiance"), ItemType::Artifact);
        assert_eq!(ItemType::of("DemaciaEmblemItem"), ItemType::Emblem);
        assert_eq!(ItemType::of("InfinityEdgeRadiant"), ItemType::Radiant);
    }

    #[test]
    fn prefixes_only_on_full_items() {
        assert_eq!(item_prefix("Bilgewater_CaptainsBrew"), Some("Bilgewater"));
        assert_eq!(item_prefix("InfinityEdge"), None);
        assert_eq!(item_prefix("Artifact_Fishbones"), None);
        assert_eq!(item_prefix("TFT9_Item_Something"), None);
    }

    #[test]
    fn aliases_parse() {
        assert_eq!(ItemType::try_from("Completed").unwrap(), ItemType::Full);
        assert_eq!(ItemType::try_from("emblems").unwrap(), ItemType::Emblem);
        assert!(ItemType::try_from("potato").is_err());
    }
}

/// the four token namespaces. star-level units, equipped copy counts, and
/// tiered traits are variants within Unit / Equipped / Trait respectively.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Namespace {
    Unit,
    Item,
    Equipped,
    Trait,
}

impl Namespace {
    pub const fn all() -> &'static [Self] {
        &[Self::Unit, Self::Item, Self::Equipped, Self::Trait]
    }
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Unit => "U:",
            Self::Item => "I:",
            Self::Equipped => "E:",
            Self::Trait => "T:",
        }
    }
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Item => "item",
            Self::Equipped => "equipped",
            Self::Trait => "trait",
        }
    }
    /// classify a raw token string, ignoring any exclusion prefix
    pub fn of(token: &str) -> Option<Self> {
        let token = token.trim_start_matches(['-', '!']);
        match token.get(..2) {
            Some("U:") => Some(Self::Unit),
            Some("I:") => Some(Self::Item),
            Some("E:") => Some(Self::Equipped),
            Some("T:") => Some(Self::Trait),
            _ => None,
        }
    }
}

impl TryFrom<&str> for Namespace {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unit" | "units" => Ok(Self::Unit),
            "item" | "items" => Ok(Self::Item),
            "equipped" => Ok(Self::Equipped),
            "trait" | "traits" => Ok(Self::Trait),
            other => Err(format!("unknown token type: {}", other)),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

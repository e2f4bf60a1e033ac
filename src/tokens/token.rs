use super::namespace::Namespace;

/// a token is a Boolean predicate over one player-match, encoded as a short
/// canonical string. the tagged variants carry the parsed components so query
/// code can dispatch without re-splitting strings.
///
/// invariants baked into the encoding:
/// - `EquippedCount(u, i, c+1)` implies `EquippedCount(u, i, c)` implies `Equipped(u, i)`
/// - `UnitStar(u, k)` implies `Unit(u)`
/// - `TraitTier(t, k)` implies `TraitTier(t, k-1)` for k >= 3 and `Trait(t)` for k = 2
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum Token {
    Unit(String),
    UnitStar(String, u8),
    Item(String),
    Equipped(String, String),
    EquippedCount(String, String, u8),
    Trait(String),
    TraitTier(String, u8),
}

impl Token {
    pub fn namespace(&self) -> Namespace {
        match self {
            Self::Unit(_) | Self::UnitStar(..) => Namespace::Unit,
            Self::Item(_) => Namespace::Item,
            Self::Equipped(..) | Self::EquippedCount(..) => Namespace::Equipped,
            Self::Trait(_) | Self::TraitTier(..) => Namespace::Trait,
        }
    }

    /// strip the star / tier / copy-count qualifier
    pub fn base(&self) -> Self {
        match self {
            Self::UnitStar(u, _) => Self::Unit(u.clone()),
            Self::EquippedCount(u, i, _) => Self::Equipped(u.clone(), i.clone()),
            Self::TraitTier(t, _) => Self::Trait(t.clone()),
            other => other.clone(),
        }
    }

    pub fn is_base(&self) -> bool {
        matches!(self, Self::Unit(_) | Self::Item(_) | Self::Equipped(..) | Self::Trait(_))
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Unit(u) | Self::UnitStar(u, _) => Some(u),
            Self::Equipped(u, _) | Self::EquippedCount(u, _, _) => Some(u),
            _ => None,
        }
    }

    pub fn item(&self) -> Option<&str> {
        match self {
            Self::Item(i) => Some(i),
            Self::Equipped(_, i) | Self::EquippedCount(_, i, _) => Some(i),
            _ => None,
        }
    }

    pub fn trait_name(&self) -> Option<&str> {
        match self {
            Self::Trait(t) | Self::TraitTier(t, _) => Some(t),
            _ => None,
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unit(u) => write!(f, "U:{}", u),
            Self::UnitStar(u, k) => write!(f, "U:{}:{}", u, k),
            Self::Item(i) => write!(f, "I:{}", i),
            Self::Equipped(u, i) => write!(f, "E:{}|{}", u, i),
            Self::EquippedCount(u, i, c) => write!(f, "E:{}|{}:{}", u, i, c),
            Self::Trait(t) => write!(f, "T:{}", t),
            Self::TraitTier(t, k) => write!(f, "T:{}:{}", t, k),
        }
    }
}

impl TryFrom<&str> for Token {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let s = s.trim_start_matches(['-', '!']);
        let namespace = Namespace::of(s).ok_or_else(|| format!("unknown token: {}", s))?;
        let rest = &s[2..];
        if rest.is_empty() {
            return Err(format!("empty token body: {}", s));
        }
        match namespace {
            Namespace::Unit => match rest.rsplit_once(':') {
                Some((name, stars)) => match stars.parse::<u8>() {
                    Ok(k) if (1..=6).contains(&k) => Ok(Self::UnitStar(name.to_string(), k)),
                    _ => Ok(Self::Unit(rest.to_string())),
                },
                None => Ok(Self::Unit(rest.to_string())),
            },
            Namespace::Item => Ok(Self::Item(rest.to_string())),
            Namespace::Equipped => {
                let (unit, item) = rest
                    .split_once('|')
                    .ok_or_else(|| format!("malformed equipped token: {}", s))?;
                match item.rsplit_once(':') {
                    Some((name, copies)) => match copies.parse::<u8>() {
                        Ok(c) if c >= 2 => {
                            Ok(Self::EquippedCount(unit.to_string(), name.to_string(), c))
                        }
                        _ => Ok(Self::Equipped(unit.to_string(), item.to_string())),
                    },
                    None => Ok(Self::Equipped(unit.to_string(), item.to_string())),
                }
            }
            Namespace::Trait => match rest.rsplit_once(':') {
                Some((name, tier)) => match tier.parse::<u8>() {
                    Ok(k) if k >= 2 => Ok(Self::TraitTier(name.to_string(), k)),
                    _ => Ok(Self::Trait(rest.to_string())),
                },
                None => Ok(Self::Trait(rest.to_string())),
            },
        }
    }
}

impl crate::Arbitrary for Token {
    fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        let name = format!("X{}", rng.random_range(0..1000));
        match rng.random_range(0..7) {
            0 => Self::Unit(name),
            1 => Self::UnitStar(name, rng.random_range(1..=3)),
            2 => Self::Item(name),
            3 => Self::Equipped(name.clone(), format!("Y{}", rng.random_range(0..1000))),
            4 => Self::EquippedCount(name.clone(), format!("Y{}", rng.random_range(0..1000)), 2),
            5 => Self::Trait(name),
            _ => Self::TraitTier(name, rng.random_range(2..=4)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_display_roundtrip() {
        for s in [
            "U:Ashe",
            "U:Ashe:2",
            "I:InfinityEdge",
            "E:Ashe|InfinityEdge",
            "E:Ashe|InfinityEdge:2",
            "T:Demacia",
            "T:Demacia:3",
        ] {
            let token = Token::try_from(s).unwrap();
            assert_eq!(token.to_string(), s);
        }
    }

    #[test]
    fn parse_strips_negation() {
        assert_eq!(
            Token::try_from("-U:Ashe").unwrap(),
            Token::Unit("Ashe".to_string())
        );
        assert_eq!(
            Token::try_from("!T:Demacia:2").unwrap(),
            Token::TraitTier("Demacia".to_string(), 2)
        );
    }

    #[test]
    fn base_drops_qualifiers() {
        let starred = Token::try_from("U:Ashe:3").unwrap();
        assert_eq!(starred.base(), Token::Unit("Ashe".to_string()));
        let copies = Token::try_from("E:Ashe|InfinityEdge:2").unwrap();
        assert_eq!(
            copies.base(),
            Token::Equipped("Ashe".to_string(), "InfinityEdge".to_string())
        );
    }

    #[test]
    fn malformed_equipped_is_error() {
        assert!(Token::try_from("E:AsheInfinityEdge").is_err());
        assert!(Token::try_from("X:Ashe").is_err());
    }

    #[test]
    fn copy_count_one_is_plain_equipped() {
        // a ":1" suffix is not a copy-count qualifier
        let token = Token::try_from("E:Ashe|Weird:1").unwrap();
        assert_eq!(
            token,
            Token::Equipped("Ashe".to_string(), "Weird:1".to_string())
        );
    }
}

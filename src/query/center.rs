use crate::tokens::Token;

/// the shape of the current selection, which decides where graph candidates
/// are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CenterKind {
    Empty,
    Unit,
    Item,
    Trait,
    Equipped,
    Combo,
}

/// the selected units / items / traits, deduplicated, exclusions skipped
#[derive(Debug, Clone, Default)]
pub struct Center {
    pub kind: CenterKind,
    pub units: Vec<String>,
    pub items: Vec<String>,
    pub traits: Vec<String>,
    pub equipped: Vec<(String, String)>,
}

impl Default for CenterKind {
    fn default() -> Self {
        Self::Empty
    }
}

impl Center {
    pub fn of(include: &[String]) -> Self {
        if include.is_empty() {
            return Self::default();
        }
        let mut center = Self::default();
        for raw in include {
            let Ok(token) = Token::try_from(raw.as_str()) else {
                continue;
            };
            match token.base() {
                Token::Unit(u) => push_unique(&mut center.units, u),
                Token::Item(i) => push_unique(&mut center.items, i),
                Token::Trait(t) => push_unique(&mut center.traits, t),
                Token::Equipped(u, i) => {
                    push_unique(&mut center.units, u.clone());
                    push_unique(&mut center.items, i.clone());
                    center.equipped.push((u, i));
                }
                _ => {}
            }
        }
        center.kind = if include.len() > 1 {
            CenterKind::Combo
        } else {
            match Token::try_from(include[0].as_str()).map(|t| t.base()) {
                Ok(Token::Unit(_)) => CenterKind::Unit,
                Ok(Token::Item(_)) => CenterKind::Item,
                Ok(Token::Trait(_)) => CenterKind::Trait,
                Ok(Token::Equipped(..)) => CenterKind::Equipped,
                _ => CenterKind::Empty,
            }
        };
        center
    }

    pub fn has_units(&self) -> bool {
        !self.units.is_empty()
    }

    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }
}

fn push_unique(v: &mut Vec<String>, s: String) {
    if !v.contains(&s) {
        v.push(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_token_kinds() {
        assert_eq!(Center::of(&strings(&["U:Ashe"])).kind, CenterKind::Unit);
        assert_eq!(Center::of(&strings(&["U:Ashe:2"])).kind, CenterKind::Unit);
        assert_eq!(Center::of(&strings(&["I:Deathblade"])).kind, CenterKind::Item);
        assert_eq!(Center::of(&strings(&["T:Demacia:3"])).kind, CenterKind::Trait);
        assert_eq!(
            Center::of(&strings(&["E:Ashe|Deathblade"])).kind,
            CenterKind::Equipped
        );
        assert_eq!(Center::of(&[]).kind, CenterKind::Empty);
    }

    #[test]
    fn equipped_contributes_both_sides() {
        let center = Center::of(&strings(&["E:Ashe|Deathblade", "U:Briar"]));
        assert_eq!(center.kind, CenterKind::Combo);
        assert_eq!(center.units, vec!["Ashe", "Briar"]);
        assert_eq!(center.items, vec!["Deathblade"]);
        assert_eq!(center.equipped.len(), 1);
    }
}

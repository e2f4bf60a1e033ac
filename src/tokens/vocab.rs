use crate::TokenId;
use crate::tokens::names;
use std::collections::HashMap;

/// the string <-> integer token map plus display labels.
///
/// token ids are assigned in build order and are stable for the lifetime of a
/// snapshot. labels never affect semantics; they exist for UI display only and
/// may be overwritten from external catalog data at build time.
#[derive(Debug, Default, Clone)]
pub struct Vocab {
    token_to_id: HashMap<String, TokenId>,
    id_to_token: Vec<String>,
    labels: Vec<String>,
}

impl Vocab {
    /// get the existing id or assign the next one, recording the label on
    /// first emission
    pub fn intern(&mut self, token: &str, label: &str) -> TokenId {
        if let Some(&id) = self.token_to_id.get(token) {
            return id;
        }
        let id = self.id_to_token.len();
        self.token_to_id.insert(token.to_string(), id);
        self.id_to_token.push(token.to_string());
        self.labels.push(label.to_string());
        id
    }

    pub fn id(&self, token: &str) -> Option<TokenId> {
        self.token_to_id.get(token).copied()
    }

    pub fn token(&self, id: TokenId) -> &str {
        &self.id_to_token[id]
    }

    pub fn label(&self, id: TokenId) -> &str {
        let label = &self.labels[id];
        if label.is_empty() {
            &self.id_to_token[id]
        } else {
            label
        }
    }

    pub fn set_label(&mut self, id: TokenId, label: String) {
        self.labels[id] = label;
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TokenId, &str)> {
        self.id_to_token.iter().enumerate().map(|(i, t)| (i, t.as_str()))
    }

    /// rebuild from parallel token/label vectors (snapshot load path)
    pub fn from_parts(tokens: Vec<String>, labels: Vec<String>) -> Self {
        assert!(tokens.len() == labels.len());
        let token_to_id = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self {
            token_to_id,
            id_to_token: tokens,
            labels,
        }
    }

    pub fn raw_label(&self, id: TokenId) -> &str {
        &self.labels[id]
    }
}

// catalog enrichment, run at build time so the server only needs the snapshot
impl Vocab {
    /// rewrite I:* and E:* labels from a mapping of cleaned item id -> display name
    pub fn apply_item_names(&mut self, display: &HashMap<String, String>) -> usize {
        if display.is_empty() {
            return 0;
        }
        let mut updated = 0;
        for id in 0..self.id_to_token.len() {
            let token = &self.id_to_token[id];
            if let Some(item) = token.strip_prefix("I:") {
                if let Some(name) = display.get(&names::catalog_key(item)) {
                    self.labels[id] = name.clone();
                    updated += 1;
                }
            } else if let Some(rest) = token.strip_prefix("E:") {
                let Some((unit, item_part)) = rest.split_once('|') else {
                    continue;
                };
                let (item, copies) = match item_part.rsplit_once(':') {
                    Some((name, suffix)) => match suffix.parse::<u8>() {
                        Ok(c) if c >= 2 => (name, c),
                        _ => (item_part, 1),
                    },
                    None => (item_part, 1),
                };
                if let Some(name) = display.get(&names::catalog_key(item)) {
                    self.labels[id] = if copies >= 2 {
                        format!("{} + {} ×{}", unit, name, copies)
                    } else {
                        format!("{} + {}", unit, name)
                    };
                    updated += 1;
                }
            }
        }
        updated
    }

    /// rewrite T:* labels from a mapping of cleaned trait id -> display name,
    /// preserving any inferred breakpoint number already on the label
    pub fn apply_trait_names(&mut self, display: &HashMap<String, String>) -> usize {
        if display.is_empty() {
            return 0;
        }
        let mut updated = 0;
        for id in 0..self.id_to_token.len() {
            let token = &self.id_to_token[id];
            let Some(rest) = token.strip_prefix("T:") else {
                continue;
            };
            let trait_id = rest.split(':').next().unwrap_or(rest);
            let Some(name) = display.get(&names::catalog_key(trait_id)) else {
                continue;
            };
            let label = self.label(id).to_string();
            self.labels[id] = match trailing_number(&label) {
                Some(number) => format!("{} {}", name, number),
                None => name.clone(),
            };
            updated += 1;
        }
        updated
    }

    /// rewrite T:* labels to in-game breakpoint numbers from a mapping of
    /// cleaned trait id -> ordered min-unit breakpoints. a trait with a single
    /// breakpoint drops the number entirely.
    pub fn apply_trait_breakpoints(&mut self, breakpoints: &HashMap<String, Vec<u32>>) -> usize {
        if breakpoints.is_empty() {
            return 0;
        }
        let mut updated = 0;
        for id in 0..self.id_to_token.len() {
            let token = &self.id_to_token[id];
            let Some(rest) = token.strip_prefix("T:") else {
                continue;
            };
            let mut parts = rest.split(':');
            let Some(trait_id) = parts.next().filter(|t| !t.is_empty()) else {
                continue;
            };
            let tier = parts
                .next()
                .and_then(|t| t.parse::<usize>().ok())
                .unwrap_or(1);
            let Some(bps) = breakpoints.get(&names::catalog_key(trait_id)) else {
                continue;
            };
            if bps.len() <= 1 {
                self.labels[id] = trait_id.to_string();
                updated += 1;
            } else if let Some(bp) = tier.checked_sub(1).and_then(|i| bps.get(i)) {
                self.labels[id] = format!("{} {}", trait_id, bp);
                updated += 1;
            }
        }
        updated
    }
}

/// the trailing breakpoint number of a trait label, e.g. "Demacia 5" -> "5"
fn trailing_number(label: &str) -> Option<&str> {
    let trimmed = label.trim_end();
    let digits = trimmed
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if digits == 0 || digits == trimmed.len() {
        return None;
    }
    let split = trimmed.len() - digits;
    let before = trimmed[..split].chars().last()?;
    if before == ' ' || before == ':' {
        Some(&trimmed[split..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_stable() {
        let mut vocab = Vocab::default();
        let a = vocab.intern("U:Ashe", "Ashe");
        let b = vocab.intern("U:Briar", "Briar");
        assert_eq!(vocab.intern("U:Ashe", "ignored"), a);
        assert_eq!(vocab.token(b), "U:Briar");
        assert_eq!(vocab.label(a), "Ashe");
        assert_eq!(vocab.len(), 2);
    }

    #[test]
    fn item_names_rewrite_equipped() {
        let mut vocab = Vocab::default();
        let i = vocab.intern("I:RunaansHurricane", "RunaansHurricane");
        let e = vocab.intern("E:Ashe|RunaansHurricane:2", "Ashe + RunaansHurricane x2");
        let display = HashMap::from([(
            "runaanshurricane".to_string(),
            "Kraken's Fury".to_string(),
        )]);
        assert_eq!(vocab.apply_item_names(&display), 2);
        assert_eq!(vocab.label(i), "Kraken's Fury");
        assert_eq!(vocab.label(e), "Ashe + Kraken's Fury ×2");
    }

    #[test]
    fn trait_names_keep_breakpoints() {
        let mut vocab = Vocab::default();
        let t = vocab.intern("T:Demacia:2", "Demacia 5");
        let display = HashMap::from([("demacia".to_string(), "Glorious Demacia".to_string())]);
        assert_eq!(vocab.apply_trait_names(&display), 1);
        assert_eq!(vocab.label(t), "Glorious Demacia 5");
    }

    #[test]
    fn breakpoints_single_tier_drops_number() {
        let mut vocab = Vocab::default();
        let solo = vocab.intern("T:ChosenWolves", "ChosenWolves 2");
        let multi = vocab.intern("T:Demacia:3", "Demacia 3");
        let bps = HashMap::from([
            ("chosenwolves".to_string(), vec![2]),
            ("demacia".to_string(), vec![3, 5, 7]),
        ]);
        assert_eq!(vocab.apply_trait_breakpoints(&bps), 2);
        assert_eq!(vocab.label(solo), "ChosenWolves");
        assert_eq!(vocab.label(multi), "Demacia 7");
    }
}

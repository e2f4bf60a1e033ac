use crate::engine::Engine;
use crate::tokens::Namespace;
use serde::Serialize;

/// normalized-substring token search, prebuilt once next to the engine so
/// per-keystroke lookups never rescan the vocabulary
#[derive(Debug, Default)]
pub struct SearchIndex {
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    token: String,
    label: String,
    kind: &'static str,
    count: u32,
    norm_token: String,
    norm_label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub token: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub count: u32,
}

/// lowercase alphanumerics only, for forgiving matching
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

impl SearchIndex {
    pub const MAX_HITS: usize = 20;

    pub fn new(engine: &Engine) -> Self {
        let entries = engine
            .vocab()
            .iter()
            .filter_map(|(_, token)| {
                let ns = Namespace::of(token)?;
                let label = engine.label(token).to_string();
                Some(Entry {
                    norm_token: normalize(token),
                    norm_label: normalize(&label),
                    token: token.to_string(),
                    label,
                    kind: ns.name(),
                    count: engine.count(token),
                })
            })
            .collect();
        Self { entries }
    }

    /// ranked substring matches, most common first, capped at 20
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let needle = normalize(query);
        if needle.is_empty() {
            return vec![];
        }
        let mut hits: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| e.norm_label.contains(&needle) || e.norm_token.contains(&needle))
            .collect();
        hits.sort_by(|a, b| b.count.cmp(&a.count));
        hits.into_iter()
            .take(Self::MAX_HITS)
            .map(|e| SearchHit {
                token: e.token.clone(),
                label: e.label.clone(),
                kind: e.kind,
                count: e.count,
            })
            .collect()
    }

    /// the full index for client-side search UIs
    pub fn all(&self) -> Vec<SearchHit> {
        self.entries
            .iter()
            .map(|e| SearchHit {
                token: e.token.clone(),
                label: e.label.clone(),
                kind: e.kind,
                count: e.count,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize("Kraken's Fury"), "krakensfury");
        assert_eq!(normalize("  U:Ashe "), "uashe");
    }
}

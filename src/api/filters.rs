use crate::engine::Engine;
use crate::tokens::ItemType;
use crate::tokens::Namespace;
use crate::tokens::items::item_prefix;
use serde::Serialize;
use std::collections::BTreeMap;

/// the item filter options a UI can offer. these narrow which candidates are
/// shown, they are never match constraints.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFilters {
    pub item_types: Vec<TypeOption>,
    pub item_prefixes: Vec<PrefixOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeOption {
    pub key: &'static str,
    pub label: &'static str,
    pub n_items: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrefixOption {
    pub key: String,
    pub items: Vec<String>,
    pub n_items: usize,
}

impl ItemFilters {
    /// built from the item presence tokens so the options match graph nodes
    pub fn new(engine: &Engine) -> Self {
        let mut type_counts: BTreeMap<ItemType, usize> = BTreeMap::new();
        let mut by_prefix: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (_, token) in engine.tokens_in(Namespace::Item) {
            let name = &token[2..];
            *type_counts.entry(ItemType::of(name)).or_insert(0) += 1;
            if let Some(prefix) = item_prefix(name) {
                by_prefix
                    .entry(prefix.to_string())
                    .or_default()
                    .push(name.to_string());
            }
        }

        let labeled = [
            (ItemType::Full, "Full items"),
            (ItemType::Radiant, "Radiant"),
            (ItemType::Artifact, "Artifacts"),
            (ItemType::Emblem, "Emblems"),
            (ItemType::Component, "Components"),
        ];
        let item_types = labeled
            .into_iter()
            .map(|(ty, label)| TypeOption {
                key: ty.key(),
                label,
                n_items: type_counts.get(&ty).copied().unwrap_or(0),
            })
            .collect();

        // only prefixes that actually denote a set of items
        let mut item_prefixes: Vec<PrefixOption> = by_prefix
            .into_iter()
            .filter(|(_, items)| items.len() >= 2)
            .map(|(key, mut items)| {
                items.sort();
                PrefixOption {
                    n_items: items.len(),
                    key,
                    items,
                }
            })
            .collect();
        item_prefixes.sort_by(|a, b| {
            b.n_items
                .cmp(&a.n_items)
                .then_with(|| a.key.to_lowercase().cmp(&b.key.to_lowercase()))
        });

        Self {
            item_types,
            item_prefixes,
        }
    }
}

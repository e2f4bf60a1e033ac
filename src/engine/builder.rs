use super::arrays::Proxies;
use super::engine::Engine;
use super::necessity::NecessityCache;
use super::row::PlayerMatchRow;
use super::stats::TokenStats;
use crate::PmId;
use crate::TokenId;
use crate::tokens::Vocab;
use crate::tokens::names;
use roaring::RoaringBitmap;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

/// opaque placeholder emitted by the randomized-bag mechanic
/// (Thief's Gloves rolls). ignored: not counted, not tokenized.
const EMPTY_BAG: &str = "EmptyBag";

/// single-pass tokenizer. every witnessed row gets the next dense pm-id;
/// token occurrences accumulate as raw id lists and are deduplicated into
/// bitmaps when the builder is sealed.
#[derive(Debug, Default)]
pub struct Builder {
    vocab: Vocab,
    touched: Vec<Vec<PmId>>,
    placements: Vec<i8>,
    proxies: Proxies,
    all_players: RoaringBitmap,
    trait_min_units: HashMap<(String, u8), u32>,
    trait_tiers_seen: HashMap<String, BTreeSet<u8>>,
    total_matches: u64,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, token: &str, label: &str, pm: PmId) {
        let id = self.vocab.intern(token, label);
        if id == self.touched.len() {
            self.touched.push(Vec::new());
        }
        self.touched[id].push(pm);
    }

    /// tokenize one player-match row
    pub fn witness(&mut self, row: &PlayerMatchRow) {
        let pm = self.placements.len() as PmId;
        self.placements.push(row.placement);
        self.proxies.push_default();
        self.all_players.insert(pm);
        self.total_matches += 1;

        let mut board_items: BTreeSet<String> = BTreeSet::new();
        let mut item_count = 0i16;
        let mut component_count = 0i16;
        let mut completed_count = 0i16;
        let mut unit_count = 0i16;
        let mut two_star = 0i16;
        let mut three_star = 0i16;
        let mut gold = 0i32;

        for unit in &row.units {
            let name = names::clean_unit(&unit.name);
            unit_count += 1;
            if unit.tier >= 2 {
                two_star += 1;
            }
            if unit.tier >= 3 {
                three_star += 1;
            }
            if unit.rarity >= 0 && unit.tier >= 1 {
                let cost = unit.rarity + 1;
                gold += cost * 3i32.pow((unit.tier - 1) as u32);
            }

            self.touch(&format!("U:{}", name), &name, pm);
            if unit.tier >= 1 {
                self.touch(
                    &format!("U:{}:{}", name, unit.tier),
                    &format!("{} {}", name, unit.tier),
                    pm,
                );
            }

            let mut copies: BTreeMap<String, u8> = BTreeMap::new();
            for raw in &unit.items {
                let item = names::clean_item(raw);
                if item == EMPTY_BAG {
                    continue;
                }
                item_count += 1;
                if crate::tokens::ItemType::of(&item) == crate::tokens::ItemType::Component {
                    component_count += 1;
                } else {
                    completed_count += 1;
                }
                board_items.insert(item.clone());
                *copies.entry(item).or_insert(0) += 1;
            }
            for (item, n_copies) in copies {
                self.touch(
                    &format!("E:{}|{}", name, item),
                    &format!("{} + {}", name, item),
                    pm,
                );
                if n_copies >= 2 {
                    self.touch(
                        &format!("E:{}|{}:2", name, item),
                        &format!("{} + {} x2", name, item),
                        pm,
                    );
                }
                if n_copies >= 3 {
                    self.touch(
                        &format!("E:{}|{}:3", name, item),
                        &format!("{} + {} x3", name, item),
                        pm,
                    );
                }
            }
        }

        for item in &board_items {
            self.touch(&format!("I:{}", item), item, pm);
        }

        for entry in &row.traits {
            let name = names::clean_trait(&entry.name);
            let tier = entry.tier.max(1);
            self.trait_tiers_seen
                .entry(name.clone())
                .or_default()
                .insert(tier);
            if let Some(num_units) = entry.num_units.filter(|&n| n > 0) {
                self.trait_min_units
                    .entry((name.clone(), tier))
                    .and_modify(|prev| *prev = (*prev).min(num_units))
                    .or_insert(num_units);
            }
            self.touch(&format!("T:{}", name), &name, pm);
            for level in 2..=tier {
                self.touch(
                    &format!("T:{}:{}", name, level),
                    &format!("{} {}", name, level),
                    pm,
                );
            }
        }

        let i = pm as usize;
        self.proxies.item_count[i] = item_count;
        self.proxies.component_count[i] = component_count;
        self.proxies.completed_item_count[i] = completed_count;
        self.proxies.unit_count[i] = unit_count;
        self.proxies.two_star_count[i] = two_star;
        self.proxies.three_star_count[i] = three_star;
        self.proxies.unit_gold_value[i] = gold;
    }

    /// deduplicate occurrences into bitmaps, recompute placement sums over
    /// unique ids, and rewrite trait labels to inferred in-game breakpoints
    pub fn seal(mut self) -> Engine {
        let mut tokens: Vec<TokenStats> = Vec::with_capacity(self.touched.len());
        for ids in &mut self.touched {
            ids.sort_unstable();
            ids.dedup();
            let placement_sum = ids
                .iter()
                .map(|&pm| self.placements[pm as usize] as i64)
                .sum();
            let bitmap = RoaringBitmap::from_sorted_iter(ids.iter().copied())
                .expect("occurrence lists are sorted and deduplicated");
            tokens.push(TokenStats {
                count: bitmap.len() as u32,
                bitmap,
                placement_sum,
            });
        }

        self.relabel_trait_breakpoints();

        let n_tokens = self.vocab.len();
        Engine {
            vocab: self.vocab,
            tokens,
            placements: self.placements,
            proxies: self.proxies,
            all_players: self.all_players,
            total_matches: self.total_matches,
            necessity: NecessityCache::unset(n_tokens),
        }
    }

    /// trait labels show the in-game unit breakpoint (e.g. "Demacia 5"), not
    /// the API's tier index. the breakpoint is the minimum observed unit
    /// count per (trait, tier). single-tier traits drop the number entirely.
    fn relabel_trait_breakpoints(&mut self) {
        let updates: Vec<(TokenId, String)> = self
            .trait_min_units
            .iter()
            .filter_map(|((name, tier), min_units)| {
                let token = if *tier == 1 {
                    format!("T:{}", name)
                } else {
                    format!("T:{}:{}", name, tier)
                };
                let id = self.vocab.id(&token)?;
                let tiers = self.trait_tiers_seen.get(name);
                let label = if tiers.map(|t| t.len()).unwrap_or(0) <= 1 {
                    name.clone()
                } else {
                    format!("{} {}", name, min_units)
                };
                Some((id, label))
            })
            .collect();
        for (id, label) in updates {
            self.vocab.set_label(id, label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::row::TraitRow;
    use crate::engine::row::UnitRow;

    fn unit(name: &str, tier: u8, items: &[&str]) -> UnitRow {
        UnitRow {
            name: name.to_string(),
            tier,
            rarity: 1,
            items: items.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn duplicate_touches_collapse() {
        let mut builder = Builder::new();
        builder.witness(&PlayerMatchRow {
            placement: 3,
            units: vec![unit("Ashe", 2, &[]), unit("Ashe", 2, &[])],
            traits: vec![],
        });
        let engine = builder.seal();
        let stats = engine.stats_of("U:Ashe").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.placement_sum, 3);
    }

    #[test]
    fn equipped_copy_counts() {
        let mut builder = Builder::new();
        builder.witness(&PlayerMatchRow {
            placement: 1,
            units: vec![unit("Ashe", 2, &["GuinsoosRageblade", "GuinsoosRageblade"])],
            traits: vec![],
        });
        builder.witness(&PlayerMatchRow {
            placement: 5,
            units: vec![unit("Ashe", 1, &["GuinsoosRageblade"])],
            traits: vec![],
        });
        let engine = builder.seal();
        assert_eq!(engine.count("E:Ashe|GuinsoosRageblade"), 2);
        assert_eq!(engine.count("E:Ashe|GuinsoosRageblade:2"), 1);
        assert_eq!(engine.count("E:Ashe|GuinsoosRageblade:3"), 0);
        assert_eq!(engine.count("I:GuinsoosRageblade"), 2);
    }

    #[test]
    fn empty_bag_is_invisible() {
        let mut builder = Builder::new();
        builder.witness(&PlayerMatchRow {
            placement: 4,
            units: vec![unit("Graves", 1, &["ThiefsGloves", "EmptyBag", "EmptyBag"])],
            traits: vec![],
        });
        let engine = builder.seal();
        assert_eq!(engine.count("I:EmptyBag"), 0);
        assert_eq!(engine.count("E:Graves|EmptyBag"), 0);
        assert_eq!(engine.proxies().item_count[0], 1);
    }

    #[test]
    fn tiered_traits_are_inclusive() {
        let mut builder = Builder::new();
        builder.witness(&PlayerMatchRow {
            placement: 2,
            units: vec![],
            traits: vec![TraitRow {
                name: "TFT16_Demacia".to_string(),
                tier: 3,
                num_units: Some(7),
            }],
        });
        let engine = builder.seal();
        assert_eq!(engine.count("T:Demacia"), 1);
        assert_eq!(engine.count("T:Demacia:2"), 1);
        assert_eq!(engine.count("T:Demacia:3"), 1);
        assert_eq!(engine.count("T:Demacia:4"), 0);
    }

    #[test]
    fn single_tier_trait_label_has_no_number() {
        let mut builder = Builder::new();
        builder.witness(&PlayerMatchRow {
            placement: 2,
            units: vec![],
            traits: vec![TraitRow {
                name: "ChosenWolves".to_string(),
                tier: 1,
                num_units: Some(2),
            }],
        });
        let engine = builder.seal();
        assert_eq!(engine.label("T:ChosenWolves"), "ChosenWolves");
    }

    #[test]
    fn gold_value_scales_with_stars() {
        let mut builder = Builder::new();
        builder.witness(&PlayerMatchRow {
            placement: 1,
            units: vec![UnitRow {
                name: "Ashe".to_string(),
                tier: 3,
                rarity: 3,
                items: vec![],
            }],
            traits: vec![],
        });
        let engine = builder.seal();
        // cost 4 at 3 stars: 4 * 3^2
        assert_eq!(engine.proxies().unit_gold_value[0], 36);
        assert_eq!(engine.proxies().two_star_count[0], 1);
        assert_eq!(engine.proxies().three_star_count[0], 1);
    }
}

use super::center::Center;
use super::center::CenterKind;
use super::filter::Filter;
use super::round_to;
use crate::engine::Engine;
use crate::engine::engine::Scored;
use crate::tokens::ItemType;
use crate::tokens::Namespace;
use crate::tokens::Token;
use crate::tokens::items::item_prefix;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::HashSet;

/// edge ordering for scored candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// |delta| descending
    #[default]
    Impact,
    /// delta ascending, lowest (best) first
    Helpful,
    /// delta descending, highest (worst) first
    Harmful,
}

impl TryFrom<&str> for SortMode {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "impact" => Ok(Self::Impact),
            "helpful" => Ok(Self::Helpful),
            "harmful" => Ok(Self::Harmful),
            other => Err(format!("unknown sort mode: {}", other)),
        }
    }
}

impl SortMode {
    pub fn order(&self, scored: &mut [Scored]) {
        match self {
            Self::Helpful => scored.sort_by(|a, b| a.delta.total_cmp(&b.delta)),
            Self::Harmful => scored.sort_by(|a, b| b.delta.total_cmp(&a.delta)),
            Self::Impact => scored.sort_by(|a, b| b.delta.abs().total_cmp(&a.delta.abs())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphOptions {
    pub min_sample: u64,
    pub top_k: usize,
    pub types: HashSet<Namespace>,
    pub sort: SortMode,
    pub item_types: Option<HashSet<ItemType>>,
    /// lowercase set prefixes whose items are admitted; base items always pass
    pub item_prefixes: HashSet<String>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            min_sample: 10,
            top_k: 15,
            types: HashSet::from([Namespace::Unit, Namespace::Item, Namespace::Trait]),
            sort: SortMode::Impact,
            item_types: None,
            item_prefixes: HashSet::new(),
        }
    }
}

impl GraphOptions {
    fn item_allowed(&self, item: &str) -> bool {
        if let Some(allowed) = &self.item_types {
            if !allowed.contains(&ItemType::of(item)) {
                return false;
            }
        }
        match item_prefix(item) {
            Some(prefix) => self.item_prefixes.contains(&prefix.to_ascii_lowercase()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Cooccur,
    Equipped,
}

impl EdgeKind {
    const fn name(&self) -> &'static str {
        match self {
            Self::Cooccur => "cooccur",
            Self::Equipped => "equipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub negated: bool,
    #[serde(rename = "isCenter")]
    pub is_center: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub token: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub delta: f64,
    pub avg_with: f64,
    pub avg_base: f64,
    pub n_with: u64,
    pub n_base: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BaseStats {
    pub n: u64,
    pub avg_placement: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphResponse {
    pub center: Vec<String>,
    pub base: BaseStats,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// candidate tokens for the current center, each tagged with its edge kind.
/// the pool depends on the shape of the selection: an empty center browses
/// everything, a unit center pulls its equipped items, and so on.
pub fn candidates(
    engine: &Engine,
    center: &Center,
    current: &HashSet<&str>,
) -> Vec<(String, EdgeKind)> {
    let fresh = |t: &str| !current.contains(t);
    let mut out: Vec<(String, EdgeKind)> = Vec::new();

    let units: Vec<&str> = engine
        .base_tokens_in(Namespace::Unit)
        .map(|(_, t)| t)
        .collect();
    let items: Vec<&str> = engine.tokens_in(Namespace::Item).map(|(_, t)| t).collect();
    let traits: Vec<&str> = engine
        .base_tokens_in(Namespace::Trait)
        .map(|(_, t)| t)
        .collect();

    match center.kind {
        CenterKind::Empty => {
            out.extend(units.iter().filter(|t| fresh(t)).map(|t| (t.to_string(), EdgeKind::Cooccur)));
            out.extend(items.iter().filter(|t| fresh(t)).map(|t| (t.to_string(), EdgeKind::Cooccur)));
            out.extend(traits.iter().filter(|t| fresh(t)).map(|t| (t.to_string(), EdgeKind::Cooccur)));
        }
        CenterKind::Trait => {
            out.extend(units.iter().filter(|t| fresh(t)).map(|t| (t.to_string(), EdgeKind::Cooccur)));
            out.extend(
                traits
                    .iter()
                    .filter(|t| fresh(t) && !center.traits.iter().any(|c| c.as_str() == &t[2..]))
                    .map(|t| (t.to_string(), EdgeKind::Cooccur)),
            );
        }
        CenterKind::Item if !center.has_units() => {
            item_centered(engine, center, &items, &traits, &fresh, &mut out);
        }
        _ if center.has_items() && !center.has_units() => {
            item_centered(engine, center, &items, &traits, &fresh, &mut out);
        }
        CenterKind::Unit if !center.has_items() => {
            unit_centered(engine, center, &units, &traits, &fresh, &mut out);
        }
        _ if center.has_units() && !center.has_items() => {
            unit_centered(engine, center, &units, &traits, &fresh, &mut out);
        }
        _ => {
            // unit + item combo: remaining items equippable on the center
            // units, then supporting units and traits
            for unit in &center.units {
                for (_, token) in engine.equipped_on(unit) {
                    if !fresh(token) {
                        continue;
                    }
                    let equipped_item = Token::try_from(token)
                        .ok()
                        .and_then(|t| t.item().map(String::from));
                    if let Some(item) = equipped_item {
                        if !center.items.contains(&item) {
                            out.push((token.to_string(), EdgeKind::Equipped));
                        }
                    }
                }
            }
            out.extend(
                units
                    .iter()
                    .filter(|t| fresh(t) && !center.units.iter().any(|c| c.as_str() == &t[2..]))
                    .map(|t| (t.to_string(), EdgeKind::Cooccur)),
            );
            out.extend(
                traits
                    .iter()
                    .filter(|t| fresh(t) && !center.traits.iter().any(|c| c.as_str() == &t[2..]))
                    .map(|t| (t.to_string(), EdgeKind::Cooccur)),
            );
        }
    }
    out
}

fn item_centered(
    engine: &Engine,
    center: &Center,
    items: &[&str],
    traits: &[&str],
    fresh: &dyn Fn(&str) -> bool,
    out: &mut Vec<(String, EdgeKind)>,
) {
    // units that actually equip the selected items
    for item in &center.items {
        let marker = format!("|{}", item);
        for (_, token) in engine.tokens_in(Namespace::Equipped) {
            if fresh(token) && token.contains(&marker) {
                out.push((token.to_string(), EdgeKind::Equipped));
            }
        }
    }
    out.extend(
        items
            .iter()
            .filter(|t| fresh(t) && !center.items.iter().any(|c| c.as_str() == &t[2..]))
            .map(|t| (t.to_string(), EdgeKind::Cooccur)),
    );
    out.extend(traits.iter().filter(|t| fresh(t)).map(|t| (t.to_string(), EdgeKind::Cooccur)));
}

fn unit_centered(
    engine: &Engine,
    center: &Center,
    units: &[&str],
    traits: &[&str],
    fresh: &dyn Fn(&str) -> bool,
    out: &mut Vec<(String, EdgeKind)>,
) {
    for unit in &center.units {
        for (_, token) in engine.equipped_on(unit) {
            if fresh(token) {
                out.push((token.to_string(), EdgeKind::Equipped));
            }
        }
    }
    out.extend(
        units
            .iter()
            .filter(|t| fresh(t) && !center.units.iter().any(|c| c.as_str() == &t[2..]))
            .map(|t| (t.to_string(), EdgeKind::Cooccur)),
    );
    out.extend(traits.iter().filter(|t| fresh(t)).map(|t| (t.to_string(), EdgeKind::Cooccur)));
}

/// the full graph query: filter, candidate generation, scoring, assembly
pub fn graph(engine: &Engine, filter: &Filter, opts: &GraphOptions) -> GraphResponse {
    if filter.is_empty() {
        return roots(engine, opts);
    }

    let base = engine.filter(&filter.include, &filter.exclude);
    let n_base = base.len();
    let avg_base = engine.avg_placement(&base);
    let center = Center::of(&filter.include);

    let mentioned: HashSet<&str> = filter.mentioned().collect();
    let mut pool = candidates(engine, &center, &mentioned);
    pool.retain(|(token, _)| match Token::try_from(token.as_str()) {
        Ok(Token::Item(item)) => opts.item_allowed(&item),
        Ok(parsed @ (Token::Equipped(..) | Token::EquippedCount(..))) => {
            let item = parsed.item().unwrap_or_default();
            center.items.iter().any(|c| c == item) || opts.item_allowed(item)
        }
        _ => true,
    });

    let kinds: HashMap<String, EdgeKind> = pool.iter().cloned().collect();
    let tokens: Vec<String> = pool.into_iter().map(|(t, _)| t).collect();
    let mut scored = engine.score_candidates(&base, &tokens, opts.min_sample);

    scored.retain(|s| match Namespace::of(&s.token) {
        Some(Namespace::Equipped) => {
            opts.types.contains(&Namespace::Unit) || opts.types.contains(&Namespace::Item)
        }
        Some(ns) => opts.types.contains(&ns),
        None => false,
    });
    opts.sort.order(&mut scored);
    if opts.top_k > 0 {
        scored.truncate(opts.top_k);
    }

    let mut nodes = Vec::new();
    let mut seen = HashSet::new();
    for (raw, negated) in filter
        .include
        .iter()
        .map(|t| (t, false))
        .chain(filter.exclude.iter().map(|t| (t, true)))
    {
        push_center_nodes(engine, raw, negated, &mut nodes, &mut seen);
    }

    let first = filter
        .tokens()
        .first()
        .and_then(|t| Token::try_from(t.as_str()).ok());

    let mut edges = Vec::new();
    for s in scored {
        let Ok(parsed) = Token::try_from(s.token.as_str()) else {
            continue;
        };
        let kind = kinds
            .get(&s.token)
            .copied()
            .unwrap_or(EdgeKind::Cooccur);
        let (from, to) = match &parsed {
            Token::Equipped(unit, _) | Token::EquippedCount(unit, _, _) => {
                let from = format!("U:{}", unit);
                let to = format!("I:{}", parsed.item().unwrap_or_default());
                ensure_node(engine, &from, "unit", &mut nodes, &mut seen);
                ensure_node(engine, &to, "item", &mut nodes, &mut seen);
                (from, to)
            }
            other => {
                let id = node_id(other);
                ensure_node(engine, &id, other.namespace().name(), &mut nodes, &mut seen);
                let from = first
                    .as_ref()
                    .map(|f| anchor_of(f, other.namespace()))
                    .unwrap_or_else(|| id.clone());
                (from, id)
            }
        };
        edges.push(Edge {
            from,
            to,
            label: engine.label(&s.token).to_string(),
            kind: kind.name(),
            token: s.token,
            delta: round_to(s.delta, 3),
            avg_with: round_to(s.avg_with, 3),
            avg_base: round_to(s.avg_base, 3),
            n_with: s.n_with,
            n_base: s.n_base,
        });
    }

    GraphResponse {
        center: filter.tokens(),
        base: BaseStats {
            n: n_base,
            avg_placement: round_to(avg_base, 3),
        },
        nodes,
        edges,
    }
}

/// empty-filter special case: every base unit, admitted item, and base trait
/// as a root node
fn roots(engine: &Engine, opts: &GraphOptions) -> GraphResponse {
    let mut nodes = Vec::new();
    for (_, token) in engine.base_tokens_in(Namespace::Unit) {
        nodes.push(root_node(engine, token, "unit"));
    }
    for (_, token) in engine.tokens_in(Namespace::Item) {
        if opts.item_allowed(&token[2..]) {
            nodes.push(root_node(engine, token, "item"));
        }
    }
    for (_, token) in engine.base_tokens_in(Namespace::Trait) {
        nodes.push(root_node(engine, token, "trait"));
    }
    GraphResponse {
        center: vec![],
        base: BaseStats {
            n: engine.total_matches(),
            avg_placement: crate::UNIFORM_PLACEMENT,
        },
        nodes,
        edges: vec![],
    }
}

fn root_node(engine: &Engine, token: &str, kind: &'static str) -> Node {
    Node {
        id: token.to_string(),
        label: engine.label(token).to_string(),
        kind,
        negated: false,
        is_center: false,
    }
}

/// node id of a parsed token: units collapse to their base form, traits keep
/// their tier
fn node_id(token: &Token) -> String {
    match token {
        Token::Unit(u) | Token::UnitStar(u, _) => format!("U:{}", u),
        Token::Item(i) => format!("I:{}", i),
        Token::Trait(t) => format!("T:{}", t),
        Token::TraitTier(t, k) => format!("T:{}:{}", t, k),
        Token::Equipped(u, _) | Token::EquippedCount(u, _, _) => format!("U:{}", u),
    }
}

/// where a co-occurrence edge hangs from: the first selected token, on the
/// side matching the candidate's namespace when the selection is equipped
fn anchor_of(first: &Token, candidate: Namespace) -> String {
    match first {
        Token::Equipped(unit, item) | Token::EquippedCount(unit, item, _) => {
            if candidate == Namespace::Item {
                format!("I:{}", item)
            } else {
                format!("U:{}", unit)
            }
        }
        other => node_id(other),
    }
}

fn ensure_node(
    engine: &Engine,
    id: &str,
    kind: &'static str,
    nodes: &mut Vec<Node>,
    seen: &mut HashSet<String>,
) {
    if seen.insert(id.to_string()) {
        nodes.push(Node {
            id: id.to_string(),
            label: engine.label(id).to_string(),
            kind,
            negated: false,
            is_center: false,
        });
    }
}

fn push_center_nodes(
    engine: &Engine,
    raw: &str,
    negated: bool,
    nodes: &mut Vec<Node>,
    seen: &mut HashSet<String>,
) {
    let Ok(token) = Token::try_from(raw) else {
        return;
    };
    let mut push = |id: String, kind: &'static str| {
        if seen.insert(id.clone()) {
            let label = engine.label(&id).to_string();
            nodes.push(Node {
                label: if negated {
                    format!("Not {}", label)
                } else {
                    label
                },
                id,
                kind,
                negated,
                is_center: true,
            });
        }
    };
    match &token {
        Token::Equipped(unit, item) | Token::EquippedCount(unit, item, _) => {
            push(format!("U:{}", unit), "unit");
            push(format!("I:{}", item), "item");
        }
        other => push(node_id(other), other.namespace().name()),
    }
}

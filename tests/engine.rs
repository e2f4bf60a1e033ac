//! end-to-end scenarios over the built engine: filter algebra, implication
//! subsets, clustering guardrails, playbooks, and causal estimates on
//! synthetic populations.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use roaring::RoaringBitmap;
use smeecher::causal::Outcome;
use smeecher::causal::OutcomeKind;
use smeecher::causal::aipw::AipwConfig;
use smeecher::causal::aipw::aipw_ate;
use smeecher::causal::design::Design;
use smeecher::causal::design::outcome_vector;
use smeecher::causal::necessity::NecessityOptions;
use smeecher::causal::necessity::item_necessity;
use smeecher::cluster::ClusterParams;
use smeecher::cluster::FeatureMatrix;
use smeecher::cluster::summary;
use smeecher::engine::Builder;
use smeecher::engine::Engine;
use smeecher::engine::row::PlayerMatchRow;
use smeecher::engine::row::TraitRow;
use smeecher::engine::row::UnitRow;
use smeecher::playbook::PlaybookOptions;
use smeecher::playbook::report::playbook;
use smeecher::query::Filter;
use smeecher::query::unit_items::ItemSort;
use smeecher::query::unit_items::UnitItemsOptions;
use smeecher::query::unit_items::unit_items;

fn unit(name: &str, tier: u8, items: &[&str]) -> UnitRow {
    UnitRow {
        name: name.to_string(),
        tier,
        rarity: 1,
        items: items.iter().map(|s| s.to_string()).collect(),
    }
}

fn board(placement: i8, units: Vec<UnitRow>) -> PlayerMatchRow {
    PlayerMatchRow {
        placement,
        units,
        traits: vec![],
    }
}

/// the four-board snapshot of the filter scenarios:
/// placements [1, 8, 4, 4], U:A on {0,1}, U:B on {1,2,3}
fn small_engine() -> Engine {
    let mut builder = Builder::new();
    builder.witness(&board(1, vec![unit("A", 1, &[])]));
    builder.witness(&board(8, vec![unit("A", 1, &[]), unit("B", 1, &[])]));
    builder.witness(&board(4, vec![unit("B", 1, &[])]));
    builder.witness(&board(4, vec![unit("B", 1, &[])]));
    builder.seal()
}

#[test]
fn filter_and_average() {
    let engine = small_engine();
    let base = engine.filter(&["U:A", "U:B"], &[]);
    assert_eq!(base.iter().collect::<Vec<_>>(), vec![1]);
    assert_eq!(engine.avg_placement(&base), 8.0);
}

#[test]
fn exclusion() {
    let engine = small_engine();
    let base = engine.filter(&["U:B"], &["U:A"]);
    assert_eq!(base.iter().collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(engine.avg_placement(&base), 4.0);
}

#[test]
fn empty_filter_is_all_players() {
    let engine = small_engine();
    let empty: Vec<&str> = vec![];
    assert_eq!(engine.filter(&empty, &empty), *engine.all_players());
}

#[test]
fn include_order_is_irrelevant() {
    let engine = small_engine();
    assert_eq!(
        engine.filter(&["U:A", "U:B"], &[]),
        engine.filter(&["U:B", "U:A"], &[])
    );
}

#[test]
fn adding_a_token_never_grows_the_base() {
    let engine = small_engine();
    let wide = engine.filter(&["U:B"], &[]);
    let narrow = engine.filter(&["U:B", "U:A"], &[]);
    assert!(narrow.len() <= wide.len());
    assert!(narrow.is_subset(&wide));
}

#[test]
fn exclude_duality() {
    let engine = small_engine();
    let all = engine.filter(&["U:B"], &[]).len();
    let without = engine.filter(&["U:B"], &["U:A"]).len();
    let with = engine.filter(&["U:B", "U:A"], &[]).len();
    assert_eq!(without, all - with);
}

#[test]
fn averages_match_token_stats() {
    let engine = small_engine();
    for token in ["U:A", "U:B"] {
        let stats = engine.stats_of(token).unwrap();
        let avg = engine.avg_placement(&stats.bitmap);
        assert!((1.0..=8.0).contains(&avg));
        assert_eq!(avg, stats.avg_placement());
    }
}

#[test]
fn unknown_tokens() {
    let engine = small_engine();
    assert!(engine.filter(&["U:Nobody"], &[]).is_empty());
    // unknown excludes are silently ignored
    assert_eq!(
        engine.filter(&["U:B"], &["U:Nobody"]),
        engine.filter(&["U:B"], &[])
    );
}

#[test]
fn trait_implication() {
    let mut builder = Builder::new();
    for placement in [1, 2, 3, 4] {
        builder.witness(&PlayerMatchRow {
            placement,
            units: vec![],
            traits: vec![TraitRow {
                name: "D".to_string(),
                tier: 3,
                num_units: Some(7),
            }],
        });
    }
    let engine = builder.seal();
    let all: RoaringBitmap = (0..4).collect();
    assert_eq!(engine.stats_of("T:D").unwrap().bitmap, all);
    assert_eq!(engine.stats_of("T:D:2").unwrap().bitmap, all);
    assert_eq!(engine.stats_of("T:D:3").unwrap().bitmap, all);
    assert!(engine.stats_of("T:D:4").is_none());
}

#[test]
fn equipped_count_implication() {
    let mut builder = Builder::new();
    builder.witness(&board(1, vec![unit("X", 1, &[])])); // padding so ids line up
    for _ in 0..6 {
        builder.witness(&board(2, vec![unit("X", 1, &[])]));
    }
    builder.witness(&board(3, vec![unit("U", 1, &["I", "I"])])); // pm 7
    builder.witness(&board(5, vec![unit("U", 1, &["I"])])); // pm 8
    let engine = builder.seal();
    assert_eq!(
        engine.stats_of("E:U|I").unwrap().bitmap.iter().collect::<Vec<_>>(),
        vec![7, 8]
    );
    assert_eq!(
        engine.stats_of("E:U|I:2").unwrap().bitmap.iter().collect::<Vec<_>>(),
        vec![7]
    );
    assert!(engine.stats_of("E:U|I:3").is_none());

    // subset chain
    let base = &engine.stats_of("E:U|I").unwrap().bitmap;
    let two = &engine.stats_of("E:U|I:2").unwrap().bitmap;
    assert!(two.is_subset(base));
}

#[test]
fn star_implication() {
    let mut builder = Builder::new();
    builder.witness(&board(1, vec![unit("A", 3, &[])]));
    builder.witness(&board(2, vec![unit("A", 2, &[])]));
    builder.witness(&board(3, vec![unit("A", 1, &[])]));
    let engine = builder.seal();
    let base = &engine.stats_of("U:A").unwrap().bitmap;
    let two = &engine.stats_of("U:A:2").unwrap().bitmap;
    let three = &engine.stats_of("U:A:3").unwrap().bitmap;
    assert!(three.is_subset(base));
    assert!(two.is_subset(base));
    assert_eq!(base.len(), 3);
    assert_eq!(two.len(), 1);
}

#[test]
fn score_candidates_deltas() {
    let engine = small_engine();
    let base = engine.filter(&["U:B"], &[]);
    let scored = engine.score_candidates(&base, &["U:A", "U:Nobody"], 1);
    assert_eq!(scored.len(), 1);
    let s = &scored[0];
    assert_eq!(s.token, "U:A");
    assert_eq!(s.n_with, 1);
    assert_eq!(s.n_base, 3);
    // base of U:B averages (8+4+4)/3, with U:A it is 8
    assert!((s.delta - (8.0 - 16.0 / 3.0)).abs() < 1e-9);
}

/// a population with two separable comps so clustering has signal
fn comp_engine(n: usize) -> Engine {
    let mut rng = StdRng::seed_from_u64(9);
    let mut builder = Builder::new();
    for i in 0..n {
        let (units, placement) = if i % 2 == 0 {
            (vec![unit("Ashe", 2, &["Bow"]), unit("Sett", 2, &[])], rng.random_range(1..=4))
        } else {
            (vec![unit("Briar", 2, &["Sword"]), unit("Zoe", 2, &[])], rng.random_range(4..=8))
        };
        builder.witness(&board(placement, units));
    }
    builder.seal()
}

#[test]
fn clustering_respects_floors_and_partition() {
    let engine = comp_engine(1_000);
    let params = ClusterParams {
        n_clusters: 4,
        min_token_freq: 10,
        ..ClusterParams::default()
    };
    let (report, members) = summary::compute(&engine, &Filter::default(), &params, "run".into());
    assert!(report.meta.warning.is_none());
    assert!(!report.clusters.is_empty());
    let mut total = 0u64;
    for cluster in &report.clusters {
        assert!(cluster.size >= params.min_cluster_size);
        total += cluster.size;
        let bitmap = members.of(cluster.cluster_id).unwrap();
        assert_eq!(bitmap.len(), cluster.size);
    }
    assert!(total <= report.base.n);
    // sorted by average placement ascending
    for pair in report.clusters.windows(2) {
        assert!(pair[0].avg_placement <= pair[1].avg_placement);
    }
}

#[test]
fn clustering_guardrails() {
    let engine = comp_engine(40);
    let params = ClusterParams::default();
    let (report, _) = summary::compute(&engine, &Filter::default(), &params, "run".into());
    assert!(report.clusters.is_empty());
    assert!(
        report
            .meta
            .warning
            .as_deref()
            .unwrap()
            .contains("too small")
    );

    let (report, _) = summary::compute(
        &engine,
        &Filter::parse("U:Nobody"),
        &params,
        "run".into(),
    );
    assert_eq!(
        report.meta.warning.as_deref(),
        Some("No matches for the current filters.")
    );
}

#[test]
fn playbook_ranks_drivers_over_killers() {
    let engine = comp_engine(1_000);
    let members = engine.filter::<&str>(&[], &[]);
    let report = playbook(&engine, &members, &PlaybookOptions::default());
    assert!(report.warning.is_none());
    assert!(!report.drivers.is_empty());
    assert!(!report.killers.is_empty());
    // Ashe boards go top-4; she should lead the drivers, not the killers
    let top_driver = &report.drivers[0];
    assert!(top_driver.delta_win >= report.killers[0].delta_win);
    for effect in report.drivers.iter().chain(&report.killers) {
        assert!(effect.n_with >= 30);
        assert!(effect.n_without >= 30);
        assert!((0.0..=1.0).contains(&effect.pct_in_cluster));
    }
}

#[test]
fn unit_items_helpful_sort_and_shrinkage() {
    let mut rng = StdRng::seed_from_u64(4);
    let mut builder = Builder::new();
    for _ in 0..600 {
        let (item, placement) = if rng.random_bool(0.5) {
            ("GoodItem", rng.random_range(1..=4))
        } else {
            ("BadItem", rng.random_range(5..=8))
        };
        builder.witness(&board(placement, vec![unit("Carry", 2, &[item])]));
    }
    let engine = builder.seal();
    let response = unit_items(
        &engine,
        "Carry",
        &Filter::default(),
        &UnitItemsOptions::default(),
    )
    .unwrap();
    assert_eq!(response.items.len(), 2);
    assert_eq!(response.items[0].item, "GoodItem");
    assert!(response.items[0].delta < 0.0);
    assert!(response.items[1].delta > 0.0);
    // shrinkage keeps the adjusted delta milder than the raw one
    assert!(response.items[0].delta.abs() <= response.items[0].raw_delta.abs());
}

#[test]
fn unit_items_unknown_unit_is_an_error() {
    let engine = small_engine();
    let err = unit_items(
        &engine,
        "Nobody",
        &Filter::default(),
        &UnitItemsOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, smeecher::error::Error::UnknownToken(_)));
}

/// a randomized synthetic design over filler units
fn random_design(n: usize, seed: u64) -> (Engine, Design) {
    let pool = ["A", "B", "C", "D", "E", "F", "G", "H"];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut builder = Builder::new();
    for _ in 0..n {
        let mut units = Vec::new();
        for name in pool {
            if rng.random_bool(0.4) {
                units.push(unit(name, 1, &[]));
            }
        }
        if units.is_empty() {
            units.push(unit("A", 1, &[]));
        }
        builder.witness(&board(rng.random_range(1..=8), units));
    }
    let engine = builder.seal();
    let features: Vec<_> = pool
        .iter()
        .filter_map(|name| engine.vocab().id(&format!("U:{}", name)))
        .collect();
    let matrix = FeatureMatrix::build(&engine, engine.all_players(), &features);
    let design = Design::new(&engine, matrix, None);
    (engine, design)
}

#[test]
fn aipw_randomized_treatment_covers_zero() {
    let mut covered = 0;
    for seed in 0..8u64 {
        let (engine, design) = random_design(3_000, 100 + seed);
        let y = outcome_vector(&engine, &design.sparse, Outcome::Top4);
        let mut rng = StdRng::seed_from_u64(500 + seed);
        let t: Vec<u8> = (0..design.n_rows())
            .map(|_| rng.random_bool(0.5) as u8)
            .collect();
        let fit = aipw_ate(
            &design,
            &t,
            &y,
            OutcomeKind::Binary,
            &AipwConfig {
                seed,
                ..AipwConfig::default()
            },
        )
        .expect("randomized treatment always overlaps");
        if fit.estimate.ci95_low <= 0.0 && fit.estimate.ci95_high >= 0.0 {
            covered += 1;
        }
    }
    assert!(covered >= 6, "CI covered zero only {}/8 times", covered);
}

#[test]
fn aipw_recovers_a_unit_effect() {
    let (_engine, design) = random_design(4_000, 7);
    let mut rng = StdRng::seed_from_u64(8);
    let t: Vec<u8> = (0..design.n_rows())
        .map(|_| rng.random_bool(0.5) as u8)
        .collect();
    // y = T + uniform noise, a true effect of exactly one
    let y: Vec<f32> = t
        .iter()
        .map(|&ti| ti as f32 + rng.random::<f32>() - 0.5)
        .collect();
    let fit = aipw_ate(
        &design,
        &t,
        &y,
        OutcomeKind::Continuous,
        &AipwConfig::default(),
    )
    .expect("randomized treatment always overlaps");
    assert!(
        (fit.estimate.tau - 1.0).abs() < 0.1,
        "tau = {}",
        fit.estimate.tau
    );
    assert!(fit.estimate.ci95_low <= 1.0 && 1.0 <= fit.estimate.ci95_high);
}

#[test]
fn item_necessity_overlap_failure_is_a_value() {
    // treatment is perfectly determined by one unit: boards with Mark always
    // equip the item, boards without never do
    let mut rng = StdRng::seed_from_u64(3);
    let mut builder = Builder::new();
    for i in 0..1_200 {
        let marked = i % 10 == 0;
        let mut units = vec![unit(
            "Carry",
            1,
            if marked { &["Sword"] } else { &[] },
        )];
        if marked {
            units.push(unit("Mark", 1, &[]));
        }
        // filler variety so the feature matrix is not degenerate
        if rng.random_bool(0.5) {
            units.push(unit("Filler", 1, &[]));
        }
        builder.witness(&board(rng.random_range(1..=8), units));
    }
    let engine = builder.seal();

    let response = item_necessity(
        &engine,
        "Carry",
        "Sword",
        &Filter::default(),
        &NecessityOptions {
            min_token_freq: 1,
            ..NecessityOptions::default()
        },
    )
    .unwrap();
    assert!(response.effect.is_none());
    assert!(response.warning.is_some());
    let overlap = response.overlap.expect("diagnostics accompany the failure");
    assert!(
        overlap.frac_trimmed > 0.9,
        "frac_trimmed = {}",
        overlap.frac_trimmed
    );
}

#[test]
fn necessity_cache_serves_default_context() {
    use smeecher::engine::necessity::StoredNecessity;
    let mut rng = StdRng::seed_from_u64(5);
    let mut builder = Builder::new();
    for _ in 0..400 {
        let items: &[&str] = if rng.random_bool(0.5) { &["Bow"] } else { &[] };
        builder.witness(&board(rng.random_range(1..=8), vec![unit("Carry", 1, items)]));
    }
    let mut engine = builder.seal();
    let eq_id = engine.vocab().id("E:Carry|Bow").unwrap();
    engine.necessity_mut().set(
        eq_id,
        StoredNecessity {
            tau: 0.07,
            ci95_low: 0.02,
            ci95_high: 0.12,
            se: 0.025,
            raw_tau: 0.09,
            frac_trimmed: 0.1,
            e_p01: 0.2,
            e_p99: 0.8,
            n_treated: 200,
            n_control: 200,
            n_used: 360,
            scope_min_star: 1,
        },
    );

    let response = unit_items(
        &engine,
        "Carry",
        &Filter::default(),
        &UnitItemsOptions {
            sort: ItemSort::Necessity,
            min_sample: 10,
            ..UnitItemsOptions::default()
        },
    )
    .unwrap();
    let bow = response.items.iter().find(|i| i.item == "Bow").unwrap();
    let necessity = bow.necessity.as_ref().expect("served from the cache");
    assert_eq!(necessity.method, "aipw");
    assert!((necessity.tau - 0.07).abs() < 1e-6);
}

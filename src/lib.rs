pub mod api;
pub mod causal;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod playbook;
pub mod query;
pub mod tokens;

/// dimensional analysis types
pub type PmId = u32;
pub type TokenId = usize;
pub type Placement = i8;
pub type Probability = f64;
pub type Effect = f64;

/// mean placement of a uniform 8-player lobby, used for empty sets
pub const UNIFORM_PLACEMENT: f64 = 4.5;

// minibatch kmeans parameters
pub const KMEANS_BATCH_SIZE: usize = 2048;
pub const KMEANS_N_INIT: usize = 3;
pub const KMEANS_MAX_BATCHES: usize = 100;
pub const KMEANS_REASSIGNMENT_RATIO: f64 = 0.01;

// cluster result cache parameters
pub const CLUSTER_CACHE_CAPACITY: usize = 24;
pub const CLUSTER_CACHE_TTL_SECS: u64 = 10 * 60;

// aipw estimator parameters
pub const AIPW_CLIP_EPS: f64 = 1e-3;
pub const AIPW_PRECOMPUTE_CLIP_EPS: f64 = 1e-2;
pub const AIPW_TRIM_LOW: f64 = 0.05;
pub const AIPW_TRIM_HIGH: f64 = 0.95;
pub const AIPW_FOLD_MIN_GROUP: usize = 25;
pub const AIPW_USED_MIN_GROUP: usize = 50;
pub const AIPW_MAX_ROWS: usize = 80_000;

// auto-scope heuristic: restrict a unit's base to 2-star-plus boards when
// they dominate the sample (share and floor reproduced from observed behavior)
pub const SCOPE_STAR2_SHARE: f64 = 0.7;
pub const SCOPE_STAR2_MIN_ROWS: usize = 2_000;

// necessity precompute parameters
pub const NECESSITY_MIN_GROUP: usize = 100;
pub const NECESSITY_MIN_TOKEN_FREQ: u32 = 25;
pub const NECESSITY_SPLITS: usize = 2;

// stratified fast-path parameters
pub const STRATA_MAX_CLUSTERS: usize = 8;
pub const STRATA_ROWS_PER_CLUSTER: usize = 500;
pub const STRATA_MIN_CLUSTER_GROUP: usize = 50;

/// trait for random generation, mainly (strictly?) for testing
pub trait Arbitrary {
    fn random() -> Self;
}

/// progress bar
pub fn progress(n: usize) -> indicatif::ProgressBar {
    let tick = std::time::Duration::from_secs(60);
    let style = "{spinner:.cyan} {elapsed} ~ {percent:>3}% {wide_bar:.cyan}";
    let style = indicatif::ProgressStyle::with_template(style).unwrap();
    let progress = indicatif::ProgressBar::new(n as u64);
    progress.set_style(style);
    progress.enable_steady_tick(tick);
    progress
}

/// initialize logging and exit on ctrl-c
pub fn init() {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.unwrap();
        println!();
        log::warn!("forcing exit");
        std::process::exit(0);
    });
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
}

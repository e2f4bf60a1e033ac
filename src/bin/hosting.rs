//! Hosting Server Binary
//!
//! Loads the engine snapshot and serves the HTTP query surface. a missing
//! snapshot starts the server in degraded mode; a version mismatch refuses
//! to start.

use clap::Parser;
use smeecher::api::Api;
use smeecher::api::Server;
use smeecher::api::server::AppState;
use smeecher::engine::Engine;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(about = "serve the smeecher analytics engine")]
struct Args {
    #[arg(long, default_value = "data/engine.bin")]
    snapshot: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    smeecher::init();
    let args = Args::parse();

    let api = match Engine::load(&args.snapshot) {
        Ok(engine) => Some(Api::from(Arc::new(engine))),
        Err(e) if e.is_fatal() => {
            log::error!("refusing to start: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            log::warn!("engine unavailable ({}); serving degraded responses", e);
            None
        }
    };

    Server::run(AppState { api }, &args.bind).await?;
    Ok(())
}

// src/main.rs
//
// Headless walk through the world: moves the observer along +x, lets the workers settle and
// logs stream statistics.
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info};

use voxel_stream::streaming::CountingConsumer;
use voxel_stream::{ChunkManager, StreamConfig, StreamError};

#[derive(Parser, Debug)]
#[command(name = "voxel-stream", about = "Stream LOD chunks around a walking observer")]
struct Args {
    /// TOML file with stream settings.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Number of one-chunk steps to walk.
    #[arg(long, default_value_t = 16)]
    steps: u32,

    /// Persist chunks under this directory instead of in memory.
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Seconds to wait for the workers after each step.
    #[arg(long, default_value_t = 30)]
    settle_secs: u64,
}

fn run(args: Args) -> Result<(), StreamError> {
    let mut cfg = match &args.config {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::default(),
    };
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }
    if args.save_dir.is_some() {
        cfg.save_dir = args.save_dir;
    }

    let consumer = Arc::new(CountingConsumer::new());
    let mut mgr = ChunkManager::builder(cfg).consumer(consumer.clone()).build()?;
    let settle = Duration::from_secs(args.settle_secs);
    let t_start = Instant::now();

    for step in 0..=args.steps {
        let x = step as f64 * 32.0 + 16.0;
        let t_step = Instant::now();
        mgr.seek_default(x, 16.0, 16.0);
        let idle = mgr.wait_until_idle(settle);

        let s = mgr.stats();
        info!(
            "step {step:>3} x={x:>6.0} | {:.1} ms{} | leaves {} full / {} reduced | chunks {} in {} metas | \
             reduced cache {}/{} (miss {}) | maps {}/{} | jobs {} ok / {} failed | saves {} queued",
            t_step.elapsed().as_secs_f64() * 1000.0,
            if idle { "" } else { " (busy)" },
            s.leaves_full,
            s.leaves_reduced,
            s.normal_chunks,
            s.meta_chunks,
            s.reduced_cache.entries,
            s.reduced_cache.capacity,
            s.reduced_cache.misses,
            s.map_cache.entries,
            s.map_cache.capacity,
            s.jobs_done,
            s.jobs_failed,
            s.save_backlog,
        );
    }

    if !mgr.force_save() {
        error!("save queue stopped before the final flush");
    }
    let s = mgr.stats();
    mgr.shutdown();
    let (full, reduced, deleted) = consumer.counts();
    info!("walked {} steps in {:.2} s", args.steps, t_start.elapsed().as_secs_f64());
    info!(
        "meshes: {full} full, {reduced} reduced, {deleted} deleted | saves: {} written, {} failed",
        s.saves_done, s.saves_failed
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

mod args;
mod build_info;
mod config;
mod log;

use std::{
    process::exit,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use ekacore::clock::SystemClock;
use tracing::{error, info};

use crate::args::Args;

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // clap's own Display already renders a usage message.
            err.print().ok();
            exit(1);
        }
    };

    match main_wrapped(args) {
        Ok(()) => exit(0),
        Err(err) => {
            eprintln!("fatal: {err:#}");
            exit(2);
        }
    }
}

/// Loads configuration and sets up logging synchronously, before any tokio
/// runtime exists. `time::UtcOffset::current_local_offset` refuses to run on
/// a multi-threaded process on Linux, so the offset read in `log::init` must
/// happen here, not inside `run`'s `#[tokio::main]` body.
fn main_wrapped(args: Args) -> Result<()> {
    let cfg = config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let log_guard = log::init(args.verbose, cfg.log_level, args.logdir.as_deref())
        .context("failed to set up logging")?;

    info!(version = build_info::version(), "starting up");

    run(cfg, log_guard)
}

#[tokio::main]
async fn run(cfg: config::Config, _log_guard: log::Guard) -> Result<()> {
    let batch_plugin: Arc<dyn batch::BatchPlugin> = cfg.batch_plugin.build().into();
    let cloud_driver: Arc<dyn cloud::CloudDriver> =
        Arc::new(cloud::Ec2Driver::connect(cfg.cloud).await.context("cannot connect to cloud driver")?);
    let clock = Arc::new(SystemClock);

    let mut sched = scheduler::Scheduler::new(cfg.scheduler, batch_plugin, cloud_driver, clock);
    let sleep_for = Duration::from_secs(sched.config.sleep_s);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("termination signal received, will stop after the in-flight pass completes");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    while !shutdown.load(Ordering::SeqCst) {
        if let Err(err) = sched.tick().await {
            error!(%err, "error while dispatching scheduled events");
        }
        tokio::time::sleep(sleep_for).await;
    }

    info!("shut down cleanly");
    Ok(())
}

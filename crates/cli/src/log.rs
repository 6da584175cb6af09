use std::path::Path;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry};

const LTF_KITCHEN: &str = "[hour padding:none repr:12]:[minute padding:zero] [period case:upper]";

/// Holds the non-blocking file writer's flush guard for as long as logging
/// must stay alive. Dropping it flushes and stops the background thread.
pub struct Guard(#[allow(dead_code)] Option<WorkerGuard>);

fn offset_timer() -> Result<fmt::time::OffsetTime<Vec<time::format_description::FormatItem<'static>>>> {
    let parsed = time::format_description::parse(LTF_KITCHEN)
        .context("BUG: cannot parse static time format")?;
    let offset =
        time::UtcOffset::current_local_offset().context("BUG: cannot obtain current UTC offset")?;
    Ok(fmt::time::OffsetTime::new(offset, parsed))
}

/// Sets up a compact stdout layer plus, when `logdir` is given, a
/// non-ANSI daily-rotating file layer. `verbosity` (`-v` count) overrides
/// `configured_level` (`elastiq.log_level`) when higher.
pub fn init(verbosity: u8, configured_level: u8, logdir: Option<&Path>) -> Result<Guard> {
    let level = match verbosity.max(configured_level) {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let stdout_layer = fmt::layer()
        .compact()
        .with_timer(offset_timer()?)
        .with_ansi(true)
        .with_filter(LevelFilter::from_level(level));

    let (file_layer, guard) = match logdir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "elastiq.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(offset_timer()?)
                .with_filter(LevelFilter::from_level(level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default().with(stdout_layer).with(file_layer).init();

    Ok(Guard(guard))
}

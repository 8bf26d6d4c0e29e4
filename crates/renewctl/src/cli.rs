//! Exposes the command line application.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use renewable::Renewable;

use crate::command::ExternalCommand;
use crate::config::Config;
use crate::logging;

/// Wraps a command into a renewable cache and polls it.
///
/// The trimmed stdout of the command is the cached value, a failing command is the cached
/// error. Every reader calls the cache `count` times with `interval` in between and prints what
/// it got back, together with how often the command has run so far.
///
/// The cache strategy and its periods are read from the `cache` section of the configuration
/// file. Without one, results are cached for one second.
#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The pause between two calls of the same reader, e.g. `250ms`.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "500ms")]
    interval: Duration,

    /// The number of calls per reader.
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// The number of concurrent readers.
    #[arg(long, default_value_t = 1)]
    readers: usize,

    /// The command to run, followed by its arguments.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    // SAFETY: No other threads have been spawned at this point.
    unsafe { logging::init_logging(&config.logging) };

    if let Some(ref statsd) = config.metrics.statsd {
        renewable::metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            BTreeMap::new(),
        )?;
    }

    let Some((program, args)) = cli.command.split_first() else {
        anyhow::bail!("no command given");
    };
    let command = ExternalCommand::new(program.clone(), args.to_vec());
    let cache = config
        .cache
        .build(command.producer())
        .context("invalid cache configuration")?;

    tracing::info!(
        strategy = ?config.cache.strategy,
        readers = cli.readers,
        count = cli.count,
        interval = ?cli.interval,
        "polling `{}`",
        program,
    );
    poll(cache.as_ref(), &command, cli.readers, cli.count, cli.interval);

    Ok(())
}

fn poll(
    cache: &dyn Renewable<String, String>,
    command: &ExternalCommand,
    readers: usize,
    count: usize,
    interval: Duration,
) {
    let start = Instant::now();

    thread::scope(|scope| {
        for reader in 0..readers {
            scope.spawn(move || {
                for call in 0..count {
                    if call > 0 {
                        thread::sleep(interval);
                    }

                    let before = Instant::now();
                    let result = cache.get();
                    let line = format_line(
                        reader,
                        before - start,
                        before.elapsed(),
                        &result,
                        command.runs(),
                    );
                    println!("{line}");
                }
            });
        }
    });
}

fn format_line(
    reader: usize,
    elapsed: Duration,
    latency: Duration,
    result: &Result<String, String>,
    runs: usize,
) -> String {
    let elapsed = Duration::from_millis(elapsed.as_millis() as u64);
    let latency = Duration::from_millis(latency.as_millis() as u64);
    let outcome = match result {
        Ok(value) => format!("ok: {value}"),
        Err(err) => format!("error: {err}"),
    };
    format!("[reader {reader}] +{elapsed:?} (took {latency:?}) {outcome} (runs: {runs})")
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from([
            "renewctl", "--interval", "2s", "--readers", "4", "--", "date", "-u",
        ])
        .unwrap();
        assert_eq!(cli.config(), None);
        assert_eq!(cli.interval, Duration::from_secs(2));
        assert_eq!(cli.count, 10);
        assert_eq!(cli.readers, 4);
        assert_eq!(cli.command, ["date", "-u"]);

        assert!(Cli::try_parse_from(["renewctl", "--count", "3"]).is_err());
    }

    #[test]
    fn test_format_line() {
        let line = format_line(
            1,
            Duration::from_micros(1_502_300),
            Duration::from_micros(300),
            &Ok("v2".into()),
            2,
        );
        insta::assert_snapshot!(line, @"[reader 1] +1.502s (took 0ns) ok: v2 (runs: 2)");

        let line = format_line(
            0,
            Duration::from_millis(40),
            Duration::from_millis(12),
            &Err("upstream unavailable".into()),
            1,
        );
        insta::assert_snapshot!(line, @"[reader 0] +40ms (took 12ms) error: upstream unavailable (runs: 1)");
    }
}

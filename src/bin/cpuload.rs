//! Shows the CPU load as a green-to-red gradient on one pixel of the strip,
//! polling every few seconds. Talks to a running blinky server; does not
//! touch the hardware itself.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, warn};

use blinky::client::IpcClient;
use blinky::config::Config;
use blinky::strip::Rgb;

const PROC_STAT: &str = "/proc/stat";
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const LED_INDEX: usize = 6;

/// The gradient stays dim; channel values top out here, not at 255.
const MAX_BRIGHTNESS: f64 = 10.0;

#[derive(Parser)]
#[command(name = "cpuload")]
#[command(about = "Show the CPU load on LED 6 of a blinky server's strip", long_about = None)]
struct Cli {
    /// Path to a JSON configuration override file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug output (one load line per poll)
    #[arg(short, long)]
    verbose: bool,
}

/// Cumulative busy and total jiffies from the aggregate `cpu` line of
/// `/proc/stat`. Load is the busy share of the delta between two samples.
#[derive(Clone, Copy)]
struct CpuSample {
    busy: u64,
    total: u64,
}

fn read_cpu_sample() -> Result<CpuSample> {
    let stat = fs::read_to_string(PROC_STAT)
        .with_context(|| format!("Failed to read {}", PROC_STAT))?;
    parse_cpu_sample(&stat)
}

/// Parse the aggregate `cpu` line. The `idle` and `iowait` fields count as
/// idle; everything else counts as busy.
fn parse_cpu_sample(stat: &str) -> Result<CpuSample> {
    let line = stat
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| anyhow!("No cpu line in {}", PROC_STAT))?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .map(str::parse::<u64>)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Unexpected cpu line {:?}", line))?;
    if fields.len() < 5 {
        return Err(anyhow!("Unexpected cpu line {:?}", line));
    }

    let total: u64 = fields.iter().sum();
    let idle = fields[3] + fields[4];
    Ok(CpuSample { busy: total - idle, total })
}

/// Load between two samples as a percentage; 0 when no time has passed.
fn load_percent(previous: CpuSample, current: CpuSample) -> f64 {
    let total = current.total.saturating_sub(previous.total);
    if total == 0 {
        return 0.0;
    }
    let busy = current.busy.saturating_sub(previous.busy);
    100.0 * busy as f64 / total as f64
}

fn color_for_cpu_load(percent: f64) -> Rgb {
    let red = (percent.clamp(0.0, 100.0) * (MAX_BRIGHTNESS / 100.0)) as u8;
    [red, MAX_BRIGHTNESS as u8 - red, 0]
}

/// Sleep in short ticks so Ctrl-C is noticed well before the full interval.
fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(200));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = Config::load(cli.config.as_deref())?;
    let client = IpcClient::from_config(&config)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::Relaxed))
            .context("Could not set Ctrl-C handler")?;
    }

    // The first iteration measures over a near-zero window and reads as 0%.
    let mut previous = read_cpu_sample()?;
    while running.load(Ordering::Relaxed) {
        let current = read_cpu_sample()?;
        let percent = load_percent(previous, current);
        previous = current;
        debug!("CPU load: {:.1}%", percent);

        // A server that is down or restarting is not fatal; keep polling.
        if let Err(e) = client.on(LED_INDEX, color_for_cpu_load(percent)) {
            warn!("Could not update the strip: {:#}", e);
        }
        sleep_while_running(&running, POLL_INTERVAL);
    }

    if let Err(e) = client.off(LED_INDEX) {
        warn!("Could not turn the pixel off: {:#}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_aggregate_cpu_line() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        let sample = parse_cpu_sample(stat).unwrap();
        assert_eq!(sample.total, 1000);
        assert_eq!(sample.busy, 150);
    }

    #[test]
    fn rejects_missing_or_malformed_cpu_lines() {
        assert!(parse_cpu_sample("intr 12345\nctxt 6789\n").is_err());
        assert!(parse_cpu_sample("cpu  1 2 junk\n").is_err());
        assert!(parse_cpu_sample("cpu  1 2 3\n").is_err());
    }

    #[test]
    fn load_is_the_busy_share_of_the_delta() {
        let previous = CpuSample { busy: 150, total: 1000 };
        let current = CpuSample { busy: 350, total: 1400 };
        assert!((load_percent(previous, current) - 50.0).abs() < f64::EPSILON);

        // No elapsed jiffies reads as idle rather than dividing by zero.
        assert_eq!(load_percent(current, current), 0.0);
    }

    #[test]
    fn idle_load_is_full_green() {
        assert_eq!(color_for_cpu_load(0.0), [0, 10, 0]);
    }

    #[test]
    fn full_load_is_full_red() {
        assert_eq!(color_for_cpu_load(100.0), [10, 0, 0]);
        assert_eq!(color_for_cpu_load(250.0), [10, 0, 0]);
    }

    #[test]
    fn midrange_load_mixes_red_and_green() {
        assert_eq!(color_for_cpu_load(55.0), [5, 5, 0]);
    }
}

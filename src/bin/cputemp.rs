//! Shows the CPU temperature as a green-to-red gradient on one pixel of the
//! strip, polling once a minute. Talks to a running blinky server; does not
//! touch the hardware itself.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, warn};

use blinky::client::IpcClient;
use blinky::config::Config;
use blinky::strip::Rgb;

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
const POLL_INTERVAL: Duration = Duration::from_secs(60);
const LED_INDEX: usize = 7;

/// Gradient endpoints: full green at or below 50 C, full red at or above 80 C.
const FULL_GREEN_LEVEL: f64 = 50.0;
const FULL_RED_LEVEL: f64 = 80.0;
/// The gradient stays dim; channel values top out here, not at 255.
const MAX_BRIGHTNESS: f64 = 10.0;

#[derive(Parser)]
#[command(name = "cputemp")]
#[command(about = "Show the CPU temperature on LED 7 of a blinky server's strip", long_about = None)]
struct Cli {
    /// Path to a JSON configuration override file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug output (one temperature line per poll)
    #[arg(short, long)]
    verbose: bool,
}

fn read_cpu_temperature() -> Result<f64> {
    let raw = fs::read_to_string(THERMAL_ZONE)
        .with_context(|| format!("Failed to read {}", THERMAL_ZONE))?;
    let millidegrees: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Unexpected thermal reading {:?}", raw.trim()))?;
    Ok(millidegrees / 1000.0)
}

fn color_for_cpu_temp(temperature: f64) -> Rgb {
    let level = temperature.clamp(FULL_GREEN_LEVEL, FULL_RED_LEVEL);

    // Map the clamped temperature onto 0..=MAX_BRIGHTNESS.
    let level = (level - FULL_GREEN_LEVEL) * (MAX_BRIGHTNESS / (FULL_RED_LEVEL - FULL_GREEN_LEVEL));

    [level as u8, (MAX_BRIGHTNESS - level) as u8, 0]
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

    while running.load(Ordering::Relaxed) {
        let temperature = read_cpu_temperature()?;
        debug!("CPU temperature: {:.1} C", temperature);

        // A server that is down or restarting is not fatal; keep polling.
        if let Err(e) = client.on(LED_INDEX, color_for_cpu_temp(temperature)) {
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
    fn cold_cpu_is_full_green() {
        assert_eq!(color_for_cpu_temp(35.0), [0, 10, 0]);
        assert_eq!(color_for_cpu_temp(50.0), [0, 10, 0]);
    }

    #[test]
    fn hot_cpu_is_full_red() {
        assert_eq!(color_for_cpu_temp(80.0), [10, 0, 0]);
        assert_eq!(color_for_cpu_temp(95.0), [10, 0, 0]);
    }

    #[test]
    fn midpoint_mixes_red_and_green() {
        assert_eq!(color_for_cpu_temp(65.0), [5, 5, 0]);
    }
}

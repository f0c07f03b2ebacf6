//! Shows whether a host is reachable on one pixel of the strip, polling once
//! a minute: blue while probing, dim green when the host answers, red when it
//! does not. Talks to a running blinky server.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use blinky::client::IpcClient;
use blinky::config::Config;
use blinky::strip::Rgb;

const POLL_INTERVAL: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const LED_INDEX: usize = 5;

const COLOR_WHILE_CHECKING: Rgb = [0, 0, 255];
const COLOR_OK: Rgb = [0, 8, 0];
const COLOR_ERROR: Rgb = [255, 0, 0];

#[derive(Parser)]
#[command(name = "network_check")]
#[command(about = "Show a host's reachability on LED 5 of a blinky server's strip", long_about = None)]
struct Cli {
    /// host:port probed to decide whether the network is alive,
    /// e.g. your router's web interface
    #[arg(default_value = "192.168.10.1:80")]
    target: String,

    /// Path to a JSON configuration override file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,
}

/// A TCP connect that succeeds within the timeout counts as alive. Resolution
/// failures count as dead, same as an unreachable host.
fn is_network_alive(target: &str) -> bool {
    let addrs = match target.to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) => return false,
    };
    for addr in addrs {
        if TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok() {
            return true;
        }
    }
    false
}

/// Sleep in short ticks so Ctrl-C is noticed well before the full interval.
fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(200));
    }
}

/// A server that is down or restarting is not fatal; keep polling.
fn show_status(client: &IpcClient, color: Rgb) {
    if let Err(e) = client.on(LED_INDEX, color) {
        warn!("Could not update the strip: {:#}", e);
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
        show_status(&client, COLOR_WHILE_CHECKING);

        if is_network_alive(&cli.target) {
            info!("{} is reachable", cli.target);
            show_status(&client, COLOR_OK);
        } else {
            warn!("{} is unreachable", cli.target);
            show_status(&client, COLOR_ERROR);
        }

        sleep_while_running(&running, POLL_INTERVAL);
    }

    if let Err(e) = client.off(LED_INDEX) {
        warn!("Could not turn the pixel off: {:#}", e);
    }
    Ok(())
}

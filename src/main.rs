use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::warn;

use blinky::client::IpcClient;
use blinky::config::Config;
use blinky::server::IpcServer;
#[cfg(feature = "hardware")]
use blinky::strip::BlinktStrip;
#[cfg(not(feature = "hardware"))]
use blinky::strip::MemoryStrip;

#[derive(Parser)]
#[command(name = "blinky")]
#[command(about = "Remote control for an 8-pixel LED strip\n\nRun `server` on the host wired to the strip; on/off/flash talk to it over TCP.", long_about = None)]
struct Cli {
    /// Path to a JSON configuration override file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the LED server (blocks until Ctrl-C)
    Server,
    /// Turn one LED on
    On {
        /// LED index (0-7)
        #[arg(default_value_t = 0)]
        led: usize,
        #[arg(default_value_t = 255)]
        red: u8,
        #[arg(default_value_t = 255)]
        green: u8,
        #[arg(default_value_t = 255)]
        blue: u8,
    },
    /// Turn one LED off
    Off {
        /// LED index (0-7)
        #[arg(default_value_t = 0)]
        led: usize,
    },
    /// Flash one LED, then restore whatever it showed before
    Flash {
        /// LED index (0-7)
        #[arg(default_value_t = 0)]
        led: usize,
        #[arg(default_value_t = 255)]
        red: u8,
        #[arg(default_value_t = 255)]
        green: u8,
        #[arg(default_value_t = 255)]
        blue: u8,
        /// Flash duration in milliseconds (0-1000)
        #[arg(default_value_t = 100)]
        time: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        CliCommand::Server => run_server(&config),
        CliCommand::On { led, red, green, blue } => {
            send_command(&config, |client| client.on(led, [red, green, blue]))
        }
        CliCommand::Off { led } => send_command(&config, |client| client.off(led)),
        CliCommand::Flash { led, red, green, blue, time } => {
            send_command(&config, |client| client.flash(led, [red, green, blue], time))
        }
    }
}

fn run_server(config: &Config) -> Result<()> {
    let strip = open_strip(config)?;
    let mut server = IpcServer::bind(config, strip)?;

    println!(
        "Running server on {}, brightness={}%, press CTRL-C to exit",
        server.local_addr()?,
        config.led_brightness_percent
    );

    // Ctrl-C clears the flag; the serve loops notice within one poll tick.
    let running = server.get_running_flag();
    let result = ctrlc::set_handler(move || {
        running.store(false, Ordering::Relaxed);
    });
    if let Err(e) = result {
        warn!("Could not set Ctrl-C handler: {}", e);
    }

    server.startup_indication()?;
    server.run()?;

    println!("Exiting");
    server.shutdown_indication()
}

#[cfg(feature = "hardware")]
fn open_strip(config: &Config) -> Result<BlinktStrip> {
    BlinktStrip::new(config.led_brightness_percent)
}

#[cfg(not(feature = "hardware"))]
fn open_strip(config: &Config) -> Result<MemoryStrip> {
    warn!("Built without the hardware feature; driving an in-memory strip");
    Ok(MemoryStrip::new(config.led_brightness_percent))
}

fn send_command<F>(config: &Config, send: F) -> Result<()>
where
    F: FnOnce(&IpcClient) -> Result<String>,
{
    let client = IpcClient::from_config(config)?;
    let response = send(&client)?;
    println!("Received: {}", response);
    Ok(())
}

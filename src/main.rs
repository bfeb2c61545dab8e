use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;
use ks_led_controller::*;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    target: Target,

    /// Scan duration in seconds while looking for devices
    #[arg(long, default_value_t = 8)]
    scan_timeout: u64,

    /// Overall deadline in seconds; in-flight devices report a timeout
    /// once it expires
    #[arg(long)]
    deadline: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Device model prefix (KS03~, KS03-, KS04-, KS01-, KS02-)
    #[arg(short, long, default_value = "KS03~")]
    prefix: String,

    /// Explicit link address; skips prefix disambiguation
    #[arg(short, long)]
    address: Option<String>,

    /// Target every discovered device with the prefix
    #[arg(long)]
    all: bool,
}

impl Target {
    fn selector(&self) -> Selector {
        if let Some(address) = &self.address {
            Selector::Address(address.clone())
        } else if self.all {
            Selector::AllWithPrefix(self.prefix.clone())
        } else {
            Selector::Prefix(self.prefix.clone())
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Turn the lamp on
    On,
    /// Turn the lamp off
    Off,
    /// Set to red color
    Red,
    /// Set to green color
    Green,
    /// Set to blue color
    Blue,
    /// Set to white color
    White,
    /// Set a custom RGB color
    Color {
        /// Red value (0-255)
        #[arg(short, long, default_value_t = 255)]
        red: u8,
        /// Green value (0-255)
        #[arg(short, long, default_value_t = 255)]
        green: u8,
        /// Blue value (0-255)
        #[arg(short, long, default_value_t = 255)]
        blue: u8,
        /// Brightness percent (0-100); floor lamps only
        #[arg(short = 'l', long)]
        brightness: Option<u8>,
    },
    /// Set brightness; floor lamps only
    Brightness {
        /// Brightness level (0-100)
        #[arg(short, long, default_value_t = 100)]
        level: u8,
    },
    /// List recognized devices in range
    Scan,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with pretty colors
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("ks_led_controller=info")),
        )
        .compact()
        .init();

    // Initialize color-eyre for pretty error reporting
    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let transport = match BleTransport::new().await {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!("Failed to open Bluetooth adapter: {e}");
            return Err(e.into());
        }
    };
    let controller = LampController::new(
        transport,
        ControllerConfig {
            scan_timeout: Duration::from_secs(cli.scan_timeout),
            session: SessionConfig::default(),
        },
    );

    let intent = match cli.command {
        Commands::Scan => {
            let devices = controller.scan().await?;
            if devices.is_empty() {
                println!("No recognized devices found");
            }
            for device in devices {
                match device.rssi {
                    Some(rssi) => println!(
                        "{}  {}  {} dBm  ({})",
                        device.address, device.name, rssi, device.profile.dialect
                    ),
                    None => println!(
                        "{}  {}  ({})",
                        device.address, device.name, device.profile.dialect
                    ),
                }
            }
            return Ok(());
        }
        Commands::On => Intent::PowerOn,
        Commands::Off => Intent::PowerOff,
        Commands::Red => color_intent(255, 0, 0, None)?,
        Commands::Green => color_intent(0, 255, 0, None)?,
        Commands::Blue => color_intent(0, 0, 255, None)?,
        Commands::White => color_intent(255, 255, 255, None)?,
        Commands::Color {
            red,
            green,
            blue,
            brightness,
        } => color_intent(red, green, blue, brightness)?,
        Commands::Brightness { level } => Intent::SetBrightness(Brightness::new(level)?),
    };

    let deadline = cli.deadline.map(Duration::from_secs);
    let outcomes = controller
        .execute(&cli.target.selector(), &intent, deadline)
        .await?;

    let mut failed = false;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => println!("OK    {}  ({})", outcome.address, outcome.name),
            Err(e) => {
                failed = true;
                println!("FAIL  {}  ({}): {e}", outcome.address, outcome.name);
            }
        }
    }
    if failed {
        std::process::exit(1);
    }

    Ok(())
}

fn color_intent(red: u8, green: u8, blue: u8, brightness: Option<u8>) -> Result<Intent> {
    Ok(Intent::SetColor {
        color: Color::new(red, green, blue),
        brightness: brightness.map(Brightness::new).transpose()?,
    })
}

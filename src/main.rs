use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use futures::future::join_all;
use tracing::{error, info};

use switchbridge::config::{self, Device};
use switchbridge::{transport, Driver, Registry, Result};

#[derive(Parser, Debug)]
#[command(name = "switchctl", about = "Set ties and power on A/V switches and monitors")]
struct Cli {
    /// Device configuration, YAML or JSON.
    #[arg(short, long, env = "SWITCHCTL_CONFIG", default_value = "./config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the known driver families.
    Drivers,
    /// List local serial ports as location strings.
    Ports,
    /// Route an input to outputs on the given devices (all if none given).
    Tie {
        input: u32,
        #[arg(long, default_value_t = 1)]
        video: u32,
        /// Defaults to the video output.
        #[arg(long)]
        audio: Option<u32>,
        devices: Vec<String>,
    },
    PowerOn {
        devices: Vec<String>,
    },
    PowerOff {
        devices: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Tie { input: u32, video: u32, audio: u32 },
    PowerOn,
    PowerOff,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            error!("{}", err);
            process::exit(2);
        }
    }
}

/// Returns false when any device operation failed.
async fn run(cli: Cli) -> Result<bool> {
    let registry = Registry::with_builtin_drivers()?;

    let (operation, names) = match cli.command {
        Command::Drivers => {
            for about in registry.all() {
                println!(
                    "{}  {:<8} {:<36} [{}]",
                    about.guid, about.kind, about.title, about.capabilities
                );
            }
            return Ok(true);
        }
        Command::Ports => {
            for port in transport::available_ports()? {
                println!("{}", port);
            }
            return Ok(true);
        }
        Command::Tie {
            input,
            video,
            audio,
            devices,
        } => (
            Operation::Tie {
                input,
                video,
                audio: audio.unwrap_or(video),
            },
            devices,
        ),
        Command::PowerOn { devices } => (Operation::PowerOn, devices),
        Command::PowerOff { devices } => (Operation::PowerOff, devices),
    };

    let config_root = config::read_config(&cli.config)?;
    config_root.check_drivers(&registry)?;

    let mut selected: Vec<(&String, &Device)> = Vec::new();
    if names.is_empty() {
        selected.extend(config_root.devices.iter());
    } else {
        for name in &names {
            match config_root.devices.get_key_value(name) {
                Some(entry) => selected.push(entry),
                None => {
                    error!("Unknown device: {}", name);
                    return Ok(false);
                }
            }
        }
    }

    let mut drivers = Vec::with_capacity(selected.len());
    for (name, device) in selected {
        let driver = registry.load(&device.driver, &device.path).await?;
        drivers.push((device.title.as_ref().unwrap_or(name), driver));
    }

    // One operation per device, all in flight at once.
    let results = join_all(
        drivers
            .iter()
            .map(|(_, driver)| apply(driver.as_ref(), operation)),
    )
    .await;

    let mut ok = true;
    for ((name, driver), result) in drivers.iter().zip(results) {
        match result {
            Ok(()) => info!("{}: done", name),
            Err(err) => {
                error!("{}: {}", name, err);
                ok = false;
            }
        }
        driver.unload().await?;
    }
    Ok(ok)
}

async fn apply(driver: &dyn Driver, operation: Operation) -> Result<()> {
    match operation {
        Operation::Tie {
            input,
            video,
            audio,
        } => driver.set_tie(input, video, audio).await?,
        Operation::PowerOn => driver.power_on().await?,
        Operation::PowerOff => driver.power_off().await?,
    }
    Ok(())
}

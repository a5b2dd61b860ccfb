//! Command line control for Intellivent Sky fans
//!
//! State lives in `$INTELLIVENT_HOME` (default `~/.intellivent`):
//! `config.json` for connection tuning and `settings.json` for the
//! encrypted auth codes.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};
use intellivent_ble::btleplug_backend::{self, BtleplugCentral};
use intellivent_ble::{ConnectionConfig, ConnectionManager, FanDevice, SettingsUpdate};
use intellivent_keystore::{FileStore, KdfParams, KeyStore};
use intellivent_proto::AuthCode;
use intellivent_proto::validate::validated_rpm;
use log::info;
use serde::{Deserialize, Serialize};

type Fan = FanDevice<BtleplugCentral, FileStore>;

#[derive(Parser)]
#[command(name = "intellivent")]
#[command(about = "Control Intellivent Sky and ICE ventilation fans over BLE")]
struct Cli {
    /// Give up connecting after this many seconds
    #[arg(long, global = true, default_value = "60")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for fans
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Print the fan's current state as JSON
    Status {
        #[arg(short, long)]
        device: String,
    },
    /// Switch boost mode, optionally changing its duration and speed
    Boost {
        #[arg(short, long)]
        device: String,
        #[arg(action = ArgAction::Set, value_parser = BoolishValueParser::new())]
        enabled: bool,
        #[arg(long)]
        minutes: Option<f64>,
        #[arg(long)]
        rpm: Option<i64>,
    },
    /// Switch pause mode
    Pause {
        #[arg(short, long)]
        device: String,
        #[arg(action = ArgAction::Set, value_parser = BoolishValueParser::new())]
        enabled: bool,
        #[arg(long)]
        minutes: Option<f64>,
    },
    /// Switch humidity mode, optionally changing sensitivity (0-3) and speed
    Humidity {
        #[arg(short, long)]
        device: String,
        #[arg(action = ArgAction::Set, value_parser = BoolishValueParser::new())]
        enabled: bool,
        #[arg(long)]
        detection: Option<f64>,
        #[arg(long)]
        rpm: Option<i64>,
    },
    /// Switch constant speed mode, optionally changing the target speed
    Speed {
        #[arg(short, long)]
        device: String,
        #[arg(action = ArgAction::Set, value_parser = BoolishValueParser::new())]
        enabled: bool,
        #[arg(long)]
        rpm: Option<i64>,
    },
    /// Override the fan speed temporarily
    TempSpeed {
        #[arg(short, long)]
        device: String,
        #[arg(action = ArgAction::Set, value_parser = BoolishValueParser::new())]
        enabled: bool,
        #[arg(long, default_value = "1200")]
        rpm: i64,
    },
    /// Store an auth code, or read it from a fan in pairing mode
    Auth {
        #[arg(short, long)]
        device: String,
        /// Hex code; omit to fetch it from the fan
        code: Option<String>,
    },
    /// Delete the stored auth code and disconnect
    Forget {
        #[arg(short, long)]
        device: String,
    },
}

/// Contents of `config.json`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Config {
    connection: ConnectionConfig,
    kdf: KdfParams,
}

struct Context {
    config: Config,
    keystore: Arc<KeyStore<FileStore>>,
    timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let home = intellivent_home()?;
    std::fs::create_dir_all(&home)?;
    let config = load_config(&home)?;
    let settings = FileStore::open(home.join("settings.json"))?;
    let ctx = Context {
        keystore: Arc::new(KeyStore::with_params(settings, config.kdf)),
        config,
        timeout: Duration::from_secs(cli.timeout),
    };

    match cli.command {
        Commands::Scan { duration } => scan_devices(duration).await?,
        Commands::Status { device } => {
            let fan = start(&ctx, &device).await?;
            let snapshot = fan.poll().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            fan.stop().await;
        }
        Commands::Boost {
            device,
            enabled,
            minutes,
            rpm,
        } => {
            let fan = start(&ctx, &device).await?;
            let update = SettingsUpdate {
                boost_minutes: minutes,
                boost_rpm: rpm,
                ..SettingsUpdate::default()
            };
            fan.apply_settings(&update).await?;
            fan.set_boost_enabled(enabled).await?;
            println!("Boost {}", on_off(enabled));
            fan.stop().await;
        }
        Commands::Pause {
            device,
            enabled,
            minutes,
        } => {
            let fan = start(&ctx, &device).await?;
            let update = SettingsUpdate {
                pause_minutes: minutes,
                ..SettingsUpdate::default()
            };
            fan.apply_settings(&update).await?;
            fan.set_pause_enabled(enabled).await?;
            println!("Pause {}", on_off(enabled));
            fan.stop().await;
        }
        Commands::Humidity {
            device,
            enabled,
            detection,
            rpm,
        } => {
            let fan = start(&ctx, &device).await?;
            let update = SettingsUpdate {
                humidity_detection: detection,
                humidity_rpm: rpm,
                ..SettingsUpdate::default()
            };
            fan.apply_settings(&update).await?;
            fan.set_humidity_enabled(enabled).await?;
            println!("Humidity mode {}", on_off(enabled));
            fan.stop().await;
        }
        Commands::Speed {
            device,
            enabled,
            rpm,
        } => {
            let fan = start(&ctx, &device).await?;
            if let Some(rpm) = rpm {
                fan.set_target_rpm(rpm).await?;
            }
            fan.set_constant_speed_enabled(enabled).await?;
            println!("Constant speed {}", on_off(enabled));
            fan.stop().await;
        }
        Commands::TempSpeed {
            device,
            enabled,
            rpm,
        } => {
            let fan = start(&ctx, &device).await?;
            let rpm = validated_rpm(rpm);
            fan.sky().set_temporary_speed(enabled, rpm).await?;
            println!("Temporary speed {} at {rpm} rpm", on_off(enabled));
            fan.stop().await;
        }
        Commands::Auth { device, code } => {
            let fan = open(&ctx, &device).await?;
            if let Some(code) = code {
                let code = AuthCode::from_hex(&code)?;
                fan.sky().connection().save_credentials(&code).await?;
                println!("Auth code stored for {device}");
            }
            connect(&ctx, &fan).await?;
            if fan.sky().connection().has_credentials().await? {
                println!("{device} is paired");
            } else {
                println!("No auth code for {device}. Put the fan in pairing mode and retry.");
            }
            fan.stop().await;
        }
        Commands::Forget { device } => {
            let fan = open(&ctx, &device).await?;
            fan.forget().await?;
            println!("Forgot {device}");
        }
    }

    Ok(())
}

fn intellivent_home() -> Result<PathBuf, Box<dyn Error>> {
    if let Ok(home) = std::env::var("INTELLIVENT_HOME") {
        return Ok(PathBuf::from(home));
    }
    let home = dirs::home_dir().ok_or("Could not determine home directory")?;
    Ok(home.join(".intellivent"))
}

fn load_config(home: &Path) -> Result<Config, Box<dyn Error>> {
    let path = home.join("config.json");
    if path.exists() {
        return Ok(serde_json::from_str(&std::fs::read_to_string(&path)?)?);
    }

    let config = Config::default();
    std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;
    info!("Created default config at {}", path.display());
    Ok(config)
}

async fn open(ctx: &Context, address: &str) -> Result<Fan, Box<dyn Error>> {
    let central = BtleplugCentral::new().await?;
    let connection = ConnectionManager::new(
        address,
        central,
        Arc::clone(&ctx.keystore),
        ctx.config.connection.clone(),
    );
    Ok(FanDevice::new(Arc::new(connection)))
}

async fn connect(ctx: &Context, fan: &Fan) -> Result<(), Box<dyn Error>> {
    tokio::time::timeout(ctx.timeout, fan.start())
        .await
        .map_err(|_| format!("no connection within {}s", ctx.timeout.as_secs()))??;
    Ok(())
}

async fn start(ctx: &Context, address: &str) -> Result<Fan, Box<dyn Error>> {
    let fan = open(ctx, address).await?;
    connect(ctx, &fan).await?;
    Ok(fan)
}

async fn scan_devices(duration: u64) -> Result<(), Box<dyn Error>> {
    println!("Scanning for fans ({duration} seconds)...");
    let devices = btleplug_backend::scan(Duration::from_secs(duration)).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.supported { " [INTELLIVENT]" } else { "" };
        println!("  {} ({}) RSSI: {rssi}{marker}", device.name, device.address);
    }
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

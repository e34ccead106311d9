use std::path::PathBuf;

use anyhow::Context as _;
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::Parser;
use log::{error, info};
use tokio::sync::{broadcast, mpsc};

mod actuator;
mod config;
mod filter;
mod gate;
mod manager;
mod messages;
mod mqtt;
mod radio;
mod registry;
mod sweep;

use actuator::{DryRunPin, OutputPin, SysfsPin};

/// Opens a gate when a named BLE beacon comes into range.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log relay and LED writes instead of driving GPIO
    #[arg(long)]
    dry_run: bool,
}

fn open_pin(
    pin: u8,
    label: &'static str,
    active_low: bool,
    dry_run: bool,
) -> anyhow::Result<Box<dyn OutputPin>> {
    if dry_run {
        return Ok(Box::new(DryRunPin::new(label)));
    }
    let gpio = SysfsPin::open(pin, active_low).with_context(|| format!("opening {label} pin"))?;
    Ok(Box::new(gpio))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();
    let config = config::AppConfig::load(&cli.config)?;

    info!(
        "Watching for \"{}\" (RSSI >= {}, grace {:?})",
        config.beacon.target_name,
        config.beacon.rssi_threshold(),
        config.beacon.grace_period()
    );

    let dry_run = cli.dry_run || config.gpio.dry_run.unwrap_or(false);
    let active_low = config.gpio.active_low.unwrap_or(false);
    let relay = open_pin(config.gpio.relay_pin(), "relay", active_low, dry_run)?;
    let led = config
        .gpio
        .led_pin
        .map(|pin| open_pin(pin, "led", false, dry_run))
        .transpose()?;

    let (notifier, _) = broadcast::channel(32);

    let mqtt_client = match &config.mqtt {
        Some(mqtt_config) => {
            let (client, mut eventloop) = mqtt::MqttClient::new(mqtt_config);
            tokio::task::spawn(async move {
                mqtt::MqttClient::event_loop(&mut eventloop).await;
            });
            let forwarder = client.clone();
            let rx = notifier.subscribe();
            tokio::task::spawn(async move {
                forwarder.forward(rx).await;
            });
            Some(client)
        }
        None => None,
    };

    let bt_manager = Manager::new().await?;

    // get the first bluetooth adapter
    let adapters = bt_manager.adapters().await?;
    let adapter = adapters
        .into_iter()
        .next()
        .context("no bluetooth adapter found")?;

    let radio = radio::BtleRadio::new(adapter);
    let (tx, rx) = mpsc::channel(64);
    let pump = radio.clone();
    tokio::task::spawn(async move {
        if let Err(err) = pump.pump_events(tx).await {
            error!("Error handling BTLE events: {:?}", err);
        }
    });

    let mut core = manager::Manager::new(radio, rx, &config, relay, led, notifier);
    core.run_loop(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    if let Some(client) = mqtt_client {
        client.disconnect().await?;
    }

    Ok(())
}

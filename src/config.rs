use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, ensure};
use log::warn;
use serde_derive::Deserialize;

use crate::gate::GateTiming;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub beacon: BeaconConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
    pub mqtt: Option<MqttConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BeaconConfig {
    pub target_name: String,
    pub rssi_threshold: Option<i16>,
    pub exit_grace_period_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct GateConfig {
    pub pulse_duration_ms: Option<u64>,
    pub movement_duration_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct GpioConfig {
    pub relay_pin: Option<u8>,
    pub led_pin: Option<u8>,
    pub blink_interval_ms: Option<u64>,
    pub active_low: Option<bool>,
    pub dry_run: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: AppConfig = toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.beacon.target_name.is_empty(),
            "beacon.target_name must not be empty"
        );
        // the sweep runs every half grace period, which must not round to zero
        ensure!(
            self.beacon.grace_period() >= Duration::from_millis(2),
            "beacon.exit_grace_period_ms must be at least 2"
        );
        ensure!(
            !self.gpio.blink_interval().is_zero(),
            "gpio.blink_interval_ms must be positive"
        );
        let timing = self.gate.timing();
        ensure!(!timing.pulse.is_zero(), "gate.pulse_duration_ms must be positive");
        ensure!(
            !timing.movement.is_zero(),
            "gate.movement_duration_ms must be positive"
        );
        if timing.pulse > timing.movement {
            warn!(
                "Pulse ({:?}) outlasts the movement window ({:?})",
                timing.pulse,
                timing.movement
            );
        }
        Ok(())
    }
}

impl BeaconConfig {
    pub fn rssi_threshold(&self) -> i16 {
        self.rssi_threshold.unwrap_or(-100)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.exit_grace_period_ms.unwrap_or(2000))
    }
}

impl GateConfig {
    pub fn timing(&self) -> GateTiming {
        let defaults = GateTiming::default();
        GateTiming {
            pulse: self
                .pulse_duration_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.pulse),
            movement: self
                .movement_duration_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.movement),
        }
    }
}

impl GpioConfig {
    pub fn relay_pin(&self) -> u8 {
        self.relay_pin.unwrap_or(17)
    }

    pub fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.blink_interval_ms.unwrap_or(200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            [beacon]
            target_name = "TurnoutNow"
            rssi_threshold = -90
            exit_grace_period_ms = 4000

            [gate]
            pulse_duration_ms = 500
            movement_duration_ms = 7000

            [gpio]
            relay_pin = 27
            led_pin = 4
            active_low = true

            [mqtt]
            host = "localhost"
            port = 1883
        "#;
        let config: AppConfig = toml::de::from_str(config_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.beacon.target_name, "TurnoutNow");
        assert_eq!(config.beacon.rssi_threshold(), -90);
        assert_eq!(config.beacon.grace_period(), Duration::from_millis(4000));
        assert_eq!(config.gate.timing().pulse, Duration::from_millis(500));
        assert_eq!(config.gate.timing().movement, Duration::from_millis(7000));
        assert_eq!(config.gpio.relay_pin(), 27);
        assert_eq!(config.gpio.led_pin, Some(4));
        assert_eq!(config.gpio.active_low, Some(true));
        assert!(config.mqtt.is_some());
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::de::from_str(
            r#"
            [beacon]
            target_name = "TurnoutNow"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.beacon.rssi_threshold(), -100);
        assert_eq!(config.beacon.grace_period(), Duration::from_millis(2000));
        assert_eq!(config.gate.timing().pulse, Duration::from_millis(1000));
        assert_eq!(config.gate.timing().movement, Duration::from_millis(3000));
        assert_eq!(config.gpio.relay_pin(), 17);
        assert_eq!(config.gpio.led_pin, None);
        assert_eq!(config.gpio.blink_interval(), Duration::from_millis(200));
        assert!(config.mqtt.is_none());
    }

    #[test]
    fn test_zero_grace_period_rejected() {
        let config: AppConfig = toml::de::from_str(
            r#"
            [beacon]
            target_name = "TurnoutNow"
            exit_grace_period_ms = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_beacon_section_rejected() {
        let result: Result<AppConfig, _> = toml::de::from_str("[gate]\npulse_duration_ms = 10\n");
        assert!(result.is_err());
    }
}

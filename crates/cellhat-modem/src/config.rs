use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ModemError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigInput {
    pub modem: ModemConfigInput,
    pub timing: TimingInput,
    pub alerts: AlertConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModemConfigInput {
    pub serial_device: Option<String>,
    pub power_key: Option<u32>,
    pub imei: Option<String>,
    pub apn: Option<String>,
    pub my_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimingInput {
    pub command_timeout_ms: Option<u64>,
    pub extended_timeout_ms: Option<u64>,
    pub submit_timeout_ms: Option<u64>,
    pub poll_period_ms: Option<u64>,
    pub gps_warmup_ms: Option<u64>,
    pub gps_retry_delay_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlertConfigInput {
    pub player: Option<String>,
    pub ring_sound: Option<PathBuf>,
    pub text_sound: Option<PathBuf>,
}

/// Modem identity and wiring. Missing values are filled in interactively by
/// the agent before the session starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModemConfig {
    pub serial_device: Option<String>,
    /// BCM GPIO pin wired to the HAT's power key.
    pub power_key: Option<u32>,
    pub imei: Option<String>,
    pub apn: Option<String>,
    pub my_number: Option<String>,
}

impl ModemConfig {
    pub const FIELDS: [&'static str; 5] =
        ["serial_device", "power_key", "imei", "apn", "my_number"];

    pub fn missing_fields(&self) -> Vec<&'static str> {
        Self::FIELDS
            .into_iter()
            .filter(|name| match *name {
                "serial_device" => self.serial_device.is_none(),
                "power_key" => self.power_key.is_none(),
                "imei" => self.imei.is_none(),
                "apn" => self.apn.is_none(),
                _ => self.my_number.is_none(),
            })
            .collect()
    }

    pub fn set_field(&mut self, name: &str, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ModemError::Config(format!("{name} must not be empty")));
        }
        match name {
            "serial_device" => self.serial_device = Some(value.to_string()),
            "power_key" => {
                let pin = value
                    .parse()
                    .map_err(|_| ModemError::Config(format!("power_key {value:?} is not a pin number")))?;
                self.power_key = Some(pin);
            }
            "imei" => self.imei = Some(value.to_string()),
            "apn" => self.apn = Some(value.to_string()),
            "my_number" => self.my_number = Some(value.to_string()),
            other => return Err(ModemError::Config(format!("unknown modem field {other:?}"))),
        }
        Ok(())
    }
}

/// Transaction windows and loop periods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Window for ordinary commands.
    pub command: Duration,
    /// APN set, SMS recipient prompt, bulk delete.
    pub extended: Duration,
    /// Final `OK` after an SMS body.
    pub submit: Duration,
    pub poll_period: Duration,
    pub gps_warmup: Duration,
    pub gps_retry_delay: Duration,
    pub shutdown_grace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(1),
            extended: Duration::from_secs(2),
            submit: Duration::from_secs(20),
            poll_period: Duration::from_secs(1),
            gps_warmup: Duration::from_secs(2),
            gps_retry_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertConfig {
    /// Program invoked with the sound file as its only argument.
    pub player: String,
    pub ring_sound: Option<PathBuf>,
    pub text_sound: Option<PathBuf>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            player: "aplay".into(),
            ring_sound: None,
            text_sound: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub modem: ModemConfig,
    pub timing: Timing,
    pub alerts: AlertConfig,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

impl ConfigInput {
    pub fn resolve(self) -> Result<Config> {
        let defaults = Timing::default();
        let ms = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        let timing = Timing {
            command: ms(self.timing.command_timeout_ms, defaults.command),
            extended: ms(self.timing.extended_timeout_ms, defaults.extended),
            submit: ms(self.timing.submit_timeout_ms, defaults.submit),
            poll_period: ms(self.timing.poll_period_ms, defaults.poll_period),
            gps_warmup: ms(self.timing.gps_warmup_ms, defaults.gps_warmup),
            gps_retry_delay: ms(self.timing.gps_retry_delay_ms, defaults.gps_retry_delay),
            shutdown_grace: ms(self.timing.shutdown_grace_ms, defaults.shutdown_grace),
        };
        if timing.poll_period.is_zero() {
            return Err(ModemError::Config("poll_period_ms must be positive".into()));
        }

        let modem = ModemConfig {
            serial_device: non_empty(self.modem.serial_device),
            power_key: self.modem.power_key,
            imei: non_empty(self.modem.imei),
            apn: non_empty(self.modem.apn),
            my_number: non_empty(self.modem.my_number),
        };

        let alerts = AlertConfig {
            player: non_empty(self.alerts.player).unwrap_or_else(|| AlertConfig::default().player),
            ring_sound: self.alerts.ring_sound,
            text_sound: self.alerts.text_sound,
        };

        Ok(Config {
            modem,
            timing,
            alerts,
        })
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Config::default());
        }
        let parsed: ConfigInput = toml::from_str(input)
            .map_err(|e| ModemError::Config(format!("Invalid config TOML: {e}")))?;
        parsed.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_config_basic() {
        let toml = r#"
            [modem]
            serial_device = "/dev/ttyUSB2"
            power_key = 6
            imei = "867584030000000"
            apn = "internet"
            my_number = "+15550001111"

            [timing]
            submit_timeout_ms = 15000

            [alerts]
            ring_sound = "/usr/share/sounds/ring.wav"
        "#;

        let cfg = Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.modem.serial_device.as_deref(), Some("/dev/ttyUSB2"));
        assert_eq!(cfg.modem.power_key, Some(6));
        assert!(cfg.modem.missing_fields().is_empty());
        assert_eq!(cfg.timing.submit, Duration::from_secs(15));
        assert_eq!(cfg.timing.command, Duration::from_secs(1));
        assert_eq!(cfg.alerts.player, "aplay");
        assert!(cfg.alerts.text_sound.is_none());
    }

    #[test]
    fn empty_input_uses_defaults() {
        let cfg = Config::from_toml_str("  ").unwrap();
        assert_eq!(cfg.timing, Timing::default());
        assert_eq!(cfg.modem.missing_fields(), ModemConfig::FIELDS.to_vec());
    }

    #[test]
    fn blank_strings_count_as_missing() {
        let cfg = Config::from_toml_str("[modem]\napn = \"  \"\nimei = \"1\"").unwrap();
        let missing = cfg.modem.missing_fields();
        assert!(missing.contains(&"apn"));
        assert!(!missing.contains(&"imei"));
    }

    #[test]
    fn set_field_validates() {
        let mut modem = ModemConfig::default();
        modem.set_field("power_key", "4").unwrap();
        assert_eq!(modem.power_key, Some(4));
        assert!(modem.set_field("power_key", "four").is_err());
        assert!(modem.set_field("apn", "").is_err());
        assert!(modem.set_field("colour", "blue").is_err());
    }

    #[test]
    fn rejects_zero_poll_period() {
        assert!(Config::from_toml_str("[timing]\npoll_period_ms = 0").is_err());
    }
}

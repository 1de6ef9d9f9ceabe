//! HAT power key sequencing over sysfs GPIO.
//!
//! The SIM7600 HAT toggles power on a pulse of its PWRKEY line: a short
//! high pulse followed by a fixed settle time before the AT port is usable.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

const GPIO_ROOT: &str = "/sys/class/gpio";

/// Line level and how long to hold it before the next step.
type Step = (bool, Duration);

const POWER_ON: &[Step] = &[
    (true, Duration::from_secs(2)),
    (false, Duration::from_secs(20)),
];

const POWER_DOWN: &[Step] = &[
    (true, Duration::from_secs(3)),
    (false, Duration::from_secs(18)),
];

pub struct PowerKey {
    /// `None` when power sequencing is skipped (simulation, `--no-power`).
    pin: Option<u32>,
}

impl PowerKey {
    pub fn new(pin: Option<u32>) -> Self {
        Self { pin }
    }

    pub async fn power_on(&self) -> anyhow::Result<()> {
        let Some(pin) = self.pin else {
            tracing::info!("power sequencing skipped");
            return Ok(());
        };
        tracing::info!(pin, "modem is starting");
        export(pin)?;
        std::fs::write(gpio_path(pin, "direction"), "out")
            .with_context(|| format!("failed to configure GPIO {pin} as output"))?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        run_sequence(pin, POWER_ON).await?;
        tracing::info!("modem is ready");
        Ok(())
    }

    pub async fn power_down(&self) -> anyhow::Result<()> {
        let Some(pin) = self.pin else {
            return Ok(());
        };
        tracing::info!(pin, "modem is logging off");
        run_sequence(pin, POWER_DOWN).await?;
        tracing::info!("modem powered down");
        Ok(())
    }
}

async fn run_sequence(pin: u32, steps: &[Step]) -> anyhow::Result<()> {
    for &(high, hold) in steps {
        std::fs::write(gpio_path(pin, "value"), if high { "1" } else { "0" })
            .with_context(|| format!("failed to drive GPIO {pin}"))?;
        tokio::time::sleep(hold).await;
    }
    Ok(())
}

fn export(pin: u32) -> anyhow::Result<()> {
    if gpio_path(pin, "").exists() {
        return Ok(());
    }
    std::fs::write(format!("{GPIO_ROOT}/export"), pin.to_string())
        .with_context(|| format!("failed to export GPIO {pin}"))
}

fn gpio_path(pin: u32, attr: &str) -> PathBuf {
    PathBuf::from(format!("{GPIO_ROOT}/gpio{pin}")).join(attr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpio_paths() {
        assert_eq!(
            gpio_path(6, "value"),
            PathBuf::from("/sys/class/gpio/gpio6/value")
        );
    }

    #[test]
    fn sequences_pulse_then_release() {
        for seq in [POWER_ON, POWER_DOWN] {
            assert!(seq.first().unwrap().0);
            assert!(!seq.last().unwrap().0);
        }
    }

    #[tokio::test]
    async fn skipped_without_pin() {
        let key = PowerKey::new(None);
        key.power_on().await.unwrap();
        key.power_down().await.unwrap();
    }
}

//! Cellhat Agent
//!
//! Console front end for a SIM7600 cellular HAT.
//!
//! - Powers the modem up through its GPIO power key and initializes it
//! - Polls for unsolicited output (incoming calls, new messages) in the background
//! - Offers a menu for SMS, calls, message storage and GPS in the foreground
//! - In `--simulate` mode, talks to a scripted modem instead of a serial port

mod alert;
mod console;
mod menu;
mod power;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use cellhat_modem::config::ModemConfig;
use cellhat_modem::link::{SerialLink, SerialPortLink, BAUD_RATE};
use cellhat_modem::sim::SimulatedModem;
use cellhat_modem::{
    CallStateMachine, CommandFacade, Config, ModemSession, NotificationPoller, TransactionChannel,
};

/// Cellhat modem agent.
#[derive(Parser, Debug)]
#[command(name = "cellhat-agent", about = "SIM7600 HAT console agent")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Run against a simulated modem (no serial port, no GPIO).
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Skip the GPIO power-on/power-down sequences.
    #[arg(long, default_value_t = false)]
    no_power: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    let mut console = console::Console::spawn().context("failed to start console reader")?;

    if !cli.simulate {
        complete_modem_config(&mut config.modem, &mut console, !cli.no_power).await?;
    }

    tracing::info!(
        simulate = cli.simulate,
        serial_device = config.modem.serial_device.as_deref().unwrap_or("-"),
        "cellhat-agent starting"
    );

    let power = power::PowerKey::new(if cli.simulate || cli.no_power {
        None
    } else {
        config.modem.power_key
    });
    power.power_on().await?;

    let result = run_session(&cli, &config, console).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "session ended with an error");
    }

    if let Err(e) = power.power_down().await {
        tracing::warn!(error = %e, "power-down sequence failed");
    }

    tracing::info!("cellhat-agent stopped");
    result
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = Config::from_toml_str(&text)?;
    tracing::info!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Modem settings the config file left out and this run needs.
fn fields_to_prompt(modem: &ModemConfig, power: bool) -> Vec<&'static str> {
    modem
        .missing_fields()
        .into_iter()
        .filter(|field| power || *field != "power_key")
        .collect()
}

/// Ask for any modem setting the config file left out.
async fn complete_modem_config(
    modem: &mut ModemConfig,
    console: &mut console::Console,
    power: bool,
) -> anyhow::Result<()> {
    for field in fields_to_prompt(modem, power) {
        loop {
            let value = console.ask(&format!("{field}: ")).await?;
            match modem.set_field(field, &value) {
                Ok(()) => break,
                Err(e) => println!("{e}"),
            }
        }
    }
    Ok(())
}

async fn run_session(cli: &Cli, config: &Config, console: console::Console) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let link: Box<dyn SerialLink> = if cli.simulate {
        Box::new(SimulatedModem::sim7600())
    } else {
        let device = config
            .modem
            .serial_device
            .as_deref()
            .context("no serial device configured")?;
        Box::new(
            SerialPortLink::open(device, BAUD_RATE)
                .with_context(|| format!("failed to open {device}"))?,
        )
    };

    let session = ModemSession::new(link, shutdown_rx);
    let channel = TransactionChannel::new(session);
    let call = Arc::new(CallStateMachine::new(channel.clone(), config.timing.command));
    let facade = CommandFacade::new(channel, config.timing.clone());

    facade
        .initialize(&config.modem)
        .await
        .context("modem initialization failed")?;

    // ── Background: notification poller ─────────────────────────
    let (event_tx, event_rx) = mpsc::channel(64);
    let notifier = Arc::new(alert::SoundNotifier::new(config.alerts.clone()));
    let poller = NotificationPoller::new(facade.clone(), call.clone(), notifier, event_tx);
    let poller_handle = tokio::spawn(poller.run());

    // ── Foreground: console menu ────────────────────────────────
    let menu = menu::Menu::new(
        facade,
        call,
        console,
        event_rx,
        menu::Identity {
            serial_device: config.modem.serial_device.clone(),
            my_number: config.modem.my_number.clone(),
            simulate: cli.simulate,
        },
    );
    let result = match tokio::spawn(menu.run()).await {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("foreground task failed: {e}")),
    };

    // ── Shutdown ────────────────────────────────────────────────
    let _ = shutdown_tx.send(true);
    let grace = config.timing.shutdown_grace;
    match tokio::time::timeout(grace, poller_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "notification poller panicked"),
        Err(_) => tracing::warn!(
            grace_ms = grace.as_millis() as u64,
            "notification poller did not stop in time"
        ),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_key_is_only_asked_for_when_sequencing() {
        let modem = ModemConfig {
            serial_device: Some("/dev/ttyS0".into()),
            apn: Some("internet".into()),
            ..Default::default()
        };
        assert_eq!(
            fields_to_prompt(&modem, true),
            vec!["power_key", "imei", "my_number"]
        );
        assert_eq!(fields_to_prompt(&modem, false), vec!["imei", "my_number"]);
    }
}

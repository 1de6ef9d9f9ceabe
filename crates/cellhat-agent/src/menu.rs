//! Foreground console menu.
//!
//! Runs on its own task and interleaves three sources: user input, events
//! forwarded by the notification poller, and Ctrl-C.

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use cellhat_modem::sms::MessageListing;
use cellhat_modem::{CallState, CallStateMachine, CommandFacade, GpsOutcome, ModemError, ModemEvent};

use crate::console::Console;

const MENU: &str = "\
1) send text message
2) send text message (PDU mode)
3) GPS position
4) delete all messages
5) show all messages
6) dial
7) hang up / cancel call
8) status
9) exit";

/// Snapshot printed by the status option.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub call_state: CallState,
    pub serial_device: Option<String>,
    pub my_number: Option<String>,
    pub simulate: bool,
    pub poll_period_ms: u64,
}

/// Session facts that don't change while the menu runs.
pub struct Identity {
    pub serial_device: Option<String>,
    pub my_number: Option<String>,
    pub simulate: bool,
}

enum Flow {
    Continue,
    Exit,
}

pub struct Menu {
    facade: CommandFacade,
    call: Arc<CallStateMachine>,
    console: Console,
    events: mpsc::Receiver<ModemEvent>,
    identity: Identity,
}

impl Menu {
    pub fn new(
        facade: CommandFacade,
        call: Arc<CallStateMachine>,
        console: Console,
        events: mpsc::Receiver<ModemEvent>,
        identity: Identity,
    ) -> Self {
        Self {
            facade,
            call,
            console,
            events,
            identity,
        }
    }

    /// Run until the user exits, stdin closes, Ctrl-C arrives or the modem
    /// link fails. Only the last case is an error.
    pub async fn run(mut self) -> anyhow::Result<()> {
        println!("{MENU}");
        loop {
            prompt("> ");
            let flow = tokio::select! {
                line = self.console.next_line() => match line {
                    Some(choice) => self.dispatch(&choice).await?,
                    None => {
                        tracing::info!("stdin closed");
                        Flow::Exit
                    }
                },
                Some(event) = self.events.recv() => {
                    self.handle_event(event).await?;
                    Flow::Continue
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT, shutting down");
                    Flow::Exit
                }
            };
            if let Flow::Exit = flow {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, choice: &str) -> anyhow::Result<Flow> {
        let result = match choice {
            "" => return Ok(Flow::Continue),
            "1" | "2" => {
                let number = self.console.ask("Recipient number: ").await?;
                let text = self.console.ask("Message: ").await?;
                let sent = if choice == "1" {
                    self.facade.send_short_message(&number, &text).await
                } else {
                    self.facade.send_short_message_pdu(&number, &text).await
                };
                sent.map(|()| println!("Message sent."))
            }
            "3" => self
                .facade
                .gps_fix(&mut self.console)
                .await
                .map(print_gps),
            "4" => self
                .facade
                .delete_all_messages(&mut self.console)
                .await
                .map(|deleted| {
                    if deleted {
                        println!("All messages deleted.");
                    } else {
                        println!("Nothing deleted.");
                    }
                }),
            "5" => self.facade.list_all_messages().await.map(|l| print_listing(&l)),
            "6" => {
                let number = self.console.ask("Number to dial: ").await?;
                self.call
                    .dial(&number)
                    .await
                    .map(|_| println!("Calling {}...", number.trim()))
            }
            "7" => self.call.end_call().await.map(|_| println!("Call ended.")),
            "8" => {
                self.print_status()?;
                Ok(())
            }
            "9" | "q" => return Ok(Flow::Exit),
            other => {
                println!("Unknown option {other:?}\n{MENU}");
                Ok(())
            }
        };
        triage(result)?;
        Ok(Flow::Continue)
    }

    async fn handle_event(&mut self, event: ModemEvent) -> anyhow::Result<()> {
        match event {
            ModemEvent::IncomingCall { caller } => {
                println!(
                    "\nIncoming call from {}",
                    caller.as_deref().unwrap_or("unknown number")
                );
                let reply = self
                    .console
                    .ask("Press 'a' to answer, anything else to decline: ")
                    .await?;
                let result = if reply.eq_ignore_ascii_case("a") {
                    self.call.answer().await.map(|_| println!("Call answered."))
                } else {
                    self.call.decline().await.map(|_| println!("Call declined."))
                };
                triage(result)
            }
            ModemEvent::MissedCall => {
                println!("\nMissed call.");
                Ok(())
            }
            ModemEvent::CallConnected => {
                println!("\nCall connected.");
                Ok(())
            }
            ModemEvent::CallEnded => {
                println!("\nCall ended.");
                Ok(())
            }
            ModemEvent::TextArrived { unread } => {
                println!("\nNew text message.");
                if let Some(listing) = unread {
                    print_listing(&listing);
                }
                Ok(())
            }
        }
    }

    fn print_status(&self) -> anyhow::Result<()> {
        let report = StatusReport {
            call_state: self.call.state(),
            serial_device: self.identity.serial_device.clone(),
            my_number: self.identity.my_number.clone(),
            simulate: self.identity.simulate,
            poll_period_ms: self.facade.timing().poll_period.as_millis() as u64,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}

/// Link-level failures end the session; anything else is reported and the
/// menu carries on.
fn triage(result: cellhat_modem::Result<()>) -> anyhow::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e @ (ModemError::Cancelled | ModemError::Io(_) | ModemError::Serial(_))) => {
            Err(e.into())
        }
        Err(e) => {
            tracing::debug!(error = %e, "operation failed");
            println!("Error: {e}");
            Ok(())
        }
    }
}

fn prompt(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

fn print_gps(outcome: GpsOutcome) {
    match outcome {
        GpsOutcome::Fix { fix, retries } => {
            println!(
                "Position: {:.6}, {:.6} (after {retries} retries)",
                fix.latitude, fix.longitude
            );
            if let Some(utc) = fix.utc {
                println!("UTC: {utc}");
            }
            if let Some(alt) = fix.altitude_m {
                println!("Altitude: {alt} m");
            }
        }
        GpsOutcome::Stopped { retries } => {
            println!("GPS stopped without a fix after {retries} retries.");
        }
    }
}

fn print_listing(listing: &MessageListing) {
    if listing.is_empty() {
        println!("No messages.");
        return;
    }
    if listing.messages.is_empty() {
        println!("{}", listing.raw.trim());
        return;
    }
    for msg in &listing.messages {
        let when = msg
            .timestamp
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown time".into());
        println!(
            "[{}] {} from {} at {}\n  {}",
            msg.index, msg.status, msg.sender, when, msg.body
        );
    }
}

//! Command facade: the user-level operations built from fixed AT sequences.

use std::future::Future;

use crate::call::validate_number;
use crate::channel::{ExclusiveChannel, Transaction, TransactionChannel};
use crate::config::{ModemConfig, Timing};
use crate::error::{ModemError, Result};
use crate::gps::{parse_gpsinfo, GpsFix, GpsReading, GPSINFO_PREFIX};
use crate::link::SUBMIT_TERMINATOR;
use crate::sms::MessageListing;

pub const ECHO_TEST: &str = "ATE";
pub const CALLER_ID_ON: &str = "AT+CLIP=1";
pub const TEXT_MODE: &str = "AT+CMGF=1";
pub const SIM_STORAGE: &str = "AT+CPMS=\"SM\",\"SM\",\"SM\"";
pub const LIST_ALL: &str = "AT+CMGL=\"ALL\"";
pub const LIST_UNREAD: &str = "AT+CMGL=\"REC UNREAD\"";
pub const DELETE_ALL: &str = "AT+CMGD=1,4";
pub const GPS_ON: &str = "AT+CGPS=1,1";
pub const GPS_QUERY: &str = "AT+CGPSINFO";
pub const GPS_OFF: &str = "AT+CGPS=0";

/// Source of yes/no answers from the person at the console.
pub trait Prompter: Send {
    fn confirm(&mut self, question: &str) -> impl Future<Output = bool> + Send;
}

/// How a GPS session ended without an error.
#[derive(Debug, Clone, PartialEq)]
pub enum GpsOutcome {
    Fix { fix: GpsFix, retries: u32 },
    /// The user stopped waiting for a fix.
    Stopped { retries: u32 },
}

#[derive(Clone)]
pub struct CommandFacade {
    channel: TransactionChannel,
    timing: Timing,
}

impl CommandFacade {
    pub fn new(channel: TransactionChannel, timing: Timing) -> Self {
        Self { channel, timing }
    }

    pub fn channel(&self) -> &TransactionChannel {
        &self.channel
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    fn ok(&self, command: impl Into<String>) -> Transaction {
        Transaction::ok(command, self.timing.command)
    }

    /// Bring a freshly powered modem into a known state.
    ///
    /// The echo test must pass; the remaining steps are logged on failure and
    /// the session carries on without them.
    pub async fn initialize(&self, modem: &ModemConfig) -> Result<()> {
        self.channel.request(&self.ok(ECHO_TEST)).await?;

        let mut steps = Vec::new();
        if let Some(apn) = &modem.apn {
            steps.push(Transaction::ok(
                format!("AT+CGDCONT=1,\"IP\",\"{apn}\""),
                self.timing.extended,
            ));
        }
        if let Some(imei) = &modem.imei {
            steps.push(self.ok(format!("AT+SIMEI={imei}")));
        }
        steps.push(self.ok(CALLER_ID_ON));

        for step in &steps {
            match self.channel.request(step).await {
                Ok(_) => {}
                Err(ModemError::Mismatch { command, response }) => {
                    tracing::warn!(%command, response = %response.trim(), "init step failed, continuing");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!("modem initialized");
        Ok(())
    }

    /// Text mode plus SIM storage for reading, writing and receiving.
    pub async fn select_message_storage(&self) -> Result<()> {
        let mut chan = self.channel.exclusive().await?;
        self.select_storage_on(&mut chan).await
    }

    async fn select_storage_on(&self, chan: &mut ExclusiveChannel<'_>) -> Result<()> {
        chan.request(&self.ok(TEXT_MODE)).await?;
        chan.request(&self.ok(SIM_STORAGE)).await?;
        Ok(())
    }

    /// Submit a text-mode SMS.
    ///
    /// The body is only written once the modem has answered the recipient
    /// step with its `>` prompt; the whole exchange holds the stream.
    pub async fn send_short_message(&self, number: &str, text: &str) -> Result<()> {
        let number = validate_number(number)?;
        if text.as_bytes().contains(&SUBMIT_TERMINATOR) {
            return Err(ModemError::InvalidInput(
                "message text must not contain Ctrl-Z".into(),
            ));
        }

        let mut chan = self.channel.exclusive().await?;
        chan.request(&self.ok(TEXT_MODE)).await?;
        chan.request(&Transaction::new(
            format!("AT+CMGS=\"{number}\""),
            ">",
            self.timing.extended,
        ))
        .await?;
        chan.write_payload(text.as_bytes())?;
        chan.request(&Transaction::ok("", self.timing.submit)).await?;

        tracing::info!(%number, chars = text.chars().count(), "message sent");
        Ok(())
    }

    pub async fn send_short_message_pdu(&self, number: &str, _text: &str) -> Result<()> {
        tracing::warn!(%number, "PDU-mode SMS requested");
        Err(ModemError::NotImplemented("PDU-mode SMS"))
    }

    pub async fn list_all_messages(&self) -> Result<MessageListing> {
        self.list(LIST_ALL).await
    }

    pub async fn list_unread_messages(&self) -> Result<MessageListing> {
        self.list(LIST_UNREAD).await
    }

    async fn list(&self, command: &str) -> Result<MessageListing> {
        let mut chan = self.channel.exclusive().await?;
        self.select_storage_on(&mut chan).await?;
        let raw = chan.request(&self.ok(command)).await?;
        let listing = MessageListing::parse(&raw);
        tracing::debug!(command, count = listing.messages.len(), "messages listed");
        Ok(listing)
    }

    /// Delete every stored message after an explicit confirmation.
    /// Returns `false` (and sends nothing) when the user declines.
    pub async fn delete_all_messages(&self, prompter: &mut impl Prompter) -> Result<bool> {
        if !prompter
            .confirm("Are you sure you want to delete all messages?")
            .await
        {
            tracing::info!("delete all messages declined");
            return Ok(false);
        }

        let mut chan = self.channel.exclusive().await?;
        self.select_storage_on(&mut chan).await?;
        chan.request(&Transaction::ok(DELETE_ALL, self.timing.extended))
            .await?;
        tracing::info!("all stored messages deleted");
        Ok(true)
    }

    /// Run a GPS session until a fix arrives, the user stops waiting, or the
    /// modem answers something other than a position report.
    ///
    /// There is no retry bound; each empty report waits `gps_retry_delay`
    /// and asks the user whether to keep going.
    pub async fn gps_fix(&self, prompter: &mut impl Prompter) -> Result<GpsOutcome> {
        // An already-running GPS session answers ERROR here.
        match self.channel.request(&self.ok(GPS_ON)).await {
            Ok(_) => {}
            Err(e @ ModemError::Mismatch { .. }) => {
                tracing::warn!(error = %e, "GPS start not acknowledged, querying anyway");
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(self.timing.gps_warmup).await;

        let query = Transaction::new(GPS_QUERY, GPSINFO_PREFIX, self.timing.command);
        let mut retries = 0u32;
        loop {
            let response = self.channel.execute(&query).await?;
            let reading = response
                .is_match()
                .then(|| parse_gpsinfo(&response.text))
                .flatten();

            match reading {
                Some(GpsReading::Fix(fix)) => {
                    tracing::info!(
                        latitude = fix.latitude,
                        longitude = fix.longitude,
                        retries,
                        "GPS fix acquired"
                    );
                    self.gps_off().await;
                    return Ok(GpsOutcome::Fix { fix, retries });
                }
                Some(GpsReading::NotReady) => {
                    tracing::debug!(retries, "GPS is not ready");
                    if !prompter.confirm("GPS is not ready. Keep waiting?").await {
                        self.gps_off().await;
                        return Ok(GpsOutcome::Stopped { retries });
                    }
                    tokio::time::sleep(self.timing.gps_retry_delay).await;
                    retries += 1;
                }
                None => {
                    self.gps_off().await;
                    return Err(ModemError::Mismatch {
                        command: GPS_QUERY.to_string(),
                        response: response.text,
                    });
                }
            }
        }
    }

    async fn gps_off(&self) {
        if let Err(e) = self.channel.request(&self.ok(GPS_OFF)).await {
            tracing::warn!(error = %e, "failed to stop GPS session");
        }
    }
}

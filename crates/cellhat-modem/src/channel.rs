//! Transaction channel: one AT command/response exchange at a time.
//!
//! Responses have no framing beyond time: a transaction writes its command,
//! sleeps out its full window while holding the session lock, then takes
//! whatever the modem produced as the response. Nothing is retried here;
//! callers decide what a mismatch means.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::MutexGuard;

use crate::error::{ModemError, Result};
use crate::link::{LINE_TERMINATOR, SUBMIT_TERMINATOR};
use crate::session::{ModemSession, SessionIo};

/// An immutable command request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub command: String,
    /// Substring whose presence anywhere in the reply counts as success.
    pub expected: &'static str,
    pub timeout: Duration,
}

impl Transaction {
    pub fn new(command: impl Into<String>, expected: &'static str, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            expected,
            timeout,
        }
    }

    /// A transaction that expects the usual final `OK`.
    pub fn ok(command: impl Into<String>, timeout: Duration) -> Self {
        Self::new(command, "OK", timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Matched,
    Mismatched,
}

/// Everything the modem said during a transaction window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub outcome: Outcome,
    pub text: String,
}

impl Response {
    fn classify(expected: &str, raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw).into_owned();
        let outcome = if text.contains(expected) {
            Outcome::Matched
        } else {
            Outcome::Mismatched
        };
        Self { outcome, text }
    }

    pub fn is_match(&self) -> bool {
        self.outcome == Outcome::Matched
    }

    /// Turn a mismatch into [`ModemError::Mismatch`], keeping the raw reply.
    pub fn into_result(self, command: &str) -> Result<String> {
        match self.outcome {
            Outcome::Matched => Ok(self.text),
            Outcome::Mismatched => Err(ModemError::Mismatch {
                command: command.to_string(),
                response: self.text,
            }),
        }
    }
}

/// Entry point for issuing transactions against a [`ModemSession`].
#[derive(Clone)]
pub struct TransactionChannel {
    session: Arc<ModemSession>,
}

impl TransactionChannel {
    pub fn new(session: Arc<ModemSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<ModemSession> {
        &self.session
    }

    /// Hold the stream across several steps (e.g. SMS submission).
    pub async fn exclusive(&self) -> Result<ExclusiveChannel<'_>> {
        if self.session.is_cancelled() {
            return Err(ModemError::Cancelled);
        }
        let io = self.session.lock().await;
        Ok(ExclusiveChannel {
            session: &self.session,
            io,
        })
    }

    /// Run a single transaction and report its raw outcome.
    pub async fn execute(&self, tx: &Transaction) -> Result<Response> {
        self.exclusive().await?.execute(tx).await
    }

    /// Run a single transaction; a mismatch becomes an error.
    pub async fn request(&self, tx: &Transaction) -> Result<String> {
        self.exclusive().await?.request(tx).await
    }
}

/// The serial stream while held by one actor.
pub struct ExclusiveChannel<'a> {
    session: &'a ModemSession,
    io: MutexGuard<'a, SessionIo>,
}

impl ExclusiveChannel<'_> {
    pub async fn execute(&mut self, tx: &Transaction) -> Result<Response> {
        if self.session.is_cancelled() {
            return Err(ModemError::Cancelled);
        }

        // Unsolicited bytes that arrived since the last reader belong to the
        // poller, not to this response.
        let stale = self.io.pull()?;
        if stale > 0 {
            tracing::debug!(bytes = stale, "moved stale bytes to notification buffer");
        }

        let mut frame = Vec::with_capacity(tx.command.len() + LINE_TERMINATOR.len());
        frame.extend_from_slice(tx.command.as_bytes());
        frame.extend_from_slice(LINE_TERMINATOR);
        self.io.link().write_bytes(&frame)?;

        tokio::time::sleep(tx.timeout).await;

        let raw = self.io.link().read_available()?;
        let response = Response::classify(tx.expected, &raw);
        tracing::debug!(
            command = %tx.command,
            expected = tx.expected,
            outcome = ?response.outcome,
            bytes = raw.len(),
            "transaction complete"
        );
        Ok(response)
    }

    pub async fn request(&mut self, tx: &Transaction) -> Result<String> {
        let response = self.execute(tx).await?;
        if !response.is_match() {
            tracing::warn!(
                command = %tx.command,
                response = %response.text.trim(),
                "unexpected modem response"
            );
        }
        response.into_result(&tx.command)
    }

    /// Write a text-mode SMS body followed by the Ctrl-Z terminator.
    /// No line terminator is sent.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        if self.session.is_cancelled() {
            return Err(ModemError::Cancelled);
        }
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        frame.push(SUBMIT_TERMINATOR);
        self.io.link().write_bytes(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedModem;
    use tokio::sync::watch;

    const WINDOW: Duration = Duration::from_secs(1);

    fn channel(modem: &SimulatedModem) -> (TransactionChannel, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let session = ModemSession::new(Box::new(modem.clone()), rx);
        (TransactionChannel::new(session), tx)
    }

    #[tokio::test(start_paused = true)]
    async fn matched_when_reply_contains_expected() {
        let modem = SimulatedModem::new();
        modem.respond("AT+CLIP=1", "\r\nOK\r\n");
        let (chan, _shutdown) = channel(&modem);

        let resp = chan.execute(&Transaction::ok("AT+CLIP=1", WINDOW)).await.unwrap();
        assert_eq!(resp.outcome, Outcome::Matched);
        assert_eq!(resp.text, "\r\nOK\r\n");
        assert_eq!(modem.commands(), vec!["AT+CLIP=1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn mismatch_keeps_full_text() {
        let modem = SimulatedModem::new();
        modem.respond("AT+CMGS=\"+1\"", "\r\nERROR\r\n");
        let (chan, _shutdown) = channel(&modem);

        let tx = Transaction::new("AT+CMGS=\"+1\"", ">", WINDOW);
        let resp = chan.execute(&tx).await.unwrap();
        assert_eq!(resp.outcome, Outcome::Mismatched);
        assert_eq!(resp.text, "\r\nERROR\r\n");

        let err = chan.request(&tx).await.unwrap_err();
        assert!(matches!(err, ModemError::Mismatch { ref response, .. } if response.contains("ERROR")));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_is_reported_as_empty_mismatch() {
        let modem = SimulatedModem::silent();
        let (chan, _shutdown) = channel(&modem);

        let err = chan.request(&Transaction::ok("ATE", WINDOW)).await.unwrap_err();
        assert!(err.is_silence());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_the_full_window() {
        let modem = SimulatedModem::new();
        let (chan, _shutdown) = channel(&modem);

        let start = tokio::time::Instant::now();
        chan.execute(&Transaction::ok("AT", Duration::from_secs(3)))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_bytes_do_not_leak_into_response() {
        let modem = SimulatedModem::new();
        modem.inject_line("+CMTI: \"SM\",3");
        let (chan, _shutdown) = channel(&modem);

        let resp = chan.execute(&Transaction::ok("AT", WINDOW)).await.unwrap();
        assert!(!resp.text.contains("+CMTI"));

        let mut io = chan.session().lock().await;
        assert_eq!(io.take_lines(), vec!["+CMTI: \"SM\",3".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_commands_after_cancellation() {
        let modem = SimulatedModem::new();
        let (chan, shutdown) = channel(&modem);
        shutdown.send(true).unwrap();

        let err = chan.execute(&Transaction::ok("AT", WINDOW)).await.unwrap_err();
        assert!(matches!(err, ModemError::Cancelled));
        assert!(modem.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn payload_ends_with_ctrl_z_only() {
        let modem = SimulatedModem::new();
        let (chan, _shutdown) = channel(&modem);

        chan.exclusive().await.unwrap().write_payload(b"hi").unwrap();
        assert_eq!(modem.payloads(), vec![b"hi".to_vec()]);
        assert_eq!(modem.writes()[0].bytes, b"hi\x1a".to_vec());
    }
}

//! Simulated SIM7600 for tests and `--simulate` runs.
//!
//! Replies are scripted per command line. Each scripted command owns a queue
//! of replies that is consumed in order; the last reply repeats once the
//! queue is down to one entry. Commands without a script get the default
//! reply (`OK`), or nothing at all for a [`SimulatedModem::silent`] modem.
//! Unsolicited lines can be injected at any time from a cloned handle.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;

use crate::error::Result;
use crate::link::{SerialLink, SUBMIT_TERMINATOR};

/// One `write_bytes` call as seen by the modem.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub bytes: Vec<u8>,
    pub at: Instant,
}

struct SimState {
    scripts: HashMap<String, VecDeque<String>>,
    default_reply: Option<String>,
    pending: Vec<u8>,
    partial: Vec<u8>,
    commands: Vec<String>,
    payloads: Vec<Vec<u8>>,
    writes: Vec<WriteRecord>,
}

impl SimState {
    fn script_key(&self, command: &str) -> Option<String> {
        if self.scripts.contains_key(command) {
            return Some(command.to_string());
        }
        self.scripts
            .keys()
            .filter(|key| key.ends_with('"') && command.starts_with(key.as_str()))
            .max_by_key(|key| key.len())
            .cloned()
    }

    fn reply_for(&mut self, command: &str) -> Option<String> {
        let key = self.script_key(command);
        match key.and_then(|key| self.scripts.get_mut(&key)) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => self.default_reply.clone(),
        }
    }

    fn feed(&mut self, byte: u8) {
        if byte == SUBMIT_TERMINATOR {
            let payload = std::mem::take(&mut self.partial);
            self.payloads.push(payload);
            return;
        }
        self.partial.push(byte);
        if self.partial.ends_with(b"\r\n") {
            let line = std::mem::take(&mut self.partial);
            let command = String::from_utf8_lossy(&line[..line.len() - 2]).into_owned();
            if let Some(reply) = self.reply_for(&command) {
                self.pending.extend_from_slice(reply.as_bytes());
            }
            self.commands.push(command);
        }
    }
}

/// Scripted in-memory modem. Clones share state.
#[derive(Clone)]
pub struct SimulatedModem {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedModem {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedModem {
    /// A modem that answers `OK` to anything unscripted.
    pub fn new() -> Self {
        Self::with_default(Some("\r\nOK\r\n".to_string()))
    }

    /// A modem that never answers unscripted commands.
    pub fn silent() -> Self {
        Self::with_default(None)
    }

    fn with_default(default_reply: Option<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                scripts: HashMap::new(),
                default_reply,
                pending: Vec::new(),
                partial: Vec::new(),
                commands: Vec::new(),
                payloads: Vec::new(),
                writes: Vec::new(),
            })),
        }
    }

    /// Plausible replies for an interactive session without hardware.
    pub fn sim7600() -> Self {
        let modem = Self::new();
        modem.respond("AT+CMGS=\"", "\r\n> ");
        modem.respond("", "\r\n+CMGS: 17\r\n\r\nOK\r\n");
        modem.respond(
            "AT+CGPSINFO",
            "\r\n+CGPSINFO: 3113.343286,N,12121.234064,E,250311,072809.3,44.1,0.0,0\r\n\r\nOK\r\n",
        );
        modem.respond(
            "AT+CMGL=\"ALL\"",
            "\r\n+CMGL: 1,\"REC READ\",\"+15551234567\",\"\",\"24/05/01,12:30:00+08\"\r\nsee you at 6\r\n\r\nOK\r\n",
        );
        modem.respond("AT+CMGL=\"REC UNREAD\"", "\r\nOK\r\n");
        modem
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a reply for an exact command line (without CRLF).
    ///
    /// A script key ending in `"` is also matched as a prefix, which lets
    /// `AT+CMGS="` cover every recipient.
    pub fn respond(&self, command: &str, reply: &str) {
        self.lock()
            .scripts
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Queue several replies for one command, consumed in order.
    pub fn respond_sequence(&self, command: &str, replies: &[&str]) {
        for reply in replies {
            self.respond(command, reply);
        }
    }

    /// Make the modem emit an unsolicited line (CRLF framed).
    pub fn inject_line(&self, line: &str) {
        self.inject_raw(format!("\r\n{line}\r\n").as_bytes());
    }

    pub fn inject_raw(&self, bytes: &[u8]) {
        self.lock().pending.extend_from_slice(bytes);
    }

    /// Command lines received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// SMS bodies received so far (bytes before each Ctrl-Z).
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.lock().payloads.clone()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }
}

impl SerialLink for SimulatedModem {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock();
        state.writes.push(WriteRecord {
            bytes: bytes.to_vec(),
            at: Instant::now(),
        });
        for &byte in bytes {
            state.feed(byte);
        }
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.lock().pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_scripted_reply_repeats() {
        let mut modem = SimulatedModem::new();
        modem.respond_sequence("AT+CGPSINFO", &["first", "second"]);

        modem.write_bytes(b"AT+CGPSINFO\r\n").unwrap();
        assert_eq!(modem.read_available().unwrap(), b"first");
        modem.write_bytes(b"AT+CGPSINFO\r\n").unwrap();
        assert_eq!(modem.read_available().unwrap(), b"second");
        modem.write_bytes(b"AT+CGPSINFO\r\n").unwrap();
        assert_eq!(modem.read_available().unwrap(), b"second");
    }

    #[test]
    fn payload_is_split_at_ctrl_z() {
        let mut modem = SimulatedModem::silent();
        modem.write_bytes(b"hello\x1a").unwrap();
        modem.write_bytes(b"\r\n").unwrap();
        assert_eq!(modem.payloads(), vec![b"hello".to_vec()]);
        assert_eq!(modem.commands(), vec![String::new()]);
        assert!(modem.read_available().unwrap().is_empty());
    }

    #[test]
    fn quoted_prefix_script_covers_arguments() {
        let mut modem = SimulatedModem::silent();
        modem.respond("AT+CMGS=\"", "\r\n> ");
        modem.write_bytes(b"AT+CMGS=\"+123456789\"\r\n").unwrap();
        assert_eq!(modem.read_available().unwrap(), b"\r\n> ");
    }

    #[test]
    fn clones_share_state() {
        let modem = SimulatedModem::new();
        let mut link = modem.clone();
        modem.inject_line("RING");
        assert_eq!(link.read_available().unwrap(), b"\r\nRING\r\n");
    }
}

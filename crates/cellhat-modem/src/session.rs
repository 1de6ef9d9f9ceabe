//! The single modem session shared by the foreground and the poller.
//!
//! Everything that touches the serial stream lives behind one async mutex:
//! whoever holds the guard is the only reader of the link and of the rolling
//! receive buffer.

use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};

use crate::error::Result;
use crate::link::SerialLink;

/// Serial handle plus the rolling buffer of not-yet-consumed unsolicited bytes.
pub struct SessionIo {
    link: Box<dyn SerialLink>,
    rx_buffer: Vec<u8>,
}

impl SessionIo {
    pub(crate) fn link(&mut self) -> &mut dyn SerialLink {
        self.link.as_mut()
    }

    /// Move whatever the device has buffered into the rolling buffer.
    /// Returns the number of bytes appended.
    pub(crate) fn pull(&mut self) -> Result<usize> {
        let bytes = self.link.read_available()?;
        self.rx_buffer.extend_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Split off every complete line in the rolling buffer.
    ///
    /// Lines are returned without their terminator and blank lines are
    /// dropped. A trailing partial line stays buffered until its terminator
    /// arrives.
    pub(crate) fn take_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.rx_buffer.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.rx_buffer.drain(..=last_newline).collect();
        String::from_utf8_lossy(&complete)
            .split('\n')
            .map(|line| line.trim_end_matches('\r').trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn buffered(&self) -> usize {
        self.rx_buffer.len()
    }
}

/// One open modem session.
pub struct ModemSession {
    io: Mutex<SessionIo>,
    shutdown: watch::Receiver<bool>,
}

impl ModemSession {
    pub fn new(link: Box<dyn SerialLink>, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        Arc::new(Self {
            io: Mutex::new(SessionIo {
                link,
                rx_buffer: Vec::new(),
            }),
            shutdown,
        })
    }

    /// Acquire exclusive access to the serial stream.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, SessionIo> {
        self.io.lock().await
    }

    /// Whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A fresh receiver for the process-wide shutdown flag.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedModem;

    fn session_io(modem: &SimulatedModem) -> SessionIo {
        SessionIo {
            link: Box::new(modem.clone()),
            rx_buffer: Vec::new(),
        }
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let modem = SimulatedModem::new();
        let mut io = session_io(&modem);

        modem.inject_raw(b"\r\nRING\r\n\r\n+CLIP: \"+4915");
        io.pull().unwrap();
        assert_eq!(io.take_lines(), vec!["RING".to_string()]);
        assert!(io.buffered() > 0);

        modem.inject_raw(b"1234\",145\r\n");
        io.pull().unwrap();
        assert_eq!(io.take_lines(), vec!["+CLIP: \"+49151234\",145".to_string()]);
        assert_eq!(io.buffered(), 0);
    }

    #[test]
    fn no_lines_without_newline() {
        let modem = SimulatedModem::new();
        let mut io = session_io(&modem);
        modem.inject_raw(b"+CMTI");
        io.pull().unwrap();
        assert!(io.take_lines().is_empty());
    }

    #[tokio::test]
    async fn cancellation_follows_watch_flag() {
        let (tx, rx) = watch::channel(false);
        let session = ModemSession::new(Box::new(SimulatedModem::new()), rx);
        assert!(!session.is_cancelled());
        tx.send(true).unwrap();
        assert!(session.is_cancelled());
    }
}

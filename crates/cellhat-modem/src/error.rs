//! Error taxonomy for modem operations.

use thiserror::Error;

use crate::call::{CallState, Decision};

#[derive(Debug, Error)]
pub enum ModemError {
    /// The expected substring never showed up within the transaction window.
    /// An empty `response` means the modem stayed silent.
    #[error("{command:?} failed, modem replied: {response:?}")]
    Mismatch { command: String, response: String },
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    /// Shutdown has been requested; no further commands are issued.
    #[error("modem session is shutting down")]
    Cancelled,
    #[error("cannot {decision} while call is {state}")]
    IllegalTransition { state: CallState, decision: Decision },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error("invalid config: {0}")]
    Config(String),
}

impl ModemError {
    /// True when the modem produced no bytes at all for the transaction.
    pub fn is_silence(&self) -> bool {
        matches!(self, ModemError::Mismatch { response, .. } if response.is_empty())
    }
}

pub type Result<T, E = ModemError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_an_empty_mismatch() {
        let silent = ModemError::Mismatch {
            command: "AT".into(),
            response: String::new(),
        };
        assert!(silent.is_silence());

        let noisy = ModemError::Mismatch {
            command: "AT".into(),
            response: "ERROR\r\n".into(),
        };
        assert!(!noisy.is_silence());
        assert!(!ModemError::Cancelled.is_silence());
    }

    #[test]
    fn mismatch_display_carries_command_and_reply() {
        let err = ModemError::Mismatch {
            command: "AT+CMGS=\"+1\"".into(),
            response: "ERROR".into(),
        };
        let text = err.to_string();
        assert!(text.contains("AT+CMGS"));
        assert!(text.contains("ERROR"));
    }
}

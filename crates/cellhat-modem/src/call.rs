//! # Call State Machine
//!
//! Tracks the voice call lifecycle and issues the AT sequences that go with
//! each user decision. Transition planning ([`plan`]) is a pure, total
//! function over `(state, event)`: modem signals that do not apply to the
//! current state are self-loops, user decisions that do not apply are
//! rejected before anything is written to the modem.
//!
//! ```text
//!            Ring                answer
//!   Idle ──────────▶ Ringing ──────────────▶ InCall
//!    ▲ ▲  decline / ring cleared  │             │
//!    │ └──────────────────────────┘   hang up   │
//!    │◀─────────────────────────────────────────┘
//!    │  dial          connected
//!    └──────▶ Dialing ─────────▶ InCall
//!      cancel ◀─┘
//! ```

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::channel::{Transaction, TransactionChannel};
use crate::error::{ModemError, Result};

pub const SET_VOLUME: &str = "AT+CLVL=3";
pub const ROUTE_HEADSET: &str = "AT+CSDVC=1";
pub const ROUTE_SPEAKER: &str = "AT+CSDVC=3";
pub const ANSWER: &str = "ATA";
pub const HANG_UP: &str = "ATH";
pub const REJECT: &str = "AT+CHUP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Idle,
    Ringing,
    Dialing,
    InCall,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::Ringing => "ringing",
            CallState::Dialing => "dialing",
            CallState::InCall => "in a call",
        };
        f.write_str(s)
    }
}

/// Modem-originated call signals, edge-triggered by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Ring,
    RingCleared,
    Connected,
    Ended,
}

/// Explicit user decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Answer,
    Decline,
    Dial(String),
    Cancel,
    HangUp,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Answer => f.write_str("answer"),
            Decision::Decline => f.write_str("decline"),
            Decision::Dial(number) => write!(f, "dial {number}"),
            Decision::Cancel => f.write_str("cancel the outgoing call"),
            Decision::HangUp => f.write_str("hang up"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Signal(Signal),
    Decision(Decision),
}

/// What a transition does: the commands to run (in order, each expecting
/// `OK`) and the state to commit once they all succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub next: CallState,
    pub commands: Vec<String>,
}

impl Step {
    fn stay(state: CallState) -> Self {
        Self::to(state)
    }

    fn to(next: CallState) -> Self {
        Self {
            next,
            commands: Vec::new(),
        }
    }

    fn run(next: CallState, commands: &[&str]) -> Self {
        Self {
            next,
            commands: commands.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Plan the transition for `event` in `state`.
pub fn plan(state: CallState, event: &CallEvent) -> Result<Step> {
    use CallState::*;

    match event {
        CallEvent::Signal(signal) => Ok(match (state, signal) {
            (Idle, Signal::Ring) => Step::to(Ringing),
            (Ringing, Signal::RingCleared | Signal::Ended) => Step::to(Idle),
            (Dialing, Signal::Connected) => Step::to(InCall),
            (Dialing | InCall, Signal::Ended) => Step::to(Idle),
            (state, _) => Step::stay(state),
        }),
        CallEvent::Decision(decision) => match (state, decision) {
            (Ringing, Decision::Answer) => {
                Ok(Step::run(InCall, &[SET_VOLUME, ROUTE_HEADSET, ANSWER]))
            }
            (Ringing, Decision::Decline) => Ok(Step::run(Idle, &[REJECT, ROUTE_SPEAKER])),
            (Idle, Decision::Dial(number)) => {
                let dial = format!("ATD{};", validate_number(number)?);
                Ok(Step::run(Dialing, &[SET_VOLUME, ROUTE_HEADSET, dial.as_str()]))
            }
            (Dialing, Decision::Cancel) | (InCall, Decision::HangUp) => {
                Ok(Step::run(Idle, &[HANG_UP, ROUTE_SPEAKER]))
            }
            (state, decision) => Err(ModemError::IllegalTransition {
                state,
                decision: decision.clone(),
            }),
        },
    }
}

/// Accept dialable numbers: optional leading `+`, then digits, `*` or `#`.
pub fn validate_number(number: &str) -> Result<&str> {
    let number = number.trim();
    let digits = number.strip_prefix('+').unwrap_or(number);
    if digits.is_empty()
        || !digits
            .chars()
            .all(|c| c.is_ascii_digit() || c == '*' || c == '#')
    {
        return Err(ModemError::InvalidInput(format!(
            "{number:?} is not a phone number"
        )));
    }
    Ok(number)
}

/// Owner of the current [`CallState`].
pub struct CallStateMachine {
    channel: TransactionChannel,
    state: Mutex<CallState>,
    timeout: Duration,
}

impl CallStateMachine {
    pub fn new(channel: TransactionChannel, timeout: Duration) -> Self {
        Self {
            channel,
            state: Mutex::new(CallState::Idle),
            timeout,
        }
    }

    pub fn state(&self) -> CallState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Apply a modem signal. Returns `Some((from, to))` when the state
    /// actually changed.
    pub fn on_signal(&self, signal: Signal) -> Option<(CallState, CallState)> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let from = *state;
        // Signals never fail to plan.
        let next = plan(from, &CallEvent::Signal(signal)).map_or(from, |step| step.next);
        if next == from {
            return None;
        }
        *state = next;
        tracing::info!(from = %from, to = %next, ?signal, "call state changed");
        Some((from, next))
    }

    pub async fn answer(&self) -> Result<CallState> {
        self.decide(Decision::Answer).await
    }

    pub async fn decline(&self) -> Result<CallState> {
        self.decide(Decision::Decline).await
    }

    pub async fn dial(&self, number: &str) -> Result<CallState> {
        self.decide(Decision::Dial(number.to_string())).await
    }

    pub async fn cancel(&self) -> Result<CallState> {
        self.decide(Decision::Cancel).await
    }

    pub async fn hang_up(&self) -> Result<CallState> {
        self.decide(Decision::HangUp).await
    }

    /// Hang up or cancel, whichever applies to the current state.
    pub async fn end_call(&self) -> Result<CallState> {
        match self.state() {
            CallState::Dialing => self.cancel().await,
            _ => self.hang_up().await,
        }
    }

    async fn decide(&self, decision: Decision) -> Result<CallState> {
        let from = self.state();
        let step = plan(from, &CallEvent::Decision(decision.clone()))?;

        for command in &step.commands {
            self.channel
                .request(&Transaction::ok(command.as_str(), self.timeout))
                .await?;
        }

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let current = *state;
        if current != from {
            // The modem's own report wins over the planned state.
            tracing::warn!(
                expected = %from,
                found = %current,
                %decision,
                "call state moved while commands were in flight, keeping it"
            );
            return Ok(current);
        }
        *state = step.next;
        tracing::info!(from = %from, to = %step.next, %decision, "call state changed");
        Ok(step.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [CallState; 4] = [
        CallState::Idle,
        CallState::Ringing,
        CallState::Dialing,
        CallState::InCall,
    ];

    fn decisions() -> Vec<Decision> {
        vec![
            Decision::Answer,
            Decision::Decline,
            Decision::Dial("+123".into()),
            Decision::Cancel,
            Decision::HangUp,
        ]
    }

    #[test]
    fn signals_never_fail() {
        for state in STATES {
            for signal in [Signal::Ring, Signal::RingCleared, Signal::Connected, Signal::Ended] {
                let step = plan(state, &CallEvent::Signal(signal)).unwrap();
                assert!(step.commands.is_empty());
            }
        }
    }

    #[test]
    fn legal_decisions_per_state() {
        for state in STATES {
            let legal = decisions()
                .into_iter()
                .filter(|d| plan(state, &CallEvent::Decision(d.clone())).is_ok())
                .count();
            let expected = match state {
                CallState::Ringing => 2,
                _ => 1,
            };
            assert_eq!(legal, expected, "legal decisions in {state}");
        }
    }

    #[test]
    fn ring_only_starts_ringing_from_idle() {
        let ring = CallEvent::Signal(Signal::Ring);
        assert_eq!(plan(CallState::Idle, &ring).unwrap().next, CallState::Ringing);
        assert_eq!(plan(CallState::Ringing, &ring).unwrap().next, CallState::Ringing);
        assert_eq!(plan(CallState::InCall, &ring).unwrap().next, CallState::InCall);
        assert_eq!(plan(CallState::Dialing, &ring).unwrap().next, CallState::Dialing);
    }

    #[test]
    fn missed_call_returns_to_idle() {
        let step = plan(CallState::Ringing, &CallEvent::Signal(Signal::RingCleared)).unwrap();
        assert_eq!(step.next, CallState::Idle);
        assert!(step.commands.is_empty());
    }

    #[test]
    fn answer_routes_audio_then_answers() {
        let step = plan(CallState::Ringing, &CallEvent::Decision(Decision::Answer)).unwrap();
        assert_eq!(step.next, CallState::InCall);
        assert_eq!(step.commands, vec!["AT+CLVL=3", "AT+CSDVC=1", "ATA"]);
    }

    #[test]
    fn dial_appends_semicolon() {
        let step = plan(
            CallState::Idle,
            &CallEvent::Decision(Decision::Dial(" +4915112345 ".into())),
        )
        .unwrap();
        assert_eq!(step.next, CallState::Dialing);
        assert_eq!(step.commands.last().unwrap(), "ATD+4915112345;");
    }

    #[test]
    fn dial_while_in_call_is_illegal() {
        let err = plan(CallState::InCall, &CallEvent::Decision(Decision::Dial("1".into())))
            .unwrap_err();
        assert!(matches!(
            err,
            ModemError::IllegalTransition {
                state: CallState::InCall,
                ..
            }
        ));
    }

    #[test]
    fn rejects_garbage_numbers() {
        assert!(validate_number("").is_err());
        assert!(validate_number("+").is_err());
        assert!(validate_number("12;ATH").is_err());
        assert_eq!(validate_number("*100#").unwrap(), "*100#");
    }
}

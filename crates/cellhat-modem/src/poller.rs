//! # Notification Poller
//!
//! Background loop that reads unsolicited modem output between
//! transactions. It takes the same session lock as the transaction channel,
//! so it never reads in the middle of an exchange.
//!
//! Alerts are edge-triggered: [`AlertFlags`] latches each condition on its
//! first matching line and releases it on the first line that does not
//! match, so a run of `RING` lines raises one alert, not one per line.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::call::{CallState, CallStateMachine, Signal};
use crate::error::Result;
use crate::facade::CommandFacade;
use crate::sms::MessageListing;

pub const RING_INDICATOR: &str = "RING";
pub const CALLER_ID_INDICATOR: &str = "+CLIP:";
pub const NEW_MESSAGE_INDICATOR: &str = "+CMTI";
pub const CALL_BEGIN_INDICATOR: &str = "VOICE CALL: BEGIN";
pub const CALL_END_INDICATORS: [&str; 2] = ["VOICE CALL: END", "NO CARRIER"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ring,
    TextArrived,
    CallConnected,
    CallEnded,
    Other,
}

pub fn classify(line: &str) -> Classification {
    if line.contains(NEW_MESSAGE_INDICATOR) {
        Classification::TextArrived
    } else if line.contains(CALLER_ID_INDICATOR) || line.trim() == RING_INDICATOR {
        Classification::Ring
    } else if line.contains(CALL_BEGIN_INDICATOR) {
        Classification::CallConnected
    } else if CALL_END_INDICATORS.iter().any(|i| line.contains(i)) {
        Classification::CallEnded
    } else {
        Classification::Other
    }
}

/// Caller number from a `+CLIP: "<number>",<type>,...` line.
pub fn caller_id(line: &str) -> Option<String> {
    let rest = line.split_once(CALLER_ID_INDICATOR)?.1;
    let number = rest.trim().strip_prefix('"')?.split('"').next()?;
    (!number.is_empty()).then(|| number.to_string())
}

/// A classified unsolicited line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub line: String,
    pub classification: Classification,
}

impl NotificationEvent {
    pub fn new(line: &str) -> Self {
        Self {
            line: line.to_string(),
            classification: classify(line),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    RingStarted,
    RingStopped,
    TextStarted,
    TextStopped,
}

/// Latches that suppress repeated alerts for one ongoing condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertFlags {
    pub ring_notified: bool,
    pub text_notified: bool,
}

impl AlertFlags {
    /// Feed one classified line; returns the edges it produced.
    pub fn observe(&mut self, classification: Classification) -> Vec<Edge> {
        let mut edges = Vec::with_capacity(2);

        let ring = classification == Classification::Ring;
        if ring != self.ring_notified {
            self.ring_notified = ring;
            edges.push(if ring { Edge::RingStarted } else { Edge::RingStopped });
        }

        let text = classification == Classification::TextArrived;
        if text != self.text_notified {
            self.text_notified = text;
            edges.push(if text { Edge::TextStarted } else { Edge::TextStopped });
        }

        edges
    }

    /// Release latches whose condition can no longer show up as a line.
    ///
    /// A ring only continues while the call is still ringing; a decision
    /// (answer, decline) ends it through a command reply the poller never
    /// sees. The modem sends `+CMTI` once per message, so a poll without one
    /// means the condition has stopped.
    pub fn settle(&mut self, call: CallState, saw_text: bool) {
        if call != CallState::Ringing {
            self.ring_notified = false;
        }
        if !saw_text {
            self.text_notified = false;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    IncomingCall,
    NewMessage,
}

/// The "tell the user" side effect (sound, LED, ...).
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: Alert);
}

/// What the poller reports to the foreground.
#[derive(Debug, Clone, PartialEq)]
pub enum ModemEvent {
    IncomingCall { caller: Option<String> },
    MissedCall,
    CallConnected,
    CallEnded,
    /// New message notification; `unread` is `None` if the listing failed.
    TextArrived { unread: Option<MessageListing> },
}

pub struct NotificationPoller {
    facade: CommandFacade,
    call: Arc<CallStateMachine>,
    notifier: Arc<dyn Notifier>,
    events: mpsc::Sender<ModemEvent>,
    flags: AlertFlags,
    period: Duration,
}

impl NotificationPoller {
    pub fn new(
        facade: CommandFacade,
        call: Arc<CallStateMachine>,
        notifier: Arc<dyn Notifier>,
        events: mpsc::Sender<ModemEvent>,
    ) -> Self {
        let period = facade.timing().poll_period;
        Self {
            facade,
            call,
            notifier,
            events,
            flags: AlertFlags::default(),
            period,
        }
    }

    pub fn flags(&self) -> AlertFlags {
        self.flags
    }

    /// Poll every period until shutdown is requested.
    pub async fn run(mut self) {
        let session = self.facade.channel().session().clone();
        let mut shutdown = session.shutdown_signal();
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(period_ms = self.period.as_millis() as u64, "notification poller started");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if session.is_cancelled() {
                break;
            }
            if let Err(e) = self.poll_once().await {
                tracing::warn!(error = %e, "notification poll failed");
            }
        }
        tracing::info!("notification poller stopped");
    }

    /// One poll iteration. Returns the events forwarded to the foreground.
    pub async fn poll_once(&mut self) -> Result<Vec<ModemEvent>> {
        let lines = {
            let mut io = self.facade.channel().session().lock().await;
            io.pull()?;
            io.take_lines()
        };

        // Rings that ended through a call decision leave the latch set.
        self.flags.settle(self.call.state(), true);

        let mut events = Vec::new();
        let mut fetch_unread = false;
        let mut saw_text = false;

        for (i, line) in lines.iter().enumerate() {
            let event = NotificationEvent::new(line);
            tracing::trace!(line = %event.line, classification = ?event.classification, "unsolicited line");
            saw_text |= event.classification == Classification::TextArrived;

            if self.call.state() == CallState::InCall {
                // Nothing alerts during a call; the latches start fresh after it.
                self.flags = AlertFlags::default();
                if event.classification == Classification::CallEnded
                    && self.call.on_signal(Signal::Ended).is_some()
                {
                    events.push(ModemEvent::CallEnded);
                }
                continue;
            }

            for edge in self.flags.observe(event.classification) {
                match edge {
                    Edge::RingStarted => {
                        if self.call.on_signal(Signal::Ring).is_some() {
                            let caller = lines[i..]
                                .iter()
                                .take_while(|l| classify(l) == Classification::Ring)
                                .find_map(|l| caller_id(l));
                            tracing::info!(caller = caller.as_deref().unwrap_or("unknown"), "incoming call");
                            self.notifier.notify(Alert::IncomingCall);
                            events.push(ModemEvent::IncomingCall { caller });
                        }
                    }
                    Edge::RingStopped => {
                        if self.call.on_signal(Signal::RingCleared).is_some() {
                            tracing::info!("missed call");
                            events.push(ModemEvent::MissedCall);
                        }
                    }
                    Edge::TextStarted => {
                        tracing::info!(line = %event.line, "new text message");
                        self.notifier.notify(Alert::NewMessage);
                        fetch_unread = true;
                    }
                    Edge::TextStopped => {}
                }
            }

            match event.classification {
                Classification::CallConnected => {
                    if self.call.on_signal(Signal::Connected).is_some() {
                        events.push(ModemEvent::CallConnected);
                    }
                }
                Classification::CallEnded => {
                    if self.call.on_signal(Signal::Ended).is_some() {
                        events.push(ModemEvent::CallEnded);
                    }
                }
                _ => {}
            }
        }

        if !saw_text {
            self.flags.settle(self.call.state(), false);
        }

        if fetch_unread {
            let unread = match self.facade.list_unread_messages().await {
                Ok(listing) => Some(listing),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to list unread messages");
                    None
                }
            };
            events.push(ModemEvent::TextArrived { unread });
        }

        for event in &events {
            if self.events.send(event.clone()).await.is_err() {
                tracing::debug!("event receiver dropped");
                break;
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_indicators() {
        assert_eq!(classify("RING"), Classification::Ring);
        assert_eq!(classify("+CLIP: \"+4915112345\",145,,,,0"), Classification::Ring);
        assert_eq!(classify("+CMTI: \"SM\",4"), Classification::TextArrived);
        assert_eq!(classify("VOICE CALL: BEGIN"), Classification::CallConnected);
        assert_eq!(classify("VOICE CALL: END: 000012"), Classification::CallEnded);
        assert_eq!(classify("NO CARRIER"), Classification::CallEnded);
        assert_eq!(classify("RINGTONE SET"), Classification::Other);
        assert_eq!(classify("OK"), Classification::Other);
    }

    #[test]
    fn extracts_caller_id() {
        assert_eq!(
            caller_id("+CLIP: \"+4915112345\",145,,,,0").as_deref(),
            Some("+4915112345")
        );
        assert_eq!(caller_id("+CLIP: \"\",128"), None);
        assert_eq!(caller_id("RING"), None);
    }

    fn run_flags(lines: &[&str]) -> Vec<Edge> {
        let mut flags = AlertFlags::default();
        lines
            .iter()
            .flat_map(|l| flags.observe(classify(l)))
            .collect()
    }

    #[test]
    fn one_edge_per_contiguous_run() {
        let edges = run_flags(&["RING", "+CLIP: \"1\",129", "RING", "RING"]);
        assert_eq!(edges, vec![Edge::RingStarted]);
    }

    #[test]
    fn interruption_splits_runs() {
        let edges = run_flags(&["RING", "RING", "MISSED_CALL: 10:00AM 1", "RING"]);
        let starts = edges.iter().filter(|e| **e == Edge::RingStarted).count();
        assert_eq!(starts, 2);
        assert!(edges.contains(&Edge::RingStopped));
    }

    #[test]
    fn message_line_clears_ring_latch() {
        let mut flags = AlertFlags::default();
        flags.observe(Classification::Ring);
        let edges = flags.observe(Classification::TextArrived);
        assert_eq!(edges, vec![Edge::RingStopped, Edge::TextStarted]);
        assert!(!flags.ring_notified);
        assert!(flags.text_notified);
    }

    #[test]
    fn settle_releases_latches() {
        let mut flags = AlertFlags {
            ring_notified: true,
            text_notified: true,
        };
        flags.settle(CallState::Ringing, true);
        assert_eq!(
            flags,
            AlertFlags {
                ring_notified: true,
                text_notified: true
            }
        );

        flags.settle(CallState::Idle, true);
        assert!(!flags.ring_notified);
        assert!(flags.text_notified);

        flags.settle(CallState::Idle, false);
        assert_eq!(flags, AlertFlags::default());
    }
}

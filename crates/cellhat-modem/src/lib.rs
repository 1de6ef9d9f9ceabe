//! # Cellhat modem core
//!
//! Mediates all traffic with one serial-attached SIM7600 modem shared by a
//! foreground command issuer and a background notification poller.
//!
//! - [`channel`]: timeout-framed AT transactions under the session lock
//! - [`poller`]: unsolicited line handling with edge-triggered alerts
//! - [`call`]: voice call state machine
//! - [`facade`]: SMS, message storage and GPS operations
//! - [`sim`]: scripted modem used by tests and `--simulate`

pub mod call;
pub mod channel;
pub mod config;
pub mod error;
pub mod facade;
pub mod gps;
pub mod link;
pub mod poller;
pub mod session;
pub mod sim;
pub mod sms;

pub use call::{CallState, CallStateMachine};
pub use channel::{Outcome, Response, Transaction, TransactionChannel};
pub use config::Config;
pub use error::{ModemError, Result};
pub use facade::{CommandFacade, GpsOutcome, Prompter};
pub use poller::{Alert, ModemEvent, NotificationPoller, Notifier};
pub use session::ModemSession;

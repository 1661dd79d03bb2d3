//! Test sessions: concurrent persona runs and their event streams
//!
//! - `events` - the `LogEvent` record observers receive
//! - `broadcast` - per-session history plus live fan-out
//! - `manager` - session lifecycle, supervision and report synthesis

pub mod broadcast;
pub mod events;
pub mod manager;

pub use broadcast::{BroadcastChannel, Delivery, EventEmitter, Subscription};
pub use events::{EventKind, LogEvent};
pub use manager::{
    OutcomeSummary, Session, SessionError, SessionManager, SessionRequest, SessionStatus,
    SessionSummary,
};

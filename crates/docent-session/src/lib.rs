//! Docent Session: per-session document state and its lifecycle.
//!
//! [`SessionManager`] owns one hybrid index, chat history and reference
//! registry per session id, serializes every mutation through a per-session
//! lock, and expires sessions after a sliding inactivity TTL.

pub mod clock;
pub mod manager;
pub mod registry;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{SessionManager, TurnRetrieval};
pub use registry::ReferenceRegistry;
pub use session::{ChatRole, ChatTurn, IngestStatus, SessionStatus};

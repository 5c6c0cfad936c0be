//! Counting Pipeline Module
//!
//! ```text
//! SerialLink ──line──▶ parse ──distance──▶ SheetDetector.step ──reading──▶ ReadingRecorder
//!     ▲                                                                        │
//!     └──────────────── CountingSession (reconnect, cancel, report) ───────────┘
//! ```
//!
//! One session per sensor. The session is the only writer of its detector
//! state and the exclusive owner of its link and recorder handles.

mod session;
mod state;
pub mod source;

pub use session::{CountingSession, SessionFault, SessionReport, SessionSettings, Termination};
pub use source::LineSource;
pub use state::{SessionState, SessionStats};

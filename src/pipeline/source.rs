//! Line source abstraction for sample ingestion.
//!
//! The run loop only needs "open", "give me the next line or tell me you were
//! idle", and "close". [`SerialLink`] provides that over the network; tests
//! provide scripted sources.

use async_trait::async_trait;

use crate::acquisition::{LinkError, LinkEvent, LinkStats, SerialLink};

/// Trait abstracting where sensor lines come from.
///
/// Implementations do not reconnect on their own. The run loop calls
/// [`next_line`](LineSource::next_line) inside a `select!` with cancellation
/// and decides what to do with errors based on
/// [`LinkError::is_recoverable`].
#[async_trait]
pub trait LineSource: Send {
    /// (Re)open the underlying connection.
    async fn open(&mut self) -> Result<(), LinkError>;

    /// Wait for the next line, or return [`LinkEvent::Idle`] once the idle
    /// timeout elapses.
    async fn next_line(&mut self) -> Result<LinkEvent, LinkError>;

    /// Release the connection. Must be safe to call repeatedly.
    async fn close(&mut self);

    /// Human-readable name for logging.
    fn source_name(&self) -> String;

    /// Link health counters, if the source keeps any.
    fn link_stats(&self) -> Option<LinkStats> {
        None
    }
}

#[async_trait]
impl LineSource for SerialLink {
    async fn open(&mut self) -> Result<(), LinkError> {
        SerialLink::open(self).await
    }

    async fn next_line(&mut self) -> Result<LinkEvent, LinkError> {
        SerialLink::next_line(self).await
    }

    async fn close(&mut self) {
        SerialLink::close(self).await
    }

    fn source_name(&self) -> String {
        self.endpoint().to_string()
    }

    fn link_stats(&self) -> Option<LinkStats> {
        Some(self.stats())
    }
}

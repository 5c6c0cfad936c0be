//! Counting session: the supervisor that drives one sensor.
//!
//! ```text
//! Connecting ──open ok──▶ Running ──recoverable link failure──▶ Connecting (backoff)
//!     │                      │
//!     └──fatal / cancel──────┴──cancel / fatal / abort──▶ Stopping ──▶ Stopped
//! ```
//!
//! The session is one sequential loop: read → parse → detect → persist. The
//! link fetch and the backoff sleep are the only suspension points and both
//! race the cancellation token. [`DetectorState`] lives here and nowhere else,
//! so a reconnect resumes counting exactly where it left off.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::source::LineSource;
use super::state::{SessionState, SessionStats};
use crate::acquisition::{LinkError, LinkEvent, LinkStats, ReconnectBackoff};
use crate::config::{CounterConfig, WriteFailurePolicy};
use crate::detection::{DetectorState, SheetDetector, ThresholdError, Thresholds};
use crate::storage::{PersistenceError, ReadingRecorder};
use crate::types::{DistanceSample, RawLine, Reading, StationIdentity};

/// Faults that end a session.
#[derive(Debug, Error)]
pub enum SessionFault {
    #[error("sensor link failed: {0}")]
    Link(#[from] LinkError),
    #[error("reading could not be persisted: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Why a session stopped.
#[derive(Debug)]
pub enum Termination {
    /// Cancelled by the operator
    Interrupted,
    /// Link could not be (re)established and retrying cannot help
    LinkFatal(LinkError),
    /// A write failed under [`WriteFailurePolicy::Abort`]
    PersistenceAbort(PersistenceError),
}

impl Termination {
    /// Clean shutdowns map to `Ok`, everything else to the fault that caused it.
    pub fn into_result(self) -> Result<(), SessionFault> {
        match self {
            Termination::Interrupted => Ok(()),
            Termination::LinkFatal(e) => Err(SessionFault::Link(e)),
            Termination::PersistenceAbort(e) => Err(SessionFault::Persistence(e)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Termination::Interrupted => "interrupted",
            Termination::LinkFatal(_) => "link_fatal",
            Termination::PersistenceAbort(_) => "persistence_abort",
        }
    }
}

/// What a finished session hands back.
#[derive(Debug)]
pub struct SessionReport {
    pub termination: Termination,
    pub final_state: DetectorState,
    pub stats: SessionStats,
    pub link_stats: Option<LinkStats>,
}

/// Fixed per-session parameters.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub station: StationIdentity,
    pub thresholds: Thresholds,
    pub write_failure_policy: WriteFailurePolicy,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &CounterConfig) -> Result<Self, ThresholdError> {
        Ok(Self {
            station: StationIdentity::from(&config.station),
            thresholds: config.detection.thresholds()?,
            write_failure_policy: config.storage.write_failure_policy,
            reconnect_initial_delay: config.link.reconnect_initial_delay(),
            reconnect_max_delay: config.link.reconnect_max_delay(),
        })
    }
}

/// Owns the link, the recorder and the detector state for one session.
///
/// Built with [`new()`](CountingSession::new), then consumed by
/// [`run()`](CountingSession::run), which releases both handles on every
/// exit path before returning.
pub struct CountingSession<S: LineSource, R: ReadingRecorder> {
    source: S,
    recorder: R,
    station: StationIdentity,
    detector: SheetDetector,
    state: DetectorState,
    policy: WriteFailurePolicy,
    backoff: ReconnectBackoff,
    cancel_token: CancellationToken,
    phase: SessionState,
    stats: SessionStats,
}

impl<S: LineSource, R: ReadingRecorder> CountingSession<S, R> {
    pub fn new(
        source: S,
        recorder: R,
        settings: SessionSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            source,
            recorder,
            station: settings.station,
            detector: SheetDetector::new(settings.thresholds),
            state: DetectorState::new(),
            policy: settings.write_failure_policy,
            backoff: ReconnectBackoff::new(
                settings.reconnect_initial_delay,
                settings.reconnect_max_delay,
            ),
            cancel_token,
            phase: SessionState::Connecting,
            stats: SessionStats::default(),
        }
    }

    /// Run until cancellation or a fatal fault, then release everything.
    pub async fn run(mut self) -> SessionReport {
        info!(
            machine_id = %self.station.machine_id,
            production_order_id = %self.station.production_order_id,
            source = %self.source.source_name(),
            storage = self.recorder.backend_name(),
            low_cm = self.detector.thresholds().low(),
            high_cm = self.detector.thresholds().high(),
            policy = %self.policy,
            "[Session] Starting counting session"
        );
        self.log_previous_count();

        let termination = self.supervise().await;
        self.shutdown(&termination).await;

        SessionReport {
            termination,
            final_state: self.state,
            stats: self.stats,
            link_stats: self.source.link_stats(),
        }
    }

    /// Count restarts at zero; the stored count is shown for the operator only.
    fn log_previous_count(&self) {
        match self
            .recorder
            .latest_for(&self.station.machine_id, &self.station.production_order_id)
        {
            Ok(Some(last)) => info!(
                last_sheet_count = last.reading.sheet_count,
                last_seen = %last.reading.timestamp,
                "[Session] Previous readings found for this order; counting restarts at 0"
            ),
            Ok(None) => debug!("[Session] No previous readings for this order"),
            Err(e) => warn!(error = %e, "[Session] Could not look up previous readings"),
        }
    }

    async fn supervise(&mut self) -> Termination {
        self.set_phase(SessionState::Connecting);
        let opened = tokio::select! {
            _ = self.cancel_token.cancelled() => return Termination::Interrupted,
            result = self.source.open() => result,
        };
        if let Err(e) = opened {
            error!(error = %e, "[Session] Could not open sensor link at startup");
            return Termination::LinkFatal(e);
        }

        loop {
            self.set_phase(SessionState::Running);
            match self.consume().await {
                Ok(()) => return Termination::Interrupted,
                Err(SessionFault::Persistence(e)) => return Termination::PersistenceAbort(e),
                Err(SessionFault::Link(e)) if !e.is_recoverable() => {
                    return Termination::LinkFatal(e)
                }
                Err(SessionFault::Link(e)) => {
                    self.stats.link_failures += 1;
                    warn!(
                        error = %e,
                        sheet_count = self.state.sheet_count,
                        "[Session] Sensor link lost, reconnecting"
                    );
                }
            }

            self.set_phase(SessionState::Connecting);
            if let Err(termination) = self.reconnect().await {
                return termination;
            }
        }
    }

    /// Retry the link until it opens, cancellation, or a fatal error.
    async fn reconnect(&mut self) -> Result<(), Termination> {
        self.source.close().await;
        loop {
            let delay = self.backoff.next_delay();
            self.stats.reconnect_attempts += 1;
            info!(
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "[Session] Reconnect scheduled"
            );

            tokio::select! {
                _ = self.cancel_token.cancelled() => return Err(Termination::Interrupted),
                _ = tokio::time::sleep(delay) => {}
            }

            let opened = tokio::select! {
                _ = self.cancel_token.cancelled() => return Err(Termination::Interrupted),
                result = self.source.open() => result,
            };

            match opened {
                Ok(()) => {
                    info!(
                        attempts = self.backoff.attempt(),
                        sheet_count = self.state.sheet_count,
                        "[Session] Sensor link restored"
                    );
                    self.backoff.reset();
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, attempt = self.backoff.attempt(), "[Session] Reconnect failed");
                }
                Err(e) => {
                    error!(error = %e, "[Session] Reconnect failed permanently");
                    return Err(Termination::LinkFatal(e));
                }
            }
        }
    }

    /// Consume lines until cancelled (`Ok`) or a fault ends the running phase.
    async fn consume(&mut self) -> Result<(), SessionFault> {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    info!("[Session] Shutdown signal received");
                    return Ok(());
                }
                result = self.source.next_line() => result?,
            };

            match event {
                LinkEvent::Idle => self.stats.idle_timeouts += 1,
                LinkEvent::Line(line) => self.handle_line(line)?,
            }
        }
    }

    fn handle_line(&mut self, line: RawLine) -> Result<(), PersistenceError> {
        self.stats.lines_received += 1;
        if line.text.trim().is_empty() {
            self.stats.empty_lines += 1;
            return Ok(());
        }

        let sample = DistanceSample::parse(line);
        let distance_cm = match sample.distance {
            Ok(d) => d,
            Err(e) => {
                self.stats.malformed_samples += 1;
                warn!(raw = %e.raw, "[Session] Discarding malformed sample");
                return Ok(());
            }
        };
        self.stats.samples_accepted += 1;

        let (next, counted) = self.detector.step(distance_cm, self.state);
        self.state = next;
        if counted {
            self.stats.sheets_counted += 1;
        }

        let reading = Reading::new(
            &self.station,
            sample.arrived_at.naive_local(),
            distance_cm,
            next.sheet_count,
        );
        match self.recorder.insert(&reading) {
            Ok(()) => self.stats.readings_persisted += 1,
            Err(e) => {
                self.stats.write_failures += 1;
                match self.policy {
                    WriteFailurePolicy::Skip => warn!(
                        error = %e,
                        distance_cm,
                        sheet_count = next.sheet_count,
                        "[Session] Reading not persisted, continuing"
                    ),
                    WriteFailurePolicy::Abort => {
                        error!(error = %e, "[Session] Reading not persisted, aborting session");
                        return Err(e);
                    }
                }
            }
        }

        info!(distance_cm, sheet_count = next.sheet_count, "[Session] Sample accepted");
        if counted {
            info!(sheet_count = next.sheet_count, "[Session] Sheet counted");
        }
        Ok(())
    }

    async fn shutdown(&mut self, termination: &Termination) {
        self.set_phase(SessionState::Stopping);
        self.source.close().await;
        if let Err(e) = self.recorder.flush() {
            warn!(error = %e, "[Session] Final storage flush failed");
        }
        self.set_phase(SessionState::Stopped);

        let cause = termination.label();
        match termination {
            Termination::Interrupted => info!(
                cause,
                sheet_count = self.state.sheet_count,
                samples = self.stats.samples_accepted,
                uptime_secs = self.stats.uptime_secs(),
                "[Session] Session stopped"
            ),
            Termination::LinkFatal(e) => error!(
                cause,
                error = %e,
                sheet_count = self.state.sheet_count,
                "[Session] Session stopped"
            ),
            Termination::PersistenceAbort(e) => error!(
                cause,
                error = %e,
                sheet_count = self.state.sheet_count,
                "[Session] Session stopped"
            ),
        }
    }

    fn set_phase(&mut self, phase: SessionState) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "[Session] Phase change");
            self.phase = phase;
        }
    }
}

//! Outbound collaborators: progress/defect telemetry and frame persistence.
//!
//! Telemetry is fire-and-forget. [`TelemetrySink::publish`] is synchronous
//! and must never block the scan loop; [`ChannelTelemetry`] drops events when
//! its bounded channel is full and counts the drops.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::data::ThermalFrame;
use crate::detection::DefectSummary;
use crate::error::AppResult;
use crate::scan::ScanPoint;
use crate::supervisor::SystemState;

/// Event published to the telemetry collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A scan point finished.
    Progress {
        /// Scan run identifier
        run_uid: String,
        /// Points finished so far
        completed: usize,
        /// Points in the path
        total: usize,
        /// `completed / total`
        fraction: f64,
    },
    /// Classified defects of a finished scan.
    DefectSummary {
        /// Scan run identifier
        run_uid: String,
        /// Counts per kind
        summary: DefectSummary,
    },
    /// The supervisor changed state.
    StateChanged {
        /// Previous state
        from: SystemState,
        /// New state
        to: SystemState,
    },
}

/// Non-blocking telemetry publisher.
pub trait TelemetrySink: Send + Sync {
    /// Publish an event. Must return promptly whatever the consumer does.
    fn publish(&self, event: TelemetryEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn publish(&self, event: TelemetryEvent) {
        trace!(?event, "telemetry discarded");
    }
}

/// Bounded mpsc publisher. Overflowing events are dropped.
#[derive(Debug)]
pub struct ChannelTelemetry {
    tx: mpsc::Sender<TelemetryEvent>,
    dropped: AtomicU64,
}

impl ChannelTelemetry {
    /// Publisher and its receiving end.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelTelemetry {
    fn publish(&self, event: TelemetryEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped, "Telemetry channel full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Telemetry receiver gone, event dropped");
            }
        }
    }
}

/// Frame persistence collaborator.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Persist `frame` captured at stage `position`.
    async fn save(&self, frame: &ThermalFrame, position: ScanPoint) -> AppResult<()>;
}

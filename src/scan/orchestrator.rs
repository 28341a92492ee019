//! The scan loop.
//!
//! For each point of the generated path the orchestrator moves, settles,
//! captures (with retry), analyses, optionally persists, and reports progress.
//! The safety interlock is polled at the top of every iteration; an abort
//! request is honoured at the same place.
//!
//! A failed capture skips the point and marks the current frame stale. A
//! failed save is logged and the scan continues. Motion failures end the job
//! and are returned to the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::acquisition::FrameAcquisition;
use crate::data::{FrameStats, FrameStore, ThermalFrame};
use crate::detection::{Defect, DefectList, DetectorSet};
use crate::error::AppResult;
use crate::error_recovery::RetryPolicy;
use crate::safety::SafetyInterlock;
use crate::scan::{generate, MotionExecutor, ScanBounds, ScanPattern, ScanPoint};
use crate::telemetry::{FrameSink, TelemetryEvent, TelemetrySink};

/// A scan request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    /// Path shape
    pub pattern: ScanPattern,
    /// Area to cover
    pub bounds: ScanBounds,
    /// Spacing between points (mm)
    pub step_mm: f64,
    /// Persist every captured frame through the frame sink
    pub save_frames: bool,
    /// Detect at every point; otherwise frames are kept and analysed after
    /// the scan
    pub analyze_realtime: bool,
}

impl ScanJob {
    /// Grid job with real-time analysis and no persistence.
    pub fn grid(bounds: ScanBounds, step_mm: f64) -> Self {
        Self::new(ScanPattern::Grid, bounds, step_mm)
    }

    /// Job with real-time analysis and no persistence.
    pub fn new(pattern: ScanPattern, bounds: ScanBounds, step_mm: f64) -> Self {
        Self {
            pattern,
            bounds,
            step_mm,
            save_frames: false,
            analyze_realtime: true,
        }
    }

    /// Enable or disable frame persistence.
    pub fn with_save_frames(mut self, save: bool) -> Self {
        self.save_frames = save;
        self
    }

    /// Enable or disable per-point analysis.
    pub fn with_realtime_analysis(mut self, realtime: bool) -> Self {
        self.analyze_realtime = realtime;
        self
    }

    /// The ordered points this job visits.
    pub fn path(&self) -> AppResult<Vec<ScanPoint>> {
        generate(self.pattern, self.bounds, self.step_mm)
    }
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Every point was visited.
    Completed,
    /// Stopped early by an abort request.
    Aborted,
    /// Stopped early by the emergency interlock.
    EmergencyStopped,
}

/// What happened at one scan point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointResult {
    /// Index in the path
    pub index: usize,
    /// Point from the path
    pub requested: ScanPoint,
    /// Point actually commanded after clamping
    pub actual: ScanPoint,
    /// Statistics of the captured frame
    pub frame_stats: Option<FrameStats>,
    /// Border background estimate
    pub background: Option<f64>,
    /// Defects found, tagged with `actual`
    pub defects: Vec<Defect>,
    /// Defects discarded after the per-frame list saturated
    pub dropped_defects: usize,
    /// Detection has run on this point's frame
    pub analyzed: bool,
    /// Why the capture failed, if it did
    pub capture_error: Option<String>,
    /// Whether the frame sink accepted the frame
    pub saved: bool,
    /// Frame retained until deferred analysis
    #[serde(skip)]
    pub frame: Option<ThermalFrame>,
}

impl PointResult {
    fn new(index: usize, requested: ScanPoint, actual: ScanPoint) -> Self {
        Self {
            index,
            requested,
            actual,
            frame_stats: None,
            background: None,
            defects: Vec::new(),
            dropped_defects: 0,
            analyzed: false,
            capture_error: None,
            saved: false,
            frame: None,
        }
    }

    /// Record a detection pass over this point's frame.
    pub fn record_analysis(&mut self, defects: DefectList) {
        self.dropped_defects = defects.dropped();
        let position = self.actual;
        self.defects = defects
            .into_vec()
            .into_iter()
            .map(|d| d.at_position(position))
            .collect();
        self.analyzed = true;
    }
}

/// Result of one scan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Unique run identifier
    pub run_uid: String,
    /// The request
    pub job: ScanJob,
    /// How the run ended
    pub outcome: ScanOutcome,
    /// Points in the generated path
    pub total_points: usize,
    /// Per-point results, in path order
    pub points: Vec<PointResult>,
    /// Points skipped after capture retries were exhausted
    pub capture_failures: usize,
    /// Frames the sink failed to persist
    pub save_failures: usize,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
}

impl ScanReport {
    fn new(job: &ScanJob, total_points: usize) -> Self {
        let now = Utc::now();
        Self {
            run_uid: Uuid::new_v4().to_string(),
            job: job.clone(),
            outcome: ScanOutcome::Completed,
            total_points,
            points: Vec::with_capacity(total_points),
            capture_failures: 0,
            save_failures: 0,
            started_at: now,
            finished_at: now,
        }
    }

    /// Points visited.
    pub fn completed_points(&self) -> usize {
        self.points.len()
    }

    /// All defects in path order.
    pub fn defects(&self) -> impl Iterator<Item = &Defect> {
        self.points.iter().flat_map(|p| p.defects.iter())
    }

    /// Defects discarded across all points.
    pub fn dropped_defects(&self) -> usize {
        self.points.iter().map(|p| p.dropped_defects).sum()
    }
}

/// Runs scan jobs point by point.
pub struct ScanOrchestrator {
    acquisition: FrameAcquisition,
    motion: MotionExecutor,
    detectors: DetectorSet,
    retry: RetryPolicy,
    frame_sink: Option<Arc<dyn FrameSink>>,
    telemetry: Arc<dyn TelemetrySink>,
    interlock: SafetyInterlock,
    frames: FrameStore,
    progress: watch::Sender<f64>,
}

impl ScanOrchestrator {
    /// Orchestrator over the given collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        acquisition: FrameAcquisition,
        motion: MotionExecutor,
        detectors: DetectorSet,
        retry: RetryPolicy,
        frame_sink: Option<Arc<dyn FrameSink>>,
        telemetry: Arc<dyn TelemetrySink>,
        interlock: SafetyInterlock,
    ) -> Self {
        let (progress, _) = watch::channel(0.0);
        Self {
            acquisition,
            motion,
            detectors,
            retry,
            frame_sink,
            telemetry,
            interlock,
            frames: FrameStore::new(),
            progress,
        }
    }

    /// Fraction of the current (or last) job completed, in [0, 1].
    pub fn progress(&self) -> f64 {
        *self.progress.borrow()
    }

    /// Receiver that observes progress updates.
    pub fn subscribe_progress(&self) -> watch::Receiver<f64> {
        self.progress.subscribe()
    }

    /// Most recent frame, valid or stale.
    pub fn current_frame(&self) -> Option<&ThermalFrame> {
        self.frames.current()
    }

    /// Detector pipeline.
    pub fn detectors(&self) -> &DetectorSet {
        &self.detectors
    }

    /// Run `job` to completion, abort, or emergency stop.
    ///
    /// # Errors
    ///
    /// `Configuration` if the path cannot be generated; `OutOfRange` or
    /// `Motion` if the stage fails, which ends the job immediately.
    #[instrument(skip(self), fields(pattern = %job.pattern, step_mm = job.step_mm))]
    pub async fn run(&mut self, job: &ScanJob) -> AppResult<ScanReport> {
        let path = job.path()?;
        let total = path.len();
        let mut report = ScanReport::new(job, total);
        self.progress.send_replace(0.0);
        info!(run_uid = %report.run_uid, total, "Scan started");

        for (index, target) in path.into_iter().enumerate() {
            if self.interlock.is_emergency() {
                warn!(index, "Emergency stop observed, halting scan");
                report.outcome = ScanOutcome::EmergencyStopped;
                break;
            }
            if self.interlock.take_abort() {
                info!(index, "Abort requested, halting scan");
                report.outcome = ScanOutcome::Aborted;
                break;
            }

            let actual = match self.motion.move_to(target).await {
                Ok(actual) => actual,
                Err(err) => {
                    error!(index, %target, error = %err, "Motion failed, ending scan");
                    return Err(err);
                }
            };

            let point = self.visit(index, target, actual, job, &mut report).await;
            report.points.push(point);

            let completed = index + 1;
            let fraction = completed as f64 / total as f64;
            self.progress.send_replace(fraction);
            self.telemetry.publish(TelemetryEvent::Progress {
                run_uid: report.run_uid.clone(),
                completed,
                total,
                fraction,
            });
        }

        if report.outcome == ScanOutcome::Completed && self.interlock.is_emergency() {
            report.outcome = ScanOutcome::EmergencyStopped;
        }
        report.finished_at = Utc::now();
        info!(
            run_uid = %report.run_uid,
            outcome = ?report.outcome,
            visited = report.completed_points(),
            capture_failures = report.capture_failures,
            "Scan finished"
        );
        Ok(report)
    }

    async fn visit(
        &mut self,
        index: usize,
        requested: ScanPoint,
        actual: ScanPoint,
        job: &ScanJob,
        report: &mut ScanReport,
    ) -> PointResult {
        let mut point = PointResult::new(index, requested, actual);

        let acquisition = &self.acquisition;
        let captured = self.retry.run(|| acquisition.capture()).await;
        let frame = match captured {
            Ok(frame) => self.frames.replace(frame),
            Err(err) => {
                warn!(index, %actual, error = %err, "Capture failed after retries, skipping point");
                self.frames.mark_stale();
                report.capture_failures += 1;
                point.capture_error = Some(err.to_string());
                return point;
            }
        };

        point.frame_stats = Some(frame.stats());
        point.background = Some(frame.background_temperature());

        if job.analyze_realtime {
            point.record_analysis(self.detectors.analyze(frame));
            debug!(index, defects = point.defects.len(), "Point analysed");
        } else {
            point.frame = Some(frame.clone());
        }

        if job.save_frames {
            if let Some(sink) = &self.frame_sink {
                match sink.save(frame, actual).await {
                    Ok(()) => point.saved = true,
                    Err(err) => {
                        warn!(index, error = %err, "Frame save failed, continuing");
                        report.save_failures += 1;
                    }
                }
            }
        }

        point
    }
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("progress", &self.progress())
            .field("moves_issued", &self.motion.moves_issued())
            .finish_non_exhaustive()
    }
}

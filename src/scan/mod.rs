//! Scan paths, motion and the per-point scan loop.
pub mod motion;
pub mod orchestrator;
pub mod path;

pub use motion::{MotionEnvelope, MotionExecutor};
pub use orchestrator::{PointResult, ScanJob, ScanOrchestrator, ScanOutcome, ScanReport};
pub use path::{generate, ScanBounds, ScanPattern, ScanPoint, MAX_SCAN_POINTS};

//! Hardware collaborators.
//!
//! `capabilities` defines the traits the core drives; `mock` provides
//! simulated implementations for tests and the demo CLI.
pub mod capabilities;
pub mod mock;

pub use capabilities::{MotionStage, ReferenceSource, ThermalSensor};

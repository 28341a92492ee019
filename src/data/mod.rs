//! Frame data types.
pub mod frame;

pub use frame::{FrameStats, FrameStore, ThermalFrame};

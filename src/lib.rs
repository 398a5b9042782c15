// Depth Recorder - recording pipeline for a depth camera capture station
// Main library entry point

pub mod config;
pub mod encoding;
pub mod error;
pub mod gstreamer_init;
pub mod queue;
pub mod recording;
pub mod skeleton;
pub mod types;

pub use config::RecorderConfig;
pub use error::{ErrorReporter, RecordError, Result};
pub use recording::{Recorder, RecorderState, SessionPaths};
pub use types::{CalibrationInfo, Dimensions, ImagePlane, RecordOptions, SensorSample, StreamKind, ValueRange};

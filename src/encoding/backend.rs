// Encoding backend capability
//
// The per-stream encoder drives compression and muxing through these traits
// only. The GStreamer implementation lives in `gst`; tests substitute their own.

use std::path::PathBuf;

use crate::error::Result;
use crate::types::PixelFormat;

/// Stream parameters handed to the backend when a stream opens
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Output file, including the container extension
    pub path: PathBuf,
    /// Frame size as submitted (after filtering)
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Encoder thread hint; 0 lets the encoder decide
    pub threads: u32,
    pub hardware: bool,
}

/// A filtered frame ready for compression
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Presentation order, starting at 0 for each stream
    pub sequence: u64,
    /// Device clock of the capture, microseconds
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Tightly packed pixel data
    pub data: Vec<u8>,
}

/// One open output stream. Owned by a single worker thread once opened.
pub trait EncodingBackend: Send {
    /// Compress and mux one frame
    fn submit(&mut self, frame: VideoFrame) -> Result<()>;

    /// Drain frames still inside the encoder into the container
    fn flush(&mut self) -> Result<()>;

    /// Write the container trailer and release resources
    fn close(&mut self) -> Result<()>;
}

/// Creates backends. Failing here means no worker thread is started.
pub trait BackendFactory: Send + Sync {
    fn open(&self, config: &BackendConfig) -> Result<Box<dyn EncodingBackend>>;

    /// File extension of the container this factory writes
    fn extension(&self) -> &'static str {
        "mp4"
    }
}

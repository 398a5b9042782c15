// Video encoding for the recorded image streams
//
// A stream frame travels: capture thread -> `StreamEncoder::submit` (copy into
// the ring) -> worker thread -> `FilterChain` -> `EncodingBackend`.
// `gst` holds the GStreamer H.264/MP4 backend used in production.

pub mod backend;
pub mod filter;
pub mod gst;
pub mod stream;

pub use backend::{BackendConfig, BackendFactory, EncodingBackend, VideoFrame};
pub use filter::FilterChain;
pub use gst::{detect_hardware_encoder, GstBackend, GstBackendFactory, H264EncoderType};
pub use stream::{StreamEncoder, StreamParams};

// Per-stream encoder: one bounded frame queue and one worker thread per video
//
// The capture thread only copies the plane into the ring (`submit`); the
// worker filters each frame and feeds it to the encoding backend in
// submission order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use super::backend::{BackendConfig, BackendFactory, EncodingBackend, VideoFrame};
use super::filter::FilterChain;
use crate::error::{ErrorReporter, RecordError, Result};
use crate::queue::{QueueSink, StreamStats, WorkerQueue};
use crate::types::{ImagePlane, PixelFormat, StreamKind};

/// Everything needed to open one video stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub kind: StreamKind,
    pub path: PathBuf,
    /// Frame size from calibration; incoming planes are cropped to it
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Brightness factor for 16-bit streams
    pub scale: f32,
    pub threads: u32,
    pub hardware: bool,
    /// Colour resize target; 0 keeps the sensor width
    pub colour_width: u32,
    pub queue_capacity: usize,
}

impl StreamParams {
    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RecordError::Config(format!(
                "{} stream has invalid size {}x{}",
                self.kind, self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(RecordError::Config(format!("{} stream has zero frame rate", self.kind)));
        }
        Ok(())
    }
}

/// Deep copy of one captured plane
struct RawFrame {
    sequence: u64,
    timestamp: u64,
    data: Vec<u8>,
}

/// Worker-side state: filter plus backend, owned by the worker thread
struct EncodeSink {
    kind: StreamKind,
    filter: FilterChain,
    backend: Box<dyn EncodingBackend>,
}

impl QueueSink<RawFrame> for EncodeSink {
    fn process(&mut self, frame: RawFrame) -> Result<()> {
        let data = self
            .filter
            .apply(&frame.data)
            .map_err(|e| RecordError::aborted(self.kind, e.to_string()))?;
        let (width, height) = self.filter.output_size();

        self.backend
            .submit(VideoFrame {
                sequence: frame.sequence,
                timestamp: frame.timestamp,
                width,
                height,
                format: self.filter.format(),
                data,
            })
            .map_err(|e| match e {
                RecordError::EncodeAborted { .. } => e,
                other => RecordError::aborted(self.kind, other.to_string()),
            })
    }

    fn finish(&mut self, aborted: bool) -> Result<()> {
        if aborted {
            // A failed backend will not drain; only release the file
            return self.backend.close();
        }
        // Close even when draining failed so the file handle is released
        let flushed = self.backend.flush();
        let closed = self.backend.close();
        flushed.and(closed)
    }
}

/// Handle used by the controller to feed and close one video stream
pub struct StreamEncoder {
    kind: StreamKind,
    format: PixelFormat,
    width: u32,
    height: u32,
    path: PathBuf,
    queue: WorkerQueue<RawFrame>,
    mismatch_reported: AtomicBool,
    errors: ErrorReporter,
}

impl StreamEncoder {
    /// Validate parameters, open the backend, and start the worker thread.
    ///
    /// Nothing is left running when this fails.
    pub fn open(params: &StreamParams, factory: &dyn BackendFactory, errors: ErrorReporter) -> Result<Self> {
        params.validate()?;

        let format = params.kind.pixel_format();
        let filter = FilterChain::new(format, params.width, params.height, params.scale, params.colour_width)?;
        let (out_width, out_height) = filter.output_size();

        let backend = factory.open(&BackendConfig {
            path: params.path.clone(),
            width: out_width,
            height: out_height,
            fps: params.fps,
            format,
            threads: params.threads,
            hardware: params.hardware,
        })?;

        let sink = EncodeSink {
            kind: params.kind,
            filter,
            backend,
        };
        let queue = WorkerQueue::spawn(params.kind.to_string(), params.queue_capacity, sink, errors.clone())?;

        Ok(Self {
            kind: params.kind,
            format,
            width: params.width,
            height: params.height,
            path: params.path.clone(),
            queue,
            mismatch_reported: AtomicBool::new(false),
            errors,
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy a plane into the queue. Only ever blocks on the short queue lock.
    pub fn submit(&self, plane: &ImagePlane<'_>, timestamp: u64) -> Result<()> {
        if !self.queue.is_accepting() {
            return Err(RecordError::queue_full(self.kind));
        }

        let data = match plane.copy_packed(self.format, self.width, self.height) {
            Ok(data) => data,
            Err(e) => {
                if !self.mismatch_reported.swap(true, Ordering::Relaxed) {
                    self.errors.report(&RecordError::Config(format!("{} frame skipped: {}", self.kind, e)));
                }
                return Err(e);
            }
        };

        self.queue
            .push_with(|sequence| RawFrame {
                sequence,
                timestamp,
                data,
            })
            .map(|_| ())
    }

    /// Drain queued frames, finalise the file, and join the worker
    pub fn close(self) -> StreamStats {
        let stats = self.queue.close();
        log::info!(
            "[{}] closed {}: {} frames encoded, {} dropped",
            self.kind,
            self.path.display(),
            stats.processed,
            stats.dropped
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Log {
        frames: Vec<(u64, u64, Vec<u8>)>,
        configs: Vec<BackendConfig>,
        flushed: bool,
        closed: bool,
    }

    struct MemoryBackend {
        log: Arc<Mutex<Log>>,
        fail_at: Option<u64>,
        flush_fails: bool,
    }

    impl EncodingBackend for MemoryBackend {
        fn submit(&mut self, frame: VideoFrame) -> Result<()> {
            if self.fail_at == Some(frame.sequence) {
                return Err(RecordError::BackendUnavailable("device lost".into()));
            }
            self.log.lock().frames.push((frame.sequence, frame.timestamp, frame.data));
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.log.lock().flushed = true;
            if self.flush_fails {
                return Err(RecordError::aborted("Depth", "did not receive EOS"));
            }
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.log.lock().closed = true;
            Ok(())
        }
    }

    struct MemoryFactory {
        log: Arc<Mutex<Log>>,
        fail_at: Option<u64>,
        flush_fails: bool,
    }

    impl MemoryFactory {
        fn new(log: &Arc<Mutex<Log>>) -> Self {
            Self {
                log: log.clone(),
                fail_at: None,
                flush_fails: false,
            }
        }
    }

    impl BackendFactory for MemoryFactory {
        fn open(&self, config: &BackendConfig) -> Result<Box<dyn EncodingBackend>> {
            self.log.lock().configs.push(config.clone());
            Ok(Box::new(MemoryBackend {
                log: self.log.clone(),
                fail_at: self.fail_at,
                flush_fails: self.flush_fails,
            }))
        }
    }

    fn params(kind: StreamKind, width: u32, height: u32) -> StreamParams {
        StreamParams {
            kind,
            path: PathBuf::from("unused.mp4"),
            width,
            height,
            fps: 30,
            scale: 2.0,
            threads: 2,
            hardware: false,
            colour_width: 640,
            queue_capacity: 16,
        }
    }

    #[test]
    fn depth_frames_are_filtered_and_encoded_in_order() {
        let log = Arc::new(Mutex::new(Log::default()));
        let factory = MemoryFactory::new(&log);
        let encoder = StreamEncoder::open(&params(StreamKind::Depth, 2, 1), &factory, ErrorReporter::log_only()).unwrap();

        for ts in 0..5u64 {
            // Row padded to 6 bytes
            let data = [ts as u8, 0, 1, 0, 0xFF, 0xFF];
            encoder.submit(&ImagePlane::new(&data, 2, 1, 6), ts * 100).unwrap();
        }
        let stats = encoder.close();
        assert_eq!(stats.processed, 5);

        let log = log.lock();
        assert!(log.flushed && log.closed);
        assert_eq!(log.configs[0].format, PixelFormat::Gray16Le);
        let sequences: Vec<u64> = log.frames.iter().map(|f| f.0).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        // Mirrored and scaled by 2
        assert_eq!(log.frames[3].1, 300);
        assert_eq!(log.frames[3].2, vec![2, 0, 6, 0]);
    }

    #[test]
    fn colour_backend_gets_resized_dimensions() {
        let log = Arc::new(Mutex::new(Log::default()));
        let factory = MemoryFactory::new(&log);
        let encoder = StreamEncoder::open(&params(StreamKind::Colour, 1280, 720), &factory, ErrorReporter::log_only()).unwrap();
        encoder.close();

        let config = &log.lock().configs[0];
        assert_eq!((config.width, config.height), (640, 360));
        assert_eq!(config.format, PixelFormat::Bgra);
    }

    #[test]
    fn invalid_params_fail_before_backend_open() {
        let log = Arc::new(Mutex::new(Log::default()));
        let factory = MemoryFactory::new(&log);
        let result = StreamEncoder::open(&params(StreamKind::Depth, 0, 576), &factory, ErrorReporter::log_only());
        assert!(matches!(result, Err(RecordError::Config(_))));
        assert!(log.lock().configs.is_empty());
    }

    #[test]
    fn undersized_plane_is_reported_once() {
        let log = Arc::new(Mutex::new(Log::default()));
        let factory = MemoryFactory::new(&log);
        let (errors, rx) = ErrorReporter::channel();
        let encoder = StreamEncoder::open(&params(StreamKind::Infrared, 4, 4), &factory, errors).unwrap();

        let data = [0u8; 8];
        for _ in 0..3 {
            assert!(encoder.submit(&ImagePlane::new(&data, 2, 2, 4), 0).is_err());
        }
        encoder.close();
        assert_eq!(rx.try_iter().count(), 1);
        assert!(log.lock().frames.is_empty());
    }

    #[test]
    fn backend_failure_aborts_stream() {
        let log = Arc::new(Mutex::new(Log::default()));
        let factory = MemoryFactory {
            fail_at: Some(2),
            ..MemoryFactory::new(&log)
        };
        let (errors, rx) = ErrorReporter::channel();
        let encoder = StreamEncoder::open(&params(StreamKind::Depth, 1, 1), &factory, errors).unwrap();

        for ts in 0..4u64 {
            let _ = encoder.submit(&ImagePlane::new(&[1, 0], 1, 1, 2), ts);
        }
        let message = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert!(message.starts_with("Depth encoding aborted"), "{message}");

        encoder.close();
        let log = log.lock();
        assert_eq!(log.frames.len(), 2);
        // The file is released without waiting for a drain that cannot happen
        assert!(log.closed);
        assert!(!log.flushed);
    }

    #[test]
    fn aborted_stream_reports_exactly_one_error() {
        let log = Arc::new(Mutex::new(Log::default()));
        let factory = MemoryFactory {
            fail_at: Some(1),
            flush_fails: true,
            ..MemoryFactory::new(&log)
        };
        let (errors, rx) = ErrorReporter::channel();
        let encoder = StreamEncoder::open(&params(StreamKind::Depth, 1, 1), &factory, errors).unwrap();

        for ts in 0..3u64 {
            let _ = encoder.submit(&ImagePlane::new(&[1, 0], 1, 1, 2), ts);
        }
        encoder.close();

        let messages: Vec<String> = rx.try_iter().collect();
        assert_eq!(messages.len(), 1, "{messages:?}");
        assert!(messages[0].starts_with("Depth encoding aborted"));
        assert!(log.lock().closed);
    }

    #[test]
    fn flush_failure_on_clean_close_is_reported() {
        let log = Arc::new(Mutex::new(Log::default()));
        let factory = MemoryFactory {
            flush_fails: true,
            ..MemoryFactory::new(&log)
        };
        let (errors, rx) = ErrorReporter::channel();
        let encoder = StreamEncoder::open(&params(StreamKind::Depth, 1, 1), &factory, errors).unwrap();
        encoder.submit(&ImagePlane::new(&[1, 0], 1, 1, 2), 0).unwrap();
        encoder.close();

        let messages: Vec<String> = rx.try_iter().collect();
        assert_eq!(messages.len(), 1, "{messages:?}");
        assert!(messages[0].contains("did not receive EOS"));
        assert!(log.lock().closed);
    }

    #[test]
    fn concurrent_submitters_keep_sequences_in_order() {
        let log = Arc::new(Mutex::new(Log::default()));
        let factory = MemoryFactory::new(&log);
        let mut params = params(StreamKind::Infrared, 1, 1);
        params.queue_capacity = 256;
        let encoder = StreamEncoder::open(&params, &factory, ErrorReporter::log_only()).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for ts in 0..50u64 {
                        encoder.submit(&ImagePlane::new(&[1, 0], 1, 1, 2), ts).unwrap();
                    }
                });
            }
        });
        let stats = encoder.close();
        assert_eq!(stats.processed, 200);

        let sequences: Vec<u64> = log.lock().frames.iter().map(|f| f.0).collect();
        assert_eq!(sequences, (0..200).collect::<Vec<u64>>());
    }
}

// Shared helpers for recorder integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use depth_recorder::encoding::{BackendConfig, BackendFactory, EncodingBackend, VideoFrame};
use depth_recorder::skeleton::{Joint, Position, Quaternion, CONFIDENCE_HIGH};
use depth_recorder::{CalibrationInfo, Dimensions, RecordError, Result, ValueRange};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Everything one in-memory output received
#[derive(Debug, Default, Clone)]
pub struct Output {
    pub config: Option<BackendConfig>,
    pub frames: Vec<VideoFrame>,
    pub flushed: bool,
    pub closed: bool,
}

impl Output {
    pub fn sequences(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.sequence).collect()
    }

    pub fn timestamps(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.timestamp).collect()
    }
}

/// Backend factory that records frames in memory instead of encoding.
///
/// Creates an empty file at the requested path, like a real muxer would.
#[derive(Default)]
pub struct MemoryFactory {
    outputs: Mutex<HashMap<PathBuf, Arc<Mutex<Output>>>>,
    /// File suffixes (e.g. "_colour") whose open fails
    pub fail_open: Mutex<Vec<&'static str>>,
    /// Report hardware encoders as missing
    pub no_hardware: bool,
    /// Hold every submit for this long
    pub submit_delay: Option<Duration>,
    /// Limit `submit_delay` to outputs whose name contains this suffix
    pub delay_only: Option<&'static str>,
    /// (suffix, sequence): submit fails for that frame of matching outputs
    pub fail_submit: Mutex<Vec<(&'static str, u64)>>,
    pub opened_hardware: Mutex<Vec<bool>>,
}

impl MemoryFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn without_hardware() -> Arc<Self> {
        Arc::new(Self {
            no_hardware: true,
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            submit_delay: Some(delay),
            ..Default::default()
        })
    }

    /// Only outputs whose name contains `suffix` are slow
    pub fn slow_stream(suffix: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            submit_delay: Some(delay),
            delay_only: Some(suffix),
            ..Default::default()
        })
    }

    /// Output whose file name ends with `suffix` (e.g. "_depth.mp4")
    pub fn output(&self, suffix: &str) -> Option<Output> {
        self.outputs
            .lock()
            .iter()
            .find(|(path, _)| path.to_string_lossy().ends_with(suffix))
            .map(|(_, out)| out.lock().clone())
    }

    pub fn open_count(&self) -> usize {
        self.outputs.lock().len()
    }
}

struct MemoryBackend {
    output: Arc<Mutex<Output>>,
    delay: Option<Duration>,
    fail_at: Option<u64>,
}

impl EncodingBackend for MemoryBackend {
    fn submit(&mut self, frame: VideoFrame) -> Result<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_at == Some(frame.sequence) {
            return Err(RecordError::BackendUnavailable("device lost".into()));
        }
        self.output.lock().frames.push(frame);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.output.lock().flushed = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.output.lock().closed = true;
        Ok(())
    }
}

impl BackendFactory for MemoryFactory {
    fn open(&self, config: &BackendConfig) -> Result<Box<dyn EncodingBackend>> {
        if config.hardware && self.no_hardware {
            return Err(RecordError::BackendUnavailable("no hardware H.264 encoder installed".into()));
        }
        let name = config.path.to_string_lossy().into_owned();
        if self.fail_open.lock().iter().any(|suffix| name.contains(suffix)) {
            return Err(RecordError::BackendUnavailable(format!("cannot open {}", name)));
        }

        std::fs::File::create(&config.path).map_err(|e| RecordError::io(&config.path, e))?;
        self.opened_hardware.lock().push(config.hardware);

        let output = Arc::new(Mutex::new(Output {
            config: Some(config.clone()),
            ..Default::default()
        }));
        self.outputs.lock().insert(config.path.clone(), output.clone());
        let delay = match self.delay_only {
            Some(suffix) if !name.contains(suffix) => None,
            _ => self.submit_delay,
        };
        let fail_at = self
            .fail_submit
            .lock()
            .iter()
            .find(|(suffix, _)| name.contains(suffix))
            .map(|&(_, sequence)| sequence);
        Ok(Box::new(MemoryBackend { output, delay, fail_at }))
    }
}

pub fn calibration() -> CalibrationInfo {
    CalibrationInfo {
        depth: Dimensions::new(8, 4),
        colour: Dimensions::new(16, 8),
        infrared: Dimensions::new(8, 4),
        fps: 30,
        depth_range: ValueRange::new(0, 16384),
        ir_range: ValueRange::new(0, 65535),
    }
}

/// Packed gray16 plane filled with `value`
pub fn gray16(dims: Dimensions, value: u16) -> Vec<u8> {
    value.to_le_bytes().repeat(dims.width as usize * dims.height as usize)
}

pub fn bgra(dims: Dimensions) -> Vec<u8> {
    [10u8, 20, 30, 255].repeat(dims.width as usize * dims.height as usize)
}

pub fn body() -> Vec<Joint> {
    vec![
        Joint::new(Position::new(1.0, 2.0, 3.0), Quaternion::default(), CONFIDENCE_HIGH),
        Joint::new(Position::new(4.0, 5.0, 6.0), Quaternion::default(), CONFIDENCE_HIGH),
    ]
}

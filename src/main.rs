//! Depth Recorder capture driver
//!
//! Feeds a synthetic capture (moving gradients, colour bars, a swaying
//! skeleton with periodic gaps) into the recorder, so the full pipeline can be
//! exercised without a camera attached.
//!
//! Usage:
//!   depth-recorder [OPTIONS]
//!
//! Options:
//!   --pid <id>          Player id, 100-999 (default: 101)
//!   --seconds <n>       Recording length (default: 5)
//!   --depth, --colour, --ir, --skeleton
//!                       Data types to record (default: depth and skeleton)
//!   --software          Skip hardware H.264 encoders
//!   --config <path>     Config file (default: user config dir)

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;

use depth_recorder::config::default_config_path;
use depth_recorder::skeleton::{bones, Joint, Position, Quaternion, CONFIDENCE_MEDIUM, JOINT_COUNT};
use depth_recorder::{
    CalibrationInfo, Dimensions, ErrorReporter, ImagePlane, RecordOptions, Recorder, RecorderConfig, RecorderState,
    SensorSample, ValueRange,
};

const DEFAULT_PID: u32 = 101;
const DEFAULT_SECONDS: u64 = 5;
const FPS: u32 = 30;

/// Every this many frames the body leaves the scene for `GAP_FRAMES` frames
const GAP_PERIOD: u64 = 90;
const GAP_FRAMES: u64 = 10;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let flag = |name: &str| args.iter().any(|a| a == name);
    let value = |name: &str| args.iter().position(|a| a == name).and_then(|i| args.get(i + 1)).cloned();

    let pid = match value("--pid") {
        Some(s) => s.parse::<u32>().with_context(|| format!("invalid --pid {}", s))?,
        None => DEFAULT_PID,
    };
    let seconds = match value("--seconds") {
        Some(s) => s.parse::<u64>().with_context(|| format!("invalid --seconds {}", s))?,
        None => DEFAULT_SECONDS,
    };
    let config_path = value("--config").map(PathBuf::from).unwrap_or_else(default_config_path);

    let mut config = RecorderConfig::load_or_default(&config_path);
    if flag("--software") {
        config.prefer_hardware = false;
    }

    let options = if ["--depth", "--colour", "--ir", "--skeleton"].into_iter().any(|f| flag(f)) {
        RecordOptions::new(flag("--depth"), flag("--colour"), flag("--ir"), flag("--skeleton"))
    } else {
        RecordOptions::default()
    };

    depth_recorder::gstreamer_init::init_gstreamer()?;

    let calibration = CalibrationInfo {
        depth: Dimensions::new(640, 576),
        colour: Dimensions::new(1280, 720),
        infrared: Dimensions::new(640, 576),
        fps: FPS,
        depth_range: ValueRange::new(500, 3860),
        ir_range: ValueRange::new(0, 1000),
    };

    let (errors, error_rx) = ErrorReporter::channel();
    let recorder = Recorder::with_gstreamer(config, errors)?;
    recorder.set_record_options(options)?;
    recorder.update_calibration(calibration)?;
    recorder.start(pid)?;

    if !recorder.wait_for_state(RecorderState::Recording, Duration::from_secs(10)) {
        for message in error_rx.try_iter() {
            eprintln!("error: {}", message);
        }
        anyhow::bail!("recording did not start");
    }

    let mut producer = SyntheticCapture::new(&calibration);
    let frame_interval = Duration::from_secs(1) / FPS;
    let total_frames = seconds * FPS as u64;
    let started = Instant::now();
    let mut body_frames = 0u64;

    for frame in 0..total_frames {
        producer.render(frame);
        recorder.data_callback(&producer.sample(frame));
        if bones(&producer.joints).iter().any(|bone| bone.confident) {
            body_frames += 1;
        }

        for message in error_rx.try_iter() {
            eprintln!("error: {}", message);
        }

        let next = started + frame_interval * (frame as u32 + 1);
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    recorder.stop();
    if !recorder.wait_for_state(RecorderState::Idle, Duration::from_secs(60)) {
        log::warn!("Streams still draining after 60s");
    }
    recorder.shutdown();

    for message in error_rx.try_iter() {
        eprintln!("error: {}", message);
    }
    log::info!("Skeleton tracked in {} of {} frames", body_frames, total_frames);
    if let Some(session) = recorder.last_session() {
        println!("Recorded {} frames to {}", total_frames, session.dir.display());
    }
    Ok(())
}

/// Owns the buffers the sample planes borrow from
struct SyntheticCapture {
    depth: Dimensions,
    colour: Dimensions,
    infrared: Dimensions,
    depth_buf: Vec<u8>,
    colour_buf: Vec<u8>,
    ir_buf: Vec<u8>,
    joints: Vec<Joint>,
}

impl SyntheticCapture {
    fn new(calibration: &CalibrationInfo) -> Self {
        let area = |d: Dimensions| d.width as usize * d.height as usize;
        Self {
            depth: calibration.depth,
            colour: calibration.colour,
            infrared: calibration.infrared,
            depth_buf: vec![0; area(calibration.depth) * 2],
            colour_buf: vec![0; area(calibration.colour) * 4],
            ir_buf: vec![0; area(calibration.infrared) * 2],
            joints: Vec::with_capacity(JOINT_COUNT),
        }
    }

    fn render(&mut self, frame: u64) {
        let shift = (frame * 8) as usize;

        fill_gradient(&mut self.depth_buf, self.depth.width as usize, shift, 500, 3860);
        fill_gradient(&mut self.ir_buf, self.infrared.width as usize, shift / 2, 0, 1000);

        // Scrolling vertical colour bars
        const BARS: [[u8; 4]; 4] = [[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255], [255, 255, 255, 255]];
        let width = self.colour.width as usize;
        let bar_width = (width / BARS.len()).max(1);
        for (i, px) in self.colour_buf.chunks_exact_mut(4).enumerate() {
            let x = (i % width + shift) % width;
            px.copy_from_slice(&BARS[(x / bar_width).min(BARS.len() - 1)]);
        }

        self.joints.clear();
        if frame % GAP_PERIOD >= GAP_FRAMES {
            let sway = (frame as f32 / FPS as f32).sin() * 150.0;
            for slot in 0..JOINT_COUNT {
                let height = 800.0 - slot as f32 * 45.0;
                self.joints.push(Joint::new(
                    Position::new(sway, height, 2000.0),
                    Quaternion::default(),
                    CONFIDENCE_MEDIUM,
                ));
            }
        }
    }

    fn sample(&self, frame: u64) -> SensorSample<'_> {
        SensorSample {
            timestamp: frame * 1_000_000 / FPS as u64,
            depth: Some(plane(&self.depth_buf, self.depth, 2)),
            colour: Some(plane(&self.colour_buf, self.colour, 4)),
            infrared: Some(plane(&self.ir_buf, self.infrared, 2)),
            shadow_mask: None,
            joints: &self.joints,
        }
    }
}

fn plane(buf: &[u8], dims: Dimensions, bytes_per_pixel: u32) -> ImagePlane<'_> {
    ImagePlane::new(buf, dims.width, dims.height, dims.width * bytes_per_pixel)
}

/// Horizontal 16-bit ramp between `min` and `max`, scrolled by `shift` pixels
fn fill_gradient(buf: &mut [u8], width: usize, shift: usize, min: u16, max: u16) {
    let span = (max - min) as usize;
    for (i, px) in buf.chunks_exact_mut(2).enumerate() {
        let x = (i % width + shift) % width;
        let value = min + (x * span / width.max(1)) as u16;
        px.copy_from_slice(&value.to_le_bytes());
    }
}

//! Recording session controller
//!
//! Lifecycle: `Idle -> Armed -> Recording -> Draining -> Idle`.
//!
//! `start` and `stop` only change the state and wake the controller's own
//! lifecycle thread; that thread creates the session folder, opens every
//! stream, and later closes them. The capture thread only ever touches
//! [`Recorder::data_callback`], which takes a read lock on the active session
//! and copies data into the stream queues.
//!
//! The active session exists (and so receives data) exactly while the state
//! is `Recording`, plus the short window between `stop` and the lifecycle
//! thread taking it for teardown. Teardown takes the write lock, so it never
//! overlaps a callback.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use super::pose::PoseTableWriter;
use super::session::{validate_player_id, SessionPaths};
use crate::config::RecorderConfig;
use crate::encoding::{BackendFactory, GstBackendFactory, StreamEncoder, StreamParams};
use crate::error::{ErrorReporter, RecordError, Result};
use crate::types::{CalibrationInfo, RecordOptions, SensorSample};

/// Observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// No session; options and calibration may change
    Idle,
    /// Start accepted; streams are being opened
    Armed,
    /// Streams open and accepting data
    Recording,
    /// Stop requested; streams are draining and finalising
    Draining,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RecorderState::Idle => "idle",
            RecorderState::Armed => "starting",
            RecorderState::Recording => "recording",
            RecorderState::Draining => "stopping",
        })
    }
}

/// Encoder threads per image stream: what is left after the reserve, split
/// evenly, clamped to `1..=max`.
pub fn threads_per_stream(available: u32, reserved: u32, enabled_streams: u32, max: u32) -> u32 {
    if enabled_streams == 0 {
        return 1;
    }
    (available.saturating_sub(reserved) / enabled_streams).clamp(1, max.max(1))
}

fn available_threads() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Open streams of one session
struct Session {
    paths: SessionPaths,
    streams: Vec<StreamEncoder>,
    pose: Option<PoseTableWriter>,
}

impl Session {
    fn close(self) {
        for stream in self.streams {
            stream.close();
        }
        if let Some(pose) = self.pose {
            pose.close();
        }
        log::info!(
            "Session {}/{:03} finished in {}",
            super::session::player_dir_name(self.paths.player_id),
            self.paths.sequence,
            self.paths.dir.display()
        );
    }
}

/// State shared between the public handle and the lifecycle thread
struct Control {
    state: RecorderState,
    player_id: u32,
    options: RecordOptions,
    calibration: Option<CalibrationInfo>,
    terminate: bool,
    last_session: Option<SessionPaths>,
}

/// What the lifecycle thread was woken for
enum Job {
    Open {
        player_id: u32,
        options: RecordOptions,
        calibration: Option<CalibrationInfo>,
    },
    Drain,
    Exit,
}

struct Inner {
    config: RecorderConfig,
    factory: Arc<dyn BackendFactory>,
    errors: ErrorReporter,
    control: Mutex<Control>,
    changed: Condvar,
    session: RwLock<Option<Session>>,
}

/// Recording session controller
pub struct Recorder {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    /// Create a controller and start its lifecycle thread
    pub fn new(config: RecorderConfig, factory: Arc<dyn BackendFactory>, errors: ErrorReporter) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(Inner {
            config,
            factory,
            errors,
            control: Mutex::new(Control {
                state: RecorderState::Idle,
                player_id: 0,
                options: RecordOptions::default(),
                calibration: None,
                terminate: false,
                last_session: None,
            }),
            changed: Condvar::new(),
            session: RwLock::new(None),
        });

        let thread = {
            let inner = inner.clone();
            std::thread::Builder::new()
                .name("rec-controller".into())
                .spawn(move || lifecycle_main(inner))
                .map_err(|e| RecordError::BackendUnavailable(format!("Failed to spawn controller thread: {}", e)))?
        };

        Ok(Self {
            inner,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Controller writing H.264/MP4 through GStreamer
    pub fn with_gstreamer(config: RecorderConfig, errors: ErrorReporter) -> Result<Self> {
        Self::new(config, Arc::new(GstBackendFactory), errors)
    }

    pub fn state(&self) -> RecorderState {
        self.inner.control.lock().state
    }

    pub fn record_options(&self) -> RecordOptions {
        self.inner.control.lock().options
    }

    /// Choose which data types the next session records
    pub fn set_record_options(&self, options: RecordOptions) -> Result<()> {
        let mut control = self.inner.control.lock();
        if control.state != RecorderState::Idle {
            return Err(RecordError::InvalidState(control.state.to_string()));
        }
        control.options = options;
        Ok(())
    }

    /// Sensor geometry; called by the capture side once the device is ready
    pub fn update_calibration(&self, calibration: CalibrationInfo) -> Result<()> {
        let mut control = self.inner.control.lock();
        if control.state != RecorderState::Idle {
            return Err(RecordError::InvalidState(control.state.to_string()));
        }
        control.calibration = Some(calibration);
        Ok(())
    }

    /// Arm a new session for `player_id`. Returns once the request is
    /// accepted; streams are opened on the lifecycle thread.
    ///
    /// Rejected requests are also reported through the error channel.
    pub fn start(&self, player_id: u32) -> Result<()> {
        let result = self.arm(player_id);
        if let Err(e) = &result {
            self.inner.errors.report(e);
        }
        result
    }

    fn arm(&self, player_id: u32) -> Result<()> {
        let mut control = self.inner.control.lock();
        if control.terminate {
            return Err(RecordError::InvalidState("shut down".into()));
        }
        if control.state != RecorderState::Idle {
            return Err(RecordError::InvalidState(control.state.to_string()));
        }
        if control.options.is_empty() {
            return Err(RecordError::NothingToRecord);
        }
        validate_player_id(player_id)?;
        if control.options.image_streams().next().is_some() && control.calibration.is_none() {
            return Err(RecordError::Config("no sensor calibration available".into()));
        }

        control.player_id = player_id;
        control.state = RecorderState::Armed;
        self.inner.changed.notify_all();
        log::info!("Recording armed for player {}", player_id);
        Ok(())
    }

    /// Request the active session to stop. Returns immediately; the state
    /// reaches `Idle` once every stream has drained.
    pub fn stop(&self) {
        let mut control = self.inner.control.lock();
        if matches!(control.state, RecorderState::Armed | RecorderState::Recording) {
            control.state = RecorderState::Draining;
            self.inner.changed.notify_all();
            log::info!("Recording stop requested");
        }
    }

    /// Stop any session and terminate the lifecycle thread. Blocks until
    /// everything is closed. Safe to call more than once.
    pub fn shutdown(&self) {
        {
            let mut control = self.inner.control.lock();
            if matches!(control.state, RecorderState::Armed | RecorderState::Recording) {
                control.state = RecorderState::Draining;
            }
            control.terminate = true;
            self.inner.changed.notify_all();
        }

        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                self.inner
                    .errors
                    .report(&RecordError::aborted("Controller", "lifecycle thread panicked"));
            }
        }
    }

    /// Fan one capture out to the open streams. Does nothing unless
    /// recording; never waits on I/O.
    pub fn data_callback(&self, sample: &SensorSample<'_>) {
        let guard = self.inner.session.read();
        let Some(session) = guard.as_ref() else {
            return;
        };

        // Failures are reported by the streams themselves
        for stream in &session.streams {
            if let Some(plane) = sample.plane(stream.kind()) {
                let _ = stream.submit(plane, sample.timestamp);
            }
        }
        if let Some(pose) = &session.pose {
            let _ = pose.submit(sample.timestamp, sample.joints);
        }
    }

    /// Block until the controller reaches `state`; false on timeout
    pub fn wait_for_state(&self, state: RecorderState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.inner.control.lock();
        while control.state != state {
            if self.inner.changed.wait_until(&mut control, deadline).timed_out() {
                return control.state == state;
            }
        }
        true
    }

    /// Folder of the most recently opened session
    pub fn last_session(&self) -> Option<SessionPaths> {
        self.inner.control.lock().last_session.clone()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lifecycle_main(inner: Arc<Inner>) {
    loop {
        let job = {
            let mut control = inner.control.lock();
            loop {
                match control.state {
                    RecorderState::Armed => {
                        break Job::Open {
                            player_id: control.player_id,
                            options: control.options,
                            calibration: control.calibration,
                        }
                    }
                    RecorderState::Draining => break Job::Drain,
                    _ if control.terminate => break Job::Exit,
                    _ => inner.changed.wait(&mut control),
                }
            }
        };

        match job {
            Job::Open {
                player_id,
                options,
                calibration,
            } => match open_session(&inner, player_id, options, calibration) {
                Ok(session) => {
                    let mut control = inner.control.lock();
                    control.last_session = Some(session.paths.clone());
                    if control.state == RecorderState::Armed {
                        *inner.session.write() = Some(session);
                        control.state = RecorderState::Recording;
                        inner.changed.notify_all();
                        log::info!("Recording started");
                    } else {
                        // Stopped while opening
                        drop(control);
                        session.close();
                        set_idle(&inner);
                    }
                }
                Err(e) => {
                    inner.errors.report(&e);
                    set_idle(&inner);
                }
            },
            Job::Drain => {
                let session = inner.session.write().take();
                if let Some(session) = session {
                    session.close();
                }
                set_idle(&inner);
            }
            Job::Exit => break,
        }
    }
    log::debug!("Controller thread exiting");
}

fn set_idle(inner: &Inner) {
    let mut control = inner.control.lock();
    control.state = RecorderState::Idle;
    inner.changed.notify_all();
    log::info!("Recorder idle");
}

/// Create the session folder and open every enabled stream. On failure
/// anything already opened is closed again.
fn open_session(
    inner: &Inner,
    player_id: u32,
    options: RecordOptions,
    calibration: Option<CalibrationInfo>,
) -> Result<Session> {
    let config = &inner.config;
    let paths = SessionPaths::allocate(&config.output_root, player_id)?;
    log::info!("Opening session in {}", paths.dir.display());

    let mut session = Session {
        paths,
        streams: Vec::new(),
        pose: None,
    };

    match open_streams(inner, &mut session, options, calibration) {
        Ok(()) => Ok(session),
        Err(e) => {
            let paths = session.paths.clone();
            session.close();
            paths.discard_if_empty();
            Err(e)
        }
    }
}

fn open_streams(
    inner: &Inner,
    session: &mut Session,
    options: RecordOptions,
    calibration: Option<CalibrationInfo>,
) -> Result<()> {
    let config = &inner.config;

    if options.skeleton {
        session.pose = Some(PoseTableWriter::open(
            &session.paths.pose_path(),
            config.queue_capacity,
            inner.errors.clone(),
        )?);
    }

    let kinds: Vec<_> = options.image_streams().collect();
    if kinds.is_empty() {
        return Ok(());
    }
    let calibration = calibration.ok_or_else(|| RecordError::Config("no sensor calibration available".into()))?;
    let threads = threads_per_stream(
        available_threads(),
        config.reserved_threads,
        kinds.len() as u32,
        config.max_threads_per_stream,
    );

    for kind in kinds {
        let dims = calibration.dimensions(kind);
        let mut params = StreamParams {
            kind,
            path: session.paths.video_path(kind, inner.factory.extension()),
            width: dims.width,
            height: dims.height,
            fps: calibration.fps,
            scale: calibration.scale(kind),
            threads,
            hardware: config.prefer_hardware,
            colour_width: config.colour_output_width,
            queue_capacity: config.queue_capacity,
        };

        let stream = match StreamEncoder::open(&params, inner.factory.as_ref(), inner.errors.clone()) {
            Err(RecordError::BackendUnavailable(reason)) if params.hardware => {
                log::warn!("[{}] hardware encoding unavailable ({}), using software", kind, reason);
                params.hardware = false;
                StreamEncoder::open(&params, inner.factory.as_ref(), inner.errors.clone())?
            }
            other => other?,
        };
        session.streams.push(stream);
    }

    Ok(())
}

//! GStreamer H.264 backend
//!
//! Pipeline: `appsrc ! videoconvert ! <h264 encoder> ! h264parse ! mp4mux ! filesink`
//!
//! The encoder element is either a hardware H.264 encoder (probed in order of
//! preference) or `x264enc`. Hardware is only used when the stream asks for
//! it; if none is installed, opening fails with `BackendUnavailable` and the
//! caller decides whether to retry in software.

use std::path::{Path, PathBuf};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::backend::{BackendConfig, BackendFactory, EncodingBackend, VideoFrame};
use crate::error::{RecordError, Result};
use crate::gstreamer_init::init_gstreamer;
use crate::types::PixelFormat;

/// Constant quantizer for the software path
const SOFTWARE_QUANTIZER: u32 = 23;

/// How long to wait for the muxer to finalise after EOS
const EOS_TIMEOUT_SECS: u64 = 30;

/// H.264 encoder implementations, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264EncoderType {
    /// NVIDIA NVENC
    Nvenc,
    /// Intel QuickSync
    Qsv,
    /// AMD AMF
    Amf,
    /// VA (Linux, new plugin)
    Va,
    /// VA-API (Linux, legacy plugin)
    VaApi,
    /// x264
    Software,
}

impl H264EncoderType {
    const HARDWARE: [H264EncoderType; 5] = [
        H264EncoderType::Nvenc,
        H264EncoderType::Qsv,
        H264EncoderType::Amf,
        H264EncoderType::Va,
        H264EncoderType::VaApi,
    ];

    pub fn element_name(&self) -> &'static str {
        match self {
            H264EncoderType::Nvenc => "nvh264enc",
            H264EncoderType::Qsv => "qsvh264enc",
            H264EncoderType::Amf => "amfh264enc",
            H264EncoderType::Va => "vah264enc",
            H264EncoderType::VaApi => "vaapih264enc",
            H264EncoderType::Software => "x264enc",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            H264EncoderType::Nvenc => "NVIDIA NVENC",
            H264EncoderType::Qsv => "Intel QuickSync",
            H264EncoderType::Amf => "AMD AMF",
            H264EncoderType::Va => "VA",
            H264EncoderType::VaApi => "VA-API",
            H264EncoderType::Software => "Software (x264)",
        }
    }

    pub fn is_hardware(&self) -> bool {
        *self != H264EncoderType::Software
    }
}

/// Best installed hardware H.264 encoder, if any
pub fn detect_hardware_encoder() -> Option<H264EncoderType> {
    H264EncoderType::HARDWARE
        .into_iter()
        .find(|kind| gst::ElementFactory::find(kind.element_name()).is_some())
}

/// Opens [`GstBackend`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct GstBackendFactory;

impl BackendFactory for GstBackendFactory {
    fn open(&self, config: &BackendConfig) -> Result<Box<dyn EncodingBackend>> {
        let backend = GstBackend::open(config)?;
        Ok(Box::new(backend))
    }
}

/// One H.264-in-MP4 output file
pub struct GstBackend {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    path: PathBuf,
    frame_duration_ns: u64,
    frames_pushed: u64,
    eos_sent: bool,
    closed: bool,
}

impl GstBackend {
    pub fn open(config: &BackendConfig) -> Result<Self> {
        init_gstreamer()?;

        let encoder_type = if config.hardware {
            detect_hardware_encoder()
                .ok_or_else(|| RecordError::BackendUnavailable("no hardware H.264 encoder installed".into()))?
        } else {
            H264EncoderType::Software
        };

        // Surface permission problems as IO errors before building the pipeline
        std::fs::File::create(&config.path).map_err(|e| RecordError::io(&config.path, e))?;

        let pipeline = Self::create_pipeline(config, encoder_type)?;
        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| RecordError::BackendUnavailable("Could not find appsrc".into()))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| RecordError::BackendUnavailable("Could not downcast to AppSrc".into()))?;

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            pipeline.set_state(gst::State::Null).ok();
            return Err(RecordError::BackendUnavailable(format!(
                "{} pipeline failed to start: {:?}",
                encoder_type.display_name(),
                e
            )));
        }

        log::info!(
            "[Encoder] {} -> {} ({}x{} @ {} fps, {} threads)",
            encoder_type.display_name(),
            config.path.display(),
            config.width,
            config.height,
            config.fps,
            config.threads
        );

        Ok(Self {
            pipeline,
            appsrc,
            path: config.path.clone(),
            frame_duration_ns: 1_000_000_000 / config.fps.max(1) as u64,
            frames_pushed: 0,
            eos_sent: false,
            closed: false,
        })
    }

    fn create_pipeline(config: &BackendConfig, encoder_type: H264EncoderType) -> Result<gst::Pipeline> {
        let pipeline = gst::Pipeline::new();

        let format = match config.format {
            PixelFormat::Gray16Le => gst_video::VideoFormat::Gray16Le,
            PixelFormat::Bgra => gst_video::VideoFormat::Bgra,
        };
        let caps = gst_video::VideoInfo::builder(format, config.width, config.height)
            .fps(gst::Fraction::new(config.fps as i32, 1))
            .build()
            .and_then(|info| info.to_caps())
            .map_err(|e| RecordError::Config(format!("Invalid video caps: {}", e)))?;

        // Blocking appsrc keeps memory bounded if the encoder falls behind;
        // only the stream worker thread ever waits on it.
        let appsrc = gst_app::AppSrc::builder()
            .name("src")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(false)
            .block(true)
            .max_bytes(64 * 1024 * 1024)
            .stream_type(gst_app::AppStreamType::Stream)
            .build();

        let videoconvert = make_element("videoconvert")?;
        let encoder = Self::create_encoder(encoder_type, config.threads)?;
        let parser = make_element("h264parse")?;
        let muxer = make_element("mp4mux")?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", config.path.to_string_lossy().to_string())
            .property("async", false)
            .property("sync", false)
            .build()
            .map_err(|e| RecordError::BackendUnavailable(format!("Failed to create filesink: {}", e)))?;

        let elements = [appsrc.upcast_ref(), &videoconvert, &encoder, &parser, &muxer, &filesink];
        pipeline
            .add_many(elements)
            .map_err(|e| RecordError::BackendUnavailable(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many(elements)
            .map_err(|e| RecordError::BackendUnavailable(format!("Failed to link elements: {}", e)))?;

        Ok(pipeline)
    }

    fn create_encoder(encoder_type: H264EncoderType, threads: u32) -> Result<gst::Element> {
        let name = encoder_type.element_name();
        let encoder = gst::ElementFactory::make(name)
            .build()
            .map_err(|e| RecordError::BackendUnavailable(format!("Failed to create {}: {}", name, e)))?;

        if encoder_type == H264EncoderType::Software {
            encoder.set_property_from_str("speed-preset", "ultrafast");
            encoder.set_property_from_str("tune", "zerolatency");
            encoder.set_property_from_str("pass", "quant");
            encoder.set_property("quantizer", SOFTWARE_QUANTIZER);
            if threads > 0 {
                encoder.set_property("threads", threads);
            }
        }

        Ok(encoder)
    }

    fn label(&self) -> String {
        file_label(&self.path)
    }

    /// Fail if the pipeline has posted an error since the last check
    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                return Err(RecordError::aborted(
                    self.label(),
                    format!("{} ({:?})", err.error(), err.debug()),
                ));
            }
        }
        Ok(())
    }
}

impl EncodingBackend for GstBackend {
    fn submit(&mut self, frame: VideoFrame) -> Result<()> {
        let pts = frame.sequence * self.frame_duration_ns;
        let mut buffer = gst::Buffer::from_slice(frame.data);
        if let Some(buffer_ref) = buffer.get_mut() {
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(self.frame_duration_ns));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| RecordError::aborted(self.label(), format!("Failed to push buffer: {:?}", e)))?;
        self.frames_pushed += 1;
        self.check_bus()
    }

    fn flush(&mut self) -> Result<()> {
        if self.eos_sent {
            return Ok(());
        }
        self.eos_sent = true;

        self.appsrc
            .end_of_stream()
            .map_err(|e| RecordError::aborted(self.label(), format!("EOS send failed: {:?}", e)))?;

        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
            match msg.view() {
                gst::MessageView::Eos(..) => {
                    log::debug!("[Encoder] {} finalised after {} frames", self.label(), self.frames_pushed);
                    return Ok(());
                }
                gst::MessageView::Error(err) => {
                    return Err(RecordError::aborted(
                        self.label(),
                        format!("Error during finalization: {} ({:?})", err.error(), err.debug()),
                    ));
                }
                _ => {}
            }
        }
        Err(RecordError::aborted(self.label(), "did not receive EOS, file may be incomplete"))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pipeline
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| RecordError::aborted(self.label(), format!("Failed to stop pipeline: {:?}", e)))
    }
}

impl Drop for GstBackend {
    fn drop(&mut self) {
        if !self.closed {
            self.pipeline.set_state(gst::State::Null).ok();
        }
    }
}

fn make_element(name: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| RecordError::BackendUnavailable(format!("Failed to create {}: {}", name, e)))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

//! One-time GStreamer initialisation
//!
//! Every backend open goes through [`init_gstreamer`], so hosts do not need
//! to call it themselves, but doing so early surfaces a missing installation
//! before the first recording starts.

use std::sync::OnceLock;

use crate::error::{RecordError, Result};

static GSTREAMER_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Initialise GStreamer once per process.
///
/// The outcome is cached; a failed initialisation keeps failing with the same
/// message.
pub fn init_gstreamer() -> Result<()> {
    GSTREAMER_INIT
        .get_or_init(|| match gstreamer::init() {
            Ok(()) => {
                log::info!("GStreamer initialized ({})", gstreamer::version_string());
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to initialize GStreamer: {}", e);
                Err(e.to_string())
            }
        })
        .clone()
        .map_err(|e| RecordError::BackendUnavailable(format!("GStreamer init failed: {}", e)))
}

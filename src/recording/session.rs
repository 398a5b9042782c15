// Session directory allocation and output file naming
//
// Layout: <root>/PID<pid:03>/<seq:03>/PID<pid:03><YYYY-MM-DD><suffix>

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

use crate::error::{RecordError, Result};
use crate::types::StreamKind;

/// Smallest and largest player id accepted by `start`.
///
/// Ids are always three digits; the station's entry form allows 1-999 but
/// one- and two-digit ids are rejected here on purpose.
pub const PLAYER_ID_MIN: u32 = 100;
pub const PLAYER_ID_MAX: u32 = 999;

/// Highest session number that still fits the three-digit folder name
const MAX_SEQUENCE: u32 = 999;

pub fn validate_player_id(player_id: u32) -> Result<()> {
    if (PLAYER_ID_MIN..=PLAYER_ID_MAX).contains(&player_id) {
        Ok(())
    } else {
        Err(RecordError::InvalidPlayerId(player_id))
    }
}

pub fn player_dir_name(player_id: u32) -> String {
    format!("PID{:03}", player_id)
}

/// Output locations for one recording session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub player_id: u32,
    pub sequence: u32,
    /// `<root>/PID<pid>/<seq>`
    pub dir: PathBuf,
    /// `PID<pid><date>`, shared by every file in the session
    pub stem: String,
}

impl SessionPaths {
    /// Create the next free session directory for `player_id`, dated today
    pub fn allocate(root: &Path, player_id: u32) -> Result<Self> {
        Self::allocate_dated(root, player_id, Local::now().date_naive())
    }

    /// Create the next free session directory for `player_id`.
    ///
    /// The sequence number is the smallest `N >= 1` whose directory does not
    /// exist yet. Directories are claimed with `create_dir`, so a folder that
    /// appears concurrently is skipped rather than reused.
    pub fn allocate_dated(root: &Path, player_id: u32, date: NaiveDate) -> Result<Self> {
        validate_player_id(player_id)?;

        let player_dir = root.join(player_dir_name(player_id));
        std::fs::create_dir_all(&player_dir).map_err(|e| RecordError::io(&player_dir, e))?;

        for sequence in 1..=MAX_SEQUENCE {
            let dir = player_dir.join(format!("{:03}", sequence));
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    return Ok(Self {
                        player_id,
                        sequence,
                        dir,
                        stem: format!("{}{}", player_dir_name(player_id), date.format("%Y-%m-%d")),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(RecordError::io(&dir, e)),
            }
        }

        Err(RecordError::Config(format!(
            "all {} session folders for {} are in use",
            MAX_SEQUENCE,
            player_dir_name(player_id)
        )))
    }

    /// Video file for `kind`, e.g. `PID1012026-10-16_depth.mp4`
    pub fn video_path(&self, kind: StreamKind, extension: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", self.stem, kind.file_suffix(), extension))
    }

    /// Pose table, `PID<pid><date>.csv`
    pub fn pose_path(&self) -> PathBuf {
        self.dir.join(format!("{}.csv", self.stem))
    }

    /// Best-effort removal of a session folder that never recorded anything
    pub(crate) fn discard_if_empty(&self) {
        let empty = std::fs::read_dir(&self.dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if empty {
            if let Err(e) = std::fs::remove_dir(&self.dir) {
                log::warn!("Could not remove empty session folder {}: {}", self.dir.display(), e);
            }
        }
    }
}

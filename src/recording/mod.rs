// Recording modules

pub mod controller;
pub mod pose;
pub mod session;

pub use controller::{threads_per_stream, Recorder, RecorderState};
pub use pose::PoseTableWriter;
pub use session::{validate_player_id, SessionPaths, PLAYER_ID_MAX, PLAYER_ID_MIN};

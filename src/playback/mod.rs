//! Timestamp playback
//!
//! Answers about audio/video documents carry timestamp references. The
//! [`TimestampPlaybackBridge`] forwards an activated reference to a
//! [`MediaPlayer`]: it seeks, and resumes playback when paused.

mod bridge;
mod player;

pub use bridge::TimestampPlaybackBridge;
pub use player::{LocalMediaPlayer, MediaPlayer};

/// Render a seconds offset as `m:ss`
pub fn format_timestamp(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }

    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

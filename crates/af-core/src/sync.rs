//! Cross-track timing state.
//!
//! Video reconstruction produces a [`VideoSync`]; audio rewriting and caption
//! adjustment take it by reference, so they cannot run before the video
//! origin is known. [`SyncState`] is the complete per-asset record returned
//! once all tracks are done.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Rescale `value` from time scale `from` to time scale `to`.
///
/// The product is computed in 128 bits and rounded half up, so
/// `rescale(1000, 10_000_000, 48_000)` is 5.
pub fn rescale(value: u64, from: u64, to: u64) -> Result<u64> {
    if from == 0 {
        return Err(Error::Validation("cannot rescale from a zero time scale".into()));
    }
    let scaled = (value as u128 * to as u128 + from as u128 / 2) / from as u128;
    u64::try_from(scaled)
        .map_err(|_| Error::Validation(format!("rescaled value {scaled} overflows u64")))
}

/// Timing origin of the video track, known once video reconstruction has
/// started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSync {
    start_time: u64,
    time_scale: u64,
}

impl VideoSync {
    /// Create a video origin. The time scale must be non-zero.
    pub fn new(start_time: u64, time_scale: u64) -> Result<Self> {
        if time_scale == 0 {
            return Err(Error::Validation("video time scale is zero".into()));
        }
        Ok(Self {
            start_time,
            time_scale,
        })
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn time_scale(&self) -> u64 {
        self.time_scale
    }

    /// The video start time expressed in another time scale.
    pub fn start_in(&self, time_scale: u64) -> Result<u64> {
        rescale(self.start_time, self.time_scale, time_scale)
    }

    /// Offset in milliseconds to add to caption cue times.
    pub fn offset_ms(&self) -> Result<u64> {
        self.start_in(1000)
    }
}

/// Per-asset timing record. Default-zeroed until tracks fill it in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub video_start_time: u64,
    pub video_time_scale: u64,
    pub video_start_time_in_audio_time_scale: u64,
    pub audio_start_time: u64,
    pub audio_time_scale: u64,
    pub audio_has_discontinuities: bool,
}

impl SyncState {
    /// Start a record from the video origin.
    pub fn from_video(video: VideoSync) -> Self {
        Self {
            video_start_time: video.start_time,
            video_time_scale: video.time_scale,
            ..Self::default()
        }
    }

    /// The video origin, if video has been recorded.
    pub fn video(&self) -> Option<VideoSync> {
        VideoSync::new(self.video_start_time, self.video_time_scale).ok()
    }

    /// Record the audio timing and derive the video origin in audio ticks.
    pub fn record_audio(
        &mut self,
        video: &VideoSync,
        audio_start_time: u64,
        audio_time_scale: u64,
    ) -> Result<()> {
        self.video_start_time_in_audio_time_scale = video.start_in(audio_time_scale)?;
        self.audio_start_time = audio_start_time;
        self.audio_time_scale = audio_time_scale;
        Ok(())
    }
}

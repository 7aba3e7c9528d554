use crate::track::Track;

/// Lifecycle of the current track.
///
/// `Idle → Loading → Ready → Playing ⇄ Paused → Ended`. Selecting a track
/// from any phase goes back to `Loading`; device errors land in `Paused`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
}

/// Snapshot of the player handed to observers.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackState {
    pub current_track: Option<Track>,
    pub is_playing: bool,
    pub current_time_seconds: f64,
    /// `0.0` until the device reports the real duration.
    pub duration_seconds: f64,
    pub volume_percent: u8,
    pub phase: PlaybackPhase,
}

impl PlaybackState {
    pub fn new(volume_percent: u8) -> Self {
        Self {
            current_track: None,
            is_playing: false,
            current_time_seconds: 0.0,
            duration_seconds: 0.0,
            volume_percent: volume_percent.min(100),
            phase: PlaybackPhase::Idle,
        }
    }

    pub fn is_current(&self, track_id: &str) -> bool {
        self.current_track
            .as_ref()
            .is_some_and(|track| track.id == track_id)
    }

    /// Position as a percentage of the duration, for the seek bar.
    pub fn progress_percent(&self) -> f64 {
        if self.duration_seconds > 0.0 {
            (self.current_time_seconds / self.duration_seconds * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

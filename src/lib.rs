//! Audio playback and lesson progress tracking for a lecture and course
//! listening app.
//!
//! A single [`PlaybackController`] owns the audio device and publishes
//! [`PlaybackState`] snapshots. A [`ProgressReporter`] turns playback time
//! of the open lesson into rate-limited [`Checkpoint`]s, which
//! [`ProgressStore`] keeps per user. [`LessonSession`] wires both together
//! for the lesson player page.

pub mod config;
pub mod playback;
pub mod progress;
pub mod progress_store;
pub mod session;
pub mod settings;
pub mod track;

#[cfg(test)]
mod testing;

pub use playback::{DEFAULT_VOLUME, PlaybackController, PlaybackPhase, PlaybackState};
pub use progress::{
    Checkpoint, CheckpointPolicy, CourseProgress, LessonProgress, ProgressReporter, ProgressSink,
};
pub use progress_store::ProgressStore;
pub use session::LessonSession;
pub use settings::{JsonSettingsStore, PersistedSettings, SettingsStore};
pub use track::{Lesson, Track, TrackError};

pub use rodio_device::{
    AudioDevice, DeviceEvent, LoadId, MediaError, MediaErrorKind, ReadyState, RodioDevice,
};

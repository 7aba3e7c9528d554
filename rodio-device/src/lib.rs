//! This crate is the audio output layer of [lecture-player]. It defines the
//! [`AudioDevice`] capability the playback controller drives and ships a
//! [rodio] based implementation of it.
//!
//! A device plays exactly one source at a time. Every call to
//! [`AudioDevice::load`] is tagged with a [`LoadId`] and every
//! [`DeviceEvent`] carries the id of the load it belongs to, so a consumer
//! can tell events of a superseded source apart from the current one.
//!
//! [rodio]: https://crates.io/crates/rodio
//! [lecture-player]: ../lecture_player/index.html

use std::fmt;
use std::sync::mpsc::Sender;

mod output;

pub use output::RodioDevice;

/// Identifies one [`AudioDevice::load`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadId(pub u64);

impl LoadId {
    /// No source has been loaded.
    pub const NONE: LoadId = LoadId(0);

    pub fn next(self) -> LoadId {
        LoadId(self.0.wrapping_add(1).max(1))
    }
}

/// How much of the current source the device has buffered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    #[default]
    HaveNothing,
    /// The source was probed and its length is known.
    HaveMetadata,
    /// The source is queued on the output and can start right away.
    HaveEnoughData,
}

impl ReadyState {
    /// Enough data is buffered for a play command to take effect.
    pub fn can_play(self) -> bool {
        self >= ReadyState::HaveEnoughData
    }
}

/// Category of a playback failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaErrorKind {
    Aborted,
    Network,
    Decode,
    SourceNotSupported,
}

impl fmt::Display for MediaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaErrorKind::Aborted => write!(f, "audio loading aborted"),
            MediaErrorKind::Network => write!(f, "network error while loading audio"),
            MediaErrorKind::Decode => write!(f, "audio decoding error"),
            MediaErrorKind::SourceNotSupported => write!(f, "audio source not supported"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message} (source: {source_url})")]
pub struct MediaError {
    pub kind: MediaErrorKind,
    pub source_url: String,
    pub message: String,
}

impl MediaError {
    pub fn new(kind: MediaErrorKind, source_url: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_url: source_url.to_string(),
            message: message.into(),
        }
    }
}

/// Notifications sent by a device over the channel registered with
/// [`AudioDevice::subscribe`].
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    /// The duration is known. `None` for sources without a fixed length.
    LoadedMetadata {
        load_id: LoadId,
        duration: Option<f64>,
    },
    CanPlay {
        load_id: LoadId,
    },
    TimeUpdate {
        load_id: LoadId,
        position: f64,
    },
    Playing {
        load_id: LoadId,
    },
    Paused {
        load_id: LoadId,
    },
    Ended {
        load_id: LoadId,
    },
    Error {
        load_id: LoadId,
        error: MediaError,
    },
}

impl DeviceEvent {
    pub fn load_id(&self) -> LoadId {
        match self {
            DeviceEvent::LoadedMetadata { load_id, .. }
            | DeviceEvent::CanPlay { load_id }
            | DeviceEvent::TimeUpdate { load_id, .. }
            | DeviceEvent::Playing { load_id }
            | DeviceEvent::Paused { load_id }
            | DeviceEvent::Ended { load_id }
            | DeviceEvent::Error { load_id, .. } => *load_id,
        }
    }
}

/// A single audio output the playback controller owns.
///
/// Commands return immediately. Progress is reported asynchronously as
/// [`DeviceEvent`]s.
pub trait AudioDevice {
    /// Registers the channel all further events are sent to. A device has
    /// at most one subscriber; a second call replaces the first.
    fn subscribe(&mut self, events: Sender<DeviceEvent>);

    /// Replaces the current source. Playback stays paused until [`play`]
    /// is called.
    ///
    /// [`play`]: AudioDevice::play
    fn load(&mut self, load_id: LoadId, url: &str);

    /// Drops the current source.
    fn unload(&mut self);

    fn play(&mut self) -> Result<(), MediaError>;

    fn pause(&mut self);

    /// Moves the playback position, in seconds.
    fn seek(&mut self, position: f64);

    /// Output volume in `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32);

    fn ready_state(&self) -> ReadyState;
}

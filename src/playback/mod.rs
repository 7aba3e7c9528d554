mod controller;
mod state;

pub use controller::{DEFAULT_VOLUME, PlaybackController, SUBSCRIBER_BUFFER};
pub use state::{PlaybackPhase, PlaybackState};

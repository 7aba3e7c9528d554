use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use rodio_device::{AudioDevice, DeviceEvent, LoadId};
use tracing::{debug, error, warn};

use crate::playback::state::{PlaybackPhase, PlaybackState};
use crate::settings::{PersistedSettings, SettingsStore};
use crate::track::Track;

/// Volume used when nothing has been persisted yet.
pub const DEFAULT_VOLUME: u8 = 70;

/// Snapshots kept for an observer that has not drained its receiver yet.
/// Newer snapshots are dropped for it once this many are queued.
pub const SUBSCRIBER_BUFFER: usize = 64;

fn device_volume(percent: u8) -> f32 {
    f32::from(percent.min(100)) / 100.0
}

/// Owns the audio device and the one [`PlaybackState`] of the application.
///
/// All mutations go through the methods below; none of them returns an
/// error. Failures are logged and leave the player paused. Device events
/// are applied in [`process_events`], called from the UI loop.
///
/// [`process_events`]: PlaybackController::process_events
pub struct PlaybackController<D: AudioDevice, S: SettingsStore> {
    device: D,
    settings: S,
    state: PlaybackState,
    device_events: Option<Receiver<DeviceEvent>>,
    load_id: LoadId,
    pending_play: Option<LoadId>,
    muted_volume: Option<u8>,
    subscribers: Vec<SyncSender<PlaybackState>>,
}

impl<D: AudioDevice, S: SettingsStore> PlaybackController<D, S> {
    pub fn new(device: D, settings: S) -> Self {
        Self::with_default_volume(device, settings, DEFAULT_VOLUME)
    }

    /// Restores the persisted volume, falling back to `default_volume`.
    pub fn with_default_volume(device: D, settings: S, default_volume: u8) -> Self {
        let volume_percent = match settings.load() {
            Ok(Some(persisted)) => persisted.volume_percent,
            Ok(None) => default_volume,
            Err(error) => {
                warn!("Could not restore player settings, using defaults: {error:#}");
                default_volume
            }
        };

        Self {
            device,
            settings,
            state: PlaybackState::new(volume_percent),
            device_events: None,
            load_id: LoadId::NONE,
            pending_play: None,
            muted_volume: None,
            subscribers: Vec::new(),
        }
    }

    /// Registers for device events. Runs once per controller; later calls
    /// do nothing.
    pub fn initialize_device(&mut self) {
        if self.device_events.is_some() {
            return;
        }
        let (events_tx, events_rx) = mpsc::channel();
        self.device.subscribe(events_tx);
        self.device
            .set_volume(device_volume(self.state.volume_percent));
        self.device_events = Some(events_rx);
        debug!("Audio device initialized");
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Observers get the current snapshot right away and one after every
    /// change. They are expected to drain the receiver regularly; at most
    /// [`SUBSCRIBER_BUFFER`] snapshots wait for them.
    pub fn subscribe(&mut self) -> Receiver<PlaybackState> {
        let (updates_tx, updates_rx) = mpsc::sync_channel(SUBSCRIBER_BUFFER);
        let _ = updates_tx.try_send(self.state.clone());
        self.subscribers.push(updates_tx);
        updates_rx
    }

    pub fn set_current_track(&mut self, track: Option<Track>) {
        self.initialize_device();
        match track {
            Some(track) => self.load_track(track),
            None => self.clear_track(),
        }
    }

    fn load_track(&mut self, track: Track) {
        if let Err(error) = track.validate() {
            error!("Rejecting track: {error}");
            return;
        }

        if self.state.is_playing {
            self.device.pause();
        }
        self.pending_play = None;
        self.start_load(&track.audio_url);
        debug!("Change title: {} ({})", &track.title, &track.audio_url);

        self.state = PlaybackState {
            current_track: Some(track),
            is_playing: false,
            current_time_seconds: 0.0,
            duration_seconds: 0.0,
            volume_percent: self.state.volume_percent,
            phase: PlaybackPhase::Loading,
        };
        self.publish();
    }

    fn clear_track(&mut self) {
        self.device.pause();
        self.device.unload();
        // events still in flight for the old source must not match
        self.load_id = self.load_id.next();
        self.pending_play = None;
        self.state = PlaybackState::new(self.state.volume_percent);
        debug!("Cleared current track");
        self.publish();
    }

    fn start_load(&mut self, url: &str) {
        self.load_id = self.load_id.next();
        self.device.load(self.load_id, url);
        self.device
            .set_volume(device_volume(self.state.volume_percent));
    }

    /// Starts playback, or defers it until the device signals it can play.
    pub fn play(&mut self) {
        let Some(url) = self
            .state
            .current_track
            .as_ref()
            .map(|track| track.audio_url.clone())
        else {
            debug!("Play ignored, no track selected");
            return;
        };
        self.initialize_device();

        if self.device.ready_state().can_play() {
            self.start_playback();
            return;
        }

        if self.state.phase != PlaybackPhase::Loading {
            // source was dropped by the device (ended or failed), fetch it again
            debug!("Reloading {url}");
            self.start_load(&url);
            self.state.current_time_seconds = 0.0;
            self.state.phase = PlaybackPhase::Loading;
            self.publish();
        }
        debug!("Source not ready yet, playback deferred");
        self.pending_play = Some(self.load_id);
    }

    fn start_playback(&mut self) {
        match self.device.play() {
            Ok(()) => {
                self.state.is_playing = true;
                self.state.phase = PlaybackPhase::Playing;
            }
            Err(error) => {
                error!("Error playing audio: {error}");
                self.state.is_playing = false;
                self.state.phase = PlaybackPhase::Paused;
            }
        }
        self.publish();
    }

    pub fn pause(&mut self) {
        self.pending_play = None;
        if self.device_events.is_none() {
            return;
        }
        self.device.pause();
        if self.state.is_playing {
            self.state.is_playing = false;
            self.state.phase = PlaybackPhase::Paused;
            self.publish();
        }
    }

    pub fn toggle_play_pause(&mut self) {
        if self.state.is_playing || self.pending_play.is_some() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Moves to `time_seconds` and shows the new position right away,
    /// without waiting for the device to confirm it.
    pub fn seek(&mut self, time_seconds: f64) {
        if self.state.current_track.is_none() || !time_seconds.is_finite() {
            return;
        }
        let mut target = time_seconds.max(0.0);
        if self.state.duration_seconds > 0.0 {
            target = target.min(self.state.duration_seconds);
        }
        self.device.seek(target);
        self.state.current_time_seconds = target;
        self.publish();
    }

    /// Seek bar variant of [`seek`](PlaybackController::seek).
    pub fn seek_to_percent(&mut self, percent: f64) {
        if self.state.duration_seconds <= 0.0 || !percent.is_finite() {
            return;
        }
        self.seek(percent.clamp(0.0, 100.0) / 100.0 * self.state.duration_seconds);
    }

    pub fn set_volume(&mut self, percent: u8) {
        let volume_percent = percent.min(100);
        if self.device_events.is_some() {
            self.device.set_volume(device_volume(volume_percent));
        }
        self.state.volume_percent = volume_percent;
        if let Err(error) = self.settings.save(&PersistedSettings { volume_percent }) {
            warn!("Could not persist volume: {error:#}");
        }
        self.publish();
    }

    /// Mutes, or restores the volume that was active before muting.
    pub fn toggle_mute(&mut self) {
        if self.state.volume_percent > 0 {
            self.muted_volume = Some(self.state.volume_percent);
            self.set_volume(0);
        } else {
            let restore = self
                .muted_volume
                .take()
                .filter(|volume| *volume > 0)
                .unwrap_or(DEFAULT_VOLUME);
            self.set_volume(restore);
        }
    }

    /// Applies all device events received so far. Returns how many were
    /// taken from the queue.
    pub fn process_events(&mut self) -> usize {
        let events: Vec<DeviceEvent> = match &self.device_events {
            Some(events) => events.try_iter().collect(),
            None => return 0,
        };
        let count = events.len();
        for event in events {
            self.handle_event(event);
        }
        count
    }

    fn handle_event(&mut self, event: DeviceEvent) {
        if event.load_id() != self.load_id {
            debug!(
                "Ignoring stale device event {:?} (current load {})",
                event, self.load_id.0
            );
            return;
        }

        match event {
            DeviceEvent::LoadedMetadata { duration, .. } => {
                self.state.duration_seconds = duration
                    .filter(|duration| duration.is_finite() && *duration > 0.0)
                    .unwrap_or(0.0);
                if self.state.phase == PlaybackPhase::Loading {
                    self.state.phase = PlaybackPhase::Ready;
                }
            }
            DeviceEvent::CanPlay { load_id } => {
                if self.state.phase == PlaybackPhase::Loading {
                    self.state.phase = PlaybackPhase::Ready;
                }
                if self.pending_play == Some(load_id) {
                    self.pending_play = None;
                    debug!("Source ready, starting deferred playback");
                    self.start_playback();
                    return;
                }
            }
            DeviceEvent::TimeUpdate { position, .. } => {
                if position.is_finite() {
                    self.state.current_time_seconds = position.max(0.0);
                }
            }
            DeviceEvent::Playing { .. } => {
                self.state.is_playing = true;
                self.state.phase = PlaybackPhase::Playing;
            }
            DeviceEvent::Paused { .. } => {
                self.state.is_playing = false;
                if self.state.phase == PlaybackPhase::Playing {
                    self.state.phase = PlaybackPhase::Paused;
                }
            }
            DeviceEvent::Ended { .. } => {
                debug!("Play finished");
                self.pending_play = None;
                self.state.is_playing = false;
                self.state.current_time_seconds = 0.0;
                self.state.phase = PlaybackPhase::Ended;
            }
            DeviceEvent::Error { error, .. } => {
                error!(
                    "Audio error: {} (source: {}, category: {:?})",
                    error.message, error.source_url, error.kind
                );
                self.pending_play = None;
                self.state.is_playing = false;
                self.state.phase = PlaybackPhase::Paused;
            }
        }
        self.publish();
    }

    /// Stops playback and releases the source.
    pub fn shutdown(&mut self) {
        if self.device_events.is_none() {
            return;
        }
        self.clear_track();
        self.device_events = None;
        self.subscribers.clear();
    }

    fn publish(&mut self) {
        let snapshot = &self.state;
        self.subscribers
            .retain(|subscriber| match subscriber.try_send(snapshot.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("Observer lags behind, dropping playback snapshot");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }
}

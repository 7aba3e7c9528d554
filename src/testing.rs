//! In-memory collaborators shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::mpsc::Sender;

use anyhow::anyhow;
use rodio_device::{AudioDevice, DeviceEvent, LoadId, MediaError, ReadyState};

use crate::progress::{Checkpoint, ProgressSink};
use crate::settings::{PersistedSettings, SettingsStore};
use crate::track::Track;

#[derive(Default)]
pub struct FakeDeviceLog {
    pub events: Option<Sender<DeviceEvent>>,
    pub subscribe_calls: usize,
    pub loads: Vec<(LoadId, String)>,
    pub unload_calls: usize,
    pub play_calls: usize,
    pub pause_calls: usize,
    pub seeks: Vec<f64>,
    pub volume: Option<f32>,
    pub ready_state: ReadyState,
    pub play_error: Option<MediaError>,
}

/// Device double. Clones share one log, so a test keeps a clone to emit
/// events and inspect the commands the controller issued.
#[derive(Clone, Default)]
pub struct FakeDevice {
    log: Rc<RefCell<FakeDeviceLog>>,
}

impl FakeDevice {
    pub fn log(&self) -> std::cell::Ref<'_, FakeDeviceLog> {
        self.log.borrow()
    }

    pub fn set_ready_state(&self, ready_state: ReadyState) {
        self.log.borrow_mut().ready_state = ready_state;
    }

    pub fn fail_next_play(&self, error: MediaError) {
        self.log.borrow_mut().play_error = Some(error);
    }

    pub fn last_load(&self) -> LoadId {
        self.log
            .borrow()
            .loads
            .last()
            .map(|(load_id, _)| *load_id)
            .unwrap_or(LoadId::NONE)
    }

    pub fn emit(&self, event: DeviceEvent) {
        let log = self.log.borrow();
        let events = log.events.as_ref().expect("device has no subscriber");
        events.send(event).expect("controller dropped the receiver");
    }

    /// Metadata followed by a can-play signal for the latest load.
    pub fn finish_loading(&self, duration: f64) {
        let load_id = self.last_load();
        self.set_ready_state(ReadyState::HaveEnoughData);
        self.emit(DeviceEvent::LoadedMetadata {
            load_id,
            duration: Some(duration),
        });
        self.emit(DeviceEvent::CanPlay { load_id });
    }

    pub fn tick(&self, position: f64) {
        self.emit(DeviceEvent::TimeUpdate {
            load_id: self.last_load(),
            position,
        });
    }
}

impl AudioDevice for FakeDevice {
    fn subscribe(&mut self, events: Sender<DeviceEvent>) {
        let mut log = self.log.borrow_mut();
        log.subscribe_calls += 1;
        log.events = Some(events);
    }

    fn load(&mut self, load_id: LoadId, url: &str) {
        let mut log = self.log.borrow_mut();
        log.loads.push((load_id, url.to_string()));
        log.ready_state = ReadyState::HaveNothing;
    }

    fn unload(&mut self) {
        let mut log = self.log.borrow_mut();
        log.unload_calls += 1;
        log.ready_state = ReadyState::HaveNothing;
    }

    fn play(&mut self) -> Result<(), MediaError> {
        let mut log = self.log.borrow_mut();
        if let Some(error) = log.play_error.take() {
            return Err(error);
        }
        log.play_calls += 1;
        Ok(())
    }

    fn pause(&mut self) {
        self.log.borrow_mut().pause_calls += 1;
    }

    fn seek(&mut self, position: f64) {
        self.log.borrow_mut().seeks.push(position);
    }

    fn set_volume(&mut self, volume: f32) {
        self.log.borrow_mut().volume = Some(volume);
    }

    fn ready_state(&self) -> ReadyState {
        self.log.borrow().ready_state
    }
}

/// Settings kept in memory; clones share the saved value, which lets a
/// test "restart" the player with the same storage.
#[derive(Clone, Default)]
pub struct MemorySettings {
    saved: Rc<Cell<Option<PersistedSettings>>>,
}

impl MemorySettings {
    pub fn saved(&self) -> Option<PersistedSettings> {
        self.saved.get()
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> anyhow::Result<Option<PersistedSettings>> {
        Ok(self.saved.get())
    }

    fn save(&self, settings: &PersistedSettings) -> anyhow::Result<()> {
        self.saved.set(Some(*settings));
        Ok(())
    }
}

/// Progress sink recording every commit. Can be switched to reject.
#[derive(Clone, Default)]
pub struct RecordingSink {
    commits: Rc<RefCell<Vec<Checkpoint>>>,
    failing: Rc<Cell<bool>>,
}

impl RecordingSink {
    pub fn commits(&self) -> Vec<Checkpoint> {
        self.commits.borrow().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }
}

impl ProgressSink for RecordingSink {
    fn commit(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        self.commits.borrow_mut().push(checkpoint.clone());
        if self.failing.get() {
            return Err(anyhow!("progress service unavailable"));
        }
        Ok(())
    }
}

pub fn track(id: &str, audio_url: &str) -> Track {
    Track {
        id: id.to_string(),
        audio_url: audio_url.to_string(),
        title: format!("Track {id}"),
        speaker_name: "Speaker".to_string(),
        duration_hint: None,
    }
}

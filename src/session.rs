use std::sync::mpsc::Receiver;

use rodio_device::AudioDevice;
use tracing::{debug, info, warn};

use crate::playback::{PlaybackController, PlaybackPhase, PlaybackState};
use crate::progress::{Checkpoint, ProgressReporter, ProgressSink};
use crate::settings::SettingsStore;
use crate::track::Lesson;

/// An end signal this close to the duration counts as the natural end.
const END_SLACK_SECONDS: f64 = 2.0;

/// The lesson player page: feeds playback of the open lesson into the
/// progress reporter.
pub struct LessonSession<D: AudioDevice, S: SettingsStore, P: ProgressSink> {
    controller: PlaybackController<D, S>,
    reporter: ProgressReporter<P>,
    updates: Receiver<PlaybackState>,
    active_lesson: Option<Lesson>,
    last_position: Option<f64>,
    last_phase: PlaybackPhase,
}

impl<D: AudioDevice, S: SettingsStore, P: ProgressSink> LessonSession<D, S, P> {
    pub fn new(mut controller: PlaybackController<D, S>, reporter: ProgressReporter<P>) -> Self {
        let updates = controller.subscribe();
        Self {
            controller,
            reporter,
            updates,
            active_lesson: None,
            last_position: None,
            last_phase: PlaybackPhase::Idle,
        }
    }

    pub fn controller(&self) -> &PlaybackController<D, S> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut PlaybackController<D, S> {
        &mut self.controller
    }

    pub fn reporter(&self) -> &ProgressReporter<P> {
        &self.reporter
    }

    pub fn active_lesson(&self) -> Option<&Lesson> {
        self.active_lesson.as_ref()
    }

    /// Loads the lesson without starting it.
    pub fn open_lesson(&mut self, lesson: &Lesson, speaker_name: &str) {
        info!("Open lesson {} ({})", lesson.id, lesson.title);
        self.reporter.reset_for_lesson(&lesson.id);
        self.active_lesson = Some(lesson.clone());
        self.last_position = None;
        self.last_phase = PlaybackPhase::Idle;
        self.controller
            .set_current_track(Some(lesson.to_track(speaker_name)));
    }

    /// Play button of a lesson: toggles the lesson that is already loaded,
    /// otherwise switches to it and starts playing once it is ready.
    pub fn play_or_toggle(&mut self, lesson: &Lesson, speaker_name: &str) {
        if self.controller.state().is_current(&lesson.id) {
            self.controller.toggle_play_pause();
            return;
        }
        self.open_lesson(lesson, speaker_name);
        self.controller.play();
    }

    /// Release of the seek bar. The new position is committed right away.
    pub fn seek_commit(&mut self, time_seconds: f64) -> Option<Checkpoint> {
        let lesson_id = self.current_lesson_id()?;
        self.controller.seek(time_seconds);
        let state = self.controller.state();
        let position = state.current_time_seconds;
        let duration = state.duration_seconds;
        self.last_position = Some(position);
        Some(self.reporter.on_seek_commit(&lesson_id, position, duration))
    }

    pub fn mark_completed(&mut self) -> Option<Checkpoint> {
        let lesson_id = self.active_lesson.as_ref()?.id.clone();
        let position = self.controller.state().current_time_seconds;
        Some(self.reporter.mark_completed(&lesson_id, position))
    }

    /// Applies pending device events and returns the checkpoints they
    /// caused, oldest first.
    pub fn tick(&mut self) -> Vec<Checkpoint> {
        self.controller.process_events();
        let snapshots: Vec<PlaybackState> = self.updates.try_iter().collect();

        let mut checkpoints = Vec::new();
        for snapshot in snapshots {
            if let Some(checkpoint) = self.observe(&snapshot) {
                checkpoints.push(checkpoint);
            }
            self.last_phase = snapshot.phase;
        }
        checkpoints
    }

    fn observe(&mut self, snapshot: &PlaybackState) -> Option<Checkpoint> {
        let lesson_id = self.active_lesson.as_ref()?.id.clone();
        if !snapshot.is_current(&lesson_id) {
            return None;
        }

        if snapshot.phase == PlaybackPhase::Ended {
            if self.last_phase == PlaybackPhase::Ended {
                return None;
            }
            // the ended snapshot already shows position 0
            let last_position = self.last_position.take();
            let duration = snapshot.duration_seconds;
            if let Some(heard) = last_position
                && !self.reached_end(heard, duration)
            {
                warn!(
                    "Lesson {lesson_id} ended at {heard:.1}s of {duration:.1}s, not completing it"
                );
                return Some(self.reporter.on_playback_stopped(&lesson_id, heard, duration));
            }
            debug!("Lesson {lesson_id} played to the end");
            let final_duration = duration.max(last_position.unwrap_or(0.0));
            return Some(self.reporter.on_lesson_ended(&lesson_id, final_duration));
        }

        if snapshot.phase != PlaybackPhase::Playing
            || self.last_position == Some(snapshot.current_time_seconds)
        {
            return None;
        }
        self.last_position = Some(snapshot.current_time_seconds);
        self.reporter.on_time_advance(
            &lesson_id,
            snapshot.current_time_seconds,
            snapshot.duration_seconds,
        )
    }

    /// Whether an end signal after `heard` seconds is the natural end of
    /// the track. Position updates arrive a few times per second only.
    fn reached_end(&self, heard: f64, duration: f64) -> bool {
        duration <= 0.0
            || duration - heard <= END_SLACK_SECONDS
            || self.reporter.policy().is_complete(heard, duration)
    }

    fn current_lesson_id(&self) -> Option<String> {
        let lesson = self.active_lesson.as_ref()?;
        self.controller
            .state()
            .is_current(&lesson.id)
            .then(|| lesson.id.clone())
    }
}

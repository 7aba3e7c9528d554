use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One progress report for a lesson.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub lesson_id: String,
    pub listened_seconds: u32,
    pub is_completed: bool,
}

impl Checkpoint {
    fn at(lesson_id: &str, position: f64, is_completed: bool) -> Self {
        let listened = if position.is_finite() {
            position.max(0.0).round()
        } else {
            0.0
        };
        Self {
            lesson_id: lesson_id.to_string(),
            listened_seconds: listened.min(f64::from(u32::MAX)) as u32,
            is_completed,
        }
    }
}

/// Receives checkpoints. Implementations persist them; a failure is
/// logged by the reporter and never retried.
pub trait ProgressSink {
    fn commit(&self, checkpoint: &Checkpoint) -> anyhow::Result<()>;
}

impl<P: ProgressSink + ?Sized> ProgressSink for std::sync::Arc<P> {
    fn commit(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        (**self).commit(checkpoint)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CheckpointPolicy {
    /// Minimum playback distance between two periodic checkpoints.
    pub interval_seconds: f64,
    /// A lesson counts as completed above this share of its duration.
    pub completion_threshold: f64,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            interval_seconds: 60.0,
            completion_threshold: 0.95,
        }
    }
}

impl CheckpointPolicy {
    pub fn completion_ratio(position: f64, duration: f64) -> f64 {
        if duration.is_finite() && duration > 0.0 && position.is_finite() {
            position.max(0.0) / duration
        } else {
            0.0
        }
    }

    pub fn is_complete(&self, position: f64, duration: f64) -> bool {
        Self::completion_ratio(position, duration) > self.completion_threshold
    }
}

/// Turns playback time of the active lesson into rate-limited checkpoints.
///
/// Every operation returns the checkpoint it committed, if any.
pub struct ProgressReporter<P: ProgressSink> {
    sink: P,
    policy: CheckpointPolicy,
    active_lesson: Option<String>,
    /// Playback position of the last checkpoint of the active lesson.
    last_checkpoint_at: Option<f64>,
}

impl<P: ProgressSink> ProgressReporter<P> {
    pub fn new(sink: P) -> Self {
        Self::with_policy(sink, CheckpointPolicy::default())
    }

    pub fn with_policy(sink: P, policy: CheckpointPolicy) -> Self {
        Self {
            sink,
            policy,
            active_lesson: None,
            last_checkpoint_at: None,
        }
    }

    pub fn policy(&self) -> &CheckpointPolicy {
        &self.policy
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub fn active_lesson(&self) -> Option<&str> {
        self.active_lesson.as_deref()
    }

    /// Makes `lesson_id` the active lesson. Its next tick commits at once.
    pub fn reset_for_lesson(&mut self, lesson_id: &str) {
        debug!("Tracking progress of lesson {lesson_id}");
        self.active_lesson = Some(lesson_id.to_string());
        self.last_checkpoint_at = None;
    }

    fn activate(&mut self, lesson_id: &str) {
        if self.active_lesson.as_deref() != Some(lesson_id) {
            self.reset_for_lesson(lesson_id);
        }
    }

    /// Called for every time update of the device. Commits on the first
    /// tick of a lesson and then whenever the position moved at least one
    /// interval away from the last checkpoint.
    pub fn on_time_advance(
        &mut self,
        lesson_id: &str,
        current_time_seconds: f64,
        duration_seconds: f64,
    ) -> Option<Checkpoint> {
        self.activate(lesson_id);
        if !current_time_seconds.is_finite()
            || !duration_seconds.is_finite()
            || duration_seconds <= 0.0
        {
            return None;
        }

        let due = match self.last_checkpoint_at {
            None => true,
            Some(last) => (current_time_seconds - last).abs() >= self.policy.interval_seconds,
        };
        if !due {
            return None;
        }

        let is_completed = self
            .policy
            .is_complete(current_time_seconds, duration_seconds);
        let checkpoint = Checkpoint::at(lesson_id, current_time_seconds, is_completed);
        Some(self.commit(checkpoint, current_time_seconds))
    }

    /// A finished seek drag. Always commits.
    pub fn on_seek_commit(
        &mut self,
        lesson_id: &str,
        new_time_seconds: f64,
        duration_seconds: f64,
    ) -> Checkpoint {
        self.commit_position(lesson_id, new_time_seconds, duration_seconds)
    }

    /// Playback stopped before the end, e.g. the source broke off. Commits
    /// the position reached; completion follows the usual ratio.
    pub fn on_playback_stopped(
        &mut self,
        lesson_id: &str,
        position_seconds: f64,
        duration_seconds: f64,
    ) -> Checkpoint {
        self.commit_position(lesson_id, position_seconds, duration_seconds)
    }

    fn commit_position(&mut self, lesson_id: &str, position: f64, duration: f64) -> Checkpoint {
        self.activate(lesson_id);
        let is_completed = self.policy.is_complete(position, duration);
        let checkpoint = Checkpoint::at(lesson_id, position, is_completed);
        self.commit(checkpoint, position)
    }

    /// Natural end of the track. Always completes the lesson.
    pub fn on_lesson_ended(&mut self, lesson_id: &str, final_duration_seconds: f64) -> Checkpoint {
        self.activate(lesson_id);
        let checkpoint = Checkpoint::at(lesson_id, final_duration_seconds, true);
        self.commit(checkpoint, final_duration_seconds)
    }

    /// Explicit "mark as complete" from the lesson page.
    pub fn mark_completed(&mut self, lesson_id: &str, position_seconds: f64) -> Checkpoint {
        self.activate(lesson_id);
        let checkpoint = Checkpoint::at(lesson_id, position_seconds, true);
        self.commit(checkpoint, position_seconds)
    }

    fn commit(&mut self, checkpoint: Checkpoint, position: f64) -> Checkpoint {
        match self.sink.commit(&checkpoint) {
            Ok(()) => debug!(
                "Committed progress of lesson {}: {}s, completed={}",
                checkpoint.lesson_id, checkpoint.listened_seconds, checkpoint.is_completed
            ),
            Err(error) => warn!(
                "Dropping progress checkpoint of lesson {}: {error:#}",
                checkpoint.lesson_id
            ),
        }
        // a failed commit is healed by the next periodic checkpoint
        self.last_checkpoint_at = Some(if position.is_finite() { position } else { 0.0 });
        checkpoint
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::testing::RecordingSink;

    fn reporter() -> (ProgressReporter<RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        (ProgressReporter::new(sink.clone()), sink)
    }

    #[test]
    fn test_completion_boundary() {
        let policy = CheckpointPolicy::default();
        assert!(policy.is_complete(96.0, 100.0));
        assert!(!policy.is_complete(94.0, 100.0));
        assert!(!policy.is_complete(95.0, 100.0));
        assert!(policy.is_complete(95.01, 100.0));
    }

    #[test]
    fn test_first_tick_commits_then_rate_limits() {
        let (mut reporter, sink) = reporter();
        reporter.reset_for_lesson("l1");

        let first = reporter.on_time_advance("l1", 5.0, 600.0);
        assert_eq!(
            first,
            Some(Checkpoint {
                lesson_id: "l1".to_string(),
                listened_seconds: 5,
                is_completed: false,
            })
        );
        assert_eq!(reporter.on_time_advance("l1", 15.0, 600.0), None);
        assert_eq!(reporter.on_time_advance("l1", 64.9, 600.0), None);

        let later = reporter.on_time_advance("l1", 66.0, 600.0);
        assert_eq!(later.map(|c| c.listened_seconds), Some(66));
        assert_eq!(sink.commits().len(), 2);
    }

    #[test]
    fn test_tick_near_end_reports_completion() {
        let (mut reporter, _sink) = reporter();
        let checkpoint = reporter.on_time_advance("l1", 96.0, 100.0);
        assert_eq!(checkpoint.map(|c| c.is_completed), Some(true));
    }

    #[test]
    fn test_unknown_duration_defers_first_checkpoint() {
        let (mut reporter, sink) = reporter();
        assert_eq!(reporter.on_time_advance("l1", 0.0, 0.0), None);
        assert_eq!(reporter.on_time_advance("l1", 1.0, f64::NAN), None);
        assert!(reporter.on_time_advance("l1", 2.0, 300.0).is_some());
        assert_eq!(sink.commits().len(), 1);
    }

    #[test]
    fn test_seek_commit_bypasses_rate_limit() {
        let (mut reporter, sink) = reporter();
        reporter.on_time_advance("l1", 10.0, 600.0);
        let checkpoint = reporter.on_seek_commit("l1", 20.4, 600.0);
        assert_eq!(checkpoint.listened_seconds, 20);
        assert_eq!(sink.commits().len(), 2);

        // the seek moved the baseline
        assert_eq!(reporter.on_time_advance("l1", 75.0, 600.0), None);
        assert!(reporter.on_time_advance("l1", 81.0, 600.0).is_some());
    }

    #[test]
    fn test_backward_seek_reports_actual_position() {
        let (mut reporter, _sink) = reporter();
        reporter.on_time_advance("l1", 300.0, 600.0);
        let checkpoint = reporter.on_seek_commit("l1", 12.0, 600.0);
        assert_eq!(checkpoint.listened_seconds, 12);
    }

    #[test]
    fn test_stopped_playback_keeps_position() {
        let (mut reporter, sink) = reporter();
        reporter.on_time_advance("l1", 0.0, 600.0);
        let checkpoint = reporter.on_playback_stopped("l1", 12.0, 600.0);
        assert_eq!(checkpoint.listened_seconds, 12);
        assert!(!checkpoint.is_completed);
        assert_eq!(sink.commits().len(), 2);
    }

    #[test]
    fn test_lesson_end_always_completes() {
        let (mut reporter, _sink) = reporter();
        let checkpoint = reporter.on_lesson_ended("l1", 99.2);
        assert!(checkpoint.is_completed);
        assert_eq!(checkpoint.listened_seconds, 99);
    }

    #[test]
    fn test_reset_for_new_lesson_commits_immediately() {
        let (mut reporter, sink) = reporter();
        reporter.on_time_advance("l1", 30.0, 600.0);
        reporter.reset_for_lesson("l2");
        assert_eq!(reporter.active_lesson(), Some("l2"));
        assert!(reporter.on_time_advance("l2", 31.0, 600.0).is_some());

        // switching back implicitly also starts a new baseline
        assert!(reporter.on_time_advance("l1", 32.0, 600.0).is_some());
        assert_eq!(sink.commits().len(), 3);
    }

    #[test]
    fn test_failed_commit_is_not_retried() {
        let (mut reporter, sink) = reporter();
        sink.set_failing(true);
        assert!(reporter.on_time_advance("l1", 1.0, 600.0).is_some());
        assert_eq!(reporter.on_time_advance("l1", 2.0, 600.0), None);

        sink.set_failing(false);
        assert!(reporter.on_time_advance("l1", 61.0, 600.0).is_some());
        assert_eq!(sink.commits().len(), 2);
    }

    #[test]
    fn test_custom_interval() {
        let sink = RecordingSink::default();
        let mut reporter = ProgressReporter::with_policy(
            sink.clone(),
            CheckpointPolicy {
                interval_seconds: 10.0,
                completion_threshold: 0.9,
            },
        );
        reporter.on_time_advance("l1", 0.5, 100.0);
        let checkpoint = reporter.on_time_advance("l1", 91.0, 100.0);
        assert_eq!(checkpoint.map(|c| c.is_completed), Some(true));
    }
}

//! Lesson progress: checkpoint policy and course aggregates.

mod course;
mod reporter;

pub use course::{CourseProgress, LessonProgress, lesson_percent};
pub use reporter::{Checkpoint, CheckpointPolicy, ProgressReporter, ProgressSink};

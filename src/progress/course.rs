use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::track::Lesson;

/// Stored progress of one lesson for the signed-in user.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub lesson_id: String,
    pub listened_seconds: u32,
    pub is_completed: bool,
}

impl LessonProgress {
    /// Share of the lesson heard so far; completed lessons count as 100.
    pub fn percent(&self, duration_seconds: f64) -> u8 {
        if self.is_completed {
            return 100;
        }
        lesson_percent(self.listened_seconds, duration_seconds)
    }
}

pub fn lesson_percent(listened_seconds: u32, duration_seconds: f64) -> u8 {
    if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
        return 0;
    }
    (f64::from(listened_seconds) / duration_seconds * 100.0)
        .round()
        .clamp(0.0, 100.0) as u8
}

/// Completed lessons of a course, recomputed from the lesson records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CourseProgress {
    pub completed_lessons: usize,
    pub total_lessons: usize,
}

impl CourseProgress {
    pub fn from_records(lessons: &[Lesson], records: &HashMap<String, LessonProgress>) -> Self {
        let completed_lessons = lessons
            .iter()
            .filter(|lesson| {
                records
                    .get(&lesson.id)
                    .is_some_and(|progress| progress.is_completed)
            })
            .count();
        Self {
            completed_lessons,
            total_lessons: lessons.len(),
        }
    }

    pub fn percent(&self) -> u8 {
        if self.total_lessons == 0 {
            return 0;
        }
        (self.completed_lessons as f64 / self.total_lessons as f64 * 100.0).round() as u8
    }
}

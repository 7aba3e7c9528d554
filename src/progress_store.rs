use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Result, params};
use tracing::debug;

use crate::progress::{Checkpoint, CourseProgress, LessonProgress, ProgressSink};
use crate::track::Lesson;

/// Lesson progress of one user in a local SQLite database.
pub struct ProgressStore {
    db_connection: Mutex<Connection>,
    user_id: String,
}

impl ProgressStore {
    pub fn new(db_connection: Connection, user_id: &str) -> Self {
        Self {
            db_connection: Mutex::new(db_connection),
            user_id: user_id.to_string(),
        }
    }

    pub fn init(&self) -> Result<()> {
        let db_connection = self.connection();
        db_connection.execute(
            "CREATE TABLE IF NOT EXISTS lesson_progress (
                    user_id          TEXT NOT NULL,
                    lesson_id        TEXT NOT NULL,
                    listened_seconds INTEGER NOT NULL,
                    is_completed     INTEGER NOT NULL DEFAULT 0,
                    updated_at       INTEGER NOT NULL,
                    PRIMARY KEY (user_id, lesson_id)
                )",
            (),
        )?;
        Ok(())
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db_connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a checkpoint. A lesson once completed stays completed.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let updated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();
        debug!(
            "Save progress {} for user {}: {}s, completed={}",
            checkpoint.lesson_id,
            self.user_id,
            checkpoint.listened_seconds,
            checkpoint.is_completed
        );
        self.connection().execute(
            "INSERT INTO lesson_progress (user_id, lesson_id, listened_seconds, is_completed, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                listened_seconds = excluded.listened_seconds,
                is_completed = MAX(lesson_progress.is_completed, excluded.is_completed),
                updated_at = excluded.updated_at",
            params![
                &self.user_id,
                &checkpoint.lesson_id,
                checkpoint.listened_seconds,
                checkpoint.is_completed,
                updated_at
            ],
        )?;
        Ok(())
    }

    pub fn lesson_progress(&self, lesson_id: &str) -> Result<Option<LessonProgress>> {
        let db_connection = self.connection();
        let mut stmt = db_connection.prepare(
            "SELECT lesson_id, listened_seconds, is_completed FROM lesson_progress WHERE user_id=(?1) AND lesson_id=(?2)",
        )?;
        stmt.query_row(params![&self.user_id, lesson_id], |row| {
            Ok(LessonProgress {
                lesson_id: row.get(0)?,
                listened_seconds: row.get(1)?,
                is_completed: row.get(2)?,
            })
        })
        .optional()
    }

    pub fn progress_for(&self, lessons: &[Lesson]) -> Result<HashMap<String, LessonProgress>> {
        let mut records = HashMap::new();
        for lesson in lessons {
            if let Some(progress) = self.lesson_progress(&lesson.id)? {
                records.insert(lesson.id.clone(), progress);
            }
        }
        Ok(records)
    }

    pub fn course_progress(&self, lessons: &[Lesson]) -> Result<CourseProgress> {
        let records = self.progress_for(lessons)?;
        Ok(CourseProgress::from_records(lessons, &records))
    }
}

impl ProgressSink for ProgressStore {
    fn commit(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        self.save_checkpoint(checkpoint)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn store(user_id: &str) -> ProgressStore {
        let store = ProgressStore::new(Connection::open_in_memory().unwrap(), user_id);
        store.init().unwrap();
        store
    }

    fn checkpoint(lesson_id: &str, listened_seconds: u32, is_completed: bool) -> Checkpoint {
        Checkpoint {
            lesson_id: lesson_id.to_string(),
            listened_seconds,
            is_completed,
        }
    }

    fn lesson(id: &str, order: u32) -> Lesson {
        Lesson {
            id: id.to_string(),
            course_id: "c1".to_string(),
            title: id.to_string(),
            content_url: format!("https://cdn.example.org/{id}.mp3"),
            order,
            duration_hint: None,
        }
    }

    #[test]
    fn test_unknown_lesson_has_no_progress() -> Result<()> {
        let store = store("u1");
        assert_eq!(store.lesson_progress("l1")?, None);
        Ok(())
    }

    #[test]
    fn test_checkpoint_overwrites_position() -> Result<()> {
        let store = store("u1");
        store.save_checkpoint(&checkpoint("l1", 60, false))?;
        store.save_checkpoint(&checkpoint("l1", 12, false))?;
        assert_eq!(
            store.lesson_progress("l1")?,
            Some(LessonProgress {
                lesson_id: "l1".to_string(),
                listened_seconds: 12,
                is_completed: false,
            })
        );
        Ok(())
    }

    #[test]
    fn test_completion_never_regresses() -> Result<()> {
        let store = store("u1");
        store.save_checkpoint(&checkpoint("l1", 600, true))?;
        store.save_checkpoint(&checkpoint("l1", 0, false))?;
        let progress = store.lesson_progress("l1")?.unwrap();
        assert!(progress.is_completed);
        assert_eq!(progress.listened_seconds, 0);
        Ok(())
    }

    #[test]
    fn test_progress_is_per_user() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.db3");
        let first = ProgressStore::new(Connection::open(&path)?, "u1");
        first.init()?;
        first.save_checkpoint(&checkpoint("l1", 30, false))?;

        let second = ProgressStore::new(Connection::open(&path)?, "u2");
        second.init()?;
        assert_eq!(second.lesson_progress("l1")?, None);
        assert!(first.lesson_progress("l1")?.is_some());
        Ok(())
    }

    #[test]
    fn test_course_progress() -> Result<()> {
        let store = store("u1");
        let lessons = vec![lesson("l1", 1), lesson("l2", 2), lesson("l3", 3), lesson("l4", 4)];
        store.save_checkpoint(&checkpoint("l1", 600, true))?;
        store.save_checkpoint(&checkpoint("l2", 20, false))?;
        store.save_checkpoint(&checkpoint("l4", 900, true))?;

        let progress = store.course_progress(&lessons)?;
        assert_eq!(progress.completed_lessons, 2);
        assert_eq!(progress.percent(), 50);
        Ok(())
    }

    #[test]
    fn test_commit_through_sink() {
        let store = store("u1");
        store.commit(&checkpoint("l1", 5, false)).unwrap();
        assert!(store.lesson_progress("l1").unwrap().is_some());
    }
}

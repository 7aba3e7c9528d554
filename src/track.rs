use serde::{Deserialize, Serialize};

/// A playable audio unit: a lecture, a recitation or a course lesson.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub audio_url: String,
    pub title: String,
    #[serde(default)]
    pub speaker_name: String,
    /// Length announced by the data layer, in seconds. The device reports
    /// the real duration once the source is loaded.
    #[serde(default)]
    pub duration_hint: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    #[error("audio URL is missing or empty for track {0}")]
    MissingAudioUrl(String),
}

impl Track {
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.audio_url.trim().is_empty() {
            return Err(TrackError::MissingAudioUrl(self.id.clone()));
        }
        Ok(())
    }
}

/// A lesson of a course as delivered by the course API.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub course_id: String,
    #[serde(alias = "lessonTitle")]
    pub title: String,
    pub content_url: String,
    #[serde(alias = "orderIndex")]
    pub order: u32,
    #[serde(default)]
    pub duration_hint: Option<f64>,
}

impl Lesson {
    /// The track played for this lesson. Track and lesson share the id.
    pub fn to_track(&self, speaker_name: &str) -> Track {
        Track {
            id: self.id.clone(),
            audio_url: self.content_url.clone(),
            title: self.title.clone(),
            speaker_name: speaker_name.to_string(),
            duration_hint: self.duration_hint,
        }
    }
}

pub fn sort_lessons(lessons: &mut [Lesson]) {
    lessons.sort_by_key(|lesson| lesson.order);
}

/// Previous and next lesson around `lesson_id` in an already sorted list.
pub fn adjacent_lessons<'a>(
    lessons: &'a [Lesson],
    lesson_id: &str,
) -> (Option<&'a Lesson>, Option<&'a Lesson>) {
    let Some(index) = lessons.iter().position(|lesson| lesson.id == lesson_id) else {
        return (None, None);
    };
    let previous = index.checked_sub(1).and_then(|i| lessons.get(i));
    (previous, lessons.get(index + 1))
}

/// Parses the duration strings of the content API into seconds.
///
/// Accepts clock notation (`"45:32"`, `"1:02:15"`), a number with a unit
/// (`"30 min"`, `"6 hours"`, `"90s"`) and plain seconds. Placeholders like
/// `"--:--"` yield `None`.
pub fn parse_duration_hint(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if text.contains(':') {
        let parts = text
            .split(':')
            .map(|part| part.trim().parse::<u64>().ok())
            .collect::<Option<Vec<u64>>>()?;
        let total = match parts.as_slice() {
            [minutes, seconds] if *seconds < 60 => minutes.checked_mul(60)?.checked_add(*seconds),
            [hours, minutes, seconds] if *minutes < 60 && *seconds < 60 => hours
                .checked_mul(3600)?
                .checked_add(minutes * 60 + seconds),
            _ => None,
        };
        return total.map(|seconds| seconds as f64);
    }

    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    let factor = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600.0,
        _ => return None,
    };
    Some(value * factor)
}

/// Formats a position as `m:ss`, or `h:mm:ss` from one hour on.
pub fn format_clock(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

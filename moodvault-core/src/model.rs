/*!
Record types carried by a snapshot.

Field names serialize in camelCase; that layout is the snapshot wire format
and must stay stable across releases.
*/

use crate::{Result, VaultError};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Schema version written by this release
pub const SCHEMA_VERSION: u32 = 2;

/// Schema versions `decode` accepts. Version 1 predates correlation entries
/// and saved analyses; those collections simply default to empty.
pub const SUPPORTED_SCHEMA_VERSIONS: std::ops::RangeInclusive<u32> = 1..=SCHEMA_VERSION;

/// Lowest and highest accepted mood rating
pub const RATING_MIN: u8 = 1;
pub const RATING_MAX: u8 = 10;

/// One of the three fixed daily windows a mood is logged in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Morning,
    Midday,
    Evening,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Morning => "morning",
            Segment::Midday => "midday",
            Segment::Evening => "evening",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "morning" => Ok(Segment::Morning),
            "midday" => Ok(Segment::Midday),
            "evening" => Ok(Segment::Evening),
            other => Err(VaultError::validation(format!("unknown segment '{other}'"))),
        }
    }
}

/// A single logged mood, identified by (date, segment)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoodEntryRecord {
    pub date: NaiveDate,
    pub segment: Segment,
    /// `None` marks a placeholder slot the user opened but never rated
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub note: String,
    /// Original creation time; preserved through export and import
    pub logged_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl MoodEntryRecord {
    pub fn new(
        date: NaiveDate,
        segment: Segment,
        rating: Option<u8>,
        note: impl Into<String>,
        logged_at: DateTime<Utc>,
    ) -> Self {
        Self {
            date,
            segment,
            rating,
            note: note.into(),
            logged_at,
            last_modified: logged_at,
        }
    }

    /// Record an edit made at `at`
    pub fn edited(mut self, rating: Option<u8>, note: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.rating = rating;
        self.note = note.into();
        self.last_modified = at.max(self.logged_at);
        self
    }

    pub fn key(&self) -> (NaiveDate, Segment) {
        (self.date, self.segment)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(rating) = self.rating {
            if !(RATING_MIN..=RATING_MAX).contains(&rating) {
                return Err(VaultError::validation(format!(
                    "rating {rating} for {} {} is outside {RATING_MIN}..={RATING_MAX}",
                    self.date, self.segment
                )));
            }
        }
        if self.logged_at > self.last_modified {
            return Err(VaultError::validation(format!(
                "mood entry {} {} was modified before it was logged",
                self.date, self.segment
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GoalType {
    /// Log at least once a day for `target_days` days in a row
    LoggingStreak,
    /// Keep the average rating at or above `target_value`
    AverageRating,
    /// Log every segment of the day for `target_days` days
    FullDays,
    /// Log `target_value` entries in total
    EntryCount,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoalRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub goal_type: GoalType,
    #[serde(default)]
    pub target_value: f64,
    #[serde(default)]
    pub target_days: u32,
    pub created_date: NaiveDate,
    #[serde(default)]
    pub completed_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WeatherData {
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub temperature_c: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SleepData {
    #[serde(default)]
    pub hours: f64,
    #[serde(default)]
    pub quality: Option<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseData {
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StressData {
    #[serde(default)]
    pub level: u8,
}

/// Context recorded alongside a day's moods, unique by date
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationRecord {
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<SleepData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercise: Option<ExerciseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress: Option<StressData>,
}

impl CorrelationRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            weather: None,
            sleep: None,
            exercise: None,
            stress: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub morning_reminder: Option<NaiveTime>,
    pub midday_reminder: Option<NaiveTime>,
    pub evening_reminder: Option<NaiveTime>,
}

/// User-facing preferences. Unknown keys written by newer releases are kept
/// in `extra` so a round trip through an older build does not drop them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub theme: Option<String>,
    pub week_starts_on_monday: bool,
    pub insights_enabled: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedAnalysis {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// A point-in-time export of every locally tracked record
///
/// Snapshots are values: the builder creates a fresh one per export and
/// `decode` creates a fresh one per restore.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub mood_entries: Vec<MoodEntryRecord>,
    #[serde(default)]
    pub goals: Vec<GoalRecord>,
    #[serde(default)]
    pub correlation_entries: Vec<CorrelationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_settings: Option<NotificationSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_preferences: Option<UserPreferences>,
    #[serde(default)]
    pub saved_analyses: Vec<SavedAnalysis>,
}

impl Snapshot {
    /// An empty snapshot at the current schema version
    pub fn empty(created_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            created_at,
            mood_entries: Vec::new(),
            goals: Vec::new(),
            correlation_entries: Vec::new(),
            notification_settings: None,
            user_preferences: None,
            saved_analyses: Vec::new(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.mood_entries.len()
            + self.goals.len()
            + self.correlation_entries.len()
            + self.saved_analyses.len()
    }

    /// Drop duplicate keys, keeping the first occurrence of each.
    ///
    /// Returns how many records were removed.
    pub fn dedup(&mut self) -> usize {
        let before = self.record_count();

        let mut moods = HashSet::new();
        self.mood_entries.retain(|entry| moods.insert(entry.key()));

        let mut goals = HashSet::new();
        self.goals.retain(|goal| goals.insert(goal.id.clone()));

        let mut days = HashSet::new();
        self.correlation_entries
            .retain(|record| days.insert(record.date));

        let mut analyses = HashSet::new();
        self.saved_analyses
            .retain(|analysis| analyses.insert(analysis.id.clone()));

        before - self.record_count()
    }
}

/*!
Snapshot builder.

Reads the Local Store and assembles a [`Snapshot`]. Building is read-only
with respect to the store, and two builds over the same store differ only in
`created_at`.
*/

use crate::clock::Clock;
use crate::model::{
    CorrelationRecord, GoalRecord, MoodEntryRecord, NotificationSettings, SavedAnalysis, Snapshot,
    UserPreferences,
};
use crate::store::{keys, LocalStore, StoreExt};
use crate::{Result, VaultError};
use chrono::{Duration, NaiveDate};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use tracing::{debug, warn};

/// How far back `export_all` looks for dated records
pub const DEFAULT_HISTORY_WINDOW_DAYS: u32 = 3650;

/// Record categories a partial export can be restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportCategory {
    Moods,
    Goals,
    Correlations,
    Settings,
    Analyses,
}

impl ExportCategory {
    pub const ALL: [ExportCategory; 5] = [
        ExportCategory::Moods,
        ExportCategory::Goals,
        ExportCategory::Correlations,
        ExportCategory::Settings,
        ExportCategory::Analyses,
    ];
}

impl std::str::FromStr for ExportCategory {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "moods" | "mood" => Ok(Self::Moods),
            "goals" | "goal" => Ok(Self::Goals),
            "correlations" | "correlation" => Ok(Self::Correlations),
            "settings" => Ok(Self::Settings),
            "analyses" | "analysis" => Ok(Self::Analyses),
            other => Err(VaultError::validation(format!(
                "unknown export category '{other}'"
            ))),
        }
    }
}

/// Inclusive calendar-day range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(VaultError::validation(format!(
                "date range starts ({start}) after it ends ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

/// Selection for a partial export
///
/// The date range applies to dated records (moods, correlation entries and
/// saved analyses); goals and settings are not dated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFilter {
    categories: HashSet<ExportCategory>,
    date_range: Option<DateRange>,
}

impl ExportFilter {
    pub fn all() -> Self {
        Self {
            categories: ExportCategory::ALL.into_iter().collect(),
            date_range: None,
        }
    }

    pub fn only<I: IntoIterator<Item = ExportCategory>>(categories: I) -> Self {
        Self {
            categories: categories.into_iter().collect(),
            date_range: None,
        }
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn includes(&self, category: ExportCategory) -> bool {
        self.categories.contains(&category)
    }

    fn in_range(&self, date: NaiveDate) -> bool {
        self.date_range.map_or(true, |range| range.contains(date))
    }
}

impl Default for ExportFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Assembles snapshots from the Local Store
pub struct SnapshotBuilder<'a> {
    store: &'a dyn LocalStore,
    clock: &'a dyn Clock,
    history_window_days: u32,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(store: &'a dyn LocalStore, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            clock,
            history_window_days: DEFAULT_HISTORY_WINDOW_DAYS,
        }
    }

    pub fn with_history_window(mut self, days: u32) -> Self {
        self.history_window_days = days;
        self
    }

    /// Full snapshot of the supported history window and every goal
    pub fn export_all(&self) -> Result<Snapshot> {
        self.export_selected(&ExportFilter::all())
    }

    /// Snapshot restricted to the filter's categories and date range.
    ///
    /// Used for user-facing partial exports; these never feed the restore path.
    pub fn export_selected(&self, filter: &ExportFilter) -> Result<Snapshot> {
        let now = self.clock.now();
        // Windows reaching past the calendar start cover everything
        let oldest = now
            .date_naive()
            .checked_sub_signed(Duration::days(i64::from(self.history_window_days)))
            .unwrap_or(NaiveDate::MIN);
        let in_window = |date: NaiveDate| date >= oldest && filter.in_range(date);

        let mut snapshot = Snapshot::empty(now);

        let mut store_keys = self.store.keys()?;
        store_keys.sort();

        for key in &store_keys {
            if let Some((date, _)) = keys::parse_mood(key) {
                if filter.includes(ExportCategory::Moods) && in_window(date) {
                    if let Some(entry) = self.read_lenient::<MoodEntryRecord>(key)? {
                        snapshot.mood_entries.push(entry);
                    }
                }
            } else if let Some(date) = keys::parse_correlation(key) {
                if filter.includes(ExportCategory::Correlations) && in_window(date) {
                    if let Some(record) = self.read_lenient::<CorrelationRecord>(key)? {
                        snapshot.correlation_entries.push(record);
                    }
                }
            }
        }

        if filter.includes(ExportCategory::Goals) {
            snapshot.goals = self
                .read_lenient::<Vec<GoalRecord>>(keys::GOALS)?
                .unwrap_or_default();
        }

        if filter.includes(ExportCategory::Settings) {
            snapshot.notification_settings =
                self.read_lenient::<NotificationSettings>(keys::NOTIFICATION_SETTINGS)?;
            snapshot.user_preferences =
                self.read_lenient::<UserPreferences>(keys::USER_PREFERENCES)?;
        }

        if filter.includes(ExportCategory::Analyses) {
            snapshot.saved_analyses = self
                .read_lenient::<Vec<SavedAnalysis>>(keys::SAVED_ANALYSES)?
                .unwrap_or_default()
                .into_iter()
                .filter(|analysis| filter.in_range(analysis.created_at.date_naive()))
                .collect();
        }

        snapshot
            .mood_entries
            .sort_by_key(|entry| (entry.date, entry.segment));
        snapshot.correlation_entries.sort_by_key(|record| record.date);
        snapshot.dedup();

        debug!(
            moods = snapshot.mood_entries.len(),
            goals = snapshot.goals.len(),
            correlations = snapshot.correlation_entries.len(),
            analyses = snapshot.saved_analyses.len(),
            from = ?filter.date_range.map(|range| range.start()),
            to = ?filter.date_range.map(|range| range.end()),
            "Built snapshot"
        );

        Ok(snapshot)
    }

    /// Read a typed value, treating an unparsable stored value as absent.
    /// Store failures still propagate.
    fn read_lenient<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get_json::<T>(key) {
            Ok(value) => Ok(value),
            Err(VaultError::Json(e)) => {
                warn!(key = %key, error = %e, "Skipping unreadable record during export");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/*!
Merge importer.

Applies a decoded snapshot onto the Local Store. Moods, goals and saved
analyses merge additively (local records win); correlation entries and the
settings blocks are overwritten by the snapshot.

Existing backups rely on both policies; do not unify them here.
*/

use crate::model::{GoalRecord, MoodEntryRecord, SavedAnalysis, Snapshot};
use crate::outcome::ImportReport;
use crate::store::{keys, LocalStore, StoreExt};
use crate::{Result, VaultError};
use std::collections::HashSet;
use tracing::{info, warn};

pub struct MergeImporter<'a> {
    store: &'a dyn LocalStore,
}

impl<'a> MergeImporter<'a> {
    pub fn new(store: &'a dyn LocalStore) -> Self {
        Self { store }
    }

    /// Import every category, stopping at the first category that fails.
    ///
    /// Writes are applied entry by entry and never rolled back; a failure is
    /// reported through [`ImportReport::error`].
    pub fn import(&self, snapshot: &Snapshot) -> ImportReport {
        let mut report = ImportReport::default();

        let steps: [(&str, fn(&Self, &Snapshot, &mut ImportReport) -> Result<()>); 5] = [
            ("moods", Self::import_moods),
            ("goals", Self::import_goals),
            ("correlation entries", Self::import_correlations),
            ("settings", Self::import_settings),
            ("saved analyses", Self::import_analyses),
        ];

        for (category, step) in steps {
            if let Err(e) = step(self, snapshot, &mut report) {
                let error = VaultError::partial_import(category, e.to_string());
                warn!(category = %category, error = %e, "Import stopped early");
                report.error = Some(error.to_string());
                return report;
            }
        }

        info!(
            imported_moods = report.imported_moods,
            skipped_moods = report.skipped_moods,
            imported_goals = report.imported_goals,
            skipped_goals = report.skipped_goals,
            correlations = report.imported_correlations,
            "Snapshot merged into local store"
        );
        report
    }

    /// Skip when the local slot already holds a rated entry (or exactly this
    /// entry); otherwise write the snapshot's entry with its original
    /// `logged_at`.
    fn import_moods(&self, snapshot: &Snapshot, report: &mut ImportReport) -> Result<()> {
        for entry in &snapshot.mood_entries {
            if let Err(e) = entry.validate() {
                warn!(error = %e, "Skipping invalid mood entry");
                report.skipped_moods += 1;
                continue;
            }

            let key = keys::mood(entry.date, entry.segment);
            if self.local_mood_blocks(&key, entry)? {
                report.skipped_moods += 1;
                continue;
            }

            self.store.set_json(&key, entry)?;
            report.imported_moods += 1;
        }
        Ok(())
    }

    fn local_mood_blocks(&self, key: &str, incoming: &MoodEntryRecord) -> Result<bool> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(false);
        };
        match serde_json::from_str::<MoodEntryRecord>(&raw) {
            Ok(local) => Ok(local.rating.is_some() || &local == incoming),
            // An unreadable local record is still the user's data; leave it.
            Err(_) => Ok(true),
        }
    }

    fn import_goals(&self, snapshot: &Snapshot, report: &mut ImportReport) -> Result<()> {
        if snapshot.goals.is_empty() {
            return Ok(());
        }

        let mut goals: Vec<GoalRecord> = self.store.get_json(keys::GOALS)?.unwrap_or_default();
        let mut known: HashSet<String> = goals.iter().map(|g| g.id.clone()).collect();

        for goal in &snapshot.goals {
            if known.insert(goal.id.clone()) {
                goals.push(goal.clone());
                report.imported_goals += 1;
            } else {
                report.skipped_goals += 1;
            }
        }

        if report.imported_goals > 0 {
            self.store.set_json(keys::GOALS, &goals)?;
        }
        Ok(())
    }

    fn import_correlations(&self, snapshot: &Snapshot, report: &mut ImportReport) -> Result<()> {
        for record in &snapshot.correlation_entries {
            self.store
                .set_json(&keys::correlation(record.date), record)?;
            report.imported_correlations += 1;
        }
        Ok(())
    }

    fn import_settings(&self, snapshot: &Snapshot, report: &mut ImportReport) -> Result<()> {
        if let Some(settings) = &snapshot.notification_settings {
            self.store.set_json(keys::NOTIFICATION_SETTINGS, settings)?;
            report.settings_replaced = true;
        }
        if let Some(preferences) = &snapshot.user_preferences {
            self.store.set_json(keys::USER_PREFERENCES, preferences)?;
            report.preferences_replaced = true;
        }
        Ok(())
    }

    fn import_analyses(&self, snapshot: &Snapshot, report: &mut ImportReport) -> Result<()> {
        if snapshot.saved_analyses.is_empty() {
            return Ok(());
        }

        let mut analyses: Vec<SavedAnalysis> = self
            .store
            .get_json(keys::SAVED_ANALYSES)?
            .unwrap_or_default();
        let mut known: HashSet<String> = analyses.iter().map(|a| a.id.clone()).collect();

        for analysis in &snapshot.saved_analyses {
            if known.insert(analysis.id.clone()) {
                analyses.push(analysis.clone());
                report.imported_analyses += 1;
            } else {
                report.skipped_analyses += 1;
            }
        }

        if report.imported_analyses > 0 {
            self.store.set_json(keys::SAVED_ANALYSES, &analyses)?;
        }
        Ok(())
    }
}

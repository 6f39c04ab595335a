/*!
Persisted engine state.

Both values are read from the Local Store at the start of an operation and
written back at its end; nothing keeps them in memory in between.
*/

use crate::store::{keys, LocalStore, StoreExt};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_INTERVAL_HOURS: u32 = 24;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupState {
    pub last_successful_backup_at: Option<DateTime<Utc>>,
    pub auto_backup_enabled: bool,
    pub interval_hours: u32,
}

impl Default for BackupState {
    fn default() -> Self {
        Self {
            last_successful_backup_at: None,
            auto_backup_enabled: false,
            interval_hours: DEFAULT_INTERVAL_HOURS,
        }
    }
}

impl BackupState {
    pub fn load(store: &dyn LocalStore) -> Result<Self> {
        Ok(store.get_json(keys::BACKUP_STATE)?.unwrap_or_default())
    }

    pub fn save(&self, store: &dyn LocalStore) -> Result<()> {
        store.set_json(keys::BACKUP_STATE, self)
    }

    /// Whether the interval has run out at `now`. An unset last backup is
    /// always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_successful_backup_at {
            None => true,
            Some(last) => now - last >= Duration::hours(i64::from(self.interval_hours)),
        }
    }
}

/// Tracks whether a fresh install has already been offered a restore
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RestoreOfferState {
    /// Sticky once the confirmation request has been emitted
    pub offered: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl RestoreOfferState {
    pub fn load(store: &dyn LocalStore) -> Result<Self> {
        Ok(store.get_json(keys::RESTORE_OFFER)?.unwrap_or_default())
    }

    pub fn save(&self, store: &dyn LocalStore) -> Result<()> {
        store.set_json(keys::RESTORE_OFFER, self)
    }

    /// Remote availability is looked up at most once per day
    pub fn checked_within_last_day(&self, now: DateTime<Utc>) -> bool {
        self.last_checked_at
            .map(|last| now - last < Duration::days(1))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_backup_state_defaults_when_absent() {
        let store = MemoryStore::new();
        let state = BackupState::load(&store).unwrap();
        assert_eq!(state, BackupState::default());
        assert!(!state.auto_backup_enabled);
        assert_eq!(state.interval_hours, DEFAULT_INTERVAL_HOURS);
    }

    #[test]
    fn test_backup_state_round_trips_through_store() {
        let store = MemoryStore::new();
        let state = BackupState {
            last_successful_backup_at: Some(t0()),
            auto_backup_enabled: true,
            interval_hours: 12,
        };
        state.save(&store).unwrap();
        assert_eq!(BackupState::load(&store).unwrap(), state);
    }

    #[test]
    fn test_is_due_crosses_interval_exactly() {
        let state = BackupState {
            last_successful_backup_at: Some(t0()),
            auto_backup_enabled: true,
            interval_hours: 24,
        };
        assert!(!state.is_due(t0() + Duration::hours(23) + Duration::minutes(59)));
        assert!(state.is_due(t0() + Duration::hours(24)));
        assert!(BackupState::default().is_due(t0()));
    }

    #[test]
    fn test_restore_offer_daily_recheck() {
        let state = RestoreOfferState {
            offered: false,
            last_checked_at: Some(t0()),
        };
        assert!(state.checked_within_last_day(t0() + Duration::hours(23)));
        assert!(!state.checked_within_last_day(t0() + Duration::hours(24)));
        assert!(!RestoreOfferState::default().checked_within_last_day(t0()));
    }
}

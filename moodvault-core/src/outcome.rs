/*!
Result objects handed to the UI collaborator.

Backend and codec failures are converted into these at the scheduler and
restore boundary; they never reach the tracking feature as errors.
*/

use crate::VaultError;
use serde::Serialize;

/// Uniform success/failure report for user-initiated operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: Option<String>,
    /// The underlying error's display string, shown to the user verbatim
    pub error: Option<String>,
}

impl OperationResult {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: &VaultError) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.to_string()),
        }
    }
}

impl From<crate::Result<String>> for OperationResult {
    fn from(result: crate::Result<String>) -> Self {
        match result {
            Ok(message) => Self::succeeded(message),
            Err(e) => Self::failed(&e),
        }
    }
}

/// Counts produced by one merge import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported_moods: usize,
    pub skipped_moods: usize,
    pub imported_goals: usize,
    pub skipped_goals: usize,
    pub imported_correlations: usize,
    pub imported_analyses: usize,
    pub skipped_analyses: usize,
    pub settings_replaced: bool,
    pub preferences_replaced: bool,
    /// Set when a category failed partway; earlier writes stay applied
    pub error: Option<String>,
}

impl ImportReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn summary(&self) -> String {
        format!(
            "Imported {} moods ({} skipped), {} goals ({} skipped), {} correlation entries",
            self.imported_moods,
            self.skipped_moods,
            self.imported_goals,
            self.skipped_goals,
            self.imported_correlations
        )
    }
}

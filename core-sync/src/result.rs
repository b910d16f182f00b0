//! Counters of one reconciliation pass.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome counters of a reconciliation pass.
///
/// Per-item failures bump the matching `*_errors` counter and keep their
/// message; `error` holds a pass-level failure that aborted the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub added: u64,
    pub updated: u64,
    pub deleted: u64,
    pub add_errors: u64,
    pub update_errors: u64,
    pub delete_errors: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self) {
        self.added += 1;
    }

    pub fn update(&mut self) {
        self.updated += 1;
    }

    pub fn delete(&mut self) {
        self.deleted += 1;
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.add_errors += 1;
        self.messages.push(message.into());
    }

    pub fn update_error(&mut self, message: impl Into<String>) {
        self.update_errors += 1;
        self.messages.push(message.into());
    }

    pub fn delete_error(&mut self, message: impl Into<String>) {
        self.delete_errors += 1;
        self.messages.push(message.into());
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// The pass itself failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_count(&self) -> u64 {
        self.add_errors + self.update_errors + self.delete_errors
    }

    /// Some items failed while the pass completed.
    pub fn is_partial(&self) -> bool {
        self.error.is_none() && self.error_count() > 0
    }

    /// Nothing was added, updated or deleted.
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.deleted == 0
    }

    /// Fold another pass into this aggregate. The first pass-level error wins.
    pub fn merge(&mut self, other: &SyncResult) {
        self.added += other.added;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.add_errors += other.add_errors;
        self.update_errors += other.update_errors;
        self.delete_errors += other.delete_errors;
        self.messages.extend(other.messages.iter().cloned());
        if self.error.is_none() {
            self.error = other.error.clone();
        }
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "removed {} failed {} updated {} failed {} added {} failed {}",
            self.deleted,
            self.delete_errors,
            self.updated,
            self.update_errors,
            self.added,
            self.add_errors
        )?;
        if let Some(error) = &self.error {
            write!(f, " error: {}", error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_predicates() {
        let mut result = SyncResult::new();
        assert!(result.is_unchanged());

        result.add();
        result.update_error("zone z1: conflict");
        assert!(!result.is_unchanged());
        assert!(result.is_partial());
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.messages, vec!["zone z1: conflict".to_string()]);

        result.set_error("lock lost");
        assert!(result.is_error());
        assert!(!result.is_partial());
    }

    #[test]
    fn test_merge_keeps_first_error() {
        let mut total = SyncResult::new();
        let mut a = SyncResult::new();
        a.add();
        a.set_error("first");
        let mut b = SyncResult::new();
        b.delete();
        b.delete_error("busy");
        b.set_error("second");

        total.merge(&a);
        total.merge(&b);

        assert_eq!(total.added, 1);
        assert_eq!(total.deleted, 1);
        assert_eq!(total.delete_errors, 1);
        assert_eq!(total.error.as_deref(), Some("first"));
    }

    #[test]
    fn test_display_summary() {
        let mut result = SyncResult::new();
        result.add();
        result.update();
        result.delete();
        assert_eq!(
            result.to_string(),
            "removed 1 failed 0 updated 1 failed 0 added 1 failed 0"
        );
    }
}

//! # Audit Stamping
//!
//! Fills [`AuditInfo`] on headers and lines before they are written.
//!
//! ```text
//! Insert  → stamp_created  (created_at, created_by)
//! Update  → stamp_updated  (updated_at, updated_by; created_* kept)
//! Unchanged / Delete → untouched
//! ```

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use stockwise_core::AuditInfo;

/// Stamps creation and update metadata.
///
/// Implementations must be cheap; they run once per written row inside the
/// reconciliation transaction.
pub trait AuditStamper: Send + Sync + Debug {
    /// Marks a row as created now.
    fn stamp_created(&self, audit: &mut AuditInfo);

    /// Marks a row as updated now.
    fn stamp_updated(&self, audit: &mut AuditInfo);
}

/// Stamps with a fixed user id and the wall clock.
#[derive(Debug, Clone)]
pub struct UserStamper {
    pub user_id: String,
}

impl UserStamper {
    pub fn new(user_id: impl Into<String>) -> Self {
        UserStamper {
            user_id: user_id.into(),
        }
    }

    /// Stamper for background jobs and the seed binary.
    pub fn system() -> Self {
        UserStamper::new("system")
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl Default for UserStamper {
    fn default() -> Self {
        UserStamper::system()
    }
}

impl AuditStamper for UserStamper {
    fn stamp_created(&self, audit: &mut AuditInfo) {
        audit.created_at = Some(self.now());
        audit.created_by = Some(self.user_id.clone());
    }

    fn stamp_updated(&self, audit: &mut AuditInfo) {
        audit.updated_at = Some(self.now());
        audit.updated_by = Some(self.user_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_created_then_updated() {
        let stamper = UserStamper::new("clerk-7");
        let mut audit = AuditInfo::default();

        stamper.stamp_created(&mut audit);
        assert_eq!(audit.created_by.as_deref(), Some("clerk-7"));
        assert!(audit.updated_at.is_none());

        let created_at = audit.created_at;
        UserStamper::new("manager").stamp_updated(&mut audit);
        assert_eq!(audit.created_at, created_at);
        assert_eq!(audit.created_by.as_deref(), Some("clerk-7"));
        assert_eq!(audit.updated_by.as_deref(), Some("manager"));
    }
}

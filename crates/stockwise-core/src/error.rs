//! # Error Types
//!
//! Domain-specific error types for stockwise-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockwise-core errors (this file)                                     │
//! │  ├── CoreError        - Reconciliation failures                        │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  stockwise-db errors (separate crate)                                  │
//! │  └── DbError          - Database failures, wraps CoreError             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Severity
//! Every variant aborts the request that raised it. Nothing is retried and the
//! database transaction around a reconciliation is rolled back, so the ledger
//! is left exactly as it was before the request.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An incoming line carries a persisted id that the stored transaction
    /// does not have.
    ///
    /// ## When This Occurs
    /// - The client edited a stale copy of the transaction
    /// - A line id from another transaction was submitted
    ///
    /// ## User Workflow
    /// ```text
    /// Edit purchase #12 (lines 40, 41)
    ///      │
    ///      ▼
    /// Submit line id 57
    ///      │
    ///      ▼
    /// ReferentialMismatch { kind: "purchase", line_id: 57 }
    ///      │
    ///      ▼
    /// Request rejected, nothing written
    /// ```
    #[error("{kind} item mismatched: line {line_id} does not belong to this transaction")]
    ReferentialMismatch { kind: String, line_id: i64 },

    /// A delta references a unit conversion or product that has no
    /// resolvable stock context.
    ///
    /// This is a referential-integrity violation, never a user mistake the
    /// caller can fix by resubmitting.
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Unit conversion id has no record.
    #[error("Unit conversion not found: {0}")]
    UnitConversionNotFound(String),

    /// Conversion record cannot be used for arithmetic.
    #[error("Invalid conversion for unit {unit_id}: {reason}")]
    InvalidConversion { unit_id: String, reason: String },

    /// A quantity or balance left the representable decimal range.
    ///
    /// Raised instead of panicking when a conversion, a delta sum or a
    /// balance update does not fit.
    #[error("Arithmetic overflow while {0}")]
    Overflow(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a ReferentialMismatch for a line id.
    pub fn mismatch(kind: impl Into<String>, line_id: i64) -> Self {
        CoreError::ReferentialMismatch {
            kind: kind.into(),
            line_id,
        }
    }

    /// Creates an InternalInconsistency with a message.
    pub fn inconsistency(message: impl Into<String>) -> Self {
        CoreError::InternalInconsistency(message.into())
    }

    /// Creates an Overflow naming the step that overflowed.
    pub fn overflow(step: impl Into<String>) -> Self {
        CoreError::Overflow(step.into())
    }

    /// Escalates a missing unit conversion to an integrity violation.
    ///
    /// The resolver reports `UnitConversionNotFound`; inside a reconciliation
    /// the same condition means a persisted line points at nothing.
    pub fn into_inconsistency(self) -> Self {
        match self {
            CoreError::UnitConversionNotFound(unit_id) => CoreError::InternalInconsistency(
                format!("unit conversion {} has no record", unit_id),
            ),
            CoreError::InvalidConversion { unit_id, reason } => CoreError::InternalInconsistency(
                format!("unit conversion {} is unusable: {}", unit_id, reason),
            ),
            other => other,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// The reconciler itself trusts its input; these are raised by the helpers in
/// [`crate::validation`] that callers run first, and by master-data inserts.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::mismatch("purchase", 57);
        assert_eq!(
            err.to_string(),
            "purchase item mismatched: line 57 does not belong to this transaction"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "product_id".to_string(),
        };
        assert_eq!(err.to_string(), "product_id is required");

        let err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        assert_eq!(err.to_string(), "quantity must be positive");
    }

    #[test]
    fn test_missing_unit_escalates_to_inconsistency() {
        let err = CoreError::UnitConversionNotFound("box".to_string()).into_inconsistency();
        assert!(matches!(err, CoreError::InternalInconsistency(_)));

        let err = CoreError::mismatch("sales", 3).into_inconsistency();
        assert!(matches!(err, CoreError::ReferentialMismatch { .. }));
    }

    #[test]
    fn test_overflow_is_not_escalated() {
        let err = CoreError::overflow("converting 5 box").into_inconsistency();
        assert_eq!(err.to_string(), "Arithmetic overflow while converting 5 box");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "unit_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}

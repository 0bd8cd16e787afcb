//! # Validation Module
//!
//! Input checks callers run before handing requests to the reconciler.
//!
//! ## Where Validation Happens
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Caller (form / API)                                                   │
//! │  └── THIS MODULE: ids, quantities, conversion ratios                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Reconciler                                                            │
//! │  └── Trusts field values, checks line identity only                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  SQLite                                                                │
//! │  └── NOT NULL, UNIQUE, FOREIGN KEY                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use rust_decimal::Decimal;
//! use stockwise_core::validation::{validate_conversion_value, validate_id};
//!
//! validate_id("unit_id", "box").unwrap();
//! validate_conversion_value(Decimal::from(10)).unwrap();
//! assert!(validate_conversion_value(Decimal::ZERO).is_err());
//! ```

use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::types::{LineRequest, TransactionRequest};
use crate::{MAX_ID_LENGTH, MAX_LINES_PER_TRANSACTION};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identifiers
// =============================================================================

/// Validates a string identifier (product, unit, branch).
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most [`MAX_ID_LENGTH`] characters
/// - No surrounding whitespace
pub fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_ID_LENGTH {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LENGTH,
        });
    }

    if value.trim() != value {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "leading or trailing whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a display name.
pub fn validate_name(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if value.len() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Conversion ratios must be strictly positive.
pub fn validate_conversion_value(value: Decimal) -> ValidationResult<()> {
    if value <= Decimal::ZERO {
        return Err(ValidationError::MustBePositive {
            field: "conversion_value".to_string(),
        });
    }
    Ok(())
}

/// Validates one incoming line.
///
/// ## Rules
/// - `product_id` and `unit_id` are valid ids
/// - `quantity` is positive
/// - `rate` and `amount` are not negative
/// - `id` is not negative
pub fn validate_line_request(line: &LineRequest) -> ValidationResult<()> {
    if line.id < 0 {
        return Err(ValidationError::InvalidFormat {
            field: "id".to_string(),
            reason: "line id cannot be negative".to_string(),
        });
    }

    validate_id("product_id", &line.product_id)?;
    validate_id("unit_id", &line.unit_id)?;

    if line.quantity <= Decimal::ZERO {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if line.rate.is_sign_negative() {
        return Err(ValidationError::InvalidFormat {
            field: "rate".to_string(),
            reason: "cannot be negative".to_string(),
        });
    }

    if line.amount.is_sign_negative() {
        return Err(ValidationError::InvalidFormat {
            field: "amount".to_string(),
            reason: "cannot be negative".to_string(),
        });
    }

    Ok(())
}

/// Validates a whole transaction request.
pub fn validate_transaction_request(request: &TransactionRequest) -> ValidationResult<()> {
    validate_id("branch_id", &request.branch_id)?;

    if request.lines.len() > MAX_LINES_PER_TRANSACTION {
        return Err(ValidationError::InvalidFormat {
            field: "lines".to_string(),
            reason: format!("at most {} lines allowed", MAX_LINES_PER_TRANSACTION),
        });
    }

    request.lines.iter().try_for_each(validate_line_request)
}

// =============================================================================
// Unit Tests
// =============================================================================

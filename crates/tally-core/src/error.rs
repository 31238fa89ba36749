//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tally-engine errors                                                   │
//! │  └── EngineError      - What callers see (kind + message + details)    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError ← DbError             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (SKU, ID, etc.)
//! 3. Errors are enum variants, never String
//! 4. Each error variant maps to a user-facing message

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found.
    ///
    /// ## When This Occurs
    /// - Product ID doesn't exist in the catalog
    /// - Product was soft-deleted (`is_active = false`)
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Insufficient stock to complete sale.
    ///
    /// ## When This Occurs
    /// - Trying to sell more than available stock
    /// - Product has track_inventory=true and allow_backorder=false
    ///
    /// ## User Workflow
    /// ```text
    /// Cart line (qty: 5)
    ///      │
    ///      ▼
    /// Check stock: available=2
    ///      │
    ///      ▼
    /// InsufficientStock { sku: "RICE-5KG", available: 2, requested: 5 }
    ///      │
    ///      ▼
    /// Whole sale rejected, nothing written
    /// ```
    #[error("Insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// Customer does not hold enough loyalty points for a redemption.
    #[error("Insufficient loyalty points: available {available}, requested {requested}")]
    InsufficientPoints { available: i64, requested: i64 },

    /// Sale is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Voiding a sale that is already voided or refunded
    /// - Refunding a sale that was voided
    #[error("Sale {sale_id} is {current_status}, cannot perform operation")]
    InvalidSaleStatus {
        sale_id: String,
        current_status: String,
    },

    /// Cart has no lines.
    #[error("Cart is empty")]
    CartEmpty,

    /// Cart has exceeded maximum allowed lines.
    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// Item quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Payment amount is invalid.
    #[error("Invalid payment amount: {reason}")]
    InvalidPaymentAmount { reason: String },

    /// A coupon code was supplied but cannot be applied.
    ///
    /// ## When This Occurs
    /// - No active promotion carries the code
    /// - The promotion exists but the cart or customer is not eligible
    #[error("Coupon {code} cannot be applied: {reason}")]
    InvalidCoupon { code: String, reason: String },

    /// A manual line discount is malformed.
    #[error("Invalid discount: {reason}")]
    InvalidDiscount { reason: String },

    /// An amount no longer fits in minor units.
    ///
    /// ## When This Occurs
    /// - Catalog prices times quantities exceed the representable range
    #[error("Amount too large: {context}")]
    AmountOverflow { context: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Two fields that cannot be combined were both supplied.
    #[error("{field} cannot be combined with {other}")]
    Conflicting { field: String, other: String },
}

impl ValidationError {
    /// Name of the offending field, for field-level error details.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::MustBePositive { field }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::Conflicting { field, .. } => field,
        }
    }
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
        let err = CoreError::InsufficientStock {
            sku: "RICE-5KG".to_string(),
            available: 2,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for RICE-5KG: available 2, requested 5"
        );

        let err = CoreError::InvalidSaleStatus {
            sale_id: "s-1".to_string(),
            current_status: "voided".to_string(),
        };
        assert_eq!(err.to_string(), "Sale s-1 is voided, cannot perform operation");
    }

    #[test]
    fn test_validation_error_field() {
        let err = ValidationError::Required {
            field: "reason".to_string(),
        };
        assert_eq!(err.to_string(), "reason is required");
        assert_eq!(err.field(), "reason");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}

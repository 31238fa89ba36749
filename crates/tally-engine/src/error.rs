//! # Engine Error Type
//!
//! The single error callers of the engine see.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Tally                                  │
//! │                                                                         │
//! │  ValidationError ──► CoreError ──┐                                     │
//! │                                  ├──► EngineError { kind, message,     │
//! │  sqlx::Error ──► DbError ────────┘                   details }         │
//! │                                                                         │
//! │  kind          http   examples                                          │
//! │  ────────────  ────   ──────────────────────────────────────────────    │
//! │  NotFound      404    product, sale, customer, supervisor missing       │
//! │  BadRequest    400    bad input, insufficient stock or points           │
//! │  Unauthorized  401    bad supervisor PIN, unknown acting operator       │
//! │  Forbidden     403    operator lacks the capability, inactive account   │
//! │  InvalidState  409    void/refund of a sale that isn't completed        │
//! │  Conflict      409    duplicate invoice number                          │
//! │  Internal      500    persistence failures (detail is logged only)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use std::fmt;
use tracing::error;

use tally_core::{CoreError, ValidationError};
use tally_db::DbError;

/// Error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Unauthorized,
    Forbidden,
    /// The sale's current status doesn't allow the operation.
    InvalidState,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::InvalidState | ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }
}

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Error returned by every engine operation.
///
/// ## Serialization
/// ```json
/// {
///   "kind": "BAD_REQUEST",
///   "message": "reason is required",
///   "details": [{ "field": "reason", "message": "reason is required" }]
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldError>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        EngineError {
            kind,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        EngineError::new(ErrorKind::NotFound, format!("{} not found: {}", resource, id))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        EngineError::new(ErrorKind::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        EngineError::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        EngineError::new(ErrorKind::Forbidden, message)
    }

    /// A sale that isn't in the status the operation needs.
    pub fn invalid_state(sale_id: &str, current_status: impl fmt::Display) -> Self {
        CoreError::InvalidSaleStatus {
            sale_id: sale_id.to_string(),
            current_status: current_status.to_string(),
        }
        .into()
    }

    /// Logs `detail` and returns a generic internal error.
    pub fn internal(detail: impl fmt::Display) -> Self {
        error!("Internal engine error: {}", detail);
        EngineError::new(ErrorKind::Internal, "Internal error")
    }

    pub fn with_field(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.details.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
        self
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for EngineError {}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Conversions
// =============================================================================

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        EngineError::bad_request(message.clone()).with_field(err.field(), message)
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ProductNotFound(id) => EngineError::not_found("Product", &id),
            CoreError::InvalidSaleStatus { .. } => {
                EngineError::new(ErrorKind::InvalidState, err.to_string())
            }
            CoreError::Validation(e) => e.into(),
            CoreError::InsufficientStock { .. }
            | CoreError::InsufficientPoints { .. }
            | CoreError::CartEmpty
            | CoreError::CartTooLarge { .. }
            | CoreError::QuantityTooLarge { .. }
            | CoreError::InvalidPaymentAmount { .. }
            | CoreError::InvalidCoupon { .. }
            | CoreError::InvalidDiscount { .. }
            | CoreError::AmountOverflow { .. } => EngineError::bad_request(err.to_string()),
        }
    }
}

/// Database errors never leak query text to callers.
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => EngineError::not_found(&entity, &id),
            DbError::UniqueViolation { field, .. } => {
                error!("Unique constraint violated: {}", field);
                EngineError::new(ErrorKind::Conflict, format!("Duplicate {}", field))
            }
            DbError::InvalidOperation(message) => EngineError::bad_request(message),
            DbError::ForeignKeyViolation { message } => {
                error!("Foreign key violation: {}", message);
                EngineError::bad_request("Invalid reference")
            }
            other => EngineError::internal(other),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_mapping() {
        let err: EngineError = CoreError::ProductNotFound("p-1".to_string()).into();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "Product not found: p-1");

        let err: EngineError = CoreError::InsufficientStock {
            sku: "RICE".to_string(),
            available: 2,
            requested: 5,
        }
        .into();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err = EngineError::invalid_state("s-1", "voided");
        assert_eq!(err.kind, ErrorKind::InvalidState);
        assert_eq!(err.message, "Sale s-1 is voided, cannot perform operation");
        assert_eq!(err.kind.http_status(), 409);
    }

    #[test]
    fn test_validation_carries_field() {
        let err: EngineError = CoreError::Validation(ValidationError::Required {
            field: "reason".to_string(),
        })
        .into();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.details.len(), 1);
        assert_eq!(err.details[0].field, "reason");
    }

    #[test]
    fn test_db_mapping_hides_detail() {
        let err: EngineError = DbError::QueryFailed("syntax error near SELEC".to_string()).into();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(!err.message.contains("SELEC"));

        let err: EngineError = DbError::not_found("Sale", "s-9").into();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err: EngineError = DbError::UniqueViolation {
            field: "sales.invoice_number".to_string(),
            value: "unknown".to_string(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_serialization_skips_empty_details() {
        let json = serde_json::to_value(EngineError::forbidden("nope")).unwrap();
        assert_eq!(json["kind"], "FORBIDDEN");
        assert!(json.get("details").is_none());
    }
}

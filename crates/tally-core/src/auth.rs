//! # Authorization Policy
//!
//! Who may approve a void, a refund or a manual discount.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Acting operator holds capability or elevated role?                     │
//! │       │                                                                 │
//! │       ├── yes ──► SelfAuthorized                                       │
//! │       │                                                                 │
//! │       └── no ───► supervisor id + PIN supplied?                        │
//! │                        │                                                │
//! │                        ├── no  ──► Forbidden                           │
//! │                        └── yes ──► PIN ok? active? capable?            │
//! │                                      └── all yes ──► Supervisor        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! PIN checking itself lives in the engine; this module only decides whether
//! an operator record is allowed to approve an action.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Operator;

/// Actions that need approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizedAction {
    Void,
    Refund,
    Discount,
}

impl AuthorizedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizedAction::Void => "void",
            AuthorizedAction::Refund => "refund",
            AuthorizedAction::Discount => "discount",
        }
    }

    /// The capability flag on `operator` for this action.
    fn capability(&self, operator: &Operator) -> bool {
        match self {
            AuthorizedAction::Void => operator.can_authorize_void,
            AuthorizedAction::Refund => operator.can_authorize_refund,
            AuthorizedAction::Discount => operator.can_authorize_discount,
        }
    }
}

impl fmt::Display for AuthorizedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an operator record cannot approve an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    Inactive,
    MissingCapability,
}

/// Checks whether `operator` may approve `action`.
pub fn check(operator: &Operator, action: AuthorizedAction) -> Result<(), Denial> {
    if !operator.is_active {
        return Err(Denial::Inactive);
    }
    if operator.role.is_elevated() || action.capability(operator) {
        Ok(())
    } else {
        Err(Denial::MissingCapability)
    }
}

/// Whether `operator` can approve `action` on their own.
pub fn can_authorize(operator: &Operator, action: AuthorizedAction) -> bool {
    check(operator, action).is_ok()
}

/// How an action was approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Authorization {
    SelfAuthorized { operator_id: String },
    Supervisor { supervisor_id: String, name: String },
}

impl Authorization {
    /// Operator recorded as the authorizer.
    pub fn authorizer_id(&self) -> &str {
        match self {
            Authorization::SelfAuthorized { operator_id } => operator_id,
            Authorization::Supervisor { supervisor_id, .. } => supervisor_id,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

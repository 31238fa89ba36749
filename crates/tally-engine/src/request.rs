//! # Engine Requests
//!
//! Inputs to the sale engine. The operator identity comes from the caller's
//! authenticated session; the engine trusts it but still checks the operator
//! exists and is active.

use serde::{Deserialize, Serialize};

use tally_core::pricing::ManualDiscount;
use tally_core::validation::{
    validate_cart_size, validate_coupon_code, validate_payment_amount, validate_pin,
    validate_points, validate_price_cents, validate_quantity,
};
use tally_core::{PaymentMethod, ValidationError};

// =============================================================================
// Create
// =============================================================================

/// One cart line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    pub product_id: String,
    pub quantity: i64,
    /// Overrides the catalog selling price.
    #[serde(default)]
    pub unit_price_cents: Option<i64>,
    #[serde(default)]
    pub manual_discount: Option<ManualDiscount>,
    /// Reason for the manual discount; required when one is given.
    #[serde(default)]
    pub discount_reason_id: Option<String>,
}

impl LineRequest {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        LineRequest {
            product_id: product_id.into(),
            quantity,
            unit_price_cents: None,
            manual_discount: None,
            discount_reason_id: None,
        }
    }
}

/// One tender.
///
/// Non-cash tenders are applied in full and never produce change. Cash
/// covers whatever is left and the excess is returned as change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    pub tendered_cents: i64,
    #[serde(default)]
    pub reference: Option<String>,
}

impl PaymentRequest {
    pub fn cash(tendered_cents: i64) -> Self {
        PaymentRequest {
            method: PaymentMethod::Cash,
            tendered_cents,
            reference: None,
        }
    }
}

/// Supervisor identity plus PIN, supplied when the acting operator can't
/// approve an action alone.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorCredentials {
    pub supervisor_id: String,
    pub pin: String,
}

impl std::fmt::Debug for SupervisorCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorCredentials")
            .field("supervisor_id", &self.supervisor_id)
            .field("pin", &"****")
            .finish()
    }
}

/// Everything needed to ring up one sale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSaleRequest {
    pub operator_id: String,
    pub lines: Vec<LineRequest>,
    /// A single payment or a split tender.
    #[serde(default)]
    pub payments: Vec<PaymentRequest>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub senior_citizen: bool,
    #[serde(default)]
    pub pwd: bool,
    /// Senior citizen / PWD card number.
    #[serde(default)]
    pub government_id_number: Option<String>,
    /// Explicit VAT exemption independent of any government discount.
    #[serde(default)]
    pub vat_exempt: bool,
    #[serde(default)]
    pub vat_exempt_reason: Option<String>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub points_to_redeem: i64,
    /// Approval for manual discounts whose reason requires it.
    #[serde(default)]
    pub discount_authorization: Option<SupervisorCredentials>,
}

impl CreateSaleRequest {
    /// Shape checks that need no database access.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_cart_size(self.lines.len())?;
        for line in &self.lines {
            validate_quantity(line.quantity)?;
            if let Some(price) = line.unit_price_cents {
                validate_price_cents(price)?;
            }
            if line.manual_discount.is_some() && line.discount_reason_id.is_none() {
                return Err(ValidationError::Required {
                    field: "discount_reason_id".to_string(),
                });
            }
        }
        for payment in &self.payments {
            validate_payment_amount(payment.tendered_cents)?;
        }
        validate_points(self.points_to_redeem)?;
        if let Some(code) = &self.coupon_code {
            validate_coupon_code(code)?;
        }
        if (self.senior_citizen || self.pwd)
            && self
                .government_id_number
                .as_deref()
                .map_or(true, |n| n.trim().is_empty())
        {
            return Err(ValidationError::Required {
                field: "government_id_number".to_string(),
            });
        }
        if self.points_to_redeem > 0 && self.customer_id.is_none() {
            return Err(ValidationError::Conflicting {
                field: "points_to_redeem".to_string(),
                other: "a sale without a customer".to_string(),
            });
        }
        if let Some(creds) = &self.discount_authorization {
            validate_pin(&creds.pin)?;
        }
        Ok(())
    }

    pub fn has_manual_discounts(&self) -> bool {
        self.lines.iter().any(|l| l.manual_discount.is_some())
    }
}

// =============================================================================
// Void / Refund
// =============================================================================

/// A void or a full refund of a completed sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalRequest {
    pub sale_id: String,
    pub operator_id: String,
    pub reason: String,
    /// Omitted when the operator self-authorizes.
    #[serde(default)]
    pub supervisor: Option<SupervisorCredentials>,
}

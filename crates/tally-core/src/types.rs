//! # Domain Types
//!
//! Catalog, customer, operator and sale aggregate types.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sale Aggregate                                  │
//! │                                                                         │
//! │                      ┌─────────────────┐                                │
//! │                      │      Sale       │                                │
//! │                      │  ─────────────  │                                │
//! │                      │  invoice_number │                                │
//! │                      │  status         │                                │
//! │                      │  totals         │                                │
//! │                      │  audit fields   │                                │
//! │                      └────────┬────────┘                                │
//! │            ┌──────────────────┼──────────────────┐                      │
//! │            ▼                  ▼                  ▼                      │
//! │  ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐            │
//! │  │    SaleItem     │ │  SaleDiscount   │ │    Payment      │            │
//! │  │  frozen sku,    │ │  one row per    │ │  one row per    │            │
//! │  │  name, price    │ │  applied disc.  │ │  tender         │            │
//! │  └─────────────────┘ └─────────────────┘ └─────────────────┘            │
//! │                                                                         │
//! │  Σ SaleDiscount.amount == Sale.discount_total                          │
//! │  subtotal − discount + tax − points_value == total                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID: (sku, invoice_number) - human-readable

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::{Money, Rate};

// =============================================================================
// Product
// =============================================================================

/// A product available for sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    /// Display name, frozen onto sale items at sale time.
    pub name: String,

    /// Category used by category-targeted promotions.
    pub category_id: Option<String>,

    /// Selling price in minor units.
    pub price_cents: i64,

    /// Cost in minor units.
    pub cost_cents: Option<i64>,

    /// Tax rate in basis points (1200 = 12%).
    pub tax_rate_bps: u32,

    /// Whether tax is charged on this product at all.
    pub is_taxable: bool,

    /// Whether government discounts may waive VAT on this product.
    pub is_vat_exempt_eligible: bool,

    /// Whether to track inventory for this product.
    pub track_inventory: bool,

    /// Allow selling past zero stock.
    pub allow_backorder: bool,

    /// Quantity on hand. Only meaningful when `track_inventory` is set.
    pub current_stock: i64,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the selling price as Money.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Returns the tax rate.
    #[inline]
    pub fn tax_rate(&self) -> Rate {
        Rate::from_bps(self.tax_rate_bps)
    }

    /// Checks if `quantity` units can be sold right now.
    pub fn can_sell(&self, quantity: i64) -> bool {
        !self.track_inventory || self.allow_backorder || self.current_stock >= quantity
    }
}

// =============================================================================
// Customer
// =============================================================================

/// A customer who can accrue and redeem loyalty points.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub membership_tier_id: Option<String>,
    pub customer_group_id: Option<String>,
    /// Current point balance. Owned by the Loyalty Ledger.
    pub loyalty_points: i64,
    pub lifetime_spend_cents: i64,
    pub total_transactions: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Operator
// =============================================================================

/// Role of a staff member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Supervisor,
    Cashier,
}

impl Role {
    /// Elevated roles may authorize voids, refunds and discounts without
    /// holding the individual capability flags.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }
}

/// A staff member who rings up sales or authorizes reversals.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub role: Role,
    /// Argon2 PHC string. Never serialized.
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    pub pin_hash: Option<String>,
    pub can_authorize_void: bool,
    pub can_authorize_refund: bool,
    pub can_authorize_discount: bool,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale transaction.
///
/// ```text
/// (none) ──► Pending ──► Completed ──┬──► Voided
///                                    └──► Refunded
/// ```
///
/// `Pending` only exists inside the create transaction and is never visible
/// to another connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Pending,
    Completed,
    Voided,
    Refunded,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "pending",
            SaleStatus::Completed => "completed",
            SaleStatus::Voided => "voided",
            SaleStatus::Refunded => "refunded",
        }
    }

    /// Voided and refunded sales can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SaleStatus::Voided | SaleStatus::Refunded)
    }
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Pending
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    EWallet,
    BankTransfer,
    /// Recorded on the sale header when more than one method was tendered.
    Split,
}

// =============================================================================
// Sale
// =============================================================================

/// A sale transaction header.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    /// `PREFIX-YYYYMMDD-NNNN`, unique and monotonic per day.
    pub invoice_number: String,
    pub customer_id: Option<String>,
    pub operator_id: String,
    pub status: SaleStatus,

    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    /// Currency value of the redeemed loyalty points.
    pub points_value_cents: i64,
    pub total_cents: i64,

    pub payment_method: PaymentMethod,
    pub amount_tendered_cents: i64,
    pub change_cents: i64,

    pub is_vat_exempt: bool,
    pub vat_exempt_reason: Option<String>,

    pub points_earned: i64,
    pub points_redeemed: i64,

    pub voided_by: Option<String>,
    pub void_authorized_by: Option<String>,
    pub void_reason: Option<String>,
    #[ts(as = "Option<String>")]
    pub voided_at: Option<DateTime<Utc>>,

    pub refunded_by: Option<String>,
    pub refund_authorized_by: Option<String>,
    pub refund_reason: Option<String>,
    pub refund_amount_cents: Option<i64>,
    #[ts(as = "Option<String>")]
    pub refunded_at: Option<DateTime<Utc>>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// `subtotal − discount + tax − points_value == total`
    pub fn reconciles(&self) -> bool {
        self.subtotal_cents - self.discount_cents + self.tax_cents - self.points_value_cents
            == self.total_cents
    }
}

// =============================================================================
// Sale Item
// =============================================================================

/// How a manual line discount was expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LineDiscountType {
    Percentage,
    Amount,
}

/// A line item in a sale.
/// Uses snapshot pattern to freeze product data at time of sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    /// SKU at time of sale (frozen).
    pub sku_snapshot: String,
    /// Product name at time of sale (frozen).
    pub name_snapshot: String,
    pub quantity: i64,
    /// Unit price in minor units at time of sale (frozen).
    pub unit_price_cents: i64,
    /// Manual discount applied to this line.
    pub discount_cents: i64,
    pub discount_type: Option<LineDiscountType>,
    pub tax_cents: i64,
    /// unit_price × quantity.
    pub line_subtotal_cents: i64,
    /// line_subtotal − discount + tax.
    pub line_total_cents: i64,
    pub quantity_refunded: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SaleItem {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

// =============================================================================
// Sale Discount
// =============================================================================

/// Where an applied discount came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    SeniorCitizen,
    Pwd,
    Membership,
    Promotion,
    Manual,
}

impl DiscountKind {
    pub fn is_government(&self) -> bool {
        matches!(self, DiscountKind::SeniorCitizen | DiscountKind::Pwd)
    }
}

/// One applied discount on a sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleDiscount {
    pub id: String,
    pub sale_id: String,
    /// Set for manual line discounts.
    pub sale_item_id: Option<String>,
    pub kind: DiscountKind,
    pub name: String,
    pub percentage_bps: Option<u32>,
    pub amount_cents: i64,
    /// Discount setting, membership tier, promotion or reason this came from.
    pub source_id: Option<String>,
    /// Operator who approved a manual discount.
    pub approved_by: Option<String>,
    /// Senior citizen / PWD card number.
    pub government_id_number: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Payment
// =============================================================================

/// A payment towards a sale.
/// A sale can have multiple payments for split tender scenarios.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub sale_id: String,
    pub method: PaymentMethod,
    /// Amount applied to the sale total.
    pub amount_cents: i64,
    /// Amount handed over by the customer.
    pub tendered_cents: i64,
    /// Change returned. Only cash produces change.
    pub change_cents: i64,
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Sale Detail
// =============================================================================

/// A fully hydrated sale: header, items, discount breakdown and payments.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleDetail {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub discounts: Vec<SaleDiscount>,
    pub payments: Vec<Payment>,
}

impl SaleDetail {
    /// Sum of the discount breakdown rows.
    pub fn discount_breakdown_total(&self) -> Money {
        self.discounts
            .iter()
            .map(|d| Money::from_cents(d.amount_cents))
            .sum()
    }

    /// Header arithmetic holds and the breakdown matches the header.
    pub fn reconciles(&self) -> bool {
        self.sale.reconciles()
            && self.discount_breakdown_total().cents() == self.sale.discount_cents
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

//! # tally-core: Pure Business Logic for the Tally Sale Engine
//!
//! Everything that decides *what* a sale looks like lives here: money math,
//! cart pricing, discount precedence, promotion eligibility, loyalty points,
//! ledger replay and the authorization policy for voids and refunds.
//! Nothing in this crate touches a database or reads the clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 tally-engine (Sale Transaction Engine)          │   │
//! │  │      create_sale ──► void_sale ──► refund_sale                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   money   │  │  pricing  │  │ discount  │  │  ledger   │  │   │
//! │  │   │   Money   │  │ PricedLine│  │ Evaluator │  │  replay   │  │   │
//! │  │   │   Rate    │  │ SaleTotals│  │ precedence│  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tally-db (Database Layer)                    │   │
//! │  │        SQLite, migrations, stock and loyalty ledgers, sales     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - `Money` in minor units and `Rate` in basis points
//! - [`types`] - Catalog, customer, operator and sale aggregate types
//! - [`promotion`] - Discount configuration (settings, tiers, promotions)
//! - [`discount`] - The Discount/Promotion Evaluator
//! - [`pricing`] - Per-line pricing, manual discounts, tax and totals
//! - [`loyalty`] - Points earned and redemption value
//! - [`ledger`] - Stock and loyalty ledger entries plus replay checks
//! - [`auth`] - Who may authorize voids, refunds and discounts
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::money::{Money, Rate};
//!
//! // 2 × 100.00 at 12% VAT
//! let subtotal = Money::from_cents(10000).multiply_quantity(2);
//! let tax = subtotal.apply_rate(Rate::from_bps(1200));
//!
//! assert_eq!(subtotal.cents(), 20000);
//! assert_eq!(tax.cents(), 2400);
//! assert_eq!((subtotal + tax).cents(), 22400);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod discount;
pub mod error;
pub mod ledger;
pub mod loyalty;
pub mod money;
pub mod pricing;
pub mod promotion;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{Money, Rate};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single cart.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single cart line.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum length of a void, refund or adjustment reason.
pub const MAX_REASON_LENGTH: usize = 500;

/// Largest unit price or tendered amount accepted, in minor units
/// (10,000,000.00).
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000;

/// Largest points redemption accepted on one sale.
pub const MAX_POINTS_PER_SALE: i64 = 1_000_000_000;

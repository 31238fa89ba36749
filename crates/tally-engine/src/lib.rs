//! # tally-engine: Sale Transaction Engine
//!
//! Turns a cart into a completed sale and reverses completed sales, each
//! operation committed or rolled back as a whole.
//!
//! ## Operation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  CreateSaleRequest ──► validate ──► operator ──► line approvals         │
//! │                                                     │                   │
//! │                                           BEGIN ◄───┘                   │
//! │   invoice number ─► products + stock ─► customer + tier                 │
//! │   evaluator (government > membership > promotion) ─► taxes              │
//! │   points ─► payments ─► sale rows ─► Stock Ledger ─► Loyalty Ledger     │
//! │                                           COMMIT ──► SaleDetail         │
//! │                                                                         │
//! │  ReversalRequest ──► reason ──► operator ──► sale ──► authorization     │
//! │                                                     │                   │
//! │                                           BEGIN ◄───┘                   │
//! │   status flip ─► return movements ─► loyalty adjustments ─► promotions  │
//! │                                           COMMIT ──► SaleDetail         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any failure before COMMIT drops the transaction, and nothing it wrote
//! survives: no sale, no movement, no points, no consumed invoice number.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_engine::{CreateSaleRequest, EngineConfig, LineRequest, PaymentRequest, SaleEngine};
//!
//! let engine = SaleEngine::connect(EngineConfig::load_or_default(None)).await?;
//! let detail = engine
//!     .create_sale(CreateSaleRequest {
//!         operator_id: cashier_id,
//!         lines: vec![LineRequest::new(&product_id, 2)],
//!         payments: vec![PaymentRequest::cash(50_000)],
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{} {}", detail.sale.invoice_number, detail.sale.total_cents);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod authorizer;
pub mod config;
pub mod engine;
pub mod error;
pub mod request;
pub mod reversal;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use authorizer::Authorizer;
pub use config::{ConfigError, EngineConfig};
pub use engine::SaleEngine;
pub use error::{EngineError, EngineResult, ErrorKind, FieldError};
pub use request::{
    CreateSaleRequest, LineRequest, PaymentRequest, ReversalRequest, SupervisorCredentials,
};

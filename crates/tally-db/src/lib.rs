//! # tally-db: Database Layer for Tally
//!
//! SQLite persistence for the sale engine, built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally Data Flow                                  │
//! │                                                                         │
//! │  SaleEngine::create_sale / void_sale / refund_sale                     │
//! │       │  one sqlx::Transaction per operation                           │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ StockLedger   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ LoyaltyLedger │    │ 0001_initial │  │   │
//! │  │   │ busy_timeout  │    │ SaleRepo  ... │    │ _schema.sql  │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Ways In
//! Every repository offers pool-backed methods on `&self` for standalone
//! use, and associated functions taking `&mut SqliteConnection` for use
//! inside a caller-owned transaction (`&mut *tx`).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("tally.db")).await?;
//! let movements = db.stock().movements(&product_id).await?;
//! let report = db.stock().verify_replay(&product_id).await?;
//! assert!(report.is_consistent());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod credentials;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use credentials::{hash_pin, verify_pin};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::customer::CustomerRepository;
pub use repository::discount::DiscountRepository;
pub use repository::loyalty::{LoyaltyChange, LoyaltyLedger, LoyaltyOutcome};
pub use repository::operator::OperatorRepository;
pub use repository::product::ProductRepository;
pub use repository::sale::{format_invoice_number, SaleRepository, Transition};
pub use repository::stock::{StockChange, StockLedger, StockOutcome};

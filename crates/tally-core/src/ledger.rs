//! # Ledger Entries
//!
//! Append-only entries for the Stock Ledger and the Loyalty Ledger, and the
//! replay check that proves a counter matches its history.
//!
//! ## Replay Invariant
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  entry 1:  before 10  delta -2  after  8                                │
//! │  entry 2:  before  8  delta +2  after 10    before == previous after   │
//! │  entry 3:  before 10  delta -5  after  5    after  == before + delta   │
//! │                                                                         │
//! │  last after (5) == products.current_stock                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Stock Movements
// =============================================================================

/// Why stock changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Sale,
    Return,
    Adjustment,
    Count,
    Damage,
    Purchase,
}

impl MovementType {
    /// Movement types recorded outside the sale flow.
    pub fn is_manual(&self) -> bool {
        !matches!(self, MovementType::Sale | MovementType::Return)
    }
}

/// One stock ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    pub movement_type: MovementType,
    /// Signed delta.
    pub quantity: i64,
    pub quantity_before: i64,
    pub quantity_after: i64,
    /// Causing sale, when there is one.
    pub reference_id: Option<String>,
    pub operator_id: Option<String>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Loyalty History
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTransactionType {
    Earn,
    Redeem,
    Adjust,
    Bonus,
    Expire,
}

/// One loyalty ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LoyaltyEntry {
    pub id: String,
    pub customer_id: String,
    pub transaction_type: LoyaltyTransactionType,
    /// Signed points.
    pub points: i64,
    pub balance_after: i64,
    pub reference_id: Option<String>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Replay
// =============================================================================

/// Common view over ledger entries.
pub trait LedgerEntry {
    fn entry_id(&self) -> &str;
    fn delta(&self) -> i64;
    fn after(&self) -> i64;

    fn before(&self) -> i64 {
        self.after() - self.delta()
    }
}

impl LedgerEntry for StockMovement {
    fn entry_id(&self) -> &str {
        &self.id
    }

    fn delta(&self) -> i64 {
        self.quantity
    }

    fn after(&self) -> i64 {
        self.quantity_after
    }

    fn before(&self) -> i64 {
        self.quantity_before
    }
}

impl LedgerEntry for LoyaltyEntry {
    fn entry_id(&self) -> &str {
        &self.id
    }

    fn delta(&self) -> i64 {
        self.points
    }

    fn after(&self) -> i64 {
        self.balance_after
    }
}

/// Outcome of replaying one ledger against its counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReplay {
    pub entries: usize,
    /// Balance before the first entry.
    pub opening: i64,
    /// `opening + Σ delta`.
    pub replayed: i64,
    /// The live counter.
    pub current: i64,
    /// First entry whose before/after doesn't chain.
    pub broken_at: Option<String>,
}

impl LedgerReplay {
    pub fn is_consistent(&self) -> bool {
        self.broken_at.is_none() && self.replayed == self.current
    }

    /// Net change recorded by the ledger.
    pub fn net_change(&self) -> i64 {
        self.replayed - self.opening
    }
}

/// Replays `entries` (creation order) and compares the result to `current`.
///
/// An empty ledger opens at `current`.
pub fn replay<E: LedgerEntry>(entries: &[E], current: i64) -> LedgerReplay {
    let opening = entries.first().map_or(current, |e| e.before());
    let mut running = opening;
    let mut broken_at = None;

    for entry in entries {
        let chains = entry.before() == running && entry.after() == entry.before() + entry.delta();
        if !chains && broken_at.is_none() {
            broken_at = Some(entry.entry_id().to_string());
        }
        running += entry.delta();
    }

    LedgerReplay {
        entries: entries.len(),
        opening,
        replayed: running,
        current,
        broken_at,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

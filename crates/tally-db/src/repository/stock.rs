//! # Stock Ledger
//!
//! Quantity on hand (`products.current_stock`) plus the append-only
//! `stock_movements` history that explains it.
//!
//! ## Guarded Update
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UPDATE products                                                        │
//! │  SET current_stock = current_stock + Δ                                  │
//! │  WHERE id = ? AND track_inventory = 1                                   │
//! │    AND (Δ >= 0 OR current_stock + Δ >= 0 OR allow_backorder = 1)        │
//! │  RETURNING current_stock                                                │
//! │                                                                         │
//! │  row returned  → insert movement (before = after − Δ), Applied          │
//! │  no row        → re-read product: NotFound | Untracked | Insufficient   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! The availability check and the decrement are one statement, so two
//! writers can't both pass the check against the same stock.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::product::ProductRepository;
use tally_core::ledger::{self, LedgerReplay, MovementType, StockMovement};

const MOVEMENT_COLUMNS: &str = "id, product_id, movement_type, quantity, quantity_before, \
     quantity_after, reference_id, operator_id, notes, created_at";

/// A requested change to one product's stock.
#[derive(Debug, Clone)]
pub struct StockChange {
    pub product_id: String,
    /// Signed delta; negative removes stock.
    pub delta: i64,
    pub movement_type: MovementType,
    pub reference_id: Option<String>,
    pub operator_id: Option<String>,
    pub notes: Option<String>,
}

/// What happened to a [`StockChange`].
#[derive(Debug, Clone)]
pub enum StockOutcome {
    /// Counter moved and a movement was recorded.
    Applied(StockMovement),
    /// Product doesn't track inventory; nothing recorded.
    Untracked,
    /// Would go negative and backorders aren't allowed.
    Insufficient { available: i64 },
    NotFound,
}

impl StockOutcome {
    pub fn movement(&self) -> Option<&StockMovement> {
        match self {
            StockOutcome::Applied(movement) => Some(movement),
            _ => None,
        }
    }
}

/// The Stock Ledger.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    // =========================================================================
    // Transactional core
    // =========================================================================

    /// Applies one change on the caller's connection.
    pub async fn apply(conn: &mut SqliteConnection, change: &StockChange) -> DbResult<StockOutcome> {
        let now = Utc::now();

        let after: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET current_stock = current_stock + ?2, updated_at = ?3
            WHERE id = ?1
              AND track_inventory = 1
              AND (?2 >= 0 OR current_stock + ?2 >= 0 OR allow_backorder = 1)
            RETURNING current_stock
            "#,
        )
        .bind(&change.product_id)
        .bind(change.delta)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(after) = after else {
            let product = ProductRepository::fetch(&mut *conn, &change.product_id).await?;
            return Ok(match product {
                None => StockOutcome::NotFound,
                Some(p) if !p.track_inventory => StockOutcome::Untracked,
                Some(p) => {
                    debug!(
                        product_id = %p.id,
                        available = p.current_stock,
                        requested = -change.delta,
                        "Stock change refused"
                    );
                    StockOutcome::Insufficient {
                        available: p.current_stock,
                    }
                }
            });
        };

        let movement = StockMovement {
            id: Uuid::new_v4().to_string(),
            product_id: change.product_id.clone(),
            movement_type: change.movement_type,
            quantity: change.delta,
            quantity_before: after - change.delta,
            quantity_after: after,
            reference_id: change.reference_id.clone(),
            operator_id: change.operator_id.clone(),
            notes: change.notes.clone(),
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, product_id, movement_type, quantity, quantity_before, quantity_after,
                reference_id, operator_id, notes, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&movement.id)
        .bind(&movement.product_id)
        .bind(movement.movement_type)
        .bind(movement.quantity)
        .bind(movement.quantity_before)
        .bind(movement.quantity_after)
        .bind(&movement.reference_id)
        .bind(&movement.operator_id)
        .bind(&movement.notes)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        if after < 0 {
            warn!(product_id = %movement.product_id, stock = after, "Stock is negative (backorder)");
        }

        debug!(
            product_id = %movement.product_id,
            movement_type = ?movement.movement_type,
            delta = movement.quantity,
            before = movement.quantity_before,
            after = movement.quantity_after,
            "Stock movement recorded"
        );

        Ok(StockOutcome::Applied(movement))
    }

    /// Movements of type `sale` referencing a sale, in creation order.
    pub async fn sale_movements(
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {} FROM stock_movements WHERE reference_id = ?1 AND movement_type = 'sale' ORDER BY seq",
            MOVEMENT_COLUMNS
        );
        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(sale_id)
            .fetch_all(conn)
            .await?;
        Ok(movements)
    }

    async fn product_movements(
        conn: &mut SqliteConnection,
        product_id: &str,
    ) -> DbResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {} FROM stock_movements WHERE product_id = ?1 ORDER BY seq",
            MOVEMENT_COLUMNS
        );
        let movements = sqlx::query_as::<_, StockMovement>(&sql)
            .bind(product_id)
            .fetch_all(conn)
            .await?;
        Ok(movements)
    }

    // =========================================================================
    // Standalone operations
    // =========================================================================

    /// Records a manual movement (adjustment, damage, purchase, count).
    ///
    /// Sale and return movements only come from the sale flow.
    pub async fn adjust(&self, change: &StockChange) -> DbResult<StockMovement> {
        if !change.movement_type.is_manual() {
            return Err(DbError::InvalidOperation(format!(
                "{:?} movements are recorded by the sale flow",
                change.movement_type
            )));
        }
        if change.delta == 0 {
            return Err(DbError::InvalidOperation(
                "Adjustment must change stock".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let outcome = Self::apply(&mut tx, change).await?;
        let movement = match outcome {
            StockOutcome::Applied(movement) => movement,
            StockOutcome::NotFound => return Err(DbError::not_found("Product", &change.product_id)),
            StockOutcome::Untracked => {
                return Err(DbError::InvalidOperation(format!(
                    "Product {} does not track inventory",
                    change.product_id
                )))
            }
            StockOutcome::Insufficient { available } => {
                return Err(DbError::InvalidOperation(format!(
                    "Insufficient stock for {}: {} available, {} requested",
                    change.product_id, available, -change.delta
                )))
            }
        };
        tx.commit().await?;

        info!(
            product_id = %movement.product_id,
            movement_type = ?movement.movement_type,
            delta = movement.quantity,
            "Manual stock movement recorded"
        );
        Ok(movement)
    }

    /// Sets stock to a physically counted quantity via a `count` movement.
    ///
    /// Returns `None` when the count matches and nothing was recorded.
    pub async fn count(
        &self,
        product_id: &str,
        counted: i64,
        operator_id: Option<&str>,
        notes: Option<&str>,
    ) -> DbResult<Option<StockMovement>> {
        if counted < 0 {
            return Err(DbError::InvalidOperation(
                "Counted quantity cannot be negative".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        // Write first so the read below happens under the writer lock.
        let touched = sqlx::query("UPDATE products SET updated_at = ?2 WHERE id = ?1")
            .bind(product_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(DbError::not_found("Product", product_id));
        }

        let product = ProductRepository::fetch(&mut tx, product_id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", product_id))?;

        let delta = counted - product.current_stock;
        if delta == 0 {
            tx.commit().await?;
            return Ok(None);
        }

        let change = StockChange {
            product_id: product_id.to_string(),
            delta,
            movement_type: MovementType::Count,
            reference_id: None,
            operator_id: operator_id.map(str::to_string),
            notes: notes.map(str::to_string),
        };

        // A count may lower stock to any non-negative value.
        let movement = match Self::apply(&mut tx, &change).await? {
            StockOutcome::Applied(movement) => movement,
            StockOutcome::Untracked => {
                return Err(DbError::InvalidOperation(format!(
                    "Product {} does not track inventory",
                    product_id
                )))
            }
            other => {
                return Err(DbError::Internal(format!(
                    "Count of {} refused: {:?}",
                    product_id, other
                )))
            }
        };
        tx.commit().await?;

        info!(product_id = %product_id, counted = counted, delta = delta, "Stock counted");
        Ok(Some(movement))
    }

    /// A product's movements in creation order.
    pub async fn movements(&self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let mut conn = self.pool.acquire().await?;
        Self::product_movements(&mut conn, product_id).await
    }

    /// Replays a product's movements against its current stock.
    pub async fn verify_replay(&self, product_id: &str) -> DbResult<LedgerReplay> {
        let mut tx = self.pool.begin().await?;

        let product = ProductRepository::fetch(&mut tx, product_id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", product_id))?;
        let movements = Self::product_movements(&mut tx, product_id).await?;
        tx.commit().await?;

        let report = ledger::replay(&movements, product.current_stock);
        if !report.is_consistent() {
            warn!(
                product_id = %product_id,
                replayed = report.replayed,
                current = report.current,
                broken_at = ?report.broken_at,
                "Stock ledger does not replay"
            );
        }
        Ok(report)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::fixtures;

    fn change(product_id: &str, delta: i64, movement_type: MovementType) -> StockChange {
        StockChange {
            product_id: product_id.to_string(),
            delta,
            movement_type,
            reference_id: None,
            operator_id: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_apply_records_before_and_after() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = fixtures::product("SOAP", 2500, 10);
        db.products().insert(&product).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let outcome = StockLedger::apply(&mut tx, &change(&product.id, -3, MovementType::Sale))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let movement = outcome.movement().unwrap();
        assert_eq!(movement.quantity, -3);
        assert_eq!(movement.quantity_before, 10);
        assert_eq!(movement.quantity_after, 7);

        let loaded = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_stock, 7);
    }

    #[tokio::test]
    async fn test_insufficient_leaves_stock_untouched() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = fixtures::product("SOAP", 2500, 2);
        db.products().insert(&product).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let outcome = StockLedger::apply(&mut tx, &change(&product.id, -5, MovementType::Sale))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(outcome, StockOutcome::Insufficient { available: 2 }));
        assert!(db.stock().movements(&product.id).await.unwrap().is_empty());
        let loaded = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_stock, 2);
    }

    #[tokio::test]
    async fn test_backorder_allows_negative() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut product = fixtures::product("PREORDER", 2500, 1);
        product.allow_backorder = true;
        db.products().insert(&product).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let outcome = StockLedger::apply(&mut tx, &change(&product.id, -3, MovementType::Sale))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome.movement().unwrap().quantity_after, -2);
    }

    #[tokio::test]
    async fn test_untracked_and_missing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut product = fixtures::product("SERVICE", 5000, 0);
        product.track_inventory = false;
        db.products().insert(&product).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let untracked = StockLedger::apply(&mut tx, &change(&product.id, -1, MovementType::Sale))
            .await
            .unwrap();
        let missing = StockLedger::apply(&mut tx, &change("ghost", -1, MovementType::Sale))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(untracked, StockOutcome::Untracked));
        assert!(matches!(missing, StockOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_adjust_rejects_sale_movements() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = fixtures::product("SOAP", 2500, 5);
        db.products().insert(&product).await.unwrap();

        let err = db
            .stock()
            .adjust(&change(&product.id, -1, MovementType::Sale))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation(_)));

        let movement = db
            .stock()
            .adjust(&change(&product.id, 20, MovementType::Purchase))
            .await
            .unwrap();
        assert_eq!(movement.quantity_after, 25);
    }

    #[tokio::test]
    async fn test_count_and_replay() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = fixtures::product("SOAP", 2500, 10);
        db.products().insert(&product).await.unwrap();

        db.stock()
            .adjust(&change(&product.id, -2, MovementType::Damage))
            .await
            .unwrap();
        let counted = db
            .stock()
            .count(&product.id, 5, None, Some("shelf count"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counted.quantity, -3);
        assert_eq!(counted.quantity_before, 8);

        assert!(db
            .stock()
            .count(&product.id, 5, None, None)
            .await
            .unwrap()
            .is_none());

        let report = db.stock().verify_replay(&product.id).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.opening, 10);
        assert_eq!(report.replayed, 5);
        assert_eq!(report.entries, 2);
    }

    #[tokio::test]
    async fn test_replay_detects_drift() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = fixtures::product("SOAP", 2500, 10);
        db.products().insert(&product).await.unwrap();
        db.stock()
            .adjust(&change(&product.id, 5, MovementType::Purchase))
            .await
            .unwrap();

        sqlx::query("UPDATE products SET current_stock = 99 WHERE id = ?1")
            .bind(&product.id)
            .execute(db.pool())
            .await
            .unwrap();

        let report = db.stock().verify_replay(&product.id).await.unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.replayed, 15);
        assert_eq!(report.current, 99);
    }
}

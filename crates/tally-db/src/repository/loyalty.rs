//! # Loyalty Ledger
//!
//! Point balances (`customers.loyalty_points`) plus the append-only
//! `loyalty_points_history` that explains them. Same shape as the
//! [`StockLedger`](super::stock::StockLedger): one guarded update with
//! `RETURNING`, then the history row.
//!
//! Reversals pass `allow_negative` so points earned on a voided sale are
//! taken back even if the customer already spent them.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::customer::CustomerRepository;
use tally_core::ledger::{self, LedgerReplay, LoyaltyEntry, LoyaltyTransactionType};

const ENTRY_COLUMNS: &str =
    "id, customer_id, transaction_type, points, balance_after, reference_id, notes, created_at";

/// A requested change to one customer's points.
#[derive(Debug, Clone)]
pub struct LoyaltyChange {
    pub customer_id: String,
    /// Signed delta.
    pub points: i64,
    pub transaction_type: LoyaltyTransactionType,
    pub reference_id: Option<String>,
    pub notes: Option<String>,
    /// Let the balance go below zero.
    pub allow_negative: bool,
}

#[derive(Debug, Clone)]
pub enum LoyaltyOutcome {
    Applied(LoyaltyEntry),
    Insufficient { available: i64 },
    NotFound,
}

impl LoyaltyOutcome {
    pub fn entry(&self) -> Option<&LoyaltyEntry> {
        match self {
            LoyaltyOutcome::Applied(entry) => Some(entry),
            _ => None,
        }
    }
}

/// The Loyalty Ledger.
#[derive(Debug, Clone)]
pub struct LoyaltyLedger {
    pool: SqlitePool,
}

impl LoyaltyLedger {
    pub fn new(pool: SqlitePool) -> Self {
        LoyaltyLedger { pool }
    }

    /// Applies one change on the caller's connection.
    pub async fn apply(
        conn: &mut SqliteConnection,
        change: &LoyaltyChange,
    ) -> DbResult<LoyaltyOutcome> {
        let now = Utc::now();

        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE customers
            SET loyalty_points = loyalty_points + ?2, updated_at = ?4
            WHERE id = ?1 AND (?3 = 1 OR loyalty_points + ?2 >= 0)
            RETURNING loyalty_points
            "#,
        )
        .bind(&change.customer_id)
        .bind(change.points)
        .bind(change.allow_negative)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(balance) = balance else {
            let customer = CustomerRepository::fetch(&mut *conn, &change.customer_id).await?;
            return Ok(match customer {
                None => LoyaltyOutcome::NotFound,
                Some(c) => LoyaltyOutcome::Insufficient {
                    available: c.loyalty_points,
                },
            });
        };

        let entry = LoyaltyEntry {
            id: Uuid::new_v4().to_string(),
            customer_id: change.customer_id.clone(),
            transaction_type: change.transaction_type,
            points: change.points,
            balance_after: balance,
            reference_id: change.reference_id.clone(),
            notes: change.notes.clone(),
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO loyalty_points_history (
                id, customer_id, transaction_type, points, balance_after,
                reference_id, notes, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.customer_id)
        .bind(entry.transaction_type)
        .bind(entry.points)
        .bind(entry.balance_after)
        .bind(&entry.reference_id)
        .bind(&entry.notes)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        if balance < 0 {
            warn!(customer_id = %entry.customer_id, balance = balance, "Loyalty balance is negative");
        }

        debug!(
            customer_id = %entry.customer_id,
            transaction_type = ?entry.transaction_type,
            points = entry.points,
            balance_after = entry.balance_after,
            "Loyalty entry recorded"
        );

        Ok(LoyaltyOutcome::Applied(entry))
    }

    async fn customer_history(
        conn: &mut SqliteConnection,
        customer_id: &str,
    ) -> DbResult<Vec<LoyaltyEntry>> {
        let sql = format!(
            "SELECT {} FROM loyalty_points_history WHERE customer_id = ?1 ORDER BY seq",
            ENTRY_COLUMNS
        );
        let entries = sqlx::query_as::<_, LoyaltyEntry>(&sql)
            .bind(customer_id)
            .fetch_all(conn)
            .await?;
        Ok(entries)
    }

    /// Manual adjustment or bonus outside a sale. Never goes negative.
    pub async fn adjust(
        &self,
        customer_id: &str,
        points: i64,
        transaction_type: LoyaltyTransactionType,
        notes: Option<&str>,
    ) -> DbResult<LoyaltyEntry> {
        if points == 0 {
            return Err(DbError::InvalidOperation(
                "Adjustment must change the balance".to_string(),
            ));
        }
        if matches!(
            transaction_type,
            LoyaltyTransactionType::Earn | LoyaltyTransactionType::Redeem
        ) {
            return Err(DbError::InvalidOperation(format!(
                "{:?} entries are recorded by the sale flow",
                transaction_type
            )));
        }

        let change = LoyaltyChange {
            customer_id: customer_id.to_string(),
            points,
            transaction_type,
            reference_id: None,
            notes: notes.map(str::to_string),
            allow_negative: false,
        };

        let mut tx = self.pool.begin().await?;
        let entry = match Self::apply(&mut tx, &change).await? {
            LoyaltyOutcome::Applied(entry) => entry,
            LoyaltyOutcome::NotFound => return Err(DbError::not_found("Customer", customer_id)),
            LoyaltyOutcome::Insufficient { available } => {
                return Err(DbError::InvalidOperation(format!(
                    "Insufficient points: {} available, {} requested",
                    available, -points
                )))
            }
        };
        tx.commit().await?;

        info!(
            customer_id = %customer_id,
            points = points,
            balance_after = entry.balance_after,
            "Loyalty points adjusted"
        );
        Ok(entry)
    }

    /// A customer's history in creation order.
    pub async fn history(&self, customer_id: &str) -> DbResult<Vec<LoyaltyEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::customer_history(&mut conn, customer_id).await
    }

    /// Replays a customer's history against their balance.
    pub async fn verify_replay(&self, customer_id: &str) -> DbResult<LedgerReplay> {
        let mut tx = self.pool.begin().await?;

        let customer = CustomerRepository::fetch(&mut tx, customer_id)
            .await?
            .ok_or_else(|| DbError::not_found("Customer", customer_id))?;
        let entries = Self::customer_history(&mut tx, customer_id).await?;
        tx.commit().await?;

        let report = ledger::replay(&entries, customer.loyalty_points);
        if !report.is_consistent() {
            warn!(
                customer_id = %customer_id,
                replayed = report.replayed,
                current = report.current,
                broken_at = ?report.broken_at,
                "Loyalty ledger does not replay"
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

    fn change(customer_id: &str, points: i64, allow_negative: bool) -> LoyaltyChange {
        LoyaltyChange {
            customer_id: customer_id.to_string(),
            points,
            transaction_type: if points >= 0 {
                LoyaltyTransactionType::Earn
            } else {
                LoyaltyTransactionType::Redeem
            },
            reference_id: Some("sale-1".to_string()),
            notes: None,
            allow_negative,
        }
    }

    #[tokio::test]
    async fn test_earn_then_redeem() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let customer = fixtures::customer(100);
        db.customers().insert(&customer).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let earned = LoyaltyLedger::apply(&mut tx, &change(&customer.id, 22, false))
            .await
            .unwrap();
        let redeemed = LoyaltyLedger::apply(&mut tx, &change(&customer.id, -50, false))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(earned.entry().unwrap().balance_after, 122);
        assert_eq!(redeemed.entry().unwrap().balance_after, 72);

        let history = db.loyalty().history(&customer.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].points, 22);

        let report = db.loyalty().verify_replay(&customer.id).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.opening, 100);
    }

    #[tokio::test]
    async fn test_overdraw_refused_unless_allowed() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let customer = fixtures::customer(10);
        db.customers().insert(&customer).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let refused = LoyaltyLedger::apply(&mut tx, &change(&customer.id, -20, false))
            .await
            .unwrap();
        let forced = LoyaltyLedger::apply(&mut tx, &change(&customer.id, -20, true))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(refused, LoyaltyOutcome::Insufficient { available: 10 }));
        assert_eq!(forced.entry().unwrap().balance_after, -10);
    }

    #[tokio::test]
    async fn test_unknown_customer() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        let outcome = LoyaltyLedger::apply(&mut tx, &change("ghost", 5, false))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(matches!(outcome, LoyaltyOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_adjust() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let customer = fixtures::customer(5);
        db.customers().insert(&customer).await.unwrap();

        let entry = db
            .loyalty()
            .adjust(&customer.id, 50, LoyaltyTransactionType::Bonus, Some("birthday"))
            .await
            .unwrap();
        assert_eq!(entry.balance_after, 55);

        let err = db
            .loyalty()
            .adjust(&customer.id, -100, LoyaltyTransactionType::Adjust, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation(_)));

        let err = db
            .loyalty()
            .adjust(&customer.id, 5, LoyaltyTransactionType::Earn, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidOperation(_)));
    }
}

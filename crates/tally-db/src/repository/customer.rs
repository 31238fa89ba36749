//! # Customer Repository
//!
//! Customer reads and the spend/transaction counters a sale updates. The
//! point balance is owned by the [`LoyaltyLedger`](super::loyalty::LoyaltyLedger).

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::Customer;

const CUSTOMER_COLUMNS: &str = "id, name, membership_tier_id, customer_group_id, loyalty_points, \
     lifetime_spend_cents, total_transactions, is_active, created_at, updated_at";

/// Repository for customer database operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Loads a customer on the caller's connection.
    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Customer>> {
        let sql = format!("SELECT {} FROM customers WHERE id = ?1", CUSTOMER_COLUMNS);
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(customer)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Customer>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    pub async fn insert(&self, customer: &Customer) -> DbResult<()> {
        debug!(id = %customer.id, "Inserting customer");

        sqlx::query(
            r#"
            INSERT INTO customers (
                id, name, membership_tier_id, customer_group_id, loyalty_points,
                lifetime_spend_cents, total_transactions, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.name)
        .bind(&customer.membership_tier_id)
        .bind(&customer.customer_group_id)
        .bind(customer.loyalty_points)
        .bind(customer.lifetime_spend_cents)
        .bind(customer.total_transactions)
        .bind(customer.is_active)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Adds to lifetime spend and transaction count in one statement.
    ///
    /// A sale passes `(+total, +1)`; its reversal passes `(−total, −1)`.
    pub async fn record_purchase(
        conn: &mut SqliteConnection,
        id: &str,
        spend_delta_cents: i64,
        transactions_delta: i64,
    ) -> DbResult<()> {
        debug!(
            customer_id = %id,
            spend_delta = spend_delta_cents,
            transactions_delta = transactions_delta,
            "Updating customer totals"
        );

        let result = sqlx::query(
            r#"
            UPDATE customers
            SET lifetime_spend_cents = lifetime_spend_cents + ?2,
                total_transactions = total_transactions + ?3,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(spend_delta_cents)
        .bind(transactions_delta)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Customer", id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

//! # Sale Repository
//!
//! The sale aggregate: header, items, discount breakdown and payments, plus
//! the per-day invoice sequence.
//!
//! ## Status Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   insert_header ──► Pending ──mark_completed──► Completed               │
//! │                                                    │                    │
//! │                             transition(Void) ──────┼──► Voided          │
//! │                             transition(Refund) ────┴──► Refunded        │
//! │                                                                         │
//! │   Every transition is `UPDATE … WHERE status = <expected>`; zero rows   │
//! │   affected means another writer got there first.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::{Payment, Sale, SaleDetail, SaleDiscount, SaleItem, SaleStatus};

const SALE_COLUMNS: &str = "id, invoice_number, customer_id, operator_id, status, \
     subtotal_cents, discount_cents, tax_cents, points_value_cents, total_cents, \
     payment_method, amount_tendered_cents, change_cents, is_vat_exempt, vat_exempt_reason, \
     points_earned, points_redeemed, voided_by, void_authorized_by, void_reason, voided_at, \
     refunded_by, refund_authorized_by, refund_reason, refund_amount_cents, refunded_at, \
     created_at, updated_at, completed_at";

const ITEM_COLUMNS: &str = "id, sale_id, product_id, sku_snapshot, name_snapshot, quantity, \
     unit_price_cents, discount_cents, discount_type, tax_cents, line_subtotal_cents, \
     line_total_cents, quantity_refunded, created_at";

const DISCOUNT_COLUMNS: &str = "id, sale_id, sale_item_id, kind, name, percentage_bps, \
     amount_cents, source_id, approved_by, government_id_number, created_at";

const PAYMENT_COLUMNS: &str =
    "id, sale_id, method, amount_cents, tendered_cents, change_cents, reference, created_at";

/// A reversal applied to a completed sale.
#[derive(Debug, Clone)]
pub enum Transition {
    Void {
        by: String,
        authorized_by: String,
        reason: String,
        at: DateTime<Utc>,
    },
    Refund {
        by: String,
        authorized_by: String,
        reason: String,
        amount_cents: i64,
        at: DateTime<Utc>,
    },
}

impl Transition {
    pub fn target_status(&self) -> SaleStatus {
        match self {
            Transition::Void { .. } => SaleStatus::Voided,
            Transition::Refund { .. } => SaleStatus::Refunded,
        }
    }
}

/// Formats an invoice number: `{prefix}-{YYYYMMDD}-{seq:04}`.
pub fn format_invoice_number(prefix: &str, day: NaiveDate, seq: i64) -> String {
    format!("{}-{}-{:04}", prefix, day.format("%Y%m%d"), seq)
}

/// Repository for the sale aggregate.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    // =========================================================================
    // Invoice numbers
    // =========================================================================

    /// Issues the next invoice number for `day`.
    ///
    /// The upsert is the first write of a sale transaction, so concurrent
    /// sales queue on it and never see the same value.
    pub async fn allocate_invoice_number(
        conn: &mut SqliteConnection,
        prefix: &str,
        day: NaiveDate,
    ) -> DbResult<String> {
        let key = day.format("%Y%m%d").to_string();
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_sequences (day, last_value) VALUES (?1, 1)
            ON CONFLICT(day) DO UPDATE SET last_value = last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(&key)
        .fetch_one(conn)
        .await?;

        Ok(format_invoice_number(prefix, day, seq))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts the header. Status must be `Pending`; totals are final.
    pub async fn insert_header(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        if sale.status != SaleStatus::Pending {
            return Err(DbError::InvalidOperation(format!(
                "Sale {} must be inserted as pending, not {}",
                sale.id, sale.status
            )));
        }

        debug!(sale_id = %sale.id, invoice = %sale.invoice_number, "Inserting sale header");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, invoice_number, customer_id, operator_id, status,
                subtotal_cents, discount_cents, tax_cents, points_value_cents, total_cents,
                payment_method, amount_tendered_cents, change_cents,
                is_vat_exempt, vat_exempt_reason, points_earned, points_redeemed,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.invoice_number)
        .bind(&sale.customer_id)
        .bind(&sale.operator_id)
        .bind(sale.status)
        .bind(sale.subtotal_cents)
        .bind(sale.discount_cents)
        .bind(sale.tax_cents)
        .bind(sale.points_value_cents)
        .bind(sale.total_cents)
        .bind(sale.payment_method)
        .bind(sale.amount_tendered_cents)
        .bind(sale.change_cents)
        .bind(sale.is_vat_exempt)
        .bind(&sale.vat_exempt_reason)
        .bind(sale.points_earned)
        .bind(sale.points_redeemed)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn insert_item(conn: &mut SqliteConnection, item: &SaleItem) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, product_id, sku_snapshot, name_snapshot, quantity,
                unit_price_cents, discount_cents, discount_type, tax_cents,
                line_subtotal_cents, line_total_cents, quantity_refunded, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(&item.sku_snapshot)
        .bind(&item.name_snapshot)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.discount_cents)
        .bind(item.discount_type)
        .bind(item.tax_cents)
        .bind(item.line_subtotal_cents)
        .bind(item.line_total_cents)
        .bind(item.quantity_refunded)
        .bind(item.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn insert_discount(
        conn: &mut SqliteConnection,
        discount: &SaleDiscount,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sale_discounts (
                id, sale_id, sale_item_id, kind, name, percentage_bps, amount_cents,
                source_id, approved_by, government_id_number, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&discount.id)
        .bind(&discount.sale_id)
        .bind(&discount.sale_item_id)
        .bind(discount.kind)
        .bind(&discount.name)
        .bind(discount.percentage_bps)
        .bind(discount.amount_cents)
        .bind(&discount.source_id)
        .bind(&discount.approved_by)
        .bind(&discount.government_id_number)
        .bind(discount.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn insert_payment(conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, sale_id, method, amount_cents, tendered_cents, change_cents,
                reference, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.sale_id)
        .bind(payment.method)
        .bind(payment.amount_cents)
        .bind(payment.tendered_cents)
        .bind(payment.change_cents)
        .bind(&payment.reference)
        .bind(payment.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Pending → Completed.
    pub async fn mark_completed(
        conn: &mut SqliteConnection,
        id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sales
            SET status = 'completed', completed_at = ?2, updated_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::InvalidOperation(format!(
                "Sale {} is not pending",
                id
            )));
        }
        Ok(())
    }

    /// Completed → Voided / Refunded.
    ///
    /// Returns `false` when the sale wasn't completed; the caller reads the
    /// current status to report why.
    pub async fn transition(
        conn: &mut SqliteConnection,
        id: &str,
        transition: &Transition,
    ) -> DbResult<bool> {
        let result = match transition {
            Transition::Void {
                by,
                authorized_by,
                reason,
                at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE sales
                    SET status = 'voided', voided_by = ?2, void_authorized_by = ?3,
                        void_reason = ?4, voided_at = ?5, updated_at = ?5
                    WHERE id = ?1 AND status = 'completed'
                    "#,
                )
                .bind(id)
                .bind(by)
                .bind(authorized_by)
                .bind(reason)
                .bind(at)
                .execute(conn)
                .await?
            }
            Transition::Refund {
                by,
                authorized_by,
                reason,
                amount_cents,
                at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE sales
                    SET status = 'refunded', refunded_by = ?2, refund_authorized_by = ?3,
                        refund_reason = ?4, refund_amount_cents = ?5, refunded_at = ?6,
                        updated_at = ?6
                    WHERE id = ?1 AND status = 'completed'
                    "#,
                )
                .bind(id)
                .bind(by)
                .bind(authorized_by)
                .bind(reason)
                .bind(amount_cents)
                .bind(at)
                .execute(conn)
                .await?
            }
        };

        let applied = result.rows_affected() == 1;
        debug!(
            sale_id = %id,
            target = %transition.target_status(),
            applied = applied,
            "Sale transition"
        );
        Ok(applied)
    }

    /// Marks every item as fully refunded.
    pub async fn mark_items_refunded(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<u64> {
        let result = sqlx::query("UPDATE sale_items SET quantity_refunded = quantity WHERE sale_id = ?1")
            .bind(sale_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {} FROM sales WHERE id = ?1", SALE_COLUMNS);
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(sale)
    }

    pub async fn status(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<SaleStatus>> {
        let status = sqlx::query_scalar::<_, SaleStatus>("SELECT status FROM sales WHERE id = ?1")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(status)
    }

    pub async fn items(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let sql = format!(
            "SELECT {} FROM sale_items WHERE sale_id = ?1 ORDER BY rowid",
            ITEM_COLUMNS
        );
        let items = sqlx::query_as::<_, SaleItem>(&sql)
            .bind(sale_id)
            .fetch_all(conn)
            .await?;
        Ok(items)
    }

    pub async fn discounts(
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<Vec<SaleDiscount>> {
        let sql = format!(
            "SELECT {} FROM sale_discounts WHERE sale_id = ?1 ORDER BY rowid",
            DISCOUNT_COLUMNS
        );
        let discounts = sqlx::query_as::<_, SaleDiscount>(&sql)
            .bind(sale_id)
            .fetch_all(conn)
            .await?;
        Ok(discounts)
    }

    pub async fn payments(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE sale_id = ?1 ORDER BY rowid",
            PAYMENT_COLUMNS
        );
        let payments = sqlx::query_as::<_, Payment>(&sql)
            .bind(sale_id)
            .fetch_all(conn)
            .await?;
        Ok(payments)
    }

    /// Header, items, discounts and payments.
    pub async fn detail(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<SaleDetail>> {
        let Some(sale) = Self::fetch(&mut *conn, id).await? else {
            return Ok(None);
        };
        let items = Self::items(&mut *conn, id).await?;
        let discounts = Self::discounts(&mut *conn, id).await?;
        let payments = Self::payments(&mut *conn, id).await?;

        Ok(Some(SaleDetail {
            sale,
            items,
            discounts,
            payments,
        }))
    }

    /// Hydrated sale read in one read transaction.
    pub async fn get_detail(&self, id: &str) -> DbResult<Option<SaleDetail>> {
        let mut tx = self.pool.begin().await?;
        let detail = Self::detail(&mut tx, id).await?;
        tx.commit().await?;
        Ok(detail)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    pub async fn find_by_invoice(&self, invoice_number: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {} FROM sales WHERE invoice_number = ?1", SALE_COLUMNS);
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(invoice_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

//! # Product Repository
//!
//! Catalog reads for the sale engine. Stock changes never go through here;
//! they belong to the [`StockLedger`](super::stock::StockLedger).

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tally_core::Product;

pub(crate) const PRODUCT_COLUMNS: &str = "id, sku, name, category_id, price_cents, cost_cents, \
     tax_rate_bps, is_taxable, is_vat_exempt_eligible, track_inventory, allow_backorder, \
     current_stock, is_active, created_at, updated_at";

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Loads a product, active or not, on the caller's connection.
    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(product)
    }

    /// Gets a product by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    /// Gets a product by SKU.
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE sku = ?1", PRODUCT_COLUMNS);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Inserts a product with its opening stock.
    ///
    /// Opening stock is not a ledger movement; the ledger replays from the
    /// first movement's `quantity_before`.
    pub async fn insert(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, category_id, price_cents, cost_cents,
                tax_rate_bps, is_taxable, is_vat_exempt_eligible,
                track_inventory, allow_backorder, current_stock, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.category_id)
        .bind(product.price_cents)
        .bind(product.cost_cents)
        .bind(product.tax_rate_bps)
        .bind(product.is_taxable)
        .bind(product.is_vat_exempt_eligible)
        .bind(product.track_inventory)
        .bind(product.allow_backorder)
        .bind(product.current_stock)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of products in the catalog.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

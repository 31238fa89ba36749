//! # Repository Module
//!
//! Database repository implementations for Tally.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Pool vs Transaction Access                           │
//! │                                                                         │
//! │  db.stock().movements(&id)            ← &self, uses the pool           │
//! │                                                                         │
//! │  let mut tx = db.begin().await?;                                       │
//! │  StockLedger::apply(&mut tx, &change) ← associated fn, borrows the     │
//! │  LoyaltyLedger::apply(&mut tx, …)       caller's transaction           │
//! │  tx.commit().await?;                                                   │
//! │                                                                         │
//! │  Everything one sale writes goes through the second form, so it all    │
//! │  commits or rolls back together.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`product::ProductRepository`] - Catalog reads
//! - [`customer::CustomerRepository`] - Customer reads and spend totals
//! - [`operator::OperatorRepository`] - Operators and their PIN hashes
//! - [`discount::DiscountRepository`] - Discount configuration and promotion usage
//! - [`stock::StockLedger`] - Quantity on hand plus stock movements
//! - [`loyalty::LoyaltyLedger`] - Point balances plus points history
//! - [`sale::SaleRepository`] - Sale aggregate and invoice numbers

pub mod customer;
pub mod discount;
pub mod loyalty;
pub mod operator;
pub mod product;
pub mod sale;
pub mod stock;

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared builders for repository tests.

    use chrono::Utc;
    use tally_core::{Customer, Operator, Product, Role};
    use uuid::Uuid;

    pub fn product(sku: &str, price_cents: i64, stock: i64) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4().to_string(),
            sku: sku.to_string(),
            name: format!("{} item", sku),
            category_id: None,
            price_cents,
            cost_cents: Some(price_cents / 2),
            tax_rate_bps: 1200,
            is_taxable: true,
            is_vat_exempt_eligible: true,
            track_inventory: true,
            allow_backorder: false,
            current_stock: stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn customer(points: i64) -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4().to_string(),
            name: "Juan Dela Cruz".to_string(),
            membership_tier_id: None,
            customer_group_id: None,
            loyalty_points: points,
            lifetime_spend_cents: 0,
            total_transactions: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn operator(role: Role) -> Operator {
        Operator {
            id: Uuid::new_v4().to_string(),
            name: "Maria".to_string(),
            role,
            pin_hash: None,
            can_authorize_void: false,
            can_authorize_refund: false,
            can_authorize_discount: false,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

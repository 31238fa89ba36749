//! # Void and Refund
//!
//! Reverses a completed sale in one transaction.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate reason ─► acting operator ─► sale exists? ─► authorize        │
//! │                                        (pool, before BEGIN)             │
//! │  BEGIN                                                                  │
//! │   1. completed ─► voided / refunded    (first write; 0 rows ─► error)   │
//! │   2. Stock Ledger: `return` movement for every `sale` movement          │
//! │   3. Loyalty Ledger: `adjust` −earned, +redeemed                        │
//! │      customer spend −total, transactions −1                             │
//! │   4. promotion usage given back                                         │
//! │  COMMIT ─► SaleDetail                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reversals are deltas against the current counters, not a restore of the
//! values before the sale. Sales that touched the same product or customer
//! in between stay accounted for; a loyalty balance may go negative if the
//! earned points were spent in the meantime.

use chrono::Utc;
use tracing::{info, warn};

use tally_core::auth::AuthorizedAction;
use tally_core::ledger::{LoyaltyTransactionType, MovementType};
use tally_core::validation::validate_reason;
use tally_core::{DiscountKind, SaleDetail, SaleStatus};
use tally_db::{
    CustomerRepository, DbError, DiscountRepository, LoyaltyChange, LoyaltyLedger, LoyaltyOutcome,
    SaleRepository, StockChange, StockLedger, StockOutcome, Transition,
};

use crate::engine::SaleEngine;
use crate::error::{EngineError, EngineResult};
use crate::request::ReversalRequest;

/// Which reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reversal {
    Void,
    Refund,
}

impl Reversal {
    fn action(&self) -> AuthorizedAction {
        match self {
            Reversal::Void => AuthorizedAction::Void,
            Reversal::Refund => AuthorizedAction::Refund,
        }
    }
}

impl SaleEngine {
    /// Voids a completed sale.
    ///
    /// ## Errors
    /// - `BadRequest`: missing reason
    /// - `NotFound`: sale or supervisor missing
    /// - `Unauthorized` / `Forbidden`: see [`crate::authorizer`]
    /// - `InvalidState`: the sale isn't completed
    pub async fn void_sale(&self, req: ReversalRequest) -> EngineResult<SaleDetail> {
        self.reverse(req, Reversal::Void).await
    }

    /// Refunds a completed sale in full. Errors as for [`SaleEngine::void_sale`].
    pub async fn refund_sale(&self, req: ReversalRequest) -> EngineResult<SaleDetail> {
        self.reverse(req, Reversal::Refund).await
    }

    async fn reverse(&self, req: ReversalRequest, kind: Reversal) -> EngineResult<SaleDetail> {
        let reason = validate_reason(&req.reason)?;
        let operator = self.authorizer.acting_operator(&req.operator_id).await?;

        let sale = self
            .db
            .sales()
            .get_by_id(&req.sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", &req.sale_id))?;
        if sale.status != SaleStatus::Completed {
            return Err(EngineError::invalid_state(&sale.id, sale.status));
        }

        let authorization = self
            .authorizer
            .authorize(&operator, kind.action(), req.supervisor.as_ref())
            .await?;
        let authorized_by = authorization.authorizer_id().to_string();

        let now = Utc::now();
        let transition = match kind {
            Reversal::Void => Transition::Void {
                by: operator.id.clone(),
                authorized_by: authorized_by.clone(),
                reason: reason.clone(),
                at: now,
            },
            Reversal::Refund => Transition::Refund {
                by: operator.id.clone(),
                authorized_by: authorized_by.clone(),
                reason: reason.clone(),
                amount_cents: sale.total_cents,
                at: now,
            },
        };

        let mut tx = self.db.begin().await?;

        // The status flip comes first: a second reversal of the same sale
        // waits here and then finds it no longer completed.
        if !SaleRepository::transition(&mut tx, &sale.id, &transition).await? {
            let current = SaleRepository::status(&mut tx, &sale.id).await?;
            return Err(match current {
                Some(status) => EngineError::invalid_state(&sale.id, status),
                None => EngineError::not_found("Sale", &sale.id),
            });
        }
        if kind == Reversal::Refund {
            SaleRepository::mark_items_refunded(&mut tx, &sale.id).await?;
        }

        // Stock Ledger
        let movements = StockLedger::sale_movements(&mut tx, &sale.id).await?;
        for movement in &movements {
            let change = StockChange {
                product_id: movement.product_id.clone(),
                delta: -movement.quantity,
                movement_type: MovementType::Return,
                reference_id: Some(sale.id.clone()),
                operator_id: Some(operator.id.clone()),
                notes: Some(reason.clone()),
            };
            match StockLedger::apply(&mut tx, &change).await? {
                StockOutcome::Applied(_) => {}
                StockOutcome::Untracked => {
                    warn!(
                        sale_id = %sale.id,
                        product_id = %movement.product_id,
                        "Product no longer tracks inventory; stock not restored"
                    );
                }
                StockOutcome::Insufficient { .. } | StockOutcome::NotFound => {
                    return Err(EngineError::internal(format!(
                        "Cannot restore stock of {} for sale {}",
                        movement.product_id, sale.id
                    )));
                }
            }
        }

        // Loyalty Ledger and customer totals
        if let Some(customer_id) = &sale.customer_id {
            let legs = [
                (-sale.points_earned, "earned"),
                (sale.points_redeemed, "redeemed"),
            ];
            for (points, leg) in legs {
                if points == 0 {
                    continue;
                }
                let change = LoyaltyChange {
                    customer_id: customer_id.clone(),
                    points,
                    transaction_type: LoyaltyTransactionType::Adjust,
                    reference_id: Some(sale.id.clone()),
                    notes: Some(format!("Reversal of {} points: {}", leg, reason)),
                    allow_negative: true,
                };
                match LoyaltyLedger::apply(&mut tx, &change).await? {
                    LoyaltyOutcome::Applied(entry) if entry.balance_after < 0 => {
                        warn!(
                            sale_id = %sale.id,
                            customer_id = %customer_id,
                            balance = entry.balance_after,
                            "Loyalty balance negative after reversal"
                        );
                    }
                    LoyaltyOutcome::Applied(_) => {}
                    LoyaltyOutcome::Insufficient { .. } | LoyaltyOutcome::NotFound => {
                        return Err(EngineError::internal(format!(
                            "Cannot reverse points of customer {} for sale {}",
                            customer_id, sale.id
                        )));
                    }
                }
            }

            CustomerRepository::record_purchase(&mut tx, customer_id, -sale.total_cents, -1)
                .await?;
        }

        // Promotion usage
        let discounts = SaleRepository::discounts(&mut tx, &sale.id).await?;
        for discount in discounts.iter().filter(|d| d.kind == DiscountKind::Promotion) {
            if let Some(promotion_id) = &discount.source_id {
                DiscountRepository::decrement_usage(&mut tx, promotion_id).await?;
            }
        }

        let detail = SaleRepository::detail(&mut tx, &sale.id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", &sale.id))?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale.id,
            invoice = %sale.invoice_number,
            status = %detail.sale.status,
            operator_id = %operator.id,
            authorized_by = %authorized_by,
            restored_lines = movements.len(),
            "Sale reversed"
        );

        Ok(detail)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::request::{LineRequest, ReversalRequest};
    use crate::testing::{Harness, SUPERVISOR_PIN};
    use chrono::{Duration, Utc};
    use tally_core::ledger::{LoyaltyTransactionType, MovementType};
    use tally_core::promotion::{Promotion, PromotionReward, PromotionTarget};
    use tally_core::{Money, SaleStatus};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_void_restores_stock_and_points() {
        let h = Harness::new().await;
        let customer = h.customer(50, None).await;
        let product = h.product("OIL", 10000, 10).await;

        let mut req = h.cash_sale(vec![LineRequest::new(&product.id, 2)], 21400);
        req.customer_id = Some(customer.id.clone());
        req.points_to_redeem = 10;
        let created = h.engine.create_sale(req).await.unwrap();
        assert_eq!(h.stock_of(&product.id).await, 8);
        assert_eq!(h.customer_state(&customer.id).await.loyalty_points, 42);

        let voided = h
            .engine
            .void_sale(h.reversal(&created.sale.id, "Customer changed mind"))
            .await
            .unwrap();

        let sale = &voided.sale;
        assert_eq!(sale.status, SaleStatus::Voided);
        assert_eq!(sale.voided_by.as_deref(), Some(h.manager.id.as_str()));
        assert_eq!(sale.void_authorized_by.as_deref(), Some(h.manager.id.as_str()));
        assert_eq!(sale.void_reason.as_deref(), Some("Customer changed mind"));
        assert!(sale.voided_at.is_some());

        assert_eq!(h.stock_of(&product.id).await, 10);
        let after = h.customer_state(&customer.id).await;
        assert_eq!(after.loyalty_points, 50);
        assert_eq!(after.lifetime_spend_cents, 0);
        assert_eq!(after.total_transactions, 0);

        let movements = h.db.stock().movements(&product.id).await.unwrap();
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[1].movement_type, MovementType::Return);
        assert_eq!(movements[1].quantity, 2);
        assert_eq!(movements[1].notes.as_deref(), Some("Customer changed mind"));

        let history = h.db.loyalty().history(&customer.id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert!(history[2..]
            .iter()
            .all(|e| e.transaction_type == LoyaltyTransactionType::Adjust));

        assert!(h.db.stock().verify_replay(&product.id).await.unwrap().is_consistent());
        assert!(h.db.loyalty().verify_replay(&customer.id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_second_void_fails_without_double_restore() {
        let h = Harness::new().await;
        let product = h.product("RICE", 10000, 10).await;
        let created = h
            .engine
            .create_sale(h.cash_sale(vec![LineRequest::new(&product.id, 3)], 40000))
            .await
            .unwrap();

        h.engine
            .void_sale(h.reversal(&created.sale.id, "Wrong item"))
            .await
            .unwrap();
        let err = h
            .engine
            .void_sale(h.reversal(&created.sale.id, "Wrong item"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
        assert!(err.message.contains("voided"));

        let err = h
            .engine
            .refund_sale(h.reversal(&created.sale.id, "Wrong item"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);

        assert_eq!(h.stock_of(&product.id).await, 10);
        assert_eq!(h.db.stock().movements(&product.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refund_freezes_amount_and_marks_items() {
        let h = Harness::new().await;
        let product = h.product("SOAP", 2200, 10).await;
        let created = h
            .engine
            .create_sale(h.cash_sale(vec![LineRequest::new(&product.id, 2)], 5000))
            .await
            .unwrap();

        let refunded = h
            .engine
            .refund_sale(h.reversal(&created.sale.id, "Defective"))
            .await
            .unwrap();

        assert_eq!(refunded.sale.status, SaleStatus::Refunded);
        assert_eq!(refunded.sale.refund_amount_cents, Some(created.sale.total_cents));
        assert_eq!(refunded.sale.refund_reason.as_deref(), Some("Defective"));
        assert!(refunded.items.iter().all(|i| i.quantity_refunded == i.quantity));
        assert_eq!(h.stock_of(&product.id).await, 10);
    }

    #[tokio::test]
    async fn test_blank_reason_rejected_before_anything() {
        let h = Harness::new().await;
        let product = h.product("SOAP", 2200, 10).await;
        let created = h
            .engine
            .create_sale(h.cash_sale(vec![LineRequest::new(&product.id, 1)], 5000))
            .await
            .unwrap();

        let err = h
            .engine
            .void_sale(h.reversal(&created.sale.id, "   "))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.details[0].field, "reason");

        let sale = h.engine.get_sale(&created.sale.id).await.unwrap().sale;
        assert_eq!(sale.status, SaleStatus::Completed);
    }

    #[tokio::test]
    async fn test_cashier_needs_supervisor_pin() {
        let h = Harness::new().await;
        let product = h.product("SOAP", 2200, 10).await;
        let created = h
            .engine
            .create_sale(h.cash_sale(vec![LineRequest::new(&product.id, 1)], 5000))
            .await
            .unwrap();

        let mut req = ReversalRequest {
            sale_id: created.sale.id.clone(),
            operator_id: h.cashier.id.clone(),
            reason: "Double scan".to_string(),
            supervisor: None,
        };

        let err = h.engine.void_sale(req.clone()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);

        req.supervisor = Some(h.supervisor_credentials("0000"));
        let err = h.engine.void_sale(req.clone()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);

        assert_eq!(h.stock_of(&product.id).await, 9);

        req.supervisor = Some(h.supervisor_credentials(SUPERVISOR_PIN));
        let voided = h.engine.void_sale(req).await.unwrap();
        assert_eq!(voided.sale.voided_by.as_deref(), Some(h.cashier.id.as_str()));
        assert_eq!(
            voided.sale.void_authorized_by.as_deref(),
            Some(h.supervisor.id.as_str())
        );
        assert_eq!(h.stock_of(&product.id).await, 10);
    }

    #[tokio::test]
    async fn test_void_gives_coupon_back() {
        let h = Harness::new().await;
        let product = h.product("RICE", 60_000, 10).await;
        let now = Utc::now();
        let coupon = Promotion {
            id: Uuid::new_v4().to_string(),
            name: "Welcome".to_string(),
            code: Some("WELCOME50".to_string()),
            reward: PromotionReward::FixedAmount {
                amount: Money::from_cents(5000),
            },
            target: PromotionTarget::AllCustomers,
            min_purchase_cents: 0,
            max_discount_cents: None,
            priority: 0,
            is_stackable: true,
            is_active: true,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            usage_limit: Some(1),
            usage_count: 0,
        };
        h.db.discounts().insert_promotion(&coupon).await.unwrap();

        let mut req = h.cash_sale(vec![LineRequest::new(&product.id, 1)], 100_000);
        req.coupon_code = Some("WELCOME50".to_string());
        let first = h.engine.create_sale(req.clone()).await.unwrap();

        h.engine
            .void_sale(h.reversal(&first.sale.id, "Rung up twice"))
            .await
            .unwrap();
        let stored = h.db.discounts().get_promotion(&coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 0);

        let second = h.engine.create_sale(req).await.unwrap();
        assert_eq!(second.sale.discount_cents, 5000);
    }

    #[tokio::test]
    async fn test_unknown_sale_is_not_found() {
        let h = Harness::new().await;
        let err = h
            .engine
            .void_sale(h.reversal("missing", "Whatever"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_stock_conservation_across_operations() {
        let h = Harness::new().await;
        let product = h.product("CAN", 2800, 20).await;

        let mut sale_ids = Vec::new();
        for qty in [1, 4, 2] {
            let detail = h
                .engine
                .create_sale(h.cash_sale(vec![LineRequest::new(&product.id, qty)], 20000))
                .await
                .unwrap();
            sale_ids.push(detail.sale.id);
        }
        h.engine
            .void_sale(h.reversal(&sale_ids[1], "Void"))
            .await
            .unwrap();
        h.engine
            .refund_sale(h.reversal(&sale_ids[2], "Refund"))
            .await
            .unwrap();

        let report = h.db.stock().verify_replay(&product.id).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.opening, 20);
        assert_eq!(report.net_change(), -1);
        assert_eq!(h.stock_of(&product.id).await, 19);
    }
}

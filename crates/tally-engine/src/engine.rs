//! # Sale Engine
//!
//! Creates sales as one atomic database transaction.
//!
//! ## Create Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate request ─► acting operator ─► manual discount approval        │
//! │                                         (pool, before BEGIN)            │
//! │  BEGIN                                                                  │
//! │   1. allocate invoice number        (first write, takes writer lock)    │
//! │   2. load products, check stock     NotFound / BadRequest               │
//! │   3. customer + tier, evaluate discounts, price lines                   │
//! │   4. points redeemed / earned, settle payments                          │
//! │   5. insert header (pending) and items                                  │
//! │   6. Stock Ledger: one `sale` movement per tracked line                 │
//! │   7. customer totals, Loyalty Ledger `redeem` and `earn` legs           │
//! │   8. discount breakdown rows, promotion usage                           │
//! │   9. payments, pending ─► completed                                     │
//! │  COMMIT ─► SaleDetail                                                   │
//! │                                                                         │
//! │  Any error drops the transaction: nothing of the sale is left behind.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use tally_core::auth::AuthorizedAction;
use tally_core::discount::{CustomerContext, Evaluation, Evaluator};
use tally_core::ledger::{LoyaltyTransactionType, MovementType};
use tally_core::loyalty::LoyaltyPolicy;
use tally_core::pricing::{price_cart, PricingLine};
use tally_core::promotion::DiscountReason;
use tally_core::{
    CoreError, Customer, DiscountKind, Money, Operator, Payment, PaymentMethod, Product, Rate,
    Sale, SaleDetail, SaleDiscount, SaleItem, SaleStatus,
};
use tally_db::{
    CustomerRepository, Database, DbError, DiscountRepository, LoyaltyChange, LoyaltyLedger,
    LoyaltyOutcome, ProductRepository, SaleRepository, StockChange, StockLedger, StockOutcome,
};

use crate::authorizer::Authorizer;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::request::{CreateSaleRequest, PaymentRequest};

/// The Sale Transaction Engine.
///
/// Cheap to clone; clones share the database pool.
#[derive(Debug, Clone)]
pub struct SaleEngine {
    pub(crate) db: Database,
    pub(crate) config: EngineConfig,
    pub(crate) policy: LoyaltyPolicy,
    pub(crate) authorizer: Authorizer,
}

impl SaleEngine {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        let policy = config.loyalty_policy();
        SaleEngine {
            authorizer: Authorizer::new(db.clone()),
            db,
            config,
            policy,
        }
    }

    /// Opens the configured database and builds an engine on it.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        let db = Database::new(config.db_config()).await?;
        Ok(Self::new(db, config))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Rings up a sale and returns it fully hydrated and completed.
    ///
    /// ## Errors
    /// - `BadRequest`: invalid input, insufficient stock or points, short
    ///   payment, coupon not applicable
    /// - `NotFound`: product, customer or discount reason missing
    /// - `Unauthorized` / `Forbidden`: unknown operator, or a manual discount
    ///   needing approval the operator can't give
    pub async fn create_sale(&self, req: CreateSaleRequest) -> EngineResult<SaleDetail> {
        req.validate()?;
        let operator = self.authorizer.acting_operator(&req.operator_id).await?;
        let approvals = self.approve_line_discounts(&operator, &req).await?;

        let now = Utc::now();
        let sale_id = Uuid::new_v4().to_string();

        let mut tx = self.db.begin().await?;

        let invoice_number = SaleRepository::allocate_invoice_number(
            &mut tx,
            &self.config.invoice.prefix,
            now.date_naive(),
        )
        .await?;
        debug!(
            sale_id = %sale_id,
            invoice = %invoice_number,
            lines = req.lines.len(),
            "Creating sale"
        );

        // Catalog and stock
        let products = load_products(&mut tx, &req).await?;
        check_stock(&req, &products)?;

        // Customer
        let customer = match req.customer_id.as_deref() {
            Some(id) => Some(load_customer(&mut tx, id).await?),
            None => None,
        };
        let tier = match customer.as_ref().and_then(|c| c.membership_tier_id.as_deref()) {
            Some(tier_id) => DiscountRepository::tier(&mut tx, tier_id).await?,
            None => None,
        };

        // Pricing
        let settings = DiscountRepository::settings(&mut tx).await?;
        let promotions = DiscountRepository::active_promotions(&mut tx).await?;

        let pricing_lines: Vec<PricingLine> = req
            .lines
            .iter()
            .zip(&products)
            .map(|(line, product)| {
                PricingLine::from_product(
                    product,
                    line.quantity,
                    line.unit_price_cents.map(Money::from_cents),
                    line.manual_discount,
                )
            })
            .collect();
        let cart_lines = pricing_lines
            .iter()
            .map(PricingLine::to_cart_line)
            .collect::<Result<Vec<_>, CoreError>>()?;

        let context = CustomerContext {
            customer_id: customer.as_ref().map(|c| c.id.clone()),
            tier: tier.clone(),
            group_id: customer.as_ref().and_then(|c| c.customer_group_id.clone()),
            senior_citizen: req.senior_citizen,
            pwd: req.pwd,
        };
        let evaluation = Evaluator::new(&settings, &promotions).evaluate(
            &cart_lines,
            &context,
            req.coupon_code.as_deref(),
            now,
        )?;
        let priced = price_cart(pricing_lines, &evaluation, req.vat_exempt)?;

        // Points
        let mut totals = priced.totals;
        let mut points_earned = 0;
        if let Some(customer) = &customer {
            let value = self.policy.check_redemption(
                req.points_to_redeem,
                customer.loyalty_points,
                totals.payable_before_points(),
            )?;
            totals = totals.with_points(value);

            let multiplier = tier
                .as_ref()
                .filter(|t| t.is_active)
                .map_or(Rate::ONE, |t| t.points_multiplier());
            points_earned = self.policy.points_earned(totals.total, multiplier);
        }

        let settlement = settle(&req.payments, totals.total)?;

        // Header and items
        let sale = Sale {
            id: sale_id.clone(),
            invoice_number: invoice_number.clone(),
            customer_id: customer.as_ref().map(|c| c.id.clone()),
            operator_id: operator.id.clone(),
            status: SaleStatus::Pending,
            subtotal_cents: totals.subtotal.cents(),
            discount_cents: totals.discount.cents(),
            tax_cents: totals.tax.cents(),
            points_value_cents: totals.points_value.cents(),
            total_cents: totals.total.cents(),
            payment_method: settlement.method,
            amount_tendered_cents: settlement.tendered.cents(),
            change_cents: settlement.change.cents(),
            is_vat_exempt: priced.is_vat_exempt,
            vat_exempt_reason: vat_exempt_reason(&req, &evaluation, priced.is_vat_exempt),
            points_earned,
            points_redeemed: req.points_to_redeem,
            voided_by: None,
            void_authorized_by: None,
            void_reason: None,
            voided_at: None,
            refunded_by: None,
            refund_authorized_by: None,
            refund_reason: None,
            refund_amount_cents: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        SaleRepository::insert_header(&mut tx, &sale).await?;

        let mut items = Vec::with_capacity(priced.lines.len());
        for priced_line in &priced.lines {
            let line = &priced_line.line;
            let item = SaleItem {
                id: Uuid::new_v4().to_string(),
                sale_id: sale_id.clone(),
                product_id: line.product_id.clone(),
                sku_snapshot: line.sku.clone(),
                name_snapshot: line.name.clone(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price.cents(),
                discount_cents: priced_line.discount.cents(),
                discount_type: line.manual_discount.map(|d| d.kind()),
                tax_cents: priced_line.tax.cents(),
                line_subtotal_cents: priced_line.line_subtotal.cents(),
                line_total_cents: priced_line.line_total.cents(),
                quantity_refunded: 0,
                created_at: now,
            };
            SaleRepository::insert_item(&mut tx, &item).await?;
            items.push(item);
        }

        // Stock Ledger
        for (item, product) in items.iter().zip(&products) {
            if !product.track_inventory {
                continue;
            }
            let change = StockChange {
                product_id: item.product_id.clone(),
                delta: -item.quantity,
                movement_type: MovementType::Sale,
                reference_id: Some(sale_id.clone()),
                operator_id: Some(operator.id.clone()),
                notes: None,
            };
            match StockLedger::apply(&mut tx, &change).await? {
                StockOutcome::Applied(_) | StockOutcome::Untracked => {}
                StockOutcome::Insufficient { available } => {
                    return Err(CoreError::InsufficientStock {
                        sku: product.sku.clone(),
                        available,
                        requested: item.quantity,
                    }
                    .into());
                }
                StockOutcome::NotFound => {
                    return Err(EngineError::not_found("Product", &item.product_id));
                }
            }
        }

        // Customer totals and Loyalty Ledger
        if let Some(customer) = &customer {
            CustomerRepository::record_purchase(&mut tx, &customer.id, totals.total.cents(), 1)
                .await?;

            if sale.points_redeemed > 0 {
                apply_points(
                    &mut tx,
                    &LoyaltyChange {
                        customer_id: customer.id.clone(),
                        points: -sale.points_redeemed,
                        transaction_type: LoyaltyTransactionType::Redeem,
                        reference_id: Some(sale_id.clone()),
                        notes: Some(format!("Redeemed on {}", invoice_number)),
                        allow_negative: false,
                    },
                )
                .await?;
            }
            if points_earned > 0 {
                apply_points(
                    &mut tx,
                    &LoyaltyChange {
                        customer_id: customer.id.clone(),
                        points: points_earned,
                        transaction_type: LoyaltyTransactionType::Earn,
                        reference_id: Some(sale_id.clone()),
                        notes: Some(format!("Earned on {}", invoice_number)),
                        allow_negative: false,
                    },
                )
                .await?;
            }
        }

        // Discount breakdown
        let mut discounts = Vec::new();
        for ((item, priced_line), line) in items.iter().zip(&priced.lines).zip(&req.lines) {
            let Some(manual) = priced_line.line.manual_discount else {
                continue;
            };
            if priced_line.discount.is_zero() {
                continue;
            }
            let reason = line
                .discount_reason_id
                .as_deref()
                .and_then(|id| approvals.reasons.get(id));
            discounts.push(SaleDiscount {
                id: Uuid::new_v4().to_string(),
                sale_id: sale_id.clone(),
                sale_item_id: Some(item.id.clone()),
                kind: DiscountKind::Manual,
                name: reason.map_or_else(|| "Manual discount".to_string(), |r| r.name.clone()),
                percentage_bps: manual.rate().map(|r| r.bps()),
                amount_cents: priced_line.discount.cents(),
                source_id: reason.map(|r| r.id.clone()),
                approved_by: reason
                    .filter(|r| r.requires_approval)
                    .and(approvals.approver.clone()),
                government_id_number: None,
                created_at: now,
            });
        }
        for applied in evaluation.applied() {
            discounts.push(SaleDiscount {
                id: Uuid::new_v4().to_string(),
                sale_id: sale_id.clone(),
                sale_item_id: None,
                kind: applied.kind,
                name: applied.name.clone(),
                percentage_bps: applied.rate.map(|r| r.bps()),
                amount_cents: applied.amount.cents(),
                source_id: Some(applied.source_id.clone()),
                approved_by: None,
                government_id_number: if applied.kind.is_government() {
                    req.government_id_number.clone()
                } else {
                    None
                },
                created_at: now,
            });
        }
        for discount in &discounts {
            SaleRepository::insert_discount(&mut tx, discount).await?;
        }

        for promotion_id in evaluation.promotion_ids() {
            if !DiscountRepository::increment_usage(&mut tx, promotion_id).await? {
                return Err(EngineError::bad_request(format!(
                    "Promotion {} has reached its usage limit",
                    promotion_id
                )));
            }
        }

        // Payments and completion
        for tender in &settlement.tenders {
            let payment = Payment {
                id: Uuid::new_v4().to_string(),
                sale_id: sale_id.clone(),
                method: tender.method,
                amount_cents: tender.applied.cents(),
                tendered_cents: tender.tendered.cents(),
                change_cents: tender.change.cents(),
                reference: tender.reference.clone(),
                created_at: now,
            };
            SaleRepository::insert_payment(&mut tx, &payment).await?;
        }

        SaleRepository::mark_completed(&mut tx, &sale_id, now).await?;

        let detail = SaleRepository::detail(&mut tx, &sale_id)
            .await?
            .ok_or_else(|| EngineError::internal(format!("Sale {} missing before commit", sale_id)))?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale_id,
            invoice = %invoice_number,
            total = totals.total.cents(),
            discount = totals.discount.cents(),
            points_earned = points_earned,
            points_redeemed = sale.points_redeemed,
            "Sale completed"
        );

        Ok(detail)
    }

    /// Loads the reasons behind manual line discounts and, when any of them
    /// needs approval, resolves who approved.
    async fn approve_line_discounts(
        &self,
        operator: &Operator,
        req: &CreateSaleRequest,
    ) -> EngineResult<LineApprovals> {
        let mut approvals = LineApprovals::default();
        if !req.has_manual_discounts() {
            return Ok(approvals);
        }

        let reason_ids = req
            .lines
            .iter()
            .filter(|l| l.manual_discount.is_some())
            .filter_map(|l| l.discount_reason_id.as_deref());
        for id in reason_ids {
            if approvals.reasons.contains_key(id) {
                continue;
            }
            let reason = self
                .db
                .discounts()
                .get_reason(id)
                .await?
                .filter(|r| r.is_active)
                .ok_or_else(|| EngineError::not_found("Discount reason", id))?;
            approvals.reasons.insert(id.to_string(), reason);
        }

        if approvals.reasons.values().any(|r| r.requires_approval) {
            let authorization = self
                .authorizer
                .authorize(
                    operator,
                    AuthorizedAction::Discount,
                    req.discount_authorization.as_ref(),
                )
                .await?;
            approvals.approver = Some(authorization.authorizer_id().to_string());
        }

        Ok(approvals)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Header, items, discount breakdown and payments of one sale.
    pub async fn get_sale(&self, sale_id: &str) -> EngineResult<SaleDetail> {
        self.db
            .sales()
            .get_detail(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))
    }

    pub async fn find_by_invoice(&self, invoice_number: &str) -> EngineResult<SaleDetail> {
        let sale = self
            .db
            .sales()
            .find_by_invoice(invoice_number)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", invoice_number))?;
        self.get_sale(&sale.id).await
    }
}

// =============================================================================
// Create helpers
// =============================================================================

/// Manual discount reasons used by a cart, plus who approved them.
#[derive(Debug, Default)]
struct LineApprovals {
    reasons: HashMap<String, DiscountReason>,
    approver: Option<String>,
}

/// One product per cart line, in line order.
async fn load_products(
    conn: &mut SqliteConnection,
    req: &CreateSaleRequest,
) -> EngineResult<Vec<Product>> {
    let mut cache: HashMap<String, Product> = HashMap::new();
    let mut products = Vec::with_capacity(req.lines.len());

    for line in &req.lines {
        let product = match cache.get(&line.product_id) {
            Some(product) => product.clone(),
            None => {
                let product = ProductRepository::fetch(&mut *conn, &line.product_id)
                    .await?
                    .filter(|p| p.is_active)
                    .ok_or_else(|| CoreError::ProductNotFound(line.product_id.clone()))?;
                cache.insert(line.product_id.clone(), product.clone());
                product
            }
        };
        products.push(product);
    }

    Ok(products)
}

/// Checks stock for the whole cart before anything is written, summing
/// lines that repeat a product.
fn check_stock(req: &CreateSaleRequest, products: &[Product]) -> EngineResult<()> {
    let mut requested: HashMap<&str, i64> = HashMap::new();
    for line in &req.lines {
        *requested.entry(line.product_id.as_str()).or_insert(0) += line.quantity;
    }

    for product in products {
        let quantity = requested.get(product.id.as_str()).copied().unwrap_or(0);
        if !product.can_sell(quantity) {
            debug!(
                product_id = %product.id,
                available = product.current_stock,
                requested = quantity,
                "Insufficient stock"
            );
            return Err(CoreError::InsufficientStock {
                sku: product.sku.clone(),
                available: product.current_stock,
                requested: quantity,
            }
            .into());
        }
    }

    Ok(())
}

async fn load_customer(conn: &mut SqliteConnection, customer_id: &str) -> EngineResult<Customer> {
    CustomerRepository::fetch(conn, customer_id)
        .await?
        .filter(|c| c.is_active)
        .ok_or_else(|| EngineError::not_found("Customer", customer_id))
}

async fn apply_points(
    conn: &mut SqliteConnection,
    change: &LoyaltyChange,
) -> EngineResult<()> {
    match LoyaltyLedger::apply(conn, change).await? {
        LoyaltyOutcome::Applied(_) => Ok(()),
        LoyaltyOutcome::Insufficient { available } => Err(CoreError::InsufficientPoints {
            available,
            requested: -change.points,
        }
        .into()),
        LoyaltyOutcome::NotFound => Err(EngineError::not_found("Customer", &change.customer_id)),
    }
}

fn vat_exempt_reason(
    req: &CreateSaleRequest,
    evaluation: &Evaluation,
    is_vat_exempt: bool,
) -> Option<String> {
    if !is_vat_exempt {
        return None;
    }
    req.vat_exempt_reason
        .clone()
        .filter(|r| !r.trim().is_empty())
        .or_else(|| evaluation.government.as_ref().map(|g| g.name.clone()))
}

// =============================================================================
// Payment settlement
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Tender {
    method: PaymentMethod,
    tendered: Money,
    applied: Money,
    change: Money,
    reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Settlement {
    tenders: Vec<Tender>,
    /// Header method: the single method used, or `Split`.
    method: PaymentMethod,
    tendered: Money,
    change: Money,
}

/// Applies tenders to `total`. Non-cash tenders go first and must not
/// overpay; cash covers the rest and returns the excess as change.
fn settle(payments: &[PaymentRequest], total: Money) -> EngineResult<Settlement> {
    if payments.iter().any(|p| p.method == PaymentMethod::Split) {
        return Err(EngineError::bad_request(
            "Split is not a payment method; list each tender instead",
        ));
    }

    let mut tenders: Vec<Tender> = payments
        .iter()
        .map(|p| Tender {
            method: p.method,
            tendered: Money::from_cents(p.tendered_cents),
            applied: Money::zero(),
            change: Money::zero(),
            reference: p.reference.clone(),
        })
        .collect();

    let mut remaining = total;
    for tender in tenders.iter_mut().filter(|t| t.method != PaymentMethod::Cash) {
        if tender.tendered > remaining {
            return Err(CoreError::InvalidPaymentAmount {
                reason: format!(
                    "non-cash payment of {} exceeds amount due {}",
                    tender.tendered, remaining
                ),
            }
            .into());
        }
        tender.applied = tender.tendered;
        remaining -= tender.tendered;
    }
    for tender in tenders.iter_mut().filter(|t| t.method == PaymentMethod::Cash) {
        tender.applied = tender.tendered.min(remaining);
        tender.change = tender.tendered - tender.applied;
        remaining -= tender.applied;
    }

    let tendered: Money = tenders.iter().map(|t| t.tendered).sum();
    if remaining.is_positive() {
        return Err(CoreError::InvalidPaymentAmount {
            reason: format!("tendered {} does not cover total {}", tendered, total),
        }
        .into());
    }

    let method = match tenders.first() {
        None => PaymentMethod::Cash,
        Some(first) if tenders.iter().all(|t| t.method == first.method) => first.method,
        Some(_) => PaymentMethod::Split,
    };
    let change = tenders.iter().map(|t| t.change).sum();

    Ok(Settlement {
        tenders,
        method,
        tendered,
        change,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::request::LineRequest;
    use crate::testing::{Harness, SUPERVISOR_PIN};
    use chrono::Duration;
    use tally_core::pricing::ManualDiscount;
    use tally_core::promotion::{GovernmentKind, Promotion, PromotionReward, PromotionTarget};

    fn card(cents: i64) -> PaymentRequest {
        PaymentRequest {
            method: PaymentMethod::Card,
            tendered_cents: cents,
            reference: Some("AUTH-1".to_string()),
        }
    }

    #[test]
    fn test_settle_cash_change() {
        let s = settle(&[PaymentRequest::cash(25000)], Money::from_cents(22400)).unwrap();
        assert_eq!(s.method, PaymentMethod::Cash);
        assert_eq!(s.change.cents(), 2600);
        assert_eq!(s.tenders[0].applied.cents(), 22400);
    }

    #[test]
    fn test_settle_split_tender() {
        let s = settle(
            &[PaymentRequest::cash(10000), card(15000)],
            Money::from_cents(22400),
        )
        .unwrap();
        assert_eq!(s.method, PaymentMethod::Split);
        assert_eq!(s.tendered.cents(), 25000);
        assert_eq!(s.tenders[1].applied.cents(), 15000);
        assert_eq!(s.tenders[0].applied.cents(), 7400);
        assert_eq!(s.change.cents(), 2600);
    }

    #[test]
    fn test_settle_rejects_short_and_card_overpay() {
        let err = settle(&[PaymentRequest::cash(20000)], Money::from_cents(22400)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err = settle(&[card(30000)], Money::from_cents(22400)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        let err = settle(&[], Money::from_cents(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);

        assert!(settle(&[], Money::zero()).is_ok());
    }

    #[tokio::test]
    async fn test_plain_sale_with_vat() {
        let h = Harness::new().await;
        let product = h.product("RICE", 10000, 10).await;

        let detail = h
            .engine
            .create_sale(h.cash_sale(vec![LineRequest::new(&product.id, 2)], 25000))
            .await
            .unwrap();

        let sale = &detail.sale;
        assert_eq!(sale.status, SaleStatus::Completed);
        assert_eq!(sale.subtotal_cents, 20000);
        assert_eq!(sale.discount_cents, 0);
        assert_eq!(sale.tax_cents, 2400);
        assert_eq!(sale.total_cents, 22400);
        assert_eq!(sale.change_cents, 2600);
        assert!(sale.completed_at.is_some());
        assert!(sale.invoice_number.starts_with("INV-"));
        assert!(sale.invoice_number.ends_with("-0001"));
        assert!(detail.reconciles());

        assert_eq!(detail.items.len(), 1);
        assert_eq!(detail.items[0].line_total_cents, 22400);
        assert_eq!(detail.payments.len(), 1);

        assert_eq!(h.stock_of(&product.id).await, 8);
        let movements = h.db.stock().movements(&product.id).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].quantity, -2);
        assert_eq!(movements[0].movement_type, MovementType::Sale);
        assert_eq!(movements[0].reference_id.as_deref(), Some(sale.id.as_str()));
    }

    #[tokio::test]
    async fn test_senior_citizen_vat_exempt_sale() {
        let h = Harness::new().await;
        h.government_settings().await;
        let product = h.product("MILK", 10000, 10).await;

        let mut req = h.cash_sale(vec![LineRequest::new(&product.id, 2)], 20000);
        req.senior_citizen = true;
        req.government_id_number = Some("SC-12345".to_string());

        let detail = h.engine.create_sale(req).await.unwrap();
        let sale = &detail.sale;
        assert_eq!(sale.discount_cents, 4000);
        assert_eq!(sale.tax_cents, 0);
        assert_eq!(sale.total_cents, 16000);
        assert!(sale.is_vat_exempt);
        assert_eq!(sale.vat_exempt_reason.as_deref(), Some("Senior Citizen"));

        assert_eq!(detail.discounts.len(), 1);
        assert_eq!(detail.discounts[0].kind, DiscountKind::SeniorCitizen);
        assert_eq!(detail.discounts[0].government_id_number.as_deref(), Some("SC-12345"));
        assert!(detail.reconciles());
    }

    #[tokio::test]
    async fn test_senior_discount_on_non_exemptible_product() {
        let h = Harness::new().await;
        h.government_settings().await;
        let product = h
            .product_with("SOAP", 10000, 10, |p| p.is_vat_exempt_eligible = false)
            .await;

        let mut req = h.cash_sale(vec![LineRequest::new(&product.id, 2)], 20000);
        req.senior_citizen = true;
        req.government_id_number = Some("SC-777".to_string());

        let detail = h.engine.create_sale(req).await.unwrap();
        let sale = &detail.sale;
        assert_eq!(sale.discount_cents, 4000);
        assert_eq!(sale.tax_cents, 0);
        assert_eq!(sale.total_cents, 16000);
        assert!(sale.is_vat_exempt);

        assert_eq!(detail.discounts.len(), 1);
        assert_eq!(detail.discounts[0].kind, DiscountKind::SeniorCitizen);
        assert_eq!(detail.discounts[0].government_id_number.as_deref(), Some("SC-777"));
        assert!(detail.reconciles());
    }

    #[tokio::test]
    async fn test_government_discount_without_vat_exemption() {
        let h = Harness::new().await;
        h.government_setting(GovernmentKind::Pwd, "PWD", 500, false).await;
        let product = h.product("BREAD", 10000, 10).await;

        let mut req = h.cash_sale(vec![LineRequest::new(&product.id, 2)], 30000);
        req.pwd = true;
        req.government_id_number = Some("PWD-42".to_string());

        let detail = h.engine.create_sale(req).await.unwrap();
        let sale = &detail.sale;
        assert_eq!(sale.discount_cents, 1000);
        assert_eq!(sale.tax_cents, 2400);
        assert_eq!(sale.total_cents, 21400);
        assert!(!sale.is_vat_exempt);
        assert_eq!(sale.vat_exempt_reason, None);
        assert_eq!(detail.discounts[0].kind, DiscountKind::Pwd);
        assert!(detail.reconciles());
    }

    #[tokio::test]
    async fn test_discount_precedence() {
        let h = Harness::new().await;
        h.government_settings().await;
        let tier = h.tier(1000, 10_000).await;
        let customer = h.customer(0, Some(&tier)).await;
        let product = h.product("MEDS", 10000, 10).await;

        let mut req = h.cash_sale(vec![LineRequest::new(&product.id, 2)], 20000);
        req.customer_id = Some(customer.id.clone());
        req.senior_citizen = true;
        req.pwd = true;
        req.government_id_number = Some("SC-1".to_string());

        let detail = h.engine.create_sale(req).await.unwrap();

        let kinds: Vec<DiscountKind> = detail.discounts.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DiscountKind::SeniorCitizen, DiscountKind::Membership]);
        // Membership base excludes the government discount: 10% of 160.00
        assert_eq!(detail.discounts[1].amount_cents, 1600);
        assert_eq!(detail.sale.discount_cents, 5600);
        assert_eq!(detail.sale.total_cents, 14400);
        assert_eq!(detail.sale.points_earned, 1);
        assert!(detail.reconciles());
    }

    #[tokio::test]
    async fn test_insufficient_stock_writes_nothing() {
        let h = Harness::new().await;
        let plenty = h.product("WATER", 2500, 50).await;
        let scarce = h.product("RICE", 10000, 2).await;

        let err = h
            .engine
            .create_sale(h.cash_sale(
                vec![LineRequest::new(&plenty.id, 1), LineRequest::new(&scarce.id, 5)],
                100_000,
            ))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert!(err.message.contains("Insufficient stock"));
        assert_eq!(h.count("stock_movements").await, 0);
        assert_eq!(h.count("sales").await, 0);
        assert_eq!(h.count("invoice_sequences").await, 0);
        assert_eq!(h.stock_of(&plenty.id).await, 50);
        assert_eq!(h.stock_of(&scarce.id).await, 2);
    }

    #[tokio::test]
    async fn test_backorder_allows_negative_stock() {
        let h = Harness::new().await;
        let product = h
            .product_with("PREORDER", 1000, 1, |p| p.allow_backorder = true)
            .await;

        let detail = h
            .engine
            .create_sale(h.cash_sale(vec![LineRequest::new(&product.id, 3)], 5000))
            .await
            .unwrap();
        assert_eq!(detail.sale.status, SaleStatus::Completed);
        assert_eq!(h.stock_of(&product.id).await, -2);

        let movements = h.db.stock().movements(&product.id).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::Sale);
        assert_eq!(movements[0].quantity, -3);
        assert_eq!(movements[0].quantity_before, 1);
        assert_eq!(movements[0].quantity_after, -2);
        assert!(h.db.stock().verify_replay(&product.id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_oversized_amounts_are_rejected() {
        let h = Harness::new().await;
        let product = h.product("GOLD", 1000, 10).await;

        let mut line = LineRequest::new(&product.id, 2);
        line.unit_price_cents = Some(i64::MAX / 2 + 1);
        let err = h
            .engine
            .create_sale(h.cash_sale(vec![line], 1000))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(err.details[0].field, "unit_price");

        // Catalog prices skip request validation; the line total still can't wrap
        let pricey = h.product("BULLION", i64::MAX / 2 + 1, 10).await;
        let err = h
            .engine
            .create_sale(h.cash_sale(vec![LineRequest::new(&pricey.id, 2)], 1000))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert!(err.message.contains("Amount too large"));

        assert_eq!(h.count("sales").await, 0);
        assert_eq!(h.count("invoice_sequences").await, 0);
        assert_eq!(h.stock_of(&pricey.id).await, 10);
    }

    #[tokio::test]
    async fn test_repeated_product_lines_are_summed() {
        let h = Harness::new().await;
        let product = h.product("EGGS", 1000, 3).await;

        let err = h
            .engine
            .create_sale(h.cash_sale(
                vec![LineRequest::new(&product.id, 2), LineRequest::new(&product.id, 2)],
                10_000,
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(h.stock_of(&product.id).await, 3);
    }

    #[tokio::test]
    async fn test_missing_product_is_not_found() {
        let h = Harness::new().await;
        let err = h
            .engine
            .create_sale(h.cash_sale(vec![LineRequest::new("no-such-product", 1)], 1000))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(h.count("sales").await, 0);
    }

    #[tokio::test]
    async fn test_loyalty_earn_and_redeem() {
        let h = Harness::new().await;
        let customer = h.customer(50, None).await;
        let product = h.product("OIL", 10000, 10).await;

        let mut req = h.cash_sale(vec![LineRequest::new(&product.id, 2)], 21400);
        req.customer_id = Some(customer.id.clone());
        req.points_to_redeem = 10;

        let detail = h.engine.create_sale(req).await.unwrap();
        assert_eq!(detail.sale.points_value_cents, 1000);
        assert_eq!(detail.sale.total_cents, 21400);
        assert_eq!(detail.sale.points_redeemed, 10);
        assert_eq!(detail.sale.points_earned, 2);
        assert!(detail.reconciles());

        let after = h.customer_state(&customer.id).await;
        assert_eq!(after.loyalty_points, 42);
        assert_eq!(after.lifetime_spend_cents, 21400);
        assert_eq!(after.total_transactions, 1);

        let history = h.db.loyalty().history(&customer.id).await.unwrap();
        let legs: Vec<(LoyaltyTransactionType, i64)> =
            history.iter().map(|e| (e.transaction_type, e.points)).collect();
        assert_eq!(
            legs,
            vec![
                (LoyaltyTransactionType::Redeem, -10),
                (LoyaltyTransactionType::Earn, 2)
            ]
        );
        assert!(h.db.loyalty().verify_replay(&customer.id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_redeeming_more_than_balance_fails() {
        let h = Harness::new().await;
        let customer = h.customer(5, None).await;
        let product = h.product("OIL", 10000, 10).await;

        let mut req = h.cash_sale(vec![LineRequest::new(&product.id, 1)], 11200);
        req.customer_id = Some(customer.id.clone());
        req.points_to_redeem = 6;

        let err = h.engine.create_sale(req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(h.customer_state(&customer.id).await.loyalty_points, 5);
        assert_eq!(h.stock_of(&product.id).await, 10);
    }

    #[tokio::test]
    async fn test_manual_discount_needs_approval() {
        let h = Harness::new().await;
        let product = h.product("TV", 100_000, 5).await;
        let reason = h.reason("Manager Override", true).await;

        let mut req = h.cash_sale(vec![LineRequest::new(&product.id, 1)], 200_000);
        req.lines[0].manual_discount = Some(ManualDiscount::Amount(Money::from_cents(10_000)));
        req.lines[0].discount_reason_id = Some(reason.id.clone());

        let err = h.engine.create_sale(req.clone()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);

        req.discount_authorization = Some(h.supervisor_credentials(SUPERVISOR_PIN));
        let detail = h.engine.create_sale(req).await.unwrap();

        // Tax on the net line: 12% of 900.00
        assert_eq!(detail.sale.discount_cents, 10_000);
        assert_eq!(detail.sale.tax_cents, 10_800);
        assert_eq!(detail.sale.total_cents, 100_800);
        assert_eq!(detail.items[0].discount_cents, 10_000);

        assert_eq!(detail.discounts.len(), 1);
        let manual = &detail.discounts[0];
        assert_eq!(manual.kind, DiscountKind::Manual);
        assert_eq!(manual.sale_item_id.as_deref(), Some(detail.items[0].id.as_str()));
        assert_eq!(manual.approved_by.as_deref(), Some(h.supervisor.id.as_str()));
        assert!(detail.reconciles());
    }

    #[tokio::test]
    async fn test_coupon_usage_counted() {
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
            min_purchase_cents: 50_000,
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

        let detail = h.engine.create_sale(req.clone()).await.unwrap();
        assert_eq!(detail.sale.discount_cents, 5000);
        assert_eq!(detail.discounts[0].kind, DiscountKind::Promotion);
        let stored = h.db.discounts().get_promotion(&coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 1);

        // Limit reached: the coupon is no longer available
        let err = h.engine.create_sale(req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
        assert_eq!(h.count("sales").await, 1);
    }

    #[tokio::test]
    async fn test_invoice_numbers_increase_and_lookup() {
        let h = Harness::new().await;
        let product = h.product("GUM", 500, 100).await;

        let first = h
            .engine
            .create_sale(h.cash_sale(vec![LineRequest::new(&product.id, 1)], 1000))
            .await
            .unwrap();
        let second = h
            .engine
            .create_sale(h.cash_sale(vec![LineRequest::new(&product.id, 1)], 1000))
            .await
            .unwrap();

        assert!(first.sale.invoice_number.ends_with("-0001"));
        assert!(second.sale.invoice_number.ends_with("-0002"));

        let found = h.engine.find_by_invoice(&second.sale.invoice_number).await.unwrap();
        assert_eq!(found.sale.id, second.sale.id);

        let err = h.engine.get_sale("missing").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_unknown_operator_is_unauthorized() {
        let h = Harness::new().await;
        let product = h.product("GUM", 500, 100).await;

        let mut req = h.cash_sale(vec![LineRequest::new(&product.id, 1)], 1000);
        req.operator_id = "ghost".to_string();

        let err = h.engine.create_sale(req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_concurrent_sales_never_oversell() {
        let path = std::env::temp_dir().join(format!("tally-engine-{}.db", Uuid::new_v4()));
        let db = Database::new(tally_db::DbConfig::new(&path)).await.unwrap();
        let h = Harness::with_db(db).await;
        let product = h.product("HOT", 1000, 5).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = h.engine.clone();
            let req = h.cash_sale(vec![LineRequest::new(&product.id, 1)], 2000);
            handles.push(tokio::spawn(async move { engine.create_sale(req).await }));
        }

        let mut completed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => completed += 1,
                Err(e) => assert_eq!(e.kind, ErrorKind::BadRequest),
            }
        }

        assert_eq!(completed, 5);
        assert_eq!(h.stock_of(&product.id).await, 0);
        let report = h.db.stock().verify_replay(&product.id).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.net_change(), -5);

        h.db.close().await;
        let _ = std::fs::remove_file(&path);
    }
}

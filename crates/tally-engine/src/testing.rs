//! Test harness: an engine over an in-memory database plus fixture builders.

use chrono::Utc;
use uuid::Uuid;

use tally_core::promotion::{DiscountReason, DiscountSetting, GovernmentKind, MembershipTier};
use tally_core::{Customer, Operator, Product, Role};
use tally_db::{hash_pin, Database, DbConfig};

use crate::config::EngineConfig;
use crate::engine::SaleEngine;
use crate::request::{CreateSaleRequest, LineRequest, PaymentRequest, ReversalRequest, SupervisorCredentials};

pub(crate) const SUPERVISOR_PIN: &str = "2468";

pub(crate) struct Harness {
    pub engine: SaleEngine,
    pub db: Database,
    /// No capabilities.
    pub cashier: Operator,
    /// Every capability, PIN [`SUPERVISOR_PIN`].
    pub supervisor: Operator,
    /// Elevated role, no PIN.
    pub manager: Operator,
}

impl Harness {
    pub async fn new() -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Self::with_db(db).await
    }

    pub async fn with_db(db: Database) -> Self {
        let cashier = operator(Role::Cashier, false, None);
        let supervisor = operator(Role::Supervisor, true, Some(SUPERVISOR_PIN));
        let manager = operator(Role::Manager, false, None);
        for op in [&cashier, &supervisor, &manager] {
            db.operators().insert(op).await.unwrap();
        }

        Harness {
            engine: SaleEngine::new(db.clone(), EngineConfig::default()),
            db,
            cashier,
            supervisor,
            manager,
        }
    }

    /// Tracked, taxable at 12%, VAT-exemptible, no backorder.
    pub async fn product(&self, sku: &str, price_cents: i64, stock: i64) -> Product {
        self.product_with(sku, price_cents, stock, |_| {}).await
    }

    /// As [`Harness::product`], adjusted by `customize` before insert.
    pub async fn product_with(
        &self,
        sku: &str,
        price_cents: i64,
        stock: i64,
        customize: impl FnOnce(&mut Product),
    ) -> Product {
        let now = Utc::now();
        let mut product = Product {
            id: Uuid::new_v4().to_string(),
            sku: sku.to_string(),
            name: format!("Product {}", sku),
            category_id: Some("grocery".to_string()),
            price_cents,
            cost_cents: None,
            tax_rate_bps: 1200,
            is_taxable: true,
            is_vat_exempt_eligible: true,
            track_inventory: true,
            allow_backorder: false,
            current_stock: stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        customize(&mut product);
        self.db.products().insert(&product).await.unwrap();
        product
    }

    pub async fn tier(&self, discount_bps: u32, points_multiplier_bps: u32) -> MembershipTier {
        let tier = MembershipTier {
            id: Uuid::new_v4().to_string(),
            name: "Gold".to_string(),
            discount_bps,
            points_multiplier_bps,
            is_active: true,
        };
        self.db.discounts().insert_tier(&tier).await.unwrap();
        tier
    }

    pub async fn customer(&self, points: i64, tier: Option<&MembershipTier>) -> Customer {
        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            name: "Test Customer".to_string(),
            membership_tier_id: tier.map(|t| t.id.clone()),
            customer_group_id: None,
            loyalty_points: points,
            lifetime_spend_cents: 0,
            total_transactions: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.db.customers().insert(&customer).await.unwrap();
        customer
    }

    /// Senior citizen and PWD at 20%, both VAT-exempt.
    pub async fn government_settings(&self) {
        self.government_setting(GovernmentKind::SeniorCitizen, "Senior Citizen", 2000, true)
            .await;
        self.government_setting(GovernmentKind::Pwd, "PWD", 2000, true)
            .await;
    }

    pub async fn government_setting(
        &self,
        kind: GovernmentKind,
        name: &str,
        percentage_bps: u32,
        is_vat_exempt: bool,
    ) {
        self.db
            .discounts()
            .insert_setting(&DiscountSetting {
                id: Uuid::new_v4().to_string(),
                kind,
                name: name.to_string(),
                percentage_bps,
                is_vat_exempt,
                is_active: true,
            })
            .await
            .unwrap();
    }

    pub async fn reason(&self, name: &str, requires_approval: bool) -> DiscountReason {
        let reason = DiscountReason {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            requires_approval,
            is_active: true,
        };
        self.db.discounts().insert_reason(&reason).await.unwrap();
        reason
    }

    pub fn cash_sale(&self, lines: Vec<LineRequest>, tendered_cents: i64) -> CreateSaleRequest {
        CreateSaleRequest {
            operator_id: self.cashier.id.clone(),
            lines,
            payments: vec![PaymentRequest::cash(tendered_cents)],
            ..Default::default()
        }
    }

    /// A reversal by the manager, who self-authorizes.
    pub fn reversal(&self, sale_id: &str, reason: &str) -> ReversalRequest {
        ReversalRequest {
            sale_id: sale_id.to_string(),
            operator_id: self.manager.id.clone(),
            reason: reason.to_string(),
            supervisor: None,
        }
    }

    pub fn supervisor_credentials(&self, pin: &str) -> SupervisorCredentials {
        SupervisorCredentials {
            supervisor_id: self.supervisor.id.clone(),
            pin: pin.to_string(),
        }
    }

    pub async fn stock_of(&self, product_id: &str) -> i64 {
        self.db
            .products()
            .get_by_id(product_id)
            .await
            .unwrap()
            .unwrap()
            .current_stock
    }

    pub async fn customer_state(&self, customer_id: &str) -> Customer {
        self.db.customers().get_by_id(customer_id).await.unwrap().unwrap()
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(self.db.pool())
            .await
            .unwrap()
    }
}

fn operator(role: Role, capable: bool, pin: Option<&str>) -> Operator {
    Operator {
        id: Uuid::new_v4().to_string(),
        name: format!("{:?}", role),
        role,
        pin_hash: pin.map(|p| hash_pin(p).unwrap()),
        can_authorize_void: capable,
        can_authorize_refund: capable,
        can_authorize_discount: capable,
        is_active: true,
        created_at: Utc::now(),
    }
}

//! # Discount/Promotion Evaluator
//!
//! Pure computation of which government, membership and promotional
//! discounts apply to a cart, and how much each is worth.
//!
//! ## Precedence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     DiscountStage::PRECEDENCE                           │
//! │                                                                         │
//! │   1. Government   senior citizen wins over PWD, at most one            │
//! │        │          base: subtotal; sets VAT exemption per setting       │
//! │        ▼                                                                │
//! │   2. Membership   tier discount                                        │
//! │        │          base: subtotal − government discount                │
//! │        ▼                                                                │
//! │   3. Promotion    coupon first, then auto-apply by priority desc       │
//! │                   first non-stackable match stops the chain            │
//! │                                                                         │
//! │   Running total is clamped so discounts never exceed the subtotal.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The order is data ([`DiscountStage::PRECEDENCE`]), not the incidental
//! order of statements, so it can be inspected and tested on its own.
//!
//! ## Determinism
//! The only time dependence is the promotion active-window check, and `now`
//! is a parameter. Auto-apply ties on priority are broken by promotion id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::{Money, Rate};
use crate::promotion::{
    DiscountSetting, GovernmentKind, MembershipTier, Promotion, PromotionReward, PromotionTarget,
};
use crate::types::DiscountKind;

// =============================================================================
// Inputs
// =============================================================================

/// One cart line as the evaluator sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: String,
    pub category_id: Option<String>,
    pub quantity: i64,
    pub unit_price: Money,
    /// Line subtotal after any manual line discount.
    pub net_amount: Money,
}

/// Who is buying.
#[derive(Debug, Clone, Default)]
pub struct CustomerContext {
    pub customer_id: Option<String>,
    pub tier: Option<MembershipTier>,
    pub group_id: Option<String>,
    pub senior_citizen: bool,
    pub pwd: bool,
}

// =============================================================================
// Outputs
// =============================================================================

/// A discount the evaluator decided to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub kind: DiscountKind,
    pub name: String,
    /// Setting, tier or promotion id.
    pub source_id: String,
    pub rate: Option<Rate>,
    pub amount: Money,
}

/// Result of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub government: Option<AppliedDiscount>,
    pub membership: Option<AppliedDiscount>,
    pub promotions: Vec<AppliedDiscount>,
    pub is_vat_exempt: bool,
}

impl Evaluation {
    /// Applied discounts in precedence order.
    pub fn applied(&self) -> impl Iterator<Item = &AppliedDiscount> {
        self.government
            .iter()
            .chain(self.membership.iter())
            .chain(self.promotions.iter())
    }

    pub fn total(&self) -> Money {
        self.applied().map(|d| d.amount).sum()
    }

    pub fn government_amount(&self) -> Money {
        self.government.as_ref().map_or(Money::zero(), |d| d.amount)
    }

    /// Ids of the promotions whose usage must be counted.
    pub fn promotion_ids(&self) -> impl Iterator<Item = &str> {
        self.promotions.iter().map(|p| p.source_id.as_str())
    }
}

// =============================================================================
// Precedence
// =============================================================================

/// A stage of discount evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiscountStage {
    Government,
    Membership,
    Promotion,
}

impl DiscountStage {
    /// Evaluation order. Earlier stages reduce the base of later ones only
    /// where [`DiscountStage::stacks_on`] says so.
    pub const PRECEDENCE: [DiscountStage; 3] = [
        DiscountStage::Government,
        DiscountStage::Membership,
        DiscountStage::Promotion,
    ];

    /// Position in [`DiscountStage::PRECEDENCE`].
    pub fn rank(&self) -> usize {
        match self {
            DiscountStage::Government => 0,
            DiscountStage::Membership => 1,
            DiscountStage::Promotion => 2,
        }
    }

    /// Whether this stage computes its percentage on an amount already
    /// reduced by `earlier`.
    pub fn stacks_on(&self, earlier: DiscountStage) -> bool {
        matches!(
            (self, earlier),
            (DiscountStage::Membership, DiscountStage::Government)
        )
    }

    /// The stage an applied discount belongs to.
    pub fn of(kind: DiscountKind) -> Option<DiscountStage> {
        match kind {
            DiscountKind::SeniorCitizen | DiscountKind::Pwd => Some(DiscountStage::Government),
            DiscountKind::Membership => Some(DiscountStage::Membership),
            DiscountKind::Promotion => Some(DiscountStage::Promotion),
            DiscountKind::Manual => None,
        }
    }
}

/// Picks the government discount for the buyer's flags.
///
/// At most one applies; senior citizen takes priority over PWD.
pub fn select_government<'a>(
    settings: &'a [DiscountSetting],
    senior_citizen: bool,
    pwd: bool,
) -> Option<&'a DiscountSetting> {
    let find = |kind: GovernmentKind| settings.iter().find(|s| s.is_active && s.kind == kind);

    if senior_citizen {
        if let Some(setting) = find(GovernmentKind::SeniorCitizen) {
            return Some(setting);
        }
    }
    if pwd {
        return find(GovernmentKind::Pwd);
    }
    None
}

// =============================================================================
// Evaluator
// =============================================================================

/// Evaluates discounts against a fixed configuration snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    settings: &'a [DiscountSetting],
    promotions: &'a [Promotion],
}

impl<'a> Evaluator<'a> {
    pub fn new(settings: &'a [DiscountSetting], promotions: &'a [Promotion]) -> Self {
        Evaluator {
            settings,
            promotions,
        }
    }

    /// Runs every stage in precedence order.
    ///
    /// ## Errors
    /// `InvalidCoupon` when a coupon code is supplied that no available
    /// promotion carries, or whose promotion the cart/customer doesn't qualify for.
    ///
    /// ```rust
    /// use chrono::Utc;
    /// use tally_core::discount::{CartLine, CustomerContext, Evaluator};
    /// use tally_core::money::Money;
    ///
    /// let lines = vec![CartLine {
    ///     product_id: "p-1".into(),
    ///     category_id: None,
    ///     quantity: 2,
    ///     unit_price: Money::from_cents(10000),
    ///     net_amount: Money::from_cents(20000),
    /// }];
    /// let evaluation = Evaluator::new(&[], &[])
    ///     .evaluate(&lines, &CustomerContext::default(), None, Utc::now())
    ///     .unwrap();
    /// assert!(evaluation.total().is_zero());
    /// ```
    pub fn evaluate(
        &self,
        lines: &[CartLine],
        customer: &CustomerContext,
        coupon_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> CoreResult<Evaluation> {
        let subtotal = lines.iter().try_fold(Money::zero(), |acc, l| {
            acc.checked_add(l.net_amount)
                .ok_or_else(|| CoreError::AmountOverflow {
                    context: "cart subtotal".to_string(),
                })
        })?;
        let mut remaining = subtotal;
        let mut evaluation = Evaluation::default();

        for stage in DiscountStage::PRECEDENCE {
            match stage {
                DiscountStage::Government => {
                    if let Some(setting) =
                        select_government(self.settings, customer.senior_citizen, customer.pwd)
                    {
                        let amount = take(subtotal.apply_rate(setting.rate()), &mut remaining);
                        evaluation.is_vat_exempt = setting.is_vat_exempt;
                        if amount.is_positive() {
                            evaluation.government = Some(AppliedDiscount {
                                kind: match setting.kind {
                                    GovernmentKind::SeniorCitizen => DiscountKind::SeniorCitizen,
                                    GovernmentKind::Pwd => DiscountKind::Pwd,
                                },
                                name: setting.name.clone(),
                                source_id: setting.id.clone(),
                                rate: Some(setting.rate()),
                                amount,
                            });
                        }
                    }
                }
                DiscountStage::Membership => {
                    if let Some(tier) = customer.tier.as_ref().filter(|t| t.is_active) {
                        let base = if stage.stacks_on(DiscountStage::Government) {
                            (subtotal - evaluation.government_amount()).non_negative()
                        } else {
                            subtotal
                        };
                        let amount = take(base.apply_rate(tier.discount_rate()), &mut remaining);
                        if amount.is_positive() {
                            evaluation.membership = Some(AppliedDiscount {
                                kind: DiscountKind::Membership,
                                name: tier.name.clone(),
                                source_id: tier.id.clone(),
                                rate: Some(tier.discount_rate()),
                                amount,
                            });
                        }
                    }
                }
                DiscountStage::Promotion => {
                    evaluation.promotions = self.evaluate_promotions(
                        lines,
                        customer,
                        coupon_code,
                        subtotal,
                        &mut remaining,
                        now,
                    )?;
                }
            }
        }

        Ok(evaluation)
    }

    fn evaluate_promotions(
        &self,
        lines: &[CartLine],
        customer: &CustomerContext,
        coupon_code: Option<&str>,
        subtotal: Money,
        remaining: &mut Money,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<AppliedDiscount>> {
        let mut applied = Vec::new();

        let coupon = match coupon_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Some(self.resolve_coupon(code, lines, customer, subtotal, now)?),
            None => None,
        };

        let mut auto: Vec<&Promotion> = self
            .promotions
            .iter()
            .filter(|p| p.code.is_none() && p.is_available(now))
            .collect();
        auto.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        for promotion in coupon.into_iter().chain(auto) {
            if !is_eligible(promotion, lines, customer, subtotal) {
                continue;
            }

            let amount = take(promotion_amount(promotion, lines, subtotal), remaining);
            if !amount.is_positive() {
                continue;
            }

            applied.push(AppliedDiscount {
                kind: DiscountKind::Promotion,
                name: promotion.name.clone(),
                source_id: promotion.id.clone(),
                rate: match &promotion.reward {
                    PromotionReward::Percentage { rate } => Some(*rate),
                    _ => None,
                },
                amount,
            });

            if !promotion.is_stackable {
                break;
            }
        }

        Ok(applied)
    }

    fn resolve_coupon(
        &self,
        code: &str,
        lines: &[CartLine],
        customer: &CustomerContext,
        subtotal: Money,
        now: DateTime<Utc>,
    ) -> CoreResult<&'a Promotion> {
        let invalid = |reason: String| CoreError::InvalidCoupon {
            code: code.to_string(),
            reason,
        };

        let promotion = self
            .promotions
            .iter()
            .find(|p| p.matches_code(code) && p.is_available(now))
            .ok_or_else(|| invalid("no active promotion with this code".to_string()))?;

        if subtotal.cents() < promotion.min_purchase_cents {
            return Err(invalid(format!(
                "minimum purchase of {} not met",
                Money::from_cents(promotion.min_purchase_cents)
            )));
        }
        if !target_matches(&promotion.target, lines, customer) {
            return Err(invalid("cart or customer is not eligible".to_string()));
        }
        if !promotion_amount(promotion, lines, subtotal).is_positive() {
            return Err(invalid("no qualifying items in cart".to_string()));
        }

        Ok(promotion)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Takes up to `amount` out of `remaining`.
fn take(amount: Money, remaining: &mut Money) -> Money {
    let granted = amount.non_negative().min(*remaining);
    *remaining -= granted;
    granted
}

fn line_matches(target: &PromotionTarget, line: &CartLine) -> bool {
    match target {
        PromotionTarget::SpecificProducts(ids) => ids.iter().any(|id| *id == line.product_id),
        PromotionTarget::SpecificCategories(ids) => line
            .category_id
            .as_ref()
            .map_or(false, |cat| ids.iter().any(|id| id == cat)),
        _ => true,
    }
}

fn target_matches(target: &PromotionTarget, lines: &[CartLine], customer: &CustomerContext) -> bool {
    let contains = |ids: &[String], value: Option<&str>| {
        value.map_or(false, |v| ids.iter().any(|id| id == v))
    };

    match target {
        PromotionTarget::AllCustomers => true,
        PromotionTarget::SpecificProducts(_) | PromotionTarget::SpecificCategories(_) => {
            lines.iter().any(|l| line_matches(target, l))
        }
        PromotionTarget::SpecificCustomers(ids) => contains(ids, customer.customer_id.as_deref()),
        PromotionTarget::SpecificTiers(ids) => {
            contains(ids, customer.tier.as_ref().map(|t| t.id.as_str()))
        }
        PromotionTarget::SpecificGroups(ids) => contains(ids, customer.group_id.as_deref()),
    }
}

fn is_eligible(
    promotion: &Promotion,
    lines: &[CartLine],
    customer: &CustomerContext,
    subtotal: Money,
) -> bool {
    subtotal.cents() >= promotion.min_purchase_cents
        && target_matches(&promotion.target, lines, customer)
}

/// Uncapped-by-cart amount for one promotion, with `max_discount` applied.
fn promotion_amount(promotion: &Promotion, lines: &[CartLine], subtotal: Money) -> Money {
    let eligible = || lines.iter().filter(|l| line_matches(&promotion.target, l));

    let amount = match &promotion.reward {
        PromotionReward::Percentage { rate } => {
            let base = if promotion.target.is_line_scoped() {
                eligible().map(|l| l.net_amount).sum::<Money>()
            } else {
                subtotal
            };
            base.apply_rate(*rate)
        }
        PromotionReward::FixedAmount { amount } => *amount,
        PromotionReward::BuyXGetY { buy, get } => {
            let group = buy + get;
            if group <= 0 {
                Money::zero()
            } else {
                eligible()
                    .map(|l| l.unit_price.multiply_quantity((l.quantity / group) * get))
                    .sum::<Money>()
            }
        }
    };

    match promotion.max_discount_cents {
        Some(cap) => amount.min(Money::from_cents(cap)),
        None => amount,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

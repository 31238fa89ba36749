//! # Discount Configuration
//!
//! Descriptors read by the evaluator at sale time: government discount
//! settings, manual discount reasons, membership tiers, customer groups and
//! promotions. They are edited by administrative tooling and consumed
//! read-only here.
//!
//! ## Promotion Targets
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  target_type (stored)      PromotionTarget (in memory)                  │
//! │  ───────────────────────   ──────────────────────────────────────────   │
//! │  "all"                     AllCustomers                                 │
//! │  "products"    + ids       SpecificProducts(ids)                        │
//! │  "categories"  + ids       SpecificCategories(ids)                      │
//! │  "customers"   + ids       SpecificCustomers(ids)                       │
//! │  "tiers"       + ids       SpecificTiers(ids)                           │
//! │  "groups"      + ids       SpecificGroups(ids)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Unknown tags are rejected at load time, so the evaluator matches on an
//! exhaustive enum instead of string tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::{Money, Rate};

// =============================================================================
// Government Discounts
// =============================================================================

/// Government-mandated discount categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum GovernmentKind {
    SeniorCitizen,
    Pwd,
}

/// Configured percentage and VAT treatment for a government discount.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DiscountSetting {
    pub id: String,
    pub kind: GovernmentKind,
    pub name: String,
    pub percentage_bps: u32,
    /// Selecting this discount makes the whole sale VAT-exempt.
    pub is_vat_exempt: bool,
    pub is_active: bool,
}

impl DiscountSetting {
    #[inline]
    pub fn rate(&self) -> Rate {
        Rate::from_bps(self.percentage_bps)
    }
}

/// A reason code for manual line discounts.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DiscountReason {
    pub id: String,
    pub name: String,
    /// Discounts with this reason need an authorizing operator.
    pub requires_approval: bool,
    pub is_active: bool,
}

// =============================================================================
// Membership
// =============================================================================

/// A membership tier: a sale-level discount plus a points multiplier.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MembershipTier {
    pub id: String,
    pub name: String,
    pub discount_bps: u32,
    /// 10000 = 1.0×, 15000 = 1.5×.
    pub points_multiplier_bps: u32,
    pub is_active: bool,
}

impl MembershipTier {
    #[inline]
    pub fn discount_rate(&self) -> Rate {
        Rate::from_bps(self.discount_bps)
    }

    #[inline]
    pub fn points_multiplier(&self) -> Rate {
        Rate::from_bps(self.points_multiplier_bps)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CustomerGroup {
    pub id: String,
    pub name: String,
    pub is_active: bool,
}

// =============================================================================
// Promotions
// =============================================================================

/// What a promotion gives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromotionReward {
    /// Percentage of the eligible subtotal.
    Percentage { rate: Rate },
    /// Flat amount off.
    FixedAmount { amount: Money },
    /// For every `buy + get` units of an eligible line, `get` units are free.
    BuyXGetY { buy: i64, get: i64 },
}

impl PromotionReward {
    /// Storage tag for the reward type.
    pub fn type_tag(&self) -> &'static str {
        match self {
            PromotionReward::Percentage { .. } => "percentage",
            PromotionReward::FixedAmount { .. } => "fixed_amount",
            PromotionReward::BuyXGetY { .. } => "buy_x_get_y",
        }
    }

    /// Rebuilds a reward from its stored columns.
    ///
    /// `value` is basis points for percentages and minor units for fixed
    /// amounts. Returns `None` for unknown tags or a non-positive buy/get pair.
    pub fn from_parts(tag: &str, value: i64, buy: Option<i64>, get: Option<i64>) -> Option<Self> {
        match tag {
            "percentage" => u32::try_from(value)
                .ok()
                .map(|bps| PromotionReward::Percentage { rate: Rate::from_bps(bps) }),
            "fixed_amount" => Some(PromotionReward::FixedAmount {
                amount: Money::from_cents(value),
            }),
            "buy_x_get_y" => match (buy, get) {
                (Some(buy), Some(get)) if buy > 0 && get > 0 => {
                    Some(PromotionReward::BuyXGetY { buy, get })
                }
                _ => None,
            },
            _ => None,
        }
    }
}

/// Who or what a promotion applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "ids", rename_all = "snake_case")]
pub enum PromotionTarget {
    AllCustomers,
    SpecificProducts(Vec<String>),
    SpecificCategories(Vec<String>),
    SpecificCustomers(Vec<String>),
    SpecificTiers(Vec<String>),
    SpecificGroups(Vec<String>),
}

impl PromotionTarget {
    /// Storage tag for the target type.
    pub fn type_tag(&self) -> &'static str {
        match self {
            PromotionTarget::AllCustomers => "all",
            PromotionTarget::SpecificProducts(_) => "products",
            PromotionTarget::SpecificCategories(_) => "categories",
            PromotionTarget::SpecificCustomers(_) => "customers",
            PromotionTarget::SpecificTiers(_) => "tiers",
            PromotionTarget::SpecificGroups(_) => "groups",
        }
    }

    /// Target ids (empty for `AllCustomers`).
    pub fn ids(&self) -> &[String] {
        match self {
            PromotionTarget::AllCustomers => &[],
            PromotionTarget::SpecificProducts(ids)
            | PromotionTarget::SpecificCategories(ids)
            | PromotionTarget::SpecificCustomers(ids)
            | PromotionTarget::SpecificTiers(ids)
            | PromotionTarget::SpecificGroups(ids) => ids,
        }
    }

    /// Rebuilds a target from its stored tag and id list.
    pub fn from_parts(tag: &str, ids: Vec<String>) -> Option<Self> {
        let target = match tag {
            "all" => PromotionTarget::AllCustomers,
            "products" => PromotionTarget::SpecificProducts(ids),
            "categories" => PromotionTarget::SpecificCategories(ids),
            "customers" => PromotionTarget::SpecificCustomers(ids),
            "tiers" => PromotionTarget::SpecificTiers(ids),
            "groups" => PromotionTarget::SpecificGroups(ids),
            _ => return None,
        };
        Some(target)
    }

    /// Product and category targets narrow the discount to matching lines.
    pub fn is_line_scoped(&self) -> bool {
        matches!(
            self,
            PromotionTarget::SpecificProducts(_) | PromotionTarget::SpecificCategories(_)
        )
    }
}

/// A promotion, either coupon-driven (`code` set) or auto-applied.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Promotion {
    pub id: String,
    pub name: String,
    pub code: Option<String>,
    pub reward: PromotionReward,
    pub target: PromotionTarget,
    pub min_purchase_cents: i64,
    pub max_discount_cents: Option<i64>,
    /// Higher runs first among auto-applied promotions.
    pub priority: i64,
    pub is_stackable: bool,
    pub is_active: bool,
    #[ts(as = "String")]
    pub start_date: DateTime<Utc>,
    #[ts(as = "String")]
    pub end_date: DateTime<Utc>,
    pub usage_limit: Option<i64>,
    pub usage_count: i64,
}

impl Promotion {
    /// Active, inside its window and under its usage cap.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.start_date <= now
            && now <= self.end_date
            && self.usage_limit.map_or(true, |limit| self.usage_count < limit)
    }

    /// Case-insensitive coupon match.
    pub fn matches_code(&self, code: &str) -> bool {
        self.code
            .as_deref()
            .map_or(false, |c| c.eq_ignore_ascii_case(code.trim()))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn promo(limit: Option<i64>, count: i64) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: "promo-1".to_string(),
            name: "Ten Off".to_string(),
            code: Some("SAVE10".to_string()),
            reward: PromotionReward::Percentage {
                rate: Rate::from_bps(1000),
            },
            target: PromotionTarget::AllCustomers,
            min_purchase_cents: 0,
            max_discount_cents: None,
            priority: 0,
            is_stackable: false,
            is_active: true,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            usage_limit: limit,
            usage_count: count,
        }
    }

    #[test]
    fn test_availability_window_and_cap() {
        let now = Utc::now();
        assert!(promo(None, 0).is_available(now));
        assert!(promo(Some(5), 4).is_available(now));
        assert!(!promo(Some(5), 5).is_available(now));
        assert!(!promo(None, 0).is_available(now + Duration::days(2)));

        let mut inactive = promo(None, 0);
        inactive.is_active = false;
        assert!(!inactive.is_available(now));
    }

    #[test]
    fn test_code_match_is_case_insensitive() {
        let p = promo(None, 0);
        assert!(p.matches_code("save10"));
        assert!(p.matches_code(" SAVE10 "));
        assert!(!p.matches_code("SAVE20"));
    }

    #[test]
    fn test_target_from_parts() {
        let ids = vec!["c-1".to_string()];
        let target = PromotionTarget::from_parts("categories", ids.clone()).unwrap();
        assert_eq!(target, PromotionTarget::SpecificCategories(ids));
        assert_eq!(target.type_tag(), "categories");
        assert!(target.is_line_scoped());
        assert!(PromotionTarget::from_parts("everyone", vec![]).is_none());
    }

    #[test]
    fn test_reward_from_parts() {
        assert_eq!(
            PromotionReward::from_parts("buy_x_get_y", 0, Some(2), Some(1)),
            Some(PromotionReward::BuyXGetY { buy: 2, get: 1 })
        );
        assert!(PromotionReward::from_parts("buy_x_get_y", 0, Some(2), None).is_none());
        assert_eq!(
            PromotionReward::from_parts("fixed_amount", 5000, None, None),
            Some(PromotionReward::FixedAmount {
                amount: Money::from_cents(5000)
            })
        );
    }
}

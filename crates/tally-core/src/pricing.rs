//! # Cart Pricing
//!
//! Turns cart lines into priced lines and sale totals.
//!
//! ```text
//! PricingLine ──► manual discount ──► CartLine (net) ──► Evaluator
//!                                                          │
//!      PricedLine ◄── tax on net line ◄── VAT exemption ◄──┘
//!           │
//!           ▼
//!      SaleTotals { subtotal, discount, tax, points_value, total }
//! ```
//!
//! Tax is charged per line on the line subtotal less its manual discount.
//! Sale-level discounts (government, membership, promotion) are not
//! apportioned back into line tax. A VAT-exempt sale charges no tax at all.

use serde::{Deserialize, Serialize};

use crate::discount::{CartLine, Evaluation};
use crate::error::{CoreError, CoreResult};
use crate::money::{Money, Rate};
use crate::types::{LineDiscountType, Product};

// =============================================================================
// Manual Discount
// =============================================================================

/// A discount keyed in by the operator for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ManualDiscount {
    Percentage(Rate),
    Amount(Money),
}

impl ManualDiscount {
    pub fn kind(&self) -> LineDiscountType {
        match self {
            ManualDiscount::Percentage(_) => LineDiscountType::Percentage,
            ManualDiscount::Amount(_) => LineDiscountType::Amount,
        }
    }

    pub fn rate(&self) -> Option<Rate> {
        match self {
            ManualDiscount::Percentage(rate) => Some(*rate),
            ManualDiscount::Amount(_) => None,
        }
    }

    /// Discount for a line with the given subtotal.
    ///
    /// Rejects percentages above 100% and amounts that are negative or larger
    /// than the line.
    pub fn amount_for(&self, line_subtotal: Money) -> CoreResult<Money> {
        match self {
            ManualDiscount::Percentage(rate) => {
                if *rate > Rate::ONE {
                    return Err(CoreError::InvalidDiscount {
                        reason: format!("percentage {} exceeds 100%", rate),
                    });
                }
                Ok(line_subtotal.apply_rate(*rate))
            }
            ManualDiscount::Amount(amount) => {
                if amount.is_negative() {
                    return Err(CoreError::InvalidDiscount {
                        reason: "amount cannot be negative".to_string(),
                    });
                }
                if *amount > line_subtotal {
                    return Err(CoreError::InvalidDiscount {
                        reason: format!("amount {} exceeds line subtotal {}", amount, line_subtotal),
                    });
                }
                Ok(*amount)
            }
        }
    }
}

// =============================================================================
// Lines
// =============================================================================

/// A cart line joined with its catalog entry.
#[derive(Debug, Clone)]
pub struct PricingLine {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub category_id: Option<String>,
    pub quantity: i64,
    pub unit_price: Money,
    pub tax_rate: Rate,
    pub is_taxable: bool,
    pub manual_discount: Option<ManualDiscount>,
}

impl PricingLine {
    /// Builds a line from the catalog, optionally overriding the unit price.
    pub fn from_product(
        product: &Product,
        quantity: i64,
        unit_price_override: Option<Money>,
        manual_discount: Option<ManualDiscount>,
    ) -> Self {
        PricingLine {
            product_id: product.id.clone(),
            sku: product.sku.clone(),
            name: product.name.clone(),
            category_id: product.category_id.clone(),
            quantity,
            unit_price: unit_price_override.unwrap_or_else(|| product.price()),
            tax_rate: product.tax_rate(),
            is_taxable: product.is_taxable,
            manual_discount,
        }
    }

    /// Unit price times quantity.
    ///
    /// ## Errors
    /// `AmountOverflow` when the product doesn't fit in minor units.
    pub fn line_subtotal(&self) -> CoreResult<Money> {
        self.unit_price
            .checked_multiply_quantity(self.quantity)
            .ok_or_else(|| CoreError::AmountOverflow {
                context: format!("{} × {}", self.sku, self.quantity),
            })
    }

    pub fn manual_discount_amount(&self) -> CoreResult<Money> {
        match &self.manual_discount {
            Some(discount) => discount.amount_for(self.line_subtotal()?),
            None => Ok(Money::zero()),
        }
    }

    /// The evaluator's view of this line.
    pub fn to_cart_line(&self) -> CoreResult<CartLine> {
        Ok(CartLine {
            product_id: self.product_id.clone(),
            category_id: self.category_id.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            net_amount: self.line_subtotal()? - self.manual_discount_amount()?,
        })
    }
}

/// A fully priced line, ready to become a `SaleItem`.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub line: PricingLine,
    pub line_subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub line_total: Money,
}

// =============================================================================
// Totals
// =============================================================================

/// Sale-level totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTotals {
    pub subtotal: Money,
    /// Manual line discounts plus every evaluated discount.
    pub discount: Money,
    pub tax: Money,
    pub points_value: Money,
    pub total: Money,
}

impl SaleTotals {
    /// Amount due before any points are redeemed.
    pub fn payable_before_points(&self) -> Money {
        self.subtotal - self.discount + self.tax
    }

    /// Applies a points redemption worth `value`.
    pub fn with_points(mut self, value: Money) -> Self {
        self.points_value = value;
        self.total = self.payable_before_points() - value;
        self
    }

    pub fn reconciles(&self) -> bool {
        self.subtotal - self.discount + self.tax - self.points_value == self.total
    }
}

/// The output of [`price_cart`].
#[derive(Debug, Clone)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub is_vat_exempt: bool,
    pub totals: SaleTotals,
}

/// Prices every line and accumulates totals.
///
/// `vat_exempt` is the caller's explicit exemption; the evaluation can also
/// make the sale exempt through a government discount.
///
/// ```rust
/// use chrono::Utc;
/// use tally_core::discount::Evaluation;
/// use tally_core::money::{Money, Rate};
/// use tally_core::pricing::{price_cart, PricingLine};
///
/// let line = PricingLine {
///     product_id: "p-1".into(),
///     sku: "RICE".into(),
///     name: "Rice".into(),
///     category_id: None,
///     quantity: 2,
///     unit_price: Money::from_cents(10000),
///     tax_rate: Rate::from_bps(1200),
///     is_taxable: true,
///     manual_discount: None,
/// };
/// let priced = price_cart(vec![line], &Evaluation::default(), false).unwrap();
/// assert_eq!(priced.totals.subtotal.cents(), 20000);
/// assert_eq!(priced.totals.tax.cents(), 2400);
/// assert_eq!(priced.totals.total.cents(), 22400);
/// ```
pub fn price_cart(
    lines: Vec<PricingLine>,
    evaluation: &Evaluation,
    vat_exempt: bool,
) -> CoreResult<PricedCart> {
    let is_vat_exempt = vat_exempt || evaluation.is_vat_exempt;
    let mut priced = Vec::with_capacity(lines.len());
    let mut totals = SaleTotals::default();

    for line in lines {
        let line_subtotal = line.line_subtotal()?;
        let discount = line.manual_discount_amount()?;
        let net = line_subtotal - discount;
        let tax = if is_vat_exempt || !line.is_taxable {
            Money::zero()
        } else {
            net.apply_rate(line.tax_rate)
        };
        let line_total = checked_sum(net, tax, "line total")?;

        totals.subtotal = checked_sum(totals.subtotal, line_subtotal, "subtotal")?;
        totals.discount += discount;
        totals.tax = checked_sum(totals.tax, tax, "tax")?;

        priced.push(PricedLine {
            line,
            line_subtotal,
            discount,
            tax,
            line_total,
        });
    }

    let ceiling = totals.subtotal - totals.discount;
    totals.discount += evaluation.total().min(ceiling);
    checked_sum(ceiling, totals.tax, "sale total")?;
    let totals = totals.with_points(Money::zero());

    Ok(PricedCart {
        lines: priced,
        is_vat_exempt,
        totals,
    })
}

fn checked_sum(a: Money, b: Money, what: &str) -> CoreResult<Money> {
    a.checked_add(b).ok_or_else(|| CoreError::AmountOverflow {
        context: what.to_string(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

//! # Loyalty Points
//!
//! Points earned on a sale and the currency value of redeemed points.
//!
//! ```text
//! points_earned = floor(payable / spend_per_point × multiplier)
//!
//!   payable 224.00, spend_per_point 100.00, multiplier 1.0× → 2 points
//!   payable 224.00, spend_per_point 100.00, multiplier 1.5× → 3 points
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, Rate, BPS_SCALE};

/// How points are earned and what they are worth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyPolicy {
    /// Spend that earns one base point.
    pub spend_per_point: Money,
    /// Currency value of one redeemed point.
    pub point_value: Money,
    pub enabled: bool,
}

impl Default for LoyaltyPolicy {
    fn default() -> Self {
        LoyaltyPolicy {
            spend_per_point: Money::from_cents(10_000),
            point_value: Money::from_cents(100),
            enabled: true,
        }
    }
}

impl LoyaltyPolicy {
    /// Points earned on `payable` with the customer's tier multiplier.
    ///
    /// Customers without a tier earn at [`Rate::ONE`].
    ///
    /// ```rust
    /// use tally_core::loyalty::LoyaltyPolicy;
    /// use tally_core::money::{Money, Rate};
    ///
    /// let policy = LoyaltyPolicy::default();
    /// assert_eq!(policy.points_earned(Money::from_cents(22400), Rate::ONE), 2);
    /// assert_eq!(policy.points_earned(Money::from_cents(22400), Rate::from_bps(15000)), 3);
    /// ```
    pub fn points_earned(&self, payable: Money, multiplier: Rate) -> i64 {
        if !self.enabled || !payable.is_positive() || !self.spend_per_point.is_positive() {
            return 0;
        }
        let numerator = payable.cents() as i128 * multiplier.bps() as i128;
        let denominator = self.spend_per_point.cents() as i128 * BPS_SCALE;
        (numerator / denominator) as i64
    }

    /// Currency value of `points`, `None` on overflow.
    pub fn redemption_value(&self, points: i64) -> Option<Money> {
        self.point_value.checked_multiply_quantity(points)
    }

    /// Checks a redemption against the balance and the amount due, returning
    /// its value.
    ///
    /// ## Errors
    /// - `InsufficientPoints` when `requested > available`
    /// - `InvalidPaymentAmount` when the points are worth more than `payable`
    pub fn check_redemption(&self, requested: i64, available: i64, payable: Money) -> CoreResult<Money> {
        if requested < 0 {
            return Err(ValidationError::MustBePositive {
                field: "points_to_redeem".to_string(),
            }
            .into());
        }
        if requested == 0 {
            return Ok(Money::zero());
        }
        if !self.enabled {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "loyalty redemption is disabled".to_string(),
            });
        }
        if requested > available {
            return Err(CoreError::InsufficientPoints {
                available,
                requested,
            });
        }

        let value = self
            .redemption_value(requested)
            .ok_or_else(|| CoreError::AmountOverflow {
                context: format!("value of {} points", requested),
            })?;
        if value > payable {
            return Err(CoreError::InvalidPaymentAmount {
                reason: format!("points worth {} exceed amount due {}", value, payable),
            });
        }
        Ok(value)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_floor() {
        let policy = LoyaltyPolicy::default();
        assert_eq!(policy.points_earned(Money::from_cents(9999), Rate::ONE), 0);
        assert_eq!(policy.points_earned(Money::from_cents(10000), Rate::ONE), 1);
        assert_eq!(policy.points_earned(Money::from_cents(16000), Rate::ONE), 1);
        assert_eq!(policy.points_earned(Money::from_cents(20000), Rate::from_bps(20000)), 4);
    }

    #[test]
    fn test_disabled_policy_earns_nothing() {
        let policy = LoyaltyPolicy {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(policy.points_earned(Money::from_cents(1_000_000), Rate::ONE), 0);
        assert!(policy.check_redemption(1, 10, Money::from_cents(10000)).is_err());
    }

    #[test]
    fn test_redemption_checks() {
        let policy = LoyaltyPolicy::default();
        let payable = Money::from_cents(22400);

        assert_eq!(policy.check_redemption(0, 0, payable).unwrap(), Money::zero());
        assert_eq!(policy.check_redemption(50, 80, payable).unwrap().cents(), 5000);

        let err = policy.check_redemption(90, 80, payable).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientPoints {
                available: 80,
                requested: 90
            }
        ));

        let err = policy.check_redemption(300, 500, payable).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPaymentAmount { .. }));
        assert!(policy.check_redemption(-1, 10, payable).is_err());
    }
}

//! # Discount Repository
//!
//! Reads the discount configuration the evaluator consumes and maintains
//! promotion usage counters.
//!
//! Promotions are stored flat (`reward_type`, `reward_value`, `target_type`,
//! JSON `target_ids`) and rebuilt into [`Promotion`] on load. A row that
//! doesn't rebuild is reported as [`DbError::CorruptRow`] when asked for by
//! id, and left out of the active list with a warning.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use tally_core::promotion::{
    CustomerGroup, DiscountReason, DiscountSetting, MembershipTier, Promotion, PromotionReward,
    PromotionTarget,
};

const PROMOTION_COLUMNS: &str = "id, name, code, reward_type, reward_value, buy_quantity, \
     get_quantity, target_type, target_ids, min_purchase_cents, max_discount_cents, priority, \
     is_stackable, is_active, start_date, end_date, usage_limit, usage_count";

/// Flat promotion row as stored.
#[derive(Debug, FromRow)]
struct PromotionRow {
    id: String,
    name: String,
    code: Option<String>,
    reward_type: String,
    reward_value: i64,
    buy_quantity: Option<i64>,
    get_quantity: Option<i64>,
    target_type: String,
    target_ids: String,
    min_purchase_cents: i64,
    max_discount_cents: Option<i64>,
    priority: i64,
    is_stackable: bool,
    is_active: bool,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    usage_limit: Option<i64>,
    usage_count: i64,
}

impl TryFrom<PromotionRow> for Promotion {
    type Error = DbError;

    fn try_from(row: PromotionRow) -> Result<Self, Self::Error> {
        let reward = PromotionReward::from_parts(
            &row.reward_type,
            row.reward_value,
            row.buy_quantity,
            row.get_quantity,
        )
        .ok_or_else(|| {
            DbError::corrupt(
                "Promotion",
                &row.id,
                format!("bad reward '{}'", row.reward_type),
            )
        })?;

        let ids: Vec<String> = serde_json::from_str(&row.target_ids)
            .map_err(|e| DbError::corrupt("Promotion", &row.id, format!("target_ids: {}", e)))?;

        let target = PromotionTarget::from_parts(&row.target_type, ids).ok_or_else(|| {
            DbError::corrupt(
                "Promotion",
                &row.id,
                format!("unknown target '{}'", row.target_type),
            )
        })?;

        Ok(Promotion {
            id: row.id,
            name: row.name,
            code: row.code,
            reward,
            target,
            min_purchase_cents: row.min_purchase_cents,
            max_discount_cents: row.max_discount_cents,
            priority: row.priority,
            is_stackable: row.is_stackable,
            is_active: row.is_active,
            start_date: row.start_date,
            end_date: row.end_date,
            usage_limit: row.usage_limit,
            usage_count: row.usage_count,
        })
    }
}

/// Stored `reward_value` for a reward.
fn reward_value(reward: &PromotionReward) -> i64 {
    match reward {
        PromotionReward::Percentage { rate } => i64::from(rate.bps()),
        PromotionReward::FixedAmount { amount } => amount.cents(),
        PromotionReward::BuyXGetY { .. } => 0,
    }
}

/// Repository for discount configuration.
#[derive(Debug, Clone)]
pub struct DiscountRepository {
    pool: SqlitePool,
}

impl DiscountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        DiscountRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Active government discount settings.
    pub async fn settings(conn: &mut SqliteConnection) -> DbResult<Vec<DiscountSetting>> {
        let settings = sqlx::query_as::<_, DiscountSetting>(
            r#"
            SELECT id, kind, name, percentage_bps, is_vat_exempt, is_active
            FROM discount_settings
            WHERE is_active = 1
            ORDER BY kind
            "#,
        )
        .fetch_all(conn)
        .await?;
        Ok(settings)
    }

    pub async fn reason(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<DiscountReason>> {
        let reason = sqlx::query_as::<_, DiscountReason>(
            "SELECT id, name, requires_approval, is_active FROM discount_reasons WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(reason)
    }

    pub async fn get_reason(&self, id: &str) -> DbResult<Option<DiscountReason>> {
        let mut conn = self.pool.acquire().await?;
        Self::reason(&mut conn, id).await
    }

    pub async fn tier(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<MembershipTier>> {
        let tier = sqlx::query_as::<_, MembershipTier>(
            r#"
            SELECT id, name, discount_bps, points_multiplier_bps, is_active
            FROM membership_tiers
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(tier)
    }

    /// Active promotions. Window and usage checks are left to the evaluator.
    ///
    /// Rows that don't rebuild are skipped, so one bad promotion can't stop
    /// every sale.
    pub async fn active_promotions(conn: &mut SqliteConnection) -> DbResult<Vec<Promotion>> {
        let sql = format!(
            "SELECT {} FROM promotions WHERE is_active = 1 ORDER BY priority DESC, id",
            PROMOTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, PromotionRow>(&sql)
            .fetch_all(conn)
            .await?;

        let promotions = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match Promotion::try_from(row) {
                    Ok(promotion) => Some(promotion),
                    Err(e) => {
                        warn!(promotion_id = %id, error = %e, "Skipping unreadable promotion");
                        None
                    }
                }
            })
            .collect();
        Ok(promotions)
    }

    pub async fn get_promotion(&self, id: &str) -> DbResult<Option<Promotion>> {
        let sql = format!("SELECT {} FROM promotions WHERE id = ?1", PROMOTION_COLUMNS);
        let row = sqlx::query_as::<_, PromotionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Promotion::try_from).transpose()
    }

    // =========================================================================
    // Usage counters
    // =========================================================================

    /// Counts one use of a promotion.
    ///
    /// Returns `false` when the usage limit was reached in the meantime.
    pub async fn increment_usage(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE promotions
            SET usage_count = usage_count + 1
            WHERE id = ?1 AND (usage_limit IS NULL OR usage_count < usage_limit)
            "#,
        )
        .bind(id)
        .execute(conn)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            debug!(promotion_id = %id, "Promotion usage limit reached");
        }
        Ok(applied)
    }

    /// Gives back one use of a promotion. Never goes below zero.
    pub async fn decrement_usage(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE promotions SET usage_count = usage_count - 1 WHERE id = ?1 AND usage_count > 0",
        )
        .bind(id)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            warn!(promotion_id = %id, "Promotion usage already at zero");
        }
        Ok(())
    }

    // =========================================================================
    // Configuration writes
    // =========================================================================

    pub async fn insert_setting(&self, setting: &DiscountSetting) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO discount_settings (id, kind, name, percentage_bps, is_vat_exempt, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&setting.id)
        .bind(setting.kind)
        .bind(&setting.name)
        .bind(setting.percentage_bps)
        .bind(setting.is_vat_exempt)
        .bind(setting.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_reason(&self, reason: &DiscountReason) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO discount_reasons (id, name, requires_approval, is_active)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&reason.id)
        .bind(&reason.name)
        .bind(reason.requires_approval)
        .bind(reason.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_tier(&self, tier: &MembershipTier) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO membership_tiers (id, name, discount_bps, points_multiplier_bps, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&tier.id)
        .bind(&tier.name)
        .bind(tier.discount_bps)
        .bind(tier.points_multiplier_bps)
        .bind(tier.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_group(&self, group: &CustomerGroup) -> DbResult<()> {
        sqlx::query("INSERT INTO customer_groups (id, name, is_active) VALUES (?1, ?2, ?3)")
            .bind(&group.id)
            .bind(&group.name)
            .bind(group.is_active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_promotion(&self, promotion: &Promotion) -> DbResult<()> {
        debug!(id = %promotion.id, name = %promotion.name, "Inserting promotion");

        let (buy, get) = match promotion.reward {
            PromotionReward::BuyXGetY { buy, get } => (Some(buy), Some(get)),
            _ => (None, None),
        };
        let target_ids = serde_json::to_string(promotion.target.ids())
            .map_err(|e| DbError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO promotions (
                id, name, code, reward_type, reward_value, buy_quantity, get_quantity,
                target_type, target_ids, min_purchase_cents, max_discount_cents, priority,
                is_stackable, is_active, start_date, end_date, usage_limit, usage_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            "#,
        )
        .bind(&promotion.id)
        .bind(&promotion.name)
        .bind(&promotion.code)
        .bind(promotion.reward.type_tag())
        .bind(reward_value(&promotion.reward))
        .bind(buy)
        .bind(get)
        .bind(promotion.target.type_tag())
        .bind(target_ids)
        .bind(promotion.min_purchase_cents)
        .bind(promotion.max_discount_cents)
        .bind(promotion.priority)
        .bind(promotion.is_stackable)
        .bind(promotion.is_active)
        .bind(promotion.start_date)
        .bind(promotion.end_date)
        .bind(promotion.usage_limit)
        .bind(promotion.usage_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use tally_core::promotion::GovernmentKind;
    use tally_core::{Money, Rate};

    fn promotion(id: &str, code: Option<&str>, limit: Option<i64>) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: id.to_string(),
            name: format!("Promo {}", id),
            code: code.map(str::to_string),
            reward: PromotionReward::Percentage {
                rate: Rate::from_percentage(10.0),
            },
            target: PromotionTarget::SpecificProducts(vec!["p-1".to_string()]),
            min_purchase_cents: 0,
            max_discount_cents: Some(5000),
            priority: 5,
            is_stackable: true,
            is_active: true,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            usage_limit: limit,
            usage_count: 0,
        }
    }

    #[tokio::test]
    async fn test_promotion_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.discounts()
            .insert_promotion(&promotion("promo-a", Some("SAVE10"), None))
            .await
            .unwrap();

        let mut bogo = promotion("promo-b", None, None);
        bogo.reward = PromotionReward::BuyXGetY { buy: 2, get: 1 };
        bogo.target = PromotionTarget::AllCustomers;
        db.discounts().insert_promotion(&bogo).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let promos = DiscountRepository::active_promotions(&mut conn).await.unwrap();
        assert_eq!(promos.len(), 2);

        let a = promos.iter().find(|p| p.id == "promo-a").unwrap();
        assert_eq!(
            a.reward,
            PromotionReward::Percentage {
                rate: Rate::from_percentage(10.0)
            }
        );
        assert_eq!(a.target.ids(), &["p-1".to_string()]);
        assert!(a.matches_code("save10"));

        let b = promos.iter().find(|p| p.id == "promo-b").unwrap();
        assert_eq!(b.reward, PromotionReward::BuyXGetY { buy: 2, get: 1 });
        assert_eq!(b.target, PromotionTarget::AllCustomers);
    }

    #[tokio::test]
    async fn test_corrupt_target_is_reported() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.discounts()
            .insert_promotion(&promotion("promo-a", None, None))
            .await
            .unwrap();
        sqlx::query("UPDATE promotions SET target_ids = 'not json' WHERE id = 'promo-a'")
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.discounts().get_promotion("promo-a").await.unwrap_err();
        assert!(matches!(err, DbError::CorruptRow { .. }));

        db.discounts()
            .insert_promotion(&promotion("promo-b", None, None))
            .await
            .unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let promos = DiscountRepository::active_promotions(&mut conn).await.unwrap();
        let ids: Vec<&str> = promos.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["promo-b"]);
    }

    #[tokio::test]
    async fn test_usage_limit_is_enforced() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.discounts()
            .insert_promotion(&promotion("promo-a", None, Some(1)))
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(DiscountRepository::increment_usage(&mut conn, "promo-a").await.unwrap());
        assert!(!DiscountRepository::increment_usage(&mut conn, "promo-a").await.unwrap());

        DiscountRepository::decrement_usage(&mut conn, "promo-a").await.unwrap();
        DiscountRepository::decrement_usage(&mut conn, "promo-a").await.unwrap();
        drop(conn);

        let promo = db.discounts().get_promotion("promo-a").await.unwrap().unwrap();
        assert_eq!(promo.usage_count, 0);
    }

    #[tokio::test]
    async fn test_settings_only_active() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.discounts()
            .insert_setting(&DiscountSetting {
                id: "sc".to_string(),
                kind: GovernmentKind::SeniorCitizen,
                name: "Senior Citizen".to_string(),
                percentage_bps: 2000,
                is_vat_exempt: true,
                is_active: true,
            })
            .await
            .unwrap();
        db.discounts()
            .insert_setting(&DiscountSetting {
                id: "pwd".to_string(),
                kind: GovernmentKind::Pwd,
                name: "PWD".to_string(),
                percentage_bps: 2000,
                is_vat_exempt: true,
                is_active: false,
            })
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let settings = DiscountRepository::settings(&mut conn).await.unwrap();
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].kind, GovernmentKind::SeniorCitizen);
        assert_eq!(settings[0].rate(), Rate::from_percentage(20.0));
        assert_eq!(
            Money::from_cents(10000).apply_rate(settings[0].rate()),
            Money::from_cents(2000)
        );
    }
}

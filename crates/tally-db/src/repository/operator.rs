//! # Operator Repository
//!
//! Staff records, including the Argon2 PIN hash used for supervisor
//! verification. Hashes are loaded but never logged.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tally_core::Operator;

const OPERATOR_COLUMNS: &str = "id, name, role, pin_hash, can_authorize_void, \
     can_authorize_refund, can_authorize_discount, is_active, created_at";

#[derive(Debug, Clone)]
pub struct OperatorRepository {
    pool: SqlitePool,
}

impl OperatorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OperatorRepository { pool }
    }

    pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Operator>> {
        let sql = format!("SELECT {} FROM operators WHERE id = ?1", OPERATOR_COLUMNS);
        let operator = sqlx::query_as::<_, Operator>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(operator)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Operator>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, id).await
    }

    pub async fn insert(&self, operator: &Operator) -> DbResult<()> {
        debug!(id = %operator.id, role = ?operator.role, "Inserting operator");

        sqlx::query(
            r#"
            INSERT INTO operators (
                id, name, role, pin_hash, can_authorize_void, can_authorize_refund,
                can_authorize_discount, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&operator.id)
        .bind(&operator.name)
        .bind(operator.role)
        .bind(&operator.pin_hash)
        .bind(operator.can_authorize_void)
        .bind(operator.can_authorize_refund)
        .bind(operator.can_authorize_discount)
        .bind(operator.is_active)
        .bind(operator.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::fixtures;
    use tally_core::Role;

    #[tokio::test]
    async fn test_round_trip_keeps_role_and_hash() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut op = fixtures::operator(Role::Supervisor);
        op.pin_hash = Some("$argon2id$v=19$stub".to_string());
        op.can_authorize_refund = true;
        db.operators().insert(&op).await.unwrap();

        let loaded = db.operators().get_by_id(&op.id).await.unwrap().unwrap();
        assert_eq!(loaded.role, Role::Supervisor);
        assert_eq!(loaded.pin_hash, op.pin_hash);
        assert!(loaded.can_authorize_refund);
        assert!(!loaded.can_authorize_void);
    }
}

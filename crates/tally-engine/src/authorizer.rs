//! # Authorizer
//!
//! Resolves who approves a void, a refund or a manual discount.
//!
//! ```text
//! acting operator ──► missing / inactive ──────────────► Unauthorized
//!        │
//!        ├── capable ─────────────────────────────────► SelfAuthorized
//!        │
//!        └── not capable ──► no credentials ───────────► Forbidden
//!                               │
//!                               ▼
//!                   supervisor missing ────────────────► NotFound
//!                   no hash / PIN mismatch ────────────► Unauthorized
//!                   inactive / lacks capability ───────► Forbidden
//!                   otherwise ─────────────────────────► Supervisor
//! ```
//!
//! Runs on the pool, before the operation's transaction begins.

use tracing::{debug, warn};

use tally_core::auth::{self, Authorization, AuthorizedAction, Denial};
use tally_core::validation::validate_pin;
use tally_core::Operator;
use tally_db::{verify_pin, Database};

use crate::error::{EngineError, EngineResult};
use crate::request::SupervisorCredentials;

#[derive(Debug, Clone)]
pub struct Authorizer {
    db: Database,
}

impl Authorizer {
    pub fn new(db: Database) -> Self {
        Authorizer { db }
    }

    /// Loads the acting operator, who must exist and be active.
    pub async fn acting_operator(&self, operator_id: &str) -> EngineResult<Operator> {
        match self.db.operators().get_by_id(operator_id).await? {
            Some(op) if op.is_active => Ok(op),
            Some(_) => Err(EngineError::unauthorized(format!(
                "Operator {} is inactive",
                operator_id
            ))),
            None => Err(EngineError::unauthorized(format!(
                "Unknown operator: {}",
                operator_id
            ))),
        }
    }

    /// Decides who approves `action` for `acting`.
    pub async fn authorize(
        &self,
        acting: &Operator,
        action: AuthorizedAction,
        credentials: Option<&SupervisorCredentials>,
    ) -> EngineResult<Authorization> {
        if auth::can_authorize(acting, action) {
            debug!(operator_id = %acting.id, action = %action, "Self-authorized");
            return Ok(Authorization::SelfAuthorized {
                operator_id: acting.id.clone(),
            });
        }

        let Some(credentials) = credentials else {
            return Err(EngineError::forbidden(format!(
                "Operator {} cannot authorize {} without supervisor approval",
                acting.id, action
            )));
        };

        validate_pin(&credentials.pin)?;

        let supervisor = self
            .db
            .operators()
            .get_by_id(&credentials.supervisor_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Supervisor", &credentials.supervisor_id))?;

        let Some(hash) = supervisor.pin_hash.clone() else {
            warn!(supervisor_id = %supervisor.id, "Supervisor has no PIN set");
            return Err(EngineError::unauthorized("Invalid supervisor PIN"));
        };

        if !check_pin(credentials.pin.clone(), hash).await? {
            warn!(
                supervisor_id = %supervisor.id,
                action = %action,
                "Supervisor PIN rejected"
            );
            return Err(EngineError::unauthorized("Invalid supervisor PIN"));
        }

        match auth::check(&supervisor, action) {
            Ok(()) => {
                debug!(
                    operator_id = %acting.id,
                    supervisor_id = %supervisor.id,
                    action = %action,
                    "Supervisor authorized"
                );
                Ok(Authorization::Supervisor {
                    supervisor_id: supervisor.id,
                    name: supervisor.name,
                })
            }
            Err(Denial::Inactive) => Err(EngineError::forbidden(format!(
                "Supervisor {} is inactive",
                supervisor.id
            ))),
            Err(Denial::MissingCapability) => Err(EngineError::forbidden(format!(
                "Supervisor {} cannot authorize {}",
                supervisor.id, action
            ))),
        }
    }
}

/// Argon2 verification off the async workers.
async fn check_pin(pin: String, hash: String) -> EngineResult<bool> {
    tokio::task::spawn_blocking(move || verify_pin(&pin, &hash))
        .await
        .map_err(EngineError::internal)
}

// =============================================================================
// Unit Tests
// =============================================================================

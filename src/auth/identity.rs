use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppError;

/// Account role, stored as the `user_role` Postgres enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Authenticated caller, scoped to a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Owner-or-admin check used for every edit/delete.
pub fn can_modify(identity: &Identity, owner_id: i64) -> bool {
    identity.is_admin() || identity.user_id == owner_id
}

pub fn authorize(identity: &Identity, owner_id: i64) -> Result<(), AppError> {
    if can_modify(identity, owner_id) {
        return Ok(());
    }
    warn!(user_id = identity.user_id, owner_id, "permission denied");
    Err(AppError::Forbidden)
}

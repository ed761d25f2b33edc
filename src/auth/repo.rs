use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::warn;

use super::{
    identity::Role,
    password,
    repo_types::{PendingRegistration, User},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Sole owner of `users` rows.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>>;

    /// Fails with [`StoreError::DuplicateEmail`] when the email is taken,
    /// including when a concurrent insert won the race.
    async fn insert(&self, new: &PendingRegistration) -> Result<User, StoreError>;

    async fn update_profile(
        &self,
        id: i64,
        nickname: &str,
        contact_info: &str,
    ) -> anyhow::Result<Option<User>>;

    async fn set_role(&self, id: i64, role: Role) -> anyhow::Result<Option<User>>;

    async fn delete(&self, id: i64) -> anyhow::Result<bool>;

    fn verify_password(&self, user: &User, plain: &str) -> bool {
        match password::verify_password(plain, &user.password_hash) {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, user_id = user.id, "stored password hash unreadable");
                false
            }
        }
    }
}

const USER_COLUMNS: &str = "id, email, nickname, password_hash, contact_info, role, created_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn insert(&self, new: &PendingRegistration) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, nickname, password_hash, contact_info)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.email)
        .bind(&new.nickname)
        .bind(&new.password_hash)
        .bind(&new.contact_info)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::DuplicateEmail
            }
            other => StoreError::Other(anyhow::Error::new(other).context("insert user")),
        })
    }

    async fn update_profile(
        &self,
        id: i64,
        nickname: &str,
        contact_info: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET nickname = $2, contact_info = $3
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(nickname)
        .bind(contact_info)
        .fetch_optional(&self.db)
        .await
        .context("update profile")?;
        Ok(user)
    }

    async fn set_role(&self, id: i64, role: Role) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(&self.db)
        .await
        .context("set role")?;
        Ok(user)
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() > 0)
    }
}

#[cfg(test)]
pub use memory::MemoryUserStore;


#[cfg(test)]
mod tests {
    use super::*;

    fn pending(email: &str) -> PendingRegistration {
        PendingRegistration {
            email: email.into(),
            nickname: "Ann".into(),
            password_hash: password::hash_password("pw123").unwrap(),
            contact_info: "555-0100".into(),
        }
    }

    #[tokio::test]
    async fn insert_enforces_unique_email() {
        let store = MemoryUserStore::default();
        let user = store.insert(&pending("a@x.com")).await.unwrap();
        assert_eq!(user.role, Role::User);

        let err = store.insert(&pending("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn email_match_is_case_sensitive() {
        let store = MemoryUserStore::default();
        store.insert(&pending("a@x.com")).await.unwrap();
        assert!(store.find_by_email("A@X.COM").await.unwrap().is_none());
        assert!(store.find_by_email("a@x.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn verify_password_uses_stored_hash() {
        let store = MemoryUserStore::default();
        let user = store.insert(&pending("a@x.com")).await.unwrap();
        assert!(store.verify_password(&user, "pw123"));
        assert!(!store.verify_password(&user, "pw124"));

        let mut broken = user.clone();
        broken.password_hash = "garbage".into();
        assert!(!store.verify_password(&broken, "pw123"));
    }

    #[tokio::test]
    async fn profile_role_and_delete() {
        let store = MemoryUserStore::default();
        let user = store.insert(&pending("a@x.com")).await.unwrap();

        let updated = store
            .update_profile(user.id, "Annie", "555-0199")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.nickname, "Annie");
        assert_eq!(updated.email, "a@x.com");

        let promoted = store.set_role(user.id, Role::Admin).await.unwrap().unwrap();
        assert_eq!(promoted.role, Role::Admin);

        assert!(store.delete(user.id).await.unwrap());
        assert!(!store.delete(user.id).await.unwrap());
        assert!(store.find_by_id(user.id).await.unwrap().is_none());
    }
}

//! # User Repository
//!
//! Users and their location grants. Grant columns are stored as the raw JSON
//! the access-control side wrote (legacy flat ids or typed `{id, kind}`
//! objects) and are only ever normalized on the way out.

use chrono::Utc;
use meridian_core::validation::validate_name;
use meridian_core::{LocationGrants, RequestContext, Role, User};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DbError, DbResult};

const SELECT_USER: &str = r#"
    SELECT id, username, role, allowed_locations, transfer_locations, created_at
    FROM users
"#;

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        UserRepository { pool }
    }

    /// Creates a user. Grant lists are validated as JSON lists before they
    /// are stored.
    pub async fn create(
        &self,
        username: &str,
        role: Role,
        allowed_locations: Option<&str>,
        transfer_locations: Option<&str>,
    ) -> DbResult<User> {
        validate_name("username", username)?;
        LocationGrants::from_json(allowed_locations)?;
        LocationGrants::from_json(transfer_locations)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO users (username, role, allowed_locations, transfer_locations, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id
            "#,
        )
        .bind(username.trim())
        .bind(role)
        .bind(allowed_locations)
        .bind(transfer_locations)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("username", username.trim()),
            other => other,
        })?;

        info!(user_id = id, username = %username.trim(), "User created");
        self.get(id).await
    }

    pub async fn get(&self, id: i64) -> DbResult<User> {
        let sql = format!("{} WHERE id = ?1", SELECT_USER);
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("User", id))
    }

    /// Normalized `allowed_locations ∪ transfer_locations` for a user.
    pub async fn granted_locations(&self, user_id: i64) -> DbResult<LocationGrants> {
        let user = self.get(user_id).await?;
        let allowed = LocationGrants::from_json(user.allowed_locations.as_deref())?;
        let transfer = LocationGrants::from_json(user.transfer_locations.as_deref())?;
        Ok(allowed.union(transfer))
    }

    /// Builds the request context for an authenticated user.
    pub async fn context_for(&self, user_id: i64) -> DbResult<RequestContext> {
        let user = self.get(user_id).await?;
        Ok(RequestContext::for_user(&user)?)
    }
}

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use propdesk_core::validation::normalize_email;
use propdesk_core::{NewUser, PasswordReset, PropdeskError, Result, UpdateProfile, User};

use crate::sqlite::db_err;
use crate::SqliteStore;

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    full_name: String,
    password_hash: String,
    is_admin: bool,
    two_factor_enabled: bool,
    two_factor_secret: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            password_hash: row.password_hash,
            is_admin: row.is_admin,
            two_factor_enabled: row.two_factor_enabled,
            two_factor_secret: row.two_factor_secret,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct PasswordResetRow {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<PasswordResetRow> for PasswordReset {
    fn from(row: PasswordResetRow) -> Self {
        PasswordReset {
            id: row.id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            used_at: row.used_at,
            created_at: row.created_at,
        }
    }
}

pub(crate) async fn insert_user(conn: &mut SqliteConnection, input: &NewUser) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO users (id, email, full_name, password_hash, is_admin, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(normalize_email(&input.email))
    .bind(input.full_name.trim())
    .bind(&input.password_hash)
    .bind(input.is_admin)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await
    .map_err(|e| match db_err(e) {
        PropdeskError::Conflict(_) => {
            PropdeskError::Conflict("an account with this email already exists".to_string())
        }
        other => other,
    })?;
    Ok(id)
}

const USER_COLUMNS: &str = "id, email, full_name, password_hash, is_admin, two_factor_enabled, \
                            two_factor_secret, created_at, updated_at";

impl SqliteStore {
    /// Inserts a user. Emails are stored normalized, so a second account for
    /// the same address is a conflict.
    pub async fn create_user(&self, input: &NewUser) -> Result<User> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let id = insert_user(&mut conn, input).await?;
        drop(conn);

        info!(user_id = %id, "user created");
        self.get_user(id).await
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.map(User::from)
            .ok_or_else(|| PropdeskError::not_found("user", id))
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
                .bind(normalize_email(email))
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(row.map(User::from))
    }

    pub async fn update_user_profile(&self, id: Uuid, input: &UpdateProfile) -> Result<User> {
        if let Some(name) = &input.full_name {
            let result = sqlx::query("UPDATE users SET full_name = ?, updated_at = ? WHERE id = ?")
                .bind(name.trim())
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            if result.rows_affected() == 0 {
                return Err(PropdeskError::not_found("user", id));
            }
        }
        self.get_user(id).await
    }

    pub async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("user", id));
        }
        Ok(())
    }

    /// Stores the pending or active TOTP secret. Disabling passes `None`.
    pub async fn set_two_factor(
        &self,
        id: Uuid,
        secret: Option<&str>,
        enabled: bool,
    ) -> Result<User> {
        let result = sqlx::query(
            "UPDATE users SET two_factor_secret = ?, two_factor_enabled = ?, updated_at = ? WHERE id = ?",
        )
        .bind(secret)
        .bind(enabled)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("user", id));
        }
        self.get_user(id).await
    }

    pub async fn set_admin(&self, id: Uuid, is_admin: bool) -> Result<User> {
        let result = sqlx::query("UPDATE users SET is_admin = ?, updated_at = ? WHERE id = ?")
            .bind(is_admin)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::not_found("user", id));
        }
        self.get_user(id).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC, rowid DESC",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn create_password_reset(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PasswordReset> {
        let reset = PasswordReset {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            used_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO password_resets (id, user_id, token_hash, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(reset.id)
        .bind(reset.user_id)
        .bind(&reset.token_hash)
        .bind(reset.expires_at)
        .bind(reset.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(reset)
    }

    pub async fn find_password_reset(&self, token_hash: &str) -> Result<Option<PasswordReset>> {
        let row: Option<PasswordResetRow> = sqlx::query_as(
            "SELECT id, user_id, token_hash, expires_at, used_at, created_at
             FROM password_resets WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(PasswordReset::from))
    }

    /// Marks the reset as used. Fails with a conflict if it was already
    /// consumed, so a token cannot be replayed.
    pub async fn mark_password_reset_used(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE password_resets SET used_at = ? WHERE id = ? AND used_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(PropdeskError::Conflict(
                "password reset was already used".to_string(),
            ));
        }
        Ok(())
    }
}

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use freightdesk_core::auth::Role;
use freightdesk_core::domain::user::{NewUser, ProfileUpdate, User, UserId};

use super::{decode_error, format_timestamp, parse_timestamp, RepositoryError, UserRepository};
use crate::DbPool;

const USER_COLUMNS: &str = "id, uuid, login, email, name, phone, role, password_hash, created_at";

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User, RepositoryError> {
    let uuid: String = row.try_get("uuid").map_err(decode_error)?;
    let role: String = row.try_get("role").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    Ok(User {
        id: UserId(row.try_get("id").map_err(decode_error)?),
        uuid: Uuid::parse_str(&uuid)
            .map_err(|error| RepositoryError::Decode(format!("invalid user uuid: {error}")))?,
        login: row.try_get("login").map_err(decode_error)?,
        email: row.try_get("email").map_err(decode_error)?,
        name: row.try_get("name").map_err(decode_error)?,
        phone: row.try_get("phone").map_err(decode_error)?,
        role: role
            .parse::<Role>()
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        password_hash: row.try_get("password_hash").map_err(decode_error)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError> {
        let login = user.login.trim().to_string();
        if login.is_empty() {
            return Err(RepositoryError::Validation("login is required".to_string()));
        }

        let result = sqlx::query(
            "INSERT INTO app_user (uuid, login, email, name, phone, role, password_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&login)
        .bind(user.email.trim())
        .bind(user.name.trim())
        .bind(user.phone.trim())
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                RepositoryError::Conflict(format!("login `{login}` is already taken"))
            } else {
                RepositoryError::Database(error)
            }
        })?;

        let id = UserId(result.last_insert_rowid());
        self.find_by_id(id).await?.ok_or_else(|| RepositoryError::not_found("user", id))
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE login = ?"))
            .bind(login.trim())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE uuid = ?"))
            .bind(uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_profile(
        &self,
        id: UserId,
        update: &ProfileUpdate,
    ) -> Result<User, RepositoryError> {
        let mut user =
            self.find_by_id(id).await?.ok_or_else(|| RepositoryError::not_found("user", id))?;
        update.apply(&mut user);

        sqlx::query("UPDATE app_user SET name = ?, phone = ?, email = ? WHERE id = ?")
            .bind(&user.name)
            .bind(&user.phone)
            .bind(&user.email)
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(user)
    }
}

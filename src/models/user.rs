use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{query, query_as, FromRow, PgPool};
use tracing::debug;
use utoipa::ToSchema;

use crate::auth::{normalize_email, Role};

const USER_COLUMNS: &str = "id::text AS id, email, hashed_password, name, role, company_id, \
     is_active, created_at, updated_at";

pub const DEFAULT_COMPANY: &str = "default-company";

/// Raw row as stored; older tables may hold odd role strings or nulls.
#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    email: String,
    hashed_password: Option<String>,
    name: Option<String>,
    role: Option<String>,
    company_id: Option<String>,
    is_active: Option<bool>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub company_id: String,
    pub is_active: bool,
    #[serde(skip)]
    pub hashed_password: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            name: row.name.unwrap_or_default(),
            role: Role::parse_or_default(row.role.as_deref()),
            company_id: row
                .company_id
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_COMPANY.to_string()),
            is_active: row.is_active.unwrap_or(true),
            hashed_password: row.hashed_password.filter(|h| !h.is_empty()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub role: Role,
    pub company_id: &'a str,
    pub hashed_password: &'a str,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Case-insensitive, whitespace-insensitive lookup.
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(trim(email)) = $1 LIMIT 1");
        let row = query_as::<_, UserRow>(&sql)
            .bind(normalize_email(email))
            .fetch_optional(pool)
            .await?;
        Ok(row.map(User::from))
    }

    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Self>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id::text = $1");
        let row = query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Inserts a user and lets the database assign the key, whichever key type the
    /// reconciled table uses.
    pub async fn create(pool: &PgPool, new_user: NewUser<'_>) -> Result<Self> {
        let sql = format!(
            r#"
            INSERT INTO users (email, hashed_password, name, role, company_id, is_active)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = query_as::<_, UserRow>(&sql)
            .bind(normalize_email(new_user.email))
            .bind(new_user.hashed_password)
            .bind(new_user.name.trim())
            .bind(new_user.role.as_str())
            .bind(new_user.company_id)
            .fetch_one(pool)
            .await?;

        debug!("User created: {}", row.id);
        Ok(row.into())
    }

    /// Persists the role re-check done on login and, when given, an upgraded hash.
    pub async fn record_login(
        pool: &PgPool,
        id: &str,
        role: Role,
        upgraded_hash: Option<&str>,
    ) -> Result<()> {
        query(
            r#"
            UPDATE users
            SET role = $1,
                hashed_password = COALESCE($2, hashed_password),
                updated_at = NOW()
            WHERE id::text = $3
            "#,
        )
        .bind(role.as_str())
        .bind(upgraded_hash)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Refreshes a user seen again through the federated identity provider.
    pub async fn refresh_federated(
        pool: &PgPool,
        id: &str,
        name: &str,
        role: Role,
        company_id: Option<&str>,
    ) -> Result<Self> {
        let sql = format!(
            r#"
            UPDATE users
            SET name = $1, role = $2, company_id = COALESCE($3, company_id),
                is_active = TRUE, updated_at = NOW()
            WHERE id::text = $4
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = query_as::<_, UserRow>(&sql)
            .bind(name)
            .bind(role.as_str())
            .bind(company_id)
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(row.into())
    }

    pub async fn update_profile(
        pool: &PgPool,
        id: &str,
        name: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<Option<Self>> {
        let sql = format!(
            r#"
            UPDATE users
            SET name = COALESCE($1, name), is_active = COALESCE($2, is_active), updated_at = NOW()
            WHERE id::text = $3
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = query_as::<_, UserRow>(&sql)
            .bind(name)
            .bind(is_active)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Active employees, optionally limited to one company.
    pub async fn list_employees(pool: &PgPool, company_id: Option<&str>) -> Result<Vec<Self>> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE lower(role) = 'employee'
              AND COALESCE(is_active, TRUE)
              AND ($1::text IS NULL OR company_id = $1)
            ORDER BY name
            "#
        );
        let rows = query_as::<_, UserRow>(&sql)
            .bind(company_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }
}

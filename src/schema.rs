//! Idempotent startup reconciliation of the relational schema.
//!
//! The `users` table may predate this service (integer keys, missing columns), so it is brought
//! up to the required shape in place. Domain tables are created when missing.

use anyhow::Result;
use sqlx::{query, query_as, PgPool, Postgres, Transaction};
use tracing::{info, warn};

/// Required `users` columns and the DDL used when one is missing. Columns added to a table that
/// already holds rows must be nullable or carry a default.
const USER_COLUMNS: &[(&str, &str)] = &[
    ("email", "VARCHAR(255)"),
    ("hashed_password", "VARCHAR(255) NOT NULL DEFAULT ''"),
    ("name", "VARCHAR(255) NOT NULL DEFAULT ''"),
    ("role", "VARCHAR(50) NOT NULL DEFAULT 'employee'"),
    ("company_id", "VARCHAR(255) NOT NULL DEFAULT 'default-company'"),
    ("is_active", "BOOLEAN NOT NULL DEFAULT TRUE"),
    ("created_at", "TIMESTAMPTZ DEFAULT NOW()"),
    ("updated_at", "TIMESTAMPTZ DEFAULT NOW()"),
];

/// Storage type of `users.id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserKey {
    Integer,
    Text,
    Uuid,
}

impl UserKey {
    pub fn classify(data_type: &str) -> Option<Self> {
        match data_type {
            "integer" | "bigint" | "smallint" => Some(UserKey::Integer),
            "character varying" | "text" | "character" => Some(UserKey::Text),
            "uuid" => Some(UserKey::Uuid),
            _ => None,
        }
    }

    /// Only a textual key can be the target of the VARCHAR owner columns.
    fn reference(&self) -> &'static str {
        match self {
            UserKey::Text => " REFERENCES users(id) ON DELETE CASCADE",
            UserKey::Integer | UserKey::Uuid => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    pub user_key: UserKey,
    pub added_columns: Vec<&'static str>,
}

pub fn missing_user_columns<'a, I>(existing: I) -> Vec<(&'static str, &'static str)>
where
    I: IntoIterator<Item = &'a str>,
{
    let existing: Vec<&str> = existing.into_iter().collect();
    USER_COLUMNS
        .iter()
        .filter(|(name, _)| !existing.contains(name))
        .copied()
        .collect()
}

/// DDL for the domain tables, in dependency order.
pub fn domain_tables(user_key: UserKey) -> Vec<String> {
    let owner = user_key.reference();
    vec![
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS customers (
                id UUID PRIMARY KEY,
                employee_id VARCHAR(64) NOT NULL{owner},
                phone_number VARCHAR(50) NOT NULL,
                alias VARCHAR(255),
                name VARCHAR(255),
                company VARCHAR(255),
                email VARCHAR(255),
                last_call_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                id UUID PRIMARY KEY,
                user_id VARCHAR(64) NOT NULL{owner},
                customer_number VARCHAR(50) NOT NULL,
                customer_name VARCHAR(255),
                call_type VARCHAR(20) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'recording',
                started_at TIMESTAMPTZ NOT NULL,
                ended_at TIMESTAMPTZ,
                duration_sec INTEGER,
                audio_bytes BYTEA,
                audio_file_size BIGINT,
                audio_mime_type VARCHAR(100),
                firebase_call_id VARCHAR(255),
                firebase_audio_url TEXT,
                transcript_id UUID,
                transcript_text TEXT,
                summary_id UUID,
                ai_summary TEXT,
                sentiment_score DOUBLE PRECISION,
                notes TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        r#"
        CREATE TABLE IF NOT EXISTS transcripts (
            id UUID PRIMARY KEY,
            call_id UUID NOT NULL REFERENCES calls(id) ON DELETE CASCADE,
            full_text TEXT NOT NULL,
            provider VARCHAR(50),
            language VARCHAR(20),
            confidence_score DOUBLE PRECISION,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS ai_summaries (
            id UUID PRIMARY KEY,
            call_id UUID NOT NULL REFERENCES calls(id) ON DELETE CASCADE,
            transcript_id UUID NOT NULL REFERENCES transcripts(id) ON DELETE CASCADE,
            highlights JSONB NOT NULL DEFAULT '[]'::jsonb,
            sentiment VARCHAR(255) NOT NULL DEFAULT 'neutral',
            next_steps JSONB NOT NULL DEFAULT '[]'::jsonb,
            raw_response TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        .to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id UUID PRIMARY KEY,
                customer_id UUID NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
                employee_id VARCHAR(64) NOT NULL{owner},
                content TEXT NOT NULL,
                is_from_user BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        "CREATE INDEX IF NOT EXISTS idx_customers_employee_id ON customers(employee_id)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_calls_user_id ON calls(user_id)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_calls_customer_number ON calls(customer_number)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_customer_employee \
         ON chat_messages(customer_id, employee_id)"
            .to_string(),
    ]
}

/// Runs the whole reconciliation in one transaction. Safe to run on every start.
pub async fn reconcile(pool: &PgPool) -> Result<SchemaReport> {
    let mut tx = pool.begin().await?;

    let report = reconcile_users(&mut tx).await?;
    if report.user_key != UserKey::Text {
        warn!(
            "[schema] users.id is {:?}; owner columns reference it by value only",
            report.user_key
        );
    }
    for ddl in domain_tables(report.user_key) {
        query(&ddl).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    info!("Schema reconciliation complete");
    Ok(report)
}

async fn reconcile_users(tx: &mut Transaction<'_, Postgres>) -> Result<SchemaReport> {
    query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id VARCHAR(36) PRIMARY KEY DEFAULT gen_random_uuid()::text,
            email VARCHAR(255) NOT NULL,
            hashed_password VARCHAR(255) NOT NULL DEFAULT '',
            name VARCHAR(255) NOT NULL DEFAULT '',
            role VARCHAR(50) NOT NULL DEFAULT 'employee',
            company_id VARCHAR(255) NOT NULL DEFAULT 'default-company',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ DEFAULT NOW(),
            updated_at TIMESTAMPTZ DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    let columns: Vec<(String, String, Option<String>)> = query_as(
        r#"
        SELECT column_name::text, data_type::text, column_default::text
        FROM information_schema.columns
        WHERE table_schema = current_schema() AND table_name = 'users'
        "#,
    )
    .fetch_all(&mut **tx)
    .await?;

    let mut added_columns = Vec::new();
    for (name, ddl) in missing_user_columns(columns.iter().map(|(n, _, _)| n.as_str())) {
        warn!("[schema] Adding missing column 'users.{}'", name);
        query(&format!("ALTER TABLE users ADD COLUMN {name} {ddl}"))
            .execute(&mut **tx)
            .await?;
        added_columns.push(name);
    }

    query(
        r#"
        CREATE OR REPLACE FUNCTION set_updated_at()
        RETURNS TRIGGER AS $$
        BEGIN
            NEW.updated_at = NOW();
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql
        "#,
    )
    .execute(&mut **tx)
    .await?;
    query(
        r#"
        DO $$ BEGIN
            IF NOT EXISTS (SELECT 1 FROM pg_trigger WHERE tgname = 'users_set_updated_at') THEN
                CREATE TRIGGER users_set_updated_at
                BEFORE UPDATE ON users
                FOR EACH ROW EXECUTE FUNCTION set_updated_at();
            END IF;
        END $$
        "#,
    )
    .execute(&mut **tx)
    .await?;

    let id_column = columns.iter().find(|(name, _, _)| name == "id");
    let user_key = match id_column {
        None => {
            warn!("[schema] Adding missing column 'users.id'");
            query("ALTER TABLE users ADD COLUMN id VARCHAR(36) DEFAULT gen_random_uuid()::text")
                .execute(&mut **tx)
                .await?;
            query("UPDATE users SET id = gen_random_uuid()::text WHERE id IS NULL")
                .execute(&mut **tx)
                .await?;
            ensure_primary_key(tx).await?;
            UserKey::Text
        }
        Some((_, data_type, default)) => {
            let key = UserKey::classify(data_type).ok_or_else(|| {
                anyhow::anyhow!("unsupported users.id column type: {data_type}")
            })?;
            match key {
                UserKey::Integer => {
                    query("CREATE SEQUENCE IF NOT EXISTS users_id_seq")
                        .execute(&mut **tx)
                        .await?;
                    query("ALTER TABLE users ALTER COLUMN id SET DEFAULT nextval('users_id_seq')")
                        .execute(&mut **tx)
                        .await?;
                    query("SELECT setval('users_id_seq', COALESCE((SELECT MAX(id) FROM users), 0) + 1, false)")
                        .execute(&mut **tx)
                        .await?;
                    ensure_primary_key(tx).await?;
                }
                UserKey::Text if default.is_none() => {
                    info!("[schema] Attaching uuid default to users.id");
                    query("ALTER TABLE users ALTER COLUMN id SET DEFAULT gen_random_uuid()::text")
                        .execute(&mut **tx)
                        .await?;
                }
                UserKey::Uuid if default.is_none() => {
                    query("ALTER TABLE users ALTER COLUMN id SET DEFAULT gen_random_uuid()")
                        .execute(&mut **tx)
                        .await?;
                }
                _ => {}
            }
            key
        }
    };

    query("CREATE UNIQUE INDEX IF NOT EXISTS users_email_unique_ci ON users (lower(trim(email)))")
        .execute(&mut **tx)
        .await?;

    Ok(SchemaReport {
        user_key,
        added_columns,
    })
}

async fn ensure_primary_key(tx: &mut Transaction<'_, Postgres>) -> Result<()> {
    query(
        r#"
        DO $$ BEGIN
            IF NOT EXISTS (
                SELECT 1 FROM pg_constraint
                WHERE conrelid = 'users'::regclass AND contype = 'p'
            ) THEN
                ALTER TABLE users ADD CONSTRAINT users_pkey PRIMARY KEY (id);
            END IF;
        END $$
        "#,
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{query, query_as, FromRow, PgPool};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

const CUSTOMER_COLUMNS: &str = "id, employee_id, phone_number, alias, name, company, email, \
     last_call_at, created_at, updated_at";

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub employee_id: String,
    pub phone_number: String,
    pub alias: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
    pub last_call_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contact details as written by create and update. Absent fields are left untouched on update.
#[derive(Debug, Clone, Default)]
pub struct CustomerDetails {
    pub phone_number: Option<String>,
    pub alias: Option<String>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub email: Option<String>,
}

impl Customer {
    pub fn accessible_by(&self, user_id: &str, is_admin: bool) -> bool {
        is_admin || self.employee_id == user_id
    }

    pub async fn create(
        pool: &PgPool,
        employee_id: &str,
        phone_number: &str,
        details: CustomerDetails,
    ) -> Result<Self> {
        let sql = format!(
            r#"
            INSERT INTO customers (id, employee_id, phone_number, alias, name, company, email)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {CUSTOMER_COLUMNS}
            "#
        );
        let customer = query_as::<_, Customer>(&sql)
            .bind(Uuid::new_v4())
            .bind(employee_id)
            .bind(phone_number.trim())
            .bind(&details.alias)
            .bind(&details.name)
            .bind(&details.company)
            .bind(&details.email)
            .fetch_one(pool)
            .await?;

        debug!("Customer created: {}", customer.id);
        Ok(customer)
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>> {
        let sql = format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1");
        Ok(query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?)
    }

    /// All customers when `employee_id` is `None`.
    pub async fn list(pool: &PgPool, employee_id: Option<&str>) -> Result<Vec<Self>> {
        let sql = format!(
            r#"
            SELECT {CUSTOMER_COLUMNS} FROM customers
            WHERE ($1::text IS NULL OR employee_id = $1)
            ORDER BY last_call_at DESC NULLS LAST, created_at DESC
            "#
        );
        Ok(query_as::<_, Customer>(&sql)
            .bind(employee_id)
            .fetch_all(pool)
            .await?)
    }

    pub async fn update(pool: &PgPool, id: Uuid, details: CustomerDetails) -> Result<Self> {
        let sql = format!(
            r#"
            UPDATE customers
            SET phone_number = COALESCE($1, phone_number),
                alias = COALESCE($2, alias),
                name = COALESCE($3, name),
                company = COALESCE($4, company),
                email = COALESCE($5, email),
                updated_at = NOW()
            WHERE id = $6
            RETURNING {CUSTOMER_COLUMNS}
            "#
        );
        Ok(query_as::<_, Customer>(&sql)
            .bind(details.phone_number.as_deref().map(str::trim))
            .bind(&details.alias)
            .bind(&details.name)
            .bind(&details.company)
            .bind(&details.email)
            .bind(id)
            .fetch_one(pool)
            .await?)
    }

    /// Bumps `last_call_at` on the employee's customers with this number.
    pub async fn touch_last_call(
        pool: &PgPool,
        employee_id: &str,
        phone_number: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        query(
            r#"
            UPDATE customers
            SET last_call_at = GREATEST(COALESCE(last_call_at, $1), $1), updated_at = NOW()
            WHERE employee_id = $2 AND phone_number = $3
            "#,
        )
        .bind(at)
        .bind(employee_id)
        .bind(phone_number.trim())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
        let result = query("DELETE FROM customers WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_owner_or_admin_may_access() {
        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4(),
            employee_id: "emp-1".to_string(),
            phone_number: "+15550100".to_string(),
            alias: Some("Acme buyer".to_string()),
            name: None,
            company: Some("Acme".to_string()),
            email: None,
            last_call_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(customer.accessible_by("emp-1", false));
        assert!(!customer.accessible_by("emp-2", false));
        assert!(customer.accessible_by("emp-2", true));

        let json = serde_json::to_value(&customer).unwrap();
        assert_eq!(json["phoneNumber"], "+15550100");
        assert_eq!(json["employeeId"], "emp-1");
    }
}

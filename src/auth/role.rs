use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Employee,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Admin => "admin",
        }
    }

    /// Strict parse of a role string, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "employee" => Some(Role::Employee),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Anything that is not a recognised role becomes `Employee`.
    pub fn parse_or_default(raw: Option<&str>) -> Role {
        raw.and_then(Role::parse).unwrap_or(Role::Employee)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single email normalisation used for lookups, uniqueness and the allowlist.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Emails that always resolve to `Role::Admin`.
#[derive(Clone, Debug, Default)]
pub struct AdminAllowlist {
    emails: HashSet<String>,
}

impl AdminAllowlist {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        AdminAllowlist {
            emails: emails
                .into_iter()
                .map(|e| normalize_email(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&normalize_email(email))
    }

    /// Role resolution shared by signup, login and federated sync.
    pub fn resolve_role(&self, email: &str, requested: Option<&str>) -> Role {
        if self.contains(email) {
            return Role::Admin;
        }
        Role::parse_or_default(requested)
    }
}

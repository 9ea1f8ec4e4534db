use std::fmt;

/// Cheap and fast first, most capable last.
pub const FALLBACK_MODELS: &[&str] = &[
    "gemini-2.0-flash-lite",
    "gemini-2.0-flash",
    "gemini-1.5-flash-latest",
    "gemini-1.5-flash",
    "gemini-1.5-pro-latest",
    "gemini-1.5-pro",
];

/// Stable first, beta second.
pub const API_VERSIONS: &[&str] = &["v1", "v1beta"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Caller,
    Server,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Caller => "client",
            CredentialSource::Server => "server",
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub source: CredentialSource,
    pub key: String,
}

impl Credential {
    /// First six characters only.
    pub fn masked(&self) -> String {
        if self.key.chars().count() > 10 {
            format!("{}...", self.key.chars().take(6).collect::<String>())
        } else {
            "***".to_string()
        }
    }
}

/// One request to make: which credential, protocol version and model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub credential: usize,
    pub api_version: String,
    pub model: String,
}

/// The full ordered attempt sequence: credential, then version, then model.
#[derive(Debug, Clone, Default)]
pub struct AttemptPlan {
    pub credentials: Vec<Credential>,
    pub candidates: Vec<Candidate>,
}

impl AttemptPlan {
    pub fn build(
        caller_key: Option<&str>,
        server_key: Option<&str>,
        preferred_model: Option<&str>,
        fallback_models: &[&str],
        api_versions: &[&str],
    ) -> Self {
        let credentials = credential_order(caller_key, server_key);
        let models = model_order(preferred_model, fallback_models);

        let mut candidates = Vec::with_capacity(credentials.len() * api_versions.len() * models.len());
        for credential in 0..credentials.len() {
            for version in api_versions {
                for model in &models {
                    candidates.push(Candidate {
                        credential,
                        api_version: version.to_string(),
                        model: model.clone(),
                    });
                }
            }
        }

        Self {
            credentials,
            candidates,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn credential(&self, candidate: &Candidate) -> &Credential {
        &self.credentials[candidate.credential]
    }
}

/// Caller key first, then the server key when it differs.
pub fn credential_order(caller_key: Option<&str>, server_key: Option<&str>) -> Vec<Credential> {
    let caller = caller_key.map(str::trim).filter(|k| !k.is_empty());
    let server = server_key.map(str::trim).filter(|k| !k.is_empty());

    let mut credentials = Vec::with_capacity(2);
    if let Some(key) = caller {
        credentials.push(Credential {
            source: CredentialSource::Caller,
            key: key.to_string(),
        });
    }
    if let Some(key) = server.filter(|k| Some(*k) != caller) {
        credentials.push(Credential {
            source: CredentialSource::Server,
            key: key.to_string(),
        });
    }
    credentials
}

pub fn model_order(preferred: Option<&str>, fallback: &[&str]) -> Vec<String> {
    let mut models: Vec<String> = Vec::with_capacity(fallback.len() + 1);
    let preferred = preferred.map(str::trim).filter(|m| !m.is_empty());
    for model in preferred.into_iter().chain(fallback.iter().copied()) {
        if !models.iter().any(|m| m == model) {
            models.push(model.to_string());
        }
    }
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_caller_first_without_duplicates() {
        let creds = credential_order(Some(" A "), Some("B"));
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].source, CredentialSource::Caller);
        assert_eq!(creds[0].key, "A");
        assert_eq!(creds[1].key, "B");

        let same = credential_order(Some("A"), Some("A"));
        assert_eq!(same.len(), 1);

        let blank_caller = credential_order(Some("   "), Some("B"));
        assert_eq!(blank_caller[0].source, CredentialSource::Server);

        assert!(credential_order(None, None).is_empty());
    }

    #[test]
    fn preferred_model_leads_and_is_not_repeated() {
        let models = model_order(Some("gemini-2.0-flash"), FALLBACK_MODELS);
        assert_eq!(models[0], "gemini-2.0-flash");
        assert_eq!(models[1], "gemini-2.0-flash-lite");
        assert_eq!(models.len(), FALLBACK_MODELS.len());
    }

    #[test]
    fn plan_nests_credential_version_model() {
        let plan = AttemptPlan::build(Some("A"), Some("B"), Some("M"), &["X", "Y"], &["v1", "v2"]);
        let order: Vec<(&str, &str, &str)> = plan
            .candidates
            .iter()
            .map(|c| (plan.credential(c).key.as_str(), c.api_version.as_str(), c.model.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("A", "v1", "M"),
                ("A", "v1", "X"),
                ("A", "v1", "Y"),
                ("A", "v2", "M"),
                ("A", "v2", "X"),
                ("A", "v2", "Y"),
                ("B", "v1", "M"),
                ("B", "v1", "X"),
                ("B", "v1", "Y"),
                ("B", "v2", "M"),
                ("B", "v2", "X"),
                ("B", "v2", "Y"),
            ]
        );
    }

    #[test]
    fn masks_keys() {
        let long = Credential {
            source: CredentialSource::Server,
            key: "AIzaSyExampleKey123".to_string(),
        };
        assert_eq!(long.masked(), "AIzaSy...");
        let short = Credential {
            source: CredentialSource::Server,
            key: "short".to_string(),
        };
        assert_eq!(short.masked(), "***");
    }
}

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};
use rand::{distributions::Alphanumeric, Rng};
use tracing::warn;

use super::AuthError;

/// Hashes new passwords with Argon2id and still verifies legacy bcrypt hashes.
#[derive(Clone, Default)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scheme {
    Argon2,
    Bcrypt,
    Unknown,
}

fn scheme_of(hash: &str) -> Scheme {
    if hash.starts_with("$argon2") {
        Scheme::Argon2
    } else if ["$2a$", "$2b$", "$2y$", "$2x$"]
        .iter()
        .any(|prefix| hash.starts_with(prefix))
    {
        Scheme::Bcrypt
    } else {
        Scheme::Unknown
    }
}

impl PasswordHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Unknown or malformed hashes never verify.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match scheme_of(hash) {
            Scheme::Argon2 => match PasswordHash::new(hash) {
                Ok(parsed) => self
                    .argon2
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok(),
                Err(e) => {
                    warn!("Stored argon2 hash is malformed: {}", e);
                    false
                }
            },
            Scheme::Bcrypt => bcrypt::verify(password, hash).unwrap_or_else(|e| {
                warn!("Stored bcrypt hash is malformed: {}", e);
                false
            }),
            Scheme::Unknown => false,
        }
    }

    /// True for anything not produced by `hash`.
    pub fn needs_rehash(&self, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => parsed.algorithm != argon2::ARGON2ID_IDENT,
            Err(_) => true,
        }
    }
}

/// Placeholder secret for accounts provisioned from a federated identity.
pub fn random_placeholder_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_own_hashes() {
        let hasher = PasswordHasher::new();
        for password in ["pw", "correct horse battery staple", "ünïcødé-🔑", ""] {
            let hash = hasher.hash(password).unwrap();
            assert!(hash.starts_with("$argon2id$"));
            assert!(hasher.verify(password, &hash));
            assert!(!hasher.verify(&format!("{password}x"), &hash));
            assert!(!hasher.needs_rehash(&hash));
        }
    }

    #[test]
    fn salts_every_hash() {
        let hasher = PasswordHasher::new();
        assert_ne!(hasher.hash("pw").unwrap(), hasher.hash("pw").unwrap());
    }

    #[test]
    fn accepts_legacy_bcrypt() {
        let hasher = PasswordHasher::new();
        let legacy = bcrypt::hash("hunter2", 4).unwrap();
        assert!(hasher.verify("hunter2", &legacy));
        assert!(!hasher.verify("hunter3", &legacy));
        assert!(hasher.needs_rehash(&legacy));
    }

    #[test]
    fn rejects_unknown_formats() {
        let hasher = PasswordHasher::new();
        assert!(!hasher.verify("pw", ""));
        assert!(!hasher.verify("pw", "pw"));
        assert!(!hasher.verify("pw", "$argon2id$garbage"));
        assert!(hasher.needs_rehash("plain"));
    }

    #[test]
    fn placeholder_passwords_are_random() {
        let a = random_placeholder_password();
        assert_eq!(a.len(), 32);
        assert_ne!(a, random_placeholder_password());
    }
}

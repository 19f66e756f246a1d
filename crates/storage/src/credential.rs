//! Job-scoped credentials and connection settings

use secrecy::{ExposeSecret, SecretString};

/// Access key pair (plus optional session token) owned by a single job
///
/// Secrets are zeroized on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct ScopedCredential {
    access_key_id: String,
    secret_access_key: SecretString,
    session_token: Option<SecretString>,
}

impl ScopedCredential {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
            session_token: session_token.map(SecretString::from),
        }
    }

    #[must_use]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    #[must_use]
    pub fn secret_access_key(&self) -> &str {
        self.secret_access_key.expose_secret()
    }

    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_ref().map(ExposeSecret::expose_secret)
    }
}

impl std::fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Everything needed to open a store for one job
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Region name, e.g. "us-east-1"
    pub region: String,

    /// Custom endpoint for S3-compatible services; `None` for AWS
    pub endpoint: Option<String>,

    pub credential: ScopedCredential,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let cred = ScopedCredential::new("AKIDEXAMPLE", "wJalrXUtnFEMI", Some("tok123".into()));
        let printed = format!("{cred:?}");

        assert!(printed.contains("AKIDEXAMPLE"));
        assert!(!printed.contains("wJalrXUtnFEMI"));
        assert!(!printed.contains("tok123"));
    }

    #[test]
    fn test_accessors_expose_values() {
        let cred = ScopedCredential::new("id", "secret", None);
        assert_eq!(cred.access_key_id(), "id");
        assert_eq!(cred.secret_access_key(), "secret");
        assert_eq!(cred.session_token(), None);
    }
}

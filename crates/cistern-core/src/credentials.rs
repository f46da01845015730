//! Connection credentials

use std::fmt;

use serde::{Deserialize, Serialize};

/// Credentials presented when opening a physical connection.
///
/// An empty value means "use the account the connection builder was
/// configured with". The `Debug` impl never reveals the password.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    user: Option<String>,
    password: Option<String>,
}

impl Credentials {
    /// Connect as a specific user
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            password: Some(password.into()),
        }
    }

    /// Connect with the builder's configured default account
    pub fn default_account() -> Self {
        Self {
            user: None,
            password: None,
        }
    }

    /// User name, if one was given
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Password, if one was given
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::default_account()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("app", "s3cret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("app"));
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_default_account_has_no_user() {
        let creds = Credentials::default_account();
        assert!(creds.user().is_none());
        assert!(creds.password().is_none());
        assert_eq!(creds, Credentials::default());
    }
}

//! Kerberos principal names.

use std::fmt;

use crate::error::AuthError;

/// `KRB5_NT_PRINCIPAL`, the name type written for ordinary user and service principals.
pub const NT_PRINCIPAL: u32 = 1;

/// A parsed principal: `component[/component...][@REALM]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalName {
    /// Name components (`svc`, or `MSSQLSvc` / `host:1433`).
    pub components: Vec<String>,
    /// Realm, empty when not yet qualified.
    pub realm: String,
}

impl PrincipalName {
    /// Parse a principal string.
    ///
    /// The realm is whatever follows the last `@`; components are split on `/`.
    pub fn parse(s: &str) -> Result<Self, AuthError> {
        let s = s.trim();
        let (name, realm) = match s.rsplit_once('@') {
            Some((name, realm)) => (name, realm),
            None => (s, ""),
        };

        if name.is_empty() {
            return Err(AuthError::Configuration(format!("invalid principal: '{s}'")));
        }

        let components: Vec<String> = name.split('/').map(str::to_string).collect();
        if components.iter().any(String::is_empty) {
            return Err(AuthError::Configuration(format!(
                "invalid principal: '{s}' has an empty component"
            )));
        }

        Ok(Self {
            components,
            realm: realm.to_string(),
        })
    }

    /// Whether a realm is present.
    #[must_use]
    pub fn has_realm(&self) -> bool {
        !self.realm.is_empty()
    }

    /// Fill in the realm if none was given.
    #[must_use]
    pub fn with_default_realm(mut self, realm: Option<&str>) -> Self {
        if let (false, Some(realm)) = (self.has_realm(), realm) {
            self.realm = realm.to_string();
        }
        self
    }

    /// Components joined with `/`, without the realm.
    #[must_use]
    pub fn name(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.realm.is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}@{}", self.name(), self.realm)
        }
    }
}

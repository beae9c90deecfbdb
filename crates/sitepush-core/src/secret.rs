//! Deploy credentials.
//!
//! The deploy key is kept behind [`DeployKey`], which has no `Display`, no
//! `Serialize`, and a redacted `Debug`. The only way to read it is
//! [`DeployKey::expose`], used when building the `Authorization` header.

use std::fmt;
use thiserror::Error;

/// A secret credential authorizing uploads to one site.
#[derive(Clone, PartialEq, Eq)]
pub struct DeployKey(String);

impl DeployKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the raw key. Never log or persist the returned value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for DeployKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeployKey(***)")
    }
}

#[derive(Debug, Error)]
#[error("credential field '{field}' is empty")]
pub struct CredentialError {
    pub field: &'static str,
}

/// Site identifier plus deploy key. Both are non-empty.
#[derive(Debug, Clone)]
pub struct DeployCredentials {
    site_id: String,
    deploy_key: DeployKey,
}

impl DeployCredentials {
    pub fn new(
        site_id: impl Into<String>,
        deploy_key: DeployKey,
    ) -> Result<Self, CredentialError> {
        let site_id = site_id.into().trim().to_string();
        if site_id.is_empty() {
            return Err(CredentialError { field: "site_id" });
        }
        if deploy_key.is_empty() {
            return Err(CredentialError {
                field: "deploy_key",
            });
        }
        Ok(Self {
            site_id,
            deploy_key,
        })
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn deploy_key(&self) -> &DeployKey {
        &self.deploy_key
    }
}

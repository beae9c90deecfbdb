//! Deploy identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Identifier the hosting provider assigns to a deploy.
/// Opaque to sitepush; only used to build polling URLs and for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct DeployId(String);

impl DeployId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeployId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DeployId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<DeployId> for String {
    fn from(id: DeployId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_serde() {
        let id = DeployId::new("65a1f0c2e4b0");
        assert_eq!(id.to_string(), "65a1f0c2e4b0");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"65a1f0c2e4b0\"");

        let back: DeployId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

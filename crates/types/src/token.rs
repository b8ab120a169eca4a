//! Bearer token pair issued by the backend.

use serde::{Deserialize, Serialize};

/// The access/refresh credential pair returned by login and refresh.
///
/// Both values are opaque. No expiry is tracked client-side: an expired
/// access token is only discovered through a 401 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    /// Create a pair from its two parts.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_ignores_extra_fields() {
        let json = r#"{"access_token":"a","refresh_token":"r","token_type":"bearer"}"#;
        let pair: TokenPair = serde_json::from_str(json).unwrap();
        assert_eq!(pair, TokenPair::new("a", "r"));
    }

    #[test]
    fn test_deserialize_missing_refresh_token_fails() {
        let json = r#"{"access_token":"a"}"#;
        assert!(serde_json::from_str::<TokenPair>(json).is_err());
    }
}

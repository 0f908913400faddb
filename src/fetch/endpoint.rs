use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_method() -> String {
    "GET".to_string()
}

/// Remote endpoint a job pages through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Base URL of the first page; strategy parameters are appended to it
    pub url: String,

    /// HTTP method (defaults to GET)
    #[serde(default = "default_method")]
    pub method: String,

    /// Extra request headers sent with every page
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Authentication scheme
    #[serde(default)]
    pub auth: Auth,
}

/// Authentication applied to every page request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Auth {
    #[default]
    None,

    /// `Authorization: Bearer <token>`
    Bearer { token: String },

    /// HTTP basic authentication
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },

    /// A static key sent in a named header
    ApiKey { header: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults() {
        let endpoint: Endpoint =
            serde_json::from_str(r#"{ "url": "https://api.example.com/items" }"#).unwrap();
        assert_eq!(endpoint.method, "GET");
        assert!(endpoint.headers.is_empty());
        assert_eq!(endpoint.auth, Auth::None);
    }

    #[test]
    fn test_auth_variants() {
        let bearer: Auth = serde_json::from_str(r#"{ "type": "bearer", "token": "t0k" }"#).unwrap();
        assert_eq!(
            bearer,
            Auth::Bearer {
                token: "t0k".to_string()
            }
        );

        let basic: Auth =
            serde_json::from_str(r#"{ "type": "basic", "username": "svc" }"#).unwrap();
        assert_eq!(
            basic,
            Auth::Basic {
                username: "svc".to_string(),
                password: None
            }
        );

        let key: Auth = serde_json::from_str(
            r#"{ "type": "api_key", "header": "X-Api-Key", "value": "secret" }"#,
        )
        .unwrap();
        assert!(matches!(key, Auth::ApiKey { .. }));
    }
}

//! Secret payloads stored in the provider's secret store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::deployment::Database;

/// A secret value (can be a single string or key-value pairs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretValue {
    /// A single secret string.
    String(String),
    /// A map of key-value pairs.
    Map(BTreeMap<String, String>),
}

impl SecretValue {
    /// Get a specific key from a map secret.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self {
            SecretValue::String(s) if key.is_empty() => Some(s),
            SecretValue::Map(m) => m.get(key).map(|s| s.as_str()),
            _ => None,
        }
    }

    /// Serialized form handed to the secret store.
    pub fn to_secret_string(&self) -> String {
        match self {
            SecretValue::String(s) => s.clone(),
            SecretValue::Map(m) => serde_json::to_string(m).unwrap_or_default(),
        }
    }
}

/// Connection details of a provisioned database instance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    pub engine: Database,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl DatabaseCredentials {
    pub fn connection_url(&self) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}",
            self.engine.scheme(),
            self.username,
            self.password,
            self.host,
            self.port,
            self.database
        )
    }

    pub fn to_secret(&self) -> SecretValue {
        let mut map = BTreeMap::new();
        map.insert("engine".to_string(), self.engine.as_str().to_string());
        map.insert("host".to_string(), self.host.clone());
        map.insert("port".to_string(), self.port.to_string());
        map.insert("username".to_string(), self.username.clone());
        map.insert("password".to_string(), self.password.clone());
        map.insert("database".to_string(), self.database.clone());
        map.insert("url".to_string(), self.connection_url());
        SecretValue::Map(map)
    }
}

// Passwords stay out of logs.
impl std::fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .finish()
    }
}

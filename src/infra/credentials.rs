//! External API credential sets and the sources a rotation pool loads them from.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::{AppResult, ResourcePool, ResourceSource};
use crate::infra::persistence::{Command, Connection, ResultRows, Value};

/// Query that lists every stored credential set.
pub const CREDENTIAL_QUERY: &str = "SELECT bot_name, user_id, client_id, access_token FROM api_pool";

/// One set of API credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bot account the credentials belong to.
    pub bot_name: String,
    /// Platform user id.
    pub user_id: String,
    /// Application client id.
    pub client_id: String,
    /// OAuth access token.
    pub access_token: String,
}

impl Credential {
    /// Build a credential set.
    pub fn new(
        bot_name: impl Into<String>,
        user_id: impl Into<String>,
        client_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            bot_name: bot_name.into(),
            user_id: user_id.into(),
            client_id: client_id.into(),
            access_token: access_token.into(),
        }
    }

    /// Usable for API calls: client id and token are both present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.access_token.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("bot_name", &self.bot_name)
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Fixed list of credentials, e.g. from process configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialSource {
    credentials: Vec<Credential>,
}

impl StaticCredentialSource {
    /// Source serving `credentials`.
    #[must_use]
    pub const fn new(credentials: Vec<Credential>) -> Self {
        Self { credentials }
    }
}

impl ResourceSource<Credential> for StaticCredentialSource {
    fn load(&self, capacity: usize) -> AppResult<Vec<Credential>> {
        Ok(self
            .credentials
            .iter()
            .filter(|c| c.is_valid())
            .take(capacity)
            .cloned()
            .collect())
    }

    fn validate(&self, credential: &Credential) -> bool {
        credential.is_valid()
    }
}

/// Loads credentials from the store through a pooled connection.
pub struct QueryCredentialSource<C> {
    connections: Arc<ResourcePool<C>>,
    acquire_attempts: u32,
}

impl<C> QueryCredentialSource<C> {
    /// Read through `connections`, polling up to `acquire_attempts` times for a free one.
    #[must_use]
    pub const fn new(connections: Arc<ResourcePool<C>>, acquire_attempts: u32) -> Self {
        Self {
            connections,
            acquire_attempts,
        }
    }
}

impl<C> fmt::Debug for QueryCredentialSource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCredentialSource")
            .field("connections", &self.connections.name())
            .field("acquire_attempts", &self.acquire_attempts)
            .finish()
    }
}

fn text(rows: &ResultRows, row: usize, column: &str) -> Option<String> {
    match rows.get(row, column)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn parse_credentials(rows: &ResultRows) -> Vec<Credential> {
    (0..rows.len())
        .filter_map(|row| {
            let credential = Credential {
                bot_name: text(rows, row, "bot_name")?,
                user_id: text(rows, row, "user_id").unwrap_or_default(),
                client_id: text(rows, row, "client_id").unwrap_or_default(),
                access_token: text(rows, row, "access_token").unwrap_or_default(),
            };
            if credential.is_valid() {
                Some(credential)
            } else {
                warn!(bot = %credential.bot_name, "skipping incomplete credential row");
                None
            }
        })
        .collect()
}

impl<C: Connection + 'static> ResourceSource<Credential> for QueryCredentialSource<C> {
    fn load(&self, capacity: usize) -> AppResult<Vec<Credential>> {
        let conn = self.connections.acquire_with_retry(self.acquire_attempts)?;
        conn.ensure_open()?;
        let rows = conn.query(&Command::new(CREDENTIAL_QUERY))?;
        drop(conn);
        let mut credentials = parse_credentials(&rows);
        credentials.truncate(capacity);
        Ok(credentials)
    }

    fn validate(&self, credential: &Credential) -> bool {
        credential.is_valid()
    }
}

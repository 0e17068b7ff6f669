//! Relying-party lookup used to resolve the redirect after verification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::storage::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Active,
    Disabled,
}

impl ClientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ClientStatus::Active),
            "disabled" => Ok(ClientStatus::Disabled),
            other => Err(format!("unknown client status: {}", other)),
        }
    }
}

/// A registered relying party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientApplication {
    pub client_id: String,
    pub company_name: String,
    pub status: ClientStatus,
    pub redirect_uris: Vec<String>,
}

impl ClientApplication {
    /// Redirect handed out after a successful verification.
    ///
    /// Only active clients with at least one registered target get one; the
    /// first registered URI wins.
    pub fn redirect_target(&self) -> Option<&str> {
        if self.status != ClientStatus::Active {
            return None;
        }
        self.redirect_uris.first().map(String::as_str)
    }
}

#[async_trait]
pub trait ClientRegistry: Send + Sync {
    async fn find_client(&self, client_id: &str) -> StoreResult<Option<ClientApplication>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(status: ClientStatus, uris: &[&str]) -> ClientApplication {
        ClientApplication {
            client_id: "acme".into(),
            company_name: "Acme".into(),
            status,
            redirect_uris: uris.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn test_redirect_target_requires_active_client_with_targets() {
        assert_eq!(
            client(ClientStatus::Active, &["https://acme.example/done", "https://acme.example/alt"]).redirect_target(),
            Some("https://acme.example/done")
        );
        assert_eq!(client(ClientStatus::Active, &[]).redirect_target(), None);
        assert_eq!(client(ClientStatus::Disabled, &["https://acme.example/done"]).redirect_target(), None);
    }
}

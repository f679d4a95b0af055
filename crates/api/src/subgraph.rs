//! Subgraph client for enumerating the borrower universe.
//!
//! Only used at bootstrap when the durable store has no known accounts yet.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

/// Page size for borrower enumeration.
const PAGE_SIZE: usize = 1000;

const ACCOUNTS_QUERY: &str = r#"
query GetAccounts($first: Int, $lastID: ID) {
  users(
    first: $first
    where: { borrowedReservesCount_gt: 0, id_gt: $lastID }
    orderBy: id
    orderDirection: asc
  ) {
    id
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<AccountsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct AccountsData {
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// GraphQL client over the protocol's subgraph.
#[derive(Debug, Clone)]
pub struct SubgraphClient {
    client: reqwest::Client,
    url: String,
}

impl SubgraphClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Enumerate every account with at least one borrowed reserve, paging by
    /// ascending id until a short page is returned.
    pub async fn borrowers(&self) -> Result<Vec<Address>> {
        let mut accounts = Vec::new();
        let mut last_id = String::new();

        loop {
            let page = self.accounts_page(&last_id).await?;
            let page_len = page.len();

            for user in page {
                match user.id.parse::<Address>() {
                    Ok(address) => accounts.push(address),
                    Err(_) => warn!(id = %user.id, "Skipping malformed account id from subgraph"),
                }
                last_id = user.id;
            }

            debug!(page = page_len, total = accounts.len(), "Subgraph page fetched");

            if page_len < PAGE_SIZE {
                break;
            }
        }

        info!(borrowers = accounts.len(), "Borrower universe enumerated");
        Ok(accounts)
    }

    async fn accounts_page(&self, last_id: &str) -> Result<Vec<User>> {
        let body = json!({
            "query": ACCOUNTS_QUERY,
            "variables": { "first": PAGE_SIZE, "lastID": last_id },
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("subgraph request failed")?
            .error_for_status()
            .context("subgraph returned an error status")?;

        let parsed: GraphQlResponse = response
            .json()
            .await
            .context("subgraph returned malformed JSON")?;

        if let Some(error) = parsed.errors.first() {
            anyhow::bail!("subgraph query error: {}", error.message);
        }

        Ok(parsed.data.map(|d| d.users).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parsing() {
        let raw = r#"{"data":{"users":[{"id":"0x00000000219ab540356cbb839cbe05303d7705fa"}]}}"#;
        let parsed: GraphQlResponse = serde_json::from_str(raw).unwrap();
        let users = parsed.data.unwrap().users;
        assert_eq!(users.len(), 1);
        assert!(users[0].id.parse::<Address>().is_ok());
    }

    #[test]
    fn error_response_parsing() {
        let raw = r#"{"data":null,"errors":[{"message":"indexer overloaded"}]}"#;
        let parsed: GraphQlResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.data.is_none());
        assert_eq!(parsed.errors[0].message, "indexer overloaded");
    }
}

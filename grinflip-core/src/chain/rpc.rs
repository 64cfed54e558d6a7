use crate::chain::BalanceOracle;
use crate::error::{GrinflipError, Result};
use crate::types::{TokenAmount, WalletAddress};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Balance oracle backed by an asset indexer speaking JSON-RPC `searchAssets`.
pub struct RpcBalanceOracle {
    client: reqwest::Client,
    url: String,
    token_mint: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<SearchResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    items: Vec<AssetItem>,
}

#[derive(Debug, Deserialize)]
struct AssetItem {
    id: String,
    token_info: Option<TokenInfo>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    balance: u64,
}

impl RpcBalanceOracle {
    pub fn new(url: impl Into<String>, token_mint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            token_mint: token_mint.into(),
        })
    }

    fn request_body(&self, wallet: &WalletAddress) -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "id": "grinflip",
            "method": "searchAssets",
            "params": {
                "ownerAddress": wallet.as_str(),
                "tokenType": "fungible",
            },
        })
    }

    /// Pick the configured mint out of a `searchAssets` reply. A holder with
    /// no matching asset has a zero balance.
    fn extract_balance(&self, response: RpcResponse) -> Result<TokenAmount> {
        if let Some(error) = response.error {
            return Err(GrinflipError::oracle(format!(
                "searchAssets failed ({}): {}",
                error.code, error.message
            )));
        }

        let units = response
            .result
            .into_iter()
            .flat_map(|r| r.items)
            .find(|item| item.id == self.token_mint)
            .and_then(|item| item.token_info)
            .map(|info| info.balance)
            .unwrap_or(0);

        Ok(TokenAmount::from_units(units))
    }
}

#[async_trait]
impl BalanceOracle for RpcBalanceOracle {
    async fn get_balance(&self, wallet: &WalletAddress) -> Result<TokenAmount> {
        tracing::debug!("Querying {} balance for {}", self.token_mint, wallet.short());

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&self.request_body(wallet))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.extract_balance(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINT: &str = "GRINmint11111111111111111111111111111111111";

    fn oracle() -> RpcBalanceOracle {
        RpcBalanceOracle::new("http://localhost:8899", MINT).unwrap()
    }

    fn parse(body: serde_json::Value) -> RpcResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_extracts_matching_mint() {
        let response = parse(json!({
            "jsonrpc": "2.0",
            "id": "grinflip",
            "result": {
                "total": 2,
                "items": [
                    { "id": "other", "token_info": { "balance": 5, "decimals": 6 } },
                    { "id": MINT, "token_info": { "balance": 1_500_000_000u64, "decimals": 9 } }
                ]
            }
        }));
        assert_eq!(
            oracle().extract_balance(response).unwrap(),
            TokenAmount::from_units(1_500_000_000)
        );
    }

    #[test]
    fn test_missing_mint_is_zero() {
        let response = parse(json!({ "result": { "items": [] } }));
        assert_eq!(oracle().extract_balance(response).unwrap(), TokenAmount::ZERO);
    }

    #[test]
    fn test_rpc_error_surfaces() {
        let response = parse(json!({ "error": { "code": -32602, "message": "bad owner" } }));
        assert!(oracle().extract_balance(response).is_err());
    }
}

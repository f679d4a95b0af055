//! Transaction signing and submission.
//!
//! The nonce is allocated from a local atomic counter so a gas bump can be
//! re-signed and rebroadcast at the same nonce without a round-trip to the
//! RPC endpoint. Only the highest-priced transaction for a nonce is mined,
//! which keeps every liquidation attempt at-most-once on chain.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Locally cached nonce counter.
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial: u64) -> Self {
        Self {
            current: AtomicU64::new(initial),
        }
    }

    /// Allocate the next nonce.
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    /// Peek without allocating.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Force the counter back to the chain value after a failed send.
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// A signed-and-broadcast transaction, retained so the watchdog can
/// rebroadcast the identical payload at the same nonce with a higher bid.
#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub hash: B256,
    pub to: Address,
    pub nonce: u64,
    pub input: Bytes,
    pub value: U256,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub gas_price_wei: u128,
}

/// Signing transaction sender bound to one submitter key.
pub struct TransactionSender {
    rpc_url: String,
    wallet: EthereumWallet,
    address: Address,
    chain_id: u64,
    nonces: NonceManager,
}

impl TransactionSender {
    /// Create a sender from a private key, fetching the initial nonce from
    /// the chain. Also serves as the startup connectivity check.
    pub async fn new(private_key: &str, rpc_url: &str, chain_id: u64) -> Result<Self> {
        let key = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key.parse().context("invalid PRIVATE_KEY")?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
        let block = provider
            .get_block_number()
            .await
            .context("rpc endpoint unreachable")?;
        let initial_nonce = provider.get_transaction_count(address).await?;

        info!(
            address = %address,
            chain_id = chain_id,
            nonce = initial_nonce,
            block = block,
            "Transaction sender initialized"
        );

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            wallet,
            address,
            chain_id,
            nonces: NonceManager::new(initial_nonce),
        })
    }

    /// Public address of the submitter account.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign and broadcast a call with an explicit gas price. Returns as soon
    /// as the transaction is accepted by the endpoint; confirmation is the
    /// watchdog's job.
    pub async fn submit(
        &self,
        to: Address,
        calldata: Bytes,
        gas_price_wei: u128,
        gas_limit: u64,
    ) -> Result<SubmittedTx> {
        let nonce = self.nonces.next();

        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata.clone())
            .with_value(U256::ZERO)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit.into())
            .with_gas_price(gas_price_wei)
            .with_chain_id(self.chain_id);

        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.parse()?);

        let pending = match provider.send_transaction(tx).await {
            Ok(pending) => pending,
            Err(e) => {
                // Give the nonce back so the next attempt does not leave a gap.
                self.sync_nonce().await;
                return Err(e).context("transaction send failed");
            }
        };
        let hash = *pending.tx_hash();

        debug!(tx_hash = %hash, nonce = nonce, "Transaction broadcast");

        Ok(SubmittedTx {
            hash,
            to,
            nonce,
            input: calldata,
            value: U256::ZERO,
            chain_id: self.chain_id,
            gas_limit,
            gas_price_wei,
        })
    }

    /// Rebroadcast a previously submitted transaction with a higher gas
    /// price. Everything else, the nonce included, stays identical.
    pub async fn rebroadcast(&self, prev: &SubmittedTx, gas_price_wei: u128) -> Result<SubmittedTx> {
        let tx = TransactionRequest::default()
            .with_to(prev.to)
            .with_input(prev.input.clone())
            .with_value(prev.value)
            .with_nonce(prev.nonce)
            .with_gas_limit(prev.gas_limit.into())
            .with_gas_price(gas_price_wei)
            .with_chain_id(prev.chain_id);

        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.parse()?);

        let pending = provider
            .send_transaction(tx)
            .await
            .context("gas bump rebroadcast failed")?;
        let hash = *pending.tx_hash();

        info!(
            tx_hash = %hash,
            nonce = prev.nonce,
            gas_price_gwei = gas_price_wei / 1_000_000_000,
            "Rebroadcast at higher gas price"
        );

        Ok(SubmittedTx {
            hash,
            gas_price_wei,
            input: prev.input.clone(),
            ..*prev
        })
    }

    /// Check whether a transaction has been mined.
    /// `Some(true)` = confirmed, `Some(false)` = reverted, `None` = pending.
    pub async fn receipt_status(&self, hash: B256) -> Result<Option<bool>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let receipt = provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|r| r.status()))
    }

    /// Re-read the nonce from the chain after a failed send.
    pub async fn sync_nonce(&self) {
        let provider = match self.rpc_url.parse() {
            Ok(url) => ProviderBuilder::new().on_http(url),
            Err(_) => return,
        };
        match provider.get_transaction_count(self.address).await {
            Ok(chain_nonce) => {
                self.nonces.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => warn!(error = %e, "Failed to sync nonce from chain"),
        }
    }

    /// Current locally cached nonce.
    pub fn current_nonce(&self) -> u64 {
        self.nonces.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_allocation_is_sequential() {
        let nonces = NonceManager::new(7);
        assert_eq!(nonces.current(), 7);
        assert_eq!(nonces.next(), 7);
        assert_eq!(nonces.next(), 8);
        assert_eq!(nonces.current(), 9);

        nonces.reset(3);
        assert_eq!(nonces.next(), 3);
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn sender_creation() {
        // Well-known test key, never funded on mainnet chains.
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let sender = TransactionSender::new(key, "https://polygon-rpc.com", 137).await;
        assert!(sender.is_ok());
        assert_eq!(
            format!("{:#x}", sender.unwrap().address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }
}

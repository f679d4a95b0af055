//! Streaming pending-transaction subscription for the gas-war watchdog.

use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use anyhow::{Context, Result};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tracing::info;

/// The slice of a pending transaction the watchdog cares about.
#[derive(Debug, Clone)]
pub struct PendingTx {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub gas_price: Option<u128>,
    pub input: Bytes,
}

/// Pending-transaction stream over a WebSocket endpoint.
pub struct MempoolListener {
    ws_url: String,
}

impl MempoolListener {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    /// Subscribe to full pending transactions. The stream ends when the
    /// subscription drops; the caller treats that as a disconnect.
    pub async fn subscribe(&self) -> Result<Pin<Box<dyn Stream<Item = PendingTx> + Send>>> {
        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new()
            .on_ws(ws)
            .await
            .context("mempool websocket connect failed")?;

        let sub = provider
            .subscribe_full_pending_transactions()
            .await
            .context("pending transaction subscription failed")?;
        let inner = sub.into_stream();

        info!(ws_url = %self.ws_url, "Subscribed to pending transactions");

        // The provider is moved into the stream state so the WebSocket stays
        // open for as long as the stream is polled.
        let stream = futures::stream::unfold(
            (provider, inner),
            |(_provider, mut stream)| async move {
                stream.next().await.map(|tx| {
                    let pending = PendingTx {
                        hash: tx.hash,
                        from: tx.from,
                        to: tx.to,
                        gas_price: tx.gas_price,
                        input: tx.input.clone(),
                    };
                    (pending, (_provider, stream))
                })
            },
        );

        Ok(Box::pin(stream))
    }
}

//! Mempool front-run defense.
//!
//! After the liquidation call is broadcast, the watchdog streams pending
//! transactions and out-bids any competitor targeting the same borrower by
//! re-signing the identical payload at the same nonce with a 10% higher gas
//! price. Only the highest-priced transaction for the nonce can mine, so the
//! liquidation executes at most once no matter how many bumps go out.

use alloy::primitives::{Address, B256};
use anyhow::Result;
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use liquidator_chain::{MempoolListener, PendingTx, SubmittedTx, TransactionSender};

/// Receipt poll cadence while the watchdog is live.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Out-bid a competitor by 10%, rounded down.
pub fn bump_gas_price(competitor_wei: u128) -> u128 {
    competitor_wei * 11 / 10
}

/// What to do about one observed pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    /// Not a competing liquidation.
    Ignore,
    /// A competitor bidding at or below our price.
    StillAhead { competitor_wei: u128 },
    /// A competitor bidding above us; rebroadcast at the bumped price.
    Outbid { competitor_wei: u128, bid_wei: u128 },
}

/// Pure bidding state for one borrower race.
///
/// A pending transaction competes when it comes from someone else and its
/// calldata contains the borrower's address.
pub struct GasWar {
    own_sender: Address,
    borrower_hex: String,
    current_gas_price: u128,
}

impl GasWar {
    pub fn new(own_sender: Address, borrower: Address, initial_gas_price_wei: u128) -> Self {
        Self {
            own_sender,
            borrower_hex: alloy::primitives::hex::encode(borrower.as_slice()),
            current_gas_price: initial_gas_price_wei,
        }
    }

    pub fn current_gas_price(&self) -> u128 {
        self.current_gas_price
    }

    /// Classify a pending transaction against the current bid.
    pub fn assess(&self, tx: &PendingTx) -> Assessment {
        if tx.from == self.own_sender {
            return Assessment::Ignore;
        }
        if !alloy::primitives::hex::encode(&tx.input).contains(&self.borrower_hex) {
            return Assessment::Ignore;
        }

        let competitor_wei = tx.gas_price.unwrap_or(0);
        if competitor_wei > self.current_gas_price {
            Assessment::Outbid {
                competitor_wei,
                bid_wei: bump_gas_price(competitor_wei),
            }
        } else {
            Assessment::StillAhead { competitor_wei }
        }
    }

    /// Record a successfully broadcast bump.
    pub fn record_bid(&mut self, bid_wei: u128) {
        self.current_gas_price = bid_wei;
    }
}

/// Terminal state of the race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// One of our transactions was mined.
    Confirmed(B256),
    /// Every broadcast transaction failed.
    Exhausted,
    /// The time budget ran out with the race unresolved.
    TimedOut,
}

/// Watch the mempool and the receipts of our own transactions until the
/// race resolves or the deadline passes.
///
/// A lost mempool subscription degrades to receipt polling only; the
/// submitted transaction is already out and must still be tracked.
pub async fn run_watchdog(
    listener: &MempoolListener,
    sender: &TransactionSender,
    borrower: Address,
    first: SubmittedTx,
    timeout: Duration,
) -> Result<WatchdogOutcome> {
    let mut war = GasWar::new(sender.address(), borrower, first.gas_price_wei);
    let mut edited_hashes: HashSet<B256> = HashSet::from([first.hash]);
    let mut latest = first;

    let mut pending_stream: std::pin::Pin<Box<dyn futures::Stream<Item = PendingTx> + Send>> =
        match listener.subscribe().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Mempool subscription failed, polling receipts only");
                Box::pin(futures::stream::pending())
            }
        };

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(RECEIPT_POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!(borrower = %borrower, "Watchdog deadline reached");
                return Ok(WatchdogOutcome::TimedOut);
            }

            observed = pending_stream.next() => match observed {
                Some(tx) => match war.assess(&tx) {
                    Assessment::Outbid { competitor_wei, bid_wei } => {
                        info!(
                            competitor_tx = %tx.hash,
                            competitor_gwei = competitor_wei / 1_000_000_000,
                            bid_gwei = bid_wei / 1_000_000_000,
                            "Competitor ahead, bumping gas price"
                        );
                        match sender.rebroadcast(&latest, bid_wei).await {
                            Ok(bumped) => {
                                edited_hashes.insert(bumped.hash);
                                latest = bumped;
                                war.record_bid(bid_wei);
                            }
                            Err(e) => warn!(error = %e, "Gas bump rebroadcast failed"),
                        }
                    }
                    Assessment::StillAhead { competitor_wei } => {
                        info!(
                            competitor_tx = %tx.hash,
                            competitor_gwei = competitor_wei / 1_000_000_000,
                            our_gwei = war.current_gas_price() / 1_000_000_000,
                            "Competitor observed, still ahead"
                        );
                    }
                    Assessment::Ignore => {}
                },
                None => {
                    warn!("Mempool stream ended, polling receipts only");
                    pending_stream = Box::pin(futures::stream::pending());
                }
            },

            _ = poll.tick() => {
                let mut failed = Vec::new();
                for hash in &edited_hashes {
                    match sender.receipt_status(*hash).await {
                        Ok(Some(true)) => {
                            info!(tx_hash = %hash, "Liquidation transaction confirmed");
                            return Ok(WatchdogOutcome::Confirmed(*hash));
                        }
                        Ok(Some(false)) => {
                            warn!(tx_hash = %hash, "Transaction failed, dropping from race");
                            failed.push(*hash);
                        }
                        Ok(None) => {}
                        Err(e) => debug!(tx_hash = %hash, error = %e, "Receipt poll failed"),
                    }
                }
                for hash in failed {
                    edited_hashes.remove(&hash);
                }
                if edited_hashes.is_empty() {
                    return Ok(WatchdogOutcome::Exhausted);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Bytes;

    const GWEI: u128 = 1_000_000_000;

    fn pending(from: Address, input: Vec<u8>, gas_price_gwei: u128) -> PendingTx {
        PendingTx {
            hash: B256::repeat_byte(0x77),
            from,
            to: Some(Address::repeat_byte(0x55)),
            gas_price: Some(gas_price_gwei * GWEI),
            input: Bytes::from(input),
        }
    }

    fn competitor_calldata(borrower: Address) -> Vec<u8> {
        // Selector plus ABI-padded borrower argument.
        let mut data = vec![0xde, 0xad, 0xbe, 0xef];
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(borrower.as_slice());
        data
    }

    #[test]
    fn bump_is_floor_eleven_tenths() {
        assert_eq!(bump_gas_price(50 * GWEI), 55 * GWEI);
        assert_eq!(bump_gas_price(33), 36);
        assert_eq!(bump_gas_price(0), 0);
    }

    #[test]
    fn higher_competitor_triggers_bump() {
        let us = Address::repeat_byte(0x01);
        let borrower = Address::repeat_byte(0xAB);
        let war = GasWar::new(us, borrower, 30 * GWEI);

        let tx = pending(Address::repeat_byte(0x02), competitor_calldata(borrower), 50);
        assert_eq!(
            war.assess(&tx),
            Assessment::Outbid {
                competitor_wei: 50 * GWEI,
                bid_wei: 55 * GWEI,
            }
        );
    }

    #[test]
    fn lower_or_equal_competitor_stays_ahead() {
        let us = Address::repeat_byte(0x01);
        let borrower = Address::repeat_byte(0xAB);
        let war = GasWar::new(us, borrower, 30 * GWEI);

        let tx = pending(Address::repeat_byte(0x02), competitor_calldata(borrower), 20);
        assert_eq!(
            war.assess(&tx),
            Assessment::StillAhead {
                competitor_wei: 20 * GWEI
            }
        );

        let tx = pending(Address::repeat_byte(0x02), competitor_calldata(borrower), 30);
        assert!(matches!(war.assess(&tx), Assessment::StillAhead { .. }));
    }

    #[test]
    fn own_transactions_are_ignored() {
        let us = Address::repeat_byte(0x01);
        let borrower = Address::repeat_byte(0xAB);
        let war = GasWar::new(us, borrower, 30 * GWEI);

        let tx = pending(us, competitor_calldata(borrower), 500);
        assert_eq!(war.assess(&tx), Assessment::Ignore);
    }

    #[test]
    fn unrelated_calldata_is_ignored() {
        let us = Address::repeat_byte(0x01);
        let borrower = Address::repeat_byte(0xAB);
        let war = GasWar::new(us, borrower, 30 * GWEI);

        let other = Address::repeat_byte(0xCD);
        let tx = pending(Address::repeat_byte(0x02), competitor_calldata(other), 500);
        assert_eq!(war.assess(&tx), Assessment::Ignore);
    }

    #[test]
    fn recorded_bid_raises_the_bar() {
        let us = Address::repeat_byte(0x01);
        let borrower = Address::repeat_byte(0xAB);
        let mut war = GasWar::new(us, borrower, 30 * GWEI);

        war.record_bid(55 * GWEI);
        assert_eq!(war.current_gas_price(), 55 * GWEI);

        // A 50 gwei competitor no longer outbids us.
        let tx = pending(Address::repeat_byte(0x02), competitor_calldata(borrower), 50);
        assert!(matches!(war.assess(&tx), Assessment::StillAhead { .. }));

        // A 60 gwei competitor does, and the bump compounds.
        let tx = pending(Address::repeat_byte(0x02), competitor_calldata(borrower), 60);
        assert_eq!(
            war.assess(&tx),
            Assessment::Outbid {
                competitor_wei: 60 * GWEI,
                bid_wei: 66 * GWEI,
            }
        );
    }
}

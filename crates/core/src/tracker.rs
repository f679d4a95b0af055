//! Watchlist tracker: bounded, risk-ranked account set and the control loop
//! that drives the per-account state machine.
//!
//! The tracked set lives in memory and is replaced wholesale at the end of
//! each iteration; the durable store is the authority across restarts and
//! lags the in-memory state by at most one iteration.

use alloy::primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TrackerSettings;
use crate::math::{is_liquidatable, wad_to_f64, WAD};
use liquidator_api::{
    account_blob_key, SetStore, SubgraphClient, ALL_ACCOUNTS_SET, BLACKLIST_SET, TRACKED_SET,
};
use liquidator_chain::{AccountReader, AccountSummary};

/// Lifecycle state of a tracked account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Tracked,
    Liquidating,
    Removed,
}

/// One account under observation.
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    pub address: Address,
    pub last_health_factor: U256,
    pub last_checked_at: Instant,
    pub state: EntryState,
}

impl TrackedEntry {
    fn new(address: Address, health_factor: U256) -> Self {
        Self {
            address,
            last_health_factor: health_factor,
            last_checked_at: Instant::now(),
            state: EntryState::Tracked,
        }
    }
}

/// Handed to the liquidation worker when an account crosses the boundary.
#[derive(Debug, Clone)]
pub struct LiquidationRequest {
    pub borrower: Address,
    pub health_factor: U256,
}

/// Bootstrap selection record, written to the candidate dump.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CandidateReport {
    pub address: String,
    pub health_factor: f64,
    pub total_debt: f64,
    pub total_collateral: f64,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub before: usize,
    pub after: usize,
    pub min_health_factor: Option<U256>,
}

/// Owns the bounded tracked set and drives the control loop.
pub struct Tracker {
    oracle: Arc<dyn AccountReader>,
    store: Arc<dyn SetStore>,
    subgraph: SubgraphClient,
    dispatch: mpsc::Sender<LiquidationRequest>,
    settings: TrackerSettings,
    entries: Vec<TrackedEntry>,
}

impl Tracker {
    pub fn new(
        oracle: Arc<dyn AccountReader>,
        store: Arc<dyn SetStore>,
        subgraph: SubgraphClient,
        dispatch: mpsc::Sender<LiquidationRequest>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            oracle,
            store,
            subgraph,
            dispatch,
            settings,
            entries: Vec::new(),
        }
    }

    /// Number of accounts currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Seed the tracked set: restore from the store when it is already
    /// full, otherwise rank the candidate universe by health factor and
    /// take the riskiest slots up to the bound.
    ///
    /// Returns the candidates selected this run, for the bootstrap dump.
    pub async fn bootstrap(&mut self) -> Result<Vec<CandidateReport>> {
        let restored = self.store.smembers(TRACKED_SET).await?;
        let mut entries: Vec<TrackedEntry> = restored
            .iter()
            .filter_map(|key| match key.parse::<Address>() {
                Ok(address) => Some(TrackedEntry::new(address, U256::MAX)),
                Err(_) => {
                    warn!(key = %key, "Dropping malformed address from tracked set");
                    None
                }
            })
            .collect();

        if entries.len() >= self.settings.max_tracked {
            info!(
                tracked = entries.len(),
                "Tracked set restored from store, skipping candidate sweep"
            );
            self.entries = entries;
            return Ok(Vec::new());
        }

        let candidates = self.candidate_universe().await?;
        info!(candidates = candidates.len(), "Sweeping candidate universe");

        let oracle = &self.oracle;
        let summaries: Vec<(Address, Option<AccountSummary>)> = stream::iter(candidates)
            .map(|address| async move { (address, oracle.account_summary(address).await) })
            .buffer_unordered(self.settings.bootstrap_concurrency.max(1))
            .collect()
            .await;

        // Accounts already at or below the boundary and still standing are
        // presumed economically unprofitable; a tracked slot is wasted on
        // them, so eligibility is strictly above the boundary.
        let mut eligible: Vec<(Address, AccountSummary)> = summaries
            .iter()
            .filter_map(|(address, summary)| {
                let summary = summary.as_ref()?;
                (summary.total_debt > self.settings.min_debt && summary.health_factor > WAD)
                    .then(|| (*address, summary.clone()))
            })
            .collect();
        eligible.sort_by(|a, b| {
            a.1.health_factor
                .cmp(&b.1.health_factor)
                .then(a.0.cmp(&b.0))
        });

        // Refresh restored entries that showed up in the sweep.
        let by_address: HashMap<Address, U256> = eligible
            .iter()
            .map(|(address, summary)| (*address, summary.health_factor))
            .collect();
        let mut already_tracked: HashSet<Address> = HashSet::new();
        for entry in &mut entries {
            if let Some(hf) = by_address.get(&entry.address) {
                entry.last_health_factor = *hf;
            }
            already_tracked.insert(entry.address);
        }

        let mut selected = Vec::new();
        let mut added_keys = Vec::new();
        for (address, summary) in &eligible {
            if entries.len() >= self.settings.max_tracked {
                break;
            }
            if already_tracked.contains(address) {
                continue;
            }
            let key = addr_key(*address);
            if self.store.sismember(BLACKLIST_SET, &key).await? {
                debug!(address = %key, "Skipping blacklisted candidate");
                continue;
            }

            self.store
                .set_blob(
                    &account_blob_key(&key),
                    &json!({
                        "healthFactor": wad_to_f64(summary.health_factor),
                        "totalDebtETH": wad_to_f64(summary.total_debt),
                        "totalCollateralETH": wad_to_f64(summary.total_collateral),
                    })
                    .to_string(),
                )
                .await?;

            entries.push(TrackedEntry::new(*address, summary.health_factor));
            selected.push(CandidateReport {
                address: key.clone(),
                health_factor: wad_to_f64(summary.health_factor),
                total_debt: wad_to_f64(summary.total_debt),
                total_collateral: wad_to_f64(summary.total_collateral),
            });
            added_keys.push(key);
        }

        self.store.sadd(TRACKED_SET, &added_keys).await?;

        if entries.is_empty() {
            bail!("empty candidate set after bootstrap");
        }

        info!(
            tracked = entries.len(),
            selected = selected.len(),
            "Bootstrap complete"
        );
        self.entries = entries;
        Ok(selected)
    }

    /// All known borrower addresses, enumerating the subgraph when the
    /// store has none yet.
    async fn candidate_universe(&self) -> Result<Vec<Address>> {
        let known = self.store.smembers(ALL_ACCOUNTS_SET).await?;
        if !known.is_empty() {
            return Ok(known
                .iter()
                .filter_map(|key| key.parse::<Address>().ok())
                .collect());
        }

        let discovered = self
            .subgraph
            .borrowers()
            .await
            .context("borrower enumeration failed")?;
        let keys: Vec<String> = discovered.iter().map(|a| addr_key(*a)).collect();
        self.store.sadd(ALL_ACCOUNTS_SET, &keys).await?;
        Ok(discovered)
    }

    /// Run iterations back to back, forever. Only a store failure ends the
    /// loop; everything upstream degrades to per-entry removal.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let report = self.tick().await?;
            if report.after == 0 {
                // Nothing left to watch until a re-seed; don't spin.
                tokio::time::sleep(Duration::from_secs(1)).await;
            } else if !self.settings.pause.is_zero() {
                tokio::time::sleep(self.settings.pause).await;
            }
        }
    }

    /// One iteration: snapshot the tracked set, re-read every summary, apply
    /// the state machine, replace the set, persist removals.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let before = self.entries.len();
        let snapshot = std::mem::take(&mut self.entries);

        let width = snapshot.len().max(1);
        let oracle = &self.oracle;
        let observed: Vec<(TrackedEntry, Option<AccountSummary>)> = stream::iter(snapshot)
            .map(|entry| async move {
                let summary = oracle.account_summary(entry.address).await;
                (entry, summary)
            })
            .buffer_unordered(width)
            .collect()
            .await;

        let mut retained = Vec::with_capacity(before);
        let mut removed_keys = Vec::new();

        for (mut entry, summary) in observed {
            match summary {
                // Transient upstream failure: drop the entry rather than
                // poison the set; a later re-seed can bring it back.
                None => {
                    debug!(address = %entry.address, "Summary unavailable, untracking");
                    entry.state = EntryState::Removed;
                    removed_keys.push(addr_key(entry.address));
                }
                Some(summary) if is_liquidatable(summary.health_factor) => {
                    entry.state = EntryState::Liquidating;
                    info!(
                        address = %entry.address,
                        hf = wad_to_f64(summary.health_factor),
                        "Account crossed liquidation boundary"
                    );

                    let request = LiquidationRequest {
                        borrower: entry.address,
                        health_factor: summary.health_factor,
                    };
                    if let Err(e) = self.dispatch.try_send(request) {
                        warn!(
                            address = %entry.address,
                            error = %e,
                            "Liquidation dispatch refused, attempt already in flight"
                        );
                    }

                    // One attempt per borrower per run: gone from the set
                    // the moment the dispatch is issued.
                    entry.state = EntryState::Removed;
                    removed_keys.push(addr_key(entry.address));
                }
                Some(summary) if summary.health_factor > self.settings.untrack_health_factor => {
                    debug!(
                        address = %entry.address,
                        hf = wad_to_f64(summary.health_factor),
                        "Position healed past hysteresis band, untracking"
                    );
                    entry.state = EntryState::Removed;
                    removed_keys.push(addr_key(entry.address));
                }
                Some(summary) => {
                    entry.last_health_factor = summary.health_factor;
                    entry.last_checked_at = Instant::now();
                    retained.push(entry);
                }
            }
        }

        self.entries = retained;
        if !removed_keys.is_empty() {
            self.store.srem(TRACKED_SET, &removed_keys).await?;
        }

        let min_health_factor = self
            .entries
            .iter()
            .map(|e| e.last_health_factor)
            .min();
        info!(
            before = before,
            after = self.entries.len(),
            min_hf = min_health_factor.map(wad_to_f64).unwrap_or(f64::NAN),
            "Iteration complete"
        );

        Ok(TickReport {
            before,
            after: self.entries.len(),
            min_health_factor,
        })
    }
}

/// Canonical store key: lowercase, 0x-prefixed hex.
fn addr_key(address: Address) -> String {
    format!("{address:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidator_api::MemoryStore;
    use liquidator_chain::PositionLeg;
    use parking_lot::Mutex;

    fn addr(i: u64) -> Address {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&i.to_be_bytes());
        Address::from(bytes)
    }

    fn hf(milli: u64) -> U256 {
        // Health factor from thousandths: hf(1005) = 1.005e18.
        WAD * U256::from(milli) / U256::from(1000u64)
    }

    fn summary(health_factor: U256, total_debt: U256) -> AccountSummary {
        AccountSummary {
            total_collateral: total_debt * U256::from(2u64),
            total_debt,
            available_borrow: U256::ZERO,
            current_liquidation_threshold: U256::from(8000u64),
            health_factor,
        }
    }

    /// Scripted oracle: fixed summaries per address, `None` for the rest.
    #[derive(Default)]
    struct ScriptedOracle {
        summaries: Mutex<HashMap<Address, AccountSummary>>,
    }

    impl ScriptedOracle {
        fn set(&self, address: Address, summary: AccountSummary) {
            self.summaries.lock().insert(address, summary);
        }
    }

    #[async_trait::async_trait]
    impl AccountReader for ScriptedOracle {
        async fn account_summary(&self, user: Address) -> Option<AccountSummary> {
            self.summaries.lock().get(&user).cloned()
        }

        async fn position_leg(&self, _asset: Address, _user: Address) -> Option<PositionLeg> {
            None
        }
    }

    struct Harness {
        tracker: Tracker,
        oracle: Arc<ScriptedOracle>,
        store: Arc<MemoryStore>,
        rx: mpsc::Receiver<LiquidationRequest>,
    }

    fn harness(settings: TrackerSettings) -> Harness {
        let oracle = Arc::new(ScriptedOracle::default());
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(8);
        let tracker = Tracker::new(
            oracle.clone(),
            store.clone(),
            SubgraphClient::new("http://localhost:0"),
            tx,
            settings,
        );
        Harness {
            tracker,
            oracle,
            store,
            rx,
        }
    }

    fn settings(max_tracked: usize) -> TrackerSettings {
        TrackerSettings {
            max_tracked,
            untrack_health_factor: hf(1010),
            min_debt: U256::from(100_000_000_000_000u64),
            bootstrap_concurrency: 16,
            pause: std::time::Duration::ZERO,
        }
    }

    async fn seed_tracked(h: &mut Harness, addresses: &[Address]) {
        let keys: Vec<String> = addresses.iter().map(|a| addr_key(*a)).collect();
        h.store.sadd(TRACKED_SET, &keys).await.unwrap();
        h.tracker.entries = addresses
            .iter()
            .map(|a| TrackedEntry::new(*a, U256::MAX))
            .collect();
    }

    fn debt() -> U256 {
        U256::from(1_000_000_000_000_000_000u64)
    }

    #[tokio::test]
    async fn healed_entry_is_untracked_and_persisted() {
        let mut h = harness(settings(10));
        let a = addr(1);
        seed_tracked(&mut h, &[a]).await;
        h.oracle.set(a, summary(hf(1020), debt()));

        let report = h.tracker.tick().await.unwrap();

        assert_eq!(report.before, 1);
        assert_eq!(report.after, 0);
        assert!(!h.store.sismember(TRACKED_SET, &addr_key(a)).await.unwrap());
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn breach_dispatches_exactly_once_and_untracks() {
        let mut h = harness(settings(10));
        let a = addr(1);
        let healthy = addr(2);
        seed_tracked(&mut h, &[a, healthy]).await;
        h.oracle.set(a, summary(hf(990), debt()));
        h.oracle.set(healthy, summary(hf(1005), debt()));

        let report = h.tracker.tick().await.unwrap();

        assert_eq!(report.before, 2);
        assert_eq!(report.after, 1);
        let request = h.rx.try_recv().unwrap();
        assert_eq!(request.borrower, a);
        assert_eq!(request.health_factor, hf(990));
        assert!(h.rx.try_recv().is_err());
        assert!(!h.store.sismember(TRACKED_SET, &addr_key(a)).await.unwrap());

        // The borrower is gone; a second iteration must not re-dispatch.
        let report = h.tracker.tick().await.unwrap();
        assert_eq!(report.after, 1);
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn boundary_health_factor_is_liquidatable() {
        let mut h = harness(settings(10));
        let a = addr(1);
        seed_tracked(&mut h, &[a]).await;
        h.oracle.set(a, summary(WAD, debt()));

        h.tracker.tick().await.unwrap();
        assert_eq!(h.rx.try_recv().unwrap().borrower, a);
    }

    #[tokio::test]
    async fn hysteresis_band_keeps_entry_tracked() {
        let mut h = harness(settings(10));
        let a = addr(1);
        seed_tracked(&mut h, &[a]).await;
        h.oracle.set(a, summary(hf(1005), debt()));

        for _ in 0..5 {
            let report = h.tracker.tick().await.unwrap();
            assert_eq!(report.after, 1);
        }
        assert_eq!(h.tracker.entries[0].last_health_factor, hf(1005));
        assert!(h.store.sismember(TRACKED_SET, &addr_key(a)).await.unwrap());
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn transient_failure_untracks_without_dispatch() {
        let mut h = harness(settings(10));
        let a = addr(1);
        let b = addr(2);
        seed_tracked(&mut h, &[a, b]).await;
        // No summary scripted for `a`: the read comes back None.
        h.oracle.set(b, summary(hf(1005), debt()));

        let report = h.tracker.tick().await.unwrap();

        assert_eq!(report.before, 2);
        assert_eq!(report.after, 1);
        assert!(!h.store.sismember(TRACKED_SET, &addr_key(a)).await.unwrap());
        assert!(h.store.sismember(TRACKED_SET, &addr_key(b)).await.unwrap());
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn iterations_never_grow_the_tracked_set() {
        let mut h = harness(settings(10));
        let addresses: Vec<Address> = (1..=4).map(addr).collect();
        seed_tracked(&mut h, &addresses).await;
        for (i, a) in addresses.iter().enumerate() {
            h.oracle.set(*a, summary(hf(1002 + i as u64), debt()));
        }

        let mut previous = h.tracker.tracked_count();
        for round in 0..3 {
            if round == 1 {
                // One account heals mid-run.
                h.oracle.set(addresses[0], summary(hf(1500), debt()));
            }
            let report = h.tracker.tick().await.unwrap();
            assert!(report.after <= report.before);
            assert!(report.after <= previous);
            previous = report.after;
        }
    }

    #[tokio::test]
    async fn min_health_factor_is_reported() {
        let mut h = harness(settings(10));
        let a = addr(1);
        let b = addr(2);
        seed_tracked(&mut h, &[a, b]).await;
        h.oracle.set(a, summary(hf(1007), debt()));
        h.oracle.set(b, summary(hf(1003), debt()));

        let report = h.tracker.tick().await.unwrap();
        assert_eq!(report.min_health_factor, Some(hf(1003)));
    }

    #[tokio::test]
    async fn bootstrap_selects_riskiest_up_to_bound() {
        let mut h = harness(settings(200));

        // 400 known borrowers with distinct health factors; risk rank is the
        // reverse of the address index. A tail of dust and breached accounts
        // must not occupy slots.
        let mut keys = Vec::new();
        for i in 1..=400u64 {
            let a = addr(i);
            keys.push(addr_key(a));
            h.oracle.set(a, summary(hf(1001 + i), debt()));
        }
        for i in 401..=410u64 {
            let a = addr(i);
            keys.push(addr_key(a));
            // Below the dust floor.
            h.oracle.set(a, summary(hf(1002), U256::from(10u64)));
        }
        for i in 411..=420u64 {
            let a = addr(i);
            keys.push(addr_key(a));
            // Already at or below the boundary: presumed unprofitable.
            h.oracle.set(a, summary(hf(900), debt()));
        }
        h.store.sadd(ALL_ACCOUNTS_SET, &keys).await.unwrap();

        let selected = h.tracker.bootstrap().await.unwrap();

        assert_eq!(h.tracker.tracked_count(), 200);
        assert_eq!(selected.len(), 200);
        // Ascending by health factor, smallest eligible first.
        for pair in selected.windows(2) {
            assert!(pair[0].health_factor <= pair[1].health_factor);
        }
        assert_eq!(selected[0].address, addr_key(addr(1)));
        assert_eq!(selected[199].address, addr_key(addr(200)));
        assert_eq!(h.store.smembers(TRACKED_SET).await.unwrap().len(), 200);
        // Per-address blob slots were populated for the selection.
        assert_eq!(h.store.blob_count(), 200);
    }

    #[tokio::test]
    async fn bootstrap_selection_is_stable() {
        async fn build(h: &mut Harness) -> Vec<String> {
            let mut keys = Vec::new();
            for i in 1..=50u64 {
                let a = addr(i);
                keys.push(addr_key(a));
                h.oracle.set(a, summary(hf(1001 + (i % 7)), debt()));
            }
            h.store.sadd(ALL_ACCOUNTS_SET, &keys).await.unwrap();
            h.tracker
                .bootstrap()
                .await
                .unwrap()
                .into_iter()
                .map(|c| c.address)
                .collect()
        }

        let mut h1 = harness(settings(20));
        let first = build(&mut h1).await;
        let mut h2 = harness(settings(20));
        let second = build(&mut h2).await;

        assert_eq!(first.len(), 20);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn bootstrap_excludes_blacklisted_accounts() {
        let mut h = harness(settings(5));

        let mut keys = Vec::new();
        for i in 1..=10u64 {
            let a = addr(i);
            keys.push(addr_key(a));
            h.oracle.set(a, summary(hf(1001 + i), debt()));
        }
        h.store.sadd(ALL_ACCOUNTS_SET, &keys).await.unwrap();
        // Blacklist the two riskiest.
        h.store
            .sadd(BLACKLIST_SET, &[addr_key(addr(1)), addr_key(addr(2))])
            .await
            .unwrap();

        let selected = h.tracker.bootstrap().await.unwrap();

        assert_eq!(selected.len(), 5);
        let tracked = h.store.smembers(TRACKED_SET).await.unwrap();
        assert!(!tracked.contains(&addr_key(addr(1))));
        assert!(!tracked.contains(&addr_key(addr(2))));
        assert_eq!(selected[0].address, addr_key(addr(3)));
    }

    #[tokio::test]
    async fn bootstrap_restores_full_tracked_set_without_sweep() {
        let mut h = harness(settings(3));
        let keys: Vec<String> = (1..=3u64).map(|i| addr_key(addr(i))).collect();
        h.store.sadd(TRACKED_SET, &keys).await.unwrap();
        // No oracle data, no known accounts: the sweep must not run.

        let selected = h.tracker.bootstrap().await.unwrap();

        assert!(selected.is_empty());
        assert_eq!(h.tracker.tracked_count(), 3);
    }

    #[tokio::test]
    async fn bootstrap_fails_on_empty_candidate_set() {
        let mut h = harness(settings(10));
        let a = addr(1);
        h.store.sadd(ALL_ACCOUNTS_SET, &[addr_key(a)]).await.unwrap();
        // The only candidate is below the dust floor.
        h.oracle.set(a, summary(hf(1005), U256::from(1u64)));

        let err = h.tracker.bootstrap().await.unwrap_err();
        assert!(err.to_string().contains("empty candidate set"));
    }
}

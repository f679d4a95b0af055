//! Off-chain collaborator clients for the liquidation agent.
//!
//! This crate provides:
//! - Subgraph: GraphQL enumeration of the borrower universe
//! - Watchlist store: durable address sets behind the [`SetStore`] seam
//!   (Redis in production, in-memory for tests)

mod store;
mod subgraph;

pub use store::{
    account_blob_key, MemoryStore, RedisStore, SetStore, ALL_ACCOUNTS_SET, BLACKLIST_SET,
    TRACKED_SET,
};
pub use subgraph::SubgraphClient;

//! Per-network metadata the walker needs: the genesis block's previous-hash
//! sentinel and transactions the daemon cannot or should not hand back.

use std::collections::HashSet;
use tracing::info;

use crate::error::RpcError;
use crate::rpc::ChainSource;

pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Genesis coinbase shared by the Bitcoin networks; never served by
/// `getrawtransaction`.
const BITCOIN_GENESIS_COINBASE: &str =
    "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

/// Coinbases duplicated at heights 91842 and 91880.
const BITCOIN_DUPLICATE_COINBASES: [&str; 2] = [
    "d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599",
    "e3bf3d07d4b0375638d5f1db5255fe07ba2c4cb067cd81b84ee974b6585fb468",
];

struct KnownNetwork {
    name: &'static str,
    genesis_hash: &'static str,
    skip_txids: &'static [&'static str],
}

const KNOWN_NETWORKS: [KnownNetwork; 3] = [
    KnownNetwork {
        name: "bitcoin",
        genesis_hash: "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        skip_txids: &[
            BITCOIN_GENESIS_COINBASE,
            BITCOIN_DUPLICATE_COINBASES[0],
            BITCOIN_DUPLICATE_COINBASES[1],
        ],
    },
    KnownNetwork {
        name: "bitcoin-testnet3",
        genesis_hash: "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
        skip_txids: &[BITCOIN_GENESIS_COINBASE],
    },
    KnownNetwork {
        name: "bitcoin-regtest",
        genesis_hash: "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
        skip_txids: &[BITCOIN_GENESIS_COINBASE],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinProfile {
    pub name: String,
    /// Stored as the previous hash of block 0.
    pub genesis_prev_hash: String,
    /// Transactions the decomposer skips without producing rows.
    pub skip_txids: HashSet<String>,
}

impl CoinProfile {
    pub fn generic() -> Self {
        Self {
            name: "generic".to_string(),
            genesis_prev_hash: ZERO_HASH.to_string(),
            skip_txids: HashSet::new(),
        }
    }

    /// Match a genesis hash against the built-in networks, falling back to a
    /// generic profile.
    pub fn detect(genesis_hash: &str) -> Self {
        KNOWN_NETWORKS
            .iter()
            .find(|network| network.genesis_hash == genesis_hash)
            .map(|network| Self {
                name: network.name.to_string(),
                genesis_prev_hash: ZERO_HASH.to_string(),
                skip_txids: network.skip_txids.iter().map(|t| t.to_string()).collect(),
            })
            .unwrap_or_else(Self::generic)
    }

    pub fn with_skip(mut self, txid: impl Into<String>) -> Self {
        self.skip_txids.insert(txid.into());
        self
    }

    pub fn skips(&self, txid: &str) -> bool {
        self.skip_txids.contains(txid)
    }
}

/// Ask the daemon for block 0 and pick the matching profile.
pub async fn detect_coin<C: ChainSource + ?Sized>(source: &C) -> Result<CoinProfile, RpcError> {
    let genesis_hash = source.get_block_hash(0).await?;
    let profile = CoinProfile::detect(&genesis_hash);
    info!(
        "Detected network {} (genesis {})",
        profile.name, genesis_hash
    );
    Ok(profile)
}

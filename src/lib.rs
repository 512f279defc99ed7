//! Block-by-block indexer that walks a coin daemon's chain over JSON-RPC and
//! writes blocks, transactions, outputs and inputs into relational tables.

pub mod block_processor;
pub mod coin;
pub mod database;
pub mod error;
pub mod models;
pub mod resume;
pub mod rpc;
pub mod store;
pub mod walker;

pub use coin::CoinProfile;
pub use error::{IndexError, RpcError, StoreError};
pub use rpc::{ChainSource, JsonRpcClient};
pub use store::{MemoryStore, Store};
pub use walker::{ChainWalker, WalkSummary};

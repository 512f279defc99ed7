//! Picks the heights a run has to ingest and repairs the dangling forward
//! link left by the previous run.

use std::ops::RangeInclusive;
use tracing::{info, warn};

use crate::error::IndexError;
use crate::rpc::ChainSource;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    UpToDate,
    Sync(RangeInclusive<u64>),
}

pub fn plan_range(highest_stored: Option<u64>, tip: u64) -> Plan {
    match highest_stored {
        None => Plan::Sync(0..=tip),
        Some(stored) if stored < tip => Plan::Sync(stored + 1..=tip),
        Some(stored) => {
            if stored > tip {
                warn!("Store is at height {} but the daemon reports tip {}", stored, tip);
            }
            Plan::UpToDate
        }
    }
}

/// If the stored block at `height` still carries the placeholder next hash,
/// look up its successor and store the real hash. Returns the hash written.
pub async fn repair_forward_link<C, S>(
    source: &C,
    store: &S,
    height: u64,
) -> Result<Option<String>, IndexError>
where
    C: ChainSource + ?Sized,
    S: Store + ?Sized,
{
    let Some(block) = store.block(height).await? else {
        return Ok(None);
    };
    if !block.awaits_successor() {
        return Ok(None);
    }

    let next_hash = source
        .get_block_hash(height + 1)
        .await
        .map_err(|e| IndexError::rpc(format!("getblockhash {}", height + 1), e))?;
    store.set_next_hash(height, &next_hash).await?;
    info!("Linked block {} to successor {}", height, next_hash);

    Ok(Some(next_hash))
}

/// Compare the store against the daemon's tip and get ready to continue.
pub async fn prepare<C, S>(source: &C, store: &S) -> Result<Plan, IndexError>
where
    C: ChainSource + ?Sized,
    S: Store + ?Sized,
{
    let tip = source
        .get_block_count()
        .await
        .map_err(|e| IndexError::rpc("getblockcount", e))?;
    let highest = store.highest_block().await?.map(|block| block.height);

    let plan = plan_range(highest, tip);
    match (&plan, highest) {
        (Plan::UpToDate, _) => info!("Looks like you're all up-to-date at height {}", tip),
        (Plan::Sync(range), Some(stored)) => {
            info!("Resuming from block {} to {}", range.start(), range.end());
            repair_forward_link(source, store, stored).await?;
        }
        (Plan::Sync(range), None) => {
            info!("Starting fresh sync of blocks 0 to {}", range.end())
        }
    }

    Ok(plan)
}

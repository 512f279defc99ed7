use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::ops::RangeInclusive;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::block_processor::decompose_block;
use crate::coin::CoinProfile;
use crate::error::{IndexError, StoreError};
use crate::models::{Block, BlockBatch, NEXT_HASH_PLACEHOLDER};
use crate::rpc::{ChainSource, RawBlock};
use crate::store::Store;

/// Blocks between throughput reports.
pub const PROGRESS_INTERVAL: u64 = 250;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub committed: u64,
    pub conflicts: u64,
    pub last_height: Option<u64>,
}

/// Sequential block-by-block ingestion into a [`Store`].
pub struct ChainWalker<'a, C: ?Sized, S: ?Sized> {
    source: &'a C,
    store: &'a S,
    profile: &'a CoinProfile,
}

impl<'a, C, S> ChainWalker<'a, C, S>
where
    C: ChainSource + ?Sized,
    S: Store + ?Sized,
{
    pub fn new(source: &'a C, store: &'a S, profile: &'a CoinProfile) -> Self {
        Self {
            source,
            store,
            profile,
        }
    }

    /// Ingest every height in `range`, in order, one committed batch per block.
    ///
    /// A batch that collides with stored rows is dropped and the walk moves on.
    /// RPC failures on the block itself and any other store error end the walk.
    pub async fn walk(&self, range: RangeInclusive<u64>) -> Result<WalkSummary, IndexError> {
        let mut summary = WalkSummary::default();
        if range.is_empty() {
            return Ok(summary);
        }
        let (start, end) = (*range.start(), *range.end());

        let mut cumulative_difficulty = self.seed_difficulty(start).await?;
        let mut window_start = Instant::now();

        for height in range {
            info!("Processing block {} / {}", height, end);

            let batch = self.build_batch(height, end, &mut cumulative_difficulty).await?;
            let rows = batch.row_count();

            match self.store.commit(batch).await {
                Ok(()) => summary.committed += 1,
                Err(StoreError::Conflict(reason)) => {
                    error!("Block {} already indexed, discarding {} rows: {}", height, rows, reason);
                    summary.conflicts += 1;
                }
                Err(e) => return Err(e.into()),
            }
            summary.last_height = Some(height);

            let done = height - start + 1;
            if done % PROGRESS_INTERVAL == 0 {
                info!(
                    "Processed {} blocks in {:?}",
                    PROGRESS_INTERVAL,
                    window_start.elapsed()
                );
                window_start = Instant::now();
            }
        }

        info!(
            "Walk finished: {} committed, {} already present",
            summary.committed, summary.conflicts
        );
        Ok(summary)
    }

    async fn seed_difficulty(&self, start: u64) -> Result<Decimal, IndexError> {
        if start == 0 {
            return Ok(Decimal::ZERO);
        }
        let parent = self
            .store
            .block(start - 1)
            .await?
            .ok_or(IndexError::MissingParent(start - 1))?;
        Ok(parent.cumulative_difficulty)
    }

    async fn build_batch(
        &self,
        height: u64,
        end: u64,
        cumulative_difficulty: &mut Decimal,
    ) -> Result<BlockBatch, IndexError> {
        let hash = self
            .source
            .get_block_hash(height)
            .await
            .map_err(|e| IndexError::rpc(format!("getblockhash {}", height), e))?;
        let raw = self
            .source
            .get_block(&hash)
            .await
            .map_err(|e| IndexError::rpc(format!("getblock {}", hash), e))?;

        if raw.height != height {
            warn!("Daemon reported height {} for block {}", raw.height, height);
        }

        // Genesis contributes no work to the running total.
        if height > 0 {
            *cumulative_difficulty += raw.difficulty;
        }

        let decomposed =
            decompose_block(self.source, self.store, self.profile, height, &raw.tx).await?;

        let (prev_hash, next_hash) = link_hashes(height, end, &raw, self.profile);
        let time = DateTime::<Utc>::from_timestamp(raw.time, 0).unwrap_or_default();

        let block = Block {
            height,
            hash: raw.hash,
            prev_hash,
            next_hash,
            merkle_root: raw.merkle_root,
            time,
            bits: raw.bits,
            nonce: raw.nonce,
            size: raw.size,
            version: raw.version,
            difficulty: raw.difficulty,
            cumulative_difficulty: *cumulative_difficulty,
            value_out: decomposed.value_out,
            transaction_count: decomposed.transactions.len() as u32,
            total_fees: decomposed.total_fees,
        };

        Ok(BlockBatch {
            block,
            transactions: decomposed.transactions,
            outputs: decomposed.outputs,
            inputs: decomposed.inputs,
            spent_inputs: decomposed.spent_inputs,
            spent_outputs: decomposed.spent_outputs,
        })
    }
}

/// Previous and next hash to store for `raw`, where `end` is the last height
/// of the current walk.
pub fn link_hashes(
    height: u64,
    end: u64,
    raw: &RawBlock,
    profile: &CoinProfile,
) -> (String, String) {
    let reported_prev = raw.previous_block_hash.clone().unwrap_or_default();
    let reported_next = || {
        raw.next_block_hash
            .clone()
            .unwrap_or_else(|| NEXT_HASH_PLACEHOLDER.to_string())
    };

    if height == 0 {
        (profile.genesis_prev_hash.clone(), reported_next())
    } else if height == end {
        (reported_prev, NEXT_HASH_PLACEHOLDER.to_string())
    } else {
        (reported_prev, reported_next())
    }
}

//! Persistence seam used by the walker, plus an in-memory implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

use crate::error::StoreError;
use crate::models::{Block, BlockBatch, Input, InputKey, Output, OutputKey, Transaction};

#[async_trait]
pub trait Store: Send + Sync {
    /// Block with the greatest height, or `None` when nothing is stored.
    async fn highest_block(&self) -> Result<Option<Block>, StoreError>;

    async fn block(&self, height: u64) -> Result<Option<Block>, StoreError>;

    async fn set_next_hash(&self, height: u64, next_hash: &str) -> Result<(), StoreError>;

    /// First stored input row of `txid`, ordered by height then input index.
    async fn first_input_of(&self, txid: &str) -> Result<Option<InputKey>, StoreError>;

    /// Write the whole batch atomically. A natural-key collision anywhere in
    /// the batch leaves the store untouched and returns `StoreError::Conflict`.
    async fn commit(&self, batch: BlockBatch) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTables {
    pub blocks: BTreeMap<u64, Block>,
    pub transactions: BTreeMap<String, Transaction>,
    pub outputs: BTreeMap<OutputKey, Output>,
    pub inputs: BTreeMap<InputKey, Input>,
}

impl MemoryTables {
    fn find_conflict(&self, batch: &BlockBatch) -> Option<String> {
        if self.blocks.contains_key(&batch.block.height) {
            return Some(format!("block {}", batch.block.height));
        }

        let mut txids = HashSet::new();
        for tx in &batch.transactions {
            if self.transactions.contains_key(&tx.txid) || !txids.insert(&tx.txid) {
                return Some(format!("transaction {}", tx.txid));
            }
        }

        let mut outputs = HashSet::new();
        for output in &batch.outputs {
            let key = output.key();
            if self.outputs.contains_key(&key) || !outputs.insert(key) {
                return Some(format!("output {}:{}", output.txid, output.n));
            }
        }

        let mut inputs = HashSet::new();
        for input in &batch.inputs {
            let key = input.key();
            if self.inputs.contains_key(&key) || !inputs.insert(key) {
                return Some(format!(
                    "input {}:{} at height {}",
                    input.txid, input.n, input.block_height
                ));
            }
        }

        None
    }
}

/// Store kept entirely in memory. Backs the pipeline tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MemoryTables {
        self.tables.lock().clone()
    }

    pub fn row_count(&self) -> usize {
        let tables = self.tables.lock();
        tables.blocks.len()
            + tables.transactions.len()
            + tables.outputs.len()
            + tables.inputs.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn highest_block(&self) -> Result<Option<Block>, StoreError> {
        Ok(self.tables.lock().blocks.values().next_back().cloned())
    }

    async fn block(&self, height: u64) -> Result<Option<Block>, StoreError> {
        Ok(self.tables.lock().blocks.get(&height).cloned())
    }

    async fn set_next_hash(&self, height: u64, next_hash: &str) -> Result<(), StoreError> {
        if let Some(block) = self.tables.lock().blocks.get_mut(&height) {
            block.next_hash = next_hash.to_string();
        }
        Ok(())
    }

    async fn first_input_of(&self, txid: &str) -> Result<Option<InputKey>, StoreError> {
        Ok(self
            .tables
            .lock()
            .inputs
            .keys()
            .find(|key| key.txid == txid)
            .cloned())
    }

    async fn commit(&self, batch: BlockBatch) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();

        if let Some(conflict) = tables.find_conflict(&batch) {
            return Err(StoreError::Conflict(conflict));
        }

        tables.blocks.insert(batch.block.height, batch.block);
        for tx in batch.transactions {
            tables.transactions.insert(tx.txid.clone(), tx);
        }
        for output in batch.outputs {
            tables.outputs.insert(output.key(), output);
        }
        for input in batch.inputs {
            tables.inputs.insert(input.key(), input);
        }

        for key in batch.spent_inputs {
            if let Some(input) = tables.inputs.get_mut(&key) {
                input.spent = true;
            }
        }
        for spend in batch.spent_outputs {
            if let Some(output) = tables.outputs.get_mut(&spend.key) {
                output.spent = true;
                output.linked_txid = Some(spend.spent_by);
            }
        }

        Ok(())
    }
}

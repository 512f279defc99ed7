use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Stored as a block's next hash until its successor has been indexed.
pub const NEXT_HASH_PLACEHOLDER: &str = "PLACEHOLDER";

/// Prevout hash recorded for a coinbase input.
pub const COINBASE_PREVOUT: &str = "COINBASE";

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    pub next_hash: String,
    pub merkle_root: String,
    pub time: DateTime<Utc>,
    pub bits: String,
    pub nonce: u64,
    pub size: u64,
    pub version: i32,
    pub difficulty: Decimal,
    pub cumulative_difficulty: Decimal,
    pub value_out: Decimal,
    pub transaction_count: u32,
    pub total_fees: Decimal,
}

impl Block {
    pub fn awaits_successor(&self) -> bool {
        self.next_hash == NEXT_HASH_PLACEHOLDER
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub txid: String,
    pub block_height: u64,
    /// Position in the block; 0 is the coinbase.
    pub n: u32,
    pub size: u64,
    pub version: i32,
    pub locktime: u64,
    pub total_in: Decimal,
    pub total_out: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub txid: String,
    pub n: u32,
    pub value: Decimal,
    pub script_pub_key: String,
    pub address: Option<String>,
    /// Transaction that consumed this output.
    pub linked_txid: Option<String>,
    pub spent: bool,
}

impl Output {
    pub fn key(&self) -> OutputKey {
        OutputKey {
            txid: self.txid.clone(),
            n: self.n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub block_height: u64,
    pub txid: String,
    pub n: u32,
    pub script_sig: Option<String>,
    pub sequence: u64,
    pub witness: Option<String>,
    pub coinbase: bool,
    pub spent: bool,
    pub prevout_hash: String,
    pub prevout_n: u32,
}

impl Input {
    pub fn key(&self) -> InputKey {
        InputKey {
            block_height: self.block_height,
            txid: self.txid.clone(),
            n: self.n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputKey {
    pub txid: String,
    pub n: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputKey {
    pub block_height: u64,
    pub txid: String,
    pub n: u32,
}

/// Marks a previously stored output as consumed by `spent_by`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpend {
    pub key: OutputKey,
    pub spent_by: String,
}

/// Everything one block writes, committed or discarded as a whole.
///
/// Spends of rows staged in the same batch are already applied to the staged
/// rows; `spent_inputs` and `spent_outputs` only point at rows written by
/// earlier blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockBatch {
    pub block: Block,
    pub transactions: Vec<Transaction>,
    pub outputs: Vec<Output>,
    pub inputs: Vec<Input>,
    pub spent_inputs: Vec<InputKey>,
    pub spent_outputs: Vec<OutputSpend>,
}

impl BlockBatch {
    pub fn row_count(&self) -> usize {
        1 + self.transactions.len() + self.outputs.len() + self.inputs.len()
    }
}

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::coin::CoinProfile;
use crate::error::StoreError;
use crate::models::{
    Input, InputKey, Output, OutputKey, OutputSpend, Transaction, COINBASE_PREVOUT,
};
use crate::rpc::{ChainSource, RawTransaction};
use crate::store::Store;

/// Rows and aggregates produced for one block's transaction list.
#[derive(Debug, Default)]
pub struct Decomposed {
    pub transactions: Vec<Transaction>,
    pub outputs: Vec<Output>,
    pub inputs: Vec<Input>,
    /// Inputs committed by earlier blocks that this block marks spent.
    pub spent_inputs: Vec<InputKey>,
    /// Outputs committed by earlier blocks that this block consumes.
    pub spent_outputs: Vec<OutputSpend>,
    pub value_out: Decimal,
    pub total_fees: Decimal,
}

enum InputMark {
    Staged(usize),
    Stored(InputKey),
}

struct StagedTransaction {
    transaction: Transaction,
    outputs: Vec<Output>,
    inputs: Vec<Input>,
    marks: Vec<InputMark>,
    spends: Vec<OutputSpend>,
}

/// Block-wide staging area. Lookups by txid hit here before the store, so a
/// spend of an earlier transaction in the same block is applied in memory.
#[derive(Default)]
struct Staging {
    decomposed: Decomposed,
    first_input: HashMap<String, usize>,
    output_at: HashMap<OutputKey, usize>,
}

impl Staging {
    fn absorb(&mut self, staged: StagedTransaction) {
        let out = &mut self.decomposed;

        for output in staged.outputs {
            self.output_at.insert(output.key(), out.outputs.len());
            out.outputs.push(output);
        }
        for input in staged.inputs {
            self.first_input
                .entry(input.txid.clone())
                .or_insert(out.inputs.len());
            out.inputs.push(input);
        }

        for mark in staged.marks {
            match mark {
                InputMark::Staged(index) => out.inputs[index].spent = true,
                InputMark::Stored(key) => {
                    if !out.spent_inputs.contains(&key) {
                        out.spent_inputs.push(key);
                    }
                }
            }
        }
        for spend in staged.spends {
            match self.output_at.get(&spend.key) {
                Some(&index) => {
                    let output = &mut out.outputs[index];
                    output.spent = true;
                    output.linked_txid = Some(spend.spent_by);
                }
                None => out.spent_outputs.push(spend),
            }
        }

        out.value_out += staged.transaction.total_out;
        out.total_fees += staged.transaction.fee;
        out.transactions.push(staged.transaction);
    }
}

/// Turn a block's ordered transaction ids into staged rows.
///
/// Transactions in the coin's skip set, and transactions whose own lookup or
/// prevout lookups fail, produce no rows at all. Store errors are returned.
pub async fn decompose_block<C, S>(
    source: &C,
    store: &S,
    profile: &CoinProfile,
    height: u64,
    txids: &[String],
) -> Result<Decomposed, StoreError>
where
    C: ChainSource + ?Sized,
    S: Store + ?Sized,
{
    let mut staging = Staging::default();

    for (position, txid) in txids.iter().enumerate() {
        if profile.skips(txid) {
            debug!("Skipping known empty transaction {} in block {}", txid, height);
            continue;
        }

        let raw = match source.get_raw_transaction(txid).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Transaction {} in block {} unavailable: {}", txid, height, e);
                continue;
            }
        };

        let staged =
            stage_transaction(source, store, &staging, height, position as u32, txid, &raw).await?;
        if let Some(staged) = staged {
            staging.absorb(staged);
        }
    }

    Ok(staging.decomposed)
}

async fn stage_transaction<C, S>(
    source: &C,
    store: &S,
    staging: &Staging,
    height: u64,
    position: u32,
    txid: &str,
    raw: &RawTransaction,
) -> Result<Option<StagedTransaction>, StoreError>
where
    C: ChainSource + ?Sized,
    S: Store + ?Sized,
{
    let is_coinbase = position == 0;

    let mut total_out = Decimal::ZERO;
    let mut outputs = Vec::with_capacity(raw.vout.len());
    for vout in &raw.vout {
        total_out += vout.value;
        outputs.push(Output {
            txid: txid.to_string(),
            n: vout.n,
            value: vout.value,
            script_pub_key: vout.script_pub_key.asm.clone(),
            address: vout.script_pub_key.owner().map(str::to_string),
            linked_txid: None,
            spent: false,
        });
    }

    let mut spent_value = Decimal::ZERO;
    let mut inputs = Vec::with_capacity(raw.vin.len());
    let mut marks = Vec::new();
    let mut spends = Vec::new();

    for (index, vin) in raw.vin.iter().enumerate() {
        if is_coinbase && index == 0 {
            inputs.push(Input {
                block_height: height,
                txid: txid.to_string(),
                n: 0,
                script_sig: None,
                sequence: vin.sequence,
                witness: None,
                coinbase: true,
                spent: false,
                prevout_hash: COINBASE_PREVOUT.to_string(),
                prevout_n: 0,
            });
            continue;
        }

        let (prev_txid, prev_n) = match (&vin.txid, vin.vout) {
            (Some(prev_txid), Some(prev_n)) => (prev_txid, prev_n),
            _ => {
                warn!("Input {} of {} has no prevout, skipping transaction", index, txid);
                return Ok(None);
            }
        };

        let previous = match source.get_raw_transaction(prev_txid).await {
            Ok(previous) => previous,
            Err(e) => {
                debug!("Prevout {} of {} unavailable: {}", prev_txid, txid, e);
                return Ok(None);
            }
        };
        let Some(prevout) = previous.vout.iter().find(|vout| vout.n == prev_n) else {
            warn!("Transaction {} has no output {}, skipping {}", prev_txid, prev_n, txid);
            return Ok(None);
        };

        spent_value += prevout.value;
        debug!(
            "{} spends {}:{} ({} from {:?})",
            txid,
            previous.txid,
            prevout.n,
            prevout.value,
            prevout.script_pub_key.owner()
        );

        let mark = match staging.first_input.get(&previous.txid) {
            Some(&staged) => Some(InputMark::Staged(staged)),
            None => store
                .first_input_of(&previous.txid)
                .await?
                .map(InputMark::Stored),
        };
        match mark {
            Some(mark) => marks.push(mark),
            None => debug!("No input row recorded for {}", previous.txid),
        }

        spends.push(OutputSpend {
            key: OutputKey {
                txid: previous.txid.clone(),
                n: prevout.n,
            },
            spent_by: txid.to_string(),
        });

        inputs.push(Input {
            block_height: height,
            txid: txid.to_string(),
            n: index as u32,
            script_sig: vin.script_sig.as_ref().map(|sig| sig.asm.clone()),
            sequence: vin.sequence,
            witness: None,
            coinbase: false,
            spent: false,
            prevout_hash: previous.txid.clone(),
            prevout_n: prevout.n,
        });
    }

    // The coinbase only mints; its outputs never count against its fee.
    let produced = if is_coinbase { Decimal::ZERO } else { total_out };
    let fee = spent_value - produced;
    if fee < Decimal::ZERO {
        warn!("Transaction {} in block {} has negative fee {}", txid, height, fee);
    }

    Ok(Some(StagedTransaction {
        transaction: Transaction {
            txid: txid.to_string(),
            block_height: height,
            n: position,
            size: raw.size,
            version: raw.version,
            locktime: raw.locktime,
            total_in: Decimal::ZERO,
            total_out,
            fee,
        },
        outputs,
        inputs,
        marks,
        spends,
    }))
}

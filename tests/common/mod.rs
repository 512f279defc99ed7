#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chain_indexer::rpc::{RawBlock, RawInput, RawOutput, RawTransaction, ScriptPubKey, ScriptSig};
use chain_indexer::{ChainSource, RpcError};

pub fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

pub fn block_hash(height: u64) -> String {
    format!("{:064x}", height + 0xb10c)
}

/// In-memory daemon serving a hand-built chain.
#[derive(Debug, Clone, Default)]
pub struct FixtureChain {
    blocks: Vec<RawBlock>,
    transactions: HashMap<String, RawTransaction>,
    unreachable: HashSet<String>,
    tip: Option<u64>,
}

impl FixtureChain {
    /// Append a block listing `txids`, in order.
    pub fn block(&mut self, difficulty: &str, txids: &[&str]) -> &mut Self {
        let height = self.blocks.len() as u64;
        self.blocks.push(RawBlock {
            hash: block_hash(height),
            height,
            version: 1,
            previous_block_hash: height.checked_sub(1).map(block_hash),
            next_block_hash: None,
            merkle_root: format!("merkle-{}", height),
            time: 1_231_006_505 + height as i64 * 600,
            bits: "1d00ffff".to_string(),
            nonce: 2_083_236_893,
            size: 285,
            difficulty: dec(difficulty),
            tx: txids.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    pub fn serve(&mut self, tx: RawTransaction) -> &mut Self {
        self.transactions.insert(tx.txid.clone(), tx);
        self
    }

    /// Lookups of `txid` fail with a transport error.
    pub fn unreachable(&mut self, txid: &str) -> &mut Self {
        self.unreachable.insert(txid.to_string());
        self
    }

    /// Same chain as seen by a daemon whose tip is `tip`.
    pub fn with_tip(&self, tip: u64) -> Self {
        let mut chain = self.clone();
        chain.tip = Some(tip);
        chain
    }

    fn tip(&self) -> u64 {
        self.tip
            .unwrap_or_else(|| self.blocks.len().saturating_sub(1) as u64)
    }
}

#[async_trait]
impl ChainSource for FixtureChain {
    async fn get_block_count(&self) -> Result<u64, RpcError> {
        Ok(self.tip())
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        if height > self.tip() || height as usize >= self.blocks.len() {
            return Err(RpcError::NotFound("Block height out of range".into()));
        }
        Ok(block_hash(height))
    }

    async fn get_block(&self, hash: &str) -> Result<RawBlock, RpcError> {
        let tip = self.tip();
        let mut block = self
            .blocks
            .iter()
            .find(|b| b.hash == hash && b.height <= tip)
            .cloned()
            .ok_or_else(|| RpcError::NotFound("Block not found".into()))?;
        if block.height < tip {
            block.next_block_hash = Some(block_hash(block.height + 1));
        }
        Ok(block)
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
        if self.unreachable.contains(txid) {
            return Err(RpcError::Transport("operation timed out".into()));
        }
        self.transactions.get(txid).cloned().ok_or_else(|| {
            RpcError::NotFound("No such mempool or blockchain transaction".into())
        })
    }
}

fn outputs(values: &[(&str, &str)]) -> Vec<RawOutput> {
    values
        .iter()
        .enumerate()
        .map(|(n, (address, value))| RawOutput {
            value: dec(value),
            n: n as u32,
            script_pub_key: ScriptPubKey {
                asm: format!("OP_DUP OP_HASH160 {} OP_EQUALVERIFY OP_CHECKSIG", address),
                addresses: vec![address.to_string()],
                address: None,
            },
        })
        .collect()
}

pub fn coinbase(txid: &str, values: &[(&str, &str)]) -> RawTransaction {
    RawTransaction {
        txid: txid.to_string(),
        size: 134,
        version: 1,
        locktime: 0,
        vin: vec![RawInput {
            txid: None,
            vout: None,
            coinbase: Some("04ffff001d0104".to_string()),
            script_sig: None,
            sequence: 4_294_967_295,
        }],
        vout: outputs(values),
    }
}

pub fn spend(txid: &str, prevouts: &[(&str, u32)], values: &[(&str, &str)]) -> RawTransaction {
    RawTransaction {
        txid: txid.to_string(),
        size: 225,
        version: 1,
        locktime: 0,
        vin: prevouts
            .iter()
            .map(|(prev, n)| RawInput {
                txid: Some(prev.to_string()),
                vout: Some(*n),
                coinbase: None,
                script_sig: Some(ScriptSig {
                    asm: format!("sig-{}-{}", prev, n),
                }),
                sequence: 4_294_967_295,
            })
            .collect(),
        vout: outputs(values),
    }
}

/// Three blocks: genesis with an unservable coinbase, a coinbase-only block
/// paying 50, and a block whose second transaction spends that 50 into 20
/// and 29.
pub fn three_block_chain() -> FixtureChain {
    let mut chain = FixtureChain::default();
    chain
        .block("1", &["genesis-cb"])
        .block("1", &["cb1"])
        .serve(coinbase("cb1", &[("miner-1", "50")]))
        .block("2", &["cb2", "spend2"])
        .serve(coinbase("cb2", &[("miner-2", "51")]))
        .serve(spend("spend2", &[("cb1", 0)], &[("alice", "20"), ("bob", "29")]));
    chain
}

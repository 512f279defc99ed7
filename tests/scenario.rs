mod common;

use chain_indexer::coin::ZERO_HASH;
use chain_indexer::models::{InputKey, OutputKey, NEXT_HASH_PLACEHOLDER};
use chain_indexer::resume::{self, Plan};
use chain_indexer::{ChainWalker, CoinProfile, IndexError, MemoryStore, RpcError, Store};
use rust_decimal::Decimal;

use common::{block_hash, coinbase, dec, spend, three_block_chain, FixtureChain};

fn profile() -> CoinProfile {
    CoinProfile::generic().with_skip("genesis-cb")
}

fn output_key(txid: &str, n: u32) -> OutputKey {
    OutputKey {
        txid: txid.to_string(),
        n,
    }
}

fn input_key(height: u64, txid: &str, n: u32) -> InputKey {
    InputKey {
        block_height: height,
        txid: txid.to_string(),
        n,
    }
}

#[tokio::test]
async fn ingests_three_block_chain() {
    let chain = three_block_chain();
    let store = MemoryStore::new();
    let profile = profile();

    let summary = ChainWalker::new(&chain, &store, &profile)
        .walk(0..=2)
        .await
        .unwrap();
    assert_eq!(summary.committed, 3);
    assert_eq!(summary.conflicts, 0);
    assert_eq!(summary.last_height, Some(2));

    let tables = store.snapshot();
    let blocks: Vec<_> = tables.blocks.values().collect();

    // cumulative difficulty: 0, 0 + 1, 1 + 2
    assert_eq!(blocks[0].cumulative_difficulty, Decimal::ZERO);
    assert_eq!(blocks[1].cumulative_difficulty, dec("1"));
    assert_eq!(blocks[2].cumulative_difficulty, dec("3"));

    // skipped genesis coinbase is not counted
    assert_eq!(blocks[0].transaction_count, 0);
    assert_eq!(blocks[1].transaction_count, 1);
    assert_eq!(blocks[2].transaction_count, 2);

    assert_eq!(blocks[0].prev_hash, ZERO_HASH);
    assert_eq!(blocks[0].next_hash, block_hash(1));
    assert_eq!(blocks[1].prev_hash, block_hash(0));
    assert_eq!(blocks[1].next_hash, block_hash(2));
    assert_eq!(blocks[2].next_hash, NEXT_HASH_PLACEHOLDER);

    let spend2 = &tables.transactions["spend2"];
    assert_eq!(spend2.fee, dec("1"));
    assert_eq!(spend2.total_out, dec("49"));
    assert_eq!(spend2.total_in, Decimal::ZERO);
    assert_eq!(spend2.n, 1);
    assert_eq!(tables.transactions["cb2"].fee, Decimal::ZERO);
    assert_eq!(blocks[2].total_fees, dec("1"));
    assert_eq!(blocks[2].value_out, dec("100"));

    let consumed = &tables.outputs[&output_key("cb1", 0)];
    assert!(consumed.spent);
    assert_eq!(consumed.linked_txid.as_deref(), Some("spend2"));
    assert!(tables.inputs[&input_key(1, "cb1", 0)].spent);

    let spend_input = &tables.inputs[&input_key(2, "spend2", 0)];
    assert!(!spend_input.coinbase);
    assert!(!spend_input.spent);
    assert_eq!(spend_input.prevout_hash, "cb1");
    assert_eq!(spend_input.prevout_n, 0);

    let coinbase_input = &tables.inputs[&input_key(2, "cb2", 0)];
    assert!(coinbase_input.coinbase);
    assert_eq!(coinbase_input.prevout_hash, "COINBASE");

    assert!(!tables.outputs[&output_key("spend2", 0)].spent);
    assert_eq!(
        tables.outputs[&output_key("spend2", 1)].address.as_deref(),
        Some("bob")
    );
}

#[tokio::test]
async fn rerunning_a_stored_range_changes_nothing() {
    let chain = three_block_chain();
    let store = MemoryStore::new();
    let profile = profile();
    let walker = ChainWalker::new(&chain, &store, &profile);

    walker.walk(0..=2).await.unwrap();
    let before = store.snapshot();

    let summary = walker.walk(0..=2).await.unwrap();
    assert_eq!(summary.committed, 0);
    assert_eq!(summary.conflicts, 3);
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn resume_links_previous_tip_to_its_successor() {
    let full = three_block_chain();
    let store = MemoryStore::new();
    let profile = profile();

    let early = full.with_tip(1);
    let plan = resume::prepare(&early, &store).await.unwrap();
    assert_eq!(plan, Plan::Sync(0..=1));
    ChainWalker::new(&early, &store, &profile)
        .walk(0..=1)
        .await
        .unwrap();
    assert!(store.block(1).await.unwrap().unwrap().awaits_successor());

    assert_eq!(resume::prepare(&early, &store).await.unwrap(), Plan::UpToDate);
    assert!(store.block(1).await.unwrap().unwrap().awaits_successor());

    let plan = resume::prepare(&full, &store).await.unwrap();
    assert_eq!(plan, Plan::Sync(2..=2));
    assert_eq!(store.block(1).await.unwrap().unwrap().next_hash, block_hash(2));

    ChainWalker::new(&full, &store, &profile)
        .walk(2..=2)
        .await
        .unwrap();
    let tip = store.block(2).await.unwrap().unwrap();
    assert_eq!(tip.cumulative_difficulty, dec("3"));
    assert_eq!(tip.next_hash, NEXT_HASH_PLACEHOLDER);
}

#[tokio::test]
async fn spend_mutates_only_the_consumed_rows() {
    let chain = three_block_chain();
    let store = MemoryStore::new();
    let profile = profile();
    let walker = ChainWalker::new(&chain, &store, &profile);

    walker.walk(0..=1).await.unwrap();
    let before = store.snapshot();
    walker.walk(2..=2).await.unwrap();
    let after = store.snapshot();

    let changed_inputs: Vec<_> = before
        .inputs
        .iter()
        .filter(|(key, input)| after.inputs[*key] != **input)
        .map(|(key, _)| key.clone())
        .collect();
    assert_eq!(changed_inputs, vec![input_key(1, "cb1", 0)]);

    let changed_outputs: Vec<_> = before
        .outputs
        .iter()
        .filter(|(key, output)| after.outputs[*key] != **output)
        .map(|(key, _)| key.clone())
        .collect();
    assert_eq!(changed_outputs, vec![output_key("cb1", 0)]);

    assert_eq!(before.transactions, {
        let mut kept = after.transactions.clone();
        kept.retain(|_, tx| tx.block_height < 2);
        kept
    });
}

#[tokio::test]
async fn spends_within_one_block_resolve_before_commit() {
    let mut chain = three_block_chain();
    chain
        .block("2", &["cb3", "a", "b"])
        .serve(coinbase("cb3", &[("miner-3", "50")]))
        .serve(spend("a", &[("cb2", 0)], &[("carol", "50")]))
        .serve(spend("b", &[("a", 0)], &[("dave", "49.5")]));
    let store = MemoryStore::new();
    let profile = profile();

    ChainWalker::new(&chain, &store, &profile)
        .walk(0..=3)
        .await
        .unwrap();

    let tables = store.snapshot();
    assert!(tables.inputs[&input_key(2, "cb2", 0)].spent);
    assert!(tables.inputs[&input_key(3, "a", 0)].spent);
    assert!(!tables.inputs[&input_key(3, "b", 0)].spent);

    let a_out = &tables.outputs[&output_key("a", 0)];
    assert!(a_out.spent);
    assert_eq!(a_out.linked_txid.as_deref(), Some("b"));

    assert_eq!(tables.transactions["a"].fee, dec("1"));
    assert_eq!(tables.transactions["b"].fee, dec("0.5"));
    assert_eq!(tables.blocks[&3].total_fees, dec("1.5"));
    assert_eq!(tables.blocks[&3].cumulative_difficulty, dec("5"));
}

#[tokio::test]
async fn unavailable_transactions_are_skipped() {
    let mut chain = FixtureChain::default();
    chain
        .block("1", &["cb0"])
        .serve(coinbase("cb0", &[("miner", "50")]))
        .block("1", &["cb1", "ghost", "orphan-spend", "slow"])
        .serve(coinbase("cb1", &[("miner", "50")]))
        .serve(spend("orphan-spend", &[("never-seen", 0)], &[("eve", "1")]))
        .serve(spend("slow", &[("cb0", 0)], &[("frank", "10")]))
        .unreachable("slow");
    let store = MemoryStore::new();
    let profile = CoinProfile::generic();

    let summary = ChainWalker::new(&chain, &store, &profile)
        .walk(0..=1)
        .await
        .unwrap();
    assert_eq!(summary.committed, 2);

    let tables = store.snapshot();
    assert_eq!(tables.blocks[&1].transaction_count, 1);
    assert!(!tables.transactions.contains_key("ghost"));
    assert!(!tables.transactions.contains_key("orphan-spend"));
    assert!(!tables.transactions.contains_key("slow"));
    assert!(tables.inputs.keys().all(|key| key.txid != "orphan-spend"));
    assert!(!tables.outputs[&output_key("cb0", 0)].spent);
}

#[tokio::test]
async fn resuming_without_a_stored_parent_fails() {
    let chain = three_block_chain();
    let store = MemoryStore::new();
    let profile = profile();

    let err = ChainWalker::new(&chain, &store, &profile)
        .walk(2..=2)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::MissingParent(1)));
    assert_eq!(store.row_count(), 0);
}

#[tokio::test]
async fn block_lookup_past_the_tip_is_fatal() {
    let chain = three_block_chain();
    let store = MemoryStore::new();
    let profile = profile();

    let err = ChainWalker::new(&chain, &store, &profile)
        .walk(0..=3)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IndexError::Rpc {
            source: RpcError::NotFound(_),
            ..
        }
    ));
    assert_eq!(store.highest_block().await.unwrap().unwrap().height, 2);
}

//! End-to-end scenarios: both indexers against a scripted node and the
//! in-memory store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::U256;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tipwatch_core::{
    run_loop, BackoffConfig, Backoff, BlockHeader, CatchUp, CursorEntry, CursorStore,
    CursorTable, DonationStore, IndexerError, PassOutcome, PollOptions, Reconciler,
};
use tipwatch_evm::decoder::{keccak256_signature, DONATE_SIGNATURE};
use tipwatch_evm::{DonationIndexer, EvmRpcClient, HeadTracker, LogFilter, RawLog};
use tipwatch_storage::InMemoryStorage;

const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
const DONOR: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
const STREAMER: &str = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";
const TOKEN: &str = "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB";

// ─── Scripted node ────────────────────────────────────────────────────────────

#[derive(Default)]
struct ChainState {
    blocks: BTreeMap<u64, BlockHeader>,
    /// Logs keyed by block hash.
    logs: HashMap<String, Vec<RawLog>>,
}

#[derive(Default)]
struct Node {
    state: Mutex<ChainState>,
}

fn block_hash(height: u64, fork: u8) -> String {
    format!("0x{fork:02x}{height:062x}")
}

fn padded(addr: &str) -> String {
    format!("0x{:0>64}", addr.trim_start_matches("0x").to_ascii_lowercase())
}

impl Node {
    fn new(tip: u64) -> Arc<Self> {
        let node = Arc::new(Self::default());
        node.fork(0, tip, 0xaa);
        node
    }

    /// Replace heights `from..=to` with blocks of `fork`, dropping anything above.
    fn fork(&self, from: u64, to: u64, fork: u8) {
        let mut state = self.state.lock().unwrap();
        state.blocks.split_off(&from);
        for height in from..=to {
            let parent_hash = match height.checked_sub(1).and_then(|p| state.blocks.get(&p)) {
                Some(parent) => parent.hash.clone(),
                None => format!("0x{:064x}", 0),
            };
            state.blocks.insert(
                height,
                BlockHeader {
                    height,
                    hash: block_hash(height, fork),
                    parent_hash,
                },
            );
        }
    }

    fn hash_at(&self, height: u64) -> String {
        self.state.lock().unwrap().blocks[&height].hash.clone()
    }

    /// Emit a `Donate` log in the current block at `height`.
    fn donate(&self, height: u64, net: u64, commission: u64, name: &str, message: &str) {
        let hash = self.hash_at(height);
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(net), 256),
            DynSolValue::Uint(U256::from(commission), 256),
            DynSolValue::String(name.into()),
            DynSolValue::String(message.into()),
        ])
        .abi_encode_params();

        let mut state = self.state.lock().unwrap();
        let logs = state.logs.entry(hash.clone()).or_default();
        let log_index = logs.len() as u64;
        logs.push(RawLog {
            address: CONTRACT.into(),
            topics: vec![
                keccak256_signature(DONATE_SIGNATURE),
                padded(DONOR),
                padded(STREAMER),
                padded(TOKEN),
            ],
            data: format!("0x{}", hex::encode(data)),
            block_number: format!("0x{height:x}"),
            block_hash: hash,
            tx_hash: format!("0x{:064x}", height * 1_000 + log_index),
            log_index: format!("0x{log_index:x}"),
            removed: None,
        });
    }
}

#[async_trait]
impl EvmRpcClient for Node {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        let state = self.state.lock().unwrap();
        Ok(state.blocks.keys().next_back().copied().unwrap_or(0))
    }

    async fn get_block(&self, height: u64) -> Result<Option<BlockHeader>, IndexerError> {
        Ok(self.state.lock().unwrap().blocks.get(&height).cloned())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .logs
            .get(&filter.block_hash)
            .map(|logs| {
                logs.iter()
                    .filter(|log| filter.topics.is_empty() || log.topics[0] == filter.topics[0])
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    node: Arc<Node>,
    store: Arc<InMemoryStorage>,
    heads: HeadTracker<Arc<Node>, InMemoryStorage>,
    donations: DonationIndexer<Arc<Node>, InMemoryStorage>,
}

impl Harness {
    fn new(node: Arc<Node>, floor: u64, max_batch: u64) -> Self {
        let store = Arc::new(InMemoryStorage::new());
        let catch_up = CatchUp::new(floor, max_batch);
        Self {
            heads: HeadTracker::new(Arc::clone(&node), Arc::clone(&store), catch_up),
            donations: DonationIndexer::new(
                Arc::clone(&node),
                Arc::clone(&store),
                catch_up,
                CONTRACT,
            ),
            node,
            store,
        }
    }

    async fn heads_height(&self) -> Option<u64> {
        self.heads.current_cursor().await.unwrap().map(|c| c.height)
    }

    async fn donations_height(&self) -> Option<u64> {
        self.donations
            .current_donation_cursor()
            .await
            .unwrap()
            .map(|c| c.height)
    }

    /// Run both indexers until neither has work left.
    async fn settle(&self) {
        for _ in 0..1_000 {
            let a = self.heads.reconcile_once().await.unwrap();
            let b = self.donations.reconcile_once().await.unwrap();
            if a == PassOutcome::UpToDate && b == PassOutcome::UpToDate {
                return;
            }
        }
        panic!("indexers did not settle");
    }
}

fn fast_options() -> PollOptions {
    PollOptions {
        poll_interval: Duration::from_millis(1),
        min_interval: Duration::ZERO,
        backoff: Backoff::new(BackoffConfig {
            initial_ms: 1,
            max_ms: 5,
            multiplier: 2.0,
            jitter_fraction: 0.0,
        }),
        max_passes: None,
    }
}

// ─── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn catch_up_from_floor_in_bounded_steps() {
    let h = Harness::new(Node::new(105), 100, 2);

    let mut seen = vec![];
    for _ in 0..3 {
        h.heads.reconcile_once().await.unwrap();
        seen.push(h.heads_height().await.unwrap());
    }
    assert_eq!(seen, vec![102, 104, 105]);

    for row in h.store.rows(CursorTable::Heads).unwrap() {
        assert_eq!(row.hash, h.node.hash_at(row.height));
    }
    // Nothing at or below the floor is ever indexed.
    assert!(h.store.at(CursorTable::Heads, 100).await.unwrap().is_none());
}

#[tokio::test]
async fn cursor_after_n_passes_is_floor_plus_n_batches() {
    let h = Harness::new(Node::new(1_000), 10, 7);
    for n in 1..=20u64 {
        let outcome = h.heads.reconcile_once().await.unwrap();
        if let PassOutcome::Advanced { from, to, .. } = outcome {
            assert!(to - from + 1 <= 7, "batch too large: {from}..={to}");
        }
        assert_eq!(h.heads_height().await, Some((10 + n * 7).min(1_000)));
    }
}

#[tokio::test]
async fn mismatched_cursor_empties_tables_in_one_pass() {
    let a_hash = format!("0x{}", "a".repeat(64));
    let node = Arc::new(Node::default());
    {
        let mut state = node.state.lock().unwrap();
        state.blocks.insert(
            50,
            BlockHeader {
                height: 50,
                hash: format!("0x{}", "b".repeat(64)),
                parent_hash: format!("0x{}", "9".repeat(64)),
            },
        );
    }
    let h = Harness::new(node, 0, 50);

    let cursor = CursorEntry::new(50, a_hash.as_str());
    h.store.append(CursorTable::Heads, &cursor).await.unwrap();
    let record = tipwatch_core::DonationRecord {
        height: 50,
        block_hash: a_hash.clone(),
        tx_hash: "0x01".into(),
        log_index: 0,
        donor: DONOR.into(),
        recipient: STREAMER.into(),
        token_address: TOKEN.into(),
        net_amount: "1".into(),
        commission: "0".into(),
        donor_name: "Alice".into(),
        message: "gg".into(),
    };
    h.store.commit_block(&cursor, &[record]).await.unwrap();

    let outcome = h.heads.reconcile_once().await.unwrap();
    assert!(matches!(outcome, PassOutcome::Truncated { from: 50, removed: 1, .. }));
    assert!(h.heads_height().await.is_none());

    let outcome = h.donations.reconcile_once().await.unwrap();
    assert!(matches!(outcome, PassOutcome::Truncated { removed: 1, .. }));
    assert!(h.donations_height().await.is_none());
    assert_eq!(h.store.donation_count().await.unwrap(), 0);
}

#[tokio::test]
async fn donation_cursor_never_passes_heads() {
    let node = Node::new(40);
    let h = Harness::new(Arc::clone(&node), 0, 4);

    for round in 0..60u64 {
        // Two donation passes per head pass so the donation indexer keeps up.
        if round % 3 != 0 {
            h.donations.reconcile_once().await.unwrap();
            assert!(h.donations_height().await <= h.heads_height().await);
        } else {
            h.heads.reconcile_once().await.unwrap();
        }
        if round == 20 {
            node.fork(15, 45, 0xbb);
        }
    }
}

#[tokio::test]
async fn reorg_replaces_donations_of_orphaned_blocks() {
    let node = Node::new(20);
    node.donate(12, 100, 5, "Alice", "first");
    node.donate(18, 200, 5, "Bob", "orphaned");
    let h = Harness::new(Arc::clone(&node), 0, 50);
    h.settle().await;
    assert_eq!(h.store.donation_count().await.unwrap(), 2);

    // Heights 15.. are replaced; the new block 16 carries a different donation.
    node.fork(15, 22, 0xbb);
    node.donate(16, 300, 5, "Carol", "canonical");
    h.settle().await;

    let stored = h.store.donations_from(0, 100).await.unwrap();
    let names: Vec<_> = stored.iter().map(|d| d.donor_name.as_str()).collect();
    assert_eq!(names, vec!["Alice", "Carol"]);
    assert_eq!(stored[1].block_hash, node.hash_at(16));
    assert_eq!(h.heads_height().await, Some(22));
    assert_eq!(h.donations_height().await, Some(22));

    // Every stored row matches the node.
    for table in [CursorTable::Heads, CursorTable::Donations] {
        for row in h.store.rows(table).unwrap() {
            assert_eq!(row.hash, node.hash_at(row.height), "{table} row {}", row.height);
        }
    }
}

#[tokio::test]
async fn re_entry_at_tip_changes_nothing() {
    let node = Node::new(12);
    node.donate(7, 1, 1, "Alice", "gg");
    let h = Harness::new(node, 0, 50);
    h.settle().await;

    let heads = h.store.rows(CursorTable::Heads).unwrap();
    let donations = h.store.rows(CursorTable::Donations).unwrap();
    for _ in 0..3 {
        assert_eq!(h.heads.reconcile_once().await.unwrap(), PassOutcome::UpToDate);
        assert_eq!(h.donations.reconcile_once().await.unwrap(), PassOutcome::UpToDate);
    }
    assert_eq!(h.store.rows(CursorTable::Heads).unwrap(), heads);
    assert_eq!(h.store.rows(CursorTable::Donations).unwrap(), donations);
    assert_eq!(h.store.donation_count().await.unwrap(), 1);
}

#[tokio::test]
async fn donate_log_decodes_end_to_end() {
    let node = Node::new(5);
    node.donate(3, 1000, 50, "Alice", "gg");
    let h = Harness::new(Arc::clone(&node), 0, 50);
    h.settle().await;

    let stored = h.store.donations_from(0, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    let d = &stored[0];
    assert_eq!(d.height, 3);
    assert_eq!(d.block_hash, node.hash_at(3));
    assert_eq!(d.donor, DONOR);
    assert_eq!(d.recipient, STREAMER);
    assert_eq!(d.token_address, TOKEN);
    assert_eq!(d.net_amount, "1000");
    assert_eq!(d.commission, "50");
    assert_eq!(d.donor_name, "Alice");
    assert_eq!(d.message, "gg");
}

#[tokio::test]
async fn loops_run_concurrently_until_cancelled() {
    let node = Node::new(30);
    node.donate(25, 9, 1, "Dave", "late");
    let h = Arc::new(Harness::new(node, 0, 5));
    let cancel = CancellationToken::new();
    let options = fast_options();

    let heads = {
        let (h, cancel, options) = (Arc::clone(&h), cancel.clone(), options.clone());
        tokio::spawn(async move { run_loop(&h.heads, &options, &cancel).await })
    };
    let donations = {
        let (h, cancel, options) = (Arc::clone(&h), cancel.clone(), options.clone());
        tokio::spawn(async move { run_loop(&h.donations, &options, &cancel).await })
    };

    tokio::time::timeout(Duration::from_secs(10), async {
        while h.donations_height().await != Some(30) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("donation indexer should reach the tip");

    cancel.cancel();
    let heads = heads.await.unwrap().unwrap();
    let donations = donations.await.unwrap().unwrap();
    assert_eq!(heads.heights_indexed, 30);
    assert_eq!(donations.heights_indexed, 30);
    assert_eq!(h.store.donation_count().await.unwrap(), 1);
}

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokenchain_chain::{
    decode_state, genesis, spawn_chain_state_detector, spawn_mempool_detector, ChainConfig,
    CoinTransfer, DistributedMutex, KeyedMutex, LedgerEngine, LedgerError, LockError,
    MemoryKeystore, MemoryPubSub, Node, Orchestrator, OrchestratorError, Outcome, PubSub,
    PubSubError, PublishError, StatePublisher, Subscription, TokenBurn, TokenMint, TokenTransfer,
    TransactionBuilder, CONSENSUS_LOCK_KEY,
};
use tokenchain_consensus::{Authority, BlockVerifier, ConsensusError, ProofOfWork};
use tokenchain_core::{
    Account, Address, BlockData, BlockchainState, ChainId, Keypair, Transaction,
};
use tokenchain_storage::{
    AccountStore, BlockStore, ChainStateStore, MempoolStore, Storage, TokenStore, UnitOfWork,
};
use tokio::sync::{mpsc, watch};

const CHAIN: ChainId = 1;
const SUPPLY: u64 = 1_000_000;
const AUTHORITY_PW: &str = "authority-pw";

fn config(authority: &Keypair) -> ChainConfig {
    ChainConfig {
        chain_id: CHAIN,
        authority: authority.address().to_hex(),
        authority_key: "authority".into(),
        transaction_fee: 1,
        difficulty: 1,
        initial_supply: SUPPLY,
        state_channel: "chain-state".into(),
    }
}

/// A publisher that is always down.
#[derive(Default)]
struct FailingPubSub {
    attempts: AtomicU32,
}

#[async_trait]
impl PubSub for FailingPubSub {
    async fn publish(&self, channel: &str, _payload: Vec<u8>) -> Result<(), PubSubError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PubSubError::Unavailable(channel.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, PubSubError> {
        Err(PubSubError::Unavailable(channel.to_string()))
    }
}

/// Fails a chosen number of publishes, then delivers in process.
struct FlakyPubSub {
    inner: MemoryPubSub,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyPubSub {
    fn new() -> Self {
        Self {
            inner: MemoryPubSub::new(),
            failures: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl PubSub for FlakyPubSub {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), PubSubError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PubSubError::Unavailable(channel.to_string()));
        }
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, PubSubError> {
        self.inner.subscribe(channel).await
    }
}

struct Harness {
    storage: Storage,
    config: ChainConfig,
    authority: Keypair,
    keystore: Arc<MemoryKeystore>,
    builder: TransactionBuilder,
    orchestrator: Orchestrator,
    stop: watch::Sender<bool>,
    shutdown: watch::Receiver<bool>,
}

impl Harness {
    fn new() -> Self {
        Self::with_pubsub(Arc::new(MemoryPubSub::new()))
    }

    fn with_pubsub(pubsub: Arc<dyn PubSub>) -> Self {
        Self::on_storage(Storage::open_temporary().unwrap(), Keypair::generate(), pubsub, true)
    }

    fn with_difficulty(difficulty: u16) -> Self {
        let authority = Keypair::generate();
        let config = ChainConfig {
            difficulty,
            ..config(&authority)
        };
        Self::build(
            Storage::open_temporary().unwrap(),
            config,
            authority,
            Arc::new(MemoryPubSub::new()),
            true,
        )
    }

    fn on_storage(
        storage: Storage,
        authority: Keypair,
        pubsub: Arc<dyn PubSub>,
        initialize: bool,
    ) -> Self {
        Self::build(storage, config(&authority), authority, pubsub, initialize)
    }

    fn build(
        storage: Storage,
        config: ChainConfig,
        authority: Keypair,
        pubsub: Arc<dyn PubSub>,
        initialize: bool,
    ) -> Self {
        let signer = Authority::new("authority", authority.clone());
        if initialize {
            genesis::initialize(&storage, &config, &signer).unwrap();
        }

        let keystore = Arc::new(MemoryKeystore::new());
        keystore.insert(authority.clone(), AUTHORITY_PW);
        let lock: Arc<dyn DistributedMutex> = Arc::new(KeyedMutex::new());

        let builder = TransactionBuilder::new(
            storage.clone(),
            CHAIN,
            authority.address(),
            keystore.clone(),
            Arc::clone(&lock),
        );
        let publisher = StatePublisher::new(pubsub, config.state_channel.clone());
        let orchestrator = Orchestrator::new(storage.clone(), CHAIN, signer, publisher, lock);

        let (stop, shutdown) = watch::channel(false);
        Self {
            storage,
            config,
            authority,
            keystore,
            builder,
            orchestrator,
            stop,
            shutdown,
        }
    }

    fn wallet(&self, password: &str) -> Keypair {
        let keypair = Keypair::generate();
        self.keystore.insert(keypair.clone(), password);
        keypair
    }

    /// Run every pending entry through the producer, oldest first.
    async fn drain(&self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        for entry in MempoolStore::new(&self.storage).list().unwrap() {
            outcomes.push(self.orchestrator.handle(entry, &self.shutdown).await);
        }
        outcomes
    }

    async fn commit_one(&self) -> BlockData {
        let mut outcomes = self.drain().await;
        assert_eq!(outcomes.len(), 1, "expected exactly one pending transaction");
        committed(outcomes.remove(0))
    }

    async fn send(&self, from: &Keypair, password: &str, to: Address, amount: u64) {
        self.builder
            .transfer_coin(CoinTransfer {
                from: from.address(),
                to,
                amount,
                password: password.into(),
            })
            .await
            .unwrap();
    }

    /// Send `amount` from the authority and commit it.
    async fn fund(&self, to: Address, amount: u64) {
        let authority = self.authority.clone();
        self.send(&authority, AUTHORITY_PW, to, amount).await;
        self.commit_one().await;
    }

    async fn mint(&self, to: Address, uri: &str) -> BlockData {
        self.builder
            .mint_token(TokenMint {
                to,
                metadata_uri: uri.into(),
                password: AUTHORITY_PW.into(),
            })
            .await
            .unwrap();
        self.commit_one().await
    }

    fn account(&self, address: &Address) -> Option<Account> {
        AccountStore::new(&self.storage, CHAIN).get(address).unwrap()
    }

    fn balance(&self, address: &Address) -> u64 {
        self.account(address).map(|a| a.balance).unwrap_or_default()
    }

    fn total_supply(&self) -> u64 {
        AccountStore::new(&self.storage, CHAIN)
            .list()
            .unwrap()
            .iter()
            .map(|a| a.balance)
            .sum()
    }

    fn head(&self) -> BlockchainState {
        ChainStateStore::new(&self.storage)
            .get_by_chain_id(CHAIN)
            .unwrap()
            .unwrap()
    }
}

fn committed(outcome: Outcome) -> BlockData {
    match outcome {
        Outcome::Committed(block) => block,
        other => panic!("expected a committed block, got {:?}", other),
    }
}

fn recipient() -> Address {
    Address::from_bytes([0xB0; 20])
}

#[tokio::test]
async fn test_coin_transfer_moves_amount_and_fee() {
    let h = Harness::new();
    let alice = h.wallet("alice");
    h.fund(alice.address(), 100).await;
    let authority_before = h.balance(&h.authority.address());

    h.send(&alice, "alice", recipient(), 49).await;
    let block = h.commit_one().await;

    let sender = h.account(&alice.address()).unwrap();
    assert_eq!(sender.balance, 50);
    assert_eq!(sender.nonce, 1);
    assert_eq!(h.balance(&recipient()), 49);
    assert_eq!(h.balance(&h.authority.address()), authority_before + 1);
    assert_eq!(block.transactions[0].fee, 1);
    assert_eq!(h.total_supply(), SUPPLY);
}

#[tokio::test]
async fn test_mint_creates_token_and_advances_latest_id() {
    let h = Harness::new();
    let wallet = h.wallet("w");

    let block = h.mint(wallet.address(), "ipfs://abc").await;

    let token = TokenStore::new(&h.storage).get(1).unwrap().unwrap();
    assert_eq!(token.owner, wallet.address());
    assert_eq!(token.metadata_uri, "ipfs://abc");
    assert_eq!(token.nonce, 0);
    assert_eq!(h.head().latest_token_id, 1);
    assert_eq!(block.header.latest_token_id, 1);
    assert_eq!(block.header.tokens_root, TokenStore::new(&h.storage).hash_state().unwrap());
    assert!(h.account(&wallet.address()).is_some());
}

#[tokio::test]
async fn test_burn_moves_token_to_burn_address_once() {
    let h = Harness::new();
    let wallet = h.wallet("w");
    h.fund(wallet.address(), 10).await;
    h.mint(wallet.address(), "ipfs://abc").await;

    h.builder
        .burn_token(TokenBurn {
            from: wallet.address(),
            token_id: 1,
            password: "w".into(),
        })
        .await
        .unwrap();
    let block = h.commit_one().await;

    let token = TokenStore::new(&h.storage).get(1).unwrap().unwrap();
    assert_eq!(token.owner, Address::BURN);
    assert_eq!(token.nonce, 1);
    assert!(token.is_burned());

    // The same burn applied a second time does not move the token nonce.
    let ledger = LedgerEngine::new(CHAIN, h.authority.address());
    let uow = UnitOfWork::begin(&h.storage);
    let replay = ledger.apply(&uow, &block.transactions[0].signed, &h.head());
    drop(uow);
    assert!(matches!(
        replay,
        Err(LedgerError::StaleTokenNonce {
            token_id: 1,
            stored: 1,
            got: 1
        })
    ));

    // Resubmitting the signed burn is rejected before it reaches the ledger.
    let entry = MempoolStore::new(&h.storage)
        .submit(block.transactions[0].signed.clone())
        .unwrap();
    let outcomes = h.drain().await;
    assert!(matches!(outcomes[..], [Outcome::Rejected(_)]));
    assert_eq!(TokenStore::new(&h.storage).get(1).unwrap().unwrap().nonce, 1);
    assert_eq!(
        MempoolStore::new(&h.storage).list_rejected().unwrap()[0].entry.id,
        entry.id
    );
}

#[tokio::test]
async fn test_token_transfer_changes_owner() {
    let h = Harness::new();
    let alice = h.wallet("alice");
    let bob = h.wallet("bob");
    h.fund(alice.address(), 10).await;
    h.mint(alice.address(), "ipfs://t").await;

    h.builder
        .transfer_token(TokenTransfer {
            from: alice.address(),
            to: bob.address(),
            token_id: 1,
            password: "alice".into(),
        })
        .await
        .unwrap();
    h.commit_one().await;

    let tokens = TokenStore::new(&h.storage);
    assert_eq!(tokens.get(1).unwrap().unwrap().owner, bob.address());
    assert!(tokens.list_by_owner(&alice.address()).unwrap().is_empty());
    assert_eq!(tokens.list_by_owner(&bob.address()).unwrap().len(), 1);
    assert_eq!(h.balance(&alice.address()), 9);
}

#[tokio::test]
async fn test_tampered_transaction_rejected_without_mutation() {
    let h = Harness::new();
    let alice = h.wallet("alice");
    h.fund(alice.address(), 100).await;
    let head_before = h.head();
    let supply_before = h.total_supply();

    let mut signed = Transaction::coin(CHAIN, 1, alice.address(), recipient(), 10)
        .sign(&alice)
        .unwrap();
    signed.transaction.value = 90;
    MempoolStore::new(&h.storage).submit(signed).unwrap();

    let outcomes = h.drain().await;
    assert!(matches!(
        outcomes[..],
        [Outcome::Rejected(OrchestratorError::Validation(_))]
    ));
    assert_eq!(h.balance(&alice.address()), 100);
    assert_eq!(h.balance(&recipient()), 0);
    assert_eq!(h.total_supply(), supply_before);
    assert_eq!(h.head(), head_before);

    let mempool = MempoolStore::new(&h.storage);
    assert!(mempool.list().unwrap().is_empty());
    assert_eq!(mempool.list_rejected().unwrap().len(), 1);
}

#[tokio::test]
async fn test_queued_transfers_produce_a_verified_chain() {
    let h = Harness::new();
    let alice = h.wallet("alice");
    h.fund(alice.address(), 100).await;

    for amount in [5, 6, 7] {
        h.send(&alice, "alice", recipient(), amount).await;
    }
    let blocks: Vec<BlockData> = h.drain().await.into_iter().map(committed).collect();

    let nonces: Vec<u64> = blocks.iter().map(|b| b.transactions[0].signed.nonce).collect();
    assert_eq!(nonces, vec![1, 2, 3]);
    assert_eq!(h.account(&alice.address()).unwrap().nonce, 3);

    let store = BlockStore::new(&h.storage);
    let head = h.head();
    assert_eq!(head.latest_block_number, 4);
    assert_eq!(head.latest_hash, blocks[2].hash);

    for block in &blocks {
        let parent = store.get_by_hash(&block.header.prev_hash).unwrap().unwrap();
        BlockVerifier::verify_child(block, &parent).unwrap();
        assert!(ProofOfWork::meets_difficulty(&block.hash, h.config.difficulty));
        assert_eq!(store.get_by_number(block.number()).unwrap().unwrap(), *block);

        let proof = block.merkle_tree().proof(0).unwrap();
        assert!(proof.verify(&block.header.transactions_root));
    }
    assert_eq!(h.total_supply(), SUPPLY);
}

#[tokio::test]
async fn test_state_root_matches_committed_accounts() {
    let h = Harness::new();
    let alice = h.wallet("alice");
    h.fund(alice.address(), 30).await;
    h.send(&alice, "alice", recipient(), 10).await;
    let block = h.commit_one().await;

    let accounts = AccountStore::new(&h.storage, CHAIN);
    assert_eq!(block.header.state_root, accounts.hash_state().unwrap());

    // Rebuilding the same accounts elsewhere, in another order, hashes the same.
    let replica = Storage::open_temporary().unwrap();
    let mut all = accounts.list().unwrap();
    all.reverse();
    let copy = AccountStore::new(&replica, CHAIN);
    for account in &all {
        copy.upsert(account).unwrap();
    }
    assert_eq!(copy.hash_state().unwrap(), block.header.state_root);
}

#[tokio::test]
async fn test_insufficient_balance_is_dead_lettered() {
    let h = Harness::new();
    let alice = h.wallet("alice");
    h.fund(alice.address(), 10).await;

    // Signed by hand so the builder's own balance check is bypassed.
    let signed = Transaction::coin(CHAIN, 1, alice.address(), recipient(), 500)
        .sign(&alice)
        .unwrap();
    MempoolStore::new(&h.storage).submit(signed).unwrap();

    let outcomes = h.drain().await;
    assert!(matches!(outcomes[..], [Outcome::Rejected(_)]));
    assert_eq!(h.balance(&alice.address()), 10);

    let rejected = MempoolStore::new(&h.storage).list_rejected().unwrap();
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].reason.contains("insufficient balance"));
}

#[tokio::test(start_paused = true)]
async fn test_publish_exhaustion_rolls_back_and_keeps_entry() {
    let failing = Arc::new(FailingPubSub::default());
    let h = Harness::with_pubsub(failing.clone());
    let head_before = h.head();
    let supply_before = h.total_supply();

    h.send(&h.authority.clone(), AUTHORITY_PW, recipient(), 10).await;
    let started = tokio::time::Instant::now();
    let outcomes = h.drain().await;

    assert!(matches!(
        outcomes[..],
        [Outcome::Deferred(OrchestratorError::Publish(PublishError::Exhausted {
            attempts: 4,
            ..
        }))]
    ));
    assert_eq!(failing.attempts.load(Ordering::SeqCst), 4);
    assert!(started.elapsed() >= Duration::from_millis(500 + 1_000 + 2_000));

    assert_eq!(h.head(), head_before);
    assert_eq!(h.balance(&recipient()), 0);
    assert_eq!(h.total_supply(), supply_before);
    assert!(BlockStore::new(&h.storage).get_by_number(1).unwrap().is_none());

    let mempool = MempoolStore::new(&h.storage);
    assert_eq!(mempool.list().unwrap().len(), 1);
    assert!(mempool.list_rejected().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deferred_transaction_is_retried_before_later_ones() {
    let flaky = Arc::new(FlakyPubSub::new());
    let h = Harness::with_pubsub(flaky.clone());
    let alice = h.wallet("alice");
    h.fund(alice.address(), 100).await;
    h.send(&alice, "alice", recipient(), 10).await;
    h.send(&alice, "alice", recipient(), 20).await;

    // The first block exhausts every publish attempt once.
    flaky.fail_next(4);
    let (queue, pending) = mpsc::channel(8);
    for entry in MempoolStore::new(&h.storage).list().unwrap() {
        queue.send(entry).await.unwrap();
    }
    drop(queue);
    h.orchestrator.run(pending, h.shutdown.clone()).await.unwrap();

    let mempool = MempoolStore::new(&h.storage);
    assert!(mempool.list().unwrap().is_empty());
    assert!(mempool.list_rejected().unwrap().is_empty());
    assert_eq!(h.account(&alice.address()).unwrap().nonce, 2);
    assert_eq!(h.balance(&recipient()), 30);
    assert_eq!(h.head().latest_block_number, 3);
    // Funding, four failures, the retry, then the second transfer.
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn test_shutdown_during_proof_of_work_discards_block() {
    let h = Harness::with_difficulty(40);
    let head_before = h.head();
    h.send(&h.authority.clone(), AUTHORITY_PW, recipient(), 10).await;
    let entry = MempoolStore::new(&h.storage).list().unwrap().remove(0);

    let (outcome, ()) = tokio::join!(h.orchestrator.handle(entry.clone(), &h.shutdown), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.stop.send(true).unwrap();
    });

    assert!(matches!(
        outcome,
        Outcome::Deferred(OrchestratorError::Consensus(ConsensusError::Cancelled))
    ));
    assert_eq!(h.head(), head_before);
    assert_eq!(h.balance(&recipient()), 0);
    assert!(BlockStore::new(&h.storage).get_by_number(1).unwrap().is_none());

    let mempool = MempoolStore::new(&h.storage);
    assert_eq!(mempool.list().unwrap(), vec![entry]);
    assert!(mempool.list_rejected().unwrap().is_empty());
}

#[tokio::test]
async fn test_external_head_write_reaches_subscribers() {
    let storage = Storage::open_temporary().unwrap();
    let keypair = Keypair::generate();
    let config = config(&keypair);
    genesis::initialize(&storage, &config, &Authority::new("authority", keypair)).unwrap();

    let publisher = StatePublisher::new(Arc::new(MemoryPubSub::new()), "chain-state");
    let mut heads = publisher.subscribe().await.unwrap();
    let (_stop, shutdown) = watch::channel(false);
    let _detector = spawn_chain_state_detector(&storage, CHAIN, publisher, shutdown);

    let chain_state = ChainStateStore::new(&storage);
    let mut head = chain_state.get_by_chain_id(CHAIN).unwrap().unwrap();
    head.transaction_fee = 2;
    chain_state.upsert_by_chain_id(&head).unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(2), heads.next())
        .await
        .expect("timed out waiting for a chain head")
        .unwrap();
    assert_eq!(decode_state(&payload).unwrap(), head);
}

#[tokio::test]
async fn test_deferred_entry_is_replayed_on_restart() {
    let storage = Storage::open_temporary().unwrap();
    let authority = Keypair::generate();

    let down = Harness::on_storage(
        storage.clone(),
        authority.clone(),
        Arc::new(FailingPubSub::default()),
        true,
    );
    tokio::time::pause();
    down.send(&authority, AUTHORITY_PW, recipient(), 10).await;
    assert!(matches!(down.drain().await[..], [Outcome::Deferred(_)]));
    tokio::time::resume();

    let up = Harness::on_storage(storage, authority, Arc::new(MemoryPubSub::new()), false);
    let (_stop, shutdown) = watch::channel(false);
    let (_handle, mut pending) = spawn_mempool_detector(&up.storage, shutdown).unwrap();

    let entry = pending.recv().await.unwrap();
    let block = committed(up.orchestrator.handle(entry, &up.shutdown).await);
    assert_eq!(block.number(), 1);
    assert_eq!(up.balance(&recipient()), 10);
    assert!(MempoolStore::new(&up.storage).list().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_node_produces_and_publishes_blocks() {
    let storage = Storage::open_temporary().unwrap();
    let keypair = Keypair::generate();
    let config = config(&keypair);
    let authority = Authority::new("authority", keypair.clone());
    genesis::initialize(&storage, &config, &authority).unwrap();

    let node = Node::new(storage.clone(), &config, authority);
    let lock = node.lock();
    let mut heads = node.publisher().subscribe().await.unwrap();

    let keystore = Arc::new(MemoryKeystore::new());
    keystore.insert(keypair.clone(), AUTHORITY_PW);
    let builder = TransactionBuilder::new(
        storage.clone(),
        CHAIN,
        keypair.address(),
        keystore,
        Arc::clone(&lock),
    );

    let (stop, shutdown) = watch::channel(false);
    let running = tokio::spawn(async move { node.run(shutdown).await });

    for amount in [3, 4] {
        builder
            .transfer_coin(CoinTransfer {
                from: keypair.address(),
                to: recipient(),
                amount,
                password: AUTHORITY_PW.into(),
            })
            .await
            .unwrap();
    }

    let mut numbers = Vec::new();
    while numbers.len() < 2 {
        let payload = tokio::time::timeout(Duration::from_secs(30), heads.next())
            .await
            .expect("timed out waiting for a chain head")
            .unwrap();
        numbers.push(decode_state(&payload).unwrap().latest_block_number);
    }
    assert_eq!(numbers, vec![1, 2]);

    // The running producer holds the consensus lock.
    assert!(matches!(
        lock.try_acquire(CONSENSUS_LOCK_KEY).await,
        Err(LockError::Unavailable(_))
    ));

    stop.send(true).unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(
        AccountStore::new(&storage, CHAIN).get(&recipient()).unwrap().unwrap().balance,
        3 + 4
    );
    assert!(lock.try_acquire(CONSENSUS_LOCK_KEY).await.is_ok());
}

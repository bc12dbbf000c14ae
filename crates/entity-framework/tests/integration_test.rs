use async_trait::async_trait;
use entity_framework::mock::MockStore;
use entity_framework::{
    ActionReply, Codec, CodecError, CommandContext, Effect, Entity, EntityOptions, EntityRuntime,
    FrameworkError, InMemoryStore, PassivationStrategy, Repository, RuntimeConfig,
    ServiceHandler, Store, StoreError, Target, Version,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;

// --- Test Entities ---

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Account {
    balance: u64,
}

#[derive(Debug, Deserialize)]
enum AccountCommand {
    Deposit(u64),
    Withdraw(u64),
    Transfer { to: String, amount: u64 },
    Get,
    Close,
}

#[async_trait]
impl Entity for Account {
    const ENTITY_TYPE: &'static str = "account";
    type Command = AccountCommand;
    type Reply = u64;
    type Context = ();

    fn initial_state(_entity_id: &str) -> Self {
        Self::default()
    }

    fn validate(command: &AccountCommand) -> Result<(), String> {
        match command {
            AccountCommand::Deposit(0) | AccountCommand::Withdraw(0) => {
                Err("amount must be positive".to_string())
            }
            _ => Ok(()),
        }
    }

    async fn handle_command(
        &self,
        command: AccountCommand,
        ctx: &mut CommandContext<'_, Self>,
    ) -> ActionReply<u64> {
        match command {
            AccountCommand::Deposit(amount) => {
                let balance = self.balance + amount;
                ctx.update_state(Account { balance });
                ActionReply::message(balance).and_effects([Effect::service(
                    "audit",
                    "deposited",
                    json!({ "account": ctx.entity_id(), "amount": amount }),
                )])
            }
            AccountCommand::Withdraw(amount) if amount > self.balance => {
                ActionReply::failure("insufficient funds").and_effects([Effect::service(
                    "admin",
                    "notify",
                    json!({ "account": ctx.entity_id(), "requested": amount }),
                )])
            }
            AccountCommand::Withdraw(amount) => {
                let balance = self.balance - amount;
                ctx.update_state(Account { balance });
                ActionReply::message(balance)
            }
            AccountCommand::Transfer { to, amount } => {
                if amount > self.balance {
                    return ActionReply::failure("insufficient funds");
                }
                let balance = self.balance - amount;
                ctx.update_state(Account { balance });
                ActionReply::message(balance).and_effects([Effect::entity(
                    "account",
                    to,
                    json!({ "Deposit": amount }),
                )])
            }
            AccountCommand::Get => ActionReply::message(self.balance),
            AccountCommand::Close => {
                ctx.delete_state();
                ActionReply::message(self.balance)
            }
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Relay;

#[derive(Debug, Deserialize)]
enum RelayCommand {
    To { entity_type: String, entity_id: String, payload: Value },
    ToService { service: String, method: String, payload: Value },
    Loop,
    Ignore,
    /// Replies with one `audit.record` effect per payload.
    Broadcast(Vec<Value>),
    Explode,
}

#[async_trait]
impl Entity for Relay {
    const ENTITY_TYPE: &'static str = "relay";
    type Command = RelayCommand;
    type Reply = ();
    type Context = ();

    fn initial_state(_entity_id: &str) -> Self {
        Relay
    }

    async fn handle_command(
        &self,
        command: RelayCommand,
        ctx: &mut CommandContext<'_, Self>,
    ) -> ActionReply<()> {
        match command {
            RelayCommand::To {
                entity_type,
                entity_id,
                payload,
            } => ActionReply::forward(Target::entity(entity_type, entity_id), payload),
            RelayCommand::ToService {
                service,
                method,
                payload,
            } => ActionReply::forward(Target::service(service, method), payload),
            RelayCommand::Loop => {
                ActionReply::forward(Target::entity("relay", ctx.entity_id()), json!("Loop"))
            }
            RelayCommand::Ignore => ActionReply::no_reply(),
            RelayCommand::Broadcast(payloads) => ActionReply::no_reply().and_effects(
                payloads
                    .into_iter()
                    .map(|payload| Effect::service("audit", "record", payload)),
            ),
            RelayCommand::Explode => panic!("relay handler exploded"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Broken;

#[async_trait]
impl Entity for Broken {
    const ENTITY_TYPE: &'static str = "bad/type";
    type Command = ();
    type Reply = ();
    type Context = ();

    fn initial_state(_entity_id: &str) -> Self {
        Broken
    }

    async fn handle_command(&self, _: (), _: &mut CommandContext<'_, Self>) -> ActionReply<()> {
        ActionReply::no_reply()
    }
}

/// Stores an account as its decimal balance.
struct DecimalCodec;

impl Codec<Account> for DecimalCodec {
    fn encode(&self, value: &Account) -> Result<Vec<u8>, CodecError> {
        Ok(value.balance.to_string().into_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Account, CodecError> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|text| text.parse().ok())
            .map(|balance| Account { balance })
            .ok_or_else(|| CodecError(format!("not a decimal balance: {bytes:?}")))
    }
}

// --- Test Service ---

#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Recorder {
    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceHandler for Recorder {
    async fn call(&self, method: &str, payload: Value) -> Result<Value, String> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), payload.clone()));
        Ok(json!({ "echo": payload }))
    }
}

/// Polls `check` until it holds, giving spawned effect tasks time to run.
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn balance(reply: ActionReply<u64>) -> u64 {
    match reply {
        ActionReply::Message { payload, .. } => payload,
        other => panic!("expected a message, got {other:?}"),
    }
}

// --- Tests ---

#[tokio::test]
async fn test_first_command_starts_from_initial_state_and_persists() {
    let store = Arc::new(InMemoryStore::new());
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    assert_eq!(balance(accounts.send("a-1", AccountCommand::Deposit(5)).await.unwrap()), 5);
    assert!(accounts.is_active("a-1"));

    let record = store.read(b"account/a-1").await.unwrap().unwrap();
    assert_eq!(record.version, Version::INITIAL);
    assert_eq!(
        serde_json::from_slice::<Account>(&record.value).unwrap(),
        Account { balance: 5 }
    );

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_instance_is_passivated_and_reloaded() {
    let store = Arc::new(InMemoryStore::new());
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(
            EntityOptions::defaults()
                .with_passivation_strategy(PassivationStrategy::timeout(Duration::from_secs(30))),
            (),
        )
        .unwrap();

    accounts.send("cart-1", AccountCommand::Deposit(7)).await.unwrap();
    assert!(runtime.is_active("account", "cart-1"));

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(runtime.is_active("account", "cart-1"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!runtime.is_active("account", "cart-1"));
    assert_eq!(runtime.active_count("account"), 0);

    // Reactivation loads the persisted state and writes on top of its version.
    assert_eq!(balance(accounts.send("cart-1", AccountCommand::Deposit(1)).await.unwrap()), 8);
    assert!(runtime.is_active("account", "cart-1"));
    let record = store.read(b"account/cart-1").await.unwrap().unwrap();
    assert_eq!(record.version, Version(2));

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_activity_postpones_passivation() {
    let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    for _ in 0..4 {
        accounts.send("a-1", AccountCommand::Deposit(1)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
    }
    assert!(accounts.is_active("a-1"));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!accounts.is_active("a-1"));
}

#[tokio::test(start_paused = true)]
async fn test_never_strategy_keeps_instance_until_shutdown() {
    let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
    let accounts = runtime
        .register::<Account>(
            EntityOptions::defaults().with_passivation_strategy(PassivationStrategy::never()),
            (),
        )
        .unwrap();

    accounts.send("a-1", AccountCommand::Deposit(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
    assert!(accounts.is_active("a-1"));

    runtime.shutdown().await;
    assert_eq!(accounts.active_count(), 0);
}

#[tokio::test]
async fn test_external_write_causes_retryable_conflict_without_effects() {
    let store = Arc::new(InMemoryStore::new());
    let audit = Recorder::default();
    let runtime = EntityRuntime::new(store.clone());
    runtime.register_service("audit", Arc::new(audit.clone()));
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    accounts.send("a-1", AccountCommand::Deposit(10)).await.unwrap();
    assert!(eventually(|| audit.calls().len() == 1).await);

    // Another writer moves the record to v2 behind the instance's back.
    let external = Repository::<Account>::new(store.clone(), "account");
    let version = external
        .save("a-1", &Account { balance: 100 }, Some(Version(1)))
        .await
        .unwrap();
    assert_eq!(version, Version(2));

    let err = accounts
        .send("a-1", AccountCommand::Deposit(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FrameworkError::Conflict {
            expected: Some(Version(1)),
            actual: Some(Version(2)),
            ..
        }
    ));
    assert!(err.is_retryable());

    // The failed command's effect never runs.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(audit.calls().len(), 1);

    // The instance resynchronized; a retry applies on top of the external state.
    assert_eq!(balance(accounts.send("a-1", AccountCommand::Deposit(1)).await.unwrap()), 101);
    let (state, version) = external.load("a-1").await.unwrap().unwrap();
    assert_eq!(state.balance, 101);
    assert_eq!(version, Version(3));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_failure_reply_still_runs_its_effects() {
    let admin = Recorder::default();
    let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
    runtime.register_service("admin", Arc::new(admin.clone()));
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    let reply = accounts
        .send("w-1", AccountCommand::Withdraw(50))
        .await
        .unwrap();
    assert_eq!(reply.failure_description(), Some("insufficient funds"));
    assert_eq!(reply.effects().len(), 1);

    assert!(eventually(|| admin.calls().len() == 1).await);
    let (method, payload) = admin.calls().remove(0);
    assert_eq!(method, "notify");
    assert_eq!(payload, json!({ "account": "w-1", "requested": 50 }));

    // No state was written.
    assert_eq!(balance(accounts.send("w-1", AccountCommand::Get).await.unwrap()), 0);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_entity_effect_reaches_target_instance() {
    let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    accounts.send("from", AccountCommand::Deposit(30)).await.unwrap();
    let reply = accounts
        .send(
            "from",
            AccountCommand::Transfer {
                to: "to".to_string(),
                amount: 12,
            },
        )
        .await
        .unwrap();
    assert_eq!(balance(reply), 18);

    let reader = accounts.clone();
    let mut received = false;
    for _ in 0..100 {
        if balance(reader.send("to", AccountCommand::Get).await.unwrap()) == 12 {
            received = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(received);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_commands_for_one_id_never_interleave() {
    let store = Arc::new(InMemoryStore::new());
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..50 {
        let accounts = accounts.clone();
        tasks.spawn(async move { accounts.send("hot", AccountCommand::Deposit(1)).await });
    }
    while let Some(result) = tasks.join_next().await {
        // Sequential processing means no command ever sees a stale version.
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(balance(accounts.send("hot", AccountCommand::Get).await.unwrap()), 50);
    let record = store.read(b"account/hot").await.unwrap().unwrap();
    assert_eq!(record.version, Version(50));

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_id_does_not_block_other_ids() {
    let store = Arc::new(MockStore::new().with_write_delay("account/slow", Duration::from_secs(10)));
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    let start = tokio::time::Instant::now();
    let slow = {
        let accounts = accounts.clone();
        tokio::spawn(async move { accounts.send("slow", AccountCommand::Deposit(1)).await })
    };
    tokio::task::yield_now().await;

    let fast = accounts.send("fast", AccountCommand::Deposit(1)).await.unwrap();
    assert_eq!(balance(fast), 1);
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(!slow.is_finished());

    assert_eq!(balance(slow.await.unwrap().unwrap()), 1);
    assert!(start.elapsed() >= Duration::from_secs(10));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_invalid_commands_are_rejected_before_activation() {
    let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    let err = accounts
        .send("a-1", AccountCommand::Deposit(0))
        .await
        .unwrap_err();
    assert!(matches!(err, FrameworkError::Validation { .. }));
    assert!(!err.is_retryable());
    assert!(!accounts.is_active("a-1"));

    let err = runtime
        .handle("account", "a-1", json!({ "Deposit": "lots" }))
        .await
        .unwrap_err();
    assert!(matches!(err, FrameworkError::Validation { .. }));
    assert!(!runtime.is_active("account", "a-1"));

    let err = runtime
        .handle("ledger", "a-1", json!("Get"))
        .await
        .unwrap_err();
    assert_eq!(err, FrameworkError::UnknownEntityType("ledger".to_string()));
}

#[tokio::test]
async fn test_corrupted_record_fails_activation() {
    let store = Arc::new(InMemoryStore::new());
    store
        .write(b"account/bad", b"not json".to_vec(), None)
        .await
        .unwrap();
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    let err = accounts
        .send("bad", AccountCommand::Get)
        .await
        .unwrap_err();
    assert!(matches!(err, FrameworkError::DataCorruption { .. }));
    assert!(!err.is_retryable());
    assert!(!accounts.is_active("bad"));

    // Other ids are unaffected.
    assert_eq!(balance(accounts.send("good", AccountCommand::Deposit(2)).await.unwrap()), 2);
}

#[tokio::test]
async fn test_store_outage_is_retryable() {
    let store = Arc::new(MockStore::new());
    store
        .expect_write()
        .for_key("account/a-1")
        .return_err(StoreError::Unavailable("connection reset".into()));
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    let err = accounts
        .send("a-1", AccountCommand::Deposit(3))
        .await
        .unwrap_err();
    assert!(matches!(err, FrameworkError::StoreUnavailable(_)));
    assert!(err.is_retryable());

    assert_eq!(balance(accounts.send("a-1", AccountCommand::Deposit(3)).await.unwrap()), 3);
    store.verify();
}

#[tokio::test(start_paused = true)]
async fn test_store_timeout_surfaces_as_unavailable() {
    let store = Arc::new(MockStore::new().with_write_delay("account/", Duration::from_secs(60)));
    let runtime = EntityRuntime::with_config(
        store.clone(),
        RuntimeConfig::default().with_store_timeout(Duration::from_secs(5)),
    );
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    let err = accounts
        .send("a-1", AccountCommand::Deposit(1))
        .await
        .unwrap_err();
    assert!(matches!(err, FrameworkError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_deleted_state_unloads_instance_and_restarts_fresh() {
    let store = Arc::new(InMemoryStore::new());
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    accounts.send("a-1", AccountCommand::Deposit(4)).await.unwrap();
    assert_eq!(balance(accounts.send("a-1", AccountCommand::Close).await.unwrap()), 4);
    assert!(!accounts.is_active("a-1"));
    assert!(store.read(b"account/a-1").await.unwrap().is_none());

    assert_eq!(balance(accounts.send("a-1", AccountCommand::Get).await.unwrap()), 0);
    accounts.send("a-1", AccountCommand::Deposit(1)).await.unwrap();

    // Versions keep increasing across the delete.
    let record = store.read(b"account/a-1").await.unwrap().unwrap();
    assert_eq!(record.version, Version(2));
}

#[tokio::test]
async fn test_forwards_are_followed_to_the_final_reply() {
    let echo = Recorder::default();
    let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
    runtime.register_service("echo", Arc::new(echo.clone()));
    runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();
    let relays = runtime
        .register::<Relay>(EntityOptions::defaults(), ())
        .unwrap();

    let reply = runtime
        .handle(
            "relay",
            "r-1",
            json!({ "To": { "entity_type": "account", "entity_id": "a-1", "payload": { "Deposit": 9 } } }),
        )
        .await
        .unwrap();
    assert_eq!(reply.payload(), Some(&json!(9)));

    let reply = runtime
        .handle(
            "relay",
            "r-1",
            json!({ "ToService": { "service": "echo", "method": "ping", "payload": 1 } }),
        )
        .await
        .unwrap();
    assert_eq!(reply.payload(), Some(&json!({ "echo": 1 })));
    assert_eq!(echo.calls(), vec![("ping".to_string(), json!(1))]);

    // Typed clients get the forward back unresolved.
    let reply = relays.send("r-1", RelayCommand::Loop).await.unwrap();
    assert!(matches!(reply, ActionReply::Forward { .. }));

    let reply = runtime.handle("relay", "r-1", json!("Ignore")).await.unwrap();
    assert!(matches!(reply, ActionReply::NoReply { .. }));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_forward_chain_is_bounded() {
    let runtime = EntityRuntime::with_config(
        Arc::new(InMemoryStore::new()),
        RuntimeConfig::default().with_max_forward_hops(3),
    );
    runtime
        .register::<Relay>(EntityOptions::defaults(), ())
        .unwrap();

    let err = runtime
        .handle("relay", "r-1", json!("Loop"))
        .await
        .unwrap_err();
    assert_eq!(err, FrameworkError::ForwardLimitExceeded(3));
}

#[tokio::test]
async fn test_registration_rules() {
    let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
    assert!(runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .is_ok());

    let err = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .err()
        .unwrap();
    assert_eq!(err, FrameworkError::DuplicateEntityType("account".to_string()));

    let err = runtime
        .register::<Broken>(EntityOptions::defaults(), ())
        .err()
        .unwrap();
    assert_eq!(err, FrameworkError::InvalidEntityType("bad/type".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_in_flight_then_rejects() {
    let store = Arc::new(MockStore::new().with_write_delay("account/", Duration::from_secs(5)));
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    let pending = {
        let accounts = accounts.clone();
        tokio::spawn(async move { accounts.send("a-1", AccountCommand::Deposit(2)).await })
    };
    tokio::task::yield_now().await;

    runtime.shutdown().await;
    assert!(runtime.is_shutting_down());

    // The command accepted before shutdown completed and was persisted.
    assert_eq!(balance(pending.await.unwrap().unwrap()), 2);
    assert_eq!(store.write_count(), 1);
    assert_eq!(accounts.active_count(), 0);

    let err = accounts
        .send("a-1", AccountCommand::Get)
        .await
        .unwrap_err();
    assert_eq!(err, FrameworkError::Unavailable);
    assert!(err.is_retryable());

    let err = runtime
        .handle("account", "a-1", json!("Get"))
        .await
        .unwrap_err();
    assert_eq!(err, FrameworkError::Unavailable);
}

#[tokio::test]
async fn test_effect_retried_after_transient_target_failure() {
    let store = Arc::new(MockStore::new());
    store
        .expect_write()
        .for_key("account/to")
        .return_err(StoreError::Unavailable("blip".into()));
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    accounts.send("from", AccountCommand::Deposit(30)).await.unwrap();
    let reply = accounts
        .send(
            "from",
            AccountCommand::Transfer {
                to: "to".to_string(),
                amount: 12,
            },
        )
        .await
        .unwrap();
    assert_eq!(balance(reply), 18);

    // Shutdown waits for the effect, including its retry.
    runtime.shutdown().await;
    store.verify();

    let (state, version) = Repository::<Account>::new(store.clone(), "account")
        .load("to")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.balance, 12);
    assert_eq!(version, Version::INITIAL);
}

#[tokio::test]
async fn test_effect_gives_up_after_max_attempts() {
    let store = Arc::new(MockStore::new());
    for _ in 0..2 {
        store
            .expect_write()
            .for_key("account/to")
            .return_err(StoreError::Unavailable("down".into()));
    }
    let runtime = EntityRuntime::with_config(
        store.clone(),
        RuntimeConfig::default().with_effect_retry(2, Duration::from_millis(1)),
    );
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    accounts.send("from", AccountCommand::Deposit(30)).await.unwrap();
    accounts
        .send(
            "from",
            AccountCommand::Transfer {
                to: "to".to_string(),
                amount: 12,
            },
        )
        .await
        .unwrap();

    runtime.shutdown().await;
    store.verify();
    assert!(store.read(b"account/to").await.unwrap().is_none());
}

#[tokio::test]
async fn test_effects_run_in_attachment_order() {
    let audit = Recorder::default();
    let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
    runtime.register_service("audit", Arc::new(audit.clone()));
    let relays = runtime
        .register::<Relay>(EntityOptions::defaults(), ())
        .unwrap();

    relays
        .send(
            "r-1",
            RelayCommand::Broadcast(vec![json!("first"), json!("second"), json!("third")]),
        )
        .await
        .unwrap();

    runtime.shutdown().await;
    assert_eq!(
        audit.calls(),
        vec![
            ("record".to_string(), json!("first")),
            ("record".to_string(), json!("second")),
            ("record".to_string(), json!("third")),
        ]
    );
}

#[tokio::test]
async fn test_failed_reload_after_conflict_stops_instance() {
    let store = Arc::new(InMemoryStore::new());
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(EntityOptions::defaults(), ())
        .unwrap();

    accounts.send("a-1", AccountCommand::Deposit(5)).await.unwrap();
    store
        .write(b"account/a-1", b"garbage".to_vec(), Some(Version(1)))
        .await
        .unwrap();

    let err = accounts
        .send("a-1", AccountCommand::Deposit(1))
        .await
        .unwrap_err();
    assert!(matches!(err, FrameworkError::Conflict { .. }));

    // The stale in-memory balance is never served again.
    let err = accounts
        .send("a-1", AccountCommand::Get)
        .await
        .unwrap_err();
    assert!(matches!(err, FrameworkError::DataCorruption { .. }));
    assert!(!accounts.is_active("a-1"));

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_passivation_waits_for_in_flight_write() {
    let store = Arc::new(MockStore::new().with_write_delay("account/", Duration::from_secs(60)));
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register::<Account>(
            EntityOptions::defaults()
                .with_passivation_strategy(PassivationStrategy::timeout(Duration::from_secs(30))),
            (),
        )
        .unwrap();

    // Arms the idle timer without writing.
    accounts.send("a-1", AccountCommand::Get).await.unwrap();
    let pending = {
        let accounts = accounts.clone();
        tokio::spawn(async move { accounts.send("a-1", AccountCommand::Deposit(1)).await })
    };

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert!(!pending.is_finished());
    assert!(accounts.is_active("a-1"), "expired timer must not unload a busy instance");

    assert_eq!(balance(pending.await.unwrap().unwrap()), 1);
    assert!(accounts.is_active("a-1"));

    // Idle time counts from the end of the write.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(accounts.is_active("a-1"));
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!accounts.is_active("a-1"));

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unrepresentable_timeout_keeps_instance() {
    let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
    let accounts = runtime
        .register::<Account>(
            EntityOptions::defaults()
                .with_passivation_strategy(PassivationStrategy::timeout(Duration::MAX)),
            (),
        )
        .unwrap();

    accounts.send("a-1", AccountCommand::Deposit(1)).await.unwrap();
    accounts.send("a-1", AccountCommand::Deposit(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;

    assert!(accounts.is_active("a-1"));
    assert_eq!(balance(accounts.send("a-1", AccountCommand::Get).await.unwrap()), 2);

    runtime.shutdown().await;
    assert_eq!(accounts.active_count(), 0);
}

#[tokio::test]
async fn test_registered_codec_formats_stored_state() {
    let store = Arc::new(InMemoryStore::new());
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register_with_codec::<Account, _>(EntityOptions::defaults(), (), DecimalCodec)
        .unwrap();

    accounts.send("a-1", AccountCommand::Deposit(42)).await.unwrap();
    let record = store.read(b"account/a-1").await.unwrap().unwrap();
    assert_eq!(record.value, b"42");
    runtime.shutdown().await;

    // A fresh runtime decodes the same bytes with the same codec.
    let runtime = EntityRuntime::new(store.clone());
    let accounts = runtime
        .register_with_codec::<Account, _>(EntityOptions::defaults(), (), DecimalCodec)
        .unwrap();
    assert_eq!(balance(accounts.send("a-1", AccountCommand::Deposit(1)).await.unwrap()), 43);

    store
        .write(b"account/bad", br#"{"balance":1}"#.to_vec(), None)
        .await
        .unwrap();
    let err = accounts
        .send("bad", AccountCommand::Get)
        .await
        .unwrap_err();
    assert!(matches!(err, FrameworkError::DataCorruption { .. }));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_panicking_handler_is_not_retryable() {
    let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
    let relays = runtime
        .register::<Relay>(EntityOptions::defaults(), ())
        .unwrap();

    let err = relays.send("r-1", RelayCommand::Explode).await.unwrap_err();
    assert_eq!(
        err,
        FrameworkError::InstancePanicked {
            entity_type: "relay".to_string(),
            entity_id: "r-1".to_string(),
        }
    );
    assert!(!err.is_retryable());

    // The next command gets a fresh worker.
    let reply = relays.send("r-1", RelayCommand::Ignore).await.unwrap();
    assert!(matches!(reply, ActionReply::NoReply { .. }));

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_instance_outlives_shutdown() {
    for _ in 0..20 {
        let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
        runtime
            .register::<Account>(EntityOptions::defaults(), ())
            .unwrap();

        let mut tasks = JoinSet::new();
        for n in 0..16 {
            let runtime = runtime.clone();
            tasks.spawn(async move {
                runtime
                    .handle("account", &format!("a-{n}"), json!({ "Deposit": 1 }))
                    .await
            });
        }
        runtime.shutdown().await;

        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(reply) => assert_eq!(reply.payload(), Some(&json!(1))),
                Err(err) => assert_eq!(err, FrameworkError::Unavailable),
            }
        }
        assert_eq!(runtime.active_count("account"), 0);
    }
}

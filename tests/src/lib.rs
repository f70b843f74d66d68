//! # Cross-crate integration tests
//!
//! Drives the concrete end-to-end scenarios of SPEC_FULL.md §8 against the
//! public APIs of `ingest-decoder`, `ingest-publisher`, and
//! `ingest-supervisor`, backed by the in-memory `shared-bus` fakes — no
//! real NATS/Valkey/node endpoint required.

#[cfg(test)]
mod decode_and_publish_scenarios {
    use std::sync::Arc;

    use alloy_dyn_abi::DynSolValue;
    use ingest_decoder::TransactionDecoder;
    use ingest_publisher::{EventPublisher, PublishConfig};
    use ingest_selector_cache::SelectorCache;
    use shared_bus::fakes::{FakeBusClient, FakeKvStore};
    use shared_types::{GroupKey, ParamValue, ProcessedTransactionEvent, SelectorEntry, SelectorParam, Transaction};

    fn base_tx(input: &str, to: Option<&str>) -> Transaction {
        Transaction {
            hash: "0xaa1122".into(),
            from: "0x01".into(),
            to: to.map(str::to_string),
            value: "1000".into(),
            input: input.into(),
            gas: "0x5208".into(),
            gas_price: "0x3b9aca00".into(),
            nonce: "0x1".into(),
            block_hash: "0xblock".into(),
            block_number: 10,
            transaction_index: 0,
            tx_type: None,
        }
    }

    async fn decode_and_publish(
        decoder: &TransactionDecoder,
        publisher: &EventPublisher<FakeBusClient>,
        tx: Transaction,
    ) -> ProcessedTransactionEvent {
        let decoded = decoder.decode("ethereum", &tx).await;
        let event = ProcessedTransactionEvent::new(
            GroupKey::new("ethereum", "mainnet", "evm"),
            tx.block_hash.clone(),
            tx.block_number,
            1_700_000_000,
            tx,
            decoded,
        );
        publisher.publish(&event).await;
        event
    }

    /// Scenario 1: a simple transfer decodes to a synthetic `transfer` call
    /// and publishes successfully (invariants 2 and 4).
    #[tokio::test]
    async fn simple_transfer_publishes_synthetic_transfer_call() {
        let cache = Arc::new(SelectorCache::new(Arc::new(FakeKvStore::new())));
        let decoder = TransactionDecoder::new(cache);
        let bus = Arc::new(FakeBusClient::new());
        let publisher = EventPublisher::new(bus.clone(), PublishConfig::default());

        let tx = base_tx("0x", Some("0x02"));
        let tx_hash = tx.hash.clone();
        let event = decode_and_publish(&decoder, &publisher, tx).await;

        assert_eq!(event.event_id, tx_hash);
        let call = event.decoded_call.expect("expected a decoded call");
        assert_eq!(call.function, "transfer");
        assert_eq!(call.params.get("from"), Some(&ParamValue::Address("0x01".into())));
        assert_eq!(call.params.get("to"), Some(&ParamValue::Address("0x02".into())));
        assert_eq!(call.params.get("value"), Some(&ParamValue::Uint("1000".into())));
        assert_eq!(bus.published.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    /// Scenario 2: a selector-cache hit for `transfer(address,uint256)`
    /// decodes the calldata and lowercases the address parameter.
    #[tokio::test]
    async fn known_erc20_transfer_decodes_and_lowercases_address() {
        let kv = Arc::new(FakeKvStore::new());
        let entry = SelectorEntry {
            selector: "0xa9059cbb".into(),
            name: "transfer".into(),
            inputs: vec![
                SelectorParam { name: "_to".into(), ty: "address".into() },
                SelectorParam { name: "_value".into(), ty: "uint256".into() },
            ],
        };
        kv.seed(
            &SelectorEntry::global_kv_key("ethereum", "0xa9059cbb"),
            &serde_json::to_string(&entry).unwrap(),
        );
        let cache = Arc::new(SelectorCache::new(kv));
        let decoder = TransactionDecoder::new(cache);
        let bus = Arc::new(FakeBusClient::new());
        let publisher = EventPublisher::new(bus, PublishConfig::default());

        let to = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e"
            .parse::<alloy_primitives::Address>()
            .unwrap();
        let params = DynSolValue::Tuple(vec![
            DynSolValue::Address(to),
            DynSolValue::Uint(alloy_primitives::U256::from(1_000_000u64), 256),
        ])
        .abi_encode_params();
        let input = format!("0xa9059cbb{}", hex::encode(params));

        let tx = base_tx(&input, Some("0x02"));
        let event = decode_and_publish(&decoder, &publisher, tx).await;

        let call = event.decoded_call.expect("expected a decoded call");
        assert_eq!(call.function, "transfer");
        assert_eq!(
            call.params.get("_to"),
            Some(&ParamValue::Address(format!("{to:#x}").to_lowercase()))
        );
        assert_eq!(call.params.get("_value"), Some(&ParamValue::Uint("1000000".into())));
    }

    /// Scenario 3: `to == null` always yields `contract_creation` with the
    /// raw init code carried through (invariant 5).
    #[tokio::test]
    async fn contract_creation_carries_init_code() {
        let cache = Arc::new(SelectorCache::new(Arc::new(FakeKvStore::new())));
        let decoder = TransactionDecoder::new(cache);
        let bus = Arc::new(FakeBusClient::new());
        let publisher = EventPublisher::new(bus, PublishConfig::default());

        let tx = base_tx("0x6001600101", None);
        let event = decode_and_publish(&decoder, &publisher, tx).await;

        let call = event.decoded_call.expect("expected a decoded call");
        assert_eq!(call.function, "contract_creation");
        assert_eq!(call.params.get("init_code"), Some(&ParamValue::Bytes("0x6001600101".into())));
    }

    /// Scenario 4: an unresolvable selector still publishes the event, just
    /// without a `decoded_call`.
    #[tokio::test]
    async fn selector_miss_publishes_without_decoded_call() {
        let cache = Arc::new(SelectorCache::new(Arc::new(FakeKvStore::new())));
        let decoder = TransactionDecoder::new(cache);
        let bus = Arc::new(FakeBusClient::new());
        let publisher = EventPublisher::new(bus.clone(), PublishConfig::default());

        let tx = base_tx("0xdeadbeef00000000000000000000000000000000000000", Some("0x02"));
        let event = decode_and_publish(&decoder, &publisher, tx).await;

        assert!(event.decoded_call.is_none());
        assert_eq!(bus.published.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    /// Invariant 6: a selector entry with no declared inputs is still
    /// reported as a miss, never as a zero-parameter decoded call.
    #[tokio::test]
    async fn selector_with_no_inputs_is_treated_as_a_miss() {
        let kv = Arc::new(FakeKvStore::new());
        let entry = SelectorEntry {
            selector: "0x00000000".into(),
            name: "noop".into(),
            inputs: vec![],
        };
        kv.seed(
            &SelectorEntry::global_kv_key("ethereum", "0x00000000"),
            &serde_json::to_string(&entry).unwrap(),
        );
        let cache = Arc::new(SelectorCache::new(kv));
        let decoder = TransactionDecoder::new(cache);

        let tx = base_tx("0x00000000", Some("0x02"));
        let decoded = decoder.decode("ethereum", &tx).await;
        assert!(decoded.is_none(), "zero-input entry must not synthesize a decoded call");
    }

    /// Round-trip law: a published event's JSON payload deserializes back
    /// to a bit-identical struct.
    #[tokio::test]
    async fn processed_event_payload_round_trips_through_json() {
        let cache = Arc::new(SelectorCache::new(Arc::new(FakeKvStore::new())));
        let decoder = TransactionDecoder::new(cache);
        let bus = Arc::new(FakeBusClient::new());
        let publisher = EventPublisher::new(bus, PublishConfig::default());

        let tx = base_tx("0x", Some("0x02"));
        let event = decode_and_publish(&decoder, &publisher, tx).await;

        let payload = serde_json::to_vec(&event).unwrap();
        let back: ProcessedTransactionEvent = serde_json::from_slice(&payload).unwrap();
        assert_eq!(event, back);
    }
}

#[cfg(test)]
mod registry_and_failover {
    use std::sync::Arc;
    use std::time::Duration;

    use ingest_chain_pipeline::PipelineConfig;
    use ingest_publisher::{EventPublisher, PublishConfig};
    use ingest_registry_watcher::RegistryWatcher;
    use ingest_selector_cache::SelectorCache;
    use ingest_supervisor::Supervisor;
    use shared_bus::fakes::{FakeBusClient, FakeKvStore};
    use shared_bus::{InMemoryEventBus, KvStore};
    use shared_types::{NodeConfig, NodeStatus};
    use tokio_util::sync::CancellationToken;

    fn node(id: &str, http_port: u16, wss_port: u16) -> NodeConfig {
        NodeConfig {
            id: id.to_string(),
            name: id.to_string(),
            network: "ethereum".into(),
            subnet: "mainnet".into(),
            vm_type: "evm".into(),
            // Nothing listens on these ports; connection attempts fail fast,
            // exercising the interruption/reselect path without a live node.
            http_url: format!("http://127.0.0.1:{http_port}"),
            wss_url: format!("ws://127.0.0.1:{wss_port}"),
            enabled: true,
            status: NodeStatus::Unknown,
            last_status_update: None,
            last_error: None,
        }
    }

    fn test_pipeline_config() -> PipelineConfig {
        PipelineConfig {
            channel_capacity: 4,
            worker_count: 1,
            drain_grace: Duration::from_millis(200),
            ..PipelineConfig::default()
        }
    }

    /// A snapshot-only registry feeds the Supervisor, which starts a
    /// pipeline for the lone node and stamps it `Active` in the KV store
    /// immediately on selection — before any network round trip completes.
    #[tokio::test]
    async fn registry_snapshot_drives_supervisor_to_stamp_active_status() {
        let kv_backend = Arc::new(FakeKvStore::new());
        let cfg = node("node-a", 1, 1);
        kv_backend.seed(&NodeConfig::kv_key(&cfg.id), &serde_json::to_string(&cfg).unwrap());

        let kv: Arc<dyn shared_bus::KvStore> = kv_backend.clone();
        let cache = Arc::new(SelectorCache::new(kv.clone()));
        let bus = Arc::new(FakeBusClient::new());
        let publisher = Arc::new(EventPublisher::new(bus, PublishConfig::default()));
        let internal_bus = Arc::new(InMemoryEventBus::new());
        let cancel = CancellationToken::new();

        let supervisor = Supervisor::new(kv, cache, publisher, internal_bus, test_pipeline_config(), cancel.clone());

        let watcher = RegistryWatcher::new(kv_backend.clone());
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let watcher_task = tokio::spawn(async move { watcher.run(tx).await });

        let supervisor_task = tokio::spawn(supervisor.run(rx));

        // Poll the KV store for the status write `ensure_started` performs
        // synchronously on node selection, well before the doomed WebSocket
        // connect attempt resolves.
        let mut saw_active = false;
        for _ in 0..50 {
            if let Ok(Some(raw)) = kv_backend.get(&NodeConfig::kv_key("node-a")).await {
                let persisted: NodeConfig = serde_json::from_str(&raw).unwrap();
                if persisted.status == NodeStatus::Active {
                    saw_active = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(saw_active, "supervisor should stamp the selected node Active on pipeline start");

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), supervisor_task).await;
        watcher_task.abort();
    }

    /// Scenario 5: with two enabled nodes and an unreachable head endpoint,
    /// the Supervisor demotes the failing node and tries its sibling before
    /// parking the group — it never panics or hangs past the drain window.
    #[tokio::test]
    async fn two_node_group_fails_over_then_parks_without_hanging() {
        let kv_backend = Arc::new(FakeKvStore::new());
        let a = node("node-a", 1, 1);
        let b = node("node-b", 2, 2);
        kv_backend.seed(&NodeConfig::kv_key(&a.id), &serde_json::to_string(&a).unwrap());
        kv_backend.seed(&NodeConfig::kv_key(&b.id), &serde_json::to_string(&b).unwrap());

        let kv: Arc<dyn shared_bus::KvStore> = kv_backend.clone();
        let cache = Arc::new(SelectorCache::new(kv.clone()));
        let bus = Arc::new(FakeBusClient::new());
        let publisher = Arc::new(EventPublisher::new(bus, PublishConfig::default()));
        let internal_bus = Arc::new(InMemoryEventBus::new());
        let cancel = CancellationToken::new();

        let supervisor = Supervisor::new(kv, cache, publisher, internal_bus, test_pipeline_config(), cancel.clone());

        let watcher = RegistryWatcher::new(kv_backend.clone());
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let watcher_task = tokio::spawn(async move { watcher.run(tx).await });
        let supervisor_task = tokio::spawn(supervisor.run(rx));

        // Give both nodes a chance to be tried and fail over; the group
        // should settle (both in cooldown) well inside this window.
        tokio::time::sleep(Duration::from_secs(2)).await;

        let a_status = serde_json::from_str::<NodeConfig>(&kv_backend.get(&NodeConfig::kv_key("node-a")).await.unwrap().unwrap())
            .unwrap()
            .status;
        let b_status = serde_json::from_str::<NodeConfig>(&kv_backend.get(&NodeConfig::kv_key("node-b")).await.unwrap().unwrap())
            .unwrap()
            .status;
        assert!(
            a_status != NodeStatus::Unknown || b_status != NodeStatus::Unknown,
            "at least one node should have been selected and statused"
        );

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(3), supervisor_task).await;
        assert!(result.is_ok(), "supervisor must honor the root cancellation within its drain window");
        watcher_task.abort();
    }
}

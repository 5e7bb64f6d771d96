use super::client::MockLedgerClient;
use super::*;
use crate::config::{ProviderSettings, SettingsUpdate};
use crate::error::{ProviderError, ProviderResult};
use crate::test_utils::{
    network, provider_config, receipt_json, scripted_provider, transaction_json, ScriptedLedger,
    CHAIN_ID, RECEIVER, SENDER,
};
use crate::tx::{FeeModel, Transaction, TransactionStatus};

use ethers::types::{Address, Filter, Signature, H256, U256};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn test_signature() -> Signature {
    Signature {
        r: U256::one(),
        s: U256::from(2),
        v: 1,
    }
}

fn dynamic_tx(required_confirmations: i64) -> Transaction {
    Transaction::builder()
        .chain_id(CHAIN_ID)
        .sender(SENDER)
        .receiver(RECEIVER)
        .nonce(0)
        .value(100u64)
        .gas_limit(21_000u64)
        .fee(FeeModel::eip1559(50u64, 2u64))
        .required_confirmations(required_confirmations)
        .signature(test_signature())
        .build()
        .unwrap()
}

fn recording_tracker() -> (ConfirmationTracker, Arc<Mutex<Vec<u64>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = seen.clone();
        move |current: u64, _required: u64| seen.lock().unwrap().push(current)
    };
    (ConfirmationTracker::default().with_sink(Arc::new(sink)), seen)
}

async fn connected(ledger: Arc<ScriptedLedger>, development: bool) -> Web3Provider {
    let mut provider = scripted_provider(ledger, development);
    provider.connect().await.unwrap();
    provider
}

#[tokio::test(start_paused = true)]
async fn test_dynamic_transaction_confirms_end_to_end() {
    let ledger = Arc::new(ScriptedLedger::new());
    let (tracker, progress) = recording_tracker();
    let provider = connected(ledger.clone(), false).await.with_tracker(tracker);

    let tx = dynamic_tx(3);
    assert_eq!(tx.total_transfer_value(), U256::from(150));

    let receipt = provider.send_transaction(&tx).await.unwrap();

    assert_eq!(ledger.nonce_polls(), 1);
    assert_eq!(ledger.block_polls(), 3);
    assert_eq!(*progress.lock().unwrap(), vec![1, 2, 3]);

    assert_eq!(receipt.status, TransactionStatus::NoError);
    assert_eq!(receipt.required_confirmations, 3);
    assert_eq!(receipt.provider, "scripted");
    assert_eq!(receipt.block_number, ledger.receipt_block());
    assert_eq!(receipt.sender, SENDER.parse::<Address>().unwrap());
    assert_eq!(receipt.tx_hash, tx.hash().unwrap());
    assert_eq!(ledger.sent.lock().unwrap().len(), 1);
    assert!(receipt.raise_for_status(&tx).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_zero_confirmations_skip_depth_polls() {
    let ledger = Arc::new(ScriptedLedger::new());
    let (tracker, progress) = recording_tracker();
    let provider = connected(ledger.clone(), false).await.with_tracker(tracker);

    let receipt = provider
        .get_transaction(H256::repeat_byte(0xaa), 0)
        .await
        .unwrap();

    assert_eq!(receipt.required_confirmations, 0);
    assert_eq!(ledger.nonce_polls(), 1);
    assert_eq!(ledger.block_polls(), 0);
    assert!(progress.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_negative_confirmations_rejected_without_client_calls() {
    let mut mock = MockLedgerClient::new();
    mock.expect_chain_id().times(1).returning(|| Ok(CHAIN_ID));
    let mock: Arc<dyn LedgerClient> = Arc::new(mock);

    let factory = move |_: &ProviderSettings| -> ProviderResult<Arc<dyn LedgerClient>> {
        Ok(mock.clone())
    };
    let mut provider = Web3Provider::new(provider_config(false), network(2), Arc::new(factory));
    provider.connect().await.unwrap();

    let err = provider
        .get_transaction(H256::repeat_byte(0xaa), -1)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_receipt_awaited_before_transaction_lookup() {
    let mined = Arc::new(AtomicBool::new(false));
    let mut mock = MockLedgerClient::new();
    mock.expect_chain_id().returning(|| Ok(CHAIN_ID));
    {
        let mined = mined.clone();
        mock.expect_wait_for_receipt().times(1).returning(move |hash| {
            mined.store(true, Ordering::SeqCst);
            Ok(receipt_json(hash, 1, 10, 0))
        });
    }
    {
        let mined = mined.clone();
        mock.expect_get_transaction().times(1).returning(move |hash| {
            // unknown to this node until the receipt shows up
            Ok(mined
                .load(Ordering::SeqCst)
                .then(|| transaction_json(hash, 0)))
        });
    }
    mock.expect_get_transaction_count().returning(|_| Ok(1));
    let mock: Arc<dyn LedgerClient> = Arc::new(mock);

    let factory = move |_: &ProviderSettings| -> ProviderResult<Arc<dyn LedgerClient>> {
        Ok(mock.clone())
    };
    let mut provider = Web3Provider::new(provider_config(false), network(2), Arc::new(factory));
    provider.connect().await.unwrap();

    let hash = H256::repeat_byte(0xab);
    let receipt = assert_ok!(provider.get_transaction(hash, 0).await);
    assert_eq!(receipt.tx_hash, hash);
    assert_eq!(receipt.block_number, 10);
    assert!(mined.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_nonce_settle_precedes_depth_confirm() {
    let ledger = Arc::new(ScriptedLedger::new().with_nonce_settling_after(3));
    let provider = connected(ledger.clone(), false).await;

    let started = tokio::time::Instant::now();
    let receipt = provider
        .get_transaction(H256::repeat_byte(0xaa), 1)
        .await
        .unwrap();

    assert_eq!(receipt.nonce, 0);
    assert_eq!(ledger.nonce_polls(), 3);
    assert_eq!(ledger.block_polls(), 1);
    // two nonce sleeps of one second each, no depth sleep
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_reorganisation_keeps_polling() {
    let ledger = Arc::new(ScriptedLedger::new().with_heads([11, 12, 11, 12, 13]));
    let (tracker, progress) = recording_tracker();
    let provider = connected(ledger.clone(), false).await.with_tracker(tracker);

    provider
        .get_transaction(H256::repeat_byte(0xaa), 3)
        .await
        .unwrap();

    assert_eq!(*progress.lock().unwrap(), vec![1, 2, 1, 2, 3]);
    assert_eq!(ledger.block_polls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_receipt_can_be_awaited_again() {
    let ledger = Arc::new(ScriptedLedger::new());
    let provider = connected(ledger.clone(), false).await;

    let receipt = provider
        .get_transaction(H256::repeat_byte(0xaa), 0)
        .await
        .unwrap();
    let receipt = receipt
        .bind(provider.name(), 2)
        .await_confirmations(&provider, provider.tracker())
        .await
        .unwrap();

    assert_eq!(receipt.required_confirmations, 2);
    assert_eq!(ledger.nonce_polls(), 2);
    assert_eq!(ledger.block_polls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout() {
    let ledger = Arc::new(ScriptedLedger::new().with_head_step(0));
    let provider = connected(ledger.clone(), false)
        .await
        .with_confirmation_timeout(Duration::from_secs(30));

    let err = provider
        .get_transaction(H256::repeat_byte(0xaa), 3)
        .await
        .unwrap_err();

    match err {
        ProviderError::ConfirmationTimeout {
            observed, required, ..
        } => {
            assert_eq!(observed, 0);
            assert_eq!(required, 3);
        }
        other => panic!("expected confirmation timeout, got {:?}", other),
    }
    assert_eq!(ledger.nonce_polls(), 1);
    assert!(ledger.block_polls() >= 6);
}

#[tokio::test(start_paused = true)]
async fn test_failing_receipt_diagnosis() {
    let ledger = Arc::new(ScriptedLedger::new().with_status(0));
    let provider = connected(ledger, false).await;

    let tx = dynamic_tx(0);
    let receipt = provider.send_transaction(&tx).await.unwrap();

    assert_eq!(receipt.status, TransactionStatus::Failing);
    assert!(receipt.ran_out_of_gas(U256::from(21_000)));
    assert!(matches!(
        receipt.raise_for_status(&tx),
        Err(ProviderError::OutOfGas { .. })
    ));
}

#[tokio::test]
async fn test_unsigned_transaction_not_sent() {
    let ledger = Arc::new(ScriptedLedger::new());
    let provider = connected(ledger.clone(), false).await;

    let tx = Transaction::builder()
        .chain_id(CHAIN_ID)
        .sender(SENDER)
        .receiver(RECEIVER)
        .gas_limit(21_000u64)
        .fee(FeeModel::legacy(50u64))
        .build()
        .unwrap();

    assert!(matches!(
        provider.send_transaction(&tx).await,
        Err(ProviderError::Validation(_))
    ));
    assert!(ledger.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_transaction() {
    let provider = connected(Arc::new(ScriptedLedger::new()), false).await;
    assert!(matches!(
        provider.get_transaction(H256::zero(), 1).await,
        Err(ProviderError::TransactionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_fee_accessors() {
    let provider = connected(Arc::new(ScriptedLedger::new()), false).await;
    assert_eq!(provider.gas_price().await.unwrap(), U256::from(50));
    assert_eq!(provider.priority_fee().await.unwrap(), U256::from(2));
    assert_eq!(provider.base_fee().await.unwrap(), U256::from(7));
}

#[tokio::test]
async fn test_missing_fee_data_is_unsupported() {
    let ledger = ScriptedLedger::new()
        .with_base_fee(None)
        .with_priority_fee(None);
    let provider = connected(Arc::new(ledger), false).await;

    let block = provider.get_block(BlockId::Latest).await.unwrap();
    assert_eq!(block.gas_data.base_fee, None);

    assert!(matches!(
        provider.base_fee().await,
        Err(ProviderError::Unsupported { .. })
    ));
    assert!(matches!(
        provider.priority_fee().await,
        Err(ProviderError::Unsupported { .. })
    ));
}

#[tokio::test]
async fn test_account_queries_and_calls() {
    let provider = connected(Arc::new(ScriptedLedger::new()), false).await;
    let sender: Address = SENDER.parse().unwrap();

    assert_eq!(provider.chain_id().await.unwrap(), CHAIN_ID);
    assert_eq!(provider.get_balance(sender).await.unwrap(), U256::exp10(18));
    assert!(provider.get_code(sender).await.unwrap().is_empty());
    assert_eq!(provider.get_nonce(sender).await.unwrap(), 1);

    let tx = dynamic_tx(0);
    assert_eq!(
        provider.estimate_gas_cost(&tx).await.unwrap(),
        U256::from(21_000)
    );
    assert_eq!(provider.send_call(&tx).await.unwrap().to_vec(), vec![0x2a]);
}

#[tokio::test]
async fn test_get_block_by_id() {
    let provider = connected(Arc::new(ScriptedLedger::new()), false).await;

    let block = provider.get_block(BlockId::Number(3)).await.unwrap();
    assert_eq!(block.number, 3);
    assert_eq!(provider.get_block(BlockId::Earliest).await.unwrap().number, 0);

    let by_str: BlockId = "0x4".parse().unwrap();
    assert_eq!(provider.get_block(by_str).await.unwrap().number, 4);

    assert!(matches!(
        provider.get_block(BlockId::Number(1_000)).await,
        Err(ProviderError::BlockNotFound { .. })
    ));
    assert!(provider.health_check().await);
}

#[tokio::test]
async fn test_requires_connection() {
    let provider = scripted_provider(Arc::new(ScriptedLedger::new()), false);
    assert!(!provider.is_connected());
    assert!(matches!(
        provider.gas_price().await,
        Err(ProviderError::NotConnected { .. })
    ));
    assert!(!provider.health_check().await);

    let events: Vec<_> = provider.get_events(Filter::new()).collect().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Err(ProviderError::NotConnected { .. })));
}

#[tokio::test]
async fn test_chain_id_mismatch_refuses_connection() {
    let mut provider = scripted_provider(Arc::new(ScriptedLedger::new().with_chain_id(1)), false);
    let err = assert_err!(provider.connect().await);
    assert!(matches!(err, ProviderError::Config(_)));
    assert!(!provider.is_connected());
}

#[tokio::test]
async fn test_update_settings_reconnects() {
    let ledger = Arc::new(ScriptedLedger::new());
    let mut provider = connected(ledger.clone(), false).await;

    provider
        .update_settings(SettingsUpdate {
            uri: Some("http://10.0.0.2:8545".to_string()),
            ..SettingsUpdate::default()
        })
        .await
        .unwrap();

    assert!(provider.is_connected());
    assert_eq!(
        *ledger.opened_with.lock().unwrap(),
        vec![
            Some("http://127.0.0.1:8545".to_string()),
            Some("http://10.0.0.2:8545".to_string()),
        ]
    );
    assert_eq!(
        provider.as_upstream().unwrap().connection_str(),
        "http://10.0.0.2:8545"
    );
    assert_eq!(provider.settings().poll_interval_ms, 1_000);

    assert_ok!(provider.disconnect().await);
    assert!(!provider.is_connected());
    // disconnecting twice is harmless
    assert_ok!(provider.disconnect().await);
}

#[tokio::test]
async fn test_events_stream_decoded_logs() {
    let ledger = Arc::new(ScriptedLedger::new());
    let provider = connected(ledger.clone(), false).await;

    let calls_before = ledger.calls();
    let stream = provider.get_events(Filter::new().address(RECEIVER.parse::<Address>().unwrap()));
    // nothing is fetched until the stream is polled
    assert_eq!(ledger.calls(), calls_before);

    let logs: Vec<_> = stream.collect().await;
    assert_eq!(logs.len(), 2);
    let first = logs[0].as_ref().unwrap();
    assert_eq!(first.log_index, Some(U256::zero()));
    assert_eq!(first.address, RECEIVER.parse::<Address>().unwrap());
    assert_eq!(ledger.calls(), calls_before + 1);
}

#[tokio::test]
async fn test_snapshot_and_revert() {
    let ledger = Arc::new(ScriptedLedger::new());
    let provider = connected(ledger.clone(), true).await;

    let test_provider = provider.as_test_provider().unwrap();
    let first = test_provider.snapshot().await.unwrap();
    let second = test_provider.snapshot().await.unwrap();
    assert_ne!(first, second);

    test_provider.revert(&first).await.unwrap();
    // reverting to the first snapshot discards the later one
    assert!(matches!(
        test_provider.revert(&second).await,
        Err(ProviderError::SnapshotNotFound { .. })
    ));
    assert!(matches!(
        test_provider.revert(&SnapshotId::new("0xdead")).await,
        Err(ProviderError::SnapshotNotFound { .. })
    ));
}

#[tokio::test]
async fn test_capabilities_follow_configuration() {
    let provider = connected(Arc::new(ScriptedLedger::new()), false).await;
    assert!(provider.as_test_provider().is_none());
    assert_eq!(
        provider.as_upstream().unwrap().connection_str(),
        "http://127.0.0.1:8545"
    );
    assert_eq!(provider.request_header(), Some("ledger-provider-tests"));
    assert_eq!(provider.network().required_confirmations, 2);
}

#[tokio::test]
async fn test_isolation_reverts_after_work() {
    let ledger = Arc::new(ScriptedLedger::new());
    let provider = connected(ledger.clone(), true).await;
    let isolation = Isolation::new();

    let sender: Address = SENDER.parse().unwrap();
    let balance = isolation
        .run(&provider, async { provider.get_balance(sender).await })
        .await
        .unwrap();
    assert_eq!(balance, U256::exp10(18));
    assert_eq!(*ledger.reverted.lock().unwrap(), vec!["0x1".to_string()]);

    let failed = isolation
        .run(&provider, async {
            Err::<(), _>(ProviderError::Internal("boom".to_string()))
        })
        .await;
    assert!(matches!(failed, Err(ProviderError::Internal(_))));
    assert_eq!(ledger.reverted.lock().unwrap().len(), 2);
    assert!(!isolation.has_warned());
}

#[tokio::test]
async fn test_isolation_without_snapshots_warns_and_runs() {
    let ledger = Arc::new(ScriptedLedger::new());
    let provider = connected(ledger.clone(), false).await;
    let isolation = Isolation::new();

    for _ in 0..2 {
        let value = isolation.run(&provider, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
    assert!(isolation.has_warned());
    assert!(ledger.reverted.lock().unwrap().is_empty());
}

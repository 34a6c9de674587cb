//! Engine, recorder and budget working together over the fake network.

use relay_budget::budget::{ExecutionMode, TierPolicy};
use relay_budget::execution::{
    CallContext, EthereumTransactionData, Query, QueryKind, QueryResponse, Transaction,
};
use relay_budget::{RelayError, RequestDetails};
use tokio_test::assert_ok;

use crate::support::{policy, Harness, QUERY_COST, TX_FEE};

fn ctx(address: &str) -> CallContext {
    CallContext::new("eth_sendRawTransaction", RequestDetails::new("req-1", "10.1.1.1")).with_caller_address(address)
}

fn ethereum(call_data: Vec<u8>) -> EthereumTransactionData {
    EthereumTransactionData {
        to: Some("0x00000000000000000000000000000000000004d2".into()),
        call_data,
        envelope: vec![0xf8, 0x6b],
    }
}

#[tokio::test]
async fn small_call_data_is_sent_inline_and_charged_to_caller() {
    let mut harness = Harness::new(policy());
    let submission = assert_ok!(
        harness
            .engine
            .submit_ethereum_transaction(ethereum(vec![1, 2, 3]), &ctx("0xaaaa"), Some(10), None)
            .await
    );
    assert!(submission.file_id.is_none());

    assert_eq!(harness.drain().await, 1);
    assert_eq!(harness.spent_by("0xaaaa").await, TX_FEE);
    assert_eq!(harness.history_of("0xaaaa").await, vec![TX_FEE]);
    assert_eq!(
        harness.budget.remaining_budget().await.unwrap(),
        10_000_000_000 - TX_FEE as i64
    );
    assert!(matches!(
        harness.network.submitted().as_slice(),
        [Transaction::Ethereum { call_data_file_id: None, max_transaction_fee: Some(150_000_000), .. }]
    ));
}

#[tokio::test]
async fn large_call_data_is_uploaded_and_every_step_charged() {
    let mut harness = Harness::new(policy());
    let call_data: Vec<u8> = (0u8..10).collect();
    let submission = assert_ok!(
        harness
            .engine
            .submit_ethereum_transaction(ethereum(call_data.clone()), &ctx("0xbbbb"), None, None)
            .await
    );

    let file_id = submission.file_id.expect("call data uploaded");
    assert_eq!(harness.network.file_contents(&file_id), Some(hex::encode(&call_data)));

    let kinds: Vec<&str> = harness.network.submitted().iter().map(|tx| tx.name()).collect();
    assert_eq!(
        kinds,
        vec![
            "FileCreateTransaction",
            "FileAppendTransaction",
            "FileAppendTransaction",
            "EthereumTransaction"
        ]
    );

    // four transactions plus the FileInfo check
    assert_eq!(harness.drain().await, 5);
    assert_eq!(harness.spent_by("0xbbbb").await, 4 * TX_FEE + QUERY_COST);

    harness.engine.delete_file(&file_id, &ctx("0xbbbb")).await;
    assert_eq!(harness.drain().await, 2);
    assert_eq!(harness.spent_by("0xbbbb").await, 5 * TX_FEE + 2 * QUERY_COST);
}

#[tokio::test]
async fn exhausted_plan_blocks_upload_before_any_submission() {
    let mut harness = Harness::new(TierPolicy::new(60_000, 2_000_000_000, 3_000_000_000, 10_000_000_000));
    let caller = ctx("0xcccc");

    assert_ok!(
        harness
            .engine
            .submit_ethereum_transaction(ethereum(vec![1]), &caller, None, None)
            .await
    );
    harness.drain().await;
    assert_eq!(harness.spent_by("0xcccc").await, TX_FEE);

    let result = harness
        .engine
        .submit_ethereum_transaction(ethereum(vec![7u8; 10]), &caller, None, None)
        .await;
    assert!(matches!(result, Err(RelayError::HbarRateLimitExceeded)));
    assert_eq!(harness.network.submitted().len(), 1);

    let other = harness
        .budget
        .should_limit(ExecutionMode::Transaction, "eth_sendRawTransaction", &ctx("0xdddd").identity, 0)
        .await
        .unwrap();
    assert!(!other);
}

#[tokio::test]
async fn paid_query_cost_is_recorded() {
    let mut harness = Harness::new(policy());
    let call = Query::paid(QueryKind::ContractCall {
        contract: "0.0.1234".into(),
        data: vec![0x70, 0xa0, 0x82, 0x31],
        gas: 100_000,
        sender: None,
    });
    let ctx = CallContext::new("eth_call", RequestDetails::new("req-2", "10.1.1.2")).with_caller_address("0xeeee");

    let response = assert_ok!(harness.engine.execute_query(&call, &ctx).await);
    assert!(matches!(response, QueryResponse::ContractCall(result) if result.bytes == vec![0x2a]));

    assert_eq!(harness.drain().await, 1);
    assert_eq!(harness.spent_by("0xeeee").await, QUERY_COST);
}

#[tokio::test]
async fn consensus_node_records_add_record_charge() {
    let mut harness = Harness::new(policy()).with_consensus_node_records();

    assert_ok!(
        harness
            .engine
            .submit_ethereum_transaction(ethereum(vec![9]), &ctx("0xffff"), None, None)
            .await
    );
    harness.drain().await;
    // 0.01 cents at 12 cents per hbar
    assert_eq!(harness.spent_by("0xffff").await, TX_FEE + 83_333);
}

#[tokio::test]
async fn spawned_recorder_settles_after_engine_is_dropped() {
    let Harness {
        network: _,
        budget,
        engine,
        recorder,
        events,
    } = Harness::new(policy());
    let handle = recorder.spawn(events);

    for address in ["0x0001", "0x0002", "0x0003"] {
        assert_ok!(
            engine
                .submit_ethereum_transaction(ethereum(vec![1]), &ctx(address), None, None)
                .await
        );
    }
    drop(engine);
    assert_ok!(handle.await);

    assert_eq!(
        budget.remaining_budget().await.unwrap(),
        10_000_000_000 - 3 * TX_FEE as i64
    );
}

//! End-to-end runs of the order-processing saga against the simulated replica set.

use std::sync::Arc;

use sagalab_core::{ReadConcern, StoreError, WriteConcern};
use sagalab_operations::OperationError;
use sagalab_operations::config::OrchestratorConfig;
use sagalab_operations::orchestrator::SagaOrchestrator;
use sagalab_operations::order_saga::{
    CREATE_ORDER, ORDER_SAGA_ID, OrderRequest, PROCESS_PAYMENT, RESERVE_INVENTORY,
    UPDATE_USER_BALANCE, order_processing_saga, seed_inventory, seed_user,
};
use sagalab_operations::providers::{FaultKind, FaultRule, InMemoryReplicaSet};
use sagalab_saga::SagaStatus;
use serde_json::{Value, json};

const STEPS: [&str; 4] = [
    RESERVE_INVENTORY,
    CREATE_ORDER,
    PROCESS_PAYMENT,
    UPDATE_USER_BALANCE,
];

fn setup(stock: u64, balance_cents: u64) -> (Arc<InMemoryReplicaSet>, SagaOrchestrator) {
    let store = Arc::new(InMemoryReplicaSet::default());
    seed_inventory(&store, "mango", stock);
    seed_user(&store, "USER456", balance_cents);

    let config = OrchestratorConfig::default()
        .with_consistency(WriteConcern::AckMajority, ReadConcern::Majority)
        .with_retry(3, std::time::Duration::from_millis(1));
    let orchestrator = SagaOrchestrator::new(store.clone(), config);
    orchestrator
        .register(order_processing_saga())
        .expect("order saga registers");
    (store, orchestrator)
}

fn order(quantity: u64, amount_cents: u64) -> Value {
    OrderRequest::new("ORD1", "USER456", "mango", quantity, amount_cents)
        .to_payload()
        .expect("request serializes")
}

fn document(store: &InMemoryReplicaSet, key: &str) -> Value {
    store
        .get(key)
        .map(|(value, _)| value)
        .unwrap_or(Value::Null)
}

#[test]
fn all_steps_succeed_with_majority_writes() -> anyhow::Result<()> {
    let (store, orchestrator) = setup(10, 100_000);

    let report = orchestrator.run(ORDER_SAGA_ID, order(1, 9_999))?;

    assert_eq!(report.status(), SagaStatus::Completed);
    assert_eq!(report.entries.len(), 4);
    assert!(report.entries.iter().all(|e| !e.compensated));
    assert_eq!(
        report
            .executed_steps()
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>(),
        STEPS
    );
    assert_eq!(
        report.summary(),
        "✓ reserve_inventory\n✓ create_order\n✓ process_payment\n✓ update_user_balance"
    );
    assert_eq!(document(&store, "users:USER456"), json!({"balance_cents": 90_001}));
    assert!(!report.has_violations());
    Ok(())
}

#[test]
fn payment_conflict_compensates_the_first_two_steps() -> anyhow::Result<()> {
    let (store, orchestrator) = setup(10, 1_000);

    let report = orchestrator.run(ORDER_SAGA_ID, order(1, 9_999))?;

    assert_eq!(report.status(), SagaStatus::Compensated);
    assert_eq!(report.entries.len(), 2);
    assert!(report.entries.iter().all(|e| e.compensated));
    assert_eq!(report.executed_steps().len(), 2);
    let failure = report.failure().expect("failure recorded");
    assert_eq!(failure.step_name, PROCESS_PAYMENT);
    assert!(failure.reason.contains("insufficient balance"));

    assert_eq!(document(&store, "inventory:mango"), json!({"stock": 10, "reserved": 0}));
    assert_eq!(document(&store, "orders:ORD1")["status"], "cancelled");
    assert_eq!(document(&store, "payments:ORD1"), Value::Null);
    assert_eq!(document(&store, "users:USER456"), json!({"balance_cents": 1_000}));
    assert!(report.uncompensated_steps().is_empty());
    Ok(())
}

#[test]
fn failed_compensation_leaves_the_saga_failed() {
    let (store, orchestrator) = setup(10, 1_000);
    store.inject_fault(
        FaultRule::new(FaultKind::Unavailable)
            .on_key_prefix("orders:")
            .on_writes()
            .skip(1),
    );

    let err = orchestrator
        .run(ORDER_SAGA_ID, order(1, 9_999))
        .expect_err("compensation failure surfaces");

    let OperationError::SagaCompensationFailed {
        saga_id,
        step,
        compensation_failures,
        ..
    } = err
    else {
        panic!("expected SagaCompensationFailed, got {err:?}");
    };
    assert_eq!(step, PROCESS_PAYMENT);
    assert_eq!(compensation_failures.len(), 1);
    assert_eq!(compensation_failures[0].step, CREATE_ORDER);
    assert!(matches!(
        compensation_failures[0].error.store_error(),
        Some(StoreError::Unavailable { .. })
    ));

    let report = orchestrator.query(&saga_id).expect("saga is known");
    assert_eq!(report.status(), SagaStatus::Failed);
    let reserve = &report.entries[0];
    let create = &report.entries[1];
    assert!(reserve.compensated);
    assert!(!create.compensated);
    assert!(create.last_error.is_some());
    let uncompensated: Vec<&str> = report
        .uncompensated_steps()
        .iter()
        .map(|e| e.step_name.as_str())
        .collect();
    assert_eq!(uncompensated, vec![CREATE_ORDER]);
    assert_eq!(
        report.summary(),
        "↩ reserve_inventory\n⚠ create_order\n✗ process_payment"
    );
    assert_eq!(document(&store, "orders:ORD1")["status"], "pending");
    assert_eq!(document(&store, "inventory:mango"), json!({"stock": 10, "reserved": 0}));
}

#[test]
fn failure_at_each_index_compensates_exactly_the_steps_before_it() -> anyhow::Result<()> {
    let prefixes = ["inventory:", "orders:", "payments:", "users:"];

    for (index, prefix) in prefixes.iter().enumerate() {
        let (store, orchestrator) = setup(10, 100_000);
        store.inject_fault(
            FaultRule::new(FaultKind::Conflict)
                .on_key_prefix(*prefix)
                .on_writes()
                .times(1),
        );

        let report = orchestrator.run(ORDER_SAGA_ID, order(1, 9_999))?;

        assert_eq!(report.status(), SagaStatus::Compensated, "failure at {index}");
        assert_eq!(report.executed_steps().len(), index, "failure at {index}");
        assert_eq!(report.entries.len(), index, "failure at {index}");
        assert!(report.entries.iter().all(|e| e.compensated), "failure at {index}");
        assert_eq!(
            report.failure().map(|f| f.step_name.as_str()),
            Some(STEPS[index])
        );
        assert_eq!(document(&store, "inventory:mango"), json!({"stock": 10, "reserved": 0}));
        assert_eq!(document(&store, "users:USER456"), json!({"balance_cents": 100_000}));
    }
    Ok(())
}

#[test]
fn ambiguous_timeout_on_idempotent_write_is_retried_once_applied() -> anyhow::Result<()> {
    let (store, orchestrator) = setup(10, 100_000);
    store.inject_fault(
        FaultRule::new(FaultKind::Timeout)
            .on_key_prefix("orders:")
            .on_writes()
            .after_apply()
            .times(1),
    );

    let report = orchestrator.run(ORDER_SAGA_ID, order(1, 9_999))?;

    assert_eq!(report.status(), SagaStatus::Completed);
    assert_eq!(document(&store, "orders:ORD1")["status"], "pending");
    assert_eq!(orchestrator.tracker().history("orders:ORD1").len(), 1);
    Ok(())
}

#[test]
fn lost_quorum_fails_the_first_write_and_nothing_is_applied() -> anyhow::Result<()> {
    let (store, orchestrator) = setup(10, 100_000);
    assert!(store.stop_member(1));
    assert!(store.stop_member(2));

    let report = orchestrator.run(ORDER_SAGA_ID, order(1, 9_999))?;

    assert_eq!(report.status(), SagaStatus::Compensated);
    assert!(report.entries.is_empty());
    assert!(
        report
            .failure()
            .is_some_and(|f| f.reason.contains("no quorum"))
    );
    assert_eq!(document(&store, "inventory:mango"), json!({"stock": 10, "reserved": 0}));
    Ok(())
}

#[test]
fn concurrent_orders_share_one_log_without_interfering() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryReplicaSet::default());
    for n in 0..4 {
        seed_inventory(&store, &format!("product-{n}"), 5);
        seed_user(&store, &format!("user-{n}"), 10_000);
    }
    let orchestrator = SagaOrchestrator::new(store.clone(), OrchestratorConfig::default());
    orchestrator.register(order_processing_saga())?;

    let ids = (0..4)
        .map(|n| {
            let request = OrderRequest::new(
                format!("ORD-{n}"),
                format!("user-{n}"),
                format!("product-{n}"),
                1,
                2_500,
            );
            orchestrator.start(ORDER_SAGA_ID, request.to_payload()?)
        })
        .collect::<Result<Vec<_>, _>>()?;

    for id in &ids {
        let report = orchestrator.wait(id)?;
        assert_eq!(report.status(), SagaStatus::Completed);
        assert_eq!(report.entries.len(), 4);
    }
    for n in 0..4 {
        assert_eq!(
            document(&store, &format!("users:user-{n}")),
            json!({"balance_cents": 7_500})
        );
    }
    assert_eq!(orchestrator.log().saga_ids().len(), 4);
    assert!(orchestrator.tracker().violations().is_empty());
    Ok(())
}

//! Runs against a real PostgreSQL when `DATABASE_URL` is set; otherwise each
//! test returns immediately.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use courier_dispatch::directory::CourierDirectory;
use courier_dispatch::engine::assignment::{AssignmentEngine, EventOutcome};
use courier_dispatch::error::AppError;
use courier_dispatch::ledger::DeliveryLedger;
use courier_dispatch::models::courier::{CourierInput, CourierStatus};
use courier_dispatch::models::delivery::NewDelivery;
use courier_dispatch::observability::metrics::Metrics;
use courier_dispatch::store::PgStore;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use uuid::Uuid;

struct Harness {
    directory: CourierDirectory,
    ledger: DeliveryLedger,
    engine: Arc<AssignmentEngine>,
}

async fn harness() -> Option<Harness> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .unwrap();
    Some(build(pool).await)
}

/// Harness over a fresh schema, for tests that reason about every courier
/// in the table.
async fn isolated_harness() -> Option<(Harness, PgPool, String)> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .unwrap();
    let schema = format!("dispatch_test_{}", Uuid::new_v4().simple());
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .unwrap();

    let options = url
        .parse::<PgConnectOptions>()
        .unwrap()
        .options([("search_path", schema.as_str())]);
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await
        .unwrap();
    Some((build(pool).await, admin, schema))
}

async fn build(pool: PgPool) -> Harness {
    let store = PgStore::new(pool);
    store.migrate().await.unwrap();

    let store = Arc::new(store);
    let directory = CourierDirectory::new(store.clone());
    let ledger = DeliveryLedger::new(store.clone());
    let engine = Arc::new(AssignmentEngine::new(
        store,
        directory.clone(),
        ledger.clone(),
        Metrics::new(),
    ));
    Harness {
        directory,
        ledger,
        engine,
    }
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

fn courier_input(mode: &str) -> CourierInput {
    CourierInput {
        name: "Pg Courier".to_string(),
        phone: unique("+7"),
        status: "available".to_string(),
        transport_mode: mode.to_string(),
    }
}

#[tokio::test]
async fn courier_crud_and_phone_conflict() {
    let Some(h) = harness().await else {
        return;
    };

    let created = h.directory.create(courier_input("car")).await.unwrap();
    assert_eq!(h.directory.get_by_id(created.id).await.unwrap(), created);

    let mut input = courier_input("scooter");
    input.phone = created.phone.clone();
    assert!(matches!(
        h.directory.create(input).await.unwrap_err(),
        AppError::Conflict(_)
    ));

    let updated = h
        .directory
        .update(
            created.id,
            CourierInput {
                status: "paused".to_string(),
                ..courier_input("on_foot")
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, CourierStatus::Paused);

    assert!(matches!(
        h.directory.get_by_id(Uuid::new_v4()).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn assign_and_unassign_round_trip() {
    let Some(h) = harness().await else {
        return;
    };
    h.directory.create(courier_input("car")).await.unwrap();
    let order_id = unique("order");

    let assignment = h.engine.assign(&order_id).await.unwrap();
    assert_eq!(assignment.courier.status, CourierStatus::Busy);
    assert!(matches!(
        h.engine.assign(&order_id).await.unwrap_err(),
        AppError::OrderAlreadyAssigned(_)
    ));

    let fetched = h.ledger.get_by_order_id(&order_id).await.unwrap();
    assert_eq!(fetched.courier_id, assignment.courier.id);

    let release = h.engine.unassign(&order_id).await.unwrap();
    assert_eq!(release.courier_id, assignment.courier.id);
    assert_eq!(
        h.directory
            .get_by_id(release.courier_id)
            .await
            .unwrap()
            .status,
        CourierStatus::Available
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assigns_claim_distinct_couriers() {
    let Some((h, admin, schema)) = isolated_harness().await else {
        return;
    };
    let mut created = HashSet::new();
    for _ in 0..4 {
        created.insert(h.directory.create(courier_input("car")).await.unwrap().id);
    }

    let mut handles = Vec::new();
    for i in 0..12 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.assign(&format!("order-{i}")).await
        }));
    }

    let mut claimed = HashSet::new();
    let mut no_courier = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(assignment) => assert!(claimed.insert(assignment.courier.id)),
            Err(AppError::NoAvailableCourier) => no_courier += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(claimed, created);
    assert_eq!(no_courier, 8);
    for id in &created {
        assert_eq!(
            h.directory.get_by_id(*id).await.unwrap().status,
            CourierStatus::Busy
        );
    }

    drop(h);
    sqlx::query(&format!("DROP SCHEMA {schema} CASCADE"))
        .execute(&admin)
        .await
        .unwrap();
}

#[tokio::test]
async fn courier_with_active_delivery_cannot_be_made_available() {
    let Some(h) = harness().await else {
        return;
    };
    let courier = h.directory.create(courier_input("car")).await.unwrap();
    let order_id = unique("order");
    h.ledger
        .create(NewDelivery {
            order_id: order_id.clone(),
            courier_id: courier.id,
            assigned_at: Utc::now(),
            deadline: Utc::now() + chrono::Duration::minutes(5),
        })
        .await
        .unwrap();

    let input = CourierInput {
        phone: courier.phone.clone(),
        ..courier_input("car")
    };
    assert!(matches!(
        h.directory.update(courier.id, input).await.unwrap_err(),
        AppError::Conflict(_)
    ));
    assert_eq!(
        h.directory.get_by_id(courier.id).await.unwrap().status,
        CourierStatus::Busy
    );

    h.ledger.delete_by_order_id(&order_id).await.unwrap();
}

#[tokio::test]
async fn concurrent_events_for_one_order_apply_once() {
    let Some(h) = harness().await else {
        return;
    };
    for _ in 0..3 {
        h.directory.create(courier_input("car")).await.unwrap();
    }
    let order_id = unique("order");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        let order_id = order_id.clone();
        handles.push(tokio::spawn(async move {
            engine.assign_for_event(&order_id).await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == EventOutcome::Applied {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);

    h.engine.complete(&order_id).await.unwrap();
}

#[tokio::test]
async fn overdue_delivery_is_expired_and_courier_freed() {
    let Some(h) = harness().await else {
        return;
    };
    let courier = h.directory.create(courier_input("car")).await.unwrap();
    let order_id = unique("order");
    let assigned_at = Utc::now() - chrono::Duration::hours(2);
    h.ledger
        .create(NewDelivery {
            order_id: order_id.clone(),
            courier_id: courier.id,
            assigned_at,
            deadline: assigned_at + chrono::Duration::minutes(5),
        })
        .await
        .unwrap();
    assert_eq!(
        h.directory.get_by_id(courier.id).await.unwrap().status,
        CourierStatus::Busy
    );

    // cutoff well in the past so concurrently running tests keep their rows
    let released = h
        .ledger
        .release_expired(Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert!(released.contains(&order_id));

    let row = h.ledger.get_by_order_id(&order_id).await.unwrap();
    assert!(!row.is_active());
    assert!(!h.ledger.check_exists(&order_id).await.unwrap());
    assert_eq!(
        h.directory.get_by_id(courier.id).await.unwrap().status,
        CourierStatus::Available
    );
}

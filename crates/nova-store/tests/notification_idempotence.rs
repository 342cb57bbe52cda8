//! P5 (idempotence) from spec.md §8.

mod common;

use common::test_store;
use nova_core::TenantScope;
use nova_store::NotificationStatusFilter;
use serde_json::json;

#[tokio::test]
async fn create_notification_twice_with_same_id_yields_one_row() {
    let (store, _container) = test_store().await;
    let scope = TenantScope::default_scope();

    let first = store
        .create_notification(&scope, "n1", "deploy", "info", "Deployed", "ok", &json!({}))
        .await
        .unwrap();
    let second = store
        .create_notification(&scope, "n1", "deploy", "info", "Deployed again", "still ok", &json!({}))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);

    let all = store
        .list_notifications(&scope, NotificationStatusFilter::All, 100, 0)
        .await
        .unwrap();
    assert_eq!(all.iter().filter(|n| n.id == "n1").count(), 1);
}

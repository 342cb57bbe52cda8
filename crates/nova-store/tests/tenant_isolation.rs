//! P6 (tenant isolation) and scenario 3 from spec.md §8.

mod common;

use common::test_store;
use nova_core::TenantScope;
use nova_store::Function;
use serde_json::json;

fn function(id: &str, name: &str) -> Function {
    Function {
        id: id.to_string(),
        tenant_id: String::new(),
        namespace: String::new(),
        name: name.to_string(),
        handler: "index.handler".to_string(),
        runtime: "nodejs20".to_string(),
        memory_mb: 128,
        timeout_s: 30,
        min_replicas: 0,
        max_replicas: 1,
        mode: "on-demand".to_string(),
        limits: json!({}),
        env_vars: json!({}),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn get_function_by_name_never_crosses_tenants() {
    let (store, _container) = test_store().await;

    let t1 = TenantScope::new("t1", "ns1");
    let t2 = TenantScope::new("t2", "ns1");

    store.create_tenant("t1", "Tenant One", "free").await.unwrap();
    store.create_tenant("t2", "Tenant Two", "free").await.unwrap();
    store.create_namespace("t1", "ns1").await.unwrap();
    store.create_namespace("t2", "ns1").await.unwrap();

    store.save_function(&t1, &function("f1", "hello")).await.unwrap();
    store.save_function(&t2, &function("f2", "hello")).await.unwrap();

    let from_t1 = store.get_function_by_name(&t1, "hello").await.unwrap();
    let from_t2 = store.get_function_by_name(&t2, "hello").await.unwrap();

    assert_eq!(from_t1.id, "f1");
    assert_eq!(from_t2.id, "f2");
}

#[tokio::test]
async fn get_function_by_name_fails_not_found_for_wrong_scope() {
    let (store, _container) = test_store().await;
    let t1 = TenantScope::new("t1", "ns1");

    store.create_tenant("t1", "Tenant One", "free").await.unwrap();
    store.create_namespace("t1", "ns1").await.unwrap();
    store.save_function(&t1, &function("f1", "hello")).await.unwrap();

    let other = TenantScope::new("t1", "ns2");
    let result = store.get_function_by_name(&other, "hello").await;
    assert!(matches!(result, Err(nova_core::NovaError::NotFound { .. })));
}

//! P7 (cascade) and P4 (fileset round-trip, including empty) from spec.md §8.

mod common;

use std::collections::HashMap;

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
        runtime: "python3.12".to_string(),
        memory_mb: 256,
        timeout_s: 15,
        min_replicas: 0,
        max_replicas: 2,
        mode: "on-demand".to_string(),
        limits: json!({}),
        env_vars: json!({"FOO": "bar"}),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn delete_function_cascades_every_child_table() {
    let (store, _container) = test_store().await;
    let scope = TenantScope::default_scope();

    store.save_function(&scope, &function("f1", "hello")).await.unwrap();
    store.publish_version("f1", 1, &json!({"handler": "index.handler"})).await.unwrap();
    store.save_alias("f1", "live", &json!({"version": 1})).await.unwrap();
    store.save_function_code("f1", b"print('hi')", "deadbeef").await.unwrap();

    let mut files = HashMap::new();
    files.insert("main.py".to_string(), b"print('hi')".to_vec());
    store.save_function_files("f1", &files).await.unwrap();
    store.set_function_layers("f1", &["layer-a".to_string()]).await.unwrap();

    store.delete_function(&scope, "f1").await.unwrap();

    assert!(store.list_versions("f1").await.unwrap().is_empty());
    assert!(store.list_aliases("f1").await.unwrap().is_empty());
    assert!(store.get_function_code("f1").await.unwrap().is_none());
    assert!(store.get_function_files("f1").await.unwrap().is_empty());
    assert!(store.get_function_layers("f1").await.unwrap().is_empty());
}

#[tokio::test]
async fn save_function_files_round_trips_arbitrary_filesets() {
    let (store, _container) = test_store().await;
    let scope = TenantScope::default_scope();
    store.save_function(&scope, &function("f1", "hello")).await.unwrap();

    let mut files = HashMap::new();
    files.insert("a.txt".to_string(), b"alpha".to_vec());
    files.insert("b.bin".to_string(), vec![0u8, 1, 2, 3]);
    store.save_function_files("f1", &files).await.unwrap();

    let round_tripped = store.get_function_files("f1").await.unwrap();
    assert_eq!(round_tripped.len(), 2);
    let a = round_tripped.iter().find(|f| f.path == "a.txt").unwrap();
    assert_eq!(a.content, b"alpha");
    assert!(!a.is_binary);
    let b = round_tripped.iter().find(|f| f.path == "b.bin").unwrap();
    assert!(b.is_binary);
}

#[tokio::test]
async fn save_function_files_round_trips_the_empty_set() {
    let (store, _container) = test_store().await;
    let scope = TenantScope::default_scope();
    store.save_function(&scope, &function("f1", "hello")).await.unwrap();

    store.save_function_files("f1", &HashMap::new()).await.unwrap();
    assert!(store.get_function_files("f1").await.unwrap().is_empty());
    assert!(!store.has_function_files("f1").await.unwrap());
}

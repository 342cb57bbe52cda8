//! P3 (token-bucket closed form) and scenario 5 from spec.md §8.

mod common;

use std::time::Duration;

use common::{test_store, FakeClock};
use nova_store::Store;

#[tokio::test]
async fn five_allowed_then_denied_then_refilled_after_two_seconds() {
    let (store, _container) = test_store().await;
    let clock = FakeClock::new();
    let store = Store::with_clock(store.pool().clone(), clock.clone());

    let mut allowed_count = 0;
    for _ in 0..5 {
        let (allowed, _) = store.check_rate_limit("bucket-1", 5.0, 1.0, 1.0).await.unwrap();
        if allowed {
            allowed_count += 1;
        }
    }
    assert_eq!(allowed_count, 5);

    let (sixth_allowed, _) = store.check_rate_limit("bucket-1", 5.0, 1.0, 1.0).await.unwrap();
    assert!(!sixth_allowed);

    clock.advance(Duration::from_secs(2));

    let (seventh_allowed, _) = store.check_rate_limit("bucket-1", 5.0, 1.0, 1.0).await.unwrap();
    let (eighth_allowed, _) = store.check_rate_limit("bucket-1", 5.0, 1.0, 1.0).await.unwrap();
    let (ninth_allowed, _) = store.check_rate_limit("bucket-1", 5.0, 1.0, 1.0).await.unwrap();

    assert!(seventh_allowed);
    assert!(eighth_allowed);
    assert!(!ninth_allowed);
}

#[tokio::test]
async fn distinct_keys_never_interfere() {
    let (store, _container) = test_store().await;

    let (a_allowed, _) = store.check_rate_limit("key-a", 1.0, 0.0, 1.0).await.unwrap();
    let (b_allowed, _) = store.check_rate_limit("key-b", 1.0, 0.0, 1.0).await.unwrap();

    assert!(a_allowed);
    assert!(b_allowed);
}

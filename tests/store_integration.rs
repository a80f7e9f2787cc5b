use cbstore::core::invoke::continuation;
use cbstore::providers::MemoryConnector;
use cbstore::{ClientError, CouchbaseStore, SetOptions, StoreConfig, StoreError, Ttl};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;

mod test_utils {
    use super::*;

    pub fn test_config() -> StoreConfig {
        StoreConfig::new("couchbase://127.0.0.1:8091", "test-bucket")
            .with_credentials("Administrator", "couchbase")
            .with_collection("_default", "_default")
            .with_ttl(2)
    }

    pub fn create_store() -> (CouchbaseStore, Arc<MemoryConnector>) {
        let connector =
            Arc::new(MemoryConnector::new().with_credentials("Administrator", "couchbase"));
        let store = CouchbaseStore::new(test_config(), connector.clone()).unwrap();
        (store, connector)
    }

    /// Runs a continuation-style call and waits for its single delivery.
    pub async fn collect<T, F>(call: F) -> cbstore::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(cbstore::core::Continuation<T>) -> cbstore::core::Dispatch<T>,
    {
        let (tx, rx) = oneshot::channel();
        let dispatched = call(continuation(move |outcome: cbstore::Result<T>| {
            let _ = tx.send(outcome);
        }));
        assert!(dispatched.await.is_none());
        rx.await.expect("continuation was not invoked")
    }
}

use test_utils::{collect, create_store, test_config};

#[test_log::test(tokio::test)]
async fn test_concrete_scenario() {
    let (store, _) = create_store();

    let result = store.set("foo", json!("bar"), None).await.unwrap();
    info!(?result, "Stored foo");
    assert!(result.cas > 0);

    assert_eq!(store.get("foo").await.unwrap(), Some(json!("bar")));

    match store.ttl("foo").await.unwrap() {
        Some(Ttl::Remaining(seconds)) => assert!(seconds > 0 && seconds <= 120),
        other => panic!("Expected a finite ttl, got {other:?}"),
    }

    store.reset().await.unwrap();
    assert_eq!(store.get("foo").await.unwrap(), None);
}

#[test_log::test(tokio::test)]
async fn test_round_trip_for_cacheable_values() {
    let (store, _) = create_store();
    let values = [
        json!(0),
        json!(100),
        json!(""),
        json!("test"),
        json!(false),
        json!([1, 2, 3]),
        json!({"id": 123, "tags": ["a"]}),
    ];

    for (i, value) in values.into_iter().enumerate() {
        let key = format!("key:{i}");
        assert!(store.is_cacheable_value(Some(&value)));
        store.set(&key, value.clone(), None).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(value));
    }
}

#[test_log::test(tokio::test)]
async fn test_sentinels_are_not_cacheable() {
    let (store, _) = create_store();
    assert!(!store.is_cacheable_value(None));
    assert!(!store.is_cacheable_value(Some(&Value::Null)));

    let err = store.set("foo1", None::<Value>, None).await.unwrap_err();
    assert_eq!(err.to_string(), "\"undefined\" is not a cacheable value");

    // Future form rejects as well
    let outcome = store.set_with("foo", Value::Null, None, None).await.unwrap();
    assert!(matches!(outcome, Err(StoreError::NotCacheable(_))));
}

#[test_log::test(tokio::test)]
async fn test_zero_ttl_means_no_expiry() {
    let (store, _) = create_store();
    store
        .set("foo", json!("bar"), Some(SetOptions::ttl(0)))
        .await
        .unwrap();
    assert_eq!(store.ttl("foo").await.unwrap(), Some(Ttl::NoExpiry));
}

#[test_log::test(tokio::test)]
async fn test_missing_key_sentinels() {
    let (store, _) = create_store();
    assert_eq!(store.get("invalidKey").await.unwrap(), None);
    assert_eq!(store.ttl("invalidKey").await.unwrap(), None);

    let value = collect(|done| store.get_with("invalidKey", Some(done)))
        .await
        .unwrap();
    assert_eq!(value, None);
}

#[test_log::test(tokio::test)]
async fn test_delete_then_get() {
    let (store, _) = create_store();
    store.set("foo", json!("bar"), None).await.unwrap();
    store.del("foo").await.unwrap();
    assert_eq!(store.get("foo").await.unwrap(), None);

    // The store reports deleting an absent key as not found
    assert!(matches!(
        store.del("foo").await,
        Err(StoreError::Operation(ClientError::DocumentNotFound(_)))
    ));
}

#[test_log::test(tokio::test)]
async fn test_keys_with_and_without_pattern() {
    let (store, _) = create_store();
    store.set("foo", json!("bar"), None).await.unwrap();
    store.set("other", json!("baz"), None).await.unwrap();

    let keys = store.keys(Some("f*")).await.unwrap();
    assert!(keys.contains(&"foo".to_string()));
    assert!(!keys.contains(&"other".to_string()));

    let keys = store.keys(None).await.unwrap();
    assert!(keys.contains(&"foo".to_string()));
    assert!(keys.contains(&"other".to_string()));

    let keys = collect(|done| store.keys_with(Some("f*"), Some(done)))
        .await
        .unwrap();
    assert_eq!(keys, vec!["foo".to_string()]);
}

#[test_log::test(tokio::test)]
async fn test_named_collection_is_used_for_keys() {
    let connector = Arc::new(MemoryConnector::new());
    let sessions = CouchbaseStore::new(
        StoreConfig::new("memory://local", "cache").with_collection("app", "sessions"),
        connector.clone(),
    )
    .unwrap();
    let default = CouchbaseStore::new(StoreConfig::new("memory://local", "cache"), connector).unwrap();

    sessions.set("s1", json!(1), None).await.unwrap();
    default.set("d1", json!(2), None).await.unwrap();

    assert_eq!(sessions.keys(None).await.unwrap(), vec!["s1".to_string()]);
    assert_eq!(default.keys(None).await.unwrap(), vec!["d1".to_string()]);
    assert_eq!(default.get("s1").await.unwrap(), None);
}

#[test_log::test(tokio::test)]
async fn test_calling_conventions_are_equivalent() {
    let (store, _) = create_store();

    let via_future = store
        .set_with("foo", json!("bar"), None, None)
        .await
        .unwrap()
        .unwrap();
    let via_continuation = collect(|done| store.set_with("foo", json!("bar"), None, Some(done)))
        .await
        .unwrap();
    assert!(via_continuation.cas > via_future.cas);

    let from_future = store.get_with("foo", None).await.unwrap().unwrap();
    let from_continuation = collect(|done| store.get_with("foo", Some(done))).await.unwrap();
    assert_eq!(from_future, from_continuation);

    let ttl_future = store.ttl_with("foo", None).await.unwrap().unwrap();
    let ttl_continuation = collect(|done| store.ttl_with("foo", Some(done))).await.unwrap();
    assert!(matches!(ttl_future, Some(Ttl::Remaining(_))));
    assert!(matches!(ttl_continuation, Some(Ttl::Remaining(_))));

    // Errors travel the same way
    let err_future = store
        .set_with("foo", None::<Value>, None, None)
        .await
        .unwrap()
        .unwrap_err();
    let err_continuation = collect(|done| store.set_with("foo", None::<Value>, None, Some(done)))
        .await
        .unwrap_err();
    assert_eq!(err_future.to_string(), err_continuation.to_string());

    collect(|done| store.del_with("foo", Some(done))).await.unwrap();
    collect(|done| store.reset_with(Some(done))).await.unwrap();
    assert_eq!(store.get("foo").await.unwrap(), None);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_first_calls_connect_once() {
    let connector = Arc::new(
        MemoryConnector::new()
            .with_credentials("Administrator", "couchbase")
            .with_connect_delay(Duration::from_millis(20)),
    );
    let store = CouchbaseStore::new(test_config(), connector.clone()).unwrap();

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.set(&format!("key:{i}"), json!(i), None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(connector.connect_count(), 1);
    assert_eq!(store.keys(Some("key:*")).await.unwrap().len(), 10);
}

#[test_log::test(tokio::test)]
async fn test_operation_errors_keep_their_message() {
    let (store, connector) = create_store();
    store.set("foo", json!("bar"), None).await.unwrap();

    connector.fail_next_operation(ClientError::Transport("Something went wrong".into()));
    let err = store.get("foo").await.unwrap_err();
    assert_eq!(err.to_string(), "transport error: Something went wrong");

    connector.fail_next_operation(ClientError::Transport("Something went wrong".into()));
    let err = collect(|done| store.get_with("foo", Some(done)))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Operation(_)));

    // No retries and no poisoned state: the next call succeeds
    assert_eq!(store.get("foo").await.unwrap(), Some(json!("bar")));
}

#[test_log::test(tokio::test)]
async fn test_rejected_credentials_surface_as_connection_error() {
    let connector = Arc::new(MemoryConnector::new().with_credentials("Administrator", "couchbase"));
    let config = test_config().with_credentials("Administrator", "wrong");
    let store = CouchbaseStore::new(config, connector.clone()).unwrap();

    let err = store.get("foo").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Connection(ClientError::Authentication(_))
    ));

    // A later call attempts construction again
    let _ = store.get("foo").await;
    assert_eq!(connector.connect_count(), 2);
}

#[test_log::test(tokio::test)]
async fn test_close_and_reconnect() {
    let (store, connector) = create_store();
    store.set("foo", json!("bar"), None).await.unwrap();
    let bucket = store.connection().await.unwrap().bucket.name().to_string();
    assert_eq!(bucket, "test-bucket");

    store.close().await.unwrap();
    assert_eq!(store.get("foo").await.unwrap(), Some(json!("bar")));
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(store.name(), "couchbase");
}

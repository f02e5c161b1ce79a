//! Key Lifecycle Integration Tests

use chrono::{DateTime, Duration, Utc};
use keyledger_keys::{
    DocumentStore, KeyError, KeyStatus, KeyStore, ManualClock, MemoryDocumentStore, Ttl,
    VersionToken,
};
use std::collections::BTreeSet;
use std::sync::Arc;

const PATH: &str = "keys";

fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-10-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn setup() -> (KeyStore, Arc<MemoryDocumentStore>, Arc<ManualClock>) {
    let backend = Arc::new(MemoryDocumentStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let store = KeyStore::new(backend.clone(), PATH).with_clock(clock.clone());
    (store, backend, clock)
}

async fn ids(store: &KeyStore) -> BTreeSet<String> {
    store
        .list_keys()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect()
}

#[tokio::test]
async fn test_id_set_tracks_adds_minus_removes() {
    let (store, _, _) = setup();
    let mut expected = BTreeSet::new();

    // A fixed interleaving of adds, removes and repeated removes
    let ops: &[(&str, &str)] = &[
        ("add", "a"),
        ("add", "b"),
        ("remove", "a"),
        ("remove", "a"),
        ("add", "c"),
        ("add", "a"),
        ("remove", "zzz"),
        ("add", "b"),
        ("remove", "c"),
    ];

    for (op, id) in ops {
        match *op {
            "add" => {
                store.add_key(id, "v", Ttl::Lifetime, "test").await.unwrap();
                expected.insert(id.to_string());
            }
            _ => match store.remove_key(id, "manual").await {
                Ok(true) => {
                    expected.remove(*id);
                }
                Err(KeyError::NotFound { available, .. }) => {
                    assert!(!expected.contains(*id));
                    assert_eq!(available.into_iter().collect::<BTreeSet<_>>(), expected);
                }
                other => panic!("unexpected remove result {:?}", other),
            },
        }
        assert_eq!(ids(&store).await, expected);
    }
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let (store, backend, clock) = setup();
    store.add_key("a", "v", Ttl::Seconds(10), "x").await.unwrap();
    store.add_key("b", "v", Ttl::Seconds(20), "x").await.unwrap();
    store.add_key("c", "v", Ttl::Lifetime, "x").await.unwrap();

    clock.advance(Duration::seconds(25));
    let now = store.now();
    let first = store.cleanup_expired(now).await.unwrap();
    assert_eq!(first, BTreeSet::from(["a".to_string(), "b".to_string()]));

    let writes = backend.write_count();
    let second = store.cleanup_expired(now).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(backend.write_count(), writes);
}

#[tokio::test]
async fn test_lifetime_round_trip() {
    let (store, _, clock) = setup();
    store.add_key("bob", "v", Ttl::Lifetime, "x").await.unwrap();

    let (doc, _) = store.fetch().await.unwrap();
    let entry = doc.get("bob").unwrap();
    assert_eq!(entry.expires_at, None);

    let listed = store.list_keys().await.unwrap();
    assert_eq!(listed[0].status(store.now()), KeyStatus::Lifetime);

    // A lifetime key survives any future sweep
    clock.advance(Duration::days(365 * 100));
    assert!(store.cleanup().await.unwrap().is_empty());
    assert_eq!(ids(&store).await, BTreeSet::from(["bob".to_string()]));
}

#[tokio::test]
async fn test_ttl_expiry_window() {
    let (store, _, _) = setup();
    store.add_key("a", "v1", Ttl::Seconds(60), "x").await.unwrap();

    assert!(store
        .cleanup_expired(start() + Duration::seconds(30))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store
            .cleanup_expired(start() + Duration::seconds(61))
            .await
            .unwrap(),
        BTreeSet::from(["a".to_string()])
    );
}

#[tokio::test]
async fn test_stale_version_token_conflicts() {
    let (store, backend, _) = setup();
    store.add_key("a", "v", Ttl::Lifetime, "x").await.unwrap();

    let (_, stale) = store.fetch().await.unwrap();
    store.add_key("b", "v", Ttl::Lifetime, "x").await.unwrap();

    let err = backend
        .conditional_write(PATH, "{}", &stale, "stale overwrite")
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(
        ids(&store).await,
        BTreeSet::from(["a".to_string(), "b".to_string()])
    );
}

#[tokio::test]
async fn test_two_stores_racing_one_loses() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let first = KeyStore::new(backend.clone(), PATH);
    let second = KeyStore::new(backend.clone(), PATH);

    first.add_key("seed", "v", Ttl::Lifetime, "x").await.unwrap();

    // Both read the same version; only the first write can land
    let (mut doc_a, version_a) = first.fetch().await.unwrap();
    let (_, version_b) = second.fetch().await.unwrap();
    assert_eq!(version_a, version_b);

    doc_a.remove("seed");
    backend
        .conditional_write(PATH, &doc_a.encode().unwrap(), &version_a, "a")
        .await
        .unwrap();
    let err = backend
        .conditional_write(PATH, "{}", &version_b, "b")
        .await
        .unwrap_err();
    assert!(matches!(err, KeyError::Conflict { expected, .. } if expected == version_b));
}

#[tokio::test]
async fn test_alice_scenario() {
    let (store, _, _) = setup();
    store
        .add_key("alice", "tok123", Ttl::Seconds(3600), "script")
        .await
        .unwrap();

    let listed = store.list_keys().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed[0].status(store.now()),
        KeyStatus::Expires(start() + Duration::seconds(3600))
    );
    assert_eq!(listed[0].status(store.now()).label(), "expires");

    assert!(store.remove_key("alice", "manual").await.unwrap());
    assert!(store.list_keys().await.unwrap().is_empty());

    let err = store.remove_key("alice", "manual").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("no keys present"));
}

#[tokio::test]
async fn test_malformed_document_then_add() {
    let (store, backend, _) = setup();
    backend.put_raw(PATH, "<<<definitely not json>>>").await;

    assert!(store.list_keys().await.unwrap().is_empty());
    store.add_key("fresh", "v", Ttl::Lifetime, "x").await.unwrap();

    assert_eq!(ids(&store).await, BTreeSet::from(["fresh".to_string()]));
    let (_, version) = store.fetch().await.unwrap();
    assert_ne!(version, VersionToken::Missing);
}

#[tokio::test]
async fn test_numeric_looking_ids_stay_strings() {
    let (store, _, _) = setup();
    store.add_key("42", "v", Ttl::Lifetime, "x").await.unwrap();
    store.add_key("042", "w", Ttl::Lifetime, "x").await.unwrap();

    assert_eq!(
        ids(&store).await,
        BTreeSet::from(["042".to_string(), "42".to_string()])
    );
    assert!(store.remove_key("42", "manual").await.unwrap());
    assert_eq!(ids(&store).await, BTreeSet::from(["042".to_string()]));
}

#[tokio::test]
async fn test_off_schema_entry_does_not_wipe_valid_keys() {
    let (store, backend, _) = setup();
    backend
        .put_raw(
            PATH,
            r#"{
  "good": {"value": "tok", "expires_at": null, "added_by": "script", "added_at": "2026-10-01T00:00:00+00:00"},
  "legacy": 1760529600.0,
  "broken": {"expires_at": null}
}"#,
        )
        .await;

    assert_eq!(
        ids(&store).await,
        BTreeSet::from(["broken".to_string(), "good".to_string(), "legacy".to_string()])
    );

    store.add_key("new", "v", Ttl::Lifetime, "x").await.unwrap();
    let (doc, _) = store.fetch().await.unwrap();
    assert_eq!(doc.get("good").unwrap().value, "tok");
    assert!(doc.get("good").unwrap().is_lifetime());
    assert!(doc.contains("new"));

    // The legacy entry expired in 2025 and the broken one counts as expired
    assert_eq!(
        store.cleanup().await.unwrap(),
        BTreeSet::from(["broken".to_string(), "legacy".to_string()])
    );
    assert_eq!(
        ids(&store).await,
        BTreeSet::from(["good".to_string(), "new".to_string()])
    );
}

use std::sync::Arc;
use std::time::Duration;

use crawler_core::TtlLruCache;

const TTL: Duration = Duration::from_secs(300);

#[tokio::test(start_paused = true)]
async fn value_is_returned_before_ttl_and_dropped_after() {
    let cache = TtlLruCache::new(10, TTL);
    cache.set("https://a.example".to_string(), "A".to_string());

    assert_eq!(cache.get("https://a.example").as_deref(), Some("A"));

    tokio::time::advance(TTL - Duration::from_millis(1)).await;
    assert_eq!(cache.get("https://a.example").as_deref(), Some("A"));

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(cache.get("https://a.example"), None);
    assert_eq!(cache.len(), 0, "expired entry is evicted by the read");
}

#[tokio::test(start_paused = true)]
async fn reads_do_not_extend_expiry() {
    let cache = TtlLruCache::new(10, TTL);
    cache.set("k".to_string(), 1);

    tokio::time::advance(TTL / 2).await;
    assert_eq!(cache.get("k"), Some(1));

    tokio::time::advance(TTL / 2).await;
    assert_eq!(cache.get("k"), None);
}

#[tokio::test(start_paused = true)]
async fn set_on_existing_key_extends_expiry_and_replaces_value() {
    let cache = TtlLruCache::new(10, TTL);
    cache.set("k".to_string(), 1);

    tokio::time::advance(TTL / 2).await;
    cache.set("k".to_string(), 2);

    tokio::time::advance(TTL / 2).await;
    assert_eq!(cache.get("k"), Some(2));
    assert_eq!(cache.len(), 1);
}

#[test]
fn inserting_past_capacity_evicts_least_recently_used() {
    let cache = TtlLruCache::new(3, TTL);
    for key in ["a", "b", "c"] {
        cache.set(key.to_string(), key.to_uppercase());
    }
    // Touch "a" so "b" becomes the least recently used.
    assert_eq!(cache.get("a").as_deref(), Some("A"));

    cache.set("d".to_string(), "D".to_string());

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get("b"), None);
    assert_eq!(cache.get("a").as_deref(), Some("A"));
    assert_eq!(cache.get("c").as_deref(), Some("C"));
    assert_eq!(cache.get("d").as_deref(), Some("D"));
}

#[test]
fn insertion_order_decides_eviction_without_reads() {
    let cache = TtlLruCache::new(2, TTL);
    cache.set("first".to_string(), 1);
    cache.set("second".to_string(), 2);
    cache.set("third".to_string(), 3);

    assert_eq!(cache.get("first"), None);
    assert_eq!(cache.get("second"), Some(2));
    assert_eq!(cache.get("third"), Some(3));
}

#[test]
fn refreshing_an_existing_key_at_capacity_evicts_nothing() {
    let cache = TtlLruCache::new(2, TTL);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);
    cache.set("a".to_string(), 10);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("a"), Some(10));
    assert_eq!(cache.get("b"), Some(2));
}

#[test]
fn delete_reports_whether_anything_was_removed() {
    let cache = TtlLruCache::new(2, TTL);
    cache.set("a".to_string(), 1);

    assert!(cache.delete("a"));
    assert!(!cache.delete("a"));
    assert!(cache.is_empty());
}

#[test]
fn clear_empties_the_cache() {
    let cache = TtlLruCache::new(4, TTL);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);

    cache.clear();

    assert!(cache.is_empty());
    assert_eq!(cache.capacity(), 4);
    assert_eq!(cache.ttl(), TTL);
}

#[test]
fn capacity_holds_under_concurrent_writers() {
    let cache = Arc::new(TtlLruCache::new(16, TTL));
    let handles = (0..8)
        .map(|worker| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("w{worker}-{i}");
                    cache.set(key.clone(), i);
                    let _ = cache.get(&key);
                    assert!(cache.len() <= 16);
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(cache.len(), 16);
}

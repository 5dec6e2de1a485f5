use sample_cache_core::lock::{marker_path, LockOptions, StoreLock};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn make_test_options(max_age: Duration) -> LockOptions {
    LockOptions {
        enabled: true,
        max_count: 3,
        max_age,
        backoff_unit: Duration::from_millis(1),
    }
}

#[test]
fn test_concurrent_holders_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("sample.db");
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock = StoreLock::for_store(&store, make_test_options(Duration::from_secs(3600)));
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                for _ in 0..5 {
                    let _guard = lock.acquire().unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    entered.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(entered.load(Ordering::SeqCst), 20);
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert!(fs::symlink_metadata(marker_path(&store)).is_err());
}

#[test]
fn test_stale_marker_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("sample.db");
    let options = make_test_options(Duration::from_millis(50));
    let lock = StoreLock::for_store(&store, options.clone());

    // a holder that crashed without releasing
    let abandoned = lock.try_acquire().unwrap().unwrap();
    std::mem::forget(abandoned);
    assert!(fs::symlink_metadata(lock.marker()).is_ok());

    let start = Instant::now();
    let second = StoreLock::for_store(&store, options);
    let guard = second.acquire().unwrap();
    assert!(start.elapsed() < Duration::from_secs(30));
    assert!(fs::symlink_metadata(second.marker()).is_ok());

    drop(guard);
    assert!(fs::symlink_metadata(second.marker()).is_err());
}

#[test]
fn test_fresh_marker_is_not_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("sample.db");
    let lock = StoreLock::for_store(&store, make_test_options(Duration::from_secs(3600)));

    let _held = lock.try_acquire().unwrap().unwrap();
    let other = StoreLock::for_store(&store, make_test_options(Duration::from_secs(3600)));
    assert!(other.try_acquire().unwrap().is_none());
    assert!(fs::symlink_metadata(lock.marker()).is_ok());
}

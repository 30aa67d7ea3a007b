//! Transient cache teardown hand-off: registry, reaper fallback, leak.

use ferrous_scopes::{
    factory_fn, Dependents, Factory, Key, ReclamationPolicy, Reaper, RequestContext, ScopeCache,
    TransientCache,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn tracked_factory(destroyed: Arc<AtomicUsize>) -> Arc<dyn Factory<Vec<u8>>> {
    factory_fn(|_| Ok(vec![0u8; 64]))
        .with_destructor(move |_, _| {
            destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .shared()
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn registry_owns_teardown() {
    init_tracing();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let factory = tracked_factory(destroyed.clone());
    let dependents = Arc::new(Dependents::new());
    let request = RequestContext::new().with_dependents(dependents.clone()).shared();
    let cache = TransientCache::with_policy(ReclamationPolicy::Registry);
    let key = Key::named("buffer");

    let values: Vec<_> = (0..3)
        .map(|_| cache.instance(Some(&key), Some(&factory), Some(&request)).unwrap().unwrap())
        .collect();
    assert!(!Arc::ptr_eq(&values[0], &values[1]));
    assert_eq!(dependents.len(), 3);
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);

    dependents.close().unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 3);

    // Late registrations are torn down on the spot.
    cache.instance(Some(&key), Some(&factory), Some(&request)).unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 4);
}

#[test]
fn registry_wins_over_fallback() {
    let reaper = Reaper::spawn(Duration::from_millis(5)).unwrap();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let factory = tracked_factory(destroyed.clone());
    let dependents = Arc::new(Dependents::new());
    let request = RequestContext::new().with_dependents(dependents.clone()).shared();
    let cache = TransientCache::with_reaper(ReclamationPolicy::Fallback, reaper.clone());

    drop(cache.instance(None, Some(&factory), Some(&request)).unwrap());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(reaper.reclaimed(), 0);
    assert_eq!(dependents.len(), 1);

    dependents.close().unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    reaper.shutdown_and_join();
}

#[test]
fn fallback_reclaims_dropped_values() {
    init_tracing();
    let reaper = Reaper::spawn(Duration::from_millis(10)).unwrap();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let factory = tracked_factory(destroyed.clone());
    let cache = TransientCache::with_reaper(ReclamationPolicy::Fallback, reaper.clone());

    let value = cache.instance(None, Some(&factory), None).unwrap().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(destroyed.load(Ordering::SeqCst), 0, "value still referenced");

    drop(value);
    assert!(eventually(|| destroyed.load(Ordering::SeqCst) == 1));
    assert!(eventually(|| reaper.reclaimed() == 1));
    reaper.shutdown_and_join();
}

#[test]
fn stopped_reaper_leaves_value_alone() {
    init_tracing();
    let reaper = Reaper::spawn(Duration::from_millis(5)).unwrap();
    reaper.shutdown_and_join();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let factory = tracked_factory(destroyed.clone());
    let cache = TransientCache::with_reaper(ReclamationPolicy::Fallback, reaper);

    let value = cache.instance(None, Some(&factory), None).unwrap().unwrap();
    assert_eq!(value.len(), 64);
    drop(value);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);
}

#[test]
fn registry_policy_without_registry_leaks() {
    init_tracing();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let factory = tracked_factory(destroyed.clone());
    let request = RequestContext::new().shared();
    let cache = TransientCache::with_policy(ReclamationPolicy::Registry);

    let value = cache.instance(None, Some(&factory), Some(&request)).unwrap().unwrap();
    drop(value);
    cache.close().unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);
}

#[test]
fn non_destroying_factories_are_not_registered() {
    let dependents = Arc::new(Dependents::new());
    let request = RequestContext::new().with_dependents(dependents.clone()).shared();
    let factory = factory_fn(|_| Ok(1u8)).shared();
    let cache = TransientCache::with_policy(ReclamationPolicy::Registry);

    cache.instance(None, Some(&factory), Some(&request)).unwrap();
    assert!(dependents.is_empty());
}

#[test]
fn fallback_destroys_without_request_context() {
    init_tracing();
    let reaper = Reaper::spawn(Duration::from_millis(5)).unwrap();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let saw_request = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));

    let (d, s) = (destroyed.clone(), saw_request.clone());
    let factory = factory_fn(|_| Ok(String::from("scratch")))
        .with_destructor(move |_, request| {
            if request.is_some() {
                s.fetch_add(1, Ordering::SeqCst);
            }
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .shared();
    let r = released.clone();
    let request = RequestContext::new()
        .with_release(move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .shared();
    let cache = TransientCache::with_reaper(ReclamationPolicy::Fallback, reaper.clone());

    drop(cache.instance(None, Some(&factory), Some(&request)).unwrap());
    assert!(eventually(|| destroyed.load(Ordering::SeqCst) == 1));
    assert_eq!(saw_request.load(Ordering::SeqCst), 0);
    assert_eq!(released.load(Ordering::SeqCst), 0);
    reaper.shutdown_and_join();
}

#![no_main]

use ferrous_scopes::{factory_fn, Dependents, Key, MapCache, RequestContext, ScopeCache, ScopeId, TransientCache};
use libfuzzer_sys::fuzz_target;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// Interprets the input as a sequence of cache operations and checks that
// every created value is destroyed exactly once by the end.
fuzz_target!(|data: &[u8]| {
    let created = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));
    let (c, d) = (created.clone(), destroyed.clone());
    let factory = factory_fn(move |_| Ok(c.fetch_add(1, Ordering::SeqCst)))
        .with_destructor(move |_, _| {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .shared();

    let cache = MapCache::new(ScopeId::new("fuzz"));
    let transient = TransientCache::with_policy(ferrous_scopes::ReclamationPolicy::Registry);
    let dependents = Arc::new(Dependents::new());
    let request = RequestContext::new().with_dependents(dependents.clone()).shared();

    for byte in data {
        let key = Key::named(format!("k{}", byte & 0x0f));
        match byte >> 4 {
            0..=7 => {
                let _ = cache.instance(Some(&key), Some(&factory), Some(&request));
            }
            8..=11 => {
                let _ = cache.remove(Some(&key));
            }
            12..=14 => {
                let _ = transient.instance(Some(&key), Some(&factory), Some(&request));
            }
            _ => {
                let _ = cache.close();
            }
        }
    }

    let _ = cache.close();
    let _ = dependents.close();
    assert_eq!(created.load(Ordering::SeqCst), destroyed.load(Ordering::SeqCst));
});

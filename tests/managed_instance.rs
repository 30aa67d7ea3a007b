//! Exactly-once teardown and failure aggregation of managed instances.

use ferrous_scopes::{
    Destructor, ManagedInstance, ReleaseError, Releaser, RequestContext, ScopeError, TeardownCause,
};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn counting_destructor(calls: Arc<AtomicUsize>, fail: bool) -> Destructor<String> {
    Box::new(move |_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        if fail {
            Err("destructor boom".into())
        } else {
            Ok(())
        }
    })
}

fn counting_releaser(calls: Arc<AtomicUsize>, outcome: Option<ReleaseError>) -> Releaser {
    let outcome = std::sync::Mutex::new(outcome);
    Box::new(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        match outcome.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    })
}

#[test]
fn concurrent_close_tears_down_once() {
    let destroyed = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    let instance = Arc::new(ManagedInstance::with_releaser(
        Some(Arc::new("pooled".to_string())),
        Some(counting_destructor(destroyed.clone(), false)),
        Some(counting_releaser(released.clone(), None)),
        None,
    ));

    let barrier = Arc::new(Barrier::new(16));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let instance = instance.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                instance.close().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(matches!(instance.get(), Err(ScopeError::AlreadyClosed)));
}

#[test]
fn destructor_failure_is_primary_and_release_is_suppressed() {
    let destroyed = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    let instance = ManagedInstance::with_releaser(
        Some(Arc::new("pooled".to_string())),
        Some(counting_destructor(destroyed.clone(), true)),
        Some(counting_releaser(released.clone(), Some(ReleaseError::Failed("release boom".into())))),
        None,
    );

    let error = instance.close().unwrap_err();
    assert!(matches!(error.primary(), TeardownCause::Destructor(e) if e.to_string() == "destructor boom"));
    assert!(matches!(error.suppressed(), [TeardownCause::Release(e)] if e.to_string() == "release boom"));
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);

    // Losers never see the failure again.
    instance.close().unwrap();
}

#[test]
fn interrupted_release_becomes_domain_failure() {
    let released = Arc::new(AtomicUsize::new(0));
    let instance = ManagedInstance::with_releaser(
        Some(Arc::new("pooled".to_string())),
        None,
        Some(counting_releaser(released, Some(ReleaseError::Interrupted("shutdown".into())))),
        None,
    );

    let error = instance.close().unwrap_err();
    assert!(matches!(error.primary(), TeardownCause::Interrupted(reason) if reason == "shutdown"));
    assert!(error.suppressed().is_empty());
}

#[test]
fn creation_request_is_released_after_destruction() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = order.clone();
    let request = RequestContext::new()
        .with_release(move || {
            log.lock().unwrap().push("release");
            Ok(())
        })
        .shared();

    let log = order.clone();
    let destructor: Destructor<u32> = Box::new(move |value, request| {
        assert_eq!(**value, 11);
        assert!(request.is_some());
        log.lock().unwrap().push("destroy");
        Ok(())
    });
    let instance = ManagedInstance::new(Some(Arc::new(11u32)), Some(destructor), Some(request));

    instance.close().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["destroy", "release"]);
}

#[test]
fn absent_value_still_releases() {
    let destroyed = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    let instance = ManagedInstance::with_releaser(
        None,
        Some(counting_destructor(destroyed.clone(), false)),
        Some(counting_releaser(released.clone(), None)),
        None,
    );

    assert!(instance.get().unwrap().is_none());
    instance.close().unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn equality_follows_the_value() {
    let value = Arc::new("same".to_string());
    let a = ManagedInstance::new(Some(value.clone()), None, None);
    let b = ManagedInstance::new(Some(value), None, None);
    let none_a: ManagedInstance<String> = ManagedInstance::new(None, None, None);
    let none_b: ManagedInstance<String> = ManagedInstance::new(None, None, None);

    b.close().unwrap();
    assert_eq!(a, b);
    assert_eq!(none_a, none_b);
    assert_ne!(a, none_a);
}

proptest! {
    // Every combination of destructor and releaser outcomes runs both steps
    // once and reports exactly the failures that happened.
    #[test]
    fn teardown_reports_exactly_the_failures(
        destructor_fails in any::<bool>(),
        release in prop_oneof![Just(0u8), Just(1u8), Just(2u8)],
        closers in 1usize..4,
    ) {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let outcome = match release {
            0 => None,
            1 => Some(ReleaseError::Failed("release".into())),
            _ => Some(ReleaseError::Interrupted("interrupt".into())),
        };
        let instance = ManagedInstance::with_releaser(
            Some(Arc::new("value".to_string())),
            Some(counting_destructor(destroyed.clone(), destructor_fails)),
            Some(counting_releaser(released.clone(), outcome)),
            None,
        );

        let first = instance.close();
        for _ in 1..closers {
            prop_assert!(instance.close().is_ok());
        }
        prop_assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        prop_assert_eq!(released.load(Ordering::SeqCst), 1);

        let expected = usize::from(destructor_fails) + usize::from(release != 0);
        match first {
            Ok(()) => prop_assert_eq!(expected, 0),
            Err(error) => {
                prop_assert_eq!(error.len(), expected);
                if destructor_fails {
                    prop_assert!(matches!(error.primary(), TeardownCause::Destructor(_)), "destructor failure must be primary");
                }
            }
        }
    }
}

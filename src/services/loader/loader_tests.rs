use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn concurrent_requests_share_one_load() {
    let flight: SingleFlight<String> = SingleFlight::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    let c = Arc::clone(&calls);
    let first = flight.request("syntaxes", move || {
        c.fetch_add(1, Ordering::SeqCst);
        let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        Ok(Arc::new("loaded".to_string()))
    });
    assert!(flight.is_loading("syntaxes"));

    let c = Arc::clone(&calls);
    let second = flight.request("syntaxes", move || {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new("duplicate".to_string()))
    });
    gate_tx.send(()).unwrap();

    let a = first.recv().unwrap().unwrap();
    let b = second.recv().unwrap().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // each waiter hears exactly once
    assert!(first.recv().is_err());
}

#[test]
fn successes_are_memoized() {
    let flight: SingleFlight<u32> = SingleFlight::new();
    let v = flight.load_blocking("n", || Ok(Arc::new(7))).unwrap();
    assert_eq!(*v, 7);
    let again = flight
        .load_blocking("n", || Err("should not run".into()))
        .unwrap();
    assert!(Arc::ptr_eq(&v, &again));
    assert_eq!(flight.get("n").as_deref(), Some(&7));
}

#[test]
fn failures_are_not_memoized() {
    let flight: SingleFlight<u32> = SingleFlight::new();
    let err = flight.load_blocking("flaky", || Err("offline".into())).unwrap_err();
    assert!(err.to_string().contains("offline"));
    assert!(flight.get("flaky").is_none());
    let ok = flight.load_blocking("flaky", || Ok(Arc::new(1))).unwrap();
    assert_eq!(*ok, 1);
}

#[test]
fn panicking_loader_releases_waiters() {
    let flight: SingleFlight<u32> = SingleFlight::new();
    let err = flight
        .load_blocking("boom", || panic!("broken loader"))
        .unwrap_err();
    assert!(err.to_string().contains("panicked"));
    assert!(!flight.is_loading("boom"));
}

#[test]
fn invalidate_forces_reload() {
    let flight: SingleFlight<u32> = SingleFlight::new();
    flight.load_blocking("k", || Ok(Arc::new(1))).unwrap();
    flight.invalidate("k");
    let v = flight.load_blocking("k", || Ok(Arc::new(2))).unwrap();
    assert_eq!(*v, 2);
}

#[test]
fn shared_registry_downcasts() {
    let v = load_shared("loader_tests:vec", || Ok(vec![1u8, 2, 3])).wait().unwrap();
    assert_eq!(v.len(), 3);
    let wrong = load_shared::<String, _>("loader_tests:vec", || Ok(String::new())).wait();
    assert!(wrong.is_err());
}

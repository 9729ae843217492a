use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use reef_atlas_manager::error::AtlasError;
use reef_atlas_manager::transfer::{CancelToken, RetryPolicy};

fn failing_policy() -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_millis(0))
}

#[test]
fn retry_bound_is_exact() {
    let calls = AtomicUsize::new(0);
    let result: Result<(), AtlasError> =
        failing_policy().run(&CancelToken::new(), "https://bucket/DCIM.zip", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AtlasError::TransferHttp("connection reset".to_string()))
        });

    assert_matches!(
        result,
        Err(AtlasError::TransferExhausted { attempts: 5, .. })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn terminal_errors_are_not_retried() {
    let calls = AtomicUsize::new(0);
    let result: Result<(), AtlasError> =
        failing_policy().run(&CancelToken::new(), "https://bucket/DCIM.zip", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AtlasError::TransferStatus {
                status: 404,
                message: "not found".to_string(),
            })
        });

    assert_matches!(result, Err(AtlasError::TransferStatus { status: 404, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn succeeds_after_transient_failures() {
    let calls = AtomicUsize::new(0);
    let result = failing_policy().run(&CancelToken::new(), "https://bucket/DCIM.zip", || {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(AtlasError::TransferHttp("timeout".to_string()))
        } else {
            Ok(42)
        }
    });

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn cancellation_aborts_without_attempting() {
    let cancel = CancelToken::new();
    cancel.cancel();

    let calls = AtomicUsize::new(0);
    let result: Result<(), AtlasError> =
        failing_policy().run(&cancel, "https://bucket/DCIM.zip", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    assert_matches!(result, Err(AtlasError::TransferCancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn cancellation_during_retry_does_not_retry() {
    let cancel = CancelToken::new();
    let calls = AtomicUsize::new(0);
    let result: Result<(), AtlasError> = failing_policy().run(&cancel, "https://bucket/DCIM.zip", || {
        calls.fetch_add(1, Ordering::SeqCst);
        // Simulates an interrupt arriving mid-transfer.
        cancel.cancel();
        Err(AtlasError::TransferHttp("interrupted".to_string()))
    });

    assert_matches!(result, Err(AtlasError::TransferCancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

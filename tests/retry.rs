mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{FakeDocument, FlakyChannel, Harness};
use syncpolicy::*;

fn request() -> PolicyRequest {
    PolicyRequest::fetch_policy("file:///tmp/page.html")
}

#[tokio::test]
async fn provider_registered_late_is_reached_on_third_attempt() -> Result<()> {
    let h = Harness::new(FakeDocument::html("file:///tmp/page.html"));
    let channel = Arc::new(FlakyChannel::missing(2));
    let evaluations = Arc::new(AtomicUsize::new(0));

    let counter = evaluations.clone();
    let evaluator = move |policy: &Policy| -> Result<bool> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(policy.0["attempt"] == 3)
    };
    let guard = SyncPolicyGuard::new(
        h.context.clone(),
        channel.clone(),
        Arc::new(evaluator),
        GuardConfig::default(),
    );

    let run = guard.run()?;
    assert_eq!(run.attempts, 3);
    assert_eq!(channel.calls(), 3);
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    assert!(run.capabilities.can_script);
    assert_eq!(run.reconciled().await?, Some(ReconcileOutcome::Released));
    Ok(())
}

#[test]
fn gives_up_after_three_attempts() {
    let (doc, _signals) = FakeDocument::html("file:///tmp/page.html");
    let channel = FlakyChannel::missing(10);

    let err = RetryController::default()
        .fetch(&channel, &request(), &doc)
        .unwrap_err();
    assert!(err.is_endpoint_missing());
    assert_eq!(channel.calls(), MAX_FETCH_ATTEMPTS);
}

#[test]
fn attempts_are_capped() {
    let (doc, _signals) = FakeDocument::html("file:///tmp/page.html");

    let channel = FlakyChannel::missing(10);
    let _ = RetryController::new(50).fetch(&channel, &request(), &doc);
    assert_eq!(channel.calls(), MAX_FETCH_ATTEMPTS);

    let channel = FlakyChannel::missing(10);
    let _ = RetryController::new(1).fetch(&channel, &request(), &doc);
    assert_eq!(channel.calls(), 1);
}

#[test]
fn other_failures_are_not_retried() {
    let (doc, _signals) = FakeDocument::html("file:///tmp/page.html");
    let channel = FlakyChannel::failing(|| PolicyError::Processing("malformed policy".into()));

    let err = RetryController::default()
        .fetch(&channel, &request(), &doc)
        .unwrap_err();
    assert!(matches!(err, PolicyError::Processing(_)));
    assert_eq!(channel.calls(), 1);
}

#[test]
fn loaded_documents_are_not_retried() {
    let (doc, _signals) = FakeDocument::html("file:///tmp/page.html");
    doc.set_ready_state(ReadyState::Complete);
    let channel = FlakyChannel::missing(1);

    let err = RetryController::default()
        .fetch(&channel, &request(), &doc)
        .unwrap_err();
    assert!(err.is_endpoint_missing());
    assert_eq!(channel.calls(), 1);
}

#[test]
fn unregistered_messenger_endpoint_is_retried() {
    let (doc, _signals) = FakeDocument::html("file:///tmp/page.html");
    let messenger = RuntimeMessenger::new();

    let err = RetryController::default()
        .fetch(&messenger, &request(), &doc)
        .unwrap_err();
    assert!(err.is_endpoint_missing());

    messenger.register(FETCH_POLICY, |msg| Ok(msg["url"].clone()));
    let fetched = RetryController::default().fetch(&messenger, &request(), &doc).unwrap();
    assert_eq!(fetched.attempts, 1);
    assert_eq!(fetched.policy.0, "file:///tmp/page.html");
}

#[tokio::test]
async fn configured_attempts_reach_the_guard() -> Result<()> {
    let h = Harness::new(FakeDocument::html("file:///tmp/page.html"));
    let channel = Arc::new(FlakyChannel::missing(1));
    let config = GuardConfig::builder().with_max_attempts(1).build();

    let err = h.guard_with(channel.clone(), true, config).run().unwrap_err();
    assert!(err.is_endpoint_missing());
    assert_eq!(channel.calls(), 1);
    assert!(!h.context.freezer().is_frozen());
    Ok(())
}

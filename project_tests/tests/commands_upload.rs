//! Control commands and document uploads against the mock backend.

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use lib_stream::{
    ApiClient, CommandDispatcher, CommandOutcome, DocumentUploader, FetchError, UploadStatus,
};
use project_tests::{ControlCall, MockBackend};

const WAIT: Duration = Duration::from_secs(5);

fn dispatcher(backend: &MockBackend) -> CommandDispatcher {
    let config = backend.stream_config();
    CommandDispatcher::new(ApiClient::from_config(&config).unwrap(), &config)
}

#[tokio::test]
async fn test_command_is_sent_exactly_once() {
    let backend = MockBackend::start().await.unwrap();
    let d = dispatcher(&backend);

    let outcome = d.send("start", Some(&json!({ "rounds": 5 }))).await;

    assert_eq!(outcome, CommandOutcome::Accepted { status: 200 });
    assert_eq!(
        backend.control_calls(),
        vec![ControlCall {
            action: "start".to_string(),
            body: Some(json!({ "rounds": 5 })),
        }]
    );
}

#[tokio::test]
async fn test_error_status_is_still_accepted() {
    let backend = MockBackend::start().await.unwrap();
    backend.set_control_status(500);
    let d = dispatcher(&backend);

    let outcome = d.send("stop", None).await;

    assert_eq!(outcome, CommandOutcome::Accepted { status: 500 });
    assert_eq!(backend.control_calls().len(), 1);
    assert_eq!(backend.control_calls()[0].body, None);
}

#[tokio::test]
async fn test_unreachable_backend_is_failed_without_retry() {
    let backend = MockBackend::start().await.unwrap();
    let d = dispatcher(&backend);
    drop(backend);
    // Let the aborted server task release its listener.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = d.send("start", None).await;
    assert!(matches!(outcome, CommandOutcome::Failed { .. }), "got {:?}", outcome);
}

#[tokio::test]
async fn test_upload_status_transitions() {
    let backend = MockBackend::start().await.unwrap();
    let config = backend.stream_config();
    let uploader = DocumentUploader::new(ApiClient::from_config(&config).unwrap(), &config);

    let mut status = uploader.watch_status();
    let seen = tokio::spawn(async move {
        let mut seen = vec![status.borrow_and_update().clone()];
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            let done = current == UploadStatus::Idle;
            seen.push(current);
            if done {
                break;
            }
        }
        seen
    });

    let receipt = uploader.upload("consent.pdf", vec![7u8; 2048]).await.unwrap();
    assert!(receipt.cid.starts_with("QmMock"));
    assert_eq!(uploader.status(), UploadStatus::Success { cid: receipt.cid.clone() });
    assert_eq!(backend.uploads(), vec![("consent.pdf".to_string(), 2048)]);

    let seen = timeout(WAIT, seen).await.unwrap().unwrap();
    // Uploading may be overwritten before the watcher runs; the later states
    // each last long enough to be observed.
    assert!(!seen.iter().any(|s| matches!(s, UploadStatus::Error { .. })), "got {:?}", seen);
    assert!(
        seen.ends_with(&[
            UploadStatus::Anchoring { cid: receipt.cid.clone() },
            UploadStatus::Success { cid: receipt.cid.clone() },
            UploadStatus::Idle,
        ]),
        "got {:?}",
        seen
    );
}

#[tokio::test]
async fn test_concurrent_upload_is_rejected() {
    let backend = MockBackend::start().await.unwrap();
    let config = backend.stream_config();
    let uploader = DocumentUploader::new(ApiClient::from_config(&config).unwrap(), &config);

    let (first, second) = tokio::join!(
        uploader.upload("first.pdf", b"one".to_vec()),
        uploader.upload("second.pdf", b"two".to_vec()),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(FetchError::Rejected(_))));
    assert_eq!(backend.uploads().len(), 1);
}

#[tokio::test]
async fn test_caller_giving_up_during_anchoring_does_not_wedge_uploads() {
    let backend = MockBackend::start().await.unwrap();
    let mut config = backend.stream_config();
    config.anchoring_delay_ms = 1_000;
    let uploader = DocumentUploader::new(ApiClient::from_config(&config).unwrap(), &config);

    let gave_up = timeout(Duration::from_millis(300), uploader.upload("first.pdf", b"one".to_vec())).await;
    assert!(gave_up.is_err());
    assert!(matches!(uploader.status(), UploadStatus::Anchoring { .. }));

    // Anchoring and settling finish without anyone awaiting them.
    let mut status = uploader.watch_status();
    timeout(WAIT, status.wait_for(|s| *s == UploadStatus::Idle)).await.unwrap().unwrap();

    let receipt = uploader.upload("second.pdf", b"two".to_vec()).await.unwrap();
    assert_eq!(uploader.status(), UploadStatus::Success { cid: receipt.cid });
    assert_eq!(backend.uploads().len(), 2);
}

#[tokio::test]
async fn test_caller_giving_up_before_the_backend_answers_resets_status() {
    let backend = MockBackend::start().await.unwrap();
    backend.set_upload_delay(Duration::from_millis(500));
    let config = backend.stream_config();
    let uploader = DocumentUploader::new(ApiClient::from_config(&config).unwrap(), &config);

    let gave_up = timeout(Duration::from_millis(100), uploader.upload("first.pdf", b"one".to_vec())).await;
    assert!(gave_up.is_err());
    assert_eq!(uploader.status(), UploadStatus::Idle);

    backend.set_upload_delay(Duration::ZERO);
    let receipt = uploader.upload("second.pdf", b"two".to_vec()).await.unwrap();
    assert!(receipt.cid.starts_with("QmMock"));
    assert!(backend.uploads().contains(&("second.pdf".to_string(), 3)));
}

//! End-to-end session tests: two rooms on an in-process rendezvous, uploads
//! posted to the reference storage endpoints on an ephemeral port.
//!
//! Run with: cargo test --test call_flow_test

use async_trait::async_trait;
use bytes::Bytes;
use ekyc_session::config::{SessionConfig, TeardownPolicy};
use ekyc_session::errors::{Result as SessionResult, SessionError};
use ekyc_session::room::{EkycRoom, RoomEvent};
use ekyc_session::server::{self, FsObjectStore, ObjectStore, StoredObject};
use ekyc_session::session::{CallState, EndReason};
use ekyc_session::testing::{synthetic_chunk, SyntheticMediaDevices};
use ekyc_session::upload::UploadStatus;
use ekyc_session::{EntryParams, LocalRendezvous};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// File store that remembers every key written
struct RecordingStore {
    inner: FsObjectStore,
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put(&self, key: &str, body: Bytes, content_type: Option<&str>) -> SessionResult<StoredObject> {
        self.keys.lock().unwrap().push(key.to_string());
        self.inner.put(key, body, content_type).await
    }

    async fn get(&self, key: &str) -> SessionResult<Option<Bytes>> {
        self.inner.get(key).await
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<RecordingStore>,
    config: SessionConfig,
    rendezvous: LocalRendezvous,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore {
            inner: FsObjectStore::new(dir.path()),
            keys: Mutex::new(Vec::new()),
        });

        let mut config = SessionConfig::default();
        config.media.width = 64;
        config.media.height = 48;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = server::router(store.clone(), &config.server);
        tokio::spawn(async move { axum::serve(listener, app).await });
        config.upload.base_url = format!("http://{}", addr);

        Self {
            _dir: dir,
            store,
            config,
            rendezvous: LocalRendezvous::new(),
        }
    }

    async fn room_with(&self, params: EntryParams, devices: SyntheticMediaDevices) -> EkycRoom {
        EkycRoom::open(
            self.config.clone(),
            &params,
            Arc::new(self.rendezvous.clone()),
            Arc::new(devices),
        )
        .await
        .unwrap()
    }

    async fn admin(&self) -> EkycRoom {
        self.room_with(EntryParams::admin("SESSION42", "APP7"), SyntheticMediaDevices::new())
            .await
    }

    async fn applicant(&self) -> EkycRoom {
        self.room_with(EntryParams::applicant("APP7", "SESSION42"), SyntheticMediaDevices::new())
            .await
    }

    fn stored_keys(&self) -> Vec<String> {
        self.store.keys.lock().unwrap().clone()
    }
}

async fn wait_for_state(room: &EkycRoom, state: CallState) -> bool {
    for _ in 0..200 {
        if room.call_state().await == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_admin_records_applicant_and_uploads_once() {
    let harness = Harness::start().await;
    let applicant = harness.applicant().await;
    let mut admin = harness.admin().await;
    assert_eq!(admin.peer_id(), Some("SESSION42"));
    assert_eq!(applicant.peer_id(), Some("APP7"));

    admin.call("APP7").await.unwrap();
    assert_eq!(admin.call_state().await, CallState::Connected);
    assert!(wait_for_state(&applicant, CallState::Connected).await);

    let camera = applicant.local_stream().await.unwrap();
    assert!(admin.start_recording().await.unwrap());

    const N: u64 = 12;
    let mut expected = Vec::new();
    for i in 1..=N {
        let chunk = synthetic_chunk(i, 256);
        expected.extend_from_slice(&chunk);
        camera.push_chunk(chunk).unwrap();
    }

    let task = admin.stop_recording().await.unwrap().unwrap();
    let status = task.wait().await;
    let UploadStatus::Succeeded(receipt) = status else {
        panic!("upload failed: {:?}", status);
    };
    assert_eq!(receipt.message, "Successfully uploaded");
    let data = receipt.data.unwrap();
    assert_eq!(data["applicantId"], "APP7");
    assert_eq!(data["ekycCode"], "SESSION42");
    assert_eq!(data["size"], N * 256);
    assert_eq!(data["contentType"], "video/webm");

    let keys = harness.stored_keys();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("ekyc/development/"));
    assert!(keys[0].ends_with(".webm"));

    let stored = harness.store.get(&keys[0]).await.unwrap().unwrap();
    assert_eq!(stored.as_ref(), expected.as_slice());
}

#[tokio::test]
async fn test_local_stream_is_announced_before_remote() {
    let harness = Harness::start().await;
    let _applicant = harness.applicant().await;
    let admin = harness.admin().await;
    let mut events = admin.subscribe();

    admin.call("APP7").await.unwrap();

    let mut order = Vec::new();
    while order.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event should arrive")
            .unwrap();
        match event {
            RoomEvent::LocalStreamReady { .. } => order.push("local"),
            RoomEvent::RemoteStreamReady { .. } => order.push("remote"),
            _ => {}
        }
    }
    assert_eq!(order, vec!["local", "remote"]);
}

#[tokio::test]
async fn test_screenshot_uploads_remote_frame_at_native_size() {
    let harness = Harness::start().await;
    let _applicant = harness.applicant().await;
    let admin = harness.admin().await;
    admin.call("APP7").await.unwrap();

    let task = admin.capture_screenshot().await.unwrap();
    let UploadStatus::Succeeded(receipt) = task.wait().await else {
        panic!("screenshot upload failed");
    };
    assert_eq!(receipt.message, "Screenshot uploaded successfully!");
    let data = receipt.data.unwrap();
    assert_eq!(data["applicantId"], "APP7");

    let keys = harness.stored_keys();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].ends_with("_screenshot.png"));

    let png = harness.store.get(&keys[0]).await.unwrap().unwrap();
    let image = image::load_from_memory(&png).unwrap();
    assert_eq!((image.width(), image.height()), (64, 48));
}

#[tokio::test]
async fn test_denied_applicant_media_ends_both_sides() {
    let harness = Harness::start().await;
    let applicant = harness
        .room_with(
            EntryParams::applicant("APP7", "SESSION42"),
            SyntheticMediaDevices::denied(),
        )
        .await;
    let mut applicant_events = applicant.subscribe();
    let admin = harness.admin().await;

    let err = admin.call("APP7").await.unwrap_err();
    assert!(matches!(err, SessionError::Negotiation(_)));
    assert_eq!(admin.call_state().await, CallState::Ended);
    assert!(admin.local_stream().await.is_none());

    assert!(wait_for_state(&applicant, CallState::Ended).await);
    assert!(applicant.local_stream().await.is_none());
    assert!(matches!(
        applicant.call_summary().await.unwrap().end_reason,
        Some(EndReason::LocalMediaFailed(_))
    ));

    let failed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(RoomEvent::CallFailed { kind, .. }) = applicant_events.recv().await {
                return kind;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failed, "local_media");
}

#[tokio::test]
async fn test_denied_admin_media_never_dials() {
    let harness = Harness::start().await;
    let applicant = harness.applicant().await;
    let admin = harness
        .room_with(
            EntryParams::admin("SESSION42", "APP7"),
            SyntheticMediaDevices::denied(),
        )
        .await;

    let err = admin.call("APP7").await.unwrap_err();
    assert!(matches!(err, SessionError::LocalMedia(_)));
    assert_eq!(admin.call_state().await, CallState::Ended);
    assert_eq!(applicant.call_state().await, CallState::Idle);
}

#[tokio::test]
async fn test_second_call_is_rejected_while_connected() {
    let harness = Harness::start().await;
    let applicant = harness.applicant().await;
    let _other_applicant = harness
        .room_with(EntryParams::applicant("APP8", "SESSION42"), SyntheticMediaDevices::new())
        .await;
    let admin = harness.admin().await;

    admin.call("APP7").await.unwrap();
    let first = admin.call_summary().await.unwrap();

    let err = admin.call("APP8").await.unwrap_err();
    assert!(matches!(err, SessionError::CallActive(_)));

    let still = admin.call_summary().await.unwrap();
    assert_eq!(still.id, first.id);
    assert_eq!(still.peer, "APP7");
    assert_eq!(still.state, CallState::Connected);
    assert!(admin.remote_stream().await.unwrap().is_live());

    // A third party calling the busy applicant is turned away too.
    let intruder = harness
        .room_with(EntryParams::admin("OTHER", "APP7"), SyntheticMediaDevices::new())
        .await;
    assert!(intruder.call("APP7").await.is_err());
    assert_eq!(applicant.call_state().await, CallState::Connected);
}

#[tokio::test]
async fn test_invalid_and_unknown_targets() {
    let harness = Harness::start().await;
    let admin = harness.admin().await;

    assert!(matches!(
        admin.call("").await,
        Err(SessionError::InvalidTarget(_))
    ));
    assert_eq!(admin.call_state().await, CallState::Idle);

    assert!(matches!(
        admin.call("NOBODY").await,
        Err(SessionError::Negotiation(_))
    ));
    assert_eq!(admin.call_state().await, CallState::Ended);

    // A failed call does not block the next one.
    let _applicant = harness.applicant().await;
    admin.call("APP7").await.unwrap();
    assert_eq!(admin.call_state().await, CallState::Connected);
}

#[tokio::test]
async fn test_remote_hang_up_ends_call_and_releases_camera() {
    let harness = Harness::start().await;
    let mut applicant = harness.applicant().await;
    let admin = harness.admin().await;
    admin.call("APP7").await.unwrap();
    assert!(wait_for_state(&applicant, CallState::Connected).await);
    let admin_camera = admin.local_stream().await.unwrap();

    applicant.hang_up().await.unwrap();

    assert!(wait_for_state(&admin, CallState::Ended).await);
    assert_eq!(
        admin.call_summary().await.unwrap().end_reason,
        Some(EndReason::RemoteHangUp)
    );
    assert!(!admin_camera.is_live());
}

#[tokio::test]
async fn test_teardown_finalizes_active_recording() {
    let harness = Harness::start().await;
    let applicant = harness.applicant().await;
    let mut admin = harness.admin().await;
    admin.call("APP7").await.unwrap();
    assert!(wait_for_state(&applicant, CallState::Connected).await);

    let camera = applicant.local_stream().await.unwrap();
    admin.start_recording().await.unwrap();
    camera.push_chunk(synthetic_chunk(1, 128)).unwrap();

    let task = admin.teardown().await.unwrap().expect("recording is uploaded");
    assert!(matches!(task.wait().await, UploadStatus::Succeeded(_)));
    assert!(!admin.is_recording());
    assert!(!harness.rendezvous.is_registered("SESSION42").await);
}

#[tokio::test]
async fn test_teardown_policies_on_hang_up() {
    let mut harness = Harness::start().await;

    harness.config.capture.teardown_policy = TeardownPolicy::Continue;
    let applicant = harness.applicant().await;
    let mut admin = harness.admin().await;
    admin.call("APP7").await.unwrap();
    assert!(wait_for_state(&applicant, CallState::Connected).await);
    let camera = applicant.local_stream().await.unwrap();
    admin.start_recording().await.unwrap();
    camera.push_chunk(synthetic_chunk(1, 64)).unwrap();

    // Recording outlives the call until stopped explicitly.
    assert!(admin.hang_up().await.unwrap().is_none());
    assert!(admin.is_recording());
    let task = admin.stop_recording().await.unwrap().unwrap();
    assert!(matches!(task.wait().await, UploadStatus::Succeeded(_)));
    admin.teardown().await.unwrap();

    harness.config.capture.teardown_policy = TeardownPolicy::Discard;
    let mut discarding = harness
        .room_with(EntryParams::admin("SESSION43", "APP7"), SyntheticMediaDevices::new())
        .await;
    assert!(wait_for_state(&applicant, CallState::Ended).await);
    discarding.call("APP7").await.unwrap();
    discarding.start_recording().await.unwrap();
    assert!(discarding.hang_up().await.unwrap().is_none());
    assert!(!discarding.is_recording());

    assert_eq!(harness.stored_keys().len(), 1);
}

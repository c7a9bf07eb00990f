mod support;

use support::Rig;
use uvclink_backend_mock::{sample_camera, sample_keyboard, DriverCall, MockUsb};
use uvclink_common::types::{PreviewSize, PreviewTarget, Transform};
use uvclink_daemon::{Config, ConnectProgress, SessionError, StatusEvent};

#[tokio::test(start_paused = true)]
async fn full_flow_reaches_streaming() {
    let mut rig = Rig::new(Config::default());
    assert_eq!(rig.handle.scan().await, Ok(sample_camera()));
    assert_eq!(rig.handle.connect().await, Ok(ConnectProgress::AwaitingPermission));
    assert_eq!(rig.state().await, "permission_pending");
    assert_eq!(rig.usb.pending_prompts(), 1);

    assert_eq!(rig.usb.answer_prompt(true), Some(sample_camera()));
    assert_eq!(rig.state().await, "connected");

    rig.handle
        .surface_available(PreviewTarget::new("surface-1"), 640, 480);
    let outcome = rig.handle.start_preview().await.expect("start");
    assert_eq!(outcome.size, Some(PreviewSize::new(640, 480)));
    assert_eq!(outcome.attempts, 1);
    assert_eq!(rig.state().await, "streaming");
    assert!(rig.driver.is_streaming());

    assert_eq!(
        rig.driver
            .count(|c| matches!(c, DriverCall::SetPreviewSize(_))),
        1
    );
    assert_eq!(rig.driver.opens(), 1);
    assert_eq!(rig.usb.permission_requests(), 1);

    let kinds: Vec<_> = rig.drain_status().iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        [
            "candidate_found",
            "permission_requested",
            "connected",
            "surface_ready",
            "preview_started"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn granted_device_connects_without_prompt() {
    let rig = Rig::new(Config::default());
    rig.usb.grant_in_advance(&sample_camera());
    rig.handle.scan().await.expect("scan");
    assert_eq!(rig.handle.connect().await, Ok(ConnectProgress::Connected));
    assert_eq!(rig.usb.permission_requests(), 0);
    assert_eq!(rig.state().await, "connected");
}

#[tokio::test(start_paused = true)]
async fn scan_without_camera_reports_count() {
    let usb = MockUsb::default();
    usb.attach(sample_keyboard());
    let mut rig = Rig::with_usb(usb, Config::default());
    assert_eq!(rig.handle.scan().await, Err(SessionError::NoCandidateFound));
    assert_eq!(rig.state().await, "idle");
    assert_eq!(
        rig.drain_status(),
        vec![StatusEvent::NoCandidateFound { scanned: 1 }]
    );
}

#[tokio::test(start_paused = true)]
async fn denial_returns_to_idle_without_open() {
    let rig = Rig::new(Config::default());
    rig.handle.scan().await.expect("scan");
    rig.handle.connect().await.expect("connect");
    rig.usb.answer_prompt(false);
    assert_eq!(rig.state().await, "idle");
    assert_eq!(rig.driver.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_grant_after_disconnect_does_nothing() {
    let mut rig = Rig::new(Config::default());
    rig.handle.scan().await.expect("scan");
    rig.handle.connect().await.expect("connect");
    rig.handle.disconnect().await.expect("disconnect");
    assert_eq!(rig.state().await, "idle");

    rig.usb.answer_prompt(true);
    assert_eq!(rig.state().await, "idle");
    assert_eq!(rig.driver.opens(), 0);
    let events = rig.drain_status();
    assert!(events.contains(&StatusEvent::PermissionCancelled(sample_camera())));
}

#[tokio::test(start_paused = true)]
async fn grant_for_other_device_while_pending_is_ignored() {
    let mut rig = Rig::new(Config::default());
    rig.handle.scan().await.expect("scan");
    rig.handle.connect().await.expect("connect");
    rig.drain_status();

    let mut other = sample_camera();
    other.name = "/dev/bus/usb/002/002".into();
    rig.handle.permission_result(other, true);
    assert_eq!(rig.state().await, "permission_pending");
    assert_eq!(rig.driver.opens(), 0);
    assert!(rig.driver.calls().is_empty());
    assert!(rig.drain_status().is_empty());
}

#[tokio::test(start_paused = true)]
async fn wait_connected_follows_the_answer() {
    let rig = Rig::new(Config::default());
    rig.handle.scan().await.expect("scan");
    rig.handle.connect().await.expect("connect");
    let wait = rig.handle.wait_connected();
    rig.usb.answer_prompt(true);
    assert_eq!(wait.await, Ok(()));
    assert_eq!(rig.state().await, "connected");
    // already connected resolves at once
    assert_eq!(rig.handle.wait_connected().await, Ok(()));
}

#[tokio::test(start_paused = true)]
async fn wait_connected_reports_denial() {
    let rig = Rig::new(Config::default());
    rig.handle.scan().await.expect("scan");
    rig.handle.connect().await.expect("connect");
    let wait = rig.handle.wait_connected();
    rig.usb.answer_prompt(false);
    assert_eq!(
        wait.await,
        Err(SessionError::PermissionDenied(sample_camera().name))
    );
}

#[tokio::test(start_paused = true)]
async fn wait_connected_reports_cancellation() {
    let rig = Rig::new(Config::default());
    rig.handle.scan().await.expect("scan");
    rig.handle.connect().await.expect("connect");
    let wait = rig.handle.wait_connected();
    rig.handle.disconnect().await.expect("disconnect");
    assert_eq!(
        wait.await,
        Err(SessionError::PermissionCancelled(sample_camera().name))
    );

    // detach while pending cancels as well
    let rig = Rig::new(Config::default());
    rig.handle.scan().await.expect("scan");
    rig.handle.connect().await.expect("connect");
    let wait = rig.handle.wait_connected();
    rig.handle.device_detached(sample_camera());
    assert_eq!(
        wait.await,
        Err(SessionError::PermissionCancelled(sample_camera().name))
    );
}

#[tokio::test(start_paused = true)]
async fn wait_connected_without_request_is_invalid() {
    let rig = Rig::new(Config::default());
    let err = rig.handle.wait_connected().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { state: "idle", .. }));
}

#[tokio::test(start_paused = true)]
async fn attach_of_camera_while_idle_becomes_candidate() {
    let usb = MockUsb::default();
    let rig = Rig::with_usb(usb.clone(), Config::default());
    usb.attach(sample_camera());
    rig.handle.device_attached(sample_camera());
    assert_eq!(rig.state().await, "candidate_found");

    rig.handle.device_attached(sample_keyboard());
    let snapshot = rig.handle.state().await.expect("state");
    assert_eq!(snapshot.device, Some(sample_camera()));
}

#[tokio::test(start_paused = true)]
async fn detach_in_each_tracked_state_goes_idle() {
    // candidate found
    let rig = Rig::new(Config::default());
    rig.handle.scan().await.expect("scan");
    rig.handle.device_detached(sample_camera());
    assert_eq!(rig.state().await, "idle");

    // permission pending: the late answer is ignored
    let rig = Rig::new(Config::default());
    rig.handle.scan().await.expect("scan");
    rig.handle.connect().await.expect("connect");
    rig.handle.device_detached(sample_camera());
    assert_eq!(rig.state().await, "idle");
    rig.usb.answer_prompt(true);
    assert_eq!(rig.state().await, "idle");
    assert_eq!(rig.driver.opens(), 0);

    // connected
    let rig = Rig::new(Config::default());
    rig.connect().await;
    rig.handle.device_detached(sample_camera());
    assert_eq!(rig.state().await, "idle");
    assert_eq!(rig.driver.closes(), 1);

    // streaming: close without stop
    let rig = Rig::new(Config::default());
    rig.connect_with_surface().await;
    rig.handle.start_preview().await.expect("start");
    rig.handle.device_detached(sample_camera());
    assert_eq!(rig.state().await, "idle");
    assert_eq!(rig.driver.count(|c| *c == DriverCall::StopPreview), 0);
    assert_eq!(rig.driver.closes(), 1);
    assert_eq!(rig.driver.open_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn unrelated_detach_only_reports() {
    let mut rig = Rig::new(Config::default());
    rig.connect().await;
    rig.drain_status();
    rig.handle.device_detached(sample_keyboard());
    assert_eq!(rig.state().await, "connected");
    assert_eq!(
        rig.drain_status(),
        vec![StatusEvent::DeviceDetached(sample_keyboard())]
    );
}

#[tokio::test(start_paused = true)]
async fn start_without_surface_fails_without_driver_calls() {
    let rig = Rig::new(Config::default());
    rig.connect().await;
    assert_eq!(
        rig.handle.start_preview().await,
        Err(SessionError::NoPreviewTarget)
    );
    assert_eq!(rig.driver.count(|c| *c == DriverCall::StartPreview), 0);
}

#[tokio::test(start_paused = true)]
async fn start_while_idle_is_invalid() {
    let rig = Rig::new(Config::default());
    let err = rig.handle.start_preview().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { state: "idle", .. }));
}

#[tokio::test(start_paused = true)]
async fn stop_preview_is_idempotent() {
    let rig = Rig::new(Config::default());
    rig.connect_with_surface().await;
    rig.handle.start_preview().await.expect("start");
    assert_eq!(rig.handle.stop_preview().await, Ok(true));
    assert_eq!(rig.handle.stop_preview().await, Ok(false));
    assert_eq!(rig.driver.count(|c| *c == DriverCall::StopPreview), 1);
    assert!(!rig.driver.is_streaming());
    assert_eq!(rig.state().await, "connected");
}

#[tokio::test(start_paused = true)]
async fn surface_destroy_releases_before_forgetting() {
    let rig = Rig::new(Config::default());
    rig.connect_with_surface().await;
    rig.handle.start_preview().await.expect("start");
    let before = rig.driver.calls().len();

    assert_eq!(
        rig.handle
            .surface_destroyed(PreviewTarget::new("surface-1"))
            .await,
        Ok(true)
    );
    assert_eq!(rig.state().await, "connected");
    let calls = rig.driver.calls();
    assert_eq!(
        calls[before..],
        [DriverCall::StopPreview, DriverCall::SetPreviewTarget(None)]
    );
    let snapshot = rig.handle.state().await.expect("state");
    assert_eq!(snapshot.target, None);
    assert!(!snapshot.preview_active);
}

#[tokio::test(start_paused = true)]
async fn destroy_of_unknown_surface_is_ignored() {
    let rig = Rig::new(Config::default());
    rig.connect_with_surface().await;
    rig.handle.start_preview().await.expect("start");
    assert_eq!(
        rig.handle.surface_destroyed(PreviewTarget::new("other")).await,
        Ok(false)
    );
    assert_eq!(rig.state().await, "streaming");
}

#[tokio::test(start_paused = true)]
async fn surface_gets_mirror_transform() {
    let rig = Rig::new(Config::default());
    rig.handle
        .surface_available(PreviewTarget::new("surface-1"), 640, 480);
    rig.handle.surface_resized(800, 600);
    rig.state().await;
    assert_eq!(
        rig.surface.transforms(),
        vec![
            Transform::horizontal_mirror(640, 480),
            Transform::horizontal_mirror(800, 600)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn mirror_can_be_disabled() {
    let mut config = Config::default();
    config.surface.mirror = false;
    let rig = Rig::new(config);
    rig.handle
        .surface_available(PreviewTarget::new("surface-1"), 640, 480);
    rig.state().await;
    assert_eq!(rig.surface.transforms(), vec![Transform::IDENTITY]);
}

#[tokio::test(start_paused = true)]
async fn open_failure_surfaces_reason() {
    let rig = Rig::new(Config::default());
    rig.driver.fail_open("busy");
    rig.usb.grant_in_advance(&sample_camera());
    rig.handle.scan().await.expect("scan");
    let err = rig.handle.connect().await.unwrap_err();
    assert_eq!(
        err,
        SessionError::DeviceOpenFailed {
            device: sample_camera().name,
            reason: "device rejected open: busy".into()
        }
    );
    assert_eq!(rig.state().await, "idle");
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_open_handle() {
    let rig = Rig::new(Config::default());
    rig.connect_with_surface().await;
    rig.handle.start_preview().await.expect("start");
    rig.handle.shutdown().await.expect("shutdown");
    rig.worker.await.expect("worker");
    assert_eq!(rig.driver.open_handles(), 0);
    assert_eq!(rig.driver.count(|c| *c == DriverCall::StopPreview), 1);
}

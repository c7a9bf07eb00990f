mod support;

use proptest::prelude::*;
use support::Rig;
use uvclink_backend_mock::sample_camera;
use uvclink_common::types::PreviewTarget;
use uvclink_daemon::Config;

#[derive(Debug, Clone, Copy)]
enum Step {
    Scan,
    Connect,
    Grant,
    Deny,
    Start,
    Stop,
    Detach,
    Attach,
    Disconnect,
    SurfaceUp,
    SurfaceDown,
    FailHealth,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Scan),
        Just(Step::Connect),
        Just(Step::Grant),
        Just(Step::Deny),
        Just(Step::Start),
        Just(Step::Stop),
        Just(Step::Detach),
        Just(Step::Attach),
        Just(Step::Disconnect),
        Just(Step::SurfaceUp),
        Just(Step::SurfaceDown),
        Just(Step::FailHealth),
    ]
}

async fn apply(rig: &Rig, step: Step) {
    let handle = &rig.handle;
    match step {
        Step::Scan => {
            let _ = handle.scan().await;
        }
        Step::Connect => {
            let _ = handle.connect().await;
        }
        Step::Grant => {
            rig.usb.answer_prompt(true);
        }
        Step::Deny => {
            rig.usb.answer_prompt(false);
        }
        Step::Start => {
            let _ = handle.start_preview().await;
        }
        Step::Stop => {
            let _ = handle.stop_preview().await;
        }
        Step::Detach => {
            rig.usb.detach(&sample_camera());
            handle.device_detached(sample_camera());
        }
        Step::Attach => {
            rig.usb.detach(&sample_camera());
            rig.usb.attach(sample_camera());
            handle.device_attached(sample_camera());
        }
        Step::Disconnect => {
            let _ = handle.disconnect().await;
        }
        Step::SurfaceUp => handle.surface_available(PreviewTarget::new("surface-1"), 640, 480),
        Step::SurfaceDown => {
            let _ = handle.surface_destroyed(PreviewTarget::new("surface-1")).await;
        }
        Step::FailHealth => rig.driver.script_health(&[false]),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_open_is_closed_exactly_once(steps in proptest::collection::vec(step(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let rig = Rig::new(Config::default());
            for step in steps {
                apply(&rig, step).await;
                let snapshot = rig.handle.state().await.expect("state");
                // at most one live handle, and only while connected
                let live = rig.driver.open_handles();
                assert!(live <= 1);
                let connected = matches!(snapshot.state, "connected" | "streaming");
                assert_eq!(live == 1, connected, "state {}", snapshot.state);
            }
            rig.handle.shutdown().await.expect("shutdown");
            assert_eq!(rig.driver.open_handles(), 0);
            assert_eq!(rig.driver.opens(), rig.driver.closes());
        });
    }
}

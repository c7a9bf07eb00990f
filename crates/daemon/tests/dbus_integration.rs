use anyhow::Result;
use zbus::Connection;

use uvclink_common::types::DeviceDescriptor;
use uvclink_daemon::dbus::{DBUS_NAME, DBUS_PATH};

// These integration tests need a running uvclink-daemon on the session bus.
// Enable with: UVCLINK_TEST_BUS=1 cargo test -p uvclink-daemon --test dbus_integration -- --ignored

fn enabled() -> bool {
    std::env::var("UVCLINK_TEST_BUS").ok().as_deref() == Some("1")
}

#[tokio::test]
#[ignore]
async fn list_candidates_roundtrip() -> Result<()> {
    if !enabled() {
        return Ok(());
    }
    let conn = Connection::session().await?;
    let proxy = zbus::Proxy::new(&conn, DBUS_NAME, DBUS_PATH, "org.uvclink.Session").await?;
    let devices: Vec<DeviceDescriptor> = proxy.call("ListCandidates", &()).await?;
    for device in devices {
        println!("candidate: {device}");
    }
    Ok(())
}

#[tokio::test]
#[ignore]
async fn state_reports_known_name() -> Result<()> {
    if !enabled() {
        return Ok(());
    }
    let conn = Connection::session().await?;
    let proxy = zbus::Proxy::new(&conn, DBUS_NAME, DBUS_PATH, "org.uvclink.Session").await?;
    let (state, _device, _target): (String, String, String) = proxy.call("State", &()).await?;
    assert!(
        ["idle", "candidate_found", "permission_pending", "connected", "streaming"]
            .contains(&state.as_str())
    );
    Ok(())
}

#[tokio::test]
#[ignore]
async fn dbus_name_conflict() -> Result<()> {
    if !enabled() {
        return Ok(());
    }
    // A reserved name can never be acquired.
    let builder = zbus::connection::Builder::session()?;
    let result = builder.name("org.freedesktop.DBus")?.build().await;
    assert!(result.is_err());
    Ok(())
}

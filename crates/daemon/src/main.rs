use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use uvclink_backend_linux::{HotplugMonitor, UdevSubsystem, V4lDriver};
use uvclink_daemon::dbus::{forward_signals, ChannelSurface, SessionService, DBUS_NAME, DBUS_PATH};
use uvclink_daemon::{load_config, Session};

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    info!(target: "uvclink", event = "daemon_start", "uvclink-daemon starting");

    let config = load_config();
    let (surface, transforms) = ChannelSurface::new();
    let (handle, worker) = Session::spawn(
        Arc::new(UdevSubsystem::default()),
        Arc::new(V4lDriver::default()),
        Arc::new(surface),
        config,
    );

    let builder = match std::env::var("UVCLINK_BUS").as_deref() {
        Ok("session") => zbus::connection::Builder::session()?,
        _ => zbus::connection::Builder::system()?,
    };
    let connection = builder
        .name(DBUS_NAME)?
        .serve_at(DBUS_PATH, SessionService::new(handle.clone()))?
        .build()
        .await?;

    let status = handle.subscribe();
    let conn = connection.clone();
    tokio::spawn(async move {
        if let Err(e) = forward_signals(conn, status, transforms).await {
            error!(error = ?e, "signal forwarder exited with error");
        }
    });

    let monitor = HotplugMonitor::open();

    // Pick up a camera that was plugged in before startup.
    match handle.scan().await {
        Ok(device) => info!(device = %device, "initial scan found a camera"),
        Err(e) => info!(reason = %e, "initial scan found no camera"),
    }

    let hotplug = handle.clone();
    let listen = async move {
        match monitor {
            Ok(monitor) => {
                if let Err(e) = monitor.run(|event| hotplug.hotplug(event)).await {
                    error!(error = %e, "hotplug listener stopped");
                }
            }
            Err(e) => {
                error!(error = %e, "hotplug listener unavailable, attach/detach will not be tracked")
            }
        }
        std::future::pending::<()>().await
    };
    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal?,
        _ = listen => {}
    }
    info!("received ctrl_c, exiting");
    handle.shutdown().await?;
    worker.await?;
    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

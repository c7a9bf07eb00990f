use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use zbus::Connection;

use uvclink_common::types::DeviceDescriptor;
use uvclinkctl::{
    describe_start, describe_state, Cli, Commands, SurfaceCmd, DBUS_INTERFACE, DBUS_NAME,
    DBUS_PATH,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let conn = if cli.session_bus {
        Connection::session().await?
    } else {
        Connection::system().await?
    };
    let proxy = zbus::Proxy::new(&conn, DBUS_NAME, DBUS_PATH, DBUS_INTERFACE)
        .await
        .context("cannot reach uvclink-daemon")?;
    match cli.command {
        Commands::List => {
            let devices: Vec<DeviceDescriptor> = proxy.call("ListCandidates", &()).await?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        Commands::Scan => {
            let device: DeviceDescriptor = proxy.call("Scan", &()).await?;
            println!("candidate: {device}");
        }
        Commands::Connect { wait } => {
            let progress: String = proxy.call("Connect", &()).await?;
            match progress.as_str() {
                "awaiting_permission" if wait => {
                    println!("permission requested; waiting for an answer");
                    let () = proxy.call("WaitConnected", &()).await?;
                    println!("connected");
                }
                "awaiting_permission" => {
                    println!("permission requested; answer the prompt, then run `uvclinkctl state`")
                }
                other => println!("{other}"),
            }
        }
        Commands::Start => {
            let (width, height, attempts): (u32, u32, u32) =
                proxy.call("StartPreview", &()).await?;
            println!("{}", describe_start(width, height, attempts));
        }
        Commands::Stop => {
            let stopped: bool = proxy.call("StopPreview", &()).await?;
            println!("{}", if stopped { "preview stopped" } else { "no preview running" });
        }
        Commands::Disconnect => {
            let () = proxy.call("Disconnect", &()).await?;
            println!("disconnected");
        }
        Commands::State => {
            let (state, device, target): (String, String, String) =
                proxy.call("State", &()).await?;
            println!("{}", describe_state(&state, &device, &target));
        }
        Commands::Surface { cmd } => match cmd {
            SurfaceCmd::Available {
                target,
                width,
                height,
            } => {
                let () = proxy
                    .call("SurfaceAvailable", &(target.as_str(), width, height))
                    .await?;
            }
            SurfaceCmd::Resized { width, height } => {
                let () = proxy.call("SurfaceResized", &(width, height)).await?;
            }
            SurfaceCmd::Destroyed { target } => {
                let released: bool = proxy.call("SurfaceDestroyed", &(target.as_str())).await?;
                if !released {
                    println!("{target} was not the live surface");
                }
            }
        },
        Commands::Watch => {
            let mut signals = proxy.receive_all_signals().await?;
            while let Some(msg) = signals.next().await {
                let header = msg.header();
                match header.member().map(|m| m.as_str()) {
                    Some("Status") => {
                        if let Ok((kind, message)) = msg.body().deserialize::<(String, String)>() {
                            println!("[{kind}] {message}");
                        }
                    }
                    Some("TransformChanged") => {
                        if let Ok((matrix,)) = msg.body().deserialize::<(Vec<f64>,)>() {
                            println!("[transform] {matrix:?}");
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

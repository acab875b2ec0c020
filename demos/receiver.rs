use anyhow::Context;
use futures::StreamExt;
use tracing_subscriber::{EnvFilter, fmt};
use upload_supervisor::{Receiver, SupervisorEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go through a non-blocking stdout writer.
    // `RUST_LOG=upload_supervisor::server_output=info` shows what the server prints.
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(writer)
        .init();

    tracing::info!("Starting receiver example");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/receiver.json".to_string());
    let mut receiver = Receiver::from_config_file(&config_path)
        .with_context(|| format!("loading {}", config_path))?;

    std::fs::create_dir_all(&receiver.config().storage_dir)
        .context("creating the storage directory")?;

    // Print lifecycle changes as they happen
    let mut events = Box::pin(receiver.supervisor().events());
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match &event {
                SupervisorEvent::Started { ip, port, .. } => {
                    println!("Server running: open http://{}:{} on the sender", ip, port);
                }
                SupervisorEvent::Failed { message, .. } => {
                    println!("Server failed: {}", message);
                }
                SupervisorEvent::Exited { exit, .. } => {
                    println!("Server exited with code {:?}", exit.code);
                }
                _ => {}
            }
            if let Ok(json) = serde_json::to_string(&event) {
                tracing::debug!(event = %json, "Supervisor event");
            }
        }
    });

    match receiver.run().await {
        Ok(endpoint) => println!("Ready at {}:{}", endpoint.ip, endpoint.port),
        Err(e) => println!("First start failed ({}), retrying in the background", e),
    }
    println!("Uploads are written to {}", receiver.upload_path().display());
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    println!("Stopping...");
    receiver.shutdown().await?;
    printer.abort();

    let history = receiver.supervisor().lifecycle().events(Some(10))?;
    for record in history.iter().rev() {
        println!(
            "{:?} {:?}",
            record.event,
            record.details.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

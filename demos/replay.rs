//! Replay a captured accelerator log
//!
//! Feeds a saved log (or stdin) through an [`OutputMonitor`] as if it were a
//! live process, then reports the given exit code to a [`RecoveryReactor`] and
//! prints every event that was published.
//!
//! ```text
//! cargo run --example replay -- axel.log 1
//! RUST_LOG=accel_dl=debug cargo run --example replay -- - 0 < axel.log
//! ```

use accel_dl::utils::format_speed;
use accel_dl::{
    Config, DownloadId, DownloadItem, Event, OutputMonitor, RecoveryReactor, Status,
    event_channel,
};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::broadcast::error::TryRecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let source = args.next().unwrap_or_else(|| "-".to_string());
    let exit_code: i32 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(0);

    let config = match std::env::var("ACCEL_DL_CONFIG") {
        Ok(path) => Config::from_json_file(path)?,
        Err(_) => Config::default(),
    };

    let (event_tx, mut events) = event_channel(&config);
    let reactor = RecoveryReactor::from_config(&config, event_tx.clone());

    let item = Arc::new(DownloadItem::new(DownloadId(1), source.clone(), ".", 0));
    item.set_status(Status::Downloading);

    let mut monitor = OutputMonitor::new(item.clone(), event_tx, &config.monitor);
    let reader: Box<dyn AsyncBufRead + Unpin> = if source == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        Box::new(BufReader::new(tokio::fs::File::open(&source).await?))
    };
    monitor.run(reader).await?;

    match monitor.finish(exit_code, &reactor).await? {
        Some(failure) => println!("failure: {}", failure.formatted_message()),
        None => println!("no failure to recover from"),
    }

    loop {
        match events.try_recv() {
            Ok(Event::Progress { progress, .. }) => println!(
                "progress {:5.1}%  {}  eta {}  ({} connection(s))",
                progress.progress * 100.0,
                format_speed(progress.speed_bps),
                progress.eta,
                progress.connections
            ),
            Ok(event) => println!("{event:?}"),
            Err(TryRecvError::Lagged(skipped)) => println!("... {skipped} events skipped"),
            Err(_) => break,
        }
    }

    println!("final status: {}", item.status());
    reactor.shutdown().await;
    Ok(())
}

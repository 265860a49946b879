//! Scan coordinator entry point
//!
//! Replays an engine session: reads LSP-framed notifications from stdin, feeds them to
//! a scan host and prints each product's final state as JSON once input ends. Stdin is
//! read on a dedicated thread because `Message::read` blocks. An `initialize` request,
//! when present, replaces the folders given on the command line.
//!
//! Usage: `scan-coordinator [--config <settings.json>] [workspace folder...]`

use anyhow::{anyhow, Context, Result};
use lsp_server::Message;
use std::{env, fs, io, path::PathBuf, sync::Arc, thread};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use scan_coordinator::{CoordinatorConfig, ScanHost, TrustedFolders, WorkspaceManager};

struct Args {
    config_path: Option<PathBuf>,
    folders: Vec<PathBuf>,
}

fn parse_args() -> Result<Option<Args>> {
    let mut args = env::args().skip(1);
    let mut config_path = None;
    let mut folders = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("scan-coordinator {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a path"))?;
                config_path = Some(PathBuf::from(path));
            }
            folder => folders.push(PathBuf::from(folder)),
        }
    }

    if folders.is_empty() {
        folders.push(env::current_dir().context("Failed to resolve current directory")?);
    }

    Ok(Some(Args {
        config_path,
        folders,
    }))
}

fn load_config(path: Option<&PathBuf>) -> Result<CoordinatorConfig> {
    let Some(path) = path else {
        return Ok(CoordinatorConfig::default());
    };

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Config {} is not valid JSON", path.display()))?;

    Ok(CoordinatorConfig::from_lsp_value(value)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting scan coordinator");

    let config = load_config(args.config_path.as_ref())?;
    let trust = Arc::new(TrustedFolders::new(args.folders.clone()));
    let host = ScanHost::new(
        &config,
        WorkspaceManager::new(args.folders),
        trust.clone(),
    )?;

    let (message_tx, mut message_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    let reader = thread::spawn(move || {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        loop {
            match Message::read(&mut input) {
                Ok(Some(message)) => {
                    if message_tx.send(message).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopping on unreadable input: {}", e);
                    break;
                }
            }
        }
    });

    while let Some(message) = message_rx.recv().await {
        match message {
            Message::Notification(not) => {
                if let Err(e) = host.process_notification(not) {
                    warn!("Failed to process notification: {:#}", e);
                }
            }
            Message::Request(req) => match host.process_request(req) {
                // Folders the client announces itself are as trusted as the ones given here.
                Ok(()) => {
                    for folder in host.workspace().folders() {
                        trust.trust(folder);
                    }
                }
                Err(e) => warn!("Failed to process request: {:#}", e),
            },
            Message::Response(_) => {}
        }
    }

    host.drain().await;

    println!("{}", serde_json::to_string_pretty(&host.summary())?);

    host.dispose();
    reader
        .join()
        .map_err(|_| anyhow!("stdin reader thread panicked"))?;

    info!("Shutting down scan coordinator");
    Ok(())
}
